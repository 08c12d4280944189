use crate::{env_bool, env_list, env_optional, env_or_default, ConfigError, FromEnv};
use serde::Deserialize;
use std::path::PathBuf;

/// Default NATS server when neither `NATS_URLS` nor `NATS_URL` is set
pub const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";

/// NATS connection configuration
///
/// Holds everything needed to open a client connection: the server list, the
/// connection name, an optional custom inbox prefix, TLS and auth material.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URLs. Items containing commas are expanded into several URLs.
    pub urls: Vec<String>,
    /// Connection name reported to the server (the stage label)
    pub name: String,
    /// Explicit prefix for reply inbox subjects
    pub inbox_prefix: Option<String>,
    pub tls: TlsConfig,
    pub auth: AuthConfig,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: vec![DEFAULT_NATS_URL.to_string()],
            name: "nats_request_reply".to_string(),
            inbox_prefix: None,
            tls: TlsConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

/// TLS settings. Certificates are loaded by the client library.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub root_certificates: Vec<PathBuf>,
    pub client_certificate: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

/// Authentication material. At most one mechanism is normally set.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuthConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    /// NKey seed
    pub nkey: Option<String>,
    /// Path to a `.creds` file (JWT + NKey seed)
    pub credentials_file: Option<PathBuf>,
}

// Secrets stay out of logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("nkey", &self.nkey.as_ref().map(|_| "***"))
            .field("credentials_file", &self.credentials_file)
            .finish()
    }
}

impl NatsConfig {
    pub fn new(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_inbox_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.inbox_prefix = Some(prefix.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Server URLs with comma-joined items expanded and blanks removed
    pub fn expanded_urls(&self) -> Vec<String> {
        self.urls
            .iter()
            .flat_map(|url| url.split(','))
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Comma-joined server list as accepted by the client
    pub fn server_list(&self) -> String {
        self.expanded_urls().join(",")
    }

    /// Check structural invariants that don't need the network
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expanded_urls().is_empty() {
            return Err(ConfigError::invalid("urls", "at least one URL is required"));
        }
        if self
            .inbox_prefix
            .as_deref()
            .is_some_and(|prefix| prefix.trim().is_empty())
        {
            return Err(ConfigError::invalid("inbox_prefix", "must not be blank"));
        }
        if self.tls.client_certificate.is_some() != self.tls.client_key.is_some() {
            return Err(ConfigError::invalid(
                "tls",
                "client_certificate and client_key must be set together",
            ));
        }
        if self.auth.password.is_some() && self.auth.user.is_none() {
            return Err(ConfigError::invalid("auth", "password requires a user"));
        }
        Ok(())
    }
}

impl FromEnv for NatsConfig {
    /// Reads:
    /// - NATS_URLS (comma separated), falling back to NATS_URL, then 127.0.0.1:4222
    /// - NATS_CONNECTION_NAME, NATS_INBOX_PREFIX
    /// - NATS_TLS_ENABLED, NATS_TLS_ROOT_CAS, NATS_TLS_CLIENT_CERT, NATS_TLS_CLIENT_KEY
    /// - NATS_USER, NATS_PASSWORD, NATS_TOKEN, NATS_NKEY, NATS_CREDENTIALS_FILE
    fn from_env() -> Result<Self, ConfigError> {
        let mut urls = env_list("NATS_URLS", ',');
        if urls.is_empty() {
            urls.push(env_or_default("NATS_URL", DEFAULT_NATS_URL));
        }

        let tls = TlsConfig {
            enabled: env_bool("NATS_TLS_ENABLED", false)?,
            root_certificates: env_list("NATS_TLS_ROOT_CAS", ',')
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            client_certificate: env_optional("NATS_TLS_CLIENT_CERT").map(PathBuf::from),
            client_key: env_optional("NATS_TLS_CLIENT_KEY").map(PathBuf::from),
        };

        let auth = AuthConfig {
            user: env_optional("NATS_USER"),
            password: env_optional("NATS_PASSWORD"),
            token: env_optional("NATS_TOKEN"),
            nkey: env_optional("NATS_NKEY"),
            credentials_file: env_optional("NATS_CREDENTIALS_FILE").map(PathBuf::from),
        };

        let config = Self {
            urls,
            name: env_or_default("NATS_CONNECTION_NAME", "nats_request_reply"),
            inbox_prefix: env_optional("NATS_INBOX_PREFIX"),
            tls,
            auth,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NATS_VARS: [&str; 13] = [
        "NATS_URLS",
        "NATS_URL",
        "NATS_CONNECTION_NAME",
        "NATS_INBOX_PREFIX",
        "NATS_TLS_ENABLED",
        "NATS_TLS_ROOT_CAS",
        "NATS_TLS_CLIENT_CERT",
        "NATS_TLS_CLIENT_KEY",
        "NATS_USER",
        "NATS_PASSWORD",
        "NATS_TOKEN",
        "NATS_NKEY",
        "NATS_CREDENTIALS_FILE",
    ];

    fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
        vars_with(&[])
    }

    // Every NATS variable unset except the given overrides.
    fn vars_with(
        overrides: &[(&'static str, &'static str)],
    ) -> Vec<(&'static str, Option<&'static str>)> {
        NATS_VARS
            .iter()
            .map(|key| {
                let value = overrides
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, value)| *value);
                (*key, value)
            })
            .collect()
    }

    #[test]
    fn test_nats_config_from_env_defaults() {
        temp_env::with_vars(cleared(), || {
            let config = NatsConfig::from_env().unwrap();
            assert_eq!(config.urls, vec![DEFAULT_NATS_URL.to_string()]);
            assert_eq!(config.name, "nats_request_reply");
            assert_eq!(config.inbox_prefix, None);
            assert!(!config.tls.enabled);
            assert_eq!(config.auth, AuthConfig::default());
        });
    }

    #[test]
    fn test_nats_config_from_env_falls_back_to_nats_url() {
        let vars = vars_with(&[("NATS_URL", "nats://broker:4222")]);
        temp_env::with_vars(vars, || {
            let config = NatsConfig::from_env().unwrap();
            assert_eq!(config.server_list(), "nats://broker:4222");
        });
    }

    #[test]
    fn test_nats_config_from_env_custom_values() {
        let vars = vars_with(&[
            ("NATS_URLS", "nats://a:4222,nats://b:4222"),
            ("NATS_CONNECTION_NAME", "orders-enricher"),
            ("NATS_INBOX_PREFIX", "_INBOX_joe"),
            ("NATS_TLS_ENABLED", "true"),
            ("NATS_TLS_ROOT_CAS", "/etc/ca.pem"),
            ("NATS_USER", "joe"),
            ("NATS_PASSWORD", "secret"),
        ]);
        temp_env::with_vars(vars, || {
            let config = NatsConfig::from_env().unwrap();
            assert_eq!(config.expanded_urls(), vec!["nats://a:4222", "nats://b:4222"]);
            assert_eq!(config.name, "orders-enricher");
            assert_eq!(config.inbox_prefix.as_deref(), Some("_INBOX_joe"));
            assert!(config.tls.enabled);
            assert_eq!(config.tls.root_certificates, vec![PathBuf::from("/etc/ca.pem")]);
            assert_eq!(config.auth.user.as_deref(), Some("joe"));
        });
    }

    #[test]
    fn test_nats_config_from_env_password_without_user() {
        let vars = vars_with(&[("NATS_PASSWORD", "secret")]);
        temp_env::with_vars(vars, || {
            let err = NatsConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("auth"));
        });
    }

    #[test]
    fn test_expanded_urls_splits_commas() {
        let config = NatsConfig::new(["nats://a:4222, nats://b:4222", "", "nats://c:4222"]);
        assert_eq!(
            config.expanded_urls(),
            vec!["nats://a:4222", "nats://b:4222", "nats://c:4222"]
        );
        assert_eq!(
            config.server_list(),
            "nats://a:4222,nats://b:4222,nats://c:4222"
        );
    }

    #[test]
    fn test_validate_rejects_empty_urls() {
        let config = NatsConfig::new([" , "]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_half_client_cert() {
        let config = NatsConfig::default().with_tls(TlsConfig {
            enabled: true,
            client_certificate: Some(PathBuf::from("/tmp/cert.pem")),
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_key"));
    }

    #[test]
    fn test_auth_debug_redacts_secrets() {
        let auth = AuthConfig {
            user: Some("joe".to_string()),
            password: Some("hunter2".to_string()),
            token: Some("t0ken".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("joe"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("t0ken"));
    }
}
