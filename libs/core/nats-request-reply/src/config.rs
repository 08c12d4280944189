//! Configuration for the request/reply stage.

use crate::error::{RequestReplyError, Result};
use crate::interpolation::Interpolator;
use crate::metadata::MetadataFilterConfig;
use core_config::nats::NatsConfig;
use core_config::{env_list, env_optional, env_or_default, env_required, ConfigError, FromEnv};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_TIMEOUT: &str = "3s";

/// Request/reply stage configuration.
///
/// Immutable once the processor is built. Templates are checked and the
/// timeout parsed by [`RequestReplyConfig::validate`], which the processor
/// runs before connecting.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RequestReplyConfig {
    /// Connection settings (servers, label, inbox prefix, TLS, auth)
    pub nats: NatsConfig,

    /// Subject template, e.g. `orders.${! json("id") }`
    pub subject: String,

    /// Header name -> value template
    pub headers: BTreeMap<String, String>,

    /// Which record metadata keys are forwarded as headers
    pub metadata: MetadataFilterConfig,

    /// Request timeout, humantime syntax (`300ms`, `3s`, `2h 45m`)
    pub timeout: String,

    /// Replies larger than this are rejected as conversion errors
    pub max_reply_bytes: Option<usize>,
}

impl Default for RequestReplyConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            subject: String::new(),
            headers: BTreeMap::new(),
            metadata: MetadataFilterConfig::default(),
            timeout: DEFAULT_TIMEOUT.to_string(),
            max_reply_bytes: None,
        }
    }
}

impl RequestReplyConfig {
    /// Create a configuration with the given connection settings and subject template.
    pub fn new(nats: NatsConfig, subject: impl Into<String>) -> Self {
        Self {
            nats,
            subject: subject.into(),
            ..Default::default()
        }
    }

    /// Add an explicit header template.
    pub fn with_header(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.headers.insert(name.into(), template.into());
        self
    }

    /// Set the metadata filter.
    pub fn with_metadata_filter(mut self, filter: MetadataFilterConfig) -> Self {
        self.metadata = filter;
        self
    }

    /// Set the request timeout (humantime syntax).
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Set the reply size limit.
    pub fn with_max_reply_bytes(mut self, max: usize) -> Self {
        self.max_reply_bytes = Some(max);
        self
    }

    /// Parse the configured timeout. Zero is rejected.
    pub fn timeout_duration(&self) -> Result<Duration> {
        let timeout = humantime::parse_duration(self.timeout.trim()).map_err(|e| {
            RequestReplyError::config(format!("invalid timeout '{}': {}", self.timeout, e))
        })?;
        if timeout.is_zero() {
            return Err(RequestReplyError::config("timeout must be greater than zero"));
        }
        Ok(timeout)
    }

    /// Check every construction-time invariant and return the parsed timeout.
    pub fn validate(&self, interpolator: &dyn Interpolator) -> Result<Duration> {
        self.nats.validate()?;

        for url in self.nats.expanded_urls() {
            url.parse::<async_nats::ServerAddr>().map_err(|e| {
                RequestReplyError::config(format!("invalid NATS url '{}': {}", url, e))
            })?;
        }

        if self.subject.trim().is_empty() {
            return Err(RequestReplyError::config("subject is required"));
        }
        interpolator
            .check(&self.subject)
            .map_err(|e| RequestReplyError::config(format!("subject: {}", e)))?;

        for (name, template) in &self.headers {
            if name.trim().is_empty() {
                return Err(RequestReplyError::config("header names must not be empty"));
            }
            interpolator
                .check(template)
                .map_err(|e| RequestReplyError::config(format!("header {}: {}", name, e)))?;
        }

        self.timeout_duration()
    }
}

impl FromEnv for RequestReplyConfig {
    /// Reads the NATS connection settings (see [`NatsConfig`]) plus:
    /// - REQUEST_REPLY_SUBJECT (required)
    /// - REQUEST_REPLY_TIMEOUT (default "3s")
    /// - REQUEST_REPLY_HEADERS: `;`-separated `Name=template` pairs
    /// - REQUEST_REPLY_METADATA_PREFIXES / REQUEST_REPLY_METADATA_PATTERNS (comma separated)
    /// - REQUEST_REPLY_MAX_REPLY_BYTES
    fn from_env() -> Result<Self, ConfigError> {
        let nats = NatsConfig::from_env()?;
        let subject = env_required("REQUEST_REPLY_SUBJECT")?;
        let timeout = env_or_default("REQUEST_REPLY_TIMEOUT", DEFAULT_TIMEOUT);

        let mut headers = BTreeMap::new();
        for pair in env_list("REQUEST_REPLY_HEADERS", ';') {
            let (name, template) = pair.split_once('=').ok_or_else(|| ConfigError::ParseError {
                key: "REQUEST_REPLY_HEADERS".to_string(),
                details: format!("expected Name=template, got '{}'", pair),
            })?;
            headers.insert(name.trim().to_string(), template.trim().to_string());
        }

        let metadata = MetadataFilterConfig {
            include_prefixes: env_list("REQUEST_REPLY_METADATA_PREFIXES", ','),
            include_patterns: env_list("REQUEST_REPLY_METADATA_PATTERNS", ','),
        };

        let max_reply_bytes = env_optional("REQUEST_REPLY_MAX_REPLY_BYTES")
            .map(|raw| {
                raw.trim().parse::<usize>().map_err(|e| ConfigError::ParseError {
                    key: "REQUEST_REPLY_MAX_REPLY_BYTES".to_string(),
                    details: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            nats,
            subject,
            headers,
            metadata,
            timeout,
            max_reply_bytes,
        })
    }
}
