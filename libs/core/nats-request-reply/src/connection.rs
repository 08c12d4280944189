//! Broker connection ownership.
//!
//! One connection per stage, guarded by a read/write lock: record processing
//! shares the read side, connect and close take the write side.
//!
//! ```text
//!  Unconnected ──connect──▶ Connected ──close──▶ Closed
//!       │                                          ▲
//!       └───────────────────close──────────────────┘
//! ```
//!
//! There is no reconnect. Transport failures during requests go back to the
//! caller as errors.

use crate::convert::InboundReply;
use crate::error::{RequestReplyError, Result};
use async_nats::client::{Request, RequestErrorKind};
use async_nats::{Client, ConnectOptions, Event, HeaderMap, ServerAddr};
use async_trait::async_trait;
use bytes::Bytes;
use core_config::nats::NatsConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info, warn};

/// A message ready to be sent as a request.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub subject: String,
    pub payload: Bytes,
    /// `None` when the connection has no header support
    pub headers: Option<HeaderMap>,
}

/// The broker operations the stage relies on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the connected server accepts message headers.
    fn headers_supported(&self) -> bool;

    /// Send a request and wait for its correlated reply, for at most `timeout`.
    async fn request(&self, message: OutboundMessage, timeout: Duration) -> Result<InboundReply>;

    /// Flush and release the connection.
    async fn close(&self) -> Result<()>;
}

/// [`Transport`] over an `async_nats` client.
#[derive(Debug, Clone)]
pub struct NatsTransport {
    client: Client,
}

impl NatsTransport {
    /// Connect using the resolved connection settings.
    ///
    /// `timeout` bounds the connection handshake and is the client's default
    /// request timeout.
    pub async fn connect(config: &NatsConfig, timeout: Duration) -> Result<Self> {
        let addrs = config
            .expanded_urls()
            .iter()
            .map(|url| {
                url.parse::<ServerAddr>().map_err(|e| {
                    RequestReplyError::config(format!("invalid NATS url '{}': {}", url, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let options = connect_options(config, timeout).await?;

        info!(
            servers = %config.server_list(),
            name = %config.name,
            tls = config.tls.enabled,
            "Connecting to NATS"
        );

        let client = options
            .connect(addrs.as_slice())
            .await
            .map_err(RequestReplyError::from_connect_error)?;

        info!(
            name = %config.name,
            headers = client.server_info().headers,
            "Connected to NATS"
        );

        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Get the underlying NATS client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

async fn connect_options(config: &NatsConfig, timeout: Duration) -> Result<ConnectOptions> {
    let mut options = ConnectOptions::new();

    if config.tls.enabled {
        options = options.require_tls(true);
        for ca in &config.tls.root_certificates {
            options = options.add_root_certificates(ca.clone());
        }
        if let (Some(cert), Some(key)) = (&config.tls.client_certificate, &config.tls.client_key) {
            options = options.add_client_certificate(cert.clone(), key.clone());
        }
    }

    if let Some(prefix) = &config.inbox_prefix {
        options = options.custom_inbox_prefix(prefix.as_str());
    }

    options = options.name(config.name.as_str());

    let auth = &config.auth;
    if let Some(path) = &auth.credentials_file {
        options = options.credentials_file(path).await.map_err(|e| {
            RequestReplyError::config(format!(
                "failed to load credentials file '{}': {}",
                path.display(),
                e
            ))
        })?;
    }
    if let Some(seed) = &auth.nkey {
        options = options.nkey(seed.clone());
    }
    if let Some(token) = &auth.token {
        options = options.token(token.clone());
    }
    if let Some(user) = &auth.user {
        options =
            options.user_and_password(user.clone(), auth.password.clone().unwrap_or_default());
    }

    let name = config.name.clone();
    options = options.event_callback(move |event| {
        let name = name.clone();
        async move { log_event(&name, event) }
    });

    Ok(options
        .connection_timeout(timeout)
        .request_timeout(Some(timeout)))
}

fn log_event(name: &str, event: Event) {
    match event {
        Event::Connected => info!(connection = %name, "NATS connection established"),
        Event::Disconnected => warn!(connection = %name, "NATS connection lost"),
        Event::ServerError(e) => error!(connection = %name, error = %e, "NATS server error"),
        Event::ClientError(e) => error!(connection = %name, error = %e, "NATS client error"),
        other => debug!(connection = %name, event = %other, "NATS connection event"),
    }
}

#[async_trait]
impl Transport for NatsTransport {
    fn headers_supported(&self) -> bool {
        self.client.server_info().headers
    }

    async fn request(&self, message: OutboundMessage, timeout: Duration) -> Result<InboundReply> {
        let OutboundMessage {
            subject,
            payload,
            headers,
        } = message;

        let mut request = Request::new().payload(payload).timeout(Some(timeout));
        if let Some(headers) = headers {
            request = request.headers(headers);
        }

        match self.client.send_request(subject.clone(), request).await {
            // The reply itself arrives on an inbox; report the subject we asked on.
            Ok(reply) => Ok(InboundReply {
                subject,
                ..InboundReply::from(reply)
            }),
            Err(e) => Err(request_error(e.kind(), subject, timeout, e.to_string())),
        }
    }

    async fn close(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| RequestReplyError::Connection(e.to_string()))
    }
}

/// Classify a failed request. Anything that is not a timeout or a missing
/// responder means the connection could not carry the request.
fn request_error(
    kind: RequestErrorKind,
    subject: String,
    timeout: Duration,
    details: String,
) -> RequestReplyError {
    match kind {
        RequestErrorKind::TimedOut => RequestReplyError::Timeout { subject, timeout },
        RequestErrorKind::NoResponders => RequestReplyError::NoResponders(subject),
        _ => RequestReplyError::Connection(format!("request to '{}' failed: {}", subject, details)),
    }
}

enum ConnectionState {
    Unconnected,
    Connected(Arc<dyn Transport>),
    Closed,
}

/// Owns the stage's connection handle.
pub struct ConnectionManager {
    state: RwLock<ConnectionState>,
}

/// Shared access to the live connection for the duration of one request.
pub type ConnectionGuard<'a> = RwLockReadGuard<'a, dyn Transport>;

impl ConnectionManager {
    /// Create a manager with no connection yet.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Unconnected),
        }
    }

    /// Connect to NATS and store the handle.
    ///
    /// Fails with `Closed` once the manager has been closed.
    pub async fn connect(&self, config: &NatsConfig, timeout: Duration) -> Result<()> {
        let mut state = self.state.write().await;
        if matches!(*state, ConnectionState::Closed) {
            return Err(RequestReplyError::Closed);
        }
        let transport = NatsTransport::connect(config, timeout).await?;
        *state = ConnectionState::Connected(Arc::new(transport));
        Ok(())
    }

    /// Store an already-established transport.
    pub async fn install(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let mut state = self.state.write().await;
        if matches!(*state, ConnectionState::Closed) {
            return Err(RequestReplyError::Closed);
        }
        *state = ConnectionState::Connected(transport);
        Ok(())
    }

    /// Take the shared lock on the live connection.
    ///
    /// Any number of callers may hold it at once; `close` waits for all of them.
    pub async fn acquire(&self) -> Result<ConnectionGuard<'_>> {
        let state = self.state.read().await;
        RwLockReadGuard::try_map(state, |state| match state {
            ConnectionState::Connected(transport) => Some(transport.as_ref()),
            _ => None,
        })
        .map_err(|_| RequestReplyError::Closed)
    }

    /// Whether a live connection is held.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.read().await, ConnectionState::Connected(_))
    }

    /// Close the connection if present and clear the handle. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if let ConnectionState::Connected(transport) =
            std::mem::replace(&mut *state, ConnectionState::Closed)
        {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Error while closing NATS connection");
            }
            debug!("NATS connection closed");
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
