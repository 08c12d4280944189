//! Error types for the request/reply stage.

use crate::interpolation::TemplateError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error categories tell the host pipeline whether a failed record is worth
/// sending again. The stage itself never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure (deadline elapsed, no responders, transport hiccup)
    Transient,

    /// The same record will fail again (bad template input, bad config, closed stage)
    Permanent,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
        }
    }
}

/// Error that can occur while constructing the stage or processing a record.
#[derive(Debug, Error)]
pub enum RequestReplyError {
    /// Malformed configuration; the stage is never created
    #[error("Configuration error: {0}")]
    Config(String),

    /// Initial connect failure or a transport failure during a request
    #[error("NATS connection error: {0}")]
    Connection(String),

    /// Subject template failed against a record
    #[error("Subject interpolation error: {0}")]
    Template(#[source] TemplateError),

    /// Header template failed against a record
    #[error("header {name} interpolation error: {source}")]
    HeaderTemplate {
        name: String,
        #[source]
        source: TemplateError,
    },

    /// Deadline elapsed before a reply arrived
    #[error("Request to '{subject}' timed out after {timeout:?}")]
    Timeout { subject: String, timeout: Duration },

    /// Nobody is subscribed to the subject
    #[error("No responders available for subject '{0}'")]
    NoResponders(String),

    /// Reply could not be turned into an output record
    #[error("Reply conversion error: {0}")]
    Conversion(String),

    /// The stage was closed; no connection is available
    #[error("Request/reply processor is closed")]
    Closed,
}

impl RequestReplyError {
    /// Get the error category for the host's retry decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            RequestReplyError::Timeout { .. } => ErrorCategory::Transient,
            RequestReplyError::NoResponders(_) => ErrorCategory::Transient,
            RequestReplyError::Connection(_) => ErrorCategory::Transient,

            RequestReplyError::Config(_) => ErrorCategory::Permanent,
            RequestReplyError::Template(_) => ErrorCategory::Permanent,
            RequestReplyError::HeaderTemplate { .. } => ErrorCategory::Permanent,
            RequestReplyError::Conversion(_) => ErrorCategory::Permanent,
            RequestReplyError::Closed => ErrorCategory::Permanent,
        }
    }

    /// Stable, low-cardinality label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestReplyError::Config(_) => "config",
            RequestReplyError::Connection(_) => "connection",
            RequestReplyError::Template(_) | RequestReplyError::HeaderTemplate { .. } => {
                "template"
            }
            RequestReplyError::Timeout { .. } => "timeout",
            RequestReplyError::NoResponders(_) => "no_responders",
            RequestReplyError::Conversion(_) => "conversion",
            RequestReplyError::Closed => "closed",
        }
    }

    /// Check if this error is worth retrying by the caller.
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error from an async_nats error.
    pub fn from_connect_error(error: impl fmt::Display) -> Self {
        Self::Connection(error.to_string())
    }

    /// Create a conversion error.
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }
}

impl From<core_config::ConfigError> for RequestReplyError {
    fn from(error: core_config::ConfigError) -> Self {
        Self::Config(error.to_string())
    }
}

pub type Result<T, E = RequestReplyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let timeout = RequestReplyError::Timeout {
            subject: "orders.42".to_string(),
            timeout: Duration::from_secs(3),
        };
        assert_eq!(timeout.category(), ErrorCategory::Transient);
        assert!(timeout.is_transient());

        let closed = RequestReplyError::Closed;
        assert_eq!(closed.category(), ErrorCategory::Permanent);

        let config = RequestReplyError::config("bad timeout");
        assert_eq!(config.category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_header_error_names_header() {
        let err = RequestReplyError::HeaderTemplate {
            name: "X-Trace".to_string(),
            source: TemplateError::MissingMetadata("trace_id".to_string()),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("header X-Trace"));
        assert!(rendered.contains("trace_id"));
        assert_eq!(err.kind(), "template");
    }

    #[test]
    fn test_config_error_conversion() {
        let err: RequestReplyError = core_config::ConfigError::MissingEnvVar("X".into()).into();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("X"));
    }
}
