//! The request/reply engine.
//!
//! For each record: resolve the subject, serialize the payload, attach headers
//! when the server supports them, send a request bounded by a deadline, and
//! return the converted reply in place of the input record.

use crate::config::RequestReplyConfig;
use crate::connection::{ConnectionManager, OutboundMessage, Transport};
use crate::convert::convert_reply;
use crate::error::{RequestReplyError, Result};
use crate::headers::HeaderResolver;
use crate::interpolation::{Interpolation, Interpolator};
use crate::metadata::MetadataFilter;
use crate::metrics::RequestReplyMetrics;
use crate::record::{Record, RecordLimits};
use crate::subject::SubjectResolver;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Lifecycle hooks a host pipeline drives.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process one record into exactly one output record.
    ///
    /// `deadline` is the caller's own deadline, if any. The stage never waits
    /// past it.
    async fn process(&self, record: Record, deadline: Option<Instant>) -> Result<Record>;

    /// Release resources. Idempotent.
    async fn close(&self) -> Result<()>;

    /// Label used for logging and metrics.
    fn name(&self) -> &str;
}

/// Sends each record as a NATS request and replaces it with the reply.
pub struct RequestReplyProcessor {
    label: String,
    subject: SubjectResolver,
    headers: HeaderResolver,
    timeout: Duration,
    limits: RecordLimits,
    connection: ConnectionManager,
    metrics: RequestReplyMetrics,
}

impl RequestReplyProcessor {
    /// Validate the configuration and connect. Fails if the broker is unreachable.
    pub async fn connect(config: RequestReplyConfig) -> Result<Self> {
        Self::connect_with_interpolator(config, Arc::new(Interpolation)).await
    }

    /// Like [`connect`](Self::connect) with a custom template engine.
    pub async fn connect_with_interpolator(
        config: RequestReplyConfig,
        interpolator: Arc<dyn Interpolator>,
    ) -> Result<Self> {
        let processor = Self::build(&config, interpolator)?;
        processor
            .connection
            .connect(&config.nats, processor.timeout)
            .await?;

        info!(
            stage = %processor.label,
            subject = %processor.subject.template(),
            timeout = ?processor.timeout,
            "Request/reply processor ready"
        );
        Ok(processor)
    }

    /// Build a processor over an already-established transport.
    pub async fn with_transport(
        config: RequestReplyConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let processor = Self::build(&config, Arc::new(Interpolation))?;
        processor.connection.install(transport).await?;
        Ok(processor)
    }

    fn build(config: &RequestReplyConfig, interpolator: Arc<dyn Interpolator>) -> Result<Self> {
        let timeout = config.validate(interpolator.as_ref())?;
        let filter = MetadataFilter::new(&config.metadata)?;
        let label = config.nats.name.clone();

        Ok(Self {
            subject: SubjectResolver::new(&config.subject, interpolator.as_ref())?,
            headers: HeaderResolver::new(&config.headers, filter, interpolator.as_ref())?,
            timeout,
            limits: RecordLimits {
                max_payload_bytes: config.max_reply_bytes,
            },
            connection: ConnectionManager::new(),
            metrics: RequestReplyMetrics::new(&label),
            label,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Process a record using the configured timeout.
    pub async fn process(&self, record: Record) -> Result<Record> {
        self.process_with_deadline(record, None).await
    }

    /// Process a record, bounded by `min(deadline - now, timeout)`.
    ///
    /// Dropping the returned future cancels the pending request.
    #[instrument(skip(self, record, deadline), fields(stage = %self.label))]
    pub async fn process_with_deadline(
        &self,
        record: Record,
        deadline: Option<Instant>,
    ) -> Result<Record> {
        let result = self.request_reply(&record, deadline).await;
        if let Err(e) = &result {
            self.metrics.request_failed(e.kind());
            debug!(error = %e, kind = e.kind(), "Request/reply failed");
        }
        result
    }

    async fn request_reply(&self, record: &Record, deadline: Option<Instant>) -> Result<Record> {
        // Held until the reply arrives so close() can't pull the connection away.
        let connection = self.connection.acquire().await?;

        let subject = self.subject.resolve(record)?;
        let payload = record.to_bytes();

        let headers = if connection.headers_supported() {
            Some(self.headers.resolve(record)?)
        } else {
            None
        };

        let timeout = self
            .effective_timeout(deadline)
            .ok_or_else(|| RequestReplyError::Timeout {
                subject: subject.clone(),
                timeout: Duration::ZERO,
            })?;

        debug!(subject = %subject, timeout = ?timeout, "Sending request");
        self.metrics.request_sent();
        let started = Instant::now();

        let message = OutboundMessage {
            subject: subject.clone(),
            payload,
            headers,
        };
        let reply = match tokio::time::timeout(timeout, connection.request(message, timeout)).await
        {
            Ok(reply) => reply?,
            Err(_) => return Err(RequestReplyError::Timeout { subject, timeout }),
        };

        let output = convert_reply(reply, self.limits)?;
        self.metrics.reply_received(started.elapsed());
        debug!(subject = %subject, elapsed = ?started.elapsed(), "Reply received");
        Ok(output)
    }

    // None when the caller's deadline has already passed.
    fn effective_timeout(&self, deadline: Option<Instant>) -> Option<Duration> {
        match deadline {
            None => Some(self.timeout),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                (!remaining.is_zero()).then(|| remaining.min(self.timeout))
            }
        }
    }

    /// Close the connection. Waits for in-flight requests; always succeeds.
    pub async fn close(&self) -> Result<()> {
        self.connection.close().await;
        info!(stage = %self.label, "Request/reply processor closed");
        Ok(())
    }
}

#[async_trait]
impl Processor for RequestReplyProcessor {
    async fn process(&self, record: Record, deadline: Option<Instant>) -> Result<Record> {
        self.process_with_deadline(record, deadline).await
    }

    async fn close(&self) -> Result<()> {
        RequestReplyProcessor::close(self).await
    }

    fn name(&self) -> &str {
        &self.label
    }
}
