//! Metrics for the request/reply stage.
//!
//! Recorded through the `metrics` facade; installing an exporter is up to the
//! host binary.

use metrics::{counter, histogram};
use std::time::Duration;

/// Per-stage metrics handle.
#[derive(Debug, Clone)]
pub struct RequestReplyMetrics {
    stage: String,
}

impl RequestReplyMetrics {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
        }
    }

    /// Record a request sent.
    pub fn request_sent(&self) {
        counter!(
            "nats_request_reply_requests_total",
            "stage" => self.stage.clone()
        )
        .increment(1);
    }

    /// Record a reply received and converted.
    pub fn reply_received(&self, duration: Duration) {
        counter!(
            "nats_request_reply_replies_total",
            "stage" => self.stage.clone()
        )
        .increment(1);

        histogram!(
            "nats_request_reply_request_duration_seconds",
            "stage" => self.stage.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed record.
    pub fn request_failed(&self, kind: &'static str) {
        counter!(
            "nats_request_reply_failures_total",
            "stage" => self.stage.clone(),
            "kind" => kind
        )
        .increment(1);
    }
}
