//! NATS request/reply pipeline stage.
//!
//! Each record flowing through the stage is sent as a NATS request on a
//! subject derived from the record, and the reply replaces the record
//! downstream.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────┐   ┌────────────────┐   ┌───────────────────┐
//! │  Record  │──▶│ SubjectResolver │──▶│ HeaderResolver │──▶│ ConnectionManager │
//! └──────────┘   └─────────────────┘   └────────────────┘   └───────────────────┘
//!                                                                     │ request
//!                                                                     ▼
//! ┌──────────┐   ┌─────────────────┐                         ┌───────────────────┐
//! │  Record  │◀──│  convert_reply  │◀────────── reply ───────│       NATS        │
//! └──────────┘   └─────────────────┘                         └───────────────────┘
//! ```
//!
//! # Key Features
//!
//! - **Templated subjects and headers**: `${! json("id") }`, `${! meta("k") }`
//! - **Metadata forwarding**: record metadata selected by prefix or regex becomes headers
//! - **Bounded requests**: `min(caller deadline, configured timeout)`
//! - **Safe close**: in-flight requests finish before the connection goes away
//! - **Metrics**: requests, replies, failures by kind, latency histogram
//!
//! # Example
//!
//! ```rust,ignore
//! use core_config::nats::NatsConfig;
//! use nats_request_reply::{Record, RequestReplyConfig, RequestReplyProcessor};
//!
//! let config = RequestReplyConfig::new(
//!     NatsConfig::new(["nats://127.0.0.1:4222"]),
//!     r#"orders.${! json("id") }"#,
//! )
//! .with_header("Content-Type", "application/json")
//! .with_timeout("2s");
//!
//! let processor = RequestReplyProcessor::connect(config).await?;
//! let reply = processor.process(Record::new(r#"{"id":"42"}"#)).await?;
//! assert_eq!(reply.metadata("nats_subject"), Some("orders.42"));
//! processor.close().await?;
//! ```

mod config;
mod connection;
mod convert;
mod error;
mod headers;
mod interpolation;
mod metadata;
pub mod metrics;
mod processor;
mod record;
mod subject;

pub use config::{RequestReplyConfig, DEFAULT_TIMEOUT};
pub use connection::{ConnectionGuard, ConnectionManager, NatsTransport, OutboundMessage, Transport};
pub use convert::{
    convert_reply, DeliveryInfo, InboundReply, META_DOMAIN, META_NUM_DELIVERED, META_NUM_PENDING,
    META_SEQUENCE_CONSUMER, META_SEQUENCE_STREAM, META_SUBJECT, META_TIMESTAMP_UNIX_NANO,
};
pub use error::{ErrorCategory, RequestReplyError, Result};
pub use headers::HeaderResolver;
pub use interpolation::{CompiledTemplate, Interpolation, Interpolator, Template, TemplateError};
pub use metadata::{MetadataFilter, MetadataFilterConfig};
pub use metrics::RequestReplyMetrics;
pub use processor::{Processor, RequestReplyProcessor};
pub use record::{Record, RecordLimits};
pub use subject::SubjectResolver;
