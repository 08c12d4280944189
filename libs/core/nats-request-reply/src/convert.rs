//! Conversion of broker replies into pipeline records.

use crate::error::Result;
use crate::record::{Record, RecordLimits};
use async_nats::HeaderMap;
use bytes::Bytes;

pub const META_SUBJECT: &str = "nats_subject";
pub const META_SEQUENCE_STREAM: &str = "nats_sequence_stream";
pub const META_SEQUENCE_CONSUMER: &str = "nats_sequence_consumer";
pub const META_NUM_DELIVERED: &str = "nats_num_delivered";
pub const META_NUM_PENDING: &str = "nats_num_pending";
pub const META_DOMAIN: &str = "nats_domain";
pub const META_TIMESTAMP_UNIX_NANO: &str = "nats_timestamp_unix_nano";

/// A reply as received from the broker.
#[derive(Debug, Clone, Default)]
pub struct InboundReply {
    /// Subject the request was sent on
    pub subject: String,
    /// Reply subject of the reply itself; JetStream ACK subjects carry delivery info
    pub reply: Option<String>,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
}

impl From<async_nats::Message> for InboundReply {
    fn from(message: async_nats::Message) -> Self {
        Self {
            subject: message.subject.to_string(),
            reply: message.reply.map(|subject| subject.to_string()),
            payload: message.payload,
            headers: message.headers,
        }
    }
}

/// Delivery information encoded in a JetStream ACK subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryInfo {
    pub domain: String,
    pub stream: String,
    pub consumer: String,
    pub delivered: u64,
    pub stream_sequence: u64,
    pub consumer_sequence: u64,
    pub timestamp_unix_nano: i128,
    pub pending: u64,
}

impl DeliveryInfo {
    /// Parse `$JS.ACK.<stream>.<consumer>.<delivered>.<sseq>.<cseq>.<ts>.<pending>`
    /// or the domain-aware form
    /// `$JS.ACK.<domain>.<account>.<stream>.<consumer>.<delivered>.<sseq>.<cseq>.<ts>.<pending>.<random>[...]`.
    pub fn from_ack_subject(subject: &str) -> Option<Self> {
        let tokens: Vec<&str> = subject.split('.').collect();
        if tokens.len() < 9 || tokens[0] != "$JS" || tokens[1] != "ACK" {
            return None;
        }

        // Old layout has no domain or account hash tokens.
        let (domain, fields) = match tokens.len() {
            9 => ("", &tokens[2..9]),
            n if n >= 12 => (tokens[2], &tokens[4..11]),
            _ => return None,
        };

        Some(Self {
            domain: if domain == "_" { "" } else { domain }.to_string(),
            stream: fields[0].to_string(),
            consumer: fields[1].to_string(),
            delivered: fields[2].parse().ok()?,
            stream_sequence: fields[3].parse().ok()?,
            consumer_sequence: fields[4].parse().ok()?,
            timestamp_unix_nano: fields[5].parse().ok()?,
            pending: fields[6].parse().ok()?,
        })
    }
}

/// Build the output record for a reply.
///
/// The body is the reply payload. Metadata carries the reply subject, JetStream
/// delivery info when the reply has an ACK subject, and every non-empty header
/// (first value wins).
pub fn convert_reply(reply: InboundReply, limits: RecordLimits) -> Result<Record> {
    let mut record = Record::from_reply_bytes(reply.payload, limits)?;
    record.set_metadata(META_SUBJECT, reply.subject);

    if let Some(info) = reply.reply.as_deref().and_then(DeliveryInfo::from_ack_subject) {
        record.set_metadata(META_SEQUENCE_STREAM, info.stream_sequence.to_string());
        record.set_metadata(META_SEQUENCE_CONSUMER, info.consumer_sequence.to_string());
        record.set_metadata(META_NUM_DELIVERED, info.delivered.to_string());
        record.set_metadata(META_NUM_PENDING, info.pending.to_string());
        record.set_metadata(META_DOMAIN, info.domain);
        record.set_metadata(
            META_TIMESTAMP_UNIX_NANO,
            info.timestamp_unix_nano.to_string(),
        );
    }

    if let Some(headers) = &reply.headers {
        for (name, values) in headers.iter() {
            if let Some(value) = values.first().map(|v| v.to_string()) {
                if !value.is_empty() {
                    record.set_metadata(name.to_string(), value);
                }
            }
        }
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v1_ack_subject() {
        let info =
            DeliveryInfo::from_ack_subject("$JS.ACK.ORDERS.worker.2.17.9.1700000000000000000.4")
                .unwrap();
        assert_eq!(info.domain, "");
        assert_eq!(info.stream, "ORDERS");
        assert_eq!(info.consumer, "worker");
        assert_eq!(info.delivered, 2);
        assert_eq!(info.stream_sequence, 17);
        assert_eq!(info.consumer_sequence, 9);
        assert_eq!(info.timestamp_unix_nano, 1_700_000_000_000_000_000);
        assert_eq!(info.pending, 4);
    }

    #[test]
    fn test_parse_v2_ack_subject() {
        let info = DeliveryInfo::from_ack_subject(
            "$JS.ACK.hub.ACCHASH.ORDERS.worker.1.5.3.1700000000000000001.0.rand",
        )
        .unwrap();
        assert_eq!(info.domain, "hub");
        assert_eq!(info.stream, "ORDERS");
        assert_eq!(info.stream_sequence, 5);
        assert_eq!(info.consumer_sequence, 3);
        assert_eq!(info.pending, 0);

        let no_domain = DeliveryInfo::from_ack_subject(
            "$JS.ACK._.ACCHASH.ORDERS.worker.1.5.3.1700000000000000001.0.rand",
        )
        .unwrap();
        assert_eq!(no_domain.domain, "");
    }

    #[test]
    fn test_v2_ack_subject_requires_random_token() {
        assert!(DeliveryInfo::from_ack_subject(
            "$JS.ACK.hub.ACCHASH.ORDERS.worker.1.5.3.1700000000000000001.0"
        )
        .is_none());
        assert!(DeliveryInfo::from_ack_subject(
            "$JS.ACK.hub.ACCHASH.ORDERS.worker.1.5.3.1700000000000000001.0.rand.extra"
        )
        .is_some());
    }

    #[test]
    fn test_non_ack_subjects_are_ignored() {
        assert!(DeliveryInfo::from_ack_subject("_INBOX.abc.def").is_none());
        assert!(DeliveryInfo::from_ack_subject("$JS.ACK.a.b.c").is_none());
        assert!(DeliveryInfo::from_ack_subject("$JS.ACK.S.C.x.1.1.1.1").is_none());
        assert!(DeliveryInfo::from_ack_subject("$JS.ACK.a.b.S.C.1.1.1.1").is_none());
    }

    #[test]
    fn test_convert_plain_reply() {
        let reply = InboundReply {
            subject: "_INBOX.abc.1".to_string(),
            payload: Bytes::from_static(b"pong"),
            ..Default::default()
        };
        let record = convert_reply(reply, RecordLimits::default()).unwrap();
        assert_eq!(record.payload().as_ref(), b"pong");
        assert_eq!(record.metadata(META_SUBJECT), Some("_INBOX.abc.1"));
        assert_eq!(record.metadata(META_SEQUENCE_STREAM), None);
    }

    #[test]
    fn test_convert_reply_with_delivery_info_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Echo", "yes");
        headers.insert("X-Empty", "");

        let reply = InboundReply {
            subject: "orders.42".to_string(),
            reply: Some("$JS.ACK.ORDERS.worker.1.7.7.1700000000000000000.0".to_string()),
            payload: Bytes::from_static(b"{}"),
            headers: Some(headers),
        };

        let record = convert_reply(reply, RecordLimits::default()).unwrap();
        assert_eq!(record.metadata(META_SUBJECT), Some("orders.42"));
        assert_eq!(record.metadata(META_SEQUENCE_STREAM), Some("7"));
        assert_eq!(record.metadata(META_SEQUENCE_CONSUMER), Some("7"));
        assert_eq!(record.metadata(META_NUM_DELIVERED), Some("1"));
        assert_eq!(record.metadata(META_NUM_PENDING), Some("0"));
        assert_eq!(record.metadata(META_DOMAIN), Some(""));
        assert_eq!(
            record.metadata(META_TIMESTAMP_UNIX_NANO),
            Some("1700000000000000000")
        );
        assert_eq!(record.metadata("X-Echo"), Some("yes"));
        assert_eq!(record.metadata("X-Empty"), None);
    }

    #[test]
    fn test_convert_rejects_oversized_reply() {
        let reply = InboundReply {
            subject: "s".to_string(),
            payload: Bytes::from_static(b"0123456789"),
            ..Default::default()
        };
        let limits = RecordLimits {
            max_payload_bytes: Some(5),
        };
        assert_eq!(convert_reply(reply, limits).unwrap_err().kind(), "conversion");
    }
}
