//! Request/reply against a real NATS server.
//!
//! Run with: cargo test -p nats-request-reply --test integration_test -- --ignored

use async_nats::HeaderMap;
use core_config::nats::NatsConfig;
use futures::future::join_all;
use nats_request_reply::{
    MetadataFilterConfig, Processor, Record, RequestReplyConfig, RequestReplyError,
    RequestReplyProcessor, META_SUBJECT,
};
use std::time::Duration;
use test_utils::{TestDataBuilder, TestNats};

fn stage_config(nats: &TestNats, subject: &str) -> RequestReplyConfig {
    RequestReplyConfig::new(
        NatsConfig::new([nats.connection_string()]).with_name("integration-stage"),
        subject,
    )
}

fn header(headers: Option<&HeaderMap>, name: &str) -> Option<String> {
    headers
        .and_then(|h| h.get(name))
        .map(|value| value.to_string())
}

fn header_values(headers: Option<&HeaderMap>, name: &str) -> Vec<String> {
    headers
        .into_iter()
        .flat_map(|h| h.iter())
        .filter(|(key, _)| key.to_string() == name)
        .flat_map(|(_, values)| values.iter().map(|v| v.to_string()))
        .collect()
}

#[tokio::test]
#[ignore] // Requires Docker for the NATS container
async fn test_orders_round_trip() {
    let nats = TestNats::new().await;
    let responder = nats
        .responder("orders.42", |message| {
            let mut headers = HeaderMap::new();
            headers.insert("X-Echo", "true");
            (message.payload.clone(), Some(headers))
        })
        .await;

    let config = stage_config(&nats, r#"orders.${! json("id") }"#)
        .with_header("Content-Type", "application/json")
        .with_metadata_filter(MetadataFilterConfig {
            include_prefixes: vec!["trace_id".to_string()],
            ..Default::default()
        });
    let processor = RequestReplyProcessor::connect(config).await.unwrap();

    let input = Record::new(r#"{"id":"42"}"#).with_metadata("trace_id", "abc123");
    let output = processor.process(input).await.unwrap();

    assert_eq!(output.payload().as_ref(), br#"{"id":"42"}"#);
    assert_eq!(output.metadata(META_SUBJECT), Some("orders.42"));
    assert_eq!(output.metadata("X-Echo"), Some("true"));

    let received = responder.received();
    assert_eq!(received.len(), 1);
    let headers = received[0].headers.as_ref();
    assert_eq!(
        header(headers, "Content-Type").as_deref(),
        Some("application/json")
    );
    assert_eq!(header(headers, "trace_id").as_deref(), Some("abc123"));

    processor.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker for the NATS container
async fn test_header_collision_keeps_templated_value_first() {
    let nats = TestNats::new().await;
    let echo = nats.echo_responder("traced").await;

    let config = stage_config(&nats, "traced")
        .with_header("trace_id", "from-template")
        .with_metadata_filter(MetadataFilterConfig {
            include_prefixes: vec!["trace_".to_string()],
            ..Default::default()
        });
    let processor = RequestReplyProcessor::connect(config).await.unwrap();

    let input = Record::new("{}").with_metadata("trace_id", "from-meta");
    let output = processor.process(input).await.unwrap();

    // The echo responder sends the request headers back.
    assert_eq!(output.metadata("trace_id"), Some("from-template"));

    let received = echo.received();
    assert_eq!(
        header_values(received[0].headers.as_ref(), "trace_id"),
        vec!["from-template", "from-meta"]
    );
}

#[tokio::test]
#[ignore] // Requires Docker for the NATS container
async fn test_no_responders() {
    let nats = TestNats::new().await;
    let processor = RequestReplyProcessor::connect(stage_config(&nats, "nobody.home"))
        .await
        .unwrap();

    let err = processor.process(Record::new("{}")).await.unwrap_err();
    assert!(matches!(err, RequestReplyError::NoResponders(ref s) if s == "nobody.home"));
}

#[tokio::test]
#[ignore] // Requires Docker for the NATS container
async fn test_silent_responder_times_out() {
    let nats = TestNats::new().await;
    // Subscribed but never answers.
    let _silent = nats.client().subscribe("slow.service").await.unwrap();
    nats.client().flush().await.unwrap();

    let processor = RequestReplyProcessor::connect(
        stage_config(&nats, "slow.service").with_timeout("200ms"),
    )
    .await
    .unwrap();

    let started = std::time::Instant::now();
    let err = processor.process(Record::new("{}")).await.unwrap_err();

    assert!(matches!(err, RequestReplyError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
#[ignore] // Requires Docker for the NATS container
async fn test_concurrent_requests_share_one_connection() {
    let nats = TestNats::new().await;
    let data = TestDataBuilder::from_test_name("test_concurrent_requests_share_one_connection");
    let prefix = data.subject("orders");
    let _echo = nats.echo_responder(&format!("{}.*", prefix)).await;

    let processor = RequestReplyProcessor::connect(stage_config(
        &nats,
        &format!(r#"{}.${{! json("id") }}"#, prefix),
    ))
    .await
    .unwrap();

    let requests = (0..50).map(|i| {
        let processor = &processor;
        async move {
            let payload = format!(r#"{{"id":"{}"}}"#, i);
            let output = processor.process(Record::new(payload.clone())).await;
            (i, payload, output)
        }
    });

    for (i, payload, output) in join_all(requests).await {
        let output = output.unwrap();
        assert_eq!(output.payload().as_ref(), payload.as_bytes());
        let expected = format!("{}.{}", prefix, i);
        assert_eq!(output.metadata(META_SUBJECT), Some(expected.as_str()));
    }
}

#[tokio::test]
#[ignore] // Requires Docker for the NATS container
async fn test_custom_inbox_prefix() {
    let nats = TestNats::new().await;
    let echo = nats.echo_responder("inbox.check").await;

    let mut config = stage_config(&nats, "inbox.check");
    config.nats = config.nats.with_inbox_prefix("_STAGE_INBOX");
    let processor = RequestReplyProcessor::connect(config).await.unwrap();

    processor.process(Record::new("ping")).await.unwrap();

    let received = echo.received();
    let reply_to = received[0].reply.as_ref().map(|s| s.to_string());
    assert!(reply_to.unwrap_or_default().starts_with("_STAGE_INBOX."));
}

#[tokio::test]
#[ignore] // Requires Docker for the NATS container
async fn test_close_is_idempotent_and_final() {
    let nats = TestNats::new().await;
    let _echo = nats.echo_responder("closing").await;

    let processor: Box<dyn Processor> = Box::new(
        RequestReplyProcessor::connect(stage_config(&nats, "closing"))
            .await
            .unwrap(),
    );
    processor.process(Record::new("before"), None).await.unwrap();

    processor.close().await.unwrap();
    processor.close().await.unwrap();

    let err = processor.process(Record::new("after"), None).await.unwrap_err();
    assert!(matches!(err, RequestReplyError::Closed));
}
