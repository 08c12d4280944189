//! NATS test infrastructure
//!
//! Provides a `TestNats` helper that creates a NATS container for testing, and
//! `Responder` for answering requests sent to it.

use async_nats::{Client, HeaderMap, Message};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::nats::Nats;
use tokio::task::JoinHandle;

/// Test NATS wrapper that ensures proper cleanup
///
/// The container is automatically stopped and removed when this struct is dropped.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestNats;
///
/// # async fn example() {
/// let nats = TestNats::new().await;
///
/// // Answer every request on orders.* with its own payload
/// let _echo = nats.echo_responder("orders.*").await;
///
/// // Point the code under test at the container
/// let url = nats.connection_string();
/// # }
/// ```
pub struct TestNats {
    #[allow(dead_code)]
    container: ContainerAsync<Nats>,
    client: Client,
    pub connection_string: String,
}

impl TestNats {
    /// Create a new test NATS instance
    pub async fn new() -> Self {
        let container = Nats::default()
            .with_tag("latest")
            .start()
            .await
            .expect("Failed to start NATS container");

        let host_port = container
            .get_host_port_ipv4(4222)
            .await
            .expect("Failed to get NATS port");

        let connection_string = format!("nats://127.0.0.1:{}", host_port);

        let client = async_nats::connect(&connection_string)
            .await
            .expect("Failed to connect to NATS");

        tracing::info!(port = host_port, "Test NATS ready");

        Self {
            container,
            client,
            connection_string,
        }
    }

    /// Get a cloned client (useful for passing to services)
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Get the connection string for manual client creation
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Answer requests on `subject` with the request's payload and headers.
    pub async fn echo_responder(&self, subject: &str) -> Responder {
        self.responder(subject, |message| {
            (message.payload.clone(), message.headers.clone())
        })
        .await
    }

    /// Answer requests on `subject` with whatever `reply` builds.
    ///
    /// The subscription is flushed before this returns, so requests sent
    /// afterwards are guaranteed to reach it.
    pub async fn responder<F>(&self, subject: &str, reply: F) -> Responder
    where
        F: Fn(&Message) -> (Bytes, Option<HeaderMap>) + Send + 'static,
    {
        let client = self.client();
        let mut subscriber = client
            .subscribe(subject.to_string())
            .await
            .expect("Failed to subscribe responder");
        client.flush().await.expect("Failed to flush subscription");

        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = received.clone();

        let handle = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                seen.lock()
                    .expect("responder lock poisoned")
                    .push(message.clone());

                let Some(reply_to) = message.reply.clone() else {
                    continue;
                };
                let (payload, headers) = reply(&message);
                let result = match headers {
                    Some(headers) => {
                        client
                            .publish_with_headers(reply_to, headers, payload)
                            .await
                    }
                    None => client.publish(reply_to, payload).await,
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Responder failed to publish reply");
                }
            }
        });

        Responder { handle, received }
    }
}

// Container is automatically cleaned up when TestNats is dropped
impl Drop for TestNats {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test NATS container");
    }
}

/// A running request responder. Stops when dropped.
pub struct Responder {
    handle: JoinHandle<()>,
    received: Arc<Mutex<Vec<Message>>>,
}

impl Responder {
    /// Requests seen so far, in arrival order.
    pub fn received(&self) -> Vec<Message> {
        self.received
            .lock()
            .expect("responder lock poisoned")
            .clone()
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
