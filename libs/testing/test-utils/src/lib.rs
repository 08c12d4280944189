//! Shared test utilities
//!
//! - `TestNats`: NATS container with automatic cleanup (feature: "nats")
//! - `Responder`: a subscriber that answers requests on a subject (feature: "nats")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//!
//! # Features
//!
//! - `nats`: Enables NATS test infrastructure
//! - `all`: Enables everything
//!
//! # Usage
//!
//! Add `features = ["nats"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["nats"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::TestNats;
//!
//! #[tokio::test]
//! async fn my_nats_test() {
//!     let nats = TestNats::new().await;
//!     let echo = nats.echo_responder("orders.*").await;
//!
//!     let reply = nats.client().request("orders.1", "hi".into()).await.unwrap();
//!     assert_eq!(reply.payload.as_ref(), b"hi");
//!     assert_eq!(echo.received().len(), 1);
//! }
//! ```

#[cfg(feature = "nats")]
mod nats;

#[cfg(feature = "nats")]
pub use nats::{Responder, TestNats};

/// Builder for test data with deterministic values
///
/// Subjects derived from the test name keep parallel tests sharing one
/// server from answering each other's requests.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_echo_reply");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Generate a unique subject prefix, e.g. `test.12345.orders`
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("my_test");
    /// let subject = builder.subject("orders");
    /// assert!(subject.starts_with("test."));
    /// assert!(subject.ends_with(".orders"));
    /// ```
    pub fn subject(&self, suffix: &str) -> String {
        format!("test.{}.{}", self.seed, suffix)
    }
}
