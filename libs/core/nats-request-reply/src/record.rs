//! The unit of data flowing through the pipeline: payload bytes plus metadata.

use crate::error::{RequestReplyError, Result};
use bytes::Bytes;
use std::collections::BTreeMap;

/// A pipeline record.
///
/// Metadata is kept in key order so that anything walking it (header
/// construction, logging) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    payload: Bytes,
    metadata: BTreeMap<String, String>,
}

/// Content constraints enforced when building records from reply bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordLimits {
    pub max_payload_bytes: Option<usize>,
}

impl Record {
    /// Create a record with the given payload and no metadata.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Build a record from reply bytes, enforcing the pipeline's limits.
    pub fn from_reply_bytes(payload: Bytes, limits: RecordLimits) -> Result<Self> {
        if let Some(max) = limits.max_payload_bytes {
            if payload.len() > max {
                return Err(RequestReplyError::conversion(format!(
                    "reply payload of {} bytes exceeds the {} byte limit",
                    payload.len(),
                    max
                )));
            }
        }
        Ok(Self::new(payload))
    }

    /// Add a metadata entry (builder style).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }

    /// Set a metadata entry, replacing any previous value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Look up a metadata value.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Iterate metadata in key order.
    pub fn metadata_iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The record's serialized form, sent as the request body.
    pub fn to_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Parse the payload as JSON.
    pub fn as_json(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}
