//! Selection of record metadata to forward as message headers.

use crate::error::{RequestReplyError, Result};
use crate::record::Record;
use regex::Regex;
use serde::Deserialize;

/// Raw filter configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetadataFilterConfig {
    /// Keys starting with any of these prefixes are selected
    pub include_prefixes: Vec<String>,
    /// Keys matching any of these regular expressions are selected
    pub include_patterns: Vec<String>,
}

/// Compiled metadata filter. The default filter selects nothing.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    include_prefixes: Vec<String>,
    include_patterns: Vec<Regex>,
}

impl MetadataFilter {
    /// Compile a filter, rejecting invalid patterns.
    pub fn new(config: &MetadataFilterConfig) -> Result<Self> {
        let include_patterns = config
            .include_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    RequestReplyError::config(format!(
                        "invalid metadata include pattern '{}': {}",
                        pattern, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            include_prefixes: config.include_prefixes.clone(),
            include_patterns,
        })
    }

    /// True when no key can ever be selected.
    pub fn is_empty(&self) -> bool {
        self.include_prefixes.is_empty() && self.include_patterns.is_empty()
    }

    pub fn matches(&self, key: &str) -> bool {
        self.include_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
            || self.include_patterns.iter().any(|re| re.is_match(key))
    }

    /// Visit the selected metadata entries of a record, in key order.
    pub fn walk<'r>(&self, record: &'r Record, mut f: impl FnMut(&'r str, &'r str)) {
        if self.is_empty() {
            return;
        }
        for (key, value) in record.metadata_iter() {
            if self.matches(key) {
                f(key, value);
            }
        }
    }
}
