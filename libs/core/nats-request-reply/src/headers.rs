//! Outbound header construction.

use crate::error::{RequestReplyError, Result};
use crate::interpolation::{Interpolator, Template};
use crate::metadata::MetadataFilter;
use crate::record::Record;
use async_nats::HeaderMap;
use std::collections::BTreeMap;

/// Builds the header set for one outbound message from two sources:
/// explicit header templates, then record metadata selected by the filter.
///
/// A name present in both sources ends up with both values, templated first.
/// Callers must skip this entirely when the connection has no header support.
#[derive(Debug)]
pub struct HeaderResolver {
    templates: Vec<(String, Box<dyn Template>)>,
    filter: MetadataFilter,
}

impl HeaderResolver {
    /// Compile every header template. A malformed one is a configuration error.
    pub fn new(
        templates: &BTreeMap<String, String>,
        filter: MetadataFilter,
        interpolator: &dyn Interpolator,
    ) -> Result<Self> {
        let templates = templates
            .iter()
            .map(|(name, template)| {
                interpolator
                    .compile(template)
                    .map(|compiled| (name.clone(), compiled))
                    .map_err(|e| RequestReplyError::config(format!("header {}: {}", name, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { templates, filter })
    }

    /// Resolve headers for a record.
    pub fn resolve(&self, record: &Record) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (name, template) in &self.templates {
            let value =
                template
                    .evaluate(record)
                    .map_err(|source| RequestReplyError::HeaderTemplate {
                        name: name.clone(),
                        source,
                    })?;
            headers.append(name.as_str(), value.as_str());
        }

        self.filter.walk(record, |key, value| {
            headers.append(key, value);
        });

        Ok(headers)
    }
}

#[cfg(test)]
pub(crate) fn header_values(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .iter()
        .filter(|(key, _)| key.to_string() == name)
        .flat_map(|(_, values)| values.iter().map(|v| v.to_string()))
        .collect()
}
