//! Per-record subject resolution.

use crate::error::{RequestReplyError, Result};
use crate::interpolation::{Interpolator, Template, TemplateError};
use crate::record::Record;

/// Evaluates the subject template against each record.
#[derive(Debug)]
pub struct SubjectResolver {
    template: Box<dyn Template>,
}

impl SubjectResolver {
    /// Compile the subject template. A malformed template is a configuration error.
    pub fn new(template: &str, interpolator: &dyn Interpolator) -> Result<Self> {
        let template = interpolator
            .compile(template)
            .map_err(|e| RequestReplyError::config(format!("subject: {}", e)))?;
        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        self.template.source()
    }

    /// Resolve the concrete subject for a record. An empty result is an error.
    pub fn resolve(&self, record: &Record) -> Result<String> {
        let subject = self
            .template
            .evaluate(record)
            .map_err(RequestReplyError::Template)?;

        if subject.trim().is_empty() {
            return Err(RequestReplyError::Template(TemplateError::Parse {
                template: self.template().to_string(),
                details: "resolved to an empty subject".to_string(),
            }));
        }
        Ok(subject)
    }
}
