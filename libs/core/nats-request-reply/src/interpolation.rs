//! Per-record string interpolation.
//!
//! Templates are plain text with embedded expressions of the form
//! `${! <function>(<arg>) }`, optionally followed by `.or("<default>")`:
//!
//! | Expression            | Value                                       |
//! |-----------------------|---------------------------------------------|
//! | `meta("kafka_topic")` | record metadata value                       |
//! | `json("meta.type")`   | dotted path into the JSON payload           |
//! | `json()`              | the whole JSON payload                      |
//! | `content()`           | the raw payload as UTF-8 (lossy)            |
//!
//! Templates are compiled once when the stage is built; each record only pays
//! for evaluation. The engine sits behind the [`Interpolator`] trait so the
//! request/reply processor doesn't depend on a particular expression language.

use crate::record::Record;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

const EXPR_OPEN: &str = "${!";

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<func>meta|json|content)\(\s*(?:"(?P<arg>(?:[^"\\]|\\.)*)")?\s*\)(?:\s*\.or\(\s*"(?P<default>(?:[^"\\]|\\.)*)"\s*\))?$"#,
    )
    .expect("expression grammar is a valid regex")
});

/// Error evaluating or parsing a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template '{template}': {details}")]
    Parse { template: String, details: String },

    #[error("metadata key '{0}' is not set")]
    MissingMetadata(String),

    #[error("field '{0}' not found in JSON payload")]
    MissingField(String),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
}

/// A template parsed once and evaluated against many records.
pub trait Template: Send + Sync + std::fmt::Debug {
    /// The template text it was compiled from.
    fn source(&self) -> &str;

    /// Evaluate against a record.
    fn evaluate(&self, record: &Record) -> Result<String, TemplateError>;
}

/// Compiles templates for per-record evaluation.
pub trait Interpolator: Send + Sync {
    /// Parse a template. Malformed templates fail here, never per record.
    fn compile(&self, template: &str) -> Result<Box<dyn Template>, TemplateError>;

    /// Check that a template is well formed without evaluating it.
    fn check(&self, template: &str) -> Result<(), TemplateError> {
        self.compile(template).map(|_| ())
    }

    /// Compile and evaluate in one go.
    fn evaluate(&self, template: &str, record: &Record) -> Result<String, TemplateError> {
        self.compile(template)?.evaluate(record)
    }
}

/// Default interpolation engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpolation;

impl Interpolator for Interpolation {
    fn compile(&self, template: &str) -> Result<Box<dyn Template>, TemplateError> {
        Ok(Box::new(CompiledTemplate {
            source: template.to_string(),
            segments: parse(template)?,
        }))
    }
}

/// Output of [`Interpolation::compile`].
#[derive(Debug)]
pub struct CompiledTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl Template for CompiledTemplate {
    fn source(&self) -> &str {
        &self.source
    }

    fn evaluate(&self, record: &Record) -> Result<String, TemplateError> {
        let mut json = None;
        let mut out = String::with_capacity(self.source.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&expr.evaluate(record, &mut json)?),
            }
        }
        Ok(out)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Expr(Expression),
}

#[derive(Debug, PartialEq, Eq)]
enum Function {
    Meta(String),
    Json(Option<String>),
    Content,
}

#[derive(Debug, PartialEq, Eq)]
struct Expression {
    function: Function,
    default: Option<String>,
}

impl Expression {
    fn evaluate(
        &self,
        record: &Record,
        json: &mut Option<Value>,
    ) -> Result<String, TemplateError> {
        let resolved = match &self.function {
            Function::Meta(key) => match record.metadata(key) {
                Some(value) => Ok(value.to_string()),
                None => Err(TemplateError::MissingMetadata(key.clone())),
            },
            Function::Content => Ok(String::from_utf8_lossy(record.payload()).into_owned()),
            Function::Json(path) => {
                if json.is_none() {
                    match record.as_json() {
                        Ok(value) => *json = Some(value),
                        Err(e) => {
                            return self
                                .default
                                .clone()
                                .ok_or(TemplateError::InvalidJson(e));
                        }
                    }
                }
                let document = json.as_ref().unwrap_or(&Value::Null);
                lookup(document, path.as_deref())
                    .map(render_json)
                    .ok_or_else(|| TemplateError::MissingField(path.clone().unwrap_or_default()))
            }
        };

        match (resolved, &self.default) {
            (Ok(value), _) => Ok(value),
            (Err(_), Some(default)) => Ok(default.clone()),
            (Err(e), None) => Err(e),
        }
    }
}

fn lookup<'a>(document: &'a Value, path: Option<&str>) -> Option<&'a Value> {
    let mut current = document;
    if let Some(path) = path.filter(|p| !p.is_empty()) {
        for part in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn render_json(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(EXPR_OPEN) {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let body_start = start + EXPR_OPEN.len();
        let body_len = closing_brace(&rest[body_start..]).ok_or_else(|| TemplateError::Parse {
            template: template.to_string(),
            details: "unterminated expression, expected '}'".to_string(),
        })?;
        let body = rest[body_start..body_start + body_len].trim();
        segments.push(Segment::Expr(parse_expression(template, body)?));
        rest = &rest[body_start + body_len + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

// Offset of the '}' closing an expression, skipping braces inside string literals.
fn closing_brace(body: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in body.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '}' if !in_string => return Some(idx),
            _ => {}
        }
    }
    None
}

fn parse_expression(template: &str, body: &str) -> Result<Expression, TemplateError> {
    let parse_error = |details: String| TemplateError::Parse {
        template: template.to_string(),
        details,
    };

    let caps = EXPRESSION
        .captures(body)
        .ok_or_else(|| parse_error(format!("unsupported expression '{}'", body)))?;

    let arg = caps.name("arg").map(|m| unescape(m.as_str()));
    let default = caps.name("default").map(|m| unescape(m.as_str()));

    let function = match &caps["func"] {
        "meta" => match arg {
            Some(key) if !key.is_empty() => Function::Meta(key),
            _ => return Err(parse_error("meta() requires a key".to_string())),
        },
        "json" => Function::Json(arg),
        _ => {
            if arg.is_some() {
                return Err(parse_error("content() takes no arguments".to_string()));
            }
            Function::Content
        }
    };

    Ok(Expression { function, default })
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}
