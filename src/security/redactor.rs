//! Structured redaction.
//!
//! Redacts every string inside a JSON value, at any depth, using an ordered
//! list of [`RedactionPattern`]s.

use serde_json::Value;

use super::patterns::{RedactionPattern, default_patterns};
use crate::config::PrivacySettings;
use crate::models::EpisodicRecord;
use crate::{Error, Result};

/// Replaces a whole field when a pattern fails to apply.
pub const REDACTION_ERROR_SENTINEL: &str = "[REDACTED - redaction error]";

/// Opening of every marker the redactor writes.
const MARKER_PREFIX: &str = "[REDACTED";

/// Whether `text` carries nothing but redaction markers.
///
/// True for [`REDACTION_ERROR_SENTINEL`] and for values whose only
/// alphanumeric content sits inside `[REDACTED...]` markers.
#[must_use]
pub fn is_redaction_only(text: &str) -> bool {
    let mut rest = text;
    let mut marked = false;
    while let Some(start) = rest.find(MARKER_PREFIX) {
        if rest[..start].chars().any(char::is_alphanumeric) {
            return false;
        }
        let Some(end) = rest[start..].find(']') else {
            return false;
        };
        marked = true;
        rest = &rest[start + end + 1..];
    }
    marked && !rest.chars().any(char::is_alphanumeric)
}

/// Record fields that identify a session and are never redacted.
pub const IDENTITY_FIELDS: [&str; 6] = [
    "session_id",
    "timestamp",
    "project_path",
    "git_branch",
    "trigger",
    "encoding_mode",
];

/// Redacts sensitive content from JSON values.
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<RedactionPattern>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    /// Creates a redactor with the default patterns.
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }

    /// Creates a redactor with no patterns.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Creates a redactor with the defaults plus the configured project patterns.
    #[must_use]
    pub fn from_settings(settings: &PrivacySettings) -> Self {
        let mut redactor = Self::new();
        for source in &settings.custom_patterns {
            let pattern = RedactionPattern::custom(source);
            if pattern.is_broken() {
                tracing::warn!(
                    pattern = %source,
                    "Custom redaction pattern does not compile; matching fields will be fully redacted"
                );
            }
            redactor.patterns.push(pattern);
        }
        redactor
    }

    /// Appends a pattern after the existing ones.
    #[must_use]
    pub fn with_pattern(mut self, pattern: RedactionPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Patterns in application order.
    #[must_use]
    pub fn patterns(&self) -> &[RedactionPattern] {
        &self.patterns
    }

    /// Redacts one string.
    ///
    /// If any pattern fails, the whole string becomes
    /// [`REDACTION_ERROR_SENTINEL`] and counts as one redaction.
    #[must_use]
    pub fn redact_str(&self, text: &str) -> (String, usize) {
        let mut current = text.to_string();
        let mut count = 0;
        for pattern in &self.patterns {
            match pattern.apply(&current) {
                Ok((next, n)) => {
                    if n > 0 {
                        current = next.into_owned();
                        count += n;
                    }
                },
                Err(e) => {
                    tracing::warn!(pattern = pattern.name(), error = %e, "Redaction pattern failed");
                    return (REDACTION_ERROR_SENTINEL.to_string(), count + 1);
                },
            }
        }
        (current, count)
    }

    /// Returns a redacted copy of `value` and the number of substitutions.
    ///
    /// Object values and array items are visited in document order.
    /// Numbers, booleans and null pass through.
    #[must_use]
    pub fn redact(&self, value: &Value) -> (Value, usize) {
        match value {
            Value::String(s) => {
                let (redacted, count) = self.redact_str(s);
                (Value::String(redacted), count)
            },
            Value::Array(items) => {
                let mut total = 0;
                let redacted = items
                    .iter()
                    .map(|item| {
                        let (v, n) = self.redact(item);
                        total += n;
                        v
                    })
                    .collect();
                (Value::Array(redacted), total)
            },
            Value::Object(map) => {
                let mut total = 0;
                let redacted = map
                    .iter()
                    .map(|(k, item)| {
                        let (v, n) = self.redact(item);
                        total += n;
                        (k.clone(), v)
                    })
                    .collect();
                (Value::Object(redacted), total)
            },
            Value::Null | Value::Bool(_) | Value::Number(_) => (value.clone(), 0),
        }
    }

    /// Redacts every non-identity field of a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot round-trip through JSON.
    pub fn redact_record(&self, record: &EpisodicRecord) -> Result<(EpisodicRecord, usize)> {
        let value =
            serde_json::to_value(record).map_err(|e| Error::operation("serialize_record", e))?;
        let Value::Object(fields) = value else {
            return Err(Error::operation("redact_record", "record is not an object"));
        };

        let mut total = 0;
        let redacted: serde_json::Map<String, Value> = fields
            .into_iter()
            .map(|(key, field)| {
                if IDENTITY_FIELDS.contains(&key.as_str()) {
                    (key, field)
                } else {
                    let (v, n) = self.redact(&field);
                    total += n;
                    (key, v)
                }
            })
            .collect();

        let record = serde_json::from_value(Value::Object(redacted))
            .map_err(|e| Error::operation("deserialize_record", e))?;
        Ok((record, total))
    }
}
