//! Structural schema checks for persisted documents.
//!
//! Checks run on the raw [`serde_json::Value`] so that every violation in a
//! document is reported, not just the first one the typed deserializer hits.

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::models::is_monthly_filename;

/// Kind of persisted JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// `episodic/sessions-YYYY-MM.json`.
    MonthlyAggregate,
    /// `episodic/index.json`.
    SessionIndex,
    /// `semantic/patterns.json`.
    PatternFile,
    /// `semantic/<category>.json`.
    CategoryPatternFile,
    /// `procedural/rules-metadata.json`.
    RuleMetadata,
}

impl DocumentKind {
    /// Returns a human-readable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MonthlyAggregate => "monthly aggregate",
            Self::SessionIndex => "session index",
            Self::PatternFile => "pattern file",
            Self::CategoryPatternFile => "category pattern file",
            Self::RuleMetadata => "rule metadata",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationSeverity {
    /// Noted, but the document is still usable.
    Warning,
    /// The document is invalid.
    Error,
}

impl fmt::Display for ValidationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A validation issue found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// JSON location of the issue (`sessions[3].session_id`).
    pub location: String,
    /// Description of the issue.
    pub message: String,
    /// Severity of the issue.
    pub severity: ValidationSeverity,
}

impl ValidationIssue {
    /// Creates a warning issue.
    #[must_use]
    pub fn warning(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }

    /// Creates an error issue.
    #[must_use]
    pub fn error(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Whether this issue invalidates the document.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.severity, ValidationSeverity::Error)
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{}: {}: {}", self.severity, self.location, self.message)
        }
    }
}

/// Checks a parsed document against the schema of its kind.
#[must_use]
pub fn check(kind: DocumentKind, value: &Value) -> Vec<ValidationIssue> {
    let Some(object) = value.as_object() else {
        return vec![ValidationIssue::error("", "top-level value must be an object")];
    };

    let mut issues = Vec::new();
    match kind {
        DocumentKind::MonthlyAggregate => check_aggregate(object, &mut issues),
        DocumentKind::SessionIndex => check_index(object, &mut issues),
        DocumentKind::PatternFile => check_patterns(object, &mut issues),
        DocumentKind::CategoryPatternFile => {
            require(object, "", "category", JsonType::String, &mut issues);
            check_patterns(object, &mut issues);
            check_category_consistency(object, &mut issues);
        },
        DocumentKind::RuleMetadata => check_rule_metadata(object, &mut issues),
    }
    issues
}

type Object = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy)]
enum JsonType {
    String,
    Number,
    Array,
}

impl JsonType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_u64(),
            Self::Array => value.is_array(),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a non-negative integer",
            Self::Array => "an array",
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Records an error if `key` is absent or has the wrong type.
fn require<'a>(
    object: &'a Object,
    prefix: &str,
    key: &str,
    expected: JsonType,
    issues: &mut Vec<ValidationIssue>,
) -> Option<&'a Value> {
    match object.get(key) {
        None => {
            issues.push(ValidationIssue::error(
                join(prefix, key),
                "required key is missing",
            ));
            None
        },
        Some(value) if !expected.matches(value) => {
            issues.push(ValidationIssue::error(
                join(prefix, key),
                format!("must be {}", expected.name()),
            ));
            None
        },
        Some(value) => Some(value),
    }
}

fn recommend(object: &Object, prefix: &str, key: &str, issues: &mut Vec<ValidationIssue>) {
    if !object.contains_key(key) {
        issues.push(ValidationIssue::warning(
            join(prefix, key),
            "recommended key is missing",
        ));
    }
}

fn check_count(object: &Object, items: usize, issues: &mut Vec<ValidationIssue>) {
    if let Some(count) = object.get("count").and_then(Value::as_u64) {
        if usize::try_from(count).ok() != Some(items) {
            issues.push(ValidationIssue::warning(
                "count",
                format!("count is {count} but {items} item(s) are present"),
            ));
        }
    }
}

fn check_items(
    object: &Object,
    key: &str,
    issues: &mut Vec<ValidationIssue>,
    mut each: impl FnMut(&Object, &str, &mut Vec<ValidationIssue>),
) -> Option<usize> {
    let items = require(object, "", key, JsonType::Array, issues)?.as_array()?;
    for (i, item) in items.iter().enumerate() {
        let location = format!("{key}[{i}]");
        match item.as_object() {
            Some(item) => each(item, &location, issues),
            None => issues.push(ValidationIssue::error(location, "item must be an object")),
        }
    }
    Some(items.len())
}

fn check_aggregate(object: &Object, issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    let len = check_items(object, "sessions", issues, |session, at, issues| {
        if let Some(id) = require(session, at, "session_id", JsonType::String, issues).and_then(Value::as_str) {
            if !seen.insert(id.to_string()) {
                issues.push(ValidationIssue::warning(
                    join(at, "session_id"),
                    format!("session {id} is recorded more than once"),
                ));
            }
        }
        if let Some(ts) = require(session, at, "timestamp", JsonType::String, issues) {
            let ts = ts.as_str().unwrap_or_default();
            if chrono::DateTime::parse_from_rfc3339(ts).is_err() {
                issues.push(ValidationIssue::error(
                    join(at, "timestamp"),
                    format!("not an RFC 3339 timestamp: {ts}"),
                ));
            }
        }
        recommend(session, at, "project_path", issues);
        recommend(session, at, "task_summary", issues);
    });
    if let Some(len) = len {
        check_count(object, len, issues);
    }
}

fn check_index(object: &Object, issues: &mut Vec<ValidationIssue>) {
    for (session_id, target) in object {
        match target.as_str() {
            None => issues.push(ValidationIssue::error(
                session_id.clone(),
                "index entry must be an aggregate filename",
            )),
            Some(name) if !is_monthly_filename(name) => issues.push(ValidationIssue::warning(
                session_id.clone(),
                format!("unexpected aggregate filename: {name}"),
            )),
            Some(_) => {},
        }
    }
}

fn check_patterns(object: &Object, issues: &mut Vec<ValidationIssue>) {
    let len = check_items(object, "patterns", issues, |pattern, at, issues| {
        require(pattern, at, "pattern_id", JsonType::String, issues);
        require(pattern, at, "description", JsonType::String, issues);
        require(pattern, at, "category", JsonType::String, issues);
        require(pattern, at, "strength", JsonType::String, issues);
        let occurrences = require(pattern, at, "occurrences", JsonType::Number, issues)
            .and_then(Value::as_u64);
        let evidence = require(pattern, at, "evidence", JsonType::Array, issues)
            .and_then(Value::as_array)
            .map(Vec::len);
        if let (Some(n), Some(e)) = (occurrences, evidence) {
            if usize::try_from(n).ok() != Some(e) {
                issues.push(ValidationIssue::warning(
                    join(at, "occurrences"),
                    format!("occurrences is {n} but evidence lists {e} session(s)"),
                ));
            }
        }
    });
    require(object, "", "last_updated", JsonType::String, issues);
    if let Some(len) = len {
        check_count(object, len, issues);
    }
}

fn check_category_consistency(object: &Object, issues: &mut Vec<ValidationIssue>) {
    let Some(category) = object.get("category").and_then(Value::as_str) else {
        return;
    };
    let Some(patterns) = object.get("patterns").and_then(Value::as_array) else {
        return;
    };
    for (i, pattern) in patterns.iter().enumerate() {
        if let Some(other) = pattern.get("category").and_then(Value::as_str) {
            if other != category {
                issues.push(ValidationIssue::error(
                    format!("patterns[{i}].category"),
                    format!("pattern category {other} does not match file category {category}"),
                ));
            }
        }
    }
}

fn check_rule_metadata(object: &Object, issues: &mut Vec<ValidationIssue>) {
    check_items(object, "rules", issues, |rule, at, issues| {
        require(rule, at, "filename", JsonType::String, issues);
        require(rule, at, "category", JsonType::String, issues);
        require(rule, at, "pattern_count", JsonType::Number, issues);
        require(rule, at, "generated_at", JsonType::String, issues);
        require(rule, at, "source_patterns", JsonType::Array, issues);
    });
    if let Some(value) = object.get("last_synthesis") {
        if !value.is_null() && !value.is_string() {
            issues.push(ValidationIssue::error(
                "last_synthesis",
                "must be a timestamp string or null",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors(issues: &[ValidationIssue]) -> Vec<&str> {
        issues
            .iter()
            .filter(|i| i.is_error())
            .map(|i| i.location.as_str())
            .collect()
    }

    #[test]
    fn test_aggregate_reports_every_violation() {
        let doc = json!({
            "sessions": [
                {"session_id": "a", "timestamp": "2025-01-01T00:00:00Z", "project_path": "/p", "task_summary": "t"},
                {"timestamp": "yesterday"},
                "not an object"
            ],
            "count": 3
        });
        let issues = check(DocumentKind::MonthlyAggregate, &doc);

        assert_eq!(
            errors(&issues),
            vec!["sessions[1].session_id", "sessions[1].timestamp", "sessions[2]"]
        );
        assert!(issues.iter().any(|i| !i.is_error() && i.location == "sessions[1].project_path"));
    }

    #[test]
    fn test_aggregate_count_mismatch_is_warning() {
        let doc = json!({"sessions": [], "count": 4});
        let issues = check(DocumentKind::MonthlyAggregate, &doc);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ValidationSeverity::Warning);
    }

    #[test]
    fn test_repeated_session_id_is_warning() {
        let session = |id: &str| {
            json!({"session_id": id, "timestamp": "2025-06-01T00:00:00Z", "project_path": "/p", "task_summary": "t"})
        };
        let doc = json!({"sessions": [session("a"), session("b"), session("a")], "count": 3});

        let issues = check(DocumentKind::MonthlyAggregate, &doc);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, ValidationSeverity::Warning);
        assert_eq!(issues[0].location, "sessions[2].session_id");
    }

    #[test]
    fn test_missing_sessions_is_error() {
        let issues = check(DocumentKind::MonthlyAggregate, &json!({"count": 0}));
        assert_eq!(errors(&issues), vec!["sessions"]);
        let issues = check(DocumentKind::MonthlyAggregate, &json!([]));
        assert!(issues[0].is_error());
    }

    #[test]
    fn test_index_values_must_be_strings() {
        let doc = json!({"a": "sessions-2025-01.json", "b": 3, "c": "other.json"});
        let issues = check(DocumentKind::SessionIndex, &doc);
        assert_eq!(errors(&issues), vec!["b"]);
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_category_file_rejects_foreign_pattern() {
        let doc = json!({
            "category": "preference",
            "patterns": [{
                "pattern_id": "code_1", "description": "x", "category": "code_pattern",
                "strength": "strong", "occurrences": 1, "evidence": ["s1"]
            }],
            "count": 1,
            "last_updated": "2025-01-01T00:00:00Z"
        });
        let issues = check(DocumentKind::CategoryPatternFile, &doc);
        assert_eq!(errors(&issues), vec!["patterns[0].category"]);
    }

    #[test]
    fn test_rule_metadata_items() {
        let doc = json!({"rules": [{"filename": "a.md"}], "last_synthesis": 5});
        let locations = errors(&check(DocumentKind::RuleMetadata, &doc))
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        assert!(locations.contains(&"rules[0].category".to_string()));
        assert!(locations.contains(&"last_synthesis".to_string()));
    }
}
