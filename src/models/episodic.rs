//! Episodic tier documents.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Event that caused a session to be captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Trigger {
    /// The host agent is about to compact its context window.
    #[serde(rename = "precompact")]
    PreCompact,
    /// The session ended.
    #[serde(rename = "session-end")]
    SessionEnd,
    /// The agent stopped responding to a turn.
    #[serde(rename = "stop")]
    Stop,
    /// Explicit user request.
    #[default]
    #[serde(rename = "manual")]
    Manual,
}

impl Trigger {
    /// Returns the wire label of the trigger.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreCompact => "precompact",
            Self::SessionEnd => "session-end",
            Self::Stop => "stop",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "precompact" | "pre-compact" => Ok(Self::PreCompact),
            "session-end" | "sessionend" | "session_end" => Ok(Self::SessionEnd),
            "stop" => Ok(Self::Stop),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!("unknown trigger: {other}"))),
        }
    }
}

/// How an episodic record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingMode {
    /// Built directly from caller-supplied conversation context.
    #[default]
    Context,
    /// Reconstructed from the JSONL session transcript.
    JsonlFallback,
    /// Persisted early because the encoding deadline elapsed.
    PartialTimeout,
    /// Neither context nor transcript was usable.
    Minimal,
}

impl EncodingMode {
    /// Returns the wire label of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::JsonlFallback => "jsonl_fallback",
            Self::PartialTimeout => "partial_timeout",
            Self::Minimal => "minimal",
        }
    }

    /// Whether the record was captured in a degraded mode.
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::PartialTimeout | Self::Minimal)
    }
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Technical context of a session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Technologies involved.
    #[serde(default)]
    pub technologies: Vec<String>,
    /// Files touched during the session.
    #[serde(default)]
    pub files_modified: Vec<String>,
    /// Tools invoked, in first-use order.
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Invocation count per tool (transcript encoding only).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_counts: BTreeMap<String, u32>,
}

/// Provenance of a transcript-encoded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSummary {
    /// Transcript file that was parsed.
    pub path: String,
    /// Number of valid JSON lines used.
    pub record_count: usize,
    /// Number of lines skipped as malformed.
    pub malformed_lines: usize,
}

/// One captured session.
///
/// Identity fields (`session_id`, `timestamp`, `project_path`, `git_branch`,
/// `trigger`, `encoding_mode`) are never redacted; everything else is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    /// Unique session identifier.
    pub session_id: String,
    /// Capture instant (UTC, second precision).
    pub timestamp: DateTime<Utc>,
    /// Project the session belongs to.
    #[serde(default)]
    pub project_path: String,
    /// Git branch checked out at capture time.
    #[serde(default)]
    pub git_branch: Option<String>,
    /// What caused the capture.
    #[serde(default)]
    pub trigger: Trigger,
    /// Strategy that produced the record.
    #[serde(default)]
    pub encoding_mode: EncodingMode,
    /// One-line summary of the task.
    #[serde(default)]
    pub task_summary: String,
    /// Longer description of the work performed.
    #[serde(default)]
    pub work_summary: String,
    /// Design decisions taken.
    #[serde(default)]
    pub design_decisions: Vec<String>,
    /// Problems encountered.
    #[serde(default)]
    pub challenges: Vec<String>,
    /// How the problems were solved.
    #[serde(default)]
    pub solutions: Vec<String>,
    /// Stated or observed user preferences.
    #[serde(default)]
    pub user_preferences: Vec<String>,
    /// Code patterns applied.
    #[serde(default)]
    pub code_patterns: Vec<String>,
    /// Mistakes to avoid.
    #[serde(default)]
    pub anti_patterns: Vec<String>,
    /// Technical context.
    #[serde(default)]
    pub context: SessionContext,
    /// Transcript provenance (transcript encoding only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<TranscriptSummary>,
    /// Degraded-capture notes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub limitations: Vec<String>,
}

impl EpisodicRecord {
    /// Creates an empty record shell.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        project_path: impl Into<String>,
        trigger: Trigger,
        encoding_mode: EncodingMode,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp,
            project_path: project_path.into(),
            git_branch: None,
            trigger,
            encoding_mode,
            task_summary: String::new(),
            work_summary: String::new(),
            design_decisions: Vec::new(),
            challenges: Vec::new(),
            solutions: Vec::new(),
            user_preferences: Vec::new(),
            code_patterns: Vec::new(),
            anti_patterns: Vec::new(),
            context: SessionContext::default(),
            transcript: None,
            limitations: Vec::new(),
        }
    }

    /// Name of the monthly aggregate this record belongs to.
    #[must_use]
    pub fn aggregate_filename(&self) -> String {
        monthly_filename(self.timestamp)
    }
}

/// Returns `sessions-YYYY-MM.json` for a timestamp.
#[must_use]
pub fn monthly_filename(timestamp: DateTime<Utc>) -> String {
    format!(
        "sessions-{:04}-{:02}.json",
        timestamp.year(),
        timestamp.month()
    )
}

/// Whether a filename looks like a monthly aggregate.
#[must_use]
pub fn is_monthly_filename(name: &str) -> bool {
    let Some(stem) = name
        .strip_prefix("sessions-")
        .and_then(|rest| rest.strip_suffix(".json"))
    else {
        return false;
    };
    let bytes = stem.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || b.is_ascii_digit())
}

/// All sessions captured in one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    /// Records in capture order.
    pub sessions: Vec<EpisodicRecord>,
    /// Number of records.
    #[serde(default)]
    pub count: usize,
    /// Timestamp of the newest record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl MonthlyAggregate {
    /// Appends a record and refreshes the metadata.
    pub fn append(&mut self, record: EpisodicRecord) {
        self.last_updated = Some(record.timestamp);
        self.sessions.push(record);
        self.count = self.sessions.len();
    }

    /// Appends a record unless its session is already present. Returns
    /// whether it was appended.
    pub fn append_new(&mut self, record: EpisodicRecord) -> bool {
        if self.contains(&record.session_id) {
            return false;
        }
        self.append(record);
        true
    }

    /// Whether a session is present.
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.iter().any(|s| s.session_id == session_id)
    }
}

/// Maps `session_id` to the aggregate filename holding it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIndex {
    entries: BTreeMap<String, String>,
}

impl SessionIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records where a session lives.
    pub fn insert(&mut self, session_id: impl Into<String>, aggregate: impl Into<String>) {
        self.entries.insert(session_id.into(), aggregate.into());
    }

    /// Looks up the aggregate for a session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<&str> {
        self.entries.get(session_id).map(String::as_str)
    }

    /// Number of indexed sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(session_id, aggregate)` pairs in session-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_trigger_wire_labels() {
        let json = serde_json::to_string(&Trigger::SessionEnd).unwrap();
        assert_eq!(json, "\"session-end\"");
        let parsed: Trigger = serde_json::from_str("\"precompact\"").unwrap();
        assert_eq!(parsed, Trigger::PreCompact);
        assert_eq!("pre-compact".parse::<Trigger>().unwrap(), Trigger::PreCompact);
        assert!("bogus".parse::<Trigger>().is_err());
    }

    #[test]
    fn test_encoding_mode_labels() {
        let json = serde_json::to_string(&EncodingMode::PartialTimeout).unwrap();
        assert_eq!(json, "\"partial_timeout\"");
        assert!(EncodingMode::Minimal.is_degraded());
        assert!(!EncodingMode::JsonlFallback.is_degraded());
    }

    #[test]
    fn test_monthly_filename() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(monthly_filename(ts), "sessions-2025-03.json");
        assert!(is_monthly_filename("sessions-2025-03.json"));
        assert!(!is_monthly_filename("sessions-2025-3.json"));
        assert!(!is_monthly_filename("index.json"));
        assert!(!is_monthly_filename(".sessions-2025-03.json.lock"));
    }

    #[test]
    fn test_aggregate_append_keeps_count() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let mut aggregate = MonthlyAggregate::default();
        aggregate.append(EpisodicRecord::new("a", ts, "/p", Trigger::Stop, EncodingMode::Context));
        aggregate.append(EpisodicRecord::new("b", ts, "/p", Trigger::Stop, EncodingMode::Context));

        assert_eq!(aggregate.count, 2);
        assert_eq!(aggregate.last_updated, Some(ts));
        assert!(aggregate.contains("b"));
        assert!(!aggregate.contains("c"));
    }

    #[test]
    fn test_aggregate_append_new_keeps_first_record() {
        let early = Utc.with_ymd_and_hms(2025, 1, 2, 3, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 1, 2, 4, 0, 0).unwrap();
        let mut aggregate = MonthlyAggregate::default();

        assert!(aggregate.append_new(EpisodicRecord::new("a", early, "/p", Trigger::PreCompact, EncodingMode::Context)));
        assert!(!aggregate.append_new(EpisodicRecord::new("a", late, "/p", Trigger::SessionEnd, EncodingMode::Context)));

        assert_eq!(aggregate.count, 1);
        assert_eq!(aggregate.sessions[0].trigger, Trigger::PreCompact);
        assert_eq!(aggregate.last_updated, Some(early));
    }

    #[test]
    fn test_record_defaults_on_sparse_input() {
        let json = r#"{"session_id": "s1", "timestamp": "2025-12-31T01:23:45Z"}"#;
        let record: EpisodicRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.trigger, Trigger::Manual);
        assert!(record.user_preferences.is_empty());
        assert_eq!(record.aggregate_filename(), "sessions-2025-12.json");
    }

    #[test]
    fn test_session_index_is_flat_map() {
        let mut index = SessionIndex::new();
        index.insert("s1", "sessions-2025-01.json");
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json, serde_json::json!({"s1": "sessions-2025-01.json"}));
        assert_eq!(index.get("s1"), Some("sessions-2025-01.json"));
    }
}
