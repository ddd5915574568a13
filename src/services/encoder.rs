//! Episodic encoding.
//!
//! Produces one record per invocation:
//!
//! ```text
//! context ──ok──► redact ──► persist
//!    │ fail          ▲
//!    ▼               │
//! transcript ──ok────┤
//!    │ fail          │
//!    ▼               │
//! minimal ───────────┘
//! ```
//!
//! Everything runs under one [`Deadline`]. When it expires, whatever has
//! been gathered is persisted as a `partial_timeout` record. Source failures
//! never surface as errors; only a failure to persist the record does.

use chrono::{SubsecRound, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::index::IndexService;
use super::transcript::{
    MAX_TRANSCRIPT_LINES, TranscriptDigest, locate_transcript, parse_transcript,
};
use super::Deadline;
use crate::config::PmsConfig;
use crate::models::{EncodingMode, EpisodicRecord, MonthlyAggregate, TranscriptSummary, Trigger};
use crate::security::{REDACTION_ERROR_SENTINEL, Redactor};
use crate::storage::{DocumentStore, MemoryLayout, move_to_backup};
use crate::{Error, Result};

/// Task summary of a record with no usable source.
pub const MINIMAL_SUMMARY: &str = "[MINIMAL] No session context or transcript available";

/// Transcripts with fewer valid records than this get a limitation note.
const LIMITED_DATA_THRESHOLD: usize = 10;

/// Conversation context supplied by the caller.
///
/// Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConversationContext {
    /// One-line summary of the task.
    pub task_summary: String,
    /// Longer description of the work.
    pub work_summary: String,
    /// Design decisions taken.
    pub design_decisions: Vec<String>,
    /// Problems encountered.
    pub challenges: Vec<String>,
    /// How they were solved.
    pub solutions: Vec<String>,
    /// User preferences observed.
    pub user_preferences: Vec<String>,
    /// Code patterns applied.
    pub code_patterns: Vec<String>,
    /// Mistakes to avoid.
    pub anti_patterns: Vec<String>,
    /// Technologies involved.
    pub technologies: Vec<String>,
    /// Files touched.
    pub files_modified: Vec<String>,
    /// Tools used.
    pub tools_used: Vec<String>,
}

impl ConversationContext {
    fn is_empty(&self) -> bool {
        self.task_summary.trim().is_empty()
            && self.work_summary.trim().is_empty()
            && [
                &self.design_decisions,
                &self.challenges,
                &self.solutions,
                &self.user_preferences,
                &self.code_patterns,
                &self.anti_patterns,
                &self.technologies,
                &self.files_modified,
                &self.tools_used,
            ]
            .iter()
            .all(|list| list.is_empty())
    }
}

/// One encoding invocation.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// What caused the capture.
    pub trigger: Trigger,
    /// Session id; a UUID v4 is generated when absent.
    pub session_id: Option<String>,
    /// Caller-supplied conversation context (JSON object).
    pub context: Option<Value>,
    /// Explicit transcript path, skipping discovery.
    pub transcript_path: Option<PathBuf>,
    /// Overrides the configured encoding budget.
    pub timeout: Option<Duration>,
}

impl EncodeRequest {
    /// Creates a request for a trigger.
    #[must_use]
    pub const fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            session_id: None,
            context: None,
            transcript_path: None,
            timeout: None,
        }
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the conversation context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the transcript path.
    #[must_use]
    pub fn with_transcript(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript_path = Some(path.into());
        self
    }

    /// Overrides the encoding budget.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Summary of a persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeReport {
    /// Session id of the record.
    pub session_id: String,
    /// Aggregate filename the record was appended to.
    pub aggregate: String,
    /// Strategy that produced the record.
    pub encoding_mode: EncodingMode,
    /// Number of redactions applied.
    pub redactions: usize,
    /// Transcript lines skipped as malformed.
    pub skipped_lines: usize,
    /// Whether the session index was updated.
    pub index_updated: bool,
    /// Limitation notes stored on the record.
    pub limitations: Vec<String>,
}

impl EncodeReport {
    /// Whether the record is partial or minimal.
    #[must_use]
    pub const fn degraded(&self) -> bool {
        self.encoding_mode.is_degraded()
    }
}

/// Terminal outcome of an encoding invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// A record was persisted.
    Encoded(EncodeReport),
    /// The trigger is disabled; nothing was done.
    Skipped {
        /// The disabled trigger.
        trigger: Trigger,
    },
    /// The session already has a record. Records are immutable, so nothing
    /// was written.
    AlreadyRecorded {
        /// The session id.
        session_id: String,
        /// Aggregate holding the existing record.
        aggregate: String,
    },
}

/// A record assembled from one source, before redaction.
struct Draft {
    record: EpisodicRecord,
    skipped_lines: usize,
}

/// Encodes sessions into the episodic tier of one project.
#[derive(Debug)]
pub struct Encoder<'a> {
    config: &'a PmsConfig,
    layout: MemoryLayout,
    store: DocumentStore,
    redactor: Redactor,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder for a project.
    #[must_use]
    pub fn new(config: &'a PmsConfig, project_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            layout: MemoryLayout::new(project_path),
            store: DocumentStore::new(),
            redactor: Redactor::from_settings(&config.privacy),
        }
    }

    /// The memory layout in use.
    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Encodes one session.
    ///
    /// # Errors
    ///
    /// Returns an error only if the record cannot be appended to its
    /// monthly aggregate.
    #[tracing::instrument(
        skip(self, request),
        fields(trigger = %request.trigger, project = %self.layout.project_path().display())
    )]
    pub fn encode(&self, request: EncodeRequest) -> Result<EncodeOutcome> {
        if !self.config.triggers.is_enabled(request.trigger) {
            tracing::info!("Trigger disabled, skipping capture");
            return Ok(EncodeOutcome::Skipped {
                trigger: request.trigger,
            });
        }

        let budget = request.timeout.unwrap_or(self.config.timeouts.encode);
        let deadline = Deadline::start("encode", budget);
        let session_id = request
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(aggregate) = self.recorded_in(&session_id) {
            return Ok(self.already_recorded(session_id, aggregate));
        }

        let draft = self.build(&request, &session_id, &deadline);
        let Draft {
            record,
            skipped_lines,
        } = draft;

        let (record, redactions) = self.redact(record);
        let (aggregate, index_updated) = match self.persist(&record)? {
            Persisted::Stored {
                aggregate,
                index_updated,
            } => (aggregate, index_updated),
            Persisted::Existing { aggregate } => {
                return Ok(self.already_recorded(record.session_id, aggregate));
            },
        };

        metrics::counter!("pms_sessions_encoded_total", "mode" => record.encoding_mode.as_str())
            .increment(1);
        tracing::info!(
            session_id = %record.session_id,
            mode = %record.encoding_mode,
            aggregate = %aggregate,
            redactions,
            skipped_lines,
            index_updated,
            elapsed_ms = u64::try_from(deadline.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Encoded session"
        );

        Ok(EncodeOutcome::Encoded(EncodeReport {
            session_id: record.session_id,
            aggregate,
            encoding_mode: record.encoding_mode,
            redactions,
            skipped_lines,
            index_updated,
            limitations: record.limitations,
        }))
    }

    /// Runs the strategies in order and applies the deadline.
    fn build(&self, request: &EncodeRequest, session_id: &str, deadline: &Deadline) -> Draft {
        let project = self.layout.project_path();
        let mut shell = EpisodicRecord::new(
            session_id,
            Utc::now().trunc_subsecs(0),
            project.to_string_lossy(),
            request.trigger,
            EncodingMode::Context,
        );
        shell.git_branch = crate::git::current_branch(project);

        if deadline.expired() {
            return timed_out(shell, 0, deadline);
        }

        let mut failures = Vec::new();

        if self.config.encoding.prefer_context {
            match from_context(request.context.as_ref(), &shell) {
                Ok(record) => {
                    tracing::debug!("Encoded from conversation context");
                    return finish(record, 0, deadline);
                },
                Err(reason) => {
                    tracing::warn!(reason = %reason, "Context encoding failed");
                    failures.push(format!("Context encoding failed: {reason}"));
                },
            }
        }

        if deadline.expired() {
            return timed_out(shell, 0, deadline);
        }

        if self.config.encoding.fallback_jsonl {
            match self.from_transcript(request, session_id, &shell, deadline) {
                Ok(draft) => {
                    tracing::debug!("Encoded from transcript");
                    return finish(draft.record, draft.skipped_lines, deadline);
                },
                Err(reason) => {
                    tracing::warn!(reason = %reason, "Transcript encoding failed");
                    failures.push(format!("JSONL encoding failed: {reason}"));
                },
            }
        }

        if deadline.expired() {
            return timed_out(shell, 0, deadline);
        }

        if failures.is_empty() {
            failures.push("No encoding strategy enabled".to_string());
        }
        let mut record = shell;
        record.encoding_mode = EncodingMode::Minimal;
        record.task_summary = MINIMAL_SUMMARY.to_string();
        record.limitations = failures;
        Draft {
            record,
            skipped_lines: 0,
        }
    }

    fn from_transcript(
        &self,
        request: &EncodeRequest,
        session_id: &str,
        shell: &EpisodicRecord,
        deadline: &Deadline,
    ) -> std::result::Result<Draft, String> {
        let path = match &request.transcript_path {
            Some(path) => path.clone(),
            None => {
                let dir = self
                    .config
                    .encoding
                    .transcripts_dir
                    .as_deref()
                    .ok_or("no transcript directory configured")?;
                locate_transcript(dir, self.layout.project_path(), session_id)
                    .ok_or_else(|| format!("no transcript found under {}", dir.display()))?
            },
        };

        let parsed = parse_transcript(&path, deadline).map_err(|e| e.to_string())?;
        if parsed.records.is_empty() {
            return Err(format!(
                "{} has no valid records ({} malformed)",
                path.display(),
                parsed.malformed_lines
            ));
        }

        let digest = TranscriptDigest::from_records(&parsed.records);
        let valid = parsed.records.len();

        let mut record = shell.clone();
        record.encoding_mode = EncodingMode::JsonlFallback;
        record.task_summary = digest
            .first_user_message
            .unwrap_or_else(|| format!("Session with {valid} transcript records"));
        record.work_summary = if digest.tools_used.is_empty() {
            "Used tools: none detected".to_string()
        } else {
            format!("Used tools: {}", digest.tools_used.join(", "))
        };
        record.challenges = digest.errors;
        record.context.files_modified = digest.files;
        record.context.tools_used = digest.tools_used;
        record.context.tool_counts = digest.tool_counts;
        record.transcript = Some(TranscriptSummary {
            path: path.to_string_lossy().into_owned(),
            record_count: valid,
            malformed_lines: parsed.malformed_lines,
        });

        if parsed.malformed_lines > 0 {
            record.limitations.push(format!(
                "Skipped {} malformed JSONL lines",
                parsed.malformed_lines
            ));
        }
        if parsed.truncated {
            record.limitations.push(format!(
                "Transcript truncated after {MAX_TRANSCRIPT_LINES} lines"
            ));
        }
        if valid < LIMITED_DATA_THRESHOLD {
            record
                .limitations
                .push(format!("Limited data: only {valid} valid records"));
        }

        Ok(Draft {
            record,
            skipped_lines: parsed.malformed_lines,
        })
    }

    fn redact(&self, record: EpisodicRecord) -> (EpisodicRecord, usize) {
        if !self.config.privacy.redact_sensitive {
            return (record, 0);
        }
        let (record, count) = match self.redactor.redact_record(&record) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Redaction failed, over-redacting record");
                scrub(record)
            },
        };
        if count > 0 {
            metrics::counter!("pms_redactions_total").increment(count as u64);
        }
        (record, count)
    }

    /// Aggregate already holding a session, according to a verified index
    /// entry.
    fn recorded_in(&self, session_id: &str) -> Option<String> {
        match IndexService::new(self.layout.clone(), self.store.clone()).lookup(session_id) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "Session index unreadable; duplicate check limited to the current aggregate");
                None
            },
        }
    }

    fn already_recorded(&self, session_id: String, aggregate: String) -> EncodeOutcome {
        tracing::info!(
            session_id = %session_id,
            aggregate = %aggregate,
            "Session already recorded, nothing captured"
        );
        EncodeOutcome::AlreadyRecorded {
            session_id,
            aggregate,
        }
    }

    /// Appends the record to its monthly aggregate unless the session is
    /// already there, then updates the index.
    fn persist(&self, record: &EpisodicRecord) -> Result<Persisted> {
        let aggregate = record.aggregate_filename();
        let path = self.layout.aggregate_path_for(&aggregate);

        let appended = match self.append(&path, record) {
            Err(Error::CorruptDocument { reason, .. }) => {
                tracing::warn!(aggregate = %aggregate, reason = %reason, "Current aggregate is corrupt, moving it aside");
                move_to_backup(&self.layout, &path, Utc::now())?;
                self.append(&path, record)?
            },
            other => other?,
        };
        if !appended {
            return Ok(Persisted::Existing { aggregate });
        }

        let index_updated = match IndexService::new(self.layout.clone(), self.store.clone())
            .record(&record.session_id, &aggregate)
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Session index update failed; index is stale until rebuilt");
                false
            },
        };

        Ok(Persisted::Stored {
            aggregate,
            index_updated,
        })
    }

    /// Appends under the aggregate's lock. Returns `false` if the session
    /// was already present.
    fn append(&self, path: &Path, record: &EpisodicRecord) -> Result<bool> {
        self.layout.ensure_dirs()?;
        self.store
            .update::<MonthlyAggregate, _>(path, |aggregate| Ok(aggregate.append_new(record.clone())))
    }
}

/// Result of [`Encoder::persist`].
enum Persisted {
    /// The record was appended.
    Stored { aggregate: String, index_updated: bool },
    /// The aggregate already held the session.
    Existing { aggregate: String },
}

/// Builds a record from caller-supplied context.
fn from_context(
    context: Option<&Value>,
    shell: &EpisodicRecord,
) -> std::result::Result<EpisodicRecord, String> {
    let value = context.ok_or("no conversation context supplied")?;
    if !value.is_object() {
        return Err("context is not a JSON object".to_string());
    }
    let context: ConversationContext =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    if context.is_empty() {
        return Err("context is empty".to_string());
    }

    let mut record = shell.clone();
    record.encoding_mode = EncodingMode::Context;
    record.task_summary = context.task_summary.trim().to_string();
    record.work_summary = context.work_summary;
    record.design_decisions = context.design_decisions;
    record.challenges = context.challenges;
    record.solutions = context.solutions;
    record.user_preferences = context.user_preferences;
    record.code_patterns = context.code_patterns;
    record.anti_patterns = context.anti_patterns;
    record.context.technologies = context.technologies;
    record.context.files_modified = context.files_modified;
    record.context.tools_used = context.tools_used;

    if record.task_summary.is_empty() {
        record.limitations.push("Context incomplete - best-effort record created".to_string());
        record.limitations.push("Some session details may be missing".to_string());
    }
    Ok(record)
}

/// Marks a finished draft as partial if the deadline expired while building it.
fn finish(record: EpisodicRecord, skipped_lines: usize, deadline: &Deadline) -> Draft {
    if deadline.expired() {
        timed_out(record, skipped_lines, deadline)
    } else {
        Draft {
            record,
            skipped_lines,
        }
    }
}

fn timed_out(mut record: EpisodicRecord, skipped_lines: usize, deadline: &Deadline) -> Draft {
    let secs = deadline.budget().as_secs();
    tracing::warn!(budget_secs = secs, "Encoding deadline exceeded, keeping partial record");
    record.encoding_mode = EncodingMode::PartialTimeout;
    if record.task_summary.is_empty() {
        record.task_summary = format!("[TIMEOUT] Encoding exceeded {secs}s");
    }
    record.limitations.push(format!("Encoding timeout at {secs}s"));
    record.limitations.push("Partial record only".to_string());
    Draft {
        record,
        skipped_lines,
    }
}

/// Replaces every free-text field with the redaction sentinel.
fn scrub(mut record: EpisodicRecord) -> (EpisodicRecord, usize) {
    let sentinel = || REDACTION_ERROR_SENTINEL.to_string();
    let mut count = 0;
    for text in [&mut record.task_summary, &mut record.work_summary] {
        if !text.is_empty() {
            *text = sentinel();
            count += 1;
        }
    }
    for list in [
        &mut record.design_decisions,
        &mut record.challenges,
        &mut record.solutions,
        &mut record.user_preferences,
        &mut record.code_patterns,
        &mut record.anti_patterns,
        &mut record.context.technologies,
        &mut record.context.files_modified,
        &mut record.limitations,
    ] {
        for item in list.iter_mut() {
            *item = sentinel();
            count += 1;
        }
    }
    if let Some(transcript) = record.transcript.as_mut() {
        transcript.path = sentinel();
        count += 1;
    }
    (record, count)
}
