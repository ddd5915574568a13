//! Semantic extraction.
//!
//! Turns the episodic tier into recurring patterns. The semantic tier is a
//! derived view: every run recomputes it from the aggregates and replaces
//! all four output files together, or none of them.

use chrono::{DateTime, SubsecRound, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use super::Deadline;
use super::index::file_name;
use crate::config::{PmsConfig, Thresholds};
use crate::models::{
    CategoryPatternFile, EpisodicRecord, MonthlyAggregate, PatternCategory, PatternFile,
    SemanticPattern, Strength,
};
use crate::security::is_redaction_only;
use crate::storage::{DocumentStore, MemoryLayout, ReadOutcome, StagedDocument};
use crate::{Error, Result};

/// Hex digits of the description hash kept in a pattern id.
const PATTERN_ID_HASH_LEN: usize = 12;

/// Summary of a completed extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReport {
    /// Detected patterns, in output order.
    pub patterns: Vec<SemanticPattern>,
    /// Sessions read from valid aggregates.
    pub sessions_analyzed: usize,
    /// Aggregates that loaded.
    pub aggregates_read: usize,
    /// Aggregates skipped as corrupt.
    pub corrupt_files: Vec<String>,
    /// Pattern count per category.
    pub by_category: BTreeMap<PatternCategory, usize>,
    /// Patterns classified strong or critical.
    pub strong_or_above: usize,
    /// Files replaced.
    pub written: Vec<PathBuf>,
}

/// Terminal outcome of an extraction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// Patterns were written.
    Extracted(ExtractionReport),
    /// Too few sessions; nothing was written.
    InsufficientData {
        /// Sessions available.
        sessions: usize,
        /// Sessions required.
        required: usize,
        /// Aggregates skipped as corrupt.
        corrupt_files: Vec<String>,
    },
    /// The budget ran out; nothing was written.
    TimedOut {
        /// The exhausted budget.
        budget: Duration,
        /// Aggregates skipped as corrupt before the budget ran out.
        corrupt_files: Vec<String>,
    },
}

/// Extracts semantic patterns for one project.
#[derive(Debug, Clone)]
pub struct Extractor {
    layout: MemoryLayout,
    store: DocumentStore,
    timeout: Duration,
}

impl Extractor {
    /// Creates an extractor using the configured budget.
    #[must_use]
    pub fn new(config: &PmsConfig, project_path: impl Into<PathBuf>) -> Self {
        Self {
            layout: MemoryLayout::new(project_path),
            store: DocumentStore::new(),
            timeout: config.timeouts.extract,
        }
    }

    /// Overrides the budget.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The memory layout in use.
    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Runs an extraction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] for misordered thresholds, or
    /// an error if the aggregates cannot be listed or the output cannot be
    /// written.
    #[tracing::instrument(skip(self, thresholds), fields(root = %self.layout.root().display()))]
    pub fn extract(&self, min_sessions: usize, thresholds: &Thresholds) -> Result<ExtractionOutcome> {
        thresholds.validate()?;
        let deadline = Deadline::start("extract", self.timeout);
        let mut corrupt_files = Vec::new();

        match self.run(min_sessions, thresholds, &deadline, &mut corrupt_files) {
            Err(Error::DeadlineExceeded { .. }) => Ok(self.timed_out(&deadline, corrupt_files)),
            other => other,
        }
    }

    /// The extraction proper. Returns [`Error::DeadlineExceeded`] at the
    /// first checkpoint past the budget; nothing is committed before the
    /// last one.
    fn run(
        &self,
        min_sessions: usize,
        thresholds: &Thresholds,
        deadline: &Deadline,
        corrupt_files: &mut Vec<String>,
    ) -> Result<ExtractionOutcome> {
        let mut sessions = Vec::new();
        let mut aggregates_read = 0;

        for path in self.layout.aggregate_paths()? {
            deadline.check()?;
            let name = file_name(&path);
            match self.store.read::<MonthlyAggregate>(&path)? {
                ReadOutcome::Loaded(aggregate) => {
                    aggregates_read += 1;
                    sessions.extend(aggregate.sessions);
                },
                ReadOutcome::Corrupt(reason) => {
                    tracing::warn!(aggregate = %name, reason = %reason, "Skipping corrupt aggregate");
                    corrupt_files.push(name);
                },
                ReadOutcome::Missing => {},
            }
        }

        let sessions = first_per_session(sessions);
        if sessions.len() < min_sessions {
            tracing::info!(
                sessions = sessions.len(),
                required = min_sessions,
                "Not enough sessions for extraction"
            );
            return Ok(ExtractionOutcome::InsufficientData {
                sessions: sessions.len(),
                required: min_sessions,
                corrupt_files: std::mem::take(corrupt_files),
            });
        }

        deadline.check()?;
        let detected_at = Utc::now().trunc_subsecs(0);
        let patterns = detect_patterns(&sessions, thresholds, detected_at);

        let staged = self.stage(&patterns, detected_at)?;
        deadline.check()?;
        let written = self.store.commit_all(staged)?;

        let mut by_category = BTreeMap::new();
        for pattern in &patterns {
            *by_category.entry(pattern.category).or_insert(0) += 1;
            metrics::counter!("pms_patterns_detected_total", "strength" => pattern.strength.as_str())
                .increment(1);
        }
        let strong_or_above = patterns
            .iter()
            .filter(|p| p.strength >= Strength::Strong)
            .count();

        tracing::info!(
            patterns = patterns.len(),
            strong_or_above,
            sessions = sessions.len(),
            corrupt = corrupt_files.len(),
            "Extracted semantic patterns"
        );

        Ok(ExtractionOutcome::Extracted(ExtractionReport {
            sessions_analyzed: sessions.len(),
            patterns,
            aggregates_read,
            corrupt_files: std::mem::take(corrupt_files),
            by_category,
            strong_or_above,
            written,
        }))
    }

    /// Stages the category files, then the aggregate file, which readers
    /// load first and is therefore committed last.
    fn stage(
        &self,
        patterns: &[SemanticPattern],
        detected_at: DateTime<Utc>,
    ) -> Result<Vec<StagedDocument>> {
        let mut staged = Vec::with_capacity(4);
        for category in PatternCategory::all() {
            let subset: Vec<_> = patterns
                .iter()
                .filter(|p| p.category == category)
                .cloned()
                .collect();
            staged.push(self.store.stage(
                &self.layout.category_path(category),
                &CategoryPatternFile {
                    category,
                    count: subset.len(),
                    patterns: subset,
                    last_updated: detected_at,
                },
            )?);
        }

        staged.push(self.store.stage(
            &self.layout.patterns_path(),
            &PatternFile {
                patterns: patterns.to_vec(),
                count: patterns.len(),
                last_updated: detected_at,
            },
        )?);
        Ok(staged)
    }

    fn timed_out(&self, deadline: &Deadline, corrupt_files: Vec<String>) -> ExtractionOutcome {
        tracing::warn!(
            budget_secs = deadline.budget().as_secs(),
            root = %self.layout.root().display(),
            "Extraction deadline exceeded, nothing written"
        );
        ExtractionOutcome::TimedOut {
            budget: deadline.budget(),
            corrupt_files,
        }
    }
}

/// Keeps the first record read for each session id.
///
/// Aggregates written before ids were enforced unique can hold the same
/// session more than once.
fn first_per_session(sessions: Vec<EpisodicRecord>) -> Vec<EpisodicRecord> {
    let mut seen = HashSet::with_capacity(sessions.len());
    sessions
        .into_iter()
        .filter(|session| {
            let first = seen.insert(session.session_id.clone());
            if !first {
                tracing::debug!(session_id = %session.session_id, "Ignoring repeated session record");
            }
            first
        })
        .collect()
}

/// Stable id of a pattern: category prefix plus a description hash.
#[must_use]
pub fn pattern_id(category: PatternCategory, description: &str) -> String {
    let digest = hex::encode(Sha256::digest(description.as_bytes()));
    format!(
        "{}_{}",
        category.id_prefix(),
        &digest[..PATTERN_ID_HASH_LEN]
    )
}

/// Detects recurring values across sessions.
///
/// A value counts once per session. Values that are only redaction markers
/// never count, and values below the emerging threshold are dropped. Output is ordered by category, then occurrences descending, then
/// description.
#[must_use]
pub fn detect_patterns(
    sessions: &[EpisodicRecord],
    thresholds: &Thresholds,
    detected_at: DateTime<Utc>,
) -> Vec<SemanticPattern> {
    let mut patterns = Vec::new();

    for category in PatternCategory::all() {
        let mut evidence: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for session in sessions {
            for value in values_for(session, category) {
                let value = value.trim();
                if value.is_empty() || is_redaction_only(value) {
                    continue;
                }
                let ids = evidence.entry(value).or_default();
                if !ids.contains(&session.session_id.as_str()) {
                    ids.push(&session.session_id);
                }
            }
        }

        for (description, ids) in evidence {
            let Some(strength) = thresholds.classify(ids.len()) else {
                continue;
            };
            patterns.push(SemanticPattern {
                pattern_id: pattern_id(category, description),
                description: description.to_string(),
                category,
                strength,
                occurrences: ids.len(),
                evidence: ids.into_iter().map(str::to_string).collect(),
                detected_at,
            });
        }
    }

    patterns.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| b.occurrences.cmp(&a.occurrences))
            .then_with(|| a.description.cmp(&b.description))
    });
    patterns
}

fn values_for(record: &EpisodicRecord, category: PatternCategory) -> &[String] {
    match category {
        PatternCategory::Preference => &record.user_preferences,
        PatternCategory::CodePattern => &record.code_patterns,
        PatternCategory::AntiPattern => &record.anti_patterns,
    }
}
