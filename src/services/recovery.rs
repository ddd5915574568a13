//! Recovery operations.
//!
//! Corruption is never repaired in place. The only automatic action is
//! moving a failing document into `.backup/`; derived tiers are then
//! recomputed from the episodic aggregates.

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use super::extractor::{ExtractionOutcome, Extractor};
use super::index::IndexService;
use crate::config::{PmsConfig, Thresholds, Timeouts};
use crate::models::{PatternCategory, SessionIndex};
use crate::storage::{
    DocumentKind, DocumentLock, DocumentStore, MemoryLayout, ReadOutcome, ValidationIssue, ValidationReport,
    move_to_backup,
};
use crate::{Error, Result};

/// Findings of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Whether the memory root exists.
    pub initialized: bool,
    /// One report per document checked.
    pub documents: Vec<ValidationReport>,
}

impl RecoveryReport {
    /// Whether the memory is initialized and no document has errors.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.initialized && self.documents.iter().all(ValidationReport::is_valid)
    }

    /// Documents with at least one error.
    pub fn invalid(&self) -> impl Iterator<Item = &ValidationReport> {
        self.documents.iter().filter(|d| !d.is_valid())
    }

    /// Total error-severity issues.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.documents.iter().map(|d| d.errors().count()).sum()
    }

    /// Total warning-severity issues.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.documents.iter().map(|d| d.warnings().count()).sum()
    }
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.initialized {
            return writeln!(f, "PMS directory not initialized");
        }
        for document in &self.documents {
            let status = if document.is_valid() { "ok" } else { "INVALID" };
            writeln!(f, "{} [{}] {status}", document.path.display(), document.kind)?;
            for issue in &document.issues {
                writeln!(f, "  {issue}")?;
            }
        }
        write!(
            f,
            "{} documents, {} errors, {} warnings",
            self.documents.len(),
            self.error_count(),
            self.warning_count()
        )
    }
}

/// What [`RecoveryManager::reset`] did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResetReport {
    /// Snapshot of the episodic tier taken before anything was removed.
    pub episodic_backup: Option<PathBuf>,
    /// Directories removed.
    pub removed: Vec<PathBuf>,
}

/// What [`RecoveryManager::repair`] did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepairReport {
    /// `(original, backup)` for every quarantined document.
    pub quarantined: Vec<(PathBuf, PathBuf)>,
    /// Entries written if the index was rebuilt.
    pub index_rebuilt: Option<usize>,
    /// Outcome of the semantic rebuild, if one ran.
    pub semantic: Option<ExtractionOutcome>,
}

/// Validates, quarantines and rebuilds one project's memory.
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    layout: MemoryLayout,
    store: DocumentStore,
    extract_timeout: Duration,
}

impl RecoveryManager {
    /// Creates a manager for a project.
    #[must_use]
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            layout: MemoryLayout::new(project_path),
            store: DocumentStore::new(),
            extract_timeout: Timeouts::default().extract,
        }
    }

    /// Sets the budget used by semantic rebuilds.
    #[must_use]
    pub const fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    /// The memory layout in use.
    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Validates every known document without changing anything.
    ///
    /// Missing semantic and procedural files are not reported; they simply
    /// have not been generated yet.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures.
    #[tracing::instrument(skip(self), fields(root = %self.layout.root().display()))]
    pub fn validate(&self) -> Result<RecoveryReport> {
        if !self.layout.is_initialized() {
            return Ok(RecoveryReport {
                initialized: false,
                documents: Vec::new(),
            });
        }

        let mut documents = Vec::new();
        let aggregates = self.layout.aggregate_paths()?;
        for path in &aggregates {
            documents.push(self.store.validate(path, DocumentKind::MonthlyAggregate)?);
        }

        let index_path = self.layout.index_path();
        if index_path.is_file() {
            let mut report = self.store.validate(&index_path, DocumentKind::SessionIndex)?;
            if report.is_valid() {
                self.check_index_references(&mut report)?;
            }
            documents.push(report);
        } else if !aggregates.is_empty() {
            documents.push(ValidationReport {
                path: index_path,
                kind: DocumentKind::SessionIndex,
                issues: vec![ValidationIssue::warning(
                    "",
                    "index missing; it is rebuilt on the next lookup",
                )],
            });
        }

        let semantic = std::iter::once((self.layout.patterns_path(), DocumentKind::PatternFile)).chain(
            PatternCategory::all()
                .map(|c| (self.layout.category_path(c), DocumentKind::CategoryPatternFile)),
        );
        for (path, kind) in semantic {
            if path.is_file() {
                documents.push(self.store.validate(&path, kind)?);
            }
        }

        let metadata = self.layout.rules_metadata_path();
        if metadata.is_file() {
            documents.push(self.store.validate(&metadata, DocumentKind::RuleMetadata)?);
        }

        let report = RecoveryReport {
            initialized: true,
            documents,
        };
        tracing::info!(
            documents = report.documents.len(),
            errors = report.error_count(),
            warnings = report.warning_count(),
            "Validated memory"
        );
        Ok(report)
    }

    fn check_index_references(&self, report: &mut ValidationReport) -> Result<()> {
        let ReadOutcome::Loaded(index) = self.store.read::<SessionIndex>(&report.path)? else {
            return Ok(());
        };
        let stale = IndexService::new(self.layout.clone(), self.store.clone()).stale_entries(&index)?;
        for (session_id, aggregate) in stale {
            report.issues.push(ValidationIssue::warning(
                session_id,
                format!("points at {aggregate}, which does not contain the session"),
            ));
        }
        Ok(())
    }

    /// Moves a document into `.backup/`. Returns the backup path.
    ///
    /// Relative paths are resolved against the memory root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for paths outside the memory root or
    /// missing files.
    pub fn quarantine(&self, path: &Path) -> Result<PathBuf> {
        move_to_backup(&self.layout, path, Utc::now())
    }

    /// Recomputes the semantic tier from every episodic session.
    ///
    /// Existing semantic output is ignored and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when there are no sessions to rebuild
    /// from, or any extraction error.
    #[tracing::instrument(skip(self, thresholds), fields(root = %self.layout.root().display()))]
    pub fn rebuild_semantic(&self, thresholds: &Thresholds) -> Result<ExtractionOutcome> {
        let extractor = Extractor::new(&PmsConfig::default(), self.layout.project_path())
            .with_timeout(self.extract_timeout);
        match extractor.extract(1, thresholds)? {
            ExtractionOutcome::InsufficientData { corrupt_files, .. } => {
                Err(Error::InvalidInput(if corrupt_files.is_empty() {
                    "no episodic sessions to rebuild from".to_string()
                } else {
                    format!(
                        "no readable episodic sessions to rebuild from ({} corrupt aggregates)",
                        corrupt_files.len()
                    )
                }))
            },
            outcome => Ok(outcome),
        }
    }

    /// Rewrites the session index from the aggregates.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregates cannot be listed or the index
    /// cannot be written.
    pub fn rebuild_index(&self) -> Result<usize> {
        IndexService::new(self.layout.clone(), self.store.clone()).rebuild()
    }

    /// Quarantines every invalid document and rebuilds what depends on it.
    ///
    /// The index is rebuilt if it or any aggregate was quarantined; the
    /// semantic tier if any semantic file was. Rule documents are never
    /// regenerated.
    ///
    /// # Errors
    ///
    /// Returns an error if validation, a move or a rebuild fails.
    pub fn repair(&self, thresholds: &Thresholds) -> Result<RepairReport> {
        let report = self.validate()?;
        let mut repair = RepairReport::default();
        if !report.initialized {
            return Ok(repair);
        }

        let mut rebuild_index = false;
        let mut rebuild_semantic = false;
        for document in report.invalid() {
            let backup = self.quarantine(&document.path)?;
            match document.kind {
                DocumentKind::MonthlyAggregate | DocumentKind::SessionIndex => rebuild_index = true,
                DocumentKind::PatternFile | DocumentKind::CategoryPatternFile => {
                    rebuild_semantic = true;
                },
                DocumentKind::RuleMetadata => {},
            }
            repair.quarantined.push((document.path.clone(), backup));
        }

        if rebuild_index {
            repair.index_rebuilt = Some(self.rebuild_index()?);
        }
        if rebuild_semantic {
            match self.rebuild_semantic(thresholds) {
                Ok(outcome) => repair.semantic = Some(outcome),
                Err(Error::InvalidInput(reason)) => {
                    tracing::warn!(reason = %reason, "Semantic tier left empty after quarantine");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(repair)
    }

    /// Deletes derived output, and with `keep_episodic = false` the
    /// episodic tier too.
    ///
    /// The episodic tier is first copied to
    /// `.claude/pms_backup_episodic/episodic_<timestamp>/`. Quarantined
    /// files in `.backup/` are never removed; the memory root itself goes
    /// only once nothing is left in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup cannot be taken (nothing is removed)
    /// or a directory cannot be removed.
    pub fn reset(&self, keep_episodic: bool) -> Result<ResetReport> {
        let episodic_backup = self.backup_episodic(Utc::now())?;

        let mut targets = vec![
            self.layout.semantic_dir(),
            self.layout.procedural_dir(),
            self.layout.rules_dir(),
        ];
        if !keep_episodic {
            targets.insert(0, self.layout.episodic_dir());
        }

        let mut removed = Vec::new();
        for dir in targets {
            if !dir.exists() {
                continue;
            }
            fs::remove_dir_all(&dir)
                .map_err(|e| Error::operation("reset_memory", format!("{}: {e}", dir.display())))?;
            tracing::warn!(dir = %dir.display(), "Removed memory directory");
            removed.push(dir);
        }

        if !keep_episodic && self.root_is_empty()? {
            let root = self.layout.root().to_path_buf();
            fs::remove_dir(&root)
                .map_err(|e| Error::operation("reset_memory", format!("{}: {e}", root.display())))?;
            removed.push(root);
        }

        Ok(ResetReport {
            episodic_backup,
            removed,
        })
    }

    /// Copies `episodic/` into a fresh timestamped snapshot directory.
    fn backup_episodic(&self, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
        let source = self.layout.episodic_dir();
        if !source.is_dir() {
            return Ok(None);
        }
        let parent = self.layout.episodic_backup_dir();
        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let mut target = parent.join(format!("episodic_{stamp}"));
        let mut attempt = 1;
        while target.exists() {
            target = parent.join(format!("episodic_{stamp}_{attempt}"));
            attempt += 1;
        }

        let mut copied = 0;
        for entry in WalkDir::new(&source) {
            let entry = entry.map_err(|e| Error::operation("backup_episodic", e))?;
            let relative = entry
                .path()
                .strip_prefix(&source)
                .map_err(|e| Error::operation("backup_episodic", e))?;
            let destination = target.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&destination).map_err(|e| {
                    Error::operation("backup_episodic", format!("{}: {e}", destination.display()))
                })?;
            } else if entry.file_type().is_file()
                && !DocumentLock::is_lock_file(&entry.file_name().to_string_lossy())
            {
                fs::copy(entry.path(), &destination).map_err(|e| {
                    Error::operation("backup_episodic", format!("{}: {e}", entry.path().display()))
                })?;
                copied += 1;
            }
        }
        tracing::info!(backup = %target.display(), files = copied, "Backed up episodic memory");
        Ok(Some(target))
    }

    fn root_is_empty(&self) -> Result<bool> {
        let root = self.layout.root();
        if !root.is_dir() {
            return Ok(false);
        }
        let mut entries = fs::read_dir(root)
            .map_err(|e| Error::operation("reset_memory", format!("{}: {e}", root.display())))?;
        Ok(entries.next().is_none())
    }
}
