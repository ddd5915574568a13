//! Centralized path management for the memory root.
//!
//! Every component resolves document paths through [`MemoryLayout`] so the
//! on-disk layout is defined in exactly one place:
//!
//! ```text
//! <project>/.claude/pms/
//!   episodic/sessions-YYYY-MM.json
//!   episodic/index.json
//!   semantic/patterns.json
//!   semantic/{preferences,code-patterns,anti-patterns}.json
//!   procedural/rules-metadata.json
//!   rules/<category>.md
//!   .backup/<stem>_<ts>.<ext>
//! ```

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::config::PmsConfig;
use crate::models::{PatternCategory, is_monthly_filename, monthly_filename};
use crate::{Error, Result};

/// Directory under `.claude/` holding all memory tiers.
pub const MEMORY_DIR_NAME: &str = "pms";

/// Episodic tier directory.
pub const EPISODIC_DIR: &str = "episodic";

/// Semantic tier directory.
pub const SEMANTIC_DIR: &str = "semantic";

/// Procedural metadata directory.
pub const PROCEDURAL_DIR: &str = "procedural";

/// Rendered rule documents.
pub const RULES_DIR: &str = "rules";

/// Quarantined documents.
pub const BACKUP_DIR: &str = ".backup";

/// Episodic snapshots taken before a reset, beside the memory root.
pub const EPISODIC_BACKUP_DIR: &str = "pms_backup_episodic";

/// Session index filename.
pub const INDEX_FILE_NAME: &str = "index.json";

/// All-category pattern file.
pub const PATTERNS_FILE_NAME: &str = "patterns.json";

/// Rule metadata filename.
pub const RULES_METADATA_FILE_NAME: &str = "rules-metadata.json";

/// Resolves every path used by the pipeline for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    project_path: PathBuf,
    root: PathBuf,
}

impl MemoryLayout {
    /// Creates the layout for a project directory.
    #[must_use]
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        let project_path = project_path.into();
        let root = project_path.join(".claude").join(MEMORY_DIR_NAME);
        Self { project_path, root }
    }

    /// The project directory.
    #[must_use]
    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    /// The memory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the memory root exists.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.root.is_dir()
    }

    /// `episodic/`.
    #[must_use]
    pub fn episodic_dir(&self) -> PathBuf {
        self.root.join(EPISODIC_DIR)
    }

    /// `semantic/`.
    #[must_use]
    pub fn semantic_dir(&self) -> PathBuf {
        self.root.join(SEMANTIC_DIR)
    }

    /// `procedural/`.
    #[must_use]
    pub fn procedural_dir(&self) -> PathBuf {
        self.root.join(PROCEDURAL_DIR)
    }

    /// `rules/`.
    #[must_use]
    pub fn rules_dir(&self) -> PathBuf {
        self.root.join(RULES_DIR)
    }

    /// `.backup/`.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    /// `<project>/.claude/pms_backup_episodic/`, outside the memory root so
    /// a full reset keeps it.
    #[must_use]
    pub fn episodic_backup_dir(&self) -> PathBuf {
        self.project_path.join(".claude").join(EPISODIC_BACKUP_DIR)
    }

    /// Monthly aggregate for a timestamp.
    #[must_use]
    pub fn aggregate_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.episodic_dir().join(monthly_filename(timestamp))
    }

    /// Monthly aggregate by filename.
    #[must_use]
    pub fn aggregate_path_for(&self, filename: &str) -> PathBuf {
        self.episodic_dir().join(filename)
    }

    /// `episodic/index.json`.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.episodic_dir().join(INDEX_FILE_NAME)
    }

    /// `semantic/patterns.json`.
    #[must_use]
    pub fn patterns_path(&self) -> PathBuf {
        self.semantic_dir().join(PATTERNS_FILE_NAME)
    }

    /// Per-category pattern file.
    #[must_use]
    pub fn category_path(&self, category: PatternCategory) -> PathBuf {
        self.semantic_dir().join(category.semantic_filename())
    }

    /// `procedural/rules-metadata.json`.
    #[must_use]
    pub fn rules_metadata_path(&self) -> PathBuf {
        self.procedural_dir().join(RULES_METADATA_FILE_NAME)
    }

    /// Rule document for a category.
    #[must_use]
    pub fn rule_path(&self, category: PatternCategory) -> PathBuf {
        self.rules_dir().join(category.rule_filename())
    }

    /// `<project>/.claude/pms.local.md`.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        PmsConfig::path_for(&self.project_path)
    }

    /// Creates the tier directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.episodic_dir(),
            self.semantic_dir(),
            self.procedural_dir(),
            self.rules_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| {
                Error::operation("create_memory_dir", format!("{}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Monthly aggregates present on disk, in filename (chronological) order.
    ///
    /// # Errors
    ///
    /// Returns an error if the episodic directory exists but cannot be listed.
    pub fn aggregate_paths(&self) -> Result<Vec<PathBuf>> {
        let dir = self.episodic_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|e| Error::operation("read_episodic_dir", e))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::operation("read_dir_entry", e))?;
            let name = entry.file_name();
            if is_monthly_filename(&name.to_string_lossy()) && entry.path().is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Every semantic output file, aggregate first.
    #[must_use]
    pub fn semantic_paths(&self) -> Vec<PathBuf> {
        std::iter::once(self.patterns_path())
            .chain(PatternCategory::all().map(|c| self.category_path(c)))
            .collect()
    }

    /// Whether `path` lies inside the memory root.
    ///
    /// Paths containing `..` are rejected outright; relative paths are
    /// resolved against the memory root.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        let absolute = self.resolve(path);
        absolute.starts_with(&self.root) && absolute != self.root
    }

    /// Resolves a relative path against the memory root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Path relative to the memory root, for display.
    #[must_use]
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}
