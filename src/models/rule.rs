//! Procedural tier documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PatternCategory, Strength};

/// Metadata entry for one generated rule document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEntry {
    /// Rule document filename under `rules/`.
    pub filename: String,
    /// Category the document was built from.
    pub category: PatternCategory,
    /// Number of patterns rendered.
    pub pattern_count: usize,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// Ids of the patterns rendered.
    pub source_patterns: Vec<String>,
}

/// `procedural/rules-metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleMetadata {
    /// One entry per rule document.
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    /// Time of the last synthesis run.
    #[serde(default)]
    pub last_synthesis: Option<DateTime<Utc>>,
}

impl RuleMetadata {
    /// Replaces the entry with the same filename, or appends it.
    pub fn upsert(&mut self, entry: RuleEntry) {
        if let Some(existing) = self
            .rules
            .iter_mut()
            .find(|r| r.filename == entry.filename)
        {
            *existing = entry;
        } else {
            self.rules.push(entry);
        }
    }

    /// Looks up the entry for a filename.
    #[must_use]
    pub fn entry(&self, filename: &str) -> Option<&RuleEntry> {
        self.rules.iter().find(|r| r.filename == filename)
    }
}

/// YAML front-matter of a rule document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFrontMatter {
    /// Document title.
    pub title: String,
    /// Number of patterns in the document.
    pub pattern_count: usize,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// Highest strength among the patterns.
    pub strength: Strength,
}
