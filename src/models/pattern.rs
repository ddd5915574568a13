//! Semantic tier documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Kind of knowledge a pattern represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    /// A user preference (`user_preferences`).
    Preference,
    /// A recurring code pattern (`code_patterns`).
    CodePattern,
    /// A mistake to avoid (`anti_patterns`).
    AntiPattern,
}

impl PatternCategory {
    /// All categories, in output order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Preference, Self::CodePattern, Self::AntiPattern]
    }

    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::CodePattern => "code_pattern",
            Self::AntiPattern => "anti_pattern",
        }
    }

    /// Prefix used for pattern ids.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Preference => "pref",
            Self::CodePattern => "code",
            Self::AntiPattern => "anti",
        }
    }

    /// Per-category file under `semantic/`.
    #[must_use]
    pub const fn semantic_filename(self) -> &'static str {
        match self {
            Self::Preference => "preferences.json",
            Self::CodePattern => "code-patterns.json",
            Self::AntiPattern => "anti-patterns.json",
        }
    }

    /// Rule document under `rules/`.
    #[must_use]
    pub const fn rule_filename(self) -> &'static str {
        match self {
            Self::Preference => "user-preferences.md",
            Self::CodePattern => "code-patterns.md",
            Self::AntiPattern => "anti-patterns.md",
        }
    }

    /// Human-readable title of the rule document.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Preference => "User Preferences",
            Self::CodePattern => "Code Patterns",
            Self::AntiPattern => "Anti-Patterns",
        }
    }
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength tier of a pattern. Ordered `Emerging < Strong < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    /// At or above the emerging threshold.
    Emerging,
    /// At or above the strong threshold.
    #[default]
    Strong,
    /// At or above the critical threshold.
    Critical,
}

impl Strength {
    /// Returns the wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Emerging => "emerging",
            Self::Strong => "strong",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strength {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "emerging" => Ok(Self::Emerging),
            "strong" => Ok(Self::Strong),
            "critical" => Ok(Self::Critical),
            other => Err(Error::InvalidInput(format!("unknown strength: {other}"))),
        }
    }
}

/// A string value recurring across sessions.
///
/// `occurrences == evidence.len()` and evidence entries are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticPattern {
    /// Stable identifier (`<prefix>_<hash>`).
    pub pattern_id: String,
    /// The recurring value.
    pub description: String,
    /// Source list of the value.
    pub category: PatternCategory,
    /// Classification by occurrence count.
    pub strength: Strength,
    /// Number of distinct sessions containing the value.
    pub occurrences: usize,
    /// Session ids containing the value, in chronological order.
    pub evidence: Vec<String>,
    /// When the extraction run detected the pattern.
    pub detected_at: DateTime<Utc>,
}

/// `semantic/patterns.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFile {
    /// Every detected pattern.
    pub patterns: Vec<SemanticPattern>,
    /// Number of patterns.
    pub count: usize,
    /// Extraction time.
    pub last_updated: DateTime<Utc>,
}

/// `semantic/<category>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatternFile {
    /// Category held by the file.
    pub category: PatternCategory,
    /// Patterns of that category.
    pub patterns: Vec<SemanticPattern>,
    /// Number of patterns.
    pub count: usize,
    /// Extraction time.
    pub last_updated: DateTime<Utc>,
}
