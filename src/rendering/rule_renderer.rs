//! Rule document renderer.
//!
//! A rule document is YAML front-matter followed by one markdown section per
//! pattern:
//!
//! ```text
//! ---
//! title: User Preferences
//! pattern_count: 2
//! generated_at: 2025-03-01T10:00:00Z
//! strength: critical
//! ---
//!
//! # User Preferences
//!
//! ## Always use HTTPOnly cookies
//!
//! Observed 5 times (critical pattern).
//! ...
//! ```

use chrono::{DateTime, Utc};
use std::fmt::{self, Write};

use crate::config::extract_front_matter;
use crate::models::{PatternCategory, RuleFrontMatter, SemanticPattern, Strength};
use crate::{Error, Result};

/// Evidence sessions listed per pattern before summarizing the rest.
pub const MAX_EVIDENCE_LISTED: usize = 5;

/// Leading words that already read as an instruction.
const IMPERATIVE_PREFIXES: [&str; 5] = ["always", "never", "avoid", "prefer", "use"];

/// A rendered rule document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRule {
    /// Front-matter written at the top of the document.
    pub front_matter: RuleFrontMatter,
    /// Full document text.
    pub markdown: String,
}

/// Renders the rule document for one category.
///
/// Patterns are ordered by strength, then occurrences, both descending.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an empty pattern list and
/// [`Error::OperationFailed`] if the front-matter cannot be serialized.
pub fn render_rule(
    category: PatternCategory,
    patterns: &[SemanticPattern],
    generated_at: DateTime<Utc>,
) -> Result<RenderedRule> {
    let strength = patterns
        .iter()
        .map(|p| p.strength)
        .max()
        .ok_or_else(|| Error::InvalidInput(format!("no patterns to render for {category}")))?;

    let front_matter = RuleFrontMatter {
        title: category.title().to_string(),
        pattern_count: patterns.len(),
        generated_at,
        strength,
    };
    let yaml = serde_yaml_ng::to_string(&front_matter)
        .map_err(|e| Error::operation("serialize_front_matter", e))?;
    let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);

    let mut ordered: Vec<&SemanticPattern> = patterns.iter().collect();
    ordered.sort_by(|a, b| {
        b.strength
            .cmp(&a.strength)
            .then_with(|| b.occurrences.cmp(&a.occurrences))
    });

    let mut markdown = String::new();
    write!(markdown, "---\n{yaml}---\n\n")
        .and_then(|()| write_body(&mut markdown, category, &ordered))
        .map_err(|e| Error::operation("render_rule", e))?;

    Ok(RenderedRule {
        front_matter,
        markdown,
    })
}

/// Writes the heading, the summary line and one section per pattern.
fn write_body<W: Write>(
    out: &mut W,
    category: PatternCategory,
    ordered: &[&SemanticPattern],
) -> fmt::Result {
    writeln!(out, "# {}\n", category.title())?;
    writeln!(
        out,
        "Synthesized from {} recurring {} across past sessions.",
        ordered.len(),
        if ordered.len() == 1 { "pattern" } else { "patterns" }
    )?;
    for pattern in ordered {
        write_section(out, pattern)?;
    }
    Ok(())
}

fn write_section<W: Write>(out: &mut W, pattern: &SemanticPattern) -> fmt::Result {
    writeln!(out, "\n## {}\n", instruction(pattern))?;
    writeln!(
        out,
        "Observed {} {} ({} pattern).",
        pattern.occurrences,
        if pattern.occurrences == 1 { "time" } else { "times" },
        pattern.strength
    )?;
    if pattern.evidence.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nEvidence:")?;
    for session_id in pattern.evidence.iter().take(MAX_EVIDENCE_LISTED) {
        writeln!(out, "- {session_id}")?;
    }
    if pattern.evidence.len() > MAX_EVIDENCE_LISTED {
        writeln!(
            out,
            "- (and {} more)",
            pattern.evidence.len() - MAX_EVIDENCE_LISTED
        )?;
    }
    Ok(())
}

/// Section heading for a pattern.
///
/// Strong and critical descriptions that are not already imperative are
/// prefixed with "Follow this pattern: ".
#[must_use]
pub fn instruction(pattern: &SemanticPattern) -> String {
    let description = pattern.description.trim();
    if pattern.strength < Strength::Strong || is_imperative(description) {
        return description.to_string();
    }
    format!("Follow this pattern: {description}")
}

fn is_imperative(text: &str) -> bool {
    let first = text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    IMPERATIVE_PREFIXES.contains(&first.as_str())
}

/// Reads the front-matter back from a rule document.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the document has no front-matter or
/// it does not describe a rule.
pub fn parse_rule_front_matter(markdown: &str) -> Result<RuleFrontMatter> {
    let yaml = extract_front_matter(markdown)
        .ok_or_else(|| Error::InvalidInput("rule document has no front-matter".to_string()))?;
    serde_yaml_ng::from_str(yaml)
        .map_err(|e| Error::InvalidInput(format!("rule front-matter: {e}")))
}
