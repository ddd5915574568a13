//! Procedural synthesis.
//!
//! Renders strong patterns into one rule document per category. Nothing is
//! written until a plan is approved, either up front (`auto_approve`) or by
//! passing the proposed plan back to [`Synthesizer::apply`].

use chrono::{DateTime, SubsecRound, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::models::{
    PatternCategory, PatternFile, RuleEntry, RuleMetadata, SemanticPattern, Strength,
};
use crate::rendering::render_rule;
use crate::storage::{DocumentStore, MemoryLayout, ReadOutcome};
use crate::{Error, Result};

/// One rule document waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRule {
    /// Category the document covers.
    pub category: PatternCategory,
    /// Destination filename under `rules/`.
    pub filename: String,
    /// Ids of the patterns rendered.
    pub source_patterns: Vec<String>,
    /// Highest strength in the document.
    pub strength: Strength,
    /// Rendered markdown.
    pub markdown: String,
}

/// Rule documents proposed by one synthesis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisPlan {
    /// Documents, in category order.
    pub rules: Vec<PlannedRule>,
    /// Generation time stamped into every document.
    pub generated_at: DateTime<Utc>,
    /// Patterns below the strength cutoff.
    pub filtered_out: usize,
}

impl SynthesisPlan {
    /// Total patterns across all documents.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.rules.iter().map(|r| r.source_patterns.len()).sum()
    }

    /// Whether the plan would write nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Summary of a written plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisReport {
    /// Rule documents replaced.
    pub written: Vec<PathBuf>,
    /// Patterns rendered.
    pub pattern_count: usize,
    /// Recorded synthesis time.
    pub generated_at: DateTime<Utc>,
}

/// Terminal outcome of a synthesis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// No pattern reaches the strength cutoff; nothing was written.
    NoQualifyingPatterns {
        /// Patterns considered.
        considered: usize,
        /// The cutoff applied.
        min_strength: Strength,
    },
    /// Awaiting approval; nothing was written.
    Proposed(SynthesisPlan),
    /// Rule documents were written.
    Written(SynthesisReport),
}

/// Synthesizes rule documents for one project.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    layout: MemoryLayout,
    store: DocumentStore,
}

impl Synthesizer {
    /// Creates a synthesizer for a project.
    #[must_use]
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            layout: MemoryLayout::new(project_path),
            store: DocumentStore::new(),
        }
    }

    /// The memory layout in use.
    #[must_use]
    pub const fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Loads the current pattern set. A missing file is an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CorruptDocument`] if `semantic/patterns.json`
    /// is corrupt.
    pub fn load_patterns(&self) -> Result<Vec<SemanticPattern>> {
        let path = self.layout.patterns_path();
        match self.store.read::<PatternFile>(&path)? {
            ReadOutcome::Missing => Ok(Vec::new()),
            ReadOutcome::Loaded(file) => Ok(file.patterns),
            ReadOutcome::Corrupt(reason) => Err(Error::CorruptDocument { path, reason }),
        }
    }

    /// Builds the rule documents for the patterns at or above `min_strength`.
    ///
    /// # Errors
    ///
    /// Returns an error if a document cannot be rendered.
    pub fn plan(patterns: &[SemanticPattern], min_strength: Strength) -> Result<SynthesisPlan> {
        let generated_at = Utc::now().trunc_subsecs(0);
        let mut grouped: BTreeMap<PatternCategory, Vec<SemanticPattern>> = BTreeMap::new();
        let mut filtered_out = 0;
        for pattern in patterns {
            if pattern.strength >= min_strength {
                grouped.entry(pattern.category).or_default().push(pattern.clone());
            } else {
                filtered_out += 1;
            }
        }

        let mut rules = Vec::with_capacity(grouped.len());
        for (category, members) in grouped {
            let rendered = render_rule(category, &members, generated_at)?;
            rules.push(PlannedRule {
                category,
                filename: category.rule_filename().to_string(),
                source_patterns: members.iter().map(|p| p.pattern_id.clone()).collect(),
                strength: rendered.front_matter.strength,
                markdown: rendered.markdown,
            });
        }

        Ok(SynthesisPlan {
            rules,
            generated_at,
            filtered_out,
        })
    }

    /// Plans and, when approved, writes rule documents.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or writing fails.
    #[tracing::instrument(skip(self, patterns), fields(patterns = patterns.len()))]
    pub fn synthesize(
        &self,
        patterns: &[SemanticPattern],
        min_strength: Strength,
        auto_approve: bool,
    ) -> Result<SynthesisOutcome> {
        let plan = Self::plan(patterns, min_strength)?;
        if plan.is_empty() {
            tracing::info!(%min_strength, "No patterns qualify for synthesis");
            return Ok(SynthesisOutcome::NoQualifyingPatterns {
                considered: patterns.len(),
                min_strength,
            });
        }
        if !auto_approve {
            tracing::info!(rules = plan.rules.len(), "Synthesis proposed, awaiting approval");
            return Ok(SynthesisOutcome::Proposed(plan));
        }
        self.apply(plan).map(SynthesisOutcome::Written)
    }

    /// Writes an approved plan.
    ///
    /// Rule documents and the updated metadata are committed together, the
    /// metadata last, with the metadata lock held throughout. Metadata
    /// entries for the regenerated files are replaced; others are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is corrupt or any document cannot
    /// be written; in either case no document is changed.
    pub fn apply(&self, plan: SynthesisPlan) -> Result<SynthesisReport> {
        let pattern_count = plan.pattern_count();
        let generated_at = plan.generated_at;
        let metadata_path = self.layout.rules_metadata_path();
        let _lock = self.store.lock(&metadata_path)?;
        let mut metadata = self
            .store
            .read::<RuleMetadata>(&metadata_path)?
            .or_default(&metadata_path)?;

        let mut staged = Vec::with_capacity(plan.rules.len() + 1);
        for rule in plan.rules {
            staged.push(
                self.store
                    .stage_text(&self.layout.rule_path(rule.category), &rule.markdown)?,
            );
            metadata.upsert(RuleEntry {
                filename: rule.filename,
                category: rule.category,
                pattern_count: rule.source_patterns.len(),
                generated_at,
                source_patterns: rule.source_patterns,
            });
        }
        metadata.last_synthesis = Some(generated_at);
        staged.push(self.store.stage(&metadata_path, &metadata)?);

        let mut written = self.store.commit_all(staged)?;
        written.pop();

        metrics::counter!("pms_rules_written_total").increment(written.len() as u64);
        tracing::info!(rules = written.len(), pattern_count, "Wrote rule documents");

        Ok(SynthesisReport {
            written,
            pattern_count,
            generated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::parse_rule_front_matter;
    use tempfile::TempDir;

    fn pattern(id: &str, category: PatternCategory, strength: Strength) -> SemanticPattern {
        SemanticPattern {
            pattern_id: id.to_string(),
            description: format!("Always {id}"),
            category,
            strength,
            occurrences: 3,
            evidence: vec!["s1".into(), "s2".into(), "s3".into()],
            detected_at: Utc::now(),
        }
    }

    fn mixed() -> Vec<SemanticPattern> {
        vec![
            pattern("pref_emerging", PatternCategory::Preference, Strength::Emerging),
            pattern("pref_strong", PatternCategory::Preference, Strength::Strong),
            pattern("anti_critical", PatternCategory::AntiPattern, Strength::Critical),
        ]
    }

    #[test]
    fn test_plan_filters_by_strength() {
        let plan = Synthesizer::plan(&mixed(), Strength::Strong).unwrap();

        assert_eq!(plan.filtered_out, 1);
        assert_eq!(plan.pattern_count(), 2);
        let files: Vec<_> = plan.rules.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(files, vec!["user-preferences.md", "anti-patterns.md"]);
        assert_eq!(plan.rules[0].source_patterns, vec!["pref_strong"]);
        assert!(!plan.rules[0].markdown.contains("pref_emerging"));
    }

    #[test]
    fn test_proposal_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let synthesizer = Synthesizer::new(dir.path());

        let outcome = synthesizer.synthesize(&mixed(), Strength::Strong, false).unwrap();

        assert!(matches!(outcome, SynthesisOutcome::Proposed(ref plan) if plan.rules.len() == 2));
        assert!(!synthesizer.layout().rules_dir().exists());
    }

    #[test]
    fn test_nothing_qualifies() {
        let dir = TempDir::new().unwrap();
        let synthesizer = Synthesizer::new(dir.path());

        let only_emerging = vec![pattern("p", PatternCategory::CodePattern, Strength::Emerging)];
        let outcome = synthesizer
            .synthesize(&only_emerging, Strength::Strong, true)
            .unwrap();
        assert_eq!(
            outcome,
            SynthesisOutcome::NoQualifyingPatterns {
                considered: 1,
                min_strength: Strength::Strong
            }
        );
    }

    #[test]
    fn test_apply_writes_rules_and_merges_metadata() {
        let dir = TempDir::new().unwrap();
        let synthesizer = Synthesizer::new(dir.path());
        let store = DocumentStore::new();

        let SynthesisOutcome::Written(first) = synthesizer
            .synthesize(&mixed(), Strength::Strong, true)
            .unwrap()
        else {
            panic!("expected rules to be written");
        };
        assert_eq!(first.written.len(), 2);

        let code_only = vec![pattern("code_x", PatternCategory::CodePattern, Strength::Strong)];
        let SynthesisOutcome::Written(second) = synthesizer
            .synthesize(&code_only, Strength::Strong, true)
            .unwrap()
        else {
            panic!("expected rules to be written");
        };

        let metadata = store
            .read::<RuleMetadata>(&synthesizer.layout().rules_metadata_path())
            .unwrap()
            .loaded()
            .unwrap();
        assert_eq!(metadata.rules.len(), 3);
        assert_eq!(metadata.last_synthesis, Some(second.generated_at));
        assert_eq!(
            metadata.entry("anti-patterns.md").unwrap().source_patterns,
            vec!["anti_critical"]
        );

        let markdown = std::fs::read_to_string(
            synthesizer.layout().rule_path(PatternCategory::AntiPattern),
        )
        .unwrap();
        let front = parse_rule_front_matter(&markdown).unwrap();
        assert_eq!(front.strength, Strength::Critical);
        assert_eq!(front.title, "Anti-Patterns");
    }

    #[test]
    fn test_load_patterns_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let synthesizer = Synthesizer::new(dir.path());
        assert!(synthesizer.load_patterns().unwrap().is_empty());

        synthesizer.layout().ensure_dirs().unwrap();
        std::fs::write(synthesizer.layout().patterns_path(), "{\"patterns\": [").unwrap();
        assert!(matches!(
            synthesizer.load_patterns(),
            Err(crate::Error::CorruptDocument { .. })
        ));
    }

    #[test]
    fn test_failed_rule_commit_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let synthesizer = Synthesizer::new(dir.path());
        let layout = synthesizer.layout();
        synthesizer.synthesize(&mixed(), Strength::Strong, true).unwrap();
        let metadata_before = std::fs::read_to_string(layout.rules_metadata_path()).unwrap();
        let prefs_before =
            std::fs::read_to_string(layout.rule_path(PatternCategory::Preference)).unwrap();

        let blocked = layout.rule_path(PatternCategory::AntiPattern);
        std::fs::remove_file(&blocked).unwrap();
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("occupied"), "x").unwrap();
        let mut changed = mixed();
        changed.push(pattern("pref_new", PatternCategory::Preference, Strength::Critical));

        assert!(synthesizer.synthesize(&changed, Strength::Strong, true).is_err());

        assert_eq!(
            std::fs::read_to_string(layout.rule_path(PatternCategory::Preference)).unwrap(),
            prefs_before
        );
        assert_eq!(std::fs::read_to_string(layout.rules_metadata_path()).unwrap(), metadata_before);
    }
}
