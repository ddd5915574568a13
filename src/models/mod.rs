//! Data models for pms.
//!
//! One module per memory tier. Every persisted document has an explicit type
//! here; the [`DocumentStore`](crate::storage::DocumentStore) checks the raw
//! JSON against a schema before deserializing into these types.

mod episodic;
mod pattern;
mod rule;

pub use episodic::{
    EncodingMode, EpisodicRecord, MonthlyAggregate, SessionContext, SessionIndex, Trigger,
    TranscriptSummary, is_monthly_filename, monthly_filename,
};
pub use pattern::{CategoryPatternFile, PatternCategory, PatternFile, SemanticPattern, Strength};
pub use rule::{RuleEntry, RuleFrontMatter, RuleMetadata};
