//! # PMS
//!
//! A project-scoped behavioral memory pipeline for AI coding assistants.
//!
//! PMS turns raw session records into durable, incrementally refined
//! knowledge in three stages:
//!
//! - **Episodic**: one redacted record per captured session, batched into
//!   monthly aggregates (`episodic/sessions-YYYY-MM.json`).
//! - **Semantic**: recurring preferences, code patterns and anti-patterns
//!   counted across sessions and classified by strength (`semantic/*.json`).
//! - **Procedural**: markdown rule documents synthesized from strong patterns
//!   (`rules/*.md`).
//!
//! Every document goes through the [`storage::DocumentStore`], which writes
//! atomically (temp file + rename) under an advisory lock and reports
//! corruption instead of repairing it. The [`services::RecoveryManager`]
//! quarantines corrupt files and rebuilds the semantic tier from episodic data.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pms::config::PmsConfig;
//! use pms::models::Trigger;
//! use pms::services::{EncodeRequest, Encoder, Extractor};
//!
//! let config = PmsConfig::load(project);
//! let encoder = Encoder::new(&config, project);
//! encoder.encode(EncodeRequest::new(Trigger::SessionEnd))?;
//!
//! let extractor = Extractor::new(&config, project);
//! let outcome = extractor.extract(config.thresholds.min_sessions, &config.thresholds)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error as ThisError;

pub mod config;
pub mod git;
pub mod models;
pub mod observability;
pub mod rendering;
pub mod security;
pub mod services;
pub mod storage;

pub use config::{PmsConfig, Thresholds, Timeouts};
pub use models::{
    EncodingMode, EpisodicRecord, MonthlyAggregate, PatternCategory, RuleMetadata,
    SemanticPattern, Strength, Trigger,
};
pub use security::Redactor;
pub use services::{
    Deadline, EncodeOutcome, EncodeRequest, Encoder, ExtractionOutcome, Extractor,
    RecoveryManager, SynthesisOutcome, Synthesizer,
};
pub use storage::{DocumentStore, MemoryLayout, ReadOutcome};

/// Error type for pms operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Bad CLI arguments, unknown trigger/strength labels, nothing to rebuild from |
/// | `InvalidConfig` | Threshold ordering violated (`emerging <= strong <= critical`) |
/// | `OperationFailed` | I/O, serialization, rename or lock failures |
/// | `CorruptDocument` | A document that must be used cannot be parsed or fails its schema |
/// | `DeadlineExceeded` | A wall-clock budget elapsed at a checkpoint |
///
/// Degraded-but-valid results (partial records, insufficient data, timeouts
/// during extraction) are reported through outcome enums, not through this
/// type.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is internally inconsistent.
    ///
    /// Raised when:
    /// - `emerging_pattern > strong_pattern`
    /// - `strong_pattern > critical_pattern`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Filesystem I/O errors occur (unwritable memory root, failed rename)
    /// - JSON or YAML serialization fails
    /// - An advisory lock cannot be acquired
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A document is structurally corrupt.
    ///
    /// Corruption is never repaired in place; see
    /// [`services::RecoveryManager::quarantine`].
    #[error("corrupt document {}: {reason}", path.display())]
    CorruptDocument {
        /// Path of the offending document.
        path: PathBuf,
        /// Parse or schema failure description.
        reason: String,
    },

    /// A deadline elapsed.
    #[error("'{operation}' exceeded its {}s deadline", budget.as_secs())]
    DeadlineExceeded {
        /// The operation that ran out of time.
        operation: String,
        /// The configured budget.
        budget: Duration,
    },
}

impl Error {
    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for pms operations.
pub type Result<T> = std::result::Result<T, Error>;
