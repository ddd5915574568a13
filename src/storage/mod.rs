//! Storage layer.
//!
//! This module owns every byte that reaches disk:
//! - **Layout**: where each document lives ([`MemoryLayout`])
//! - **Documents**: atomic, schema-checked JSON I/O ([`DocumentStore`])
//! - **Locks**: advisory locks for read-modify-write ([`DocumentLock`])
//! - **Backup**: moving corrupt files aside ([`move_to_backup`])

// Allow manual_let_else for clearer error handling in some contexts.
#![allow(clippy::manual_let_else)]
// Allow match_same_arms for explicit enum handling.
#![allow(clippy::match_same_arms)]

mod backup;
mod document;
mod layout;
mod lock;
mod schema;

pub use backup::{backup_filename, move_to_backup};
pub use document::{
    COMMIT_ATTEMPTS, Document, DocumentStore, ReadOutcome, StagedDocument, ValidationReport,
};
pub use layout::{
    BACKUP_DIR, EPISODIC_BACKUP_DIR, EPISODIC_DIR, INDEX_FILE_NAME, MEMORY_DIR_NAME, MemoryLayout, PATTERNS_FILE_NAME,
    PROCEDURAL_DIR, RULES_DIR, RULES_METADATA_FILE_NAME, SEMANTIC_DIR,
};
pub use lock::{DEFAULT_LOCK_TIMEOUT, DocumentLock};
pub use schema::{DocumentKind, ValidationIssue, ValidationSeverity};
