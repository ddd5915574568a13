//! Security features.
//!
//! Redaction of secrets from captured session records.

mod patterns;
mod redactor;

pub use patterns::{
    PRIVATE_KEY_PLACEHOLDER, REDACTION_PLACEHOLDER, RedactionPattern, TOKEN_PLACEHOLDER,
    default_patterns,
};
pub use redactor::{IDENTITY_FIELDS, REDACTION_ERROR_SENTINEL, Redactor, is_redaction_only};
