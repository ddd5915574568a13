//! Redaction patterns.
// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]
//!
//! Defaults cover private keys, bearer tokens, credential assignments and
//! long opaque tokens. Project patterns are appended after the defaults.

use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::sync::LazyLock;

/// Replacement for project-specific patterns.
pub const REDACTION_PLACEHOLDER: &str = "[REDACTED]";

/// Replacement for long opaque tokens.
pub const TOKEN_PLACEHOLDER: &str = "[REDACTED_TOKEN]";

/// Replacement for PEM private-key blocks.
pub const PRIVATE_KEY_PLACEHOLDER: &str = "[REDACTED PRIVATE KEY]";

// Define regex patterns as separate statics
// Note: These patterns are static and guaranteed to compile, so expect() is safe
static PRIVATE_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)-----BEGIN\s+(?:RSA\s+|EC\s+|OPENSSH\s+)?PRIVATE\s+KEY-----.*?-----END\s+(?:RSA\s+|EC\s+|OPENSSH\s+)?PRIVATE\s+KEY-----",
    )
    .expect("static regex: private key pattern")
});

static BEARER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Bearer\s+[\w.~+/-]+=*").expect("static regex: bearer pattern")
});

static API_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)api[_-]?key['"\s:=]+[\w-]+"#).expect("static regex: api key pattern")
});

static ACCESS_TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)access[_-]?token['"\s:=]+[\w-]+"#)
        .expect("static regex: access token pattern")
});

static SECRET_KEY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)secret[_-]?key['"\s:=]+[\w-]+"#).expect("static regex: secret key pattern")
});

static AUTH_TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)auth[_-]?token['"\s:=]+[\w-]+"#).expect("static regex: auth token pattern")
});

static KEY_ASSIGNMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?P<name>\w+_(?:key|token))\s*[=:]\s*['"]?[\w-]+"#)
        .expect("static regex: key assignment pattern")
});

static PASSWORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)password['"\s:=]+[^\s'",}\[]+"#).expect("static regex: password pattern")
});

static PASSWD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)passwd['"\s:=]+[^\s'",}\[]+"#).expect("static regex: passwd pattern")
});

static CREDENTIALS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)credentials?['"\s:=]+[^\s'",}\[]+"#)
        .expect("static regex: credentials pattern")
});

static GENERIC_TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9_-]{20,}\b").expect("static regex: generic token pattern")
});

/// An ordered `(regex, replacement)` pair.
///
/// A custom pattern whose source does not compile is kept as a broken
/// pattern: it fails every time it is applied.
#[derive(Debug, Clone)]
pub struct RedactionPattern {
    name: String,
    regex: Result<Regex, String>,
    replacement: String,
}

impl RedactionPattern {
    /// Creates a pattern from a compiled regex.
    ///
    /// `replacement` may reference capture groups (`${name}`).
    #[must_use]
    pub fn new(name: impl Into<String>, regex: Regex, replacement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            regex: Ok(regex),
            replacement: replacement.into(),
        }
    }

    /// Creates a case-insensitive project pattern replaced by `[REDACTED]`.
    #[must_use]
    pub fn custom(source: &str) -> Self {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map_err(|e| e.to_string());
        Self {
            name: format!("custom:{source}"),
            regex,
            replacement: REDACTION_PLACEHOLDER.to_string(),
        }
    }

    /// Pattern name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the pattern failed to compile.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.regex.is_err()
    }

    /// Replaces every match in `text`, returning the new text and the number
    /// of matches replaced.
    ///
    /// # Errors
    ///
    /// Returns the compile error of a broken pattern.
    pub fn apply<'t>(&self, text: &'t str) -> Result<(Cow<'t, str>, usize), String> {
        let regex = self.regex.as_ref().map_err(Clone::clone)?;
        let count = regex.find_iter(text).count();
        if count == 0 {
            return Ok((Cow::Borrowed(text), 0));
        }
        let replaced = regex.replace_all(text, self.replacement.as_str());
        Ok((Cow::Owned(replaced.into_owned()), count))
    }
}

/// The built-in patterns, in application order.
#[must_use]
pub fn default_patterns() -> Vec<RedactionPattern> {
    let builtin: [(&str, &LazyLock<Regex>, &str); 11] = [
        ("private_key", &PRIVATE_KEY_REGEX, PRIVATE_KEY_PLACEHOLDER),
        ("bearer", &BEARER_REGEX, "Bearer [REDACTED]"),
        ("api_key", &API_KEY_REGEX, "api_key=[REDACTED]"),
        ("access_token", &ACCESS_TOKEN_REGEX, "access_token=[REDACTED]"),
        ("secret_key", &SECRET_KEY_REGEX, "secret_key=[REDACTED]"),
        ("auth_token", &AUTH_TOKEN_REGEX, "auth_token=[REDACTED]"),
        ("key_assignment", &KEY_ASSIGNMENT_REGEX, "${name}=[REDACTED]"),
        ("password", &PASSWORD_REGEX, "password=[REDACTED]"),
        ("passwd", &PASSWD_REGEX, "passwd=[REDACTED]"),
        ("credentials", &CREDENTIALS_REGEX, "credentials=[REDACTED]"),
        ("generic_token", &GENERIC_TOKEN_REGEX, TOKEN_PLACEHOLDER),
    ];
    builtin
        .into_iter()
        .map(|(name, regex, replacement)| RedactionPattern::new(name, (*regex).clone(), replacement))
        .collect()
}
