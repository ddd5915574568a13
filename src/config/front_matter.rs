//! YAML front-matter of `pms.local.md`.

use serde::Deserialize;

use crate::{Error, Result};

/// Raw file shape. Every field is optional; absent values keep defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// `triggers:` section.
    pub triggers: Option<TriggersFile>,
    /// `processing:` section.
    pub processing: Option<ProcessingFile>,
    /// `thresholds:` section.
    pub thresholds: Option<ThresholdsFile>,
    /// `encoding:` section.
    pub encoding: Option<EncodingFile>,
    /// `privacy:` section.
    pub privacy: Option<PrivacyFile>,
    /// `timeouts:` section (seconds).
    pub timeouts: Option<TimeoutsFile>,
}

impl ConfigFile {
    /// Parses a YAML document. An empty document yields all-`None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on malformed YAML or wrong value types.
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(yaml)
            .map_err(|e| Error::InvalidConfig(format!("front-matter: {e}")))
    }
}

#[allow(missing_docs)]
#[derive(Debug, Default, Deserialize)]
pub struct TriggersFile {
    pub precompact: Option<bool>,
    pub session_end: Option<bool>,
    pub stop: Option<bool>,
}

#[allow(missing_docs)]
#[derive(Debug, Default, Deserialize)]
pub struct ProcessingFile {
    pub continuous_mode: Option<bool>,
    pub auto_synthesize: Option<bool>,
}

#[allow(missing_docs)]
#[derive(Debug, Default, Deserialize)]
pub struct ThresholdsFile {
    pub min_sessions: Option<u64>,
    pub emerging_pattern: Option<u64>,
    pub strong_pattern: Option<u64>,
    pub critical_pattern: Option<u64>,
}

#[allow(missing_docs)]
#[derive(Debug, Default, Deserialize)]
pub struct EncodingFile {
    pub prefer_context: Option<bool>,
    pub fallback_jsonl: Option<bool>,
    pub transcripts_dir: Option<String>,
}

#[allow(missing_docs)]
#[derive(Debug, Default, Deserialize)]
pub struct PrivacyFile {
    pub redact_sensitive: Option<bool>,
    pub custom_redaction_patterns: Option<Vec<String>>,
}

#[allow(missing_docs)]
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsFile {
    pub encode: Option<u64>,
    pub extract: Option<u64>,
}

/// Returns the text between a leading `---` line and the next `---` line.
#[must_use]
pub fn extract_front_matter(contents: &str) -> Option<&str> {
    let rest = contents
        .strip_prefix("---\n")
        .or_else(|| contents.strip_prefix("---\r\n"))?;

    if rest.starts_with("---") {
        return Some("");
    }

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_front_matter() {
        let doc = "---\na: 1\nb: 2\n---\nbody\n";
        assert_eq!(extract_front_matter(doc), Some("a: 1\nb: 2\n"));
        assert_eq!(extract_front_matter("---\n---\n"), Some(""));
        assert_eq!(extract_front_matter("no front matter"), None);
        assert_eq!(extract_front_matter("---\nunterminated: true\n"), None);
    }

    #[test]
    fn test_parse_wrong_type_is_invalid_config() {
        let result = ConfigFile::parse("thresholds:\n  min_sessions: lots\n");
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_ignores_unknown_sections() {
        let file = ConfigFile::parse("enabled: true\nthresholds:\n  strong_pattern: 4\n").unwrap();
        assert_eq!(file.thresholds.unwrap().strong_pattern, Some(4));
        assert!(file.triggers.is_none());
    }
}
