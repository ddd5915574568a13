//! Property-based tests for pipeline invariants.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Strength classification is monotonic in the occurrence count
//! - Detected patterns count each session once and respect the thresholds
//! - Pattern ids are deterministic and well-formed
//! - Known secret shapes never survive redaction
//! - Transcript and configuration parsing never panic

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration;

use pms::services::{detect_patterns, parse_transcript, pattern_id};
use pms::{
    Deadline, EncodingMode, EpisodicRecord, PatternCategory, PmsConfig, Redactor, Thresholds,
    Trigger,
};

fn ordered_thresholds() -> impl Strategy<Value = Thresholds> {
    (1usize..6, 0usize..6, 0usize..6).prop_map(|(emerging, strong_gap, critical_gap)| Thresholds {
        min_sessions: 1,
        emerging,
        strong: emerging + strong_gap,
        critical: emerging + strong_gap + critical_gap,
    })
}

fn session(index: usize, preferences: Vec<String>) -> EpisodicRecord {
    let ts = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
    let mut record = EpisodicRecord::new(
        format!("session-{index}"),
        ts,
        "/project",
        Trigger::Manual,
        EncodingMode::Context,
    );
    record.user_preferences = preferences;
    record
}

// ============================================================================
// Threshold Properties
// ============================================================================

proptest! {
    /// More occurrences never yield a weaker classification.
    #[test]
    fn prop_classification_is_monotonic(
        thresholds in ordered_thresholds(),
        a in 0usize..20,
        b in 0usize..20,
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(thresholds.classify(low) <= thresholds.classify(high));
    }

    /// Ordered thresholds always validate.
    #[test]
    fn prop_ordered_thresholds_validate(thresholds in ordered_thresholds()) {
        prop_assert!(thresholds.validate().is_ok());
    }
}

// ============================================================================
// Detection Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every pattern has unique evidence, matching occurrences, and a
    /// strength consistent with the thresholds.
    #[test]
    fn prop_detected_patterns_are_consistent(
        thresholds in ordered_thresholds(),
        sessions in prop::collection::vec(
            prop::collection::vec(prop::sample::select(vec!["tabs", "spaces", " tabs ", "tests first"]), 0..4),
            0..12,
        ),
    ) {
        let records: Vec<_> = sessions
            .into_iter()
            .enumerate()
            .map(|(i, prefs)| session(i, prefs.into_iter().map(str::to_string).collect()))
            .collect();

        let patterns = detect_patterns(&records, &thresholds, Utc::now());

        for pattern in &patterns {
            prop_assert_eq!(pattern.occurrences, pattern.evidence.len());
            let mut unique = pattern.evidence.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), pattern.evidence.len());
            prop_assert_eq!(Some(pattern.strength), thresholds.classify(pattern.occurrences));
            prop_assert_eq!(pattern.description.trim(), pattern.description.as_str());
        }
        let mut descriptions: Vec<_> = patterns.iter().map(|p| p.description.as_str()).collect();
        descriptions.dedup();
        prop_assert_eq!(descriptions.len(), patterns.len());
    }

    /// Ids depend only on category and description.
    #[test]
    fn prop_pattern_id_is_deterministic(description in "\\PC{0,80}") {
        for category in PatternCategory::all() {
            let id = pattern_id(category, &description);
            prop_assert_eq!(&id, &pattern_id(category, &description));
            let (prefix, hash) = id.split_once('_').unwrap();
            prop_assert_eq!(prefix, category.id_prefix());
            prop_assert_eq!(hash.len(), 12);
            prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}

// ============================================================================
// Redaction Properties
// ============================================================================

proptest! {
    /// Credential assignments lose their value.
    #[test]
    fn prop_credential_values_are_redacted(
        key in prop::sample::select(vec!["api_key", "API-KEY", "password", "secret_key", "auth_token", "db_token"]),
        separator in prop::sample::select(vec!["=", ": ", " = "]),
        value in "[a-z0-9]{8,16}",
        prefix in "[a-z ]{0,20}",
    ) {
        let secret = format!("s3cr{value}");
        let text = format!("{prefix}{key}{separator}{secret} done");

        let (redacted, count) = Redactor::new().redact_str(&text);

        prop_assert!(!redacted.contains(&secret), "{} -> {}", text, redacted);
        prop_assert!(count >= 1);
    }

    /// Text without secret shapes passes through untouched.
    #[test]
    fn prop_plain_text_is_untouched(text in "[a-o]{1,10}( [a-o]{1,10}){0,8}") {
        let (redacted, count) = Redactor::new().redact_str(&text);
        prop_assert_eq!(redacted, text);
        prop_assert_eq!(count, 0);
    }
}

// ============================================================================
// Parser Robustness
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Arbitrary transcript lines never panic and every line is accounted for.
    #[test]
    fn prop_transcript_parsing_never_panics(lines in prop::collection::vec("\\PC{0,60}", 0..30)) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();

        let parsed = parse_transcript(&path, &Deadline::start("test", Duration::from_secs(30))).unwrap();

        prop_assert!(parsed.records.len() + parsed.malformed_lines <= lines.len());
    }

    /// Arbitrary config documents never panic.
    #[test]
    fn prop_config_parsing_never_panics(body in "\\PC{0,200}") {
        let _ = PmsConfig::from_markdown(&format!("---\n{body}\n---\n"));
        let _ = PmsConfig::from_markdown(&body);
    }
}
