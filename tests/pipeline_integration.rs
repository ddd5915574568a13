//! End-to-end pipeline tests.
//!
//! Encode sessions, extract patterns and synthesize rules against a real
//! temporary project directory.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::fmt::Write as _;
use std::thread;

use pms::models::{CategoryPatternFile, SessionIndex};
use pms::rendering::parse_rule_front_matter;
use pms::services::{EncodeOutcome, EncodeReport, ExtractionReport, RecoveryManager};
use pms::{
    DocumentStore, EncodeRequest, Encoder, EncodingMode, EpisodicRecord, ExtractionOutcome,
    Extractor, MemoryLayout, MonthlyAggregate, PatternCategory, PmsConfig, SemanticPattern,
    Strength, SynthesisOutcome, Synthesizer, Thresholds, Trigger,
};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_config() -> PmsConfig {
    let mut config = PmsConfig::default();
    config.encoding.transcripts_dir = None;
    config.processing.continuous_mode = false;
    config
}

fn thresholds(min_sessions: usize) -> Thresholds {
    Thresholds {
        min_sessions,
        emerging: 2,
        strong: 3,
        critical: 5,
    }
}

fn encode(encoder: &Encoder<'_>, request: EncodeRequest) -> EncodeReport {
    match encoder.encode(request).expect("encode failed") {
        EncodeOutcome::Encoded(report) => report,
        other => panic!("expected a record, got {other:?}"),
    }
}

fn extracted(outcome: ExtractionOutcome) -> ExtractionReport {
    match outcome {
        ExtractionOutcome::Extracted(report) => report,
        other => panic!("expected extraction, got {other:?}"),
    }
}

/// Encodes four sessions; the first three share a preference.
fn encode_httponly_sessions(encoder: &Encoder<'_>) {
    for i in 1..=4 {
        let prefs = if i <= 3 {
            vec!["Use HTTPOnly cookies"]
        } else {
            vec!["Prefer small commits"]
        };
        encode(
            encoder,
            EncodeRequest::new(Trigger::SessionEnd)
                .with_session_id(format!("session-{i}"))
                .with_context(json!({
                    "task_summary": format!("Auth work, part {i}"),
                    "user_preferences": prefs,
                })),
        );
    }
}

fn without_timestamps(patterns: &[SemanticPattern]) -> Vec<(PatternCategory, String, Strength, usize, Vec<String>)> {
    patterns
        .iter()
        .map(|p| {
            (
                p.category,
                p.description.clone(),
                p.strength,
                p.occurrences,
                p.evidence.clone(),
            )
        })
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_extraction_happy_path() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    let encoder = Encoder::new(&config, dir.path());
    encode_httponly_sessions(&encoder);

    let report = extracted(
        Extractor::new(&config, dir.path())
            .extract(3, &thresholds(3))
            .unwrap(),
    );

    assert_eq!(report.sessions_analyzed, 4);
    assert_eq!(report.patterns.len(), 1);
    let pattern = &report.patterns[0];
    assert_eq!(pattern.description, "Use HTTPOnly cookies");
    assert_eq!(pattern.occurrences, 3);
    assert_eq!(pattern.strength, Strength::Strong);
    assert_eq!(pattern.evidence, vec!["session-1", "session-2", "session-3"]);
    assert!(pattern.pattern_id.starts_with("pref_"));
}

#[test]
fn test_insufficient_data_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    let encoder = Encoder::new(&config, dir.path());
    for i in 0..2 {
        encode(
            &encoder,
            EncodeRequest::new(Trigger::Manual).with_context(json!({
                "task_summary": format!("task {i}"),
                "code_patterns": ["Builder for configs"],
            })),
        );
    }

    let outcome = Extractor::new(&config, dir.path())
        .extract(3, &thresholds(3))
        .unwrap();

    assert!(matches!(
        outcome,
        ExtractionOutcome::InsufficientData { sessions: 2, required: 3, .. }
    ));
    let layout = MemoryLayout::new(dir.path());
    assert!(layout.semantic_paths().iter().all(|p| !p.exists()));
}

#[test]
fn test_malformed_jsonl_lines_are_skipped() {
    let dir = TempDir::new().unwrap();
    let transcript = dir.path().join("transcript.jsonl");
    let mut contents = String::new();
    for i in 0..10 {
        writeln!(
            contents,
            r#"{{"type":"assistant","tool_name":"Read","tool_input":{{"file_path":"src/m{i}.rs"}}}}"#
        )
        .unwrap();
        if i % 4 == 1 {
            contents.push_str("{\"truncated\": \n");
        }
    }
    std::fs::write(&transcript, contents).unwrap();

    let config = test_config();
    let encoder = Encoder::new(&config, dir.path());
    let report = encode(
        &encoder,
        EncodeRequest::new(Trigger::PreCompact)
            .with_session_id("jsonl-session")
            .with_transcript(&transcript),
    );

    assert_eq!(report.encoding_mode, EncodingMode::JsonlFallback);
    assert_eq!(report.skipped_lines, 3);
    assert!(report.limitations.contains(&"Skipped 3 malformed JSONL lines".to_string()));

    let aggregate = DocumentStore::new()
        .read::<MonthlyAggregate>(&MemoryLayout::new(dir.path()).aggregate_path_for(&report.aggregate))
        .unwrap()
        .loaded()
        .unwrap();
    let record = &aggregate.sessions[0];
    let summary = record.transcript.as_ref().unwrap();
    assert_eq!(summary.record_count, 10);
    assert_eq!(summary.malformed_lines, 3);
    assert_eq!(record.context.files_modified.len(), 10);
    assert_eq!(record.work_summary, "Used tools: Read");
    assert_eq!(record.task_summary, "Session with 10 transcript records");
}

#[test]
fn test_synthesis_filters_by_strength() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();
    let pattern = |id: &str, strength| SemanticPattern {
        pattern_id: id.to_string(),
        description: format!("Never {id}"),
        category: PatternCategory::AntiPattern,
        strength,
        occurrences: 4,
        evidence: vec!["a".into(), "b".into(), "c".into(), "d".into()],
        detected_at: now,
    };
    let patterns = vec![
        pattern("anti_emerging", Strength::Emerging),
        pattern("anti_strong", Strength::Strong),
        pattern("anti_critical", Strength::Critical),
    ];

    let synthesizer = Synthesizer::new(dir.path());
    let SynthesisOutcome::Written(report) = synthesizer
        .synthesize(&patterns, Strength::Strong, true)
        .unwrap()
    else {
        panic!("expected rules to be written");
    };

    assert_eq!(report.pattern_count, 2);
    let markdown =
        std::fs::read_to_string(synthesizer.layout().rule_path(PatternCategory::AntiPattern)).unwrap();
    assert!(markdown.contains("Never anti_strong"));
    assert!(markdown.contains("Never anti_critical"));
    assert!(!markdown.contains("anti_emerging"));
    assert_eq!(parse_rule_front_matter(&markdown).unwrap().pattern_count, 2);
}

#[test]
fn test_corrupt_aggregate_is_reported_and_skipped() {
    let dir = TempDir::new().unwrap();
    let layout = MemoryLayout::new(dir.path());
    layout.ensure_dirs().unwrap();
    let store = DocumentStore::new();
    for month in 1..=3 {
        let ts = Utc.with_ymd_and_hms(2025, month, 10, 12, 0, 0).unwrap();
        let mut aggregate = MonthlyAggregate::default();
        for n in 0..2 {
            let mut record = EpisodicRecord::new(
                format!("m{month}-{n}"),
                ts,
                dir.path().to_string_lossy(),
                Trigger::SessionEnd,
                EncodingMode::Context,
            );
            record.task_summary = "work".to_string();
            record.anti_patterns = vec!["Avoid unwrap in library code".to_string()];
            aggregate.append(record);
        }
        store.write(&layout.aggregate_path(ts), &aggregate).unwrap();
    }
    std::fs::write(layout.aggregate_path_for("sessions-2025-02.json"), "{\"sessions\": [{").unwrap();

    let validation = RecoveryManager::new(dir.path()).validate().unwrap();
    let invalid: Vec<_> = validation.invalid().map(|d| d.path.clone()).collect();
    assert_eq!(invalid, vec![layout.aggregate_path_for("sessions-2025-02.json")]);

    let report = extracted(
        Extractor::new(&test_config(), dir.path())
            .extract(3, &thresholds(3))
            .unwrap(),
    );
    assert_eq!(report.corrupt_files, vec!["sessions-2025-02.json"]);
    assert_eq!(report.aggregates_read, 2);
    assert_eq!(report.sessions_analyzed, 4);
    assert_eq!(report.patterns[0].occurrences, 4);
    assert_eq!(report.patterns[0].evidence, vec!["m1-0", "m1-1", "m3-0", "m3-1"]);
}

#[test]
fn test_extraction_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    encode_httponly_sessions(&Encoder::new(&config, dir.path()));
    let extractor = Extractor::new(&config, dir.path());

    let first = extracted(extractor.extract(1, &thresholds(1)).unwrap());
    let second = extracted(extractor.extract(1, &thresholds(1)).unwrap());

    assert_eq!(without_timestamps(&first.patterns), without_timestamps(&second.patterns));
    let ids = |r: &ExtractionReport| r.patterns.iter().map(|p| p.pattern_id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn test_full_pipeline_to_rules() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    encode_httponly_sessions(&Encoder::new(&config, dir.path()));

    let report = extracted(
        Extractor::new(&config, dir.path())
            .extract(4, &thresholds(4))
            .unwrap(),
    );
    let prefs = DocumentStore::new()
        .read::<CategoryPatternFile>(&MemoryLayout::new(dir.path()).category_path(PatternCategory::Preference))
        .unwrap()
        .loaded()
        .unwrap();
    assert_eq!(prefs.patterns, report.patterns);

    let synthesizer = Synthesizer::new(dir.path());
    let patterns = synthesizer.load_patterns().unwrap();
    let SynthesisOutcome::Written(written) = synthesizer
        .synthesize(&patterns, Strength::Strong, true)
        .unwrap()
    else {
        panic!("expected rules to be written");
    };
    assert_eq!(written.written.len(), 1);

    let markdown =
        std::fs::read_to_string(synthesizer.layout().rule_path(PatternCategory::Preference)).unwrap();
    assert!(markdown.contains("## Use HTTPOnly cookies"));
    assert!(markdown.contains("Observed 3 times (strong pattern)."));
    assert!(markdown.contains("- session-2"));
}

#[test]
fn test_concurrent_encoders_lose_no_records() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().to_path_buf();

    let handles: Vec<_> = (0..6)
        .map(|worker| {
            let project = project.clone();
            thread::spawn(move || {
                let config = test_config();
                let encoder = Encoder::new(&config, &project);
                for n in 0..5 {
                    encode(
                        &encoder,
                        EncodeRequest::new(Trigger::Manual)
                            .with_session_id(format!("w{worker}-{n}"))
                            .with_context(json!({"task_summary": "parallel"})),
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let layout = MemoryLayout::new(&project);
    let store = DocumentStore::new();
    let total: usize = layout
        .aggregate_paths()
        .unwrap()
        .iter()
        .map(|p| store.read::<MonthlyAggregate>(p).unwrap().loaded().unwrap().count)
        .sum();
    assert_eq!(total, 30);
    let index = store
        .read::<SessionIndex>(&layout.index_path())
        .unwrap()
        .loaded()
        .unwrap();
    assert_eq!(index.len(), 30);
}

// ============================================================================
// Session Identity
// ============================================================================

#[test]
fn test_repeated_captures_of_one_session_count_once() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    let encoder = Encoder::new(&config, dir.path());
    let request = |trigger: Trigger| {
        EncodeRequest::new(trigger)
            .with_session_id("one-session")
            .with_context(json!({
                "task_summary": format!("captured at {trigger}"),
                "user_preferences": ["Use HTTPOnly cookies"],
            }))
    };

    let first = encode(&encoder, request(Trigger::PreCompact));
    for trigger in [Trigger::SessionEnd, Trigger::Manual] {
        let outcome = encoder.encode(request(trigger)).unwrap();
        assert!(
            matches!(outcome, EncodeOutcome::AlreadyRecorded { ref aggregate, .. } if *aggregate == first.aggregate),
            "{outcome:?}"
        );
    }

    let layout = MemoryLayout::new(dir.path());
    let store = DocumentStore::new();
    let copies: usize = layout
        .aggregate_paths()
        .unwrap()
        .iter()
        .map(|p| {
            let aggregate = store.read::<MonthlyAggregate>(p).unwrap().loaded().unwrap();
            aggregate
                .sessions
                .iter()
                .filter(|s| s.session_id == "one-session")
                .count()
        })
        .sum();
    assert_eq!(copies, 1);

    let outcome = Extractor::new(&config, dir.path())
        .extract(3, &thresholds(3))
        .unwrap();
    assert_eq!(
        outcome,
        ExtractionOutcome::InsufficientData {
            sessions: 1,
            required: 3,
            corrupt_files: Vec::new()
        }
    );
}

#[test]
fn test_index_entries_point_at_the_only_copy() {
    let dir = TempDir::new().unwrap();
    let config = test_config();
    let layout = MemoryLayout::new(dir.path());
    let store = DocumentStore::new();
    let december = Utc.with_ymd_and_hms(2024, 12, 31, 23, 30, 0).unwrap();
    let mut older = MonthlyAggregate::default();
    for id in ["spans-new-year", "stays-put"] {
        older.append(EpisodicRecord::new(
            id,
            december,
            dir.path().display().to_string(),
            Trigger::PreCompact,
            EncodingMode::Context,
        ));
    }
    store.write(&layout.aggregate_path(december), &older).unwrap();
    RecoveryManager::new(dir.path()).rebuild_index().unwrap();

    let encoder = Encoder::new(&config, dir.path());
    let repeated = encoder
        .encode(
            EncodeRequest::new(Trigger::SessionEnd)
                .with_session_id("spans-new-year")
                .with_context(json!({"task_summary": "finished after midnight"})),
        )
        .unwrap();
    assert!(matches!(repeated, EncodeOutcome::AlreadyRecorded { .. }));
    encode(
        &encoder,
        EncodeRequest::new(Trigger::SessionEnd)
            .with_session_id("new-year-work")
            .with_context(json!({"task_summary": "fresh session"})),
    );

    let index = store
        .read::<SessionIndex>(&layout.index_path())
        .unwrap()
        .loaded()
        .unwrap();
    assert_eq!(index.len(), 3);
    let mut seen = 0;
    for path in layout.aggregate_paths().unwrap() {
        let aggregate = store.read::<MonthlyAggregate>(&path).unwrap().loaded().unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        for session in &aggregate.sessions {
            assert_eq!(index.get(&session.session_id), Some(name.as_str()));
            seen += 1;
        }
    }
    assert_eq!(seen, 3);
    let validation = RecoveryManager::new(dir.path()).validate().unwrap();
    assert!(validation.is_ok());
    assert_eq!(validation.warning_count(), 0, "{validation}");
}

#[test]
fn test_redaction_markers_never_become_patterns() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.privacy.custom_patterns = vec!["(broken".to_string()];
    let encoder = Encoder::new(&config, dir.path());

    for i in 0..5 {
        encode(
            &encoder,
            EncodeRequest::new(Trigger::SessionEnd)
                .with_session_id(format!("marked-{i}"))
                .with_context(json!({
                    "task_summary": format!("task {i}"),
                    "user_preferences": [format!("Preference number {i}")],
                    "anti_patterns": [format!("Mistake number {i}")],
                })),
        );
    }

    let layout = MemoryLayout::new(dir.path());
    let store = DocumentStore::new();
    let aggregate = store
        .read::<MonthlyAggregate>(&layout.aggregate_paths().unwrap()[0])
        .unwrap()
        .loaded()
        .unwrap();
    assert!(aggregate.sessions.iter().all(|s| s.user_preferences
        == vec![pms::security::REDACTION_ERROR_SENTINEL.to_string()]));

    let report = extracted(
        Extractor::new(&config, dir.path())
            .extract(1, &thresholds(1))
            .unwrap(),
    );
    assert_eq!(report.sessions_analyzed, 5);
    assert!(report.patterns.is_empty(), "unexpected patterns: {:?}", report.patterns);
    let raw = std::fs::read_to_string(layout.patterns_path()).unwrap();
    assert!(!raw.contains("REDACTED"));
}
