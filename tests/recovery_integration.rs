//! Recovery tests against memory produced by the real pipeline.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use serde_json::json;

use pms::models::{PatternFile, SessionIndex};
use pms::{
    DocumentStore, EncodeRequest, Encoder, Error, ExtractionOutcome, Extractor, MemoryLayout,
    PmsConfig, RecoveryManager, Strength, SynthesisOutcome, Synthesizer, Thresholds, Trigger,
};
use tempfile::TempDir;

fn thresholds() -> Thresholds {
    Thresholds {
        min_sessions: 1,
        emerging: 2,
        strong: 3,
        critical: 5,
    }
}

/// Builds a project with three sessions, extracted patterns and rules.
fn populated_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let mut config = PmsConfig::default();
    config.encoding.transcripts_dir = None;
    let encoder = Encoder::new(&config, dir.path());
    for i in 0..3 {
        encoder
            .encode(
                EncodeRequest::new(Trigger::SessionEnd)
                    .with_session_id(format!("s{i}"))
                    .with_context(json!({
                        "task_summary": "refactor",
                        "code_patterns": ["Prefer iterators over index loops"],
                    })),
            )
            .unwrap();
    }

    let outcome = Extractor::new(&config, dir.path())
        .extract(1, &thresholds())
        .unwrap();
    assert!(matches!(outcome, ExtractionOutcome::Extracted(_)));

    let synthesizer = Synthesizer::new(dir.path());
    let patterns = synthesizer.load_patterns().unwrap();
    let outcome = synthesizer.synthesize(&patterns, Strength::Strong, true).unwrap();
    assert!(matches!(outcome, SynthesisOutcome::Written(_)));
    dir
}

#[test]
fn test_healthy_memory_validates() {
    let dir = populated_project();
    let report = RecoveryManager::new(dir.path()).validate().unwrap();

    assert!(report.initialized);
    assert!(report.is_ok(), "unexpected issues: {report}");
    assert_eq!(report.error_count(), 0);
}

#[test]
fn test_uninitialized_project() {
    let dir = TempDir::new().unwrap();
    let report = RecoveryManager::new(dir.path()).validate().unwrap();

    assert!(!report.initialized);
    assert!(report.to_string().contains("not initialized"));
}

#[test]
fn test_repair_rebuilds_corrupt_semantic_tier() {
    let dir = populated_project();
    let layout = MemoryLayout::new(dir.path());
    std::fs::write(layout.patterns_path(), "{\"patterns\": 7}").unwrap();

    let manager = RecoveryManager::new(dir.path());
    assert!(!manager.validate().unwrap().is_ok());

    let repair = manager.repair(&thresholds()).unwrap();
    assert_eq!(repair.quarantined.len(), 1);
    assert_eq!(repair.quarantined[0].0, layout.patterns_path());
    assert!(repair.quarantined[0].1.starts_with(layout.backup_dir()));
    assert!(repair.index_rebuilt.is_none());
    assert!(matches!(repair.semantic, Some(ExtractionOutcome::Extracted(_))));

    let patterns = DocumentStore::new()
        .read::<PatternFile>(&layout.patterns_path())
        .unwrap()
        .loaded()
        .unwrap();
    assert_eq!(patterns.count, 1);
    assert_eq!(patterns.patterns[0].occurrences, 3);
    assert!(manager.validate().unwrap().is_ok());
}

#[test]
fn test_repair_rebuilds_corrupt_index() {
    let dir = populated_project();
    let layout = MemoryLayout::new(dir.path());
    std::fs::write(layout.index_path(), "not json").unwrap();

    let repair = RecoveryManager::new(dir.path()).repair(&thresholds()).unwrap();

    assert_eq!(repair.index_rebuilt, Some(3));
    let index = DocumentStore::new()
        .read::<SessionIndex>(&layout.index_path())
        .unwrap()
        .loaded()
        .unwrap();
    assert!(index.get("s1").is_some());
}

#[test]
fn test_quarantine_rejects_paths_outside_memory() {
    let dir = populated_project();
    let outside = dir.path().join("Cargo.toml");
    std::fs::write(&outside, "[package]").unwrap();

    let result = RecoveryManager::new(dir.path()).quarantine(&outside);

    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert!(outside.exists());
}

#[test]
fn test_reset_keeps_episodic_memory() {
    let dir = populated_project();
    let layout = MemoryLayout::new(dir.path());
    let manager = RecoveryManager::new(dir.path());

    let report = manager.reset(true).unwrap();

    assert_eq!(report.removed.len(), 3);
    assert!(!layout.semantic_dir().exists());
    assert!(!layout.rules_dir().exists());
    assert!(!layout.aggregate_paths().unwrap().is_empty());
    let backup = report.episodic_backup.unwrap();
    assert!(backup.join("index.json").is_file());

    let rebuilt = manager.rebuild_semantic(&thresholds()).unwrap();
    assert!(matches!(rebuilt, ExtractionOutcome::Extracted(_)));
}

#[test]
fn test_full_reset_then_rebuild_has_nothing_to_read() {
    let dir = populated_project();
    let layout = MemoryLayout::new(dir.path());
    let manager = RecoveryManager::new(dir.path());
    let aggregates: Vec<_> = layout
        .aggregate_paths()
        .unwrap()
        .into_iter()
        .map(|path| {
            let bytes = std::fs::read(&path).unwrap();
            (path.file_name().unwrap().to_owned(), bytes)
        })
        .collect();

    let report = manager.reset(false).unwrap();

    assert!(!layout.is_initialized());
    let backup = report.episodic_backup.unwrap();
    for (name, bytes) in &aggregates {
        assert_eq!(&std::fs::read(backup.join(name)).unwrap(), bytes);
    }
    assert!(matches!(
        manager.rebuild_semantic(&thresholds()),
        Err(Error::InvalidInput(_))
    ));
}
