//! Encode command handler.

use anyhow::Context;
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pms::services::{EncodeOutcome, EncodeReport};
use pms::{
    EncodeRequest, Encoder, ExtractionOutcome, Extractor, PmsConfig, Strength, SynthesisOutcome,
    Synthesizer, Trigger,
};

use super::Status;

/// Encode command.
#[allow(clippy::too_many_arguments)]
pub fn cmd_encode(
    project: &Path,
    config: &PmsConfig,
    trigger: Trigger,
    session_id: Option<String>,
    transcript: Option<PathBuf>,
    context_file: Option<PathBuf>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<Status> {
    let mut request = EncodeRequest::new(trigger);
    if let Some(id) = session_id {
        request = request.with_session_id(id);
    }
    if let Some(path) = transcript {
        request = request.with_transcript(path);
    }
    if let Some(source) = context_file {
        request = request.with_context(read_context(&source)?);
    }
    if let Some(secs) = timeout_secs {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    match Encoder::new(config, project).encode(request)? {
        EncodeOutcome::Skipped { trigger } => {
            println!("Trigger '{trigger}' is disabled; nothing captured.");
            Ok(Status::Success)
        },
        EncodeOutcome::AlreadyRecorded {
            session_id,
            aggregate,
        } => {
            println!("Session {session_id} is already recorded in {aggregate}; nothing captured.");
            Ok(Status::Success)
        },
        EncodeOutcome::Encoded(report) => {
            print_report(&report);
            run_continuous(project, config);
            Ok(Status::from_degraded(report.degraded()))
        },
    }
}

/// Reads conversation context from a file, or stdin for `-`.
///
/// Text that is not JSON is passed through as a string; the encoder then
/// treats the context as unusable and falls back.
fn read_context(source: &Path) -> anyhow::Result<Value> {
    let raw = if source.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading context from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("reading context file {}", source.display()))?
    };
    Ok(parse_context(raw))
}

pub(super) fn parse_context(raw: String) -> Value {
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Context is not valid JSON");
            Value::String(raw)
        },
    }
}

fn print_report(report: &EncodeReport) {
    println!(
        "Encoded session {} ({}) into {}",
        report.session_id, report.encoding_mode, report.aggregate
    );
    if report.redactions > 0 {
        println!("  Redactions: {}", report.redactions);
    }
    if report.skipped_lines > 0 {
        println!("  Skipped transcript lines: {}", report.skipped_lines);
    }
    if !report.index_updated {
        println!("  Session index is stale; it will be rebuilt on the next lookup.");
    }
    for note in &report.limitations {
        println!("  Limitation: {note}");
    }
}

/// Runs extraction (and optionally synthesis) after a capture.
///
/// Failures are logged and never affect the capture's result.
pub(super) fn run_continuous(project: &Path, config: &PmsConfig) {
    if !config.processing.continuous_mode {
        return;
    }

    let extractor = Extractor::new(config, project);
    match extractor.extract(config.thresholds.min_sessions, &config.thresholds) {
        Ok(ExtractionOutcome::Extracted(report)) => {
            tracing::info!(patterns = report.patterns.len(), "Continuous extraction complete");
            if config.processing.auto_synthesize {
                let synthesizer = Synthesizer::new(project);
                match synthesizer.synthesize(&report.patterns, Strength::Strong, true) {
                    Ok(SynthesisOutcome::Written(written)) => {
                        tracing::info!(rules = written.written.len(), "Auto-synthesis complete");
                    },
                    Ok(_) => {},
                    Err(e) => tracing::warn!(error = %e, "Auto-synthesis failed"),
                }
            }
        },
        Ok(ExtractionOutcome::InsufficientData { sessions, required, .. }) => {
            tracing::debug!(sessions, required, "Continuous extraction deferred");
        },
        Ok(ExtractionOutcome::TimedOut { budget, .. }) => {
            tracing::warn!(budget_secs = budget.as_secs(), "Continuous extraction timed out");
        },
        Err(e) => tracing::warn!(error = %e, "Continuous extraction failed"),
    }
}
