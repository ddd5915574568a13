//! Extraction and synthesis command handlers.

use anyhow::Context;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use pms::services::{ExtractionReport, SynthesisPlan, SynthesisReport};
use pms::{ExtractionOutcome, Extractor, PmsConfig, Strength, SynthesisOutcome, Synthesizer};

use super::Status;

/// Extract command.
pub fn cmd_extract(
    project: &Path,
    config: &PmsConfig,
    min_sessions: Option<usize>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<Status> {
    let mut extractor = Extractor::new(config, project);
    if let Some(secs) = timeout_secs {
        extractor = extractor.with_timeout(Duration::from_secs(secs));
    }
    let min_sessions = min_sessions.unwrap_or(config.thresholds.min_sessions);

    match extractor.extract(min_sessions, &config.thresholds)? {
        ExtractionOutcome::Extracted(report) => {
            print_extraction(&report);
            Ok(Status::Success)
        },
        ExtractionOutcome::InsufficientData {
            sessions,
            required,
            corrupt_files,
        } => {
            println!("Insufficient data: {sessions} sessions available, {required} required.");
            print_corrupt(&corrupt_files);
            Ok(Status::Degraded)
        },
        ExtractionOutcome::TimedOut {
            budget,
            corrupt_files,
        } => {
            println!(
                "Extraction exceeded its {}s budget; nothing was written.",
                budget.as_secs()
            );
            print_corrupt(&corrupt_files);
            Ok(Status::Degraded)
        },
    }
}

fn print_extraction(report: &ExtractionReport) {
    println!(
        "Analyzed {} sessions from {} aggregates: {} patterns ({} strong or critical)",
        report.sessions_analyzed,
        report.aggregates_read,
        report.patterns.len(),
        report.strong_or_above
    );
    for (category, count) in &report.by_category {
        println!("  {category}: {count}");
    }
    print_corrupt(&report.corrupt_files);
}

fn print_corrupt(files: &[String]) {
    if files.is_empty() {
        return;
    }
    println!("Skipped corrupt aggregates (run `pms recovery repair`):");
    for file in files {
        println!("  {file}");
    }
}

/// Synthesize command.
pub fn cmd_synthesize(
    project: &Path,
    min_strength: Strength,
    auto_approve: bool,
) -> anyhow::Result<Status> {
    let synthesizer = Synthesizer::new(project);
    let patterns = synthesizer
        .load_patterns()
        .context("loading semantic patterns (run `pms recovery rebuild-semantic` if corrupt)")?;

    match synthesizer.synthesize(&patterns, min_strength, auto_approve)? {
        SynthesisOutcome::NoQualifyingPatterns {
            considered,
            min_strength,
        } => {
            println!("No patterns at or above '{min_strength}' ({considered} considered).");
            Ok(Status::Degraded)
        },
        SynthesisOutcome::Written(report) => {
            print_written(&report);
            Ok(Status::Success)
        },
        SynthesisOutcome::Proposed(plan) => {
            print_plan(&plan);
            if confirm("Write these rule documents?")? {
                print_written(&synthesizer.apply(plan)?);
            } else {
                println!("Nothing written.");
            }
            Ok(Status::Success)
        },
    }
}

fn print_plan(plan: &SynthesisPlan) {
    println!(
        "Proposed {} rule documents from {} patterns ({} below the cutoff):",
        plan.rules.len(),
        plan.pattern_count(),
        plan.filtered_out
    );
    for rule in &plan.rules {
        println!(
            "  rules/{} ({} patterns, {})",
            rule.filename,
            rule.source_patterns.len(),
            rule.strength
        );
    }
}

fn print_written(report: &SynthesisReport) {
    println!("Wrote {} rule documents ({} patterns):", report.written.len(), report.pattern_count);
    for path in &report.written {
        println!("  {}", path.display());
    }
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush().context("flushing prompt")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("reading confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
