//! Recovery command handler.

use anyhow::bail;
use std::path::Path;

use pms::services::RepairReport;
use pms::{ExtractionOutcome, PmsConfig, RecoveryManager};

use super::{RecoveryAction, Status};

/// Recovery command.
pub fn cmd_recovery(
    project: &Path,
    config: &PmsConfig,
    action: RecoveryAction,
) -> anyhow::Result<Status> {
    let manager = RecoveryManager::new(project).with_extract_timeout(config.timeouts.extract);

    match action {
        RecoveryAction::Validate => {
            let report = manager.validate()?;
            println!("{report}");
            Ok(Status::from_degraded(!report.is_ok()))
        },
        RecoveryAction::Quarantine { path } => {
            let backup = manager.quarantine(&path)?;
            println!("Moved {} to {}", path.display(), backup.display());
            Ok(Status::Success)
        },
        RecoveryAction::RebuildSemantic => {
            let outcome = manager.rebuild_semantic(&config.thresholds)?;
            Ok(print_semantic(&outcome))
        },
        RecoveryAction::RebuildIndex => {
            let entries = manager.rebuild_index()?;
            println!("Rebuilt session index with {entries} entries.");
            Ok(Status::Success)
        },
        RecoveryAction::Repair => {
            let report = manager.repair(&config.thresholds)?;
            Ok(print_repair(&report))
        },
        RecoveryAction::Reset {
            remove_episodic,
            yes,
        } => {
            if !yes {
                bail!("reset is irreversible; pass --yes to confirm");
            }
            let report = manager.reset(!remove_episodic)?;
            if let Some(backup) = &report.episodic_backup {
                println!("Backed up episodic memory to {}", backup.display());
            }
            if report.removed.is_empty() {
                println!("Nothing to remove.");
            }
            for dir in &report.removed {
                println!("Removed {}", dir.display());
            }
            Ok(Status::Success)
        },
    }
}

fn print_semantic(outcome: &ExtractionOutcome) -> Status {
    match outcome {
        ExtractionOutcome::Extracted(report) => {
            println!(
                "Rebuilt semantic tier: {} patterns from {} sessions.",
                report.patterns.len(),
                report.sessions_analyzed
            );
            for file in &report.corrupt_files {
                println!("  Skipped corrupt aggregate {file}");
            }
            Status::Success
        },
        ExtractionOutcome::TimedOut { budget, .. } => {
            println!(
                "Semantic rebuild exceeded its {}s budget; nothing was written.",
                budget.as_secs()
            );
            Status::Degraded
        },
        ExtractionOutcome::InsufficientData { sessions, .. } => {
            println!("Semantic rebuild skipped: {sessions} sessions.");
            Status::Degraded
        },
    }
}

fn print_repair(report: &RepairReport) -> Status {
    if report.quarantined.is_empty() {
        println!("No invalid documents found.");
        return Status::Success;
    }
    for (original, backup) in &report.quarantined {
        println!("Quarantined {} -> {}", original.display(), backup.display());
    }
    if let Some(entries) = report.index_rebuilt {
        println!("Rebuilt session index with {entries} entries.");
    }
    match &report.semantic {
        Some(outcome) => print_semantic(outcome),
        None => Status::Success,
    }
}
