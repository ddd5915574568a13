//! Command handlers module.
//!
//! - `encode.rs`: episodic capture (`encode`) and the continuous pipeline
//! - `hook.rs`: host-agent hook events
//! - `pipeline.rs`: extraction and synthesis
//! - `recovery.rs`: validation, quarantine, rebuild and reset

mod encode;
mod hook;
mod pipeline;
mod recovery;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Subcommand;
use pms::Trigger;

pub use encode::cmd_encode;
pub use hook::cmd_hook;
pub use pipeline::{cmd_extract, cmd_synthesize};
pub use recovery::cmd_recovery;

/// Exit code for a valid but degraded result.
const DEGRADED_EXIT_CODE: u8 = 3;

/// How a command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Completed normally.
    Success,
    /// Completed with a partial, minimal or empty result.
    Degraded,
}

impl Status {
    /// Process exit code for the status.
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::Degraded => ExitCode::from(DEGRADED_EXIT_CODE),
        }
    }

    /// `Degraded` when `degraded` is true.
    pub const fn from_degraded(degraded: bool) -> Self {
        if degraded { Self::Degraded } else { Self::Success }
    }
}

/// Hook events.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum HookEvent {
    /// Context window is about to be compacted.
    PreCompact,
    /// Session ended.
    SessionEnd,
    /// Agent stopped.
    Stop,
}

impl HookEvent {
    /// Returns the hook event as a lowercase hyphenated string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreCompact => "pre-compact",
            Self::SessionEnd => "session-end",
            Self::Stop => "stop",
        }
    }

    /// Trigger recorded for the event.
    pub const fn trigger(self) -> Trigger {
        match self {
            Self::PreCompact => Trigger::PreCompact,
            Self::SessionEnd => Trigger::SessionEnd,
            Self::Stop => Trigger::Stop,
        }
    }
}

/// Recovery subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum RecoveryAction {
    /// Validate every memory document.
    Validate,
    /// Move a document into `.backup/`.
    Quarantine {
        /// Document path (absolute, or relative to the memory root).
        path: PathBuf,
    },
    /// Recompute the semantic tier from all episodic sessions.
    RebuildSemantic,
    /// Rewrite the session index from the aggregates.
    RebuildIndex,
    /// Quarantine invalid documents and rebuild what depends on them.
    Repair,
    /// Delete derived output (and optionally episodic data).
    Reset {
        /// Also delete episodic data.
        #[arg(long)]
        remove_episodic: bool,

        /// Confirm the irreversible deletion.
        #[arg(long)]
        yes: bool,
    },
}
