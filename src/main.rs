//! Binary entry point for pms.
//!
//! Exit codes: 0 success, 1 failure, 3 degraded success (partial or minimal
//! record, insufficient data, extraction timeout, nothing to synthesize,
//! validation errors found). Hooks always exit 0.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use commands::{
    HookEvent, RecoveryAction, Status, cmd_encode, cmd_extract, cmd_hook, cmd_recovery,
    cmd_synthesize,
};
use pms::observability::{self, LogFormat, LoggingConfig};
use pms::{PmsConfig, Strength, Trigger};

/// Project directory exported by the host agent to its hooks.
const HOST_PROJECT_ENV: &str = "CLAUDE_PROJECT_DIR";

/// PMS - project-scoped behavioral memory for AI coding assistants.
#[derive(Parser)]
#[command(name = "pms")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory (default: current directory).
    #[arg(short, long, global = true, env = "PMS_PROJECT_PATH")]
    project_path: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format: pretty or json.
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Capture one session into episodic memory.
    Encode {
        /// What caused the capture: precompact, session-end, stop or manual.
        #[arg(short, long, default_value = "manual")]
        trigger: Trigger,

        /// Session id (a UUID is generated when omitted).
        #[arg(short, long)]
        session_id: Option<String>,

        /// Transcript (JSONL) to fall back on.
        #[arg(long)]
        transcript: Option<PathBuf>,

        /// Conversation context JSON file, or `-` for stdin.
        #[arg(short, long)]
        context_file: Option<PathBuf>,

        /// Encoding budget in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Handle a host-agent hook event (payload on stdin).
    Hook {
        /// The hook event.
        #[command(subcommand)]
        event: HookEvent,
    },

    /// Extract semantic patterns from episodic memory.
    Extract {
        /// Minimum sessions required.
        #[arg(long)]
        min_sessions: Option<usize>,

        /// Extraction budget in seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Synthesize rule documents from semantic patterns.
    Synthesize {
        /// Lowest strength to include: emerging, strong or critical.
        #[arg(long, default_value = "strong")]
        min_strength: Strength,

        /// Write without asking for confirmation.
        #[arg(long)]
        auto_approve: bool,
    },

    /// Validate, quarantine, rebuild or reset memory.
    Recovery {
        /// Recovery action.
        #[command(subcommand)]
        action: RecoveryAction,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig::from_env(cli.verbose, cli.log_format);
    if let Err(e) = observability::init(&logging) {
        eprintln!("Failed to initialize logging: {e}");
        if !matches!(cli.command, Commands::Hook { .. }) {
            return ExitCode::FAILURE;
        }
    }

    let project_override = cli
        .project_path
        .or_else(|| std::env::var_os(HOST_PROJECT_ENV).map(PathBuf::from));

    if let Commands::Hook { event } = cli.command {
        return cmd_hook(event, project_override.as_deref()).exit_code();
    }

    let project = match project_override.map_or_else(std::env::current_dir, Ok) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: cannot determine project directory: {e}");
            return ExitCode::FAILURE;
        },
    };
    let config = PmsConfig::load(&project);

    match run(cli.command, &project, &config) {
        Ok(status) => status.exit_code(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn run(command: Commands, project: &std::path::Path, config: &PmsConfig) -> anyhow::Result<Status> {
    match command {
        Commands::Encode {
            trigger,
            session_id,
            transcript,
            context_file,
            timeout,
        } => cmd_encode(
            project,
            config,
            trigger,
            session_id,
            transcript,
            context_file,
            timeout,
        ),
        Commands::Hook { event } => Ok(cmd_hook(event, Some(project))),
        Commands::Extract {
            min_sessions,
            timeout,
        } => cmd_extract(project, config, min_sessions, timeout),
        Commands::Synthesize {
            min_strength,
            auto_approve,
        } => cmd_synthesize(project, min_strength, auto_approve),
        Commands::Recovery { action } => cmd_recovery(project, config, action),
    }
}
