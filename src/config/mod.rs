//! Configuration management.
//!
//! [`PmsConfig`] is built once per invocation and handed to every component
//! by reference. Components never read the environment themselves.

mod front_matter;

pub use front_matter::{ConfigFile, extract_front_matter};

use crate::models::{Strength, Trigger};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the project-level configuration file inside `.claude/`.
pub const CONFIG_FILE_NAME: &str = "pms.local.md";

/// Pattern-detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Sessions required before extraction runs.
    pub min_sessions: usize,
    /// Minimum occurrences for an emerging pattern.
    pub emerging: usize,
    /// Minimum occurrences for a strong pattern.
    pub strong: usize,
    /// Minimum occurrences for a critical pattern.
    pub critical: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_sessions: 10,
            emerging: 2,
            strong: 3,
            critical: 5,
        }
    }
}

impl Thresholds {
    /// Checks `emerging <= strong <= critical`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the ordering is violated.
    pub fn validate(&self) -> Result<()> {
        if self.emerging > self.strong || self.strong > self.critical {
            return Err(Error::InvalidConfig(format!(
                "thresholds must satisfy emerging <= strong <= critical (got {}/{}/{})",
                self.emerging, self.strong, self.critical
            )));
        }
        Ok(())
    }

    /// Classifies an occurrence count. `None` below the emerging threshold.
    ///
    /// Boundaries are inclusive.
    #[must_use]
    pub const fn classify(&self, occurrences: usize) -> Option<Strength> {
        if occurrences >= self.critical {
            Some(Strength::Critical)
        } else if occurrences >= self.strong {
            Some(Strength::Strong)
        } else if occurrences >= self.emerging {
            Some(Strength::Emerging)
        } else {
            None
        }
    }
}

/// Wall-clock budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Budget for one encoding run.
    pub encode: Duration,
    /// Budget for one extraction run.
    pub extract: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            encode: Duration::from_secs(30),
            extract: Duration::from_secs(60),
        }
    }
}

/// Which hook triggers capture sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSettings {
    /// Capture before context compaction.
    pub precompact: bool,
    /// Capture at session end.
    pub session_end: bool,
    /// Capture on every stop.
    pub stop: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            precompact: true,
            session_end: true,
            stop: false,
        }
    }
}

impl TriggerSettings {
    /// Whether a trigger should capture. Manual capture is always enabled.
    #[must_use]
    pub const fn is_enabled(&self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::PreCompact => self.precompact,
            Trigger::SessionEnd => self.session_end,
            Trigger::Stop => self.stop,
            Trigger::Manual => true,
        }
    }
}

/// Follow-up processing after each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingSettings {
    /// Run extraction after every successful encode.
    pub continuous_mode: bool,
    /// Run synthesis (auto-approved) after every successful extraction.
    pub auto_synthesize: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            continuous_mode: true,
            auto_synthesize: false,
        }
    }
}

/// Encoding strategy selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingSettings {
    /// Try caller-supplied context first.
    pub prefer_context: bool,
    /// Fall back to the JSONL transcript.
    pub fallback_jsonl: bool,
    /// Where session transcripts live (`~/.claude/projects`).
    pub transcripts_dir: Option<PathBuf>,
}

impl Default for EncodingSettings {
    fn default() -> Self {
        Self {
            prefer_context: true,
            fallback_jsonl: true,
            transcripts_dir: default_transcripts_dir(),
        }
    }
}

/// Returns `~/.claude/projects`, if a home directory can be resolved.
#[must_use]
pub fn default_transcripts_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".claude").join("projects"))
}

/// Redaction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivacySettings {
    /// Redact records before persisting.
    pub redact_sensitive: bool,
    /// Project-specific regexes appended after the defaults.
    pub custom_patterns: Vec<String>,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            redact_sensitive: true,
            custom_patterns: Vec::new(),
        }
    }
}

/// Main configuration for pms.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PmsConfig {
    /// Trigger toggles.
    pub triggers: TriggerSettings,
    /// Follow-up processing toggles.
    pub processing: ProcessingSettings,
    /// Pattern thresholds.
    pub thresholds: Thresholds,
    /// Encoding strategy.
    pub encoding: EncodingSettings,
    /// Redaction.
    pub privacy: PrivacySettings,
    /// Deadlines.
    pub timeouts: Timeouts,
}

impl PmsConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the project configuration file.
    #[must_use]
    pub fn path_for(project_path: &Path) -> PathBuf {
        project_path.join(".claude").join(CONFIG_FILE_NAME)
    }

    /// Loads `<project>/.claude/pms.local.md`.
    ///
    /// A missing file, a file without front-matter or unparseable YAML all
    /// yield the defaults. Out-of-range values are clamped.
    #[must_use]
    pub fn load(project_path: &Path) -> Self {
        let path = Self::path_for(project_path);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read config, using defaults");
                return Self::default();
            },
        };

        match Self::from_markdown(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            },
        }
    }

    /// Parses the YAML front-matter of a markdown document.
    ///
    /// # Errors
    ///
    /// Returns an error if the front-matter is not valid YAML for
    /// [`ConfigFile`]. A document without front-matter yields the defaults.
    pub fn from_markdown(contents: &str) -> Result<Self> {
        let Some(yaml) = extract_front_matter(contents) else {
            return Ok(Self::default());
        };
        let file = ConfigFile::parse(yaml)?;
        Ok(Self::from_config_file(file))
    }

    /// Converts a parsed [`ConfigFile`], clamping every numeric value.
    #[must_use]
    pub fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(triggers) = file.triggers {
            if let Some(v) = triggers.precompact {
                config.triggers.precompact = v;
            }
            if let Some(v) = triggers.session_end {
                config.triggers.session_end = v;
            }
            if let Some(v) = triggers.stop {
                config.triggers.stop = v;
            }
        }
        if let Some(processing) = file.processing {
            if let Some(v) = processing.continuous_mode {
                config.processing.continuous_mode = v;
            }
            if let Some(v) = processing.auto_synthesize {
                config.processing.auto_synthesize = v;
            }
        }
        if let Some(thresholds) = file.thresholds {
            if let Some(v) = thresholds.min_sessions {
                config.thresholds.min_sessions = clamp(v, 1, 1000);
            }
            if let Some(v) = thresholds.emerging_pattern {
                config.thresholds.emerging = clamp(v, 1, 100);
            }
            if let Some(v) = thresholds.strong_pattern {
                config.thresholds.strong = clamp(v, 1, 100);
            }
            if let Some(v) = thresholds.critical_pattern {
                config.thresholds.critical = clamp(v, 1, 100);
            }
        }
        if let Some(encoding) = file.encoding {
            if let Some(v) = encoding.prefer_context {
                config.encoding.prefer_context = v;
            }
            if let Some(v) = encoding.fallback_jsonl {
                config.encoding.fallback_jsonl = v;
            }
            if let Some(dir) = encoding.transcripts_dir {
                config.encoding.transcripts_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(privacy) = file.privacy {
            if let Some(v) = privacy.redact_sensitive {
                config.privacy.redact_sensitive = v;
            }
            if let Some(patterns) = privacy.custom_redaction_patterns {
                config.privacy.custom_patterns = patterns;
            }
        }
        if let Some(timeouts) = file.timeouts {
            if let Some(v) = timeouts.encode {
                config.timeouts.encode = Duration::from_secs(clamp(v, 5, 300) as u64);
            }
            if let Some(v) = timeouts.extract {
                config.timeouts.extract = Duration::from_secs(clamp(v, 5, 600) as u64);
            }
        }

        config
    }

    /// Validates cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when thresholds are out of order.
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()
    }
}

fn clamp(value: u64, min: usize, max: usize) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX).clamp(min, max)
}
