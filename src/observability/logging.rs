//! Structured logging configuration.

use std::path::PathBuf;
use std::str::FromStr;

use crate::Error;

/// Environment variable holding the log filter directive.
pub const LOG_FILTER_ENV: &str = "PMS_LOG";

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "PMS_LOG_FORMAT";

/// Environment variable naming a log file.
pub const LOG_FILE_ENV: &str = "PMS_LOG_FILE";

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "pms=debug,info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `tracing_subscriber::EnvFilter` directive.
    pub filter: String,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: DEFAULT_FILTER.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds the configuration from the environment.
    ///
    /// Filter precedence: `--verbose`, `PMS_LOG`, `RUST_LOG`, then `warn`.
    /// An explicit `format` wins over `PMS_LOG_FORMAT`.
    #[must_use]
    pub fn from_env(verbose: bool, format: Option<LogFormat>) -> Self {
        Self::from_lookup(verbose, format, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        verbose: bool,
        format: Option<LogFormat>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let filter = if verbose {
            VERBOSE_FILTER.to_string()
        } else {
            lookup(LOG_FILTER_ENV)
                .or_else(|| lookup("RUST_LOG"))
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string())
        };

        let format = format
            .or_else(|| lookup(LOG_FORMAT_ENV).and_then(|f| f.parse().ok()))
            .unwrap_or_default();

        let file = lookup(LOG_FILE_ENV)
            .filter(|f| !f.trim().is_empty())
            .map(PathBuf::from);

        Self {
            format,
            filter,
            file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test_case("json", LogFormat::Json)]
    #[test_case("JSON", LogFormat::Json)]
    #[test_case("pretty", LogFormat::Pretty)]
    #[test_case("text", LogFormat::Pretty)]
    fn test_parse_format(input: &str, expected: LogFormat) {
        assert_eq!(input.parse::<LogFormat>().unwrap(), expected);
    }

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::from_lookup(false, None, lookup(&[]));
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn test_filter_precedence() {
        let env = [("PMS_LOG", "pms=trace"), ("RUST_LOG", "info")];
        assert_eq!(
            LoggingConfig::from_lookup(false, None, lookup(&env)).filter,
            "pms=trace"
        );
        assert_eq!(
            LoggingConfig::from_lookup(false, None, lookup(&env[1..])).filter,
            "info"
        );
        assert_eq!(
            LoggingConfig::from_lookup(true, None, lookup(&env)).filter,
            VERBOSE_FILTER
        );
    }

    #[test]
    fn test_explicit_format_wins() {
        let env = [("PMS_LOG_FORMAT", "json"), ("PMS_LOG_FILE", "/tmp/pms.log")];
        let config = LoggingConfig::from_lookup(false, Some(LogFormat::Pretty), lookup(&env));
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/pms.log")));

        let config = LoggingConfig::from_lookup(false, None, lookup(&env));
        assert_eq!(config.format, LogFormat::Json);
    }
}
