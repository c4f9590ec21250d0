//! Logging setup shared by the Mirrorcast binaries
//!
//! Output goes to stderr in one of three formats:
//! - `text`: plain lines, suitable for cron mail and journald
//! - `json`: one JSON object per line, with the active `mirror_pass` span
//! - `pretty`: multi-line colored output for development
//!
//! ```no_run
//! use libmirrorcast::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "info".to_string(), false).init();
//! ```

use std::str::FromStr;

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "MIRRORCAST_LOG_FORMAT";

/// Environment variable selecting the minimum level
pub const LOG_LEVEL_ENV: &str = "MIRRORCAST_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// `verbose` raises the default level to debug
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Settings from `MIRRORCAST_LOG_FORMAT` / `MIRRORCAST_LOG_LEVEL`, text/info otherwise
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var(LOG_FORMAT_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);

        let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());

        Self::new(format, level, verbose)
    }

    /// Directive string handed to `EnvFilter` when `RUST_LOG` is unset
    pub fn filter_directive(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.level.clone()
        }
    }

    /// Install the global subscriber. Call once per process.
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.filter_directive()));

        // try_init: a second call (tests, embedding) keeps the first subscriber
        let _ = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .try_init(),
        };
    }
}

/// Initialize logging from the environment only
pub fn init_default() {
    LoggingConfig::from_env(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("Json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_from_str_invalid() {
        let result = "xml".parse::<LogFormat>();
        assert!(result.unwrap_err().contains("Invalid log format: 'xml'"));
    }

    #[test]
    fn test_log_format_display_round_trips() {
        for format in [LogFormat::Text, LogFormat::Json, LogFormat::Pretty] {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
    }

    #[test]
    fn test_verbose_overrides_level() {
        let config = LoggingConfig::new(LogFormat::Text, "warn".to_string(), true);
        assert_eq!(config.filter_directive(), "debug");

        let config = LoggingConfig::new(LogFormat::Text, "warn".to_string(), false);
        assert_eq!(config.filter_directive(), "warn");
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var(LOG_FORMAT_ENV, "json");
        std::env::set_var(LOG_LEVEL_ENV, "trace");
        let config = LoggingConfig::from_env(false);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "trace");

        std::env::set_var(LOG_FORMAT_ENV, "bogus");
        std::env::remove_var(LOG_LEVEL_ENV);
        let config = LoggingConfig::from_env(false);
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");

        std::env::remove_var(LOG_FORMAT_ENV);
    }
}
