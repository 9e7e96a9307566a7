//! Tracing setup for the harness.
//!
//! Harness logs go through `tracing`; the subscriber is built from the `log_level` and
//! `log_format` configuration keys. `RUST_LOG` takes precedence over the configured level
//! so a single module (e.g. `RUST_LOG=snapd=trace`) can be opened up without editing
//! the config file.
//!
//! # Example
//! ```no_run
//! use snap_harness::{config::HarnessConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("starting snapd");
//! # Ok(())
//! # }
//! ```

use crate::config::HarnessConfig;
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for harness logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored when attached to a terminal
    Pretty,
    /// One line per event, for CI logs
    #[default]
    Compact,
    /// JSON objects for log aggregation
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "Invalid log format '{other}'. Must be one of: pretty, compact, json"
            )),
        }
    }
}

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// ANSI colors in pretty output
    pub with_ansi: bool,
}

impl TracingConfig {
    /// Settings for `level` in compact format
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::Compact,
            with_ansi: std::io::stdout().is_terminal(),
        }
    }

    /// Settings from the harness configuration
    pub fn from_harness_config(config: &HarnessConfig) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&config.log_level)?).with_format(config.log_format))
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize tracing from the harness configuration
pub fn init_from_config(config: &HarnessConfig) -> Result<(), String> {
    init(TracingConfig::from_harness_config(config)?)
}

/// Install the global subscriber.
///
/// Calling this more than once is harmless: if a global subscriber is already
/// installed the call returns `Ok(())`.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer().json().with_filter(env_filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .or_else(|e| {
            // an earlier test or caller already installed one
            if e.to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}
