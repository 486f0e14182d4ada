//! Tracing setup for calnotify.
//!
//! The daemon logs to stderr. Interactive runs get human-readable lines,
//! service-manager runs can switch to JSON so the journal keeps the fields.
//!
//! ```ignore
//! use calnotify_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::from_flags(debug, json_logs))?;
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Errors that can occur during tracing initialization
#[derive(Debug, Error)]
pub enum TracingError {
    /// A global subscriber was already installed
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    /// The filter directive could not be parsed
    #[error("failed to parse env filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// Single-line human-readable output
    #[default]
    Compact,
    /// One JSON object per line
    Json,
}

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level used for calnotify targets when `RUST_LOG` is unset
    pub default_level: Level,
    /// Output format
    pub output_format: TracingOutputFormat,
    /// Include file and line of the callsite
    pub include_location: bool,
    /// Emit span open/close events
    pub include_span_events: bool,
    /// Explicit filter directive; wins over both `RUST_LOG` and `default_level`
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            output_format: TracingOutputFormat::Compact,
            include_location: false,
            include_span_events: false,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    /// Debug-level compact output with callsite locations.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_location: true,
            ..Self::default()
        }
    }

    /// JSON output suited to a service manager's journal.
    #[must_use]
    pub fn daemon() -> Self {
        Self {
            output_format: TracingOutputFormat::Json,
            include_location: true,
            include_span_events: true,
            ..Self::default()
        }
    }

    /// Builds a config from the binary's `--debug` and `--json-logs` flags.
    #[must_use]
    pub fn from_flags(debug: bool, json: bool) -> Self {
        let base = if json { Self::daemon() } else { Self::default() };
        if debug {
            base.with_level(Level::DEBUG).with_location(true)
        } else {
            base
        }
    }

    /// Set the default log level
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Toggle callsite locations
    #[must_use]
    pub fn with_location(mut self, include: bool) -> Self {
        self.include_location = include;
        self
    }

    /// Set an explicit filter directive
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn build_filter(&self) -> Result<EnvFilter, TracingError> {
        if let Some(ref directive) = self.env_filter {
            return Ok(EnvFilter::try_new(directive)?);
        }
        Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("calnotify={}", self.default_level))))
    }
}

/// Installs the global tracing subscriber.
///
/// Call once, before the first log line. `RUST_LOG` overrides the configured
/// default level unless an explicit directive was set.
///
/// # Errors
///
/// Fails if a global subscriber is already installed or the directive is
/// invalid.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.build_filter()?;

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.output_format {
        TracingOutputFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events)
            .boxed(),
        TracingOutputFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_span_events(span_events)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
