//! Structured logging built on `tracing-subscriber`.
//!
//! `RUST_LOG` wins when set. Otherwise only the rowelect crates log, at the
//! configured level.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for the rowelect crates.
    pub level: Level,
    /// Emit one JSON object per event.
    pub json_format: bool,
    /// Log span open/close, e.g. around each campaign.
    pub include_spans: bool,
    /// Include file and line.
    pub include_location: bool,
    /// Include thread ids.
    pub include_thread_ids: bool,
    /// Include the module path.
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_spans: false,
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Verbose human-readable output, with every poll and renewal.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            json_format: false,
            include_spans: true,
            include_location: true,
            include_thread_ids: true,
            include_target: true,
        }
    }

    /// JSON output for log aggregation.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            json_format: true,
            include_spans: false,
            include_location: false,
            include_thread_ids: false,
            include_target: true,
        }
    }

    /// The filter used when `RUST_LOG` is not set.
    pub fn default_directives(&self) -> String {
        format!(
            "rowelect_core={},rowelect_observability={}",
            self.level, self.level
        )
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directives()))
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Initializes logging with the default configuration.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging() {
    init_logging_with_config(LoggingConfig::default());
}

/// Initializes logging with the given configuration.
///
/// # Panics
///
/// Panics if a global subscriber is already installed. Use
/// [`try_init_logging_with_config`] where that can happen.
pub fn init_logging_with_config(config: LoggingConfig) {
    if let Err(e) = try_init_logging_with_config(config) {
        panic!("failed to install tracing subscriber: {e}");
    }
}

/// Initializes logging, returning an error if a global subscriber is already
/// installed.
pub fn try_init_logging_with_config(config: LoggingConfig) -> Result<(), TryInitError> {
    let env_filter = config.env_filter();
    let span_events = config.span_events();

    if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_thread_ids(config.include_thread_ids)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    }
}

/// Installs a debug-level subscriber that writes through the test harness's
/// captured output. Safe to call from every test.
pub fn init_test_logging() {
    let config = LoggingConfig::development();
    let _ = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(
            fmt::layer()
                .with_test_writer()
                .with_span_events(config.span_events())
                .with_target(true),
        )
        .try_init();
}

/// Creates a span for work done on behalf of one election.
#[macro_export]
macro_rules! election_span {
    ($election:expr) => {
        tracing::info_span!("election", election = %$election)
    };
    ($election:expr, $($field:tt)*) => {
        tracing::info_span!("election", election = %$election, $($field)*)
    };
}
