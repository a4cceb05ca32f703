//! Structured logging setup for etch
//!
//! Everything in the crate logs through `tracing` macros with structured
//! fields (`info!(kernel = %id, "...")`). This module installs the
//! subscriber: human-readable output by default, JSON when requested, always
//! on stderr so that stdout stays reserved for reports.
//!
//! Filtering honours `RUST_LOG` when it is set; otherwise the configured level
//! applies to the `etch` target and noisy dependencies are capped at `warn`.
//!
//! # Example
//!
//! ```no_run
//! use etch::util::logging;
//! use tracing::{debug, info};
//!
//! logging::init_from_env();
//!
//! info!("Pipeline starting");
//! debug!(kernel = "conv2d", "Rendering templates");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Controls subscriber output
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for the `etch` target
    pub level: Level,

    /// Emit one JSON object per event
    pub use_json: bool,

    /// Include the module target (e.g. `etch::pipeline::orchestrator`)
    pub include_target: bool,

    /// Include file and line number
    pub include_location: bool,

    /// Include thread ids and names; useful when several targets build at once
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// JSON output with full metadata, for CI logs
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    /// Debug level with thread ids so interleaved worker output can be told apart
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: true,
        }
    }
}

/// Parses a log level, case-insensitively, falling back to INFO
///
/// ```
/// use etch::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// assert_eq!(parse_level("loud"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn directive(spec: &str) -> Directive {
    spec.parse()
        .unwrap_or_else(|_| Directive::from(LevelFilter::INFO))
}

fn build_filter(level: Level) -> EnvFilter {
    if env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    EnvFilter::default()
        .add_directive(directive(&format!("etch={}", level)))
        .add_directive(directive("ignore=warn"))
        .add_directive(directive("globset=warn"))
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        }
    });
}

pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Initializes logging from `ETCH_LOG_LEVEL` and `ETCH_LOG_JSON`
pub fn init_from_env() {
    let level_str = env::var("ETCH_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let use_json = env::var("ETCH_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    init_logging(LoggingConfig {
        level: parse_level(&level_str),
        use_json,
        ..Default::default()
    });
}
