//! Logging setup
//!
//! One global `tracing` subscriber: a registry with an `EnvFilter` (taken
//! from `RUST_LOG` when set, else the given level) and a fmt layer in text
//! or JSON form.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Logging errors
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Filter used when `RUST_LOG` is unset
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter(e.to_string())),
    }
}

/// Install the global subscriber
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let env_filter = build_filter(level)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true);
            tracing::subscriber::set_global_default(registry.with(fmt_layer))
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true);
            tracing::subscriber::set_global_default(registry.with(fmt_layer))
        }
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
