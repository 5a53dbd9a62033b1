//! Structured logging.
//!
//! Logs go to stdout either as human-readable lines or as JSON with
//! consistent fields that a log shipper can parse:
//! - `timestamp`, `level`, `target`
//! - `subsystem`: Subsystem identifier (qc-17, ...)
//! - `fields`: The event's structured context

use crate::{TelemetryConfig, TelemetryError};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber described by `config`.
///
/// Fails if the level filter does not parse or a subscriber is already
/// installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level).map_err(|e| {
        TelemetryError::Config(format!("log level '{}': {}", config.log_level, e))
    })?;

    if !config.console_output {
        return Ok(());
    }

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json_logs {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| TelemetryError::LoggerInit(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        network = %config.network,
        json_logs = config.json_logs,
        "Structured logging configured"
    );
    Ok(())
}

/// Helper to create structured log entries with consistent formatting.
#[macro_export]
macro_rules! log_event {
    // Info level with subsystem
    (info, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    // Warn level with subsystem
    (warn, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };

    // Debug level with subsystem
    (debug, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a block-related event with standard fields.
#[macro_export]
macro_rules! log_block_event {
    ($level:ident, $subsystem:expr, $msg:expr, $block_height:expr, $block_hash:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $subsystem,
            block_height = $block_height,
            block_hash = %$block_hash,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a transaction-related event with standard fields.
#[macro_export]
macro_rules! log_tx_event {
    ($level:ident, $subsystem:expr, $msg:expr, $tx_hash:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $subsystem,
            tx_hash = %$tx_hash,
            $($($field)*,)?
            $msg
        )
    };
}
