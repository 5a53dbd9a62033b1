//! # Quantum Telemetry
//!
//! Logging bootstrap shared by Quantum-Chain subsystems.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quantum_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("Failed to init logging");
//!
//!     // Structured logs are now emitted
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QC_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `QC_JSON_LOGS` | `false` | JSON formatted output |
//! | `QC_CONSOLE_OUTPUT` | `true` | Emit to stdout at all |
//! | `QC_NETWORK` | `mainnet` | Network name |

#![warn(missing_docs)]

mod config;
mod logging;

pub use config::{TelemetryConfig, BLOCK_PRODUCTION_SERVICE};
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The global subscriber could not be installed
    #[error("Failed to initialize logger: {0}")]
    LoggerInit(String),

    /// A configuration value could not be used
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Convenience macro for creating a span with subsystem context.
///
/// # Example
///
/// ```rust,ignore
/// use quantum_telemetry::subsystem_span;
///
/// fn build_template() {
///     let _span = subsystem_span!("build_template", subsystem = "qc-17", height = 12345);
///     // ... template logic
/// }
/// ```
#[macro_export]
macro_rules! subsystem_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
