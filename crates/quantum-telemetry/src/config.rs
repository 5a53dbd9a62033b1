//! Logging configuration for the block production process.

/// Service name the miner logs under.
pub const BLOCK_PRODUCTION_SERVICE: &str = "qc-17-block-production";

/// How the miner process logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name stamped on the startup record
    pub service_name: String,

    /// `EnvFilter` directives, e.g. `info` or `warn,qc_17_block_production=debug`
    pub log_level: String,

    /// Install a subscriber at all
    pub console_output: bool,

    /// One JSON object per line instead of human-readable text
    pub json_logs: bool,

    /// Network being mined (mainnet, testnet, regtest)
    pub network: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: BLOCK_PRODUCTION_SERVICE.to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            network: "mainnet".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Miner defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Miner defaults overridden by whatever `lookup` returns.
    ///
    /// - `QC_LOG_LEVEL`, falling back to `RUST_LOG`
    /// - `QC_CONSOLE_OUTPUT`: `false`/`0` installs nothing
    /// - `QC_JSON_LOGS`: `true`/`1` switches to JSON lines
    /// - `QC_NETWORK`
    ///
    /// Flags that are neither true nor false keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: lookup("QC_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or(defaults.log_level),
            console_output: lookup("QC_CONSOLE_OUTPUT")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.console_output),
            json_logs: lookup("QC_JSON_LOGS")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.json_logs),
            network: lookup("QC_NETWORK").unwrap_or(defaults.network),
            service_name: defaults.service_name,
        }
    }

    /// Replace the filter directives.
    pub fn with_log_level(mut self, directives: impl Into<String>) -> Self {
        self.log_level = directives.into();
        self
    }

    /// Tag logs with `network`.
    pub fn on_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_is_block_production() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "qc-17-block-production");
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
        assert!(!config.json_logs);
        assert_eq!(TelemetryConfig::from_lookup(lookup(&[])), config);
    }

    #[test]
    fn test_lookup_overrides() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("QC_LOG_LEVEL", "debug"),
            ("RUST_LOG", "trace"),
            ("QC_JSON_LOGS", "1"),
            ("QC_CONSOLE_OUTPUT", "FALSE"),
            ("QC_NETWORK", "regtest"),
        ]));
        assert_eq!(config.log_level, "debug");
        assert!(config.json_logs);
        assert!(!config.console_output);
        assert_eq!(config.network, "regtest");
        assert_eq!(config.service_name, BLOCK_PRODUCTION_SERVICE);
    }

    #[test]
    fn test_rust_log_fallback_and_bad_flags() {
        let config = TelemetryConfig::from_lookup(lookup(&[
            ("RUST_LOG", "warn"),
            ("QC_JSON_LOGS", "sometimes"),
        ]));
        assert_eq!(config.log_level, "warn");
        assert!(!config.json_logs);
    }

    #[test]
    fn test_builders() {
        let config = TelemetryConfig::default()
            .with_log_level("warn")
            .on_network("regtest");
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.network, "regtest");
    }
}
