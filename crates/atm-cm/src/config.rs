//! Connection manager configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default; a value that is present but does not parse is an error rather
//! than silently falling back.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default number of queued incoming calls processed per call-queue pass.
pub const DEFAULT_CALLQ_MAX: usize = 32;

/// Default number of inbound PDUs held for a circuit that is still accepting.
pub const DEFAULT_RCVQ_MAX: usize = 3;

/// Default timer tick in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 500;

/// Default channel buffer size for the manager mailbox.
pub const DEFAULT_MAILBOX_SIZE: usize = 1000;

/// Default Prometheus listener bind address.
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:9464";

/// Default instance ID prefix.
pub const DEFAULT_CM_ID_PREFIX: &str = "atmcm";

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this manager instance.
    pub cm_id: String,

    /// Incoming calls processed per call-queue pass (default: 32).
    pub callq_max: usize,

    /// Inbound PDUs queued per accepting circuit (default: 3).
    pub rcvq_max: usize,

    /// Duration of one timer tick (default: 500ms).
    pub tick: Duration,

    /// Manager mailbox capacity (default: 1000).
    pub mailbox_size: usize,

    /// Prometheus listener bind address (default: "0.0.0.0:9464").
    pub metrics_bind_address: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cm_id: generate_cm_id(),
            callq_max: DEFAULT_CALLQ_MAX,
            rcvq_max: DEFAULT_RCVQ_MAX,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            mailbox_size: DEFAULT_MAILBOX_SIZE,
            metrics_bind_address: DEFAULT_METRICS_BIND_ADDRESS.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let callq_max = parse_var(vars, "ATM_CM_CALLQ_MAX", DEFAULT_CALLQ_MAX)?;
        if callq_max == 0 {
            return Err(ConfigError::InvalidValue(
                "ATM_CM_CALLQ_MAX must be greater than zero".to_string(),
            ));
        }

        let rcvq_max = parse_var(vars, "ATM_CM_RCVQ_MAX", DEFAULT_RCVQ_MAX)?;

        let tick_ms = parse_var(vars, "ATM_CM_TICK_MS", DEFAULT_TICK_MS)?;
        if tick_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "ATM_CM_TICK_MS must be greater than zero".to_string(),
            ));
        }

        // mpsc::channel rejects a zero capacity
        let mailbox_size = parse_var(vars, "ATM_CM_MAILBOX_SIZE", DEFAULT_MAILBOX_SIZE)?;
        if mailbox_size == 0 {
            return Err(ConfigError::InvalidValue(
                "ATM_CM_MAILBOX_SIZE must be greater than zero".to_string(),
            ));
        }

        let metrics_bind_address = vars
            .get("ATM_CM_METRICS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_METRICS_BIND_ADDRESS.to_string());

        let cm_id = vars
            .get("ATM_CM_ID")
            .cloned()
            .unwrap_or_else(generate_cm_id);

        Ok(Config {
            cm_id,
            callq_max,
            rcvq_max,
            tick: Duration::from_millis(tick_ms),
            mailbox_size,
            metrics_bind_address,
        })
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

fn generate_cm_id() -> String {
    let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid_suffix = uuid::Uuid::new_v4().to_string();
    let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
    format!("{DEFAULT_CM_ID_PREFIX}-{hostname}-{short_suffix}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = HashMap::new();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.callq_max, DEFAULT_CALLQ_MAX);
        assert_eq!(config.rcvq_max, DEFAULT_RCVQ_MAX);
        assert_eq!(config.tick, Duration::from_millis(DEFAULT_TICK_MS));
        assert_eq!(config.mailbox_size, DEFAULT_MAILBOX_SIZE);
        assert_eq!(config.metrics_bind_address, DEFAULT_METRICS_BIND_ADDRESS);
        // CM ID should be auto-generated
        assert!(config.cm_id.starts_with("atmcm-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("ATM_CM_CALLQ_MAX".to_string(), "8".to_string()),
            ("ATM_CM_RCVQ_MAX".to_string(), "0".to_string()),
            ("ATM_CM_TICK_MS".to_string(), "100".to_string()),
            ("ATM_CM_MAILBOX_SIZE".to_string(), "64".to_string()),
            (
                "ATM_CM_METRICS_BIND_ADDRESS".to_string(),
                "127.0.0.1:9000".to_string(),
            ),
            ("ATM_CM_ID".to_string(), "atmcm-custom-001".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.callq_max, 8);
        assert_eq!(config.rcvq_max, 0);
        assert_eq!(config.tick, Duration::from_millis(100));
        assert_eq!(config.mailbox_size, 64);
        assert_eq!(config.metrics_bind_address, "127.0.0.1:9000");
        assert_eq!(config.cm_id, "atmcm-custom-001");
    }

    #[test]
    fn test_from_vars_invalid_number() {
        let vars = HashMap::from([("ATM_CM_RCVQ_MAX".to_string(), "three".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(v)) if v == "ATM_CM_RCVQ_MAX=three")
        );
    }

    #[test]
    fn test_from_vars_rejects_zero_limits() {
        for name in ["ATM_CM_CALLQ_MAX", "ATM_CM_TICK_MS", "ATM_CM_MAILBOX_SIZE"] {
            let vars = HashMap::from([(name.to_string(), "0".to_string())]);
            let result = Config::from_vars(&vars);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{name}=0 should be rejected"
            );
        }
    }
}
