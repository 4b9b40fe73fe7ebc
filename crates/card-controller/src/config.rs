//! Card Controller configuration.
//!
//! Configuration is loaded from environment variables. Every field has a
//! default; malformed values are rejected rather than silently replaced.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default API bind address (HTTP + WebSocket).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default minimum spacing between snapshot broadcasts on one channel.
pub const DEFAULT_BROADCAST_COOLDOWN_MS: u64 = 1000;

/// Default pause between simulated participant sweeps.
pub const DEFAULT_SIMULATION_INTERVAL_SECONDS: u64 = 5;

/// Default outbound frame queue depth per WebSocket connection.
pub const DEFAULT_CONNECTION_BUFFER: usize = 32;

/// Default CC instance ID prefix.
pub const DEFAULT_CC_ID_PREFIX: &str = "cc";

/// Card Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Broadcast cooldown in milliseconds (default: 1000).
    pub broadcast_cooldown_ms: u64,

    /// Simulation sweep interval in seconds (default: 5).
    pub simulation_interval_seconds: u64,

    /// Outbound queue depth per connection (default: 32).
    pub connection_buffer: usize,

    /// Unique identifier for this CC instance.
    pub instance_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Per-channel timing and buffering knobs.
///
/// Derived from [`Config`] in production; tests build it directly to shrink
/// or stretch the windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Minimum spacing between two broadcasts on one channel.
    pub broadcast_cooldown: Duration,
    /// Pause between two simulated participant sweeps.
    pub simulation_interval: Duration,
    /// Outbound frame queue depth per connection.
    pub connection_buffer: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            broadcast_cooldown: Duration::from_millis(DEFAULT_BROADCAST_COOLDOWN_MS),
            simulation_interval: Duration::from_secs(DEFAULT_SIMULATION_INTERVAL_SECONDS),
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
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
        let bind_address = vars
            .get("CC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("CC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let broadcast_cooldown_ms = parse_positive(
            vars,
            "CC_BROADCAST_COOLDOWN_MS",
            DEFAULT_BROADCAST_COOLDOWN_MS,
        )?;

        let simulation_interval_seconds = parse_positive(
            vars,
            "CC_SIMULATION_INTERVAL_SECONDS",
            DEFAULT_SIMULATION_INTERVAL_SECONDS,
        )?;

        let connection_buffer =
            parse_positive(vars, "CC_CONNECTION_BUFFER", DEFAULT_CONNECTION_BUFFER)?;

        let instance_id = vars.get("CC_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_CC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            broadcast_cooldown_ms,
            simulation_interval_seconds,
            connection_buffer,
            instance_id,
        })
    }

    /// Channel knobs derived from this configuration.
    #[must_use]
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            broadcast_cooldown: Duration::from_millis(self.broadcast_cooldown_ms),
            simulation_interval: Duration::from_secs(self.simulation_interval_seconds),
            connection_buffer: self.connection_buffer,
        }
    }
}

/// Parse a strictly positive integer variable, falling back to `default` when unset.
fn parse_positive<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };

    let value: T = raw.trim().parse().map_err(|_| {
        ConfigError::InvalidValue(format!("{key} must be a positive integer, got '{raw}'"))
    })?;

    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than zero"
        )));
    }

    Ok(value)
}
