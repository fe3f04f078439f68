//! Core configuration parameters
//!
//! All tunable parameters for the port runtime.  Loaded by the host from
//! whatever settings source it uses and validated before the core starts.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Runtime configuration for [`Core`](crate::app::service::Core).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    // --- Ports ---
    /// Upper bound on user-created virtual ports
    pub max_virtual_ports: u32,

    // --- Timing ---
    /// Propagation loop period (milliseconds)
    pub tick_interval_ms: u32,
    /// Deadline for one hardware read (milliseconds)
    pub read_timeout_ms: u32,
    /// Deadline for one hardware write (milliseconds)
    pub write_timeout_ms: u32,

    // --- Wall clock ---
    /// Wall-clock seconds before this instant are treated as unsynced
    pub real_time_epoch_secs: i64,

    // --- History ---
    /// How often expired history samples are purged (seconds)
    pub history_janitor_interval_secs: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_virtual_ports: 1024,

            tick_interval_ms: 50,    // 20 Hz
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,

            real_time_epoch_secs: 1_577_836_800, // 2020-01-01

            history_janitor_interval_secs: 600,
        }
    }
}

impl CoreConfig {
    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("tick_interval_ms must be > 0"));
        }
        if self.read_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("I/O timeouts must be > 0"));
        }
        if self.read_timeout_ms < self.tick_interval_ms {
            return Err(ConfigError::ValidationFailed(
                "read_timeout_ms must not be shorter than a tick",
            ));
        }
        if self.real_time_epoch_secs < 0 {
            return Err(ConfigError::ValidationFailed("real_time_epoch_secs must be >= 0"));
        }
        if self.history_janitor_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "history_janitor_interval_secs must be > 0",
            ));
        }
        Ok(())
    }
}

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = CoreConfig::default();
        assert!(c.validate().is_ok());
        assert!(c.max_virtual_ports > 0);
        assert!(c.tick_interval_ms < c.read_timeout_ms);
        assert_eq!(c.real_time_epoch_secs, 1_577_836_800);
    }

    #[test]
    fn zero_tick_is_rejected() {
        let c = CoreConfig {
            tick_interval_ms: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn timeout_shorter_than_tick_is_rejected() {
        let c = CoreConfig {
            tick_interval_ms: 100,
            read_timeout_ms: 50,
            ..CoreConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let c = CoreConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let c: CoreConfig = serde_json::from_str(r#"{"max_virtual_ports": 4}"#).unwrap();
        assert_eq!(c.max_virtual_ports, 4);
        assert_eq!(c.tick_interval_ms, CoreConfig::default().tick_interval_ms);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = CoreConfig {
            max_virtual_ports: 7,
            ..CoreConfig::default()
        };
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: CoreConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c, c2);
    }
}
