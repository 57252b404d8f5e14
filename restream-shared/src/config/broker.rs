use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when a [`BrokerConfig`] fails validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A field holds a value the broker cannot operate with.
    #[error("invalid broker configuration: {0}")]
    Invalid(&'static str),
}

/// Tunable limits and intervals for the stream broker.
///
/// Every field has a production default; deployments override individual
/// fields through whatever configuration file or environment layer hosts
/// this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// How long a stream's buffered log may sit without activity before it
    /// becomes reclaimable, in milliseconds.
    pub idle_ttl_ms: u64,
    /// Maximum number of chunks retained per stream for replay.
    pub max_stream_chunks: usize,
    /// Maximum total bytes retained per stream for replay.
    pub max_stream_buffer_bytes: u64,
    /// Global cap on concurrently active (producing) streams.
    pub max_active_streams: usize,
    /// Cadence of the background idle sweep, in milliseconds.
    pub sweep_interval_ms: u64,
    /// Capacity of each stream's live notification channel.
    pub notify_channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            idle_ttl_ms: 24 * 60 * 60 * 1000,
            max_stream_chunks: 5_000,
            max_stream_buffer_bytes: 2 * 1024 * 1024,
            max_active_streams: 256,
            sweep_interval_ms: 5 * 60 * 1000,
            notify_channel_capacity: 256,
        }
    }
}

impl BrokerConfig {
    /// Checks that every limit is usable.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when any cap or interval is zero.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_ttl_ms == 0 {
            return Err(ConfigError::Invalid("idle_ttl_ms must be positive"));
        }
        if self.max_stream_chunks == 0 {
            return Err(ConfigError::Invalid("max_stream_chunks must be positive"));
        }
        if self.max_stream_buffer_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_stream_buffer_bytes must be positive",
            ));
        }
        if self.max_active_streams == 0 {
            return Err(ConfigError::Invalid("max_active_streams must be positive"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be positive"));
        }
        if self.notify_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notify_channel_capacity must be positive",
            ));
        }
        Ok(())
    }

    /// Idle TTL as a [`Duration`].
    #[must_use]
    pub const fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }

    /// Sweep cadence as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BrokerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_ttl(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.sweep_interval(), Duration::from_secs(5 * 60));
        assert_eq!(config.max_stream_chunks, 5_000);
        assert_eq!(config.max_stream_buffer_bytes, 2 * 1024 * 1024);
        assert_eq!(config.max_active_streams, 256);
    }

    #[test]
    fn zero_caps_are_rejected() {
        let config = BrokerConfig {
            max_stream_chunks: 0,
            ..BrokerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid("max_stream_chunks must be positive"))
        );

        let config = BrokerConfig {
            idle_ttl_ms: 0,
            ..BrokerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_overrides_keep_defaults() {
        let config: BrokerConfig =
            serde_json::from_str(r#"{"max_active_streams": 8}"#).unwrap();
        assert_eq!(config.max_active_streams, 8);
        assert_eq!(config.max_stream_chunks, 5_000);
    }
}
