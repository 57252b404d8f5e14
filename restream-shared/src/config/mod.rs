//! # Configuration
//!
//! Tuning knobs for the broker: buffer caps, idle reclamation, and
//! notification channel sizing.

pub mod broker;

pub use broker::{BrokerConfig, ConfigError};
