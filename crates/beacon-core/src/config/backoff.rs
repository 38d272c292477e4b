//! Reconnect backoff configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Exponential backoff configuration for reconnect cycles
///
/// Defaults: 5 attempts, starting at 1s and doubling up to 30s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Upper bound for a single delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier applied after each attempt
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,

    /// Reconnect attempts before giving up
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 5,
        }
    }
}
