use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff used when the stream transport drops.
///
/// The delay before reconnect attempt `n` (1-indexed) is
/// `min(initial_backoff_ms * backoff_factor^(n-1), max_backoff_ms)`, and at most
/// `max_attempts` reconnects are made for one logical stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    1_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never reconnects.
    pub const fn disabled() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn exponential(max_attempts: u32, initial_backoff_ms: u64, backoff_factor: f64) -> Self {
        let initial = if initial_backoff_ms == 0 {
            default_initial_backoff_ms()
        } else {
            initial_backoff_ms
        };
        let factor = if backoff_factor <= 0.0 {
            default_backoff_factor()
        } else {
            backoff_factor
        };
        Self {
            max_attempts,
            initial_backoff_ms: initial,
            backoff_factor: factor,
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms.max(1);
        self
    }

    /// Whether another reconnect is allowed after `attempts_made` reconnects.
    pub fn can_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before the reconnect that follows `attempts_made` earlier ones.
    pub fn backoff_duration(&self, attempts_made: u32) -> Duration {
        let exp = self.backoff_factor.powi(attempts_made.min(i32::MAX as u32) as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round();
        let cap = self.max_backoff_ms.max(1);
        let clamped = if base.is_finite() && base < cap as f64 {
            base as u64
        } else {
            cap
        };
        Duration::from_millis(clamped)
    }
}
