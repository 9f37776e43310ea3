/// Retry backoff strategies
///
/// A retried input is re-queued with an `available_at` in the future instead
/// of holding a worker asleep. The delay for the n-th retry comes from the
/// configured strategy, scaled by the input's `wait_factor`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// `delay_ms × retry`
    Linear { delay_ms: u64 },
    /// `delay_ms × 2^(retry-1)`, capped at `max_delay_ms`
    Exponential { delay_ms: u64, max_delay_ms: u64 },
}

impl Default for RetryBackoff {
    fn default() -> Self {
        RetryBackoff::Exponential {
            delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryBackoff {
    /// Build a strategy from its config name ("fixed" | "linear" | "exponential")
    pub fn from_name(name: &str, delay_ms: u64) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "fixed" => Some(RetryBackoff::Fixed { delay_ms }),
            "linear" => Some(RetryBackoff::Linear { delay_ms }),
            "exponential" => Some(RetryBackoff::Exponential {
                delay_ms,
                max_delay_ms: delay_ms.saturating_mul(60),
            }),
            _ => None,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32, wait_factor: f64) -> Duration {
        let retry = retry.max(1);
        let base_ms = match *self {
            RetryBackoff::Fixed { delay_ms } => delay_ms,
            RetryBackoff::Linear { delay_ms } => delay_ms.saturating_mul(retry as u64),
            RetryBackoff::Exponential {
                delay_ms,
                max_delay_ms,
            } => {
                let shift = (retry - 1).min(20);
                delay_ms.saturating_mul(1u64 << shift).min(max_delay_ms)
            }
        };

        let factor = if wait_factor.is_finite() && wait_factor > 0.0 {
            wait_factor
        } else {
            1.0
        };
        Duration::from_millis((base_ms as f64 * factor).round() as u64)
    }
}
