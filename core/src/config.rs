//! Execution tuning: retry budgets, pacing, batch bounds.

use broker_connectors::OrderDuration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry with exponential backoff (`base * 2^i` after the i-th failed attempt)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay after the failed attempt with zero-based index `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// The full schedule, one delay per attempt
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|i| self.delay_for(i)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Placement attempts for entry orders
    pub entry_attempts: u32,
    /// Placement attempts for exit orders
    pub exit_attempts: u32,
    pub backoff_base_ms: u64,
    /// Pause between successive orders of the same account
    pub inter_order_delay_ms: u64,
    pub batch_timeout_secs: u64,
    pub max_concurrent_accounts: usize,
    /// Brokerage id an account must declare to take part
    pub broker: String,
    /// Validity of entry orders
    pub entry_duration: OrderDuration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            entry_attempts: 5,
            exit_attempts: 3,
            backoff_base_ms: 1_000,
            inter_order_delay_ms: 1_000,
            batch_timeout_secs: 300,
            max_concurrent_accounts: 16,
            broker: "angel_one".to_string(),
            entry_duration: OrderDuration::Day,
        }
    }
}

impl ExecutionConfig {
    pub fn entry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.entry_attempts, Duration::from_millis(self.backoff_base_ms))
    }

    pub fn exit_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.exit_attempts, Duration::from_millis(self.backoff_base_ms))
    }

    pub fn inter_order_delay(&self) -> Duration {
        Duration::from_millis(self.inter_order_delay_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.entry_attempts == 0 || self.exit_attempts == 0 {
            return Err("retry attempts must be at least 1".to_string());
        }
        if self.max_concurrent_accounts == 0 {
            return Err("max_concurrent_accounts must be at least 1".to_string());
        }
        if self.batch_timeout_secs == 0 {
            return Err("batch_timeout_secs must be positive".to_string());
        }
        if self.broker.trim().is_empty() {
            return Err("broker id cannot be empty".to_string());
        }
        Ok(())
    }
}
