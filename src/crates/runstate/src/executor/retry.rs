//! Retry policy for failed and timed-out states
//!
//! A state chain (the original state plus every retry cloned from it) is
//! bounded by `max_attempts`. Retries are delayed with a backoff computed from
//! the attempt number so a failing node does not spin the queue.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Always `initial_backoff_ms`
    Fixed,
    /// `initial_backoff_ms * (attempt + 1)`
    Linear,
    /// `initial_backoff_ms * multiplier^attempt`
    #[default]
    Exponential,
}

/// Retry strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts for one chain, the original included
    pub max_attempts: u32,

    /// Backoff growth strategy
    pub strategy: BackoffStrategy,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,

    /// Whether to add random jitter to backoff delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: BackoffStrategy::Exponential,
            initial_backoff_ms: 1000, // 1 second
            max_backoff_ms: 60_000,   // 60 seconds
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with a custom attempt budget
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set backoff strategy
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set initial backoff delay
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set maximum backoff delay
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check the policy is usable, returning a readable problem otherwise
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry_policy.max_attempts must be at least 1".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err("retry_policy.backoff_multiplier must be >= 1.0".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(
                "retry_policy.initial_backoff_ms cannot exceed max_backoff_ms".to_string(),
            );
        }
        Ok(())
    }

    /// Calculate backoff delay before the retry that follows `attempt` (0-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64;
        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * (attempt as f64 + 1.0),
            BackoffStrategy::Exponential => {
                base * self.backoff_multiplier.powi(attempt.min(63) as i32)
            }
        };

        let delay_ms = (delay_ms.min(self.max_backoff_ms as f64)) as u64;

        let delay_ms = if self.jitter {
            // Add up to 25% random jitter
            let jitter_amount = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms + jitter_amount
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.strategy, BackoffStrategy::Exponential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = RetryConfig::new(10)
            .with_initial_backoff(100)
            .with_max_backoff(1000)
            .with_jitter(false);

        assert_eq!(config.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(400));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(1000), Duration::from_millis(1000));
    }

    #[test]
    fn test_linear_and_fixed_backoff() {
        let linear = RetryConfig::new(5)
            .with_strategy(BackoffStrategy::Linear)
            .with_initial_backoff(50)
            .with_jitter(false);
        assert_eq!(linear.backoff_delay(0), Duration::from_millis(50));
        assert_eq!(linear.backoff_delay(2), Duration::from_millis(150));

        let fixed = RetryConfig::new(5)
            .with_strategy(BackoffStrategy::Fixed)
            .with_initial_backoff(70)
            .with_jitter(false);
        assert_eq!(fixed.backoff_delay(4), Duration::from_millis(70));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::new(3).with_initial_backoff(1000);
        for _ in 0..20 {
            let delay = config.backoff_delay(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_invalid_policies() {
        assert!(RetryConfig::new(0).validate().is_err());
        assert!(RetryConfig::new(2).with_multiplier(0.5).validate().is_err());
        assert!(RetryConfig::new(2)
            .with_initial_backoff(5000)
            .with_max_backoff(10)
            .validate()
            .is_err());
    }

    #[test]
    fn test_partial_policy_deserializes_with_defaults() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 5, "strategy": "linear"}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.strategy, BackoffStrategy::Linear);
        assert_eq!(config.initial_backoff_ms, 1000);
    }
}
