//! Retry with exponential backoff

use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use super::{RecoveryContext, RecoveryHook, KEY_RETRY_DELAY_MS};
use crate::config::EngineConfig;
use crate::errors::{ErrorCategory, ErrorRecord, Severity};

const KEY_RETRY_EXHAUSTED: &str = "retry_exhausted";

/// Retry policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Scale each delay by a uniform factor in `[0.5, 1.0]`
    pub jitter: bool,
    pub retryable_symbols: Vec<String>,
    pub retryable_categories: Vec<ErrorCategory>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_symbols: vec![
                "timeout".to_string(),
                "connection_failed".to_string(),
                "rate_limited".to_string(),
                "service_unavailable".to_string(),
            ],
            retryable_categories: vec![ErrorCategory::External],
        }
    }
}

/// Marks transient errors for another attempt
///
/// Below `max_attempts` the error is returned unchanged and the context
/// gets `should_retry = true`, the backoff delay, and the next attempt
/// number. At the limit the error is escalated to a fatal record.
#[derive(Debug, Clone, Default)]
pub struct RetryHook {
    config: RetryConfig,
}

impl RetryHook {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.retry.clone())
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_retryable(&self, error: &ErrorRecord) -> bool {
        self.config
            .retryable_symbols
            .iter()
            .any(|s| s == error.symbol())
            || self.config.retryable_categories.contains(&error.category())
    }

    /// Backoff before jitter: `initial * multiplier^attempt`, capped
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        raw.min(self.config.max_delay_ms as f64).max(0.0).round() as u64
    }

    fn delay_ms(&self, attempt: u32) -> u64 {
        let base = self.base_delay_ms(attempt);
        if self.config.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            (base as f64 * factor).round() as u64
        } else {
            base
        }
    }
}

impl RecoveryHook for RetryHook {
    fn name(&self) -> &str {
        "retry"
    }

    fn should_recover(&self, error: &ErrorRecord, _ctx: &RecoveryContext) -> bool {
        let exhausted = error.context_value(KEY_RETRY_EXHAUSTED) == Some(&Value::Bool(true));
        !exhausted && self.is_retryable(error)
    }

    fn recover(&self, error: &ErrorRecord, ctx: &mut RecoveryContext) -> Option<ErrorRecord> {
        let attempt = ctx.attempt();

        if attempt >= self.config.max_attempts {
            tracing::debug!(
                symbol = error.symbol(),
                attempt,
                max_attempts = self.config.max_attempts,
                "retries exhausted"
            );
            ctx.set_should_retry(false);
            return Some(
                error
                    .clone()
                    .with_severity(Severity::Fatal)
                    .with_fatal(true)
                    .with_context("attempts", attempt)
                    .with_context(KEY_RETRY_EXHAUSTED, true),
            );
        }

        let delay = self.delay_ms(attempt);
        tracing::debug!(symbol = error.symbol(), attempt, delay_ms = delay, "retry scheduled");
        ctx.set_should_retry(true);
        ctx.set(KEY_RETRY_DELAY_MS, delay);
        ctx.set_attempt(attempt + 1);
        Some(error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook_without_jitter() -> RetryHook {
        RetryHook::new(RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn test_retryable_by_symbol_or_category() {
        let hook = RetryHook::default();
        assert!(hook.is_retryable(&ErrorRecord::runtime("timeout", "slow")));
        assert!(hook.is_retryable(&ErrorRecord::external("bad_gateway", "502")));
        assert!(!hook.is_retryable(&ErrorRecord::data("invalid", "bad input")));
    }

    #[test]
    fn test_backoff_is_capped() {
        let hook = RetryHook::new(RetryConfig {
            initial_delay_ms: 100,
            max_delay_ms: 500,
            jitter: false,
            ..RetryConfig::default()
        });
        assert_eq!(hook.base_delay_ms(1), 200);
        assert_eq!(hook.base_delay_ms(2), 400);
        assert_eq!(hook.base_delay_ms(3), 500);
        assert_eq!(hook.base_delay_ms(40), 500);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let hook = RetryHook::default();
        for _ in 0..50 {
            let delay = hook.delay_ms(1);
            assert!((100..=200).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_recover_returns_original_until_exhausted() {
        let hook = hook_without_jitter();
        let err = ErrorRecord::external("timeout", "slow");
        let mut ctx = RecoveryContext::new();

        let returned = hook.recover(&err, &mut ctx).unwrap();
        assert_eq!(returned.id(), err.id());
        assert_eq!(ctx.attempt(), 2);
        assert_eq!(ctx.retry_delay_ms(), Some(200));
    }

    #[test]
    fn test_exhausted_record_is_not_retried_again() {
        let hook = hook_without_jitter();
        let err = ErrorRecord::external("timeout", "slow");
        let mut ctx = RecoveryContext::new().with_attempt(3);

        let escalated = hook.recover(&err, &mut ctx).unwrap();
        assert!(escalated.is_fatal());
        assert!(hook.should_recover(&err, &ctx));
        assert!(!hook.should_recover(&escalated, &ctx));
    }
}
