//! Pluggable error recovery
//!
//! A [`RecoveryHook`] inspects one [`ErrorRecord`] and either recovers it
//! (`None`), passes it on unchanged, or escalates it to a new record. Hooks
//! share a [`RecoveryContext`] side channel: retry hooks leave
//! `should_retry`/`retry_delay_ms` there, fallback hooks leave
//! `fallback_result`.
//!
//! Recovery is advisory. Nothing here loops or sleeps; callers read the
//! context and decide whether to run the operation again.

pub mod circuit_breaker;
pub mod fallback;
pub mod manager;
pub mod retry;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::ErrorRecord;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook, CircuitState, CircuitStatus,
};
pub use fallback::{FallbackFn, FallbackHook};
pub use manager::{Recoverable, RecoveryManager, RecoveryResult, Remaining};
pub use retry::{RetryConfig, RetryHook};

/// Attempt counter (1-based)
pub const KEY_ATTEMPT: &str = "attempt";
/// Whether the caller should run the operation again
pub const KEY_SHOULD_RETRY: &str = "should_retry";
/// Suggested wait before the next attempt
pub const KEY_RETRY_DELAY_MS: &str = "retry_delay_ms";
/// Value produced by a fallback hook
pub const KEY_FALLBACK_RESULT: &str = "fallback_result";
/// Breaker a circuit-breaker hook records against
pub const KEY_CIRCUIT_BREAKER_ID: &str = "circuit_breaker_id";

/// One recovery strategy
pub trait RecoveryHook: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this hook applies to `error` at all
    fn should_recover(&self, error: &ErrorRecord, ctx: &RecoveryContext) -> bool;

    /// `None` when recovered; otherwise the error for the next hook
    fn recover(&self, error: &ErrorRecord, ctx: &mut RecoveryContext) -> Option<ErrorRecord>;
}

/// Free-form side channel shared by the hooks of one recovery attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryContext {
    values: BTreeMap<String, Value>,
}

impl RecoveryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.set_attempt(attempt);
        self
    }

    pub fn with_circuit_breaker_id(mut self, id: impl Into<String>) -> Self {
        self.set(KEY_CIRCUIT_BREAKER_ID, id.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Current attempt; 1 when unset
    pub fn attempt(&self) -> u32 {
        self.values
            .get(KEY_ATTEMPT)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1)
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.set(KEY_ATTEMPT, attempt);
    }

    pub fn should_retry(&self) -> bool {
        self.values
            .get(KEY_SHOULD_RETRY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_should_retry(&mut self, should_retry: bool) {
        self.set(KEY_SHOULD_RETRY, should_retry);
    }

    pub fn retry_delay_ms(&self) -> Option<u64> {
        self.values.get(KEY_RETRY_DELAY_MS).and_then(Value::as_u64)
    }

    pub fn fallback_result(&self) -> Option<&Value> {
        self.values.get(KEY_FALLBACK_RESULT)
    }

    pub fn set_fallback_result(&mut self, value: Value) {
        self.set(KEY_FALLBACK_RESULT, value);
    }

    /// Breaker identifier; `"default"` when unset
    pub fn circuit_breaker_id(&self) -> &str {
        self.values
            .get(KEY_CIRCUIT_BREAKER_ID)
            .and_then(Value::as_str)
            .unwrap_or("default")
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let ctx = RecoveryContext::new();
        assert_eq!(ctx.attempt(), 1);
        assert!(!ctx.should_retry());
        assert_eq!(ctx.retry_delay_ms(), None);
        assert_eq!(ctx.fallback_result(), None);
        assert_eq!(ctx.circuit_breaker_id(), "default");
    }

    #[test]
    fn test_typed_accessors_round_trip_through_keys() {
        let mut ctx = RecoveryContext::new()
            .with_attempt(2)
            .with_circuit_breaker_id("payments");
        ctx.set_should_retry(true);
        ctx.set(KEY_RETRY_DELAY_MS, 400u64);

        assert_eq!(ctx.get(KEY_ATTEMPT), Some(&Value::from(2)));
        assert_eq!(ctx.attempt(), 2);
        assert!(ctx.should_retry());
        assert_eq!(ctx.retry_delay_ms(), Some(400));
        assert_eq!(ctx.circuit_breaker_id(), "payments");
        assert_eq!(ctx.to_value()["circuit_breaker_id"], "payments");
    }
}
