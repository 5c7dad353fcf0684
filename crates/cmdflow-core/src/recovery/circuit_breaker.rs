//! Per-identifier circuit breakers
//!
//! ```text
//! Closed --(failures >= failure_threshold)--> Open
//! Open --(timeout elapsed)--> HalfOpen
//! HalfOpen --(successes >= success_threshold)--> Closed
//! HalfOpen --(any failure)--> Open
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{RecoveryContext, RecoveryHook, KEY_CIRCUIT_BREAKER_ID};
use crate::config::EngineConfig;
use crate::errors::{ErrorRecord, Severity};

pub const SYMBOL_CIRCUIT_BREAKER_OPEN: &str = "circuit_breaker_open";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    /// Time an open breaker waits before allowing a trial call
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// State of a single breaker
///
/// The `*_at` methods take the current instant explicitly; the plain
/// variants use `Instant::now()`.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn can_execute(&mut self) -> bool {
        self.can_execute_at(Instant::now())
    }

    /// Open breakers move to HalfOpen once the timeout has elapsed
    pub fn can_execute_at(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure
                    .map_or(true, |at| now.saturating_duration_since(at) >= self.config.timeout());
                if elapsed {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    tracing::debug!("circuit breaker half-open");
                }
                elapsed
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.last_failure = Some(now);
        self.last_failure_at = Some(Utc::now());
        self.failure_count = self.failure_count.saturating_add(1);
        match self.state {
            CircuitState::Closed if self.failure_count >= self.config.failure_threshold => {
                self.trip();
            }
            CircuitState::HalfOpen => self.trip(),
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                self.success_count = self.success_count.saturating_add(1);
                if self.success_count >= self.config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    tracing::debug!("circuit breaker closed");
                }
            }
            // Closed counts consecutive failures.
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.success_count = 0;
        tracing::debug!(failure_count = self.failure_count, "circuit breaker opened");
    }

    pub fn status(&self) -> CircuitStatus {
        CircuitStatus {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_at: self.last_failure_at,
        }
    }
}

/// Recovery hook that tracks failures per identifier
///
/// Every `recover` call records a failure against the breaker named by the
/// context's `circuit_breaker_id`. While that breaker is open the error is
/// escalated to a fatal `circuit_breaker_open` record. Callers use
/// [`CircuitBreakerHook::check_before_execution`] to skip an operation
/// entirely while its breaker is open.
#[derive(Debug, Default)]
pub struct CircuitBreakerHook {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerHook {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.circuit_breaker.clone())
    }

    fn breakers(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_breaker<R>(&self, id: &str, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        let mut breakers = self.breakers();
        let breaker = breakers
            .entry(id.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()));
        f(breaker)
    }

    pub fn can_execute(&self, id: &str) -> bool {
        self.can_execute_at(id, Instant::now())
    }

    pub fn can_execute_at(&self, id: &str, now: Instant) -> bool {
        self.with_breaker(id, |b| b.can_execute_at(now))
    }

    /// Guard to call before attempting an operation
    ///
    /// # Errors
    ///
    /// A fatal `circuit_breaker_open` record while the breaker is open.
    pub fn check_before_execution(&self, id: &str) -> Result<(), ErrorRecord> {
        if self.can_execute(id) {
            Ok(())
        } else {
            Err(open_error(id))
        }
    }

    pub fn record_success(&self, id: &str) {
        self.with_breaker(id, CircuitBreaker::record_success);
    }

    pub fn record_failure(&self, id: &str) {
        self.record_failure_at(id, Instant::now());
    }

    pub fn record_failure_at(&self, id: &str, now: Instant) {
        self.with_breaker(id, |b| b.record_failure_at(now));
    }

    /// Snapshot of a breaker, if it exists yet
    pub fn status(&self, id: &str) -> Option<CircuitStatus> {
        self.breakers().get(id).map(CircuitBreaker::status)
    }
}

fn open_error(id: &str) -> ErrorRecord {
    ErrorRecord::external(
        SYMBOL_CIRCUIT_BREAKER_OPEN,
        format!("Circuit breaker '{}' is open", id),
    )
    .with_severity(Severity::Critical)
    .with_fatal(true)
    .with_context(KEY_CIRCUIT_BREAKER_ID, id)
    .with_suggestion("Wait for the breaker timeout before retrying")
}

impl RecoveryHook for CircuitBreakerHook {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn should_recover(&self, _error: &ErrorRecord, _ctx: &RecoveryContext) -> bool {
        true
    }

    fn recover(&self, error: &ErrorRecord, ctx: &mut RecoveryContext) -> Option<ErrorRecord> {
        let id = ctx.circuit_breaker_id().to_string();
        let state = self.with_breaker(&id, |b| {
            b.record_failure();
            b.state()
        });

        if state == CircuitState::Open {
            tracing::debug!(circuit_breaker_id = %id, symbol = error.symbol(), "escalating: breaker open");
            return Some(
                open_error(&id)
                    .with_context("original_error", error.key())
                    .with_cause(error.clone()),
            );
        }
        Some(error.clone())
    }
}
