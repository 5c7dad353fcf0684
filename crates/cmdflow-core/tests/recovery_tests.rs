#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cmdflow_core::errors::{ErrorRecord, Severity};
use cmdflow_core::recovery::{
    CircuitBreakerConfig, CircuitBreakerHook, CircuitState, FallbackHook, RecoveryContext,
    RecoveryHook, RecoveryManager, Remaining, RetryConfig, RetryHook,
};
use cmdflow_core::{EngineConfig, ErrorCollection};
use serde_json::json;

fn retry_hook(max_attempts: u32) -> RetryHook {
    RetryHook::new(RetryConfig {
        max_attempts,
        initial_delay_ms: 100,
        max_delay_ms: 10_000,
        jitter: false,
        ..RetryConfig::default()
    })
}

#[test]
fn test_retry_attempts_one_two_three() {
    let hook = retry_hook(3);
    let err = ErrorRecord::external("timeout", "upstream timed out");
    let mut ctx = RecoveryContext::new();

    // Attempt 1
    let returned = hook.recover(&err, &mut ctx).unwrap();
    assert_eq!(returned.id(), err.id());
    assert!(ctx.should_retry());
    assert_eq!(ctx.attempt(), 2);
    assert_eq!(ctx.retry_delay_ms(), Some(200));

    // Attempt 2
    let returned = hook.recover(&err, &mut ctx).unwrap();
    assert_eq!(returned.id(), err.id());
    assert!(ctx.should_retry());
    assert_eq!(ctx.attempt(), 3);
    assert_eq!(ctx.retry_delay_ms(), Some(400));

    // Attempt 3: exhausted
    let escalated = hook.recover(&err, &mut ctx).unwrap();
    assert_ne!(escalated.id(), err.id());
    assert!(escalated.is_fatal());
    assert_eq!(escalated.severity(), Severity::Fatal);
    assert_eq!(escalated.context_value("attempts"), Some(&json!(3)));
    assert_eq!(escalated.context_value("retry_exhausted"), Some(&json!(true)));
    assert!(!ctx.should_retry());
}

#[test]
fn test_retry_skips_non_retryable_errors() {
    let manager = RecoveryManager::new().with_hook(retry_hook(3));
    let err = ErrorRecord::data("invalid", "bad input");
    let mut ctx = RecoveryContext::new();

    let result = manager.attempt_recovery(&err, &mut ctx);
    assert!(!result.recovered);
    assert!(!ctx.contains("should_retry"));
}

#[test]
fn test_retry_then_fallback_chain() {
    let manager = RecoveryManager::new()
        .with_hook(retry_hook(3))
        .with_hook(FallbackHook::with_value(json!({"source": "cache"})).for_symbols(["timeout"]));
    let mut ctx = RecoveryContext::new();

    let result = manager.attempt_recovery(&ErrorRecord::external("timeout", "slow"), &mut ctx);
    assert!(result.recovered);
    assert!(ctx.should_retry());
    assert_eq!(ctx.fallback_result(), Some(&json!({"source": "cache"})));
}

#[test]
fn test_collection_recovery_keeps_only_unrecovered() {
    let manager =
        RecoveryManager::new().with_hook(FallbackHook::with_value(0).for_symbols(["timeout"]));
    let mut errors = ErrorCollection::new();
    errors.add(ErrorRecord::external("timeout", "slow"));
    errors.add(ErrorRecord::domain("overdrawn", "balance too low"));

    let result = manager.attempt_recovery(&errors, &mut RecoveryContext::new());
    assert!(result.recovered);
    match result.remaining {
        Some(Remaining::Collection(left)) => {
            assert_eq!(left.len(), 1);
            assert_eq!(left.first().unwrap().symbol(), "overdrawn");
        }
        other => panic!("unexpected remaining: {:?}", other),
    }
}

#[test]
fn test_collection_fully_recovered_has_no_remaining() {
    let manager = RecoveryManager::new().with_hook(FallbackHook::with_value(0));
    let errors: ErrorCollection = vec![
        ErrorRecord::external("timeout", "a"),
        ErrorRecord::external("rate_limited", "b"),
    ]
    .into_iter()
    .collect();

    let result = manager.attempt_recovery(&errors, &mut RecoveryContext::new());
    assert!(result.recovered);
    assert!(result.remaining.is_none());
}

#[test]
fn test_collection_nothing_recovered() {
    let manager = RecoveryManager::new();
    let errors: ErrorCollection = vec![ErrorRecord::domain("a", "a")].into_iter().collect();

    let result = manager.attempt_recovery(&errors, &mut RecoveryContext::new());
    assert!(!result.recovered);
    assert_eq!(result.remaining.unwrap().into_collection().len(), 1);
}

#[test]
fn test_circuit_breaker_thresholds_through_hook() {
    let hook = CircuitBreakerHook::new(CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        timeout_ms: 1_000,
    });
    let err = ErrorRecord::external("service_unavailable", "down");
    let mut ctx = RecoveryContext::new().with_circuit_breaker_id("payments");

    for _ in 0..2 {
        let returned = hook.recover(&err, &mut ctx).unwrap();
        assert_eq!(returned.id(), err.id());
    }
    assert!(hook.can_execute("payments"));

    let escalated = hook.recover(&err, &mut ctx).unwrap();
    assert_eq!(escalated.symbol(), "circuit_breaker_open");
    assert!(escalated.is_fatal());
    assert_eq!(escalated.cause().unwrap().id(), err.id());
    assert_eq!(
        escalated.context_value("original_error"),
        Some(&json!("external.root.service_unavailable"))
    );

    assert!(!hook.can_execute("payments"));
    let guard = hook.check_before_execution("payments").unwrap_err();
    assert_eq!(guard.symbol(), "circuit_breaker_open");

    // Other identifiers are unaffected
    assert!(hook.can_execute("default"));
    assert!(hook.check_before_execution("search").is_ok());
}

#[test]
fn test_circuit_breaker_timeout_and_half_open_recovery() {
    let hook = CircuitBreakerHook::new(CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        timeout_ms: 500,
    });
    let t0 = Instant::now();
    for _ in 0..3 {
        hook.record_failure_at("db", t0);
    }
    assert!(!hook.can_execute_at("db", t0 + Duration::from_millis(100)));

    assert!(hook.can_execute_at("db", t0 + Duration::from_millis(500)));
    assert_eq!(hook.status("db").unwrap().state, CircuitState::HalfOpen);

    hook.record_success("db");
    hook.record_success("db");
    assert_eq!(hook.status("db").unwrap().state, CircuitState::Closed);
}

#[test]
fn test_circuit_breaker_is_safe_under_concurrent_failures() {
    let hook = Arc::new(CircuitBreakerHook::new(CircuitBreakerConfig {
        failure_threshold: 1_000,
        success_threshold: 1,
        timeout_ms: 60_000,
    }));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let hook = Arc::clone(&hook);
            thread::spawn(move || {
                for _ in 0..100 {
                    hook.record_failure("shared");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let status = hook.status("shared").unwrap();
    assert_eq!(status.failure_count, 400);
    assert_eq!(status.state, CircuitState::Closed);
}

#[test]
fn test_hooks_from_config() {
    let config = EngineConfig::from_toml_str(
        r#"
        [retry]
        max_attempts = 2
        jitter = false

        [circuit_breaker]
        failure_threshold = 1
        "#,
    )
    .unwrap();

    let retry = RetryHook::from_config(&config);
    assert_eq!(retry.config().max_attempts, 2);

    let breaker = CircuitBreakerHook::from_config(&config);
    breaker.record_failure("svc");
    assert!(!breaker.can_execute("svc"));
}

#[test]
fn test_global_circuit_breaker_escalation_feeds_next_hook() {
    let breaker = Arc::new(CircuitBreakerHook::new(CircuitBreakerConfig {
        failure_threshold: 1,
        ..CircuitBreakerConfig::default()
    }));
    let mut manager = RecoveryManager::new()
        .with_hook(FallbackHook::with_value("stale").for_symbols(["circuit_breaker_open"]));
    manager.add_global_hook(breaker.clone());

    let mut ctx = RecoveryContext::new().with_circuit_breaker_id("inventory");
    let result = manager.attempt_recovery(&ErrorRecord::external("timeout", "slow"), &mut ctx);

    assert!(result.recovered);
    assert_eq!(ctx.fallback_result(), Some(&json!("stale")));
    assert_eq!(breaker.status("inventory").unwrap().state, CircuitState::Open);
}
