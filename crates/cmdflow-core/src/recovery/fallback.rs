//! Substitute a fallback value for a failed operation

use std::sync::Arc;

use serde_json::Value;

use super::{RecoveryContext, RecoveryHook};
use crate::errors::ErrorRecord;

/// Computes a fallback value from the failed error
pub type FallbackFn =
    Arc<dyn Fn(&ErrorRecord, &RecoveryContext) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Clone)]
enum FallbackSource {
    Static(Value),
    Function(FallbackFn),
}

/// Recovers an error by storing a value in `fallback_result`
///
/// With an empty symbol list the hook applies to every error. A fallback
/// function that fails is logged and leaves the error unrecovered.
#[derive(Clone)]
pub struct FallbackHook {
    symbols: Vec<String>,
    source: FallbackSource,
}

impl FallbackHook {
    /// Always fall back to `value`
    pub fn with_value(value: impl Into<Value>) -> Self {
        Self {
            symbols: Vec::new(),
            source: FallbackSource::Static(value.into()),
        }
    }

    /// Compute the fallback from the error and context
    pub fn with_function<F>(f: F) -> Self
    where
        F: Fn(&ErrorRecord, &RecoveryContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            symbols: Vec::new(),
            source: FallbackSource::Function(Arc::new(f)),
        }
    }

    /// Restrict the hook to errors with one of these symbols
    pub fn for_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

impl RecoveryHook for FallbackHook {
    fn name(&self) -> &str {
        "fallback"
    }

    fn should_recover(&self, error: &ErrorRecord, _ctx: &RecoveryContext) -> bool {
        self.symbols.is_empty() || self.symbols.iter().any(|s| s == error.symbol())
    }

    fn recover(&self, error: &ErrorRecord, ctx: &mut RecoveryContext) -> Option<ErrorRecord> {
        let value = match &self.source {
            FallbackSource::Static(value) => Ok(value.clone()),
            FallbackSource::Function(f) => f(error, ctx),
        };

        match value {
            Ok(value) => {
                tracing::debug!(symbol = error.symbol(), "fallback applied");
                ctx.set_fallback_result(value);
                None
            }
            Err(e) => {
                tracing::warn!(
                    symbol = error.symbol(),
                    error = %e,
                    "fallback function failed"
                );
                Some(error.clone())
            }
        }
    }
}

impl std::fmt::Debug for FallbackHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            FallbackSource::Static(_) => "static",
            FallbackSource::Function(_) => "function",
        };
        f.debug_struct("FallbackHook")
            .field("symbols", &self.symbols)
            .field("source", &source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_static_value_recovers() {
        let hook = FallbackHook::with_value(json!({"cached": true}));
        let mut ctx = RecoveryContext::new();
        let err = ErrorRecord::external("service_unavailable", "down");

        assert!(hook.should_recover(&err, &ctx));
        assert!(hook.recover(&err, &mut ctx).is_none());
        assert_eq!(ctx.fallback_result(), Some(&json!({"cached": true})));
    }

    #[test]
    fn test_symbol_allow_list() {
        let hook = FallbackHook::with_value(0).for_symbols(["timeout"]);
        let ctx = RecoveryContext::new();
        assert!(hook.should_recover(&ErrorRecord::runtime("timeout", "slow"), &ctx));
        assert!(!hook.should_recover(&ErrorRecord::runtime("crash", "boom"), &ctx));
    }

    #[test]
    fn test_function_sees_error() {
        let hook = FallbackHook::with_function(|err, _ctx| Ok(json!(err.symbol())));
        let mut ctx = RecoveryContext::new();
        hook.recover(&ErrorRecord::runtime("timeout", "slow"), &mut ctx);
        assert_eq!(ctx.fallback_result(), Some(&json!("timeout")));
    }

    #[test]
    fn test_failing_function_returns_original() {
        let hook = FallbackHook::with_function(|_err, _ctx| anyhow::bail!("cache offline"));
        let mut ctx = RecoveryContext::new();
        let err = ErrorRecord::runtime("timeout", "slow");

        let returned = hook.recover(&err, &mut ctx).unwrap();
        assert_eq!(returned.id(), err.id());
        assert!(ctx.fallback_result().is_none());
    }
}
