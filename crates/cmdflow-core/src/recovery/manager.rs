//! Runs recovery hooks over one error or a whole collection

use std::sync::Arc;

use super::{RecoveryContext, RecoveryHook};
use crate::error_collection::ErrorCollection;
use crate::errors::ErrorRecord;

/// What to recover
#[derive(Debug, Clone, Copy)]
pub enum Recoverable<'a> {
    Error(&'a ErrorRecord),
    Collection(&'a ErrorCollection),
}

impl<'a> From<&'a ErrorRecord> for Recoverable<'a> {
    fn from(error: &'a ErrorRecord) -> Self {
        Recoverable::Error(error)
    }
}

impl<'a> From<&'a ErrorCollection> for Recoverable<'a> {
    fn from(errors: &'a ErrorCollection) -> Self {
        Recoverable::Collection(errors)
    }
}

/// What is left after recovery
#[derive(Debug, Clone)]
pub enum Remaining {
    Error(ErrorRecord),
    Collection(ErrorCollection),
}

impl Remaining {
    /// Flatten into a collection
    pub fn into_collection(self) -> ErrorCollection {
        match self {
            Remaining::Error(error) => std::iter::once(error).collect(),
            Remaining::Collection(errors) => errors,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryResult {
    /// True if at least one error was recovered
    pub recovered: bool,
    /// Unrecovered (possibly escalated) errors; `None` when nothing is left
    pub remaining: Option<Remaining>,
}

/// Ordered recovery hooks; global hooks run ahead of per-call hooks
#[derive(Default, Clone)]
pub struct RecoveryManager {
    global_hooks: Vec<Arc<dyn RecoveryHook>>,
    hooks: Vec<Arc<dyn RecoveryHook>>,
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_hook(mut self, hook: impl RecoveryHook + 'static) -> Self {
        self.global_hooks.push(Arc::new(hook));
        self
    }

    pub fn with_hook(mut self, hook: impl RecoveryHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Add a shared global hook (e.g. a circuit breaker used elsewhere too)
    pub fn add_global_hook(&mut self, hook: Arc<dyn RecoveryHook>) {
        self.global_hooks.push(hook);
    }

    pub fn add_hook(&mut self, hook: Arc<dyn RecoveryHook>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.global_hooks.is_empty() && self.hooks.is_empty()
    }

    /// Hook names in consultation order
    pub fn hook_names(&self) -> Vec<&str> {
        self.global_hooks
            .iter()
            .chain(&self.hooks)
            .map(|h| h.name())
            .collect()
    }

    // None when some hook recovered the error.
    fn recover_one(&self, error: &ErrorRecord, ctx: &mut RecoveryContext) -> Option<ErrorRecord> {
        let mut current = error.clone();
        for hook in self.global_hooks.iter().chain(&self.hooks) {
            if !hook.should_recover(&current, ctx) {
                continue;
            }
            match hook.recover(&current, ctx) {
                None => {
                    tracing::debug!(hook = hook.name(), key = error.key(), "error recovered");
                    return None;
                }
                Some(next) => {
                    if next.id() != current.id() {
                        tracing::debug!(
                            hook = hook.name(),
                            from = current.key(),
                            to = next.key(),
                            "error escalated"
                        );
                    }
                    current = next;
                }
            }
        }
        Some(current)
    }

    /// Try every applicable hook on a single error or on each error of a collection
    ///
    /// ```
    /// use cmdflow_core::recovery::{FallbackHook, RecoveryContext, RecoveryManager};
    /// use cmdflow_core::ErrorRecord;
    ///
    /// let manager = RecoveryManager::new().with_hook(FallbackHook::with_value("cached"));
    /// let mut ctx = RecoveryContext::new();
    /// let result = manager.attempt_recovery(&ErrorRecord::external("timeout", "slow"), &mut ctx);
    /// assert!(result.recovered);
    /// assert!(result.remaining.is_none());
    /// ```
    pub fn attempt_recovery<'a>(
        &self,
        target: impl Into<Recoverable<'a>>,
        ctx: &mut RecoveryContext,
    ) -> RecoveryResult {
        match target.into() {
            Recoverable::Error(error) => match self.recover_one(error, ctx) {
                None => RecoveryResult {
                    recovered: true,
                    remaining: None,
                },
                Some(remaining) => RecoveryResult {
                    recovered: false,
                    remaining: Some(Remaining::Error(remaining)),
                },
            },
            Recoverable::Collection(errors) => {
                let mut recovered = false;
                let mut remaining = ErrorCollection::new();
                for error in errors {
                    match self.recover_one(error, ctx) {
                        None => recovered = true,
                        Some(left) => {
                            remaining.add(left);
                        }
                    }
                }
                RecoveryResult {
                    recovered,
                    remaining: remaining
                        .has_errors()
                        .then_some(Remaining::Collection(remaining)),
                }
            }
        }
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("hooks", &self.hook_names())
            .finish()
    }
}
