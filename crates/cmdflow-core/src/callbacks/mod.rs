//! Transition callbacks
//!
//! External code hooks into any phase transition of a run with four kinds
//! of callback:
//!
//! - **Before**: runs ahead of the phase action; may interrupt it
//! - **Around**: wraps the action and may transform its value
//! - **After**: runs once the action returned normally
//! - **Error**: observes any interrupt escaping the above; cannot suppress it
//!
//! Callbacks are generic over the context `C` they mutate and the opaque
//! value `V` an Around wrapper sees.

pub mod condition;
pub mod executor;
pub mod registry;

use std::sync::Arc;

use crate::errors::{Interrupt, PhaseResult};

pub use condition::CallbackCondition;
pub use executor::CallbackExecutor;
pub use registry::{CacheStats, CallbackRegistry, CompiledChain, RegisteredCallback};

/// Continuation handed to an Around callback
///
/// Runs the next-inner Around callback, or the phase action itself for the
/// innermost one. It takes the context as its argument because the wrapper
/// holds the only mutable borrow of it.
pub type Proceed<'a, C, V> = &'a mut dyn FnMut(&mut C) -> PhaseResult<V>;

/// Before/After callback
pub type HookFn<C> = Arc<dyn Fn(&mut C) -> PhaseResult<()> + Send + Sync>;

/// Around callback
pub type AroundFn<C, V> = Arc<dyn Fn(&mut C, Proceed<'_, C, V>) -> PhaseResult<V> + Send + Sync>;

/// Error callback
pub type ErrorFn<C> = Arc<dyn Fn(&mut C, &Interrupt) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Before,
    After,
    Around,
    Error,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::Before => "before",
            CallbackKind::After => "after",
            CallbackKind::Around => "around",
            CallbackKind::Error => "error",
        }
    }
}

impl std::fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback of any kind
pub enum Callback<C, V> {
    Before(HookFn<C>),
    After(HookFn<C>),
    Around(AroundFn<C, V>),
    Error(ErrorFn<C>),
}

impl<C, V> Callback<C, V> {
    pub fn kind(&self) -> CallbackKind {
        match self {
            Callback::Before(_) => CallbackKind::Before,
            Callback::After(_) => CallbackKind::After,
            Callback::Around(_) => CallbackKind::Around,
            Callback::Error(_) => CallbackKind::Error,
        }
    }

    /// True when both values point at the same callback allocation
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callback::Before(a), Callback::Before(b)) | (Callback::After(a), Callback::After(b)) => {
                Arc::ptr_eq(a, b)
            }
            (Callback::Around(a), Callback::Around(b)) => Arc::ptr_eq(a, b),
            (Callback::Error(a), Callback::Error(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<C, V> Clone for Callback<C, V> {
    fn clone(&self) -> Self {
        match self {
            Callback::Before(f) => Callback::Before(Arc::clone(f)),
            Callback::After(f) => Callback::After(Arc::clone(f)),
            Callback::Around(f) => Callback::Around(Arc::clone(f)),
            Callback::Error(f) => Callback::Error(Arc::clone(f)),
        }
    }
}

impl<C, V> std::fmt::Debug for Callback<C, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback::{}", self.kind())
    }
}
