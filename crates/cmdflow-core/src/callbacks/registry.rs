//! Callback registry with a compiled-chain cache
//!
//! Production runs repeat the same handful of transitions, so the matching
//! callbacks for each `(from, to, transition)` triple are computed once and
//! cached behind an `Arc`. Registration takes `&mut self` and clears the
//! cache; a registry shared through `Arc` is therefore frozen and only its
//! cache and counters change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::{AroundFn, Callback, CallbackCondition, CallbackKind, ErrorFn, HookFn, Proceed};
use crate::config::CallbacksConfig;
use crate::errors::{Interrupt, PhaseResult};
use crate::state_machine::{ExecutionState, HAPPY_PATH};

/// A callback together with its scope and ordering data
pub struct RegisteredCallback<C, V> {
    pub callback: Callback<C, V>,
    pub condition: CallbackCondition,
    /// Lower runs first
    pub priority: i32,
    /// Registration order; breaks priority ties
    pub sequence: u64,
}

impl<C, V> Clone for RegisteredCallback<C, V> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            condition: self.condition.clone(),
            priority: self.priority,
            sequence: self.sequence,
        }
    }
}

/// Matching callbacks for one concrete transition, by kind, in run order
pub struct CompiledChain<C, V> {
    pub before: Vec<HookFn<C>>,
    pub after: Vec<HookFn<C>>,
    pub around: Vec<AroundFn<C, V>>,
    pub error: Vec<ErrorFn<C>>,
}

impl<C, V> CompiledChain<C, V> {
    /// Callbacks of one kind as tagged values
    pub fn callbacks(&self, kind: CallbackKind) -> Vec<Callback<C, V>> {
        match kind {
            CallbackKind::Before => self.before.iter().cloned().map(Callback::Before).collect(),
            CallbackKind::After => self.after.iter().cloned().map(Callback::After).collect(),
            CallbackKind::Around => self.around.iter().cloned().map(Callback::Around).collect(),
            CallbackKind::Error => self.error.iter().cloned().map(Callback::Error).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
            && self.after.is_empty()
            && self.around.is_empty()
            && self.error.is_empty()
    }
}

/// Cache observability counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compiled_chains: usize,
}

type ChainCache<C, V> = HashMap<(ExecutionState, ExecutionState), HashMap<String, Arc<CompiledChain<C, V>>>>;

pub struct CallbackRegistry<C, V> {
    before: Vec<RegisteredCallback<C, V>>,
    after: Vec<RegisteredCallback<C, V>>,
    around: Vec<RegisteredCallback<C, V>>,
    error: Vec<RegisteredCallback<C, V>>,
    next_sequence: u64,
    chains: RwLock<ChainCache<C, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<C, V> Default for CallbackRegistry<C, V> {
    fn default() -> Self {
        Self {
            before: Vec::new(),
            after: Vec::new(),
            around: Vec::new(),
            error: Vec::new(),
            next_sequence: 0,
            chains: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<C, V> CallbackRegistry<C, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, kind: CallbackKind) -> &[RegisteredCallback<C, V>] {
        match kind {
            CallbackKind::Before => &self.before,
            CallbackKind::After => &self.after,
            CallbackKind::Around => &self.around,
            CallbackKind::Error => &self.error,
        }
    }

    fn list_mut(&mut self, kind: CallbackKind) -> &mut Vec<RegisteredCallback<C, V>> {
        match kind {
            CallbackKind::Before => &mut self.before,
            CallbackKind::After => &mut self.after,
            CallbackKind::Around => &mut self.around,
            CallbackKind::Error => &mut self.error,
        }
    }

    fn clear_cache(&mut self) {
        self.chains
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Register a callback; equal priorities keep registration order
    pub fn register(
        &mut self,
        callback: Callback<C, V>,
        condition: CallbackCondition,
        priority: i32,
    ) -> &mut Self {
        let kind = callback.kind();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        tracing::debug!(
            kind = %kind,
            priority,
            sequence,
            global = condition.is_global(),
            "callback registered"
        );
        let list = self.list_mut(kind);
        list.push(RegisteredCallback {
            callback,
            condition,
            priority,
            sequence,
        });
        list.sort_by_key(|r| (r.priority, r.sequence));
        self.clear_cache();
        self
    }

    /// Number of registered callbacks of all kinds
    pub fn len(&self) -> usize {
        self.before.len() + self.after.len() + self.around.len() + self.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// O(1) check backing the executor's fast path
    pub fn has_callbacks(&self) -> bool {
        !self.is_empty()
    }

    fn scan(
        &self,
        kind: CallbackKind,
        from: ExecutionState,
        to: ExecutionState,
        transition: &str,
    ) -> Vec<Callback<C, V>> {
        self.list(kind)
            .iter()
            .filter(|r| r.condition.matches(from, to, transition))
            .map(|r| r.callback.clone())
            .collect()
    }

    fn cached(
        &self,
        from: ExecutionState,
        to: ExecutionState,
        transition: &str,
    ) -> Option<Arc<CompiledChain<C, V>>> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(from, to))
            .and_then(|by_name| by_name.get(transition))
            .cloned()
    }

    /// Matching callbacks of one kind, in priority order
    ///
    /// Served from the compiled chain when one exists (hit); otherwise
    /// computed by a linear scan (miss) without populating the cache.
    pub fn get_callbacks(
        &self,
        kind: CallbackKind,
        from: ExecutionState,
        to: ExecutionState,
        transition: &str,
    ) -> Vec<Callback<C, V>> {
        match self.cached(from, to, transition) {
            Some(chain) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                chain.callbacks(kind)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.scan(kind, from, to, transition)
            }
        }
    }

    fn build_chain(
        &self,
        from: ExecutionState,
        to: ExecutionState,
        transition: &str,
    ) -> CompiledChain<C, V> {
        let mut chain = CompiledChain {
            before: Vec::new(),
            after: Vec::new(),
            around: Vec::new(),
            error: Vec::new(),
        };
        let all = self
            .before
            .iter()
            .chain(&self.after)
            .chain(&self.around)
            .chain(&self.error);
        for registered in all.filter(|r| r.condition.matches(from, to, transition)) {
            match &registered.callback {
                Callback::Before(f) => chain.before.push(Arc::clone(f)),
                Callback::After(f) => chain.after.push(Arc::clone(f)),
                Callback::Around(f) => chain.around.push(Arc::clone(f)),
                Callback::Error(f) => chain.error.push(Arc::clone(f)),
            }
        }
        chain
    }

    /// Compile and cache all four lists for one transition
    ///
    /// Idempotent: later calls return the same `Arc` and count as hits.
    pub fn compile_chain(
        &self,
        from: ExecutionState,
        to: ExecutionState,
        transition: &str,
    ) -> Arc<CompiledChain<C, V>> {
        if let Some(chain) = self.cached(from, to, transition) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return chain;
        }

        let mut chains = self.chains.write().unwrap_or_else(PoisonError::into_inner);
        let by_name = chains.entry((from, to)).or_default();
        // Another thread may have compiled it between the two locks.
        if let Some(chain) = by_name.get(transition) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(chain);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let chain = Arc::new(self.build_chain(from, to, transition));
        by_name.insert(transition.to_string(), Arc::clone(&chain));
        tracing::debug!(
            from_state = %from,
            to_state = %to,
            transition,
            before = chain.before.len(),
            around = chain.around.len(),
            after = chain.after.len(),
            error = chain.error.len(),
            "callback chain compiled"
        );
        chain
    }

    /// Compile every happy-path pipeline transition
    pub fn precompile_common_transitions(&self) {
        for (from, to, transition) in HAPPY_PATH {
            self.compile_chain(from, to, transition);
        }
    }

    /// Share the registry, precompiling happy-path chains if configured
    ///
    /// Registration needs `&mut self`, so the returned registry is frozen.
    pub fn freeze(self, config: &CallbacksConfig) -> Arc<Self> {
        if config.precompile_common_transitions && self.has_callbacks() {
            self.precompile_common_transitions();
        }
        Arc::new(self)
    }

    /// New registry with this registry's callbacks followed by `other`'s
    ///
    /// Neither input changes; the result starts with an empty cache.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = Self::new();
        for registered in self.all_registered().chain(other.all_registered()) {
            let sequence = merged.next_sequence;
            merged.next_sequence += 1;
            let kind = registered.callback.kind();
            merged.list_mut(kind).push(RegisteredCallback {
                sequence,
                ..registered.clone()
            });
        }
        for kind in [
            CallbackKind::Before,
            CallbackKind::After,
            CallbackKind::Around,
            CallbackKind::Error,
        ] {
            merged
                .list_mut(kind)
                .sort_by_key(|r| (r.priority, r.sequence));
        }
        merged
    }

    // Registration order across all kinds.
    fn all_registered(&self) -> impl Iterator<Item = &RegisteredCallback<C, V>> {
        let mut all: Vec<&RegisteredCallback<C, V>> = self
            .before
            .iter()
            .chain(&self.after)
            .chain(&self.around)
            .chain(&self.error)
            .collect();
        all.sort_by_key(|r| r.sequence);
        all.into_iter()
    }

    pub fn cache_stats(&self) -> CacheStats {
        let compiled_chains = self
            .chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashMap::len)
            .sum();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            compiled_chains,
        }
    }
}

impl<C: 'static, V: 'static> CallbackRegistry<C, V> {
    /// Register a Before callback
    pub fn before<F>(&mut self, condition: CallbackCondition, priority: i32, f: F) -> &mut Self
    where
        F: Fn(&mut C) -> PhaseResult<()> + Send + Sync + 'static,
    {
        self.register(Callback::Before(Arc::new(f)), condition, priority)
    }

    /// Register an After callback
    pub fn after<F>(&mut self, condition: CallbackCondition, priority: i32, f: F) -> &mut Self
    where
        F: Fn(&mut C) -> PhaseResult<()> + Send + Sync + 'static,
    {
        self.register(Callback::After(Arc::new(f)), condition, priority)
    }

    /// Register an Around callback; lower priority wraps outermost
    pub fn around<F>(&mut self, condition: CallbackCondition, priority: i32, f: F) -> &mut Self
    where
        F: Fn(&mut C, Proceed<'_, C, V>) -> PhaseResult<V> + Send + Sync + 'static,
    {
        self.register(Callback::Around(Arc::new(f)), condition, priority)
    }

    /// Register an Error callback
    pub fn on_error<F>(&mut self, condition: CallbackCondition, priority: i32, f: F) -> &mut Self
    where
        F: Fn(&mut C, &Interrupt) + Send + Sync + 'static,
    {
        self.register(Callback::Error(Arc::new(f)), condition, priority)
    }
}

impl<C, V> std::fmt::Debug for CallbackRegistry<C, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("around", &self.around.len())
            .field("error", &self.error.len())
            .field("cache", &self.cache_stats())
            .finish()
    }
}
