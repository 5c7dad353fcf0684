//! Runs one phase action inside its callback chain

use super::{AroundFn, CallbackRegistry, CompiledChain};
use crate::errors::PhaseResult;
use crate::state_machine::ExecutionState;

/// Borrows a registry and runs transitions through it
pub struct CallbackExecutor<'r, C, V> {
    registry: &'r CallbackRegistry<C, V>,
}

impl<'r, C, V> CallbackExecutor<'r, C, V> {
    pub fn new(registry: &'r CallbackRegistry<C, V>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r CallbackRegistry<C, V> {
        self.registry
    }

    /// Run `action` for one transition with all matching callbacks
    ///
    /// Before callbacks run in order, then the Around chain wraps the
    /// action, then After callbacks run. Any interrupt from those steps is
    /// shown to every Error callback and then returned unchanged. With no
    /// callbacks registered at all, `action` is called directly.
    ///
    /// # Errors
    ///
    /// The first interrupt raised by a callback or by `action`.
    pub fn execute_transition<F>(
        &self,
        ctx: &mut C,
        from: ExecutionState,
        to: ExecutionState,
        transition: &str,
        mut action: F,
    ) -> PhaseResult<V>
    where
        F: FnMut(&mut C) -> PhaseResult<V>,
    {
        if !self.registry.has_callbacks() {
            return action(ctx);
        }

        let chain = self.registry.compile_chain(from, to, transition);

        let result = run_chain(&chain, ctx, &mut action);

        if let Err(interrupt) = &result {
            tracing::debug!(
                transition,
                halted = interrupt.is_halt(),
                error_callbacks = chain.error.len(),
                "transition interrupted"
            );
            for on_error in &chain.error {
                on_error(ctx, interrupt);
            }
        }
        result
    }
}

fn run_chain<C, V>(
    chain: &CompiledChain<C, V>,
    ctx: &mut C,
    action: &mut dyn FnMut(&mut C) -> PhaseResult<V>,
) -> PhaseResult<V> {
    for before in &chain.before {
        before(ctx)?;
    }
    let value = run_around(&chain.around, ctx, action)?;
    for after in &chain.after {
        after(ctx)?;
    }
    Ok(value)
}

// First element (lowest priority) is the outermost wrapper.
fn run_around<C, V>(
    arounds: &[AroundFn<C, V>],
    ctx: &mut C,
    action: &mut dyn FnMut(&mut C) -> PhaseResult<V>,
) -> PhaseResult<V> {
    match arounds.split_first() {
        None => action(ctx),
        Some((outer, inner)) => {
            let mut proceed = |ctx: &mut C| run_around(inner, ctx, &mut *action);
            outer(ctx, &mut proceed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::CallbackCondition;
    use crate::errors::{ErrorRecord, Interrupt};
    use ExecutionState::*;

    type Registry = CallbackRegistry<Vec<String>, i32>;

    fn run(registry: &Registry, log: &mut Vec<String>) -> PhaseResult<i32> {
        CallbackExecutor::new(registry).execute_transition(
            log,
            Validating,
            Executing,
            "execute",
            |log: &mut Vec<String>| {
                log.push("action".to_string());
                Ok(21)
            },
        )
    }

    #[test]
    fn test_fast_path_calls_action() {
        let registry = Registry::new();
        let mut log = Vec::new();
        assert_eq!(run(&registry, &mut log).unwrap(), 21);
        assert_eq!(log, vec!["action"]);
        assert_eq!(registry.cache_stats().misses, 0);
    }

    #[test]
    fn test_around_nesting_order() {
        let mut registry = Registry::new();
        for priority in [10, 5] {
            registry.around(CallbackCondition::any(), priority, move |log, proceed| {
                log.push(format!("{}-start", priority));
                let value = proceed(log)?;
                log.push(format!("{}-end", priority));
                Ok(value)
            });
        }
        let mut log = Vec::new();
        run(&registry, &mut log).unwrap();
        assert_eq!(
            log,
            vec!["5-start", "10-start", "action", "10-end", "5-end"]
        );
    }

    #[test]
    fn test_around_transforms_value() {
        let mut registry = Registry::new();
        registry.around(CallbackCondition::any(), 0, |log, proceed| {
            Ok(proceed(log)? * 2)
        });
        assert_eq!(run(&registry, &mut Vec::new()).unwrap(), 42);
    }

    #[test]
    fn test_before_halt_skips_rest_and_fires_error_callbacks() {
        let mut registry = Registry::new();
        registry
            .before(CallbackCondition::any(), 0, |_log| Err(Interrupt::Halted))
            .before(CallbackCondition::any(), 1, |log| {
                log.push("second-before".to_string());
                Ok(())
            })
            .after(CallbackCondition::any(), 0, |log| {
                log.push("after".to_string());
                Ok(())
            })
            .on_error(CallbackCondition::any(), 0, |log, interrupt| {
                log.push(format!("error:{}", interrupt));
            });

        let mut log = Vec::new();
        let result = run(&registry, &mut log);
        assert!(matches!(result, Err(Interrupt::Halted)));
        assert_eq!(log, vec!["error:halted"]);
    }

    #[test]
    fn test_action_failure_survives_error_callbacks() {
        let mut registry = Registry::new();
        registry.on_error(CallbackCondition::any(), 0, |log, _| {
            log.push("observed".to_string());
        });

        let mut log = Vec::new();
        let result = CallbackExecutor::new(&registry).execute_transition(
            &mut log,
            Validating,
            Executing,
            "execute",
            |_log: &mut Vec<String>| Err(ErrorRecord::domain("denied", "not allowed").into()),
        );
        let err = result.unwrap_err();
        assert_eq!(err.error().map(|e| e.symbol()), Some("denied"));
        assert_eq!(log, vec!["observed"]);
    }

    #[test]
    fn test_halt_propagates_through_around() {
        let mut registry = Registry::new();
        registry.around(CallbackCondition::any(), 0, |log, proceed| {
            log.push("outer".to_string());
            let value = proceed(log)?;
            log.push("unreachable".to_string());
            Ok(value)
        });
        let mut log = Vec::new();
        let result = CallbackExecutor::new(&registry).execute_transition(
            &mut log,
            Validating,
            Executing,
            "execute",
            |_log: &mut Vec<String>| Err(Interrupt::Halted),
        );
        assert!(matches!(result, Err(Interrupt::Halted)));
        assert_eq!(log, vec!["outer"]);
    }
}
