//! Drives one command through the execution state machine
//!
//! Every phase is a happy-path transition run through the callback
//! executor. A phase that records an error or halts sends the run to
//! `Failed` (rolling back any open transaction); a collaborator failure
//! sends it to `Errored` and surfaces as an [`EngineError`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use cmdflow_core::recovery::KEY_CIRCUIT_BREAKER_ID;
use cmdflow_core::state_machine::{TRANSITION_ERROR, TRANSITION_FAIL};
use cmdflow_core::{
    log_op_end, log_op_error, log_op_start, CallbackExecutor, CallbackRegistry, EngineError,
    ErrorCode, ErrorCollection, ErrorRecord, ExecutionState, Interrupt, PhaseResult,
    RecoveryContext, RecoveryManager, StateMachine, HAPPY_PATH,
};
use cmdflow_core_types::correlation::Correlation;
use serde_json::Value;

use super::collaborators::{
    FieldError, InputValidator, RecordLoad, RecordLoader, ResourceGuard, TransactionResource,
};
use super::command::{Command, Outcome};
use super::context::CommandContext;

/// Operation name used by the run's lifecycle logs
pub const OP_RUN: &str = "pipeline.run";

const SYMBOL_HALTED: &str = "halted";
const SYMBOL_MISSING_RESULT: &str = "missing_result";
const SYMBOL_NOT_FOUND: &str = "not_found";
const SYMBOL_ENVIRONMENT_FAILURE: &str = "environment_failure";

/// Callback registry for the context and result type of command `C`
///
/// Phases other than execute produce `None`; Around callbacks on the execute
/// transition see and may replace `Some(output)`.
pub type CommandRegistry<C> =
    CallbackRegistry<CommandContext<<C as Command>::Inputs>, Option<<C as Command>::Output>>;

/// Builder and runner for a single command run
///
/// ```
/// use cmdflow_core::PhaseResult;
/// use cmdflow_engine::commands::RawInputs;
/// use cmdflow_engine::{Command, CommandContext, CommandPipeline};
/// use serde_json::{json, Value};
///
/// struct Echo;
///
/// impl Command for Echo {
///     type Inputs = Value;
///     type Output = Value;
///
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn execute(&mut self, ctx: &mut CommandContext<Value>) -> PhaseResult<Value> {
///         Ok(ctx.raw_inputs().clone())
///     }
/// }
///
/// let outcome = CommandPipeline::new(Echo, RawInputs)
///     .with_inputs(json!({"hello": "world"}))
///     .run()
///     .unwrap();
/// assert_eq!(outcome.value(), Some(&json!({"hello": "world"})));
/// ```
pub struct CommandPipeline<C: Command> {
    command: C,
    validator: Box<dyn InputValidator<C::Inputs>>,
    inputs: Value,
    callbacks: Arc<CommandRegistry<C>>,
    loader: Option<Arc<dyn RecordLoader>>,
    resource: Option<Arc<dyn TransactionResource>>,
    recovery: Option<RecoveryManager>,
    recovery_context: RecoveryContext,
    runtime_path: Vec<String>,
    correlation: Correlation,
}

impl<C: Command> CommandPipeline<C> {
    pub fn new<V>(command: C, validator: V) -> Self
    where
        V: InputValidator<C::Inputs> + 'static,
    {
        Self {
            command,
            validator: Box::new(validator),
            inputs: Value::Null,
            callbacks: Arc::new(CallbackRegistry::new()),
            loader: None,
            resource: None,
            recovery: None,
            recovery_context: RecoveryContext::new(),
            runtime_path: Vec::new(),
            correlation: Correlation::new(),
        }
    }

    /// Raw inputs handed to the validator
    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<CommandRegistry<C>>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn RecordLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_resource(mut self, resource: Arc<dyn TransactionResource>) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Consult `manager` before reporting a failed execute phase
    pub fn with_recovery(mut self, manager: RecoveryManager) -> Self {
        self.recovery = Some(manager);
        self
    }

    /// Starting recovery context, e.g. to carry the caller's attempt number
    ///
    /// The circuit breaker id defaults to the command name.
    pub fn with_recovery_context(mut self, context: RecoveryContext) -> Self {
        self.recovery_context = context;
        self
    }

    pub fn with_runtime_path(mut self, runtime_path: Vec<String>) -> Self {
        self.runtime_path = runtime_path;
        self
    }

    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn command_name(&self) -> &str {
        self.command.name()
    }

    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }

    /// Run the command to a terminal state
    ///
    /// # Errors
    ///
    /// Environment failures: the transaction could not be opened, committed
    /// or rolled back, or a record could not be loaded. The run ends in
    /// `Errored` after rolling back what it could. Business failures are
    /// `Ok(Outcome::Failure { .. })`.
    pub fn run(self) -> Result<Outcome<C::Output>, EngineError> {
        let command_name = self.command.name().to_string();
        let span = tracing::info_span!(
            "command_run",
            command = %command_name,
            run_id = %self.correlation.run_id,
            trace_id = self.correlation.trace_id.as_ref().map_or("", |t| t.as_str()),
        );
        let _entered = span.enter();

        log_op_start!(OP_RUN, command = %command_name);
        let start = Instant::now();

        let result = self.drive();

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(Outcome::Success(_)) => {
                log_op_end!(OP_RUN, duration_ms = duration_ms, command = %command_name);
            }
            Ok(Outcome::Failure { errors, .. }) => {
                log_op_error!(
                    OP_RUN,
                    errors,
                    duration_ms = duration_ms,
                    command = %command_name,
                    error_count = errors.len()
                );
            }
            Err(err) => {
                log_op_error!(OP_RUN, err, duration_ms = duration_ms, command = %command_name);
            }
        }
        result
    }

    fn drive(self) -> Result<Outcome<C::Output>, EngineError> {
        let CommandPipeline {
            mut command,
            validator,
            inputs,
            callbacks,
            loader,
            resource,
            recovery,
            recovery_context,
            runtime_path,
            correlation,
        } = self;

        let mut run = Run {
            executor: CallbackExecutor::new(&callbacks),
            machine: StateMachine::new(),
            ctx: CommandContext::new(command.name(), runtime_path, correlation, inputs),
            env: Environment::default(),
        };

        let step = run.advance(ExecutionState::OpeningResource, |_, env| {
            if let Some(resource) = &resource {
                match resource.open() {
                    Ok(handle) => env.guard.hold(handle),
                    Err(err) => return Err(env.abort(EngineError::ResourceOpen(err))),
                }
            }
            Ok(None)
        })?;
        if let Some(done) = run.conclude(step) {
            return done;
        }

        let step = run.advance(ExecutionState::ValidatingInputs, |ctx, _| {
            match validator.validate(ctx.raw_inputs()) {
                Ok(inputs) => {
                    ctx.set_inputs(inputs);
                    Ok(None)
                }
                Err(fields) => {
                    ctx.add_errors(fields.into_iter().map(FieldError::into_record));
                    Err(Interrupt::Halted)
                }
            }
        })?;
        if let Some(done) = run.conclude(step) {
            return done;
        }

        let step = run.advance(ExecutionState::LoadingRecords, |ctx, env| {
            let loads = match ctx.inputs() {
                Some(inputs) => command.record_loads(inputs),
                None => return Ok(None),
            };
            if loads.is_empty() {
                return Ok(None);
            }
            let Some(loader) = &loader else {
                return Err(env.abort(EngineError::Config(format!(
                    "command '{}' declares record loads but no record loader is configured",
                    ctx.command_name()
                ))));
            };
            for load in loads {
                match loader.find(&load.record_type, &load.key) {
                    Ok(Some(record)) => ctx.insert_record(load.name, Some(record)),
                    Ok(None) if load.required => {
                        ctx.add_error(not_found(&load));
                    }
                    Ok(None) => ctx.insert_record(load.name, None),
                    Err(source) => {
                        return Err(env.abort(EngineError::RecordLoad {
                            record: load.name,
                            source,
                        }))
                    }
                }
            }
            if ctx.has_errors() {
                Err(Interrupt::Halted)
            } else {
                Ok(None)
            }
        })?;
        if let Some(done) = run.conclude(step) {
            return done;
        }

        let step = run.advance(ExecutionState::ValidatingRecords, |ctx, _| {
            command.validate_records(ctx).map(|()| None)
        })?;
        if let Some(done) = run.conclude(step) {
            return done;
        }

        let step = run.advance(ExecutionState::Validating, |ctx, _| {
            command.validate(ctx).map(|()| None)
        })?;
        if let Some(done) = run.conclude(step) {
            return done;
        }

        // Execute panics surface as Failed so Error callbacks see them.
        // The outer catch covers panics from the callbacks.
        let executed = panic::catch_unwind(AssertUnwindSafe(|| {
            run.advance(ExecutionState::Executing, |ctx, _| {
                panic::catch_unwind(AssertUnwindSafe(|| command.execute(ctx)))
                    .unwrap_or_else(|payload| Err(panicked(&*payload).into()))
                    .map(Some)
            })
        }));
        let step = match executed {
            Ok(step) => step?,
            Err(payload) => {
                run.ctx.add_error(panicked(&*payload));
                Step::Fail
            }
        };

        let value = match step {
            Step::Continue(Some(value)) => Some(value),
            Step::Continue(None) => {
                run.ctx.add_error(ErrorRecord::runtime(
                    SYMBOL_MISSING_RESULT,
                    "Execute finished without producing a result",
                ));
                None
            }
            Step::Fail => None,
            Step::Abort(err) => return run.abort(err),
        };
        let value = match value {
            Some(value) => value,
            None => {
                run.ensure_errors();
                match recover(recovery.as_ref(), recovery_context, &command, &mut run.ctx) {
                    Ok(value) => value,
                    Err(advice) => return run.fail(advice),
                }
            }
        };

        let step = run.advance(ExecutionState::CommittingResource, |_, env| {
            match env.guard.commit() {
                Ok(()) => {
                    env.committed = true;
                    Ok(None)
                }
                Err(err) => Err(env.abort(EngineError::ResourceCommit(err))),
            }
        })?;
        // A committed transaction cannot be rolled back, so the run succeeds.
        if run.env.committed {
            if matches!(step, Step::Fail) {
                let late = run.ctx.take_errors();
                tracing::warn!(
                    error_count = late.len(),
                    "errors recorded after commit; ignored"
                );
            }
        } else if let Some(done) = run.conclude(step) {
            return done;
        }

        run.finish(ExecutionState::Succeeded)?;
        Ok(Outcome::Success(value))
    }
}

fn panicked(payload: &(dyn Any + Send)) -> ErrorRecord {
    let record = ErrorRecord::from_panic(payload);
    tracing::debug!(key = record.key(), "execute panicked");
    record
}

fn not_found(load: &RecordLoad) -> ErrorRecord {
    ErrorRecord::runtime(
        SYMBOL_NOT_FOUND,
        format!("{} not found", load.record_type),
    )
    .with_path([load.name.as_str()])
    .with_context("record_type", load.record_type.as_str())
    .with_context("key", load.key.clone())
}

fn transition_name(from: ExecutionState, to: ExecutionState) -> &'static str {
    match to {
        ExecutionState::Failed => TRANSITION_FAIL,
        ExecutionState::Errored => TRANSITION_ERROR,
        _ => HAPPY_PATH
            .iter()
            .find(|(f, t, _)| *f == from && *t == to)
            .map_or("", |(_, _, name)| *name),
    }
}

// Err carries the recovery advice, if a manager was consulted.
fn recover<C: Command>(
    manager: Option<&RecoveryManager>,
    mut advice: RecoveryContext,
    command: &C,
    ctx: &mut CommandContext<C::Inputs>,
) -> Result<C::Output, Option<RecoveryContext>> {
    let Some(manager) = manager else {
        return Err(None);
    };
    if !advice.contains(KEY_CIRCUIT_BREAKER_ID) {
        advice = advice.with_circuit_breaker_id(command.name());
    }

    let result = manager.attempt_recovery(ctx.errors(), &mut advice);
    if result.recovered && result.remaining.is_none() {
        if let Some(value) = advice.fallback_result().and_then(|v| command.from_fallback(v)) {
            tracing::debug!(command = command.name(), "recovered with fallback result");
            ctx.replace_errors(ErrorCollection::new());
            return Ok(value);
        }
    }
    if let Some(remaining) = result.remaining {
        ctx.replace_errors(remaining.into_collection());
    }
    Err(Some(advice))
}

/// Collaborator state shared with phase actions
#[derive(Default)]
struct Environment {
    guard: ResourceGuard,
    failure: Option<EngineError>,
    committed: bool,
}

impl Environment {
    // Stash the environment error; callbacks see it as a system record.
    fn abort(&mut self, err: EngineError) -> Interrupt {
        let record = ErrorRecord::system(SYMBOL_ENVIRONMENT_FAILURE, err.to_string())
            .with_context("code", err.error_code());
        self.failure = Some(err);
        Interrupt::Failed(record)
    }
}

enum Step<O> {
    Continue(Option<O>),
    Fail,
    Abort(EngineError),
}

struct Run<'r, I, O> {
    executor: CallbackExecutor<'r, CommandContext<I>, Option<O>>,
    machine: StateMachine,
    ctx: CommandContext<I>,
    env: Environment,
}

impl<'r, I, O> Run<'r, I, O> {
    fn advance<F>(&mut self, to: ExecutionState, mut action: F) -> Result<Step<O>, EngineError>
    where
        F: FnMut(&mut CommandContext<I>, &mut Environment) -> PhaseResult<Option<O>>,
    {
        let from = self.machine.state();
        self.machine.transition_to(to)?;
        self.ctx.set_state(to);
        let transition = transition_name(from, to);
        tracing::debug!(from_state = %from, to_state = %to, transition, "phase");

        let env = &mut self.env;
        let outcome =
            self.executor
                .execute_transition(&mut self.ctx, from, to, transition, |ctx| {
                    // Errors added by Before callbacks skip the phase work.
                    if ctx.has_errors() {
                        return Err(Interrupt::Halted);
                    }
                    action(ctx, env)
                });

        if let Some(err) = self.env.failure.take() {
            return Ok(Step::Abort(err));
        }
        Ok(match outcome {
            Ok(value) if !self.ctx.has_errors() => Step::Continue(value),
            Ok(_) | Err(Interrupt::Halted) => Step::Fail,
            Err(Interrupt::Failed(record)) => {
                self.ctx.add_error(record);
                Step::Fail
            }
        })
    }

    // Some(result) when the run ends here.
    fn conclude(&mut self, step: Step<O>) -> Option<Result<Outcome<O>, EngineError>> {
        match step {
            Step::Continue(_) => None,
            Step::Fail => Some(self.fail(None)),
            Step::Abort(err) => Some(self.abort(err)),
        }
    }

    fn ensure_errors(&mut self) {
        if !self.ctx.has_errors() {
            self.ctx.add_error(ErrorRecord::runtime(
                SYMBOL_HALTED,
                "Command halted without recording an error",
            ));
        }
    }

    fn fail(&mut self, recovery: Option<RecoveryContext>) -> Result<Outcome<O>, EngineError> {
        self.ensure_errors();
        if let Err(err) = self.env.guard.rollback() {
            self.finish(ExecutionState::Errored)?;
            return Err(EngineError::ResourceRollback(err));
        }
        self.finish(ExecutionState::Failed)?;
        Ok(Outcome::Failure {
            errors: self.ctx.take_errors(),
            recovery,
        })
    }

    fn abort(&mut self, err: EngineError) -> Result<Outcome<O>, EngineError> {
        if let Err(rollback_err) = self.env.guard.rollback() {
            tracing::warn!(error = %rollback_err, "rollback after environment failure failed");
        }
        self.finish(ExecutionState::Errored)?;
        Err(err)
    }

    // Terminal transitions still run callbacks; their interrupts cannot
    // change the outcome.
    fn finish(&mut self, to: ExecutionState) -> Result<(), EngineError> {
        let from = self.machine.state();
        self.machine.transition_to(to)?;
        self.ctx.set_state(to);
        let transition = transition_name(from, to);
        let result = self
            .executor
            .execute_transition(&mut self.ctx, from, to, transition, |_| Ok(None));
        if let Err(interrupt) = result {
            tracing::warn!(
                transition,
                interrupt = %interrupt,
                "terminal transition callback interrupted; ignored"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_names() {
        use ExecutionState::*;
        assert_eq!(transition_name(Initialized, OpeningResource), "open_resource");
        assert_eq!(transition_name(Validating, Executing), "execute");
        assert_eq!(transition_name(Executing, Failed), "fail");
        assert_eq!(transition_name(CommittingResource, Errored), "error");
    }

    #[test]
    fn test_environment_abort_keeps_error() {
        let mut env = Environment::default();
        let interrupt = env.abort(EngineError::Config("no loader".into()));
        let record = interrupt.error().unwrap();
        assert_eq!(record.symbol(), SYMBOL_ENVIRONMENT_FAILURE);
        assert_eq!(record.context_value("code").unwrap(), "ERR_CONFIG");
        assert!(matches!(env.failure, Some(EngineError::Config(_))));
    }
}
