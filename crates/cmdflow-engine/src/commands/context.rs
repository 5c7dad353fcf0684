//! Per-run state shared by the command and its callbacks

use std::collections::BTreeMap;

use cmdflow_core::{
    ErrorCode, ErrorCollection, ErrorRecord, ExecutionState, Interrupt, PhaseResult,
};
use cmdflow_core_types::correlation::Correlation;
use serde_json::Value;

use super::command::{Command, Outcome};
use super::pipeline::CommandPipeline;

/// Everything one run knows about itself
///
/// Callbacks receive the same context as the command, so they can inspect
/// inputs and records, add errors, or halt the run.
#[derive(Debug)]
pub struct CommandContext<I> {
    command_name: String,
    runtime_path: Vec<String>,
    correlation: Correlation,
    raw_inputs: Value,
    inputs: Option<I>,
    records: BTreeMap<String, Option<Value>>,
    errors: ErrorCollection,
    state: ExecutionState,
}

impl<I> CommandContext<I> {
    pub(crate) fn new(
        command_name: impl Into<String>,
        runtime_path: Vec<String>,
        correlation: Correlation,
        raw_inputs: Value,
    ) -> Self {
        Self {
            command_name: command_name.into(),
            runtime_path,
            correlation,
            raw_inputs,
            inputs: None,
            records: BTreeMap::new(),
            errors: ErrorCollection::new(),
            state: ExecutionState::Initialized,
        }
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    /// Names of the enclosing commands, outermost first
    pub fn runtime_path(&self) -> &[String] {
        &self.runtime_path
    }

    pub fn correlation(&self) -> &Correlation {
        &self.correlation
    }

    pub fn raw_inputs(&self) -> &Value {
        &self.raw_inputs
    }

    /// Typed inputs; `None` until input validation has passed
    pub fn inputs(&self) -> Option<&I> {
        self.inputs.as_ref()
    }

    pub fn inputs_mut(&mut self) -> Option<&mut I> {
        self.inputs.as_mut()
    }

    pub(crate) fn set_inputs(&mut self, inputs: I) {
        self.inputs = Some(inputs);
    }

    /// A loaded record; `None` if it was not declared or not found
    pub fn record(&self, name: &str) -> Option<&Value> {
        self.records.get(name).and_then(Option::as_ref)
    }

    /// True once the load for `name` ran, whether or not it found a record
    pub fn was_loaded(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn records(&self) -> &BTreeMap<String, Option<Value>> {
        &self.records
    }

    pub(crate) fn insert_record(&mut self, name: impl Into<String>, record: Option<Value>) {
        self.records.insert(name.into(), record);
    }

    pub fn errors(&self) -> &ErrorCollection {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors.has_errors()
    }

    /// Record an error; the run fails once the current phase ends
    pub fn add_error(&mut self, error: ErrorRecord) -> &mut Self {
        self.errors.add(error);
        self
    }

    pub fn add_errors(&mut self, errors: impl IntoIterator<Item = ErrorRecord>) -> &mut Self {
        self.errors.extend(errors);
        self
    }

    /// Stop the current phase, keeping the errors recorded so far
    ///
    /// # Errors
    ///
    /// Always `Interrupt::Halted`.
    pub fn halt<T>(&self) -> PhaseResult<T> {
        Err(Interrupt::Halted)
    }

    /// Record `error` and stop the current phase
    ///
    /// # Errors
    ///
    /// Always `Interrupt::Halted`.
    pub fn halt_with<T>(&mut self, error: ErrorRecord) -> PhaseResult<T> {
        self.add_error(error);
        self.halt()
    }

    pub(crate) fn take_errors(&mut self) -> ErrorCollection {
        std::mem::take(&mut self.errors)
    }

    pub(crate) fn replace_errors(&mut self, errors: ErrorCollection) {
        self.errors = errors;
    }

    /// State the run is currently in
    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ExecutionState) {
        self.state = state;
    }

    /// Run a nested command
    ///
    /// The nested run inherits this run's trace. When it fails, each of its
    /// errors is prefixed with the nested command's name in its runtime path
    /// and added to this context.
    ///
    /// # Errors
    ///
    /// `Halted` when the nested run failed; `Failed` with a `system` record
    /// when it aborted with an environment error.
    pub fn run_subcommand<S: Command>(&mut self, pipeline: CommandPipeline<S>) -> PhaseResult<S::Output> {
        let name = pipeline.command_name().to_string();
        let mut runtime_path = self.runtime_path.clone();
        runtime_path.push(self.command_name.clone());

        let result = pipeline
            .with_runtime_path(runtime_path)
            .with_correlation(self.correlation.child())
            .run();

        match result {
            Ok(Outcome::Success(value)) => Ok(value),
            Ok(Outcome::Failure { errors, .. }) => {
                tracing::debug!(
                    subcommand = %name,
                    error_count = errors.len(),
                    "subcommand failed"
                );
                for error in errors {
                    self.errors
                        .add(error.with_runtime_path_prefix([name.as_str()]));
                }
                Err(Interrupt::Halted)
            }
            Err(err) => Err(Interrupt::Failed(
                ErrorRecord::system("subcommand_error", err.to_string())
                    .with_runtime_path_prefix([name.as_str()])
                    .with_context("code", err.error_code()),
            )),
        }
    }
}
