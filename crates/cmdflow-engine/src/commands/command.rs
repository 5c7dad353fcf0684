//! The command contract and the result of a run

use cmdflow_core::{ErrorCollection, PhaseResult, RecoveryContext};
use serde_json::Value;

use super::collaborators::RecordLoad;
use super::context::CommandContext;

/// A unit of business logic run by [`CommandPipeline`](super::CommandPipeline)
///
/// Only `execute` is mandatory. Validation hooks record errors on the
/// context or return an interrupt; either fails the run before `execute`.
///
/// ```
/// use cmdflow_core::PhaseResult;
/// use cmdflow_engine::{Command, CommandContext};
///
/// struct Add;
///
/// impl Command for Add {
///     type Inputs = (i64, i64);
///     type Output = i64;
///
///     fn name(&self) -> &str {
///         "add"
///     }
///
///     fn execute(&mut self, ctx: &mut CommandContext<(i64, i64)>) -> PhaseResult<i64> {
///         let (a, b) = ctx.inputs().copied().unwrap_or_default();
///         Ok(a + b)
///     }
/// }
/// ```
pub trait Command {
    type Inputs;
    type Output;

    /// Name used in logs and in nested runtime paths
    fn name(&self) -> &str;

    /// Records to load once inputs are valid
    fn record_loads(&self, _inputs: &Self::Inputs) -> Vec<RecordLoad> {
        Vec::new()
    }

    /// Check the loaded records against the inputs
    ///
    /// # Errors
    ///
    /// An interrupt stops the run; recorded errors fail it as well.
    fn validate_records(&self, _ctx: &mut CommandContext<Self::Inputs>) -> PhaseResult<()> {
        Ok(())
    }

    /// Final checks before execution
    ///
    /// # Errors
    ///
    /// An interrupt stops the run; recorded errors fail it as well.
    fn validate(&self, _ctx: &mut CommandContext<Self::Inputs>) -> PhaseResult<()> {
        Ok(())
    }

    /// # Errors
    ///
    /// `Failed(record)` records the error; `Halted` fails the run with the
    /// errors already on the context.
    fn execute(&mut self, ctx: &mut CommandContext<Self::Inputs>) -> PhaseResult<Self::Output>;

    /// Accept a recovery fallback value as this command's result
    fn from_fallback(&self, _value: &Value) -> Option<Self::Output> {
        None
    }
}

/// Result of a run that reached a business conclusion
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// Never carries an empty collection
    Failure {
        errors: ErrorCollection,
        /// Recovery advice, when a recovery manager was consulted
        recovery: Option<RecoveryContext>,
    },
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn errors(&self) -> Option<&ErrorCollection> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure { errors, .. } => Some(errors),
        }
    }

    pub fn recovery(&self) -> Option<&RecoveryContext> {
        match self {
            Outcome::Failure {
                recovery: Some(recovery),
                ..
            } => Some(recovery),
            _ => None,
        }
    }

    /// # Errors
    ///
    /// The run's errors when it failed.
    pub fn into_result(self) -> Result<T, ErrorCollection> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure { errors, .. } => Err(errors),
        }
    }
}
