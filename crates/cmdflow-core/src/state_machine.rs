//! Execution state machine for a single pipeline run
//!
//! Legal moves follow one linear happy path; every non-terminal state may
//! also drop to `Failed` or `Errored`. Terminal states accept nothing.

use crate::errors::{EngineError, Result};

/// Phase a command run is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutionState {
    Initialized,
    OpeningResource,
    ValidatingInputs,
    LoadingRecords,
    ValidatingRecords,
    Validating,
    Executing,
    CommittingResource,
    Succeeded,
    Failed,
    Errored,
}

impl ExecutionState {
    /// All states in declaration order
    pub const ALL: [ExecutionState; 11] = [
        ExecutionState::Initialized,
        ExecutionState::OpeningResource,
        ExecutionState::ValidatingInputs,
        ExecutionState::LoadingRecords,
        ExecutionState::ValidatingRecords,
        ExecutionState::Validating,
        ExecutionState::Executing,
        ExecutionState::CommittingResource,
        ExecutionState::Succeeded,
        ExecutionState::Failed,
        ExecutionState::Errored,
    ];

    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Initialized => "initialized",
            ExecutionState::OpeningResource => "opening_resource",
            ExecutionState::ValidatingInputs => "validating_inputs",
            ExecutionState::LoadingRecords => "loading_records",
            ExecutionState::ValidatingRecords => "validating_records",
            ExecutionState::Validating => "validating",
            ExecutionState::Executing => "executing",
            ExecutionState::CommittingResource => "committing_resource",
            ExecutionState::Succeeded => "succeeded",
            ExecutionState::Failed => "failed",
            ExecutionState::Errored => "errored",
        }
    }

    /// Legal successors of this state
    pub fn successors(&self) -> &'static [ExecutionState] {
        use ExecutionState::*;
        match self {
            Initialized => &[OpeningResource, Failed, Errored],
            OpeningResource => &[ValidatingInputs, Failed, Errored],
            ValidatingInputs => &[LoadingRecords, Failed, Errored],
            LoadingRecords => &[ValidatingRecords, Failed, Errored],
            ValidatingRecords => &[Validating, Failed, Errored],
            Validating => &[Executing, Failed, Errored],
            Executing => &[CommittingResource, Failed, Errored],
            CommittingResource => &[Succeeded, Failed, Errored],
            Succeeded | Failed | Errored => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Errored
        )
    }

    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        self.successors().contains(&next)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Happy-path transitions as `(from, to, transition name)`
pub const HAPPY_PATH: [(ExecutionState, ExecutionState, &str); 8] = [
    (
        ExecutionState::Initialized,
        ExecutionState::OpeningResource,
        "open_resource",
    ),
    (
        ExecutionState::OpeningResource,
        ExecutionState::ValidatingInputs,
        "validate_inputs",
    ),
    (
        ExecutionState::ValidatingInputs,
        ExecutionState::LoadingRecords,
        "load_records",
    ),
    (
        ExecutionState::LoadingRecords,
        ExecutionState::ValidatingRecords,
        "validate_records",
    ),
    (
        ExecutionState::ValidatingRecords,
        ExecutionState::Validating,
        "validate",
    ),
    (
        ExecutionState::Validating,
        ExecutionState::Executing,
        "execute",
    ),
    (
        ExecutionState::Executing,
        ExecutionState::CommittingResource,
        "commit_resource",
    ),
    (
        ExecutionState::CommittingResource,
        ExecutionState::Succeeded,
        "succeed",
    ),
];

/// Transition names for the terminal drops
pub const TRANSITION_FAIL: &str = "fail";
pub const TRANSITION_ERROR: &str = "error";

/// One applied transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    pub from: ExecutionState,
    pub to: ExecutionState,
}

/// Current state plus append-only history
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ExecutionState,
    history: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ExecutionState::Initialized,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        self.state.can_transition_to(next)
    }

    /// Move to `next` if legal; otherwise leave everything untouched
    ///
    /// # Errors
    ///
    /// `EngineError::IllegalTransition` when `next` is not a successor of
    /// the current state.
    pub fn transition_to(&mut self, next: ExecutionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(from = %self.state, to = %next, "state transition");
        self.history.push(TransitionRecord {
            from: self.state,
            to: next,
        });
        self.state = next;
        Ok(())
    }

    pub fn fail(&mut self) -> Result<()> {
        self.transition_to(ExecutionState::Failed)
    }

    pub fn error(&mut self) -> Result<()> {
        self.transition_to(ExecutionState::Errored)
    }

    pub fn succeed(&mut self) -> Result<()> {
        self.transition_to(ExecutionState::Succeeded)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
