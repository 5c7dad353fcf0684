//! Transition filters for callbacks

use crate::state_machine::ExecutionState;

/// Scope of a registered callback
///
/// Every present field must equal the actual transition's value; a
/// condition with no fields set matches every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CallbackCondition {
    pub from: Option<ExecutionState>,
    pub to: Option<ExecutionState>,
    pub transition: Option<String>,
}

impl CallbackCondition {
    /// Matches every transition
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches transitions with the given name
    pub fn transition(name: impl Into<String>) -> Self {
        Self::default().with_transition(name)
    }

    /// Matches transitions leaving `state`
    pub fn from_state(state: ExecutionState) -> Self {
        Self::default().with_from(state)
    }

    /// Matches transitions entering `state`
    pub fn to_state(state: ExecutionState) -> Self {
        Self::default().with_to(state)
    }

    pub fn with_from(mut self, state: ExecutionState) -> Self {
        self.from = Some(state);
        self
    }

    pub fn with_to(mut self, state: ExecutionState) -> Self {
        self.to = Some(state);
        self
    }

    pub fn with_transition(mut self, name: impl Into<String>) -> Self {
        self.transition = Some(name.into());
        self
    }

    pub fn is_global(&self) -> bool {
        self.from.is_none() && self.to.is_none() && self.transition.is_none()
    }

    pub fn matches(&self, from: ExecutionState, to: ExecutionState, transition: &str) -> bool {
        self.from.map_or(true, |f| f == from)
            && self.to.map_or(true, |t| t == to)
            && self.transition.as_deref().map_or(true, |t| t == transition)
    }
}
