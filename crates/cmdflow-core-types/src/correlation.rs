//! Correlation identifiers for command runs
//!
//! Every pipeline run gets a [`RunId`]; callers that participate in a wider
//! trace can attach a [`TraceId`] so that nested subcommand runs and their
//! log events can be stitched back together.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a single command run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Generate a new RunId using UUIDv7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create from an existing string (for deserialization)
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trace identifier shared by a run and every subcommand it spawns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

impl TraceId {
    /// Generate a new TraceId using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation carried by one run
///
/// A subcommand run gets a fresh `run_id` but inherits the parent's
/// `trace_id` (see [`Correlation::child`]).
#[derive(Debug, Clone)]
pub struct Correlation {
    pub run_id: RunId,
    pub trace_id: Option<TraceId>,
}

impl Correlation {
    /// Create a correlation with a fresh RunId and no trace
    pub fn new() -> Self {
        Self {
            run_id: RunId::new(),
            trace_id: None,
        }
    }

    /// Attach a TraceId
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Correlation for a nested run: new RunId, same trace
    pub fn child(&self) -> Self {
        Self {
            run_id: RunId::new(),
            trace_id: self.trace_id.clone(),
        }
    }
}

impl Default for Correlation {
    fn default() -> Self {
        Self::new()
    }
}
