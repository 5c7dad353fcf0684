//! cmdflow core - callback, error, and recovery machinery for command runs
//!
//! This crate provides the building blocks the command pipeline is made of:
//! - Execution state machine with a fixed happy path
//! - Callback registry (before/after/around/error) with a compiled-chain cache
//! - Callback executor running one phase action inside its chain
//! - Structured error records and identity-unique error collections
//! - Advisory recovery hooks (retry, fallback, circuit breaker)
//! - TOML configuration and the structured logging facility

pub mod callbacks;
pub mod config;
pub mod error_collection;
pub mod errors;
pub mod logging_facility;
pub mod recovery;
pub mod state_machine;

// Used by the logging macros.
pub use cmdflow_core_types::schema;

// Re-export commonly used types
pub use callbacks::{
    Callback, CallbackCondition, CallbackExecutor, CallbackKind, CallbackRegistry, Proceed,
};
pub use config::EngineConfig;
pub use error_collection::{ErrorCollection, ErrorSummary};
pub use errors::{
    EngineError, ErrorCategory, ErrorCode, ErrorRecord, Interrupt, PhaseResult, ResourceError,
    Result, Severity,
};
pub use recovery::{RecoveryContext, RecoveryHook, RecoveryManager};
pub use state_machine::{ExecutionState, StateMachine, TransitionRecord, HAPPY_PATH};
