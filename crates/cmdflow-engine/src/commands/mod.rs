//! Command pipeline with boundary logging.
//!
//! ## Logging Ownership
//!
//! The engine layer owns lifecycle logging for command runs:
//! - `log_op_start!` at entry
//! - `log_op_end!` on success
//! - `log_op_error!` on failure (business failure or environment error)
//!
//! Lower layers (core) use only `tracing::debug!()` for internal details.

mod collaborators;
mod command;
mod context;
mod pipeline;

pub use collaborators::{
    FieldError, InputValidator, NoopTransactionResource, RawInputs, RecordLoad, RecordLoader,
    TransactionHandle, TransactionResource,
};
pub use command::{Command, Outcome};
pub use context::CommandContext;
pub use pipeline::{CommandPipeline, CommandRegistry, OP_RUN};
