//! cmdflow engine - runs commands through the phase pipeline
//!
//! A [`Command`](commands::Command) supplies its validation and execution
//! logic; [`CommandPipeline`](commands::CommandPipeline) drives it through the
//! execution state machine, runs every phase inside the callback chain, talks
//! to the record loader and transaction resource, and consults recovery hooks
//! before reporting a failed run.

pub mod commands;

pub use commands::{
    Command, CommandContext, CommandPipeline, CommandRegistry, FieldError, InputValidator,
    Outcome, RecordLoad, RecordLoader, TransactionHandle, TransactionResource,
};
