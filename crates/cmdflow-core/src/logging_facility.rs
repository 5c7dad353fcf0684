//! Structured logging facility for cmdflow
//!
//! This module provides:
//! - Single initialization point via `init(profile)`
//! - Structured logging macros (`log_op_start!`, `log_op_end!`, `log_op_error!`)
//! - Test capture mode for deterministic assertions
//!
//! Boundary events (start/end/end_error) are emitted by the pipeline only.
//! Lower layers (registry, executor, recovery hooks) log with plain
//! `tracing::debug!`/`warn!`.
//!
//! # Usage
//!
//! ```rust
//! use cmdflow_core::logging_facility::{init, Profile};
//!
//! // Initialize once at application startup
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
