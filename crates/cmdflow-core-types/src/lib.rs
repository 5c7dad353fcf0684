//! Core types shared across cmdflow facilities
//!
//! This crate provides foundational types used by both the error model
//! and the logging facility:
//!
//! - **Correlation types**: RunId, TraceId, Correlation
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;

pub use correlation::{Correlation, RunId, TraceId};
