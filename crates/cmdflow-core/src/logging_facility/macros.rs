//! Canonical logging macros
//!
//! Field names come from [`cmdflow_core_types::schema`].

/// Log the start of an operation
///
/// ```
/// # use cmdflow_core::log_op_start;
/// log_op_start!("pipeline.run");
/// log_op_start!("pipeline.run", command = "create_user");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_START,
        );
    };
    ($op:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_START,
            $($field)*
        );
    };
}

/// Log the successful end of an operation
///
/// ```
/// # use cmdflow_core::log_op_end;
/// log_op_end!("pipeline.run", duration_ms = 42);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_END,
            duration_ms = $duration,
        );
    };
    ($op:expr, duration_ms = $duration:expr, $($field:tt)*) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_END,
            duration_ms = $duration,
            $($field)*
        );
    };
}

/// Log an operation error
///
/// `$err` is anything implementing [`ErrorCode`](crate::errors::ErrorCode).
///
/// ```
/// # use cmdflow_core::{log_op_error, ErrorRecord};
/// let err = ErrorRecord::runtime("timeout", "took too long");
/// log_op_error!("pipeline.run", &err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr) => {{
        use $crate::errors::ErrorCode as _;
        let err = $err;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = %err.error_kind(),
            err.code = %err.error_code(),
        );
    }};
    ($op:expr, $err:expr, duration_ms = $duration:expr, $($field:tt)*) => {{
        use $crate::errors::ErrorCode as _;
        let err = $err;
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = %err.error_kind(),
            err.code = %err.error_code(),
            $($field)*
        );
    }};
}
