//! Traits for the environment a command runs in
//!
//! Input validation, record loading and transactional resources are supplied
//! by the caller. Each trait has a minimal implementation for runs that do
//! not need the capability.

use std::collections::BTreeMap;

use cmdflow_core::{ErrorRecord, ResourceError};
use serde_json::Value;

/// One invalid input field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub path: Vec<String>,
    pub symbol: String,
    pub message: String,
    pub context: BTreeMap<String, Value>,
}

impl FieldError {
    pub fn new<I, S>(path: I, symbol: impl Into<String>, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            symbol: symbol.into(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Convert into a `data` error record located at the field path
    pub fn into_record(self) -> ErrorRecord {
        self.context.into_iter().fold(
            ErrorRecord::data(self.symbol, self.message).with_path(self.path),
            |record, (key, value)| record.with_context(key, value),
        )
    }
}

/// Turns raw JSON inputs into a command's typed inputs
///
/// Implemented for closures:
///
/// ```
/// use cmdflow_engine::{FieldError, InputValidator};
/// use serde_json::{json, Value};
///
/// let validator = |raw: &Value| match raw["name"].as_str() {
///     Some(name) => Ok(name.to_string()),
///     None => Err(vec![FieldError::new(["name"], "missing_required_attribute", "name is required")]),
/// };
/// assert_eq!(validator.validate(&json!({"name": "ada"})).unwrap(), "ada");
/// assert!(validator.validate(&json!({})).is_err());
/// ```
pub trait InputValidator<I>: Send + Sync {
    /// # Errors
    ///
    /// Every invalid field; the run records one `data` error per entry.
    fn validate(&self, raw: &Value) -> Result<I, Vec<FieldError>>;
}

impl<I, F> InputValidator<I> for F
where
    F: Fn(&Value) -> Result<I, Vec<FieldError>> + Send + Sync,
{
    fn validate(&self, raw: &Value) -> Result<I, Vec<FieldError>> {
        self(raw)
    }
}

/// Accepts any input unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct RawInputs;

impl InputValidator<Value> for RawInputs {
    fn validate(&self, raw: &Value) -> Result<Value, Vec<FieldError>> {
        Ok(raw.clone())
    }
}

/// A record a command needs before validation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLoad {
    /// Name the record is stored under in the context
    pub name: String,
    pub record_type: String,
    pub key: Value,
    pub required: bool,
}

impl RecordLoad {
    pub fn required(
        name: impl Into<String>,
        record_type: impl Into<String>,
        key: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            record_type: record_type.into(),
            key: key.into(),
            required: true,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        record_type: impl Into<String>,
        key: impl Into<Value>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, record_type, key)
        }
    }
}

/// Looks up persisted records by type and key
pub trait RecordLoader: Send + Sync {
    /// `Ok(None)` when no record exists for `key`
    ///
    /// # Errors
    ///
    /// The backing store could not be queried.
    fn find(&self, record_type: &str, key: &Value) -> Result<Option<Value>, ResourceError>;
}

/// Source of transactions wrapped around a run
pub trait TransactionResource: Send + Sync {
    /// # Errors
    ///
    /// The transaction could not be started.
    fn open(&self) -> Result<Box<dyn TransactionHandle>, ResourceError>;
}

/// An open transaction
///
/// Both methods consume the handle, so a transaction ends exactly once.
pub trait TransactionHandle: Send {
    /// # Errors
    ///
    /// The transaction could not be committed.
    fn commit(self: Box<Self>) -> Result<(), ResourceError>;

    /// # Errors
    ///
    /// The transaction could not be rolled back.
    fn rollback(self: Box<Self>) -> Result<(), ResourceError>;
}

/// Resource whose transactions do nothing
///
/// ```
/// use cmdflow_engine::commands::NoopTransactionResource;
/// use cmdflow_engine::{TransactionHandle, TransactionResource};
///
/// let handle = NoopTransactionResource.open().unwrap();
/// assert!(handle.commit().is_ok());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransactionResource;

struct NoopHandle;

impl TransactionResource for NoopTransactionResource {
    fn open(&self) -> Result<Box<dyn TransactionHandle>, ResourceError> {
        Ok(Box::new(NoopHandle))
    }
}

impl TransactionHandle for NoopHandle {
    fn commit(self: Box<Self>) -> Result<(), ResourceError> {
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Holds the run's open transaction; rolls it back if dropped while open
#[derive(Default)]
pub(crate) struct ResourceGuard {
    handle: Option<Box<dyn TransactionHandle>>,
}

impl ResourceGuard {
    pub(crate) fn hold(&mut self, handle: Box<dyn TransactionHandle>) {
        self.handle = Some(handle);
    }

    pub(crate) fn commit(&mut self) -> Result<(), ResourceError> {
        match self.handle.take() {
            Some(handle) => handle.commit(),
            None => Ok(()),
        }
    }

    pub(crate) fn rollback(&mut self) -> Result<(), ResourceError> {
        match self.handle.take() {
            Some(handle) => handle.rollback(),
            None => Ok(()),
        }
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.rollback() {
                Ok(()) => tracing::warn!("open transaction rolled back on drop"),
                Err(err) => tracing::warn!(error = %err, "rollback on drop failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdflow_core::ErrorCategory;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct LoggingHandle(Arc<Mutex<Vec<&'static str>>>);

    impl TransactionHandle for LoggingHandle {
        fn commit(self: Box<Self>) -> Result<(), ResourceError> {
            self.0.lock().unwrap().push("commit");
            Ok(())
        }

        fn rollback(self: Box<Self>) -> Result<(), ResourceError> {
            self.0.lock().unwrap().push("rollback");
            Ok(())
        }
    }

    #[test]
    fn test_field_error_becomes_data_record() {
        let record = FieldError::new(["user", "email"], "invalid_format", "bad email")
            .with_context("value", "nope")
            .into_record();
        assert_eq!(record.category(), ErrorCategory::Data);
        assert_eq!(record.key(), "data.user.email.invalid_format");
        assert_eq!(record.context_value("value"), Some(&json!("nope")));
    }

    #[test]
    fn test_optional_record_load() {
        let load = RecordLoad::optional("user", "User", 7);
        assert!(!load.required);
        assert_eq!(load.key, json!(7));
    }

    #[test]
    fn test_guard_ends_transaction_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut guard = ResourceGuard::default();
        guard.hold(Box::new(LoggingHandle(Arc::clone(&log))));
        guard.commit().unwrap();
        guard.rollback().unwrap();
        drop(guard);
        assert_eq!(*log.lock().unwrap(), vec!["commit"]);
    }

    #[test]
    fn test_guard_rolls_back_on_drop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut guard = ResourceGuard::default();
            guard.hold(Box::new(LoggingHandle(Arc::clone(&log))));
        }
        assert_eq!(*log.lock().unwrap(), vec!["rollback"]);
    }
}
