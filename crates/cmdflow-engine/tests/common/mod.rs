#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use cmdflow_core::{PhaseResult, ResourceError};
use cmdflow_engine::{
    Command, CommandContext, FieldError, RecordLoad, TransactionHandle, TransactionResource,
};
use mockall::mock;
use serde_json::Value;

/// Command whose execute step is a closure over raw JSON inputs
pub struct FnCommand<F> {
    name: String,
    execute: F,
    loads: Vec<RecordLoad>,
    accept_fallback: bool,
}

pub fn command<F>(name: &str, execute: F) -> FnCommand<F>
where
    F: FnMut(&mut CommandContext<Value>) -> PhaseResult<Value>,
{
    FnCommand {
        name: name.to_string(),
        execute,
        loads: Vec::new(),
        accept_fallback: false,
    }
}

impl<F> FnCommand<F> {
    pub fn loading(mut self, load: RecordLoad) -> Self {
        self.loads.push(load);
        self
    }

    pub fn accepting_fallback(mut self) -> Self {
        self.accept_fallback = true;
        self
    }
}

impl<F> Command for FnCommand<F>
where
    F: FnMut(&mut CommandContext<Value>) -> PhaseResult<Value>,
{
    type Inputs = Value;
    type Output = Value;

    fn name(&self) -> &str {
        &self.name
    }

    fn record_loads(&self, _inputs: &Value) -> Vec<RecordLoad> {
        self.loads.clone()
    }

    fn execute(&mut self, ctx: &mut CommandContext<Value>) -> PhaseResult<Value> {
        (self.execute)(ctx)
    }

    fn from_fallback(&self, value: &Value) -> Option<Value> {
        self.accept_fallback.then(|| value.clone())
    }
}

/// Requires a string `email` containing `@`
pub fn email_validator(raw: &Value) -> Result<Value, Vec<FieldError>> {
    match raw.get("email").and_then(Value::as_str) {
        None => Err(vec![FieldError::new(
            ["email"],
            "missing_required_attribute",
            "email is required",
        )]),
        Some(email) if !email.contains('@') => Err(vec![FieldError::new(
            ["email"],
            "invalid_format",
            "email must contain @",
        )
        .with_context("value", email)]),
        Some(_) => Ok(raw.clone()),
    }
}

/// Transaction resource that logs every call and can be told to fail
#[derive(Clone, Default)]
pub struct FakeResource {
    pub log: Arc<Mutex<Vec<&'static str>>>,
    pub fail_open: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
}

impl FakeResource {
    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

struct FakeHandle {
    log: Arc<Mutex<Vec<&'static str>>>,
    fail_commit: bool,
    fail_rollback: bool,
}

impl TransactionResource for FakeResource {
    fn open(&self) -> Result<Box<dyn TransactionHandle>, ResourceError> {
        self.log.lock().unwrap().push("open");
        if self.fail_open {
            return Err(ResourceError::new("database unavailable"));
        }
        Ok(Box::new(FakeHandle {
            log: Arc::clone(&self.log),
            fail_commit: self.fail_commit,
            fail_rollback: self.fail_rollback,
        }))
    }
}

impl TransactionHandle for FakeHandle {
    fn commit(self: Box<Self>) -> Result<(), ResourceError> {
        self.log.lock().unwrap().push("commit");
        if self.fail_commit {
            return Err(ResourceError::new("commit rejected"));
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), ResourceError> {
        self.log.lock().unwrap().push("rollback");
        if self.fail_rollback {
            return Err(ResourceError::new("rollback rejected"));
        }
        Ok(())
    }
}

mock! {
    pub Loader {}

    impl cmdflow_engine::RecordLoader for Loader {
        fn find(&self, record_type: &str, key: &Value) -> Result<Option<Value>, ResourceError>;
    }
}

/// Registry type for [`FnCommand`]
pub type Registry = cmdflow_core::CallbackRegistry<CommandContext<Value>, Option<Value>>;
