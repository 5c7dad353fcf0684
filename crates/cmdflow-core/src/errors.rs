use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::state_machine::ExecutionState;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Outcome of one phase, callback, or around-wrapper
pub type PhaseResult<T> = std::result::Result<T, Interrupt>;

// ========== Error Facility ==========

/// Category taxonomy for recorded errors
///
/// Categories are part of every record's composite key, so their string
/// forms are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Input shape and validation failures
    Data,
    /// Execution-time failures, including converted Rust errors and panics
    Runtime,
    /// Business-rule violations
    Domain,
    /// Infrastructure-level failures
    System,
    Auth,
    /// Third-party/service failures; often transient
    External,
}

impl ErrorCategory {
    /// Get the stable string form used in composite keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Data => "data",
            ErrorCategory::Runtime => "runtime",
            ErrorCategory::Domain => "domain",
            ErrorCategory::System => "system",
            ErrorCategory::Auth => "auth",
            ErrorCategory::External => "external",
        }
    }

    /// Severity a record of this category gets unless overridden
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCategory::System => Severity::Critical,
            ErrorCategory::External => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered severity scale (`Debug` lowest, `Fatal` highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
            Severity::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

fn next_record_id() -> u64 {
    NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed)
}

/// Structured, immutable failure record
///
/// Records are built through the category factories ([`ErrorRecord::data`],
/// [`ErrorRecord::runtime`], ...) and refined with `with_*` builders. Every
/// builder call yields a new record with a new identity; `clone()` keeps the
/// identity, so adding a clone to an [`ErrorCollection`](crate::ErrorCollection)
/// that already holds the original is a no-op.
///
/// The composite key (see [`ErrorRecord::key`]) is computed once on first
/// use and memoized.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    id: u64,
    category: ErrorCategory,
    symbol: String,
    path: Vec<String>,
    message: String,
    context: BTreeMap<String, Value>,
    runtime_path: Vec<String>,
    severity: Severity,
    suggestion: Option<String>,
    help: Option<String>,
    cause: Option<Box<ErrorRecord>>,
    backtrace: Option<String>,
    fatal: bool,
    key: OnceLock<String>,
}

impl ErrorRecord {
    /// Create a record of the given category with that category's default severity
    pub fn new(
        category: ErrorCategory,
        symbol: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: next_record_id(),
            category,
            symbol: symbol.into(),
            path: Vec::new(),
            message: message.into(),
            context: BTreeMap::new(),
            runtime_path: Vec::new(),
            severity: category.default_severity(),
            suggestion: None,
            help: None,
            cause: None,
            backtrace: None,
            fatal: category == ErrorCategory::System,
            key: OnceLock::new(),
        }
    }

    /// Input shape/validation failure
    pub fn data(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, symbol, message)
    }

    /// Execution-time failure
    pub fn runtime(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Runtime, symbol, message)
    }

    /// Business-rule violation
    pub fn domain(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Domain, symbol, message)
    }

    /// Infrastructure failure; critical and fatal by default
    pub fn system(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::System, symbol, message)
    }

    pub fn auth(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, symbol, message)
    }

    /// Third-party/service failure; warning severity by default
    pub fn external(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::External, symbol, message)
    }

    /// Convert a Rust error into a `runtime` record carrying its type name
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        Self::runtime("unhandled_error", err.to_string())
            .with_context("error_type", std::any::type_name::<E>())
    }

    /// Convert a caught panic payload into a `runtime` record
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::runtime("unhandled_error", message).with_context("error_type", "panic")
    }

    // Builders yield a new record: fresh identity, fresh key memo.
    fn renewed(mut self) -> Self {
        self.id = next_record_id();
        self.key = OnceLock::new();
        self
    }

    /// Replace the field path
    pub fn with_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self.renewed()
    }

    /// Prepend segments to the field path
    pub fn with_path_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path: Vec<String> = prefix.into_iter().map(Into::into).collect();
        path.append(&mut self.path);
        self.path = path;
        self.renewed()
    }

    /// Prepend enclosing command names to the runtime path
    pub fn with_runtime_path_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut runtime_path: Vec<String> = prefix.into_iter().map(Into::into).collect();
        runtime_path.append(&mut self.runtime_path);
        self.runtime_path = runtime_path;
        self.renewed()
    }

    /// Add one context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self.renewed()
    }

    /// Replace the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self.renewed()
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self.renewed()
    }

    pub fn with_fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self.renewed()
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self.renewed()
    }

    /// Attach a help reference (URL or doc anchor)
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self.renewed()
    }

    /// Point at the record that caused this one
    pub fn with_cause(mut self, cause: ErrorRecord) -> Self {
        self.cause = Some(Box::new(cause));
        self.renewed()
    }

    /// Snapshot the current call stack (honours `RUST_BACKTRACE`)
    pub fn with_backtrace(mut self) -> Self {
        let backtrace = std::backtrace::Backtrace::capture();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            self.backtrace = Some(backtrace.to_string());
        }
        self.renewed()
    }

    /// Identity token; clones share it, builders renew it
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    /// Get one context value, if present
    pub fn context_value(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn runtime_path(&self) -> &[String] {
        &self.runtime_path
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn suggestion(&self) -> Option<&str> {
        self.suggestion.as_deref()
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn cause(&self) -> Option<&ErrorRecord> {
        self.cause.as_deref()
    }

    pub fn backtrace(&self) -> Option<&str> {
        self.backtrace.as_deref()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Composite key: `[runtime>path>]category.(path.joined|root).symbol`
    ///
    /// ```
    /// use cmdflow_core::ErrorRecord;
    ///
    /// let err = ErrorRecord::data("invalid_format", "bad email").with_path(["user", "email"]);
    /// assert_eq!(err.key(), "data.user.email.invalid_format");
    /// ```
    pub fn key(&self) -> &str {
        self.key.get_or_init(|| {
            let mut key = String::new();
            if !self.runtime_path.is_empty() {
                key.push_str(&self.runtime_path.join(">"));
                key.push('>');
            }
            key.push_str(self.category.as_str());
            key.push('.');
            if self.path.is_empty() {
                key.push_str("root");
            } else {
                key.push_str(&self.path.join("."));
            }
            key.push('.');
            key.push_str(&self.symbol);
            key
        })
    }

    /// Field path joined by `.`, or `root` when empty
    pub fn path_label(&self) -> String {
        if self.path.is_empty() {
            "root".to_string()
        } else {
            self.path.join(".")
        }
    }

    /// Walk the cause chain, self first, root cause last
    pub fn error_chain(&self) -> Vec<&ErrorRecord> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            chain.push(cause);
            current = cause;
        }
        chain
    }

    /// Last record of [`ErrorRecord::error_chain`]
    pub fn root_cause(&self) -> &ErrorRecord {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }

    /// Read-only JSON view for connectors
    pub fn to_value(&self) -> Value {
        json!({
            "key": self.key(),
            "category": self.category.as_str(),
            "symbol": self.symbol,
            "path": self.path,
            "runtime_path": self.runtime_path,
            "message": self.message,
            "context": self.context,
            "severity": self.severity.as_str(),
            "suggestion": self.suggestion,
            "help": self.help,
            "is_fatal": self.fatal,
            "cause": self.cause.as_ref().map(|c| c.to_value()),
        })
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.key(), self.message)?;
        if self.fatal {
            write!(f, " (fatal)")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Control-flow outcome that stops a phase
///
/// `Halted` cancels the current phase without itself being an error record;
/// `Failed` carries the record that caused the stop.
#[derive(Debug, Clone, Error)]
pub enum Interrupt {
    #[error("halted")]
    Halted,

    #[error("failed: {0}")]
    Failed(#[from] ErrorRecord),
}

impl Interrupt {
    pub fn is_halt(&self) -> bool {
        matches!(self, Interrupt::Halted)
    }

    /// The carried record, if this is a failure
    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            Interrupt::Halted => None,
            Interrupt::Failed(record) => Some(record),
        }
    }
}

// ========== End Error Facility ==========

/// Failure reported by an external collaborator (resource, record loader)
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ResourceError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ResourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying error
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Execution-environment failures
///
/// These are not business errors: they abort a run (after rollback) and
/// surface to the caller instead of being recorded in the run's
/// [`ErrorCollection`](crate::ErrorCollection).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The state machine rejected a transition
    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition {
        from: ExecutionState,
        to: ExecutionState,
    },

    #[error("Failed to open resource: {0}")]
    ResourceOpen(#[source] ResourceError),

    #[error("Failed to commit resource: {0}")]
    ResourceCommit(#[source] ResourceError),

    #[error("Failed to roll back resource: {0}")]
    ResourceRollback(#[source] ResourceError),

    #[error("Failed to load record '{record}': {source}")]
    RecordLoad {
        record: String,
        #[source]
        source: ResourceError,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl EngineError {
    /// Get the stable error code for this failure
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::IllegalTransition { .. } => "ERR_ILLEGAL_TRANSITION",
            EngineError::ResourceOpen(_) => "ERR_RESOURCE_OPEN",
            EngineError::ResourceCommit(_) => "ERR_RESOURCE_COMMIT",
            EngineError::ResourceRollback(_) => "ERR_RESOURCE_ROLLBACK",
            EngineError::RecordLoad { .. } => "ERR_RECORD_LOAD",
            EngineError::Config(_) => "ERR_CONFIG",
            EngineError::Io(_) => "ERR_IO",
            EngineError::Toml(_) => "ERR_CONFIG_PARSE",
        }
    }
}

/// Uniform kind/code view used by the logging macros
pub trait ErrorCode {
    /// Coarse classification (category or facility)
    fn error_kind(&self) -> String;
    /// Stable machine code
    fn error_code(&self) -> String;
}

impl ErrorCode for ErrorRecord {
    fn error_kind(&self) -> String {
        self.category.as_str().to_string()
    }

    fn error_code(&self) -> String {
        self.key().to_string()
    }
}

impl ErrorCode for EngineError {
    fn error_kind(&self) -> String {
        "engine".to_string()
    }

    fn error_code(&self) -> String {
        self.code().to_string()
    }
}

impl ErrorCode for Interrupt {
    fn error_kind(&self) -> String {
        match self {
            Interrupt::Halted => "halt".to_string(),
            Interrupt::Failed(record) => record.error_kind(),
        }
    }

    fn error_code(&self) -> String {
        match self {
            Interrupt::Halted => "halted".to_string(),
            Interrupt::Failed(record) => record.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severity_per_category() {
        assert_eq!(ErrorRecord::data("x", "m").severity(), Severity::Error);
        assert_eq!(ErrorRecord::runtime("x", "m").severity(), Severity::Error);
        assert_eq!(ErrorRecord::domain("x", "m").severity(), Severity::Error);
        assert_eq!(ErrorRecord::auth("x", "m").severity(), Severity::Error);
        assert_eq!(ErrorRecord::external("x", "m").severity(), Severity::Warning);

        let system = ErrorRecord::system("disk_full", "no space");
        assert_eq!(system.severity(), Severity::Critical);
        assert!(system.is_fatal());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert!(Severity::Critical < Severity::Fatal);
    }

    #[test]
    fn test_key_with_runtime_path() {
        let err = ErrorRecord::data("missing", "required")
            .with_path(["name"])
            .with_runtime_path_prefix(["outer", "inner"]);
        assert_eq!(err.key(), "outer>inner>data.name.missing");
    }

    #[test]
    fn test_key_is_memoized() {
        let err = ErrorRecord::runtime("timeout", "took too long");
        let first = err.key() as *const str;
        let second = err.key() as *const str;
        assert_eq!(first, second);
    }

    #[test]
    fn test_builders_renew_identity_and_key() {
        let base = ErrorRecord::data("too_short", "too short").with_path(["name"]);
        assert_eq!(base.key(), "data.name.too_short");

        let prefixed = base.clone().with_path_prefix(["user"]);
        assert_ne!(prefixed.id(), base.id());
        assert_eq!(prefixed.key(), "data.user.name.too_short");
        assert_eq!(base.key(), "data.name.too_short");
    }

    #[test]
    fn test_clone_keeps_identity() {
        let err = ErrorRecord::domain("overdrawn", "balance too low");
        assert_eq!(err.clone().id(), err.id());
    }

    #[test]
    fn test_from_error_records_type_name() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = ErrorRecord::from_error(&io);
        assert_eq!(err.category(), ErrorCategory::Runtime);
        assert_eq!(err.symbol(), "unhandled_error");
        assert_eq!(err.message(), "boom");
        let error_type = err.context_value("error_type").and_then(|v| v.as_str());
        assert!(error_type.unwrap().contains("io::error::Error"));
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = ErrorRecord::from_panic(&"static message");
        assert_eq!(err.message(), "static message");

        let owned: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let err = ErrorRecord::from_panic(owned.as_ref());
        assert_eq!(err.message(), "owned message");
        assert_eq!(
            err.context_value("error_type"),
            Some(&Value::String("panic".to_string()))
        );
    }

    #[test]
    fn test_std_error_source_follows_cause() {
        use std::error::Error as _;
        let root = ErrorRecord::external("timeout", "upstream timed out");
        let outer = ErrorRecord::runtime("fetch_failed", "fetch failed").with_cause(root);
        let source = outer.source().map(|s| s.to_string()).unwrap();
        assert!(source.contains("external.root.timeout"));
    }

    #[test]
    fn test_to_value_includes_key_and_cause() {
        let err = ErrorRecord::data("invalid", "bad")
            .with_path(["age"])
            .with_context("min", 18)
            .with_cause(ErrorRecord::runtime("parse", "not a number"));
        let value = err.to_value();
        assert_eq!(value["key"], "data.age.invalid");
        assert_eq!(value["context"]["min"], 18);
        assert_eq!(value["cause"]["key"], "runtime.root.parse");
        assert_eq!(value["severity"], "error");
    }

    #[test]
    fn test_interrupt_from_record() {
        let interrupt: Interrupt = ErrorRecord::domain("nope", "denied").into();
        assert!(!interrupt.is_halt());
        assert_eq!(interrupt.error().map(|e| e.symbol()), Some("nope"));
        assert!(Interrupt::Halted.error().is_none());
    }

    #[test]
    fn test_engine_error_codes() {
        let err = EngineError::IllegalTransition {
            from: ExecutionState::Succeeded,
            to: ExecutionState::Executing,
        };
        assert_eq!(err.code(), "ERR_ILLEGAL_TRANSITION");
        assert!(err.to_string().contains("succeeded"));

        let err = EngineError::ResourceCommit(ResourceError::new("lost connection"));
        assert_eq!(err.code(), "ERR_RESOURCE_COMMIT");
        assert!(err.to_string().contains("lost connection"));
    }
}
