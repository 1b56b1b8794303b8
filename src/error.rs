//! Result type and error taxonomy for every fallible `scriptcore` operation.
//!
//! Every public entry point returns [`ScriptResult<T>`] (an alias of
//! `Result<T, ErrorInfo>`) rather than panicking or throwing across the
//! crate boundary. [`ErrorInfo`] carries enough context — kind, message,
//! an optional context string, an optional source line, and a timestamp —
//! for a host to surface a useful diagnostic without scriptcore depending
//! on any particular logging backend.

use std::time::{SystemTime, UNIX_EPOCH};

/// The kind of failure behind an [`ErrorInfo`].
///
/// Grouped by failure domain: script-execution failures, lookup/binding
/// failures, hot-reload/file failures, resource exhaustion, and internal
/// state violations. The `Policy` variants are reserved for hosts layering
/// a security policy on top of scriptcore; the core never raises them
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// The script text could not be parsed.
    #[error("syntax error")]
    SyntaxError,
    /// The script parsed but could not be compiled/prepared for execution.
    #[error("compile error")]
    CompileError,
    /// The script raised an error while executing.
    #[error("runtime error")]
    RuntimeError,
    /// A script file could not be loaded into the registry.
    #[error("script load error")]
    ScriptLoadError,

    /// `call_lua_function` target does not exist as a global.
    #[error("function not found")]
    FunctionNotFound,
    /// A binding registration would overwrite an existing global.
    #[error("function already exists")]
    FunctionExists,
    /// A native binding could not be registered.
    #[error("function register error")]
    FunctionRegisterError,
    /// Arguments passed to a native or script function were invalid.
    #[error("invalid arguments")]
    InvalidArguments,
    /// A `register_bindings` callback returned or raised an error.
    #[error("binding registration failed")]
    BindingRegistrationFailed,
    /// A lookup for a native binding failed.
    #[error("binding not found")]
    BindingNotFound,

    /// A hot-reload attempt failed for a reason not otherwise classified.
    #[error("hot reload failed")]
    HotReloadFailed,
    /// The script's backing file does not exist.
    #[error("file not found")]
    FileNotFound,
    /// The script's backing file exists but could not be read.
    #[error("file read error")]
    FileReadError,

    /// A memory budget/limit was exceeded.
    #[error("memory limit exceeded")]
    MemoryLimitExceeded,
    /// An allocator could not satisfy a request (arena/pool exhaustion).
    #[error("resource exhausted")]
    ResourceExhausted,

    /// The operation was rejected because of an invalid object state
    /// (moved-from manager, recursive reload, `Result::value()` on an error).
    #[error("invalid state")]
    InvalidState,
    /// An invariant scriptcore itself is responsible for was violated.
    #[error("internal error")]
    InternalError,

    /// Reserved for host-layered security policy; never raised by the core.
    #[error("security error")]
    SecurityError,
    /// Reserved for host-layered security policy; never raised by the core.
    #[error("permission denied")]
    PermissionDenied,
    /// Reserved for host-layered security policy; never raised by the core.
    #[error("execution timeout")]
    ExecutionTimeout,
}

/// Structured information about a failed operation.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// The category of failure.
    pub kind: ErrorKind,
    /// A human-readable description.
    pub message: String,
    /// Where the error occurred (script name, file path, function name, ...).
    pub context: String,
    /// Source line number, when known (scripts, or host-supplied callsite).
    pub line_number: Option<u32>,
    /// Unix timestamp (seconds) at construction time.
    pub timestamp: u64,
    /// Captured backtrace, when the `debug` feature is enabled.
    pub stack_trace: Option<String>,
}

impl ErrorInfo {
    /// Build a new `ErrorInfo` with the current time and, if the `debug`
    /// feature is enabled, a captured backtrace.
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        context: impl Into<String>,
        line_number: Option<u32>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            context: context.into(),
            line_number,
            timestamp: now_unix(),
            stack_trace: capture_stack_trace(),
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(feature = "debug")]
fn capture_stack_trace() -> Option<String> {
    Some(format!("{:?}", backtrace::Backtrace::new()))
}

#[cfg(not(feature = "debug"))]
fn capture_stack_trace() -> Option<String> {
    None
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line_number {
            Some(line) => write!(
                f,
                "[{}] {} (in {}:{})",
                error_kind_tag(self.kind),
                self.message,
                self.context,
                line
            ),
            None => write!(
                f,
                "[{}] {} (in {})",
                error_kind_tag(self.kind),
                self.message,
                self.context
            ),
        }
    }
}

impl std::error::Error for ErrorInfo {}

fn error_kind_tag(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::SyntaxError => "SyntaxError",
        ErrorKind::CompileError => "CompileError",
        ErrorKind::RuntimeError => "RuntimeError",
        ErrorKind::ScriptLoadError => "ScriptLoadError",
        ErrorKind::FunctionNotFound => "FunctionNotFound",
        ErrorKind::FunctionExists => "FunctionExists",
        ErrorKind::FunctionRegisterError => "FunctionRegisterError",
        ErrorKind::InvalidArguments => "InvalidArguments",
        ErrorKind::BindingRegistrationFailed => "BindingRegistrationFailed",
        ErrorKind::BindingNotFound => "BindingNotFound",
        ErrorKind::HotReloadFailed => "HotReloadFailed",
        ErrorKind::FileNotFound => "FileNotFound",
        ErrorKind::FileReadError => "FileReadError",
        ErrorKind::MemoryLimitExceeded => "MemoryLimitExceeded",
        ErrorKind::ResourceExhausted => "ResourceExhausted",
        ErrorKind::InvalidState => "InvalidState",
        ErrorKind::InternalError => "InternalError",
        ErrorKind::SecurityError => "SecurityError",
        ErrorKind::PermissionDenied => "PermissionDenied",
        ErrorKind::ExecutionTimeout => "ExecutionTimeout",
    }
}

/// Builds an `Err(ErrorInfo)` result for the common case of constructing
/// and returning a failure in one step.
pub fn make_error<T>(
    kind: ErrorKind,
    message: impl Into<String>,
    context: impl Into<String>,
    line: Option<u32>,
) -> ScriptResult<T> {
    Err(ErrorInfo::new(kind, message, context, line))
}

/// Wraps a value as a successful `ScriptResult`, for symmetry with
/// [`make_error`] at call sites that build either outcome conditionally.
pub fn make_success<T>(value: T) -> ScriptResult<T> {
    Ok(value)
}

/// The crate-wide fallible-operation result type.
///
/// This is a plain alias over `std::result::Result` rather than a
/// hand-rolled sum type: `is_ok`/`is_err`/`?`/`unwrap_or`/`map` already
/// cover the common accessors, so re-deriving them would only shadow the
/// standard API without adding anything. [`ResultExt`] adds a couple of
/// named accessors (`is_success`, `value`, `value_or`) for call sites that
/// read more naturally that way.
pub type ScriptResult<T> = Result<T, ErrorInfo>;

/// Named accessors layered over [`ScriptResult`].
pub trait ResultExt<T> {
    /// True if this result holds a value.
    fn is_success(&self) -> bool;
    /// True if this result holds an error.
    fn is_error(&self) -> bool;
    /// The contained value, or an `InvalidState` error if this is an error.
    fn value(self) -> ScriptResult<T>;
    /// The contained value, or `default` if this is an error.
    fn value_or(self, default: T) -> T;
}

impl<T> ResultExt<T> for ScriptResult<T> {
    fn is_success(&self) -> bool {
        self.is_ok()
    }

    fn is_error(&self) -> bool {
        self.is_err()
    }

    fn value(self) -> ScriptResult<T> {
        self.map_err(|e| {
            ErrorInfo::new(
                ErrorKind::InvalidState,
                format!("value() called on an error result: {e}"),
                "Result::value",
                None,
            )
        })
    }

    fn value_or(self, default: T) -> T {
        self.unwrap_or(default)
    }
}

/// Void specialization for operations with no return payload, matching the
/// spec's "a void specialization exists for operations with no return
/// payload."
pub type VoidResult = ScriptResult<()>;
