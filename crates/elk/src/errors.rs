//! Runtime error kinds and the positioned diagnostics handed to the driver.
//!
//! Errors raised inside the analyser, generator, or VM are plain
//! [`RuntimeError`]s without position information; they unwind to the
//! [`Executor`](crate::run::Executor) entry points, which attach the last
//! visited expression's source range and package a [`Diagnostic`]. Nothing
//! is recovered below that boundary.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::expressions::CodeRange;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RuntimeError>;

/// The closed set of user-visible failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ErrorKind {
    /// An identifier, index, key, or executable could not be found.
    NotFound,
    /// A call site's argument count lies outside the callee's arity range.
    WrongArguments,
    /// A value could not be converted to the requested type.
    InvalidCast,
    /// An operator is undefined for the operand type pair.
    InvalidOperation,
    /// The left side of `=` is not an assignable place.
    InvalidAssignment,
    /// A module path failed to resolve.
    ModuleNotFound,
    /// A string could not be parsed as a number.
    InvalidNumberLiteral,
    /// A closure was passed to a callee that takes none.
    UnexpectedClosure,
    /// The `closure` built-in was used outside a closure-taking function.
    ExpectedClosure,
    /// Catch-all for messages with no more specific kind.
    Runtime,
}

/// A runtime failure: kind plus human-readable message.
///
/// Construction goes through the per-kind helpers so message shapes stay
/// consistent across the analyser and the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RuntimeError {
    /// Public so host-provided standard functions can raise typed errors.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{what} not found"))
    }

    pub(crate) fn wrong_arguments(expected: usize, actual: usize, variadic: bool) -> Self {
        let suffix = if variadic { " (variadic)" } else { "" };
        Self::new(
            ErrorKind::WrongArguments,
            format!("wrong number of arguments: expected {expected}, got {actual}{suffix}"),
        )
    }

    pub(crate) fn invalid_cast(from: impl fmt::Display, to: impl fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidCast, format!("cannot cast {from} to {to}"))
    }

    pub(crate) fn invalid_operation(op: impl fmt::Display, tags: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidOperation,
            format!("operator {op} is not defined for {tags}"),
        )
    }

    pub(crate) fn invalid_assignment(what: impl fmt::Display) -> Self {
        Self::new(ErrorKind::InvalidAssignment, format!("cannot assign to {what}"))
    }

    pub(crate) fn module_not_found(path: impl fmt::Display) -> Self {
        Self::new(ErrorKind::ModuleNotFound, format!("module {path} not found"))
    }

    pub(crate) fn invalid_number_literal(text: &str) -> Self {
        Self::new(ErrorKind::InvalidNumberLiteral, format!("invalid number literal {text:?}"))
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// A runtime error with the source position of the last visited expression.
///
/// This is the only error type that crosses the public API boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub error: RuntimeError,
    pub position: CodeRange,
}

impl Diagnostic {
    pub(crate) fn new(error: RuntimeError, position: CodeRange) -> Self {
        Self { error, position }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}..{}", self.error, self.position.start, self.position.end)
    }
}

impl std::error::Error for Diagnostic {}
