//! Runtime error taxonomy and control-flow plumbing
//!
//! Language-visible failures are values: a [`RillError`] carries the
//! payload a `catch` clause binds (for runtime errors, the canonical
//! `<Kind>: <message>` string; for `throw`, whatever the program threw).
//!
//! Control flow out of a statement — `break`, `continue`, `return`, and
//! exceptions — travels in the error channel of [`EvalResult`] as a
//! [`Flow`], so every recursive evaluator call propagates it with `?` and
//! no propagation check can be forgotten.

use crate::value::Value;
use std::fmt;

/// One kind per language-visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Type,
    Name,
    Const,
    Index,
    Field,
    DivisionByZero,
    Recursion,
    ChannelClosed,
    Task,
    Serialization,
    Parse,
    Module,
    Io,
    Ffi,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Name => "NameError",
            ErrorKind::Const => "ConstError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Field => "FieldError",
            ErrorKind::DivisionByZero => "DivisionByZero",
            ErrorKind::Recursion => "RecursionError",
            ErrorKind::ChannelClosed => "ChannelClosed",
            ErrorKind::Task => "TaskError",
            ErrorKind::Serialization => "SerializationError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Module => "ModuleError",
            ErrorKind::Io => "IOError",
            ErrorKind::Ffi => "FFIError",
        };
        write!(f, "{s}")
    }
}

/// An in-flight exception.
#[derive(Debug, Clone)]
pub struct RillError {
    /// `None` for payloads raised by user `throw`.
    pub kind: Option<ErrorKind>,
    /// What a `catch` clause binds.
    pub payload: Value,
}

impl RillError {
    /// A runtime error; the payload is the canonical display string.
    pub fn new(kind: ErrorKind, msg: impl fmt::Display) -> Self {
        RillError {
            kind: Some(kind),
            payload: Value::str(format!("{kind}: {msg}")),
        }
    }

    /// A user `throw`: the payload is carried verbatim.
    pub fn thrown(payload: Value) -> Self {
        RillError {
            kind: None,
            payload,
        }
    }

    pub fn type_error(msg: impl fmt::Display) -> Self {
        RillError::new(ErrorKind::Type, msg)
    }

    pub fn name_error(msg: impl fmt::Display) -> Self {
        RillError::new(ErrorKind::Name, msg)
    }

    pub fn index_error(msg: impl fmt::Display) -> Self {
        RillError::new(ErrorKind::Index, msg)
    }

    pub fn field_error(msg: impl fmt::Display) -> Self {
        RillError::new(ErrorKind::Field, msg)
    }

    pub fn io_error(msg: impl fmt::Display) -> Self {
        RillError::new(ErrorKind::Io, msg)
    }
}

impl fmt::Display for RillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.payload)
    }
}

/// Non-local control flow, carried in `EvalResult`'s error channel.
///
/// `Break` and `Continue` drain at the nearest enclosing loop, `Return` at
/// the nearest function-call frame, `Throw` at the nearest `catch` handler
/// (or terminates the program with a stack trace at top level).
#[derive(Debug, Clone)]
pub enum Flow {
    Break,
    Continue,
    Return(Value),
    Throw(RillError),
}

impl From<RillError> for Flow {
    fn from(err: RillError) -> Self {
        Flow::Throw(err)
    }
}

/// What every evaluator step yields.
pub type EvalResult = Result<Value, Flow>;
