//! Error types and error handling strategy for Coreflow.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Failures inside the dataflow graph are *values*: they flow through
//!   async values exactly like successful results, and downstream
//!   operations re-propagate them instead of assuming success
//! - Protocol failures are returned in the response, never dropped
//! - Nothing is silently retried; retry policy belongs to the caller
//! - Double resolution of an async value is a programming error and panics
//!   rather than producing an `Error`
//!
//! # Categories
//!
//! - **Dispatch**: op lookup, tensor conversion, failed-input propagation
//! - **Protocol**: unknown contexts, programs, and remote object ids
//! - **Cancellation**: cancelled work, propagated as a value
//! - **Internal**: runtime bugs and invalid states

use core::fmt;
use std::sync::Arc;

/// Convenience alias for results carrying a Coreflow [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Dispatch ===
    /// No handler in the chain has an entry for the requested op.
    NoSuchOp,
    /// No handler in the chain can convert the input tensor representation.
    TensorConversion,
    /// An input async value resolved to an error; outputs re-propagate it.
    FailedInput,
    /// An op attribute was missing or had the wrong type.
    InvalidAttribute,
    /// The dispatch function rejected the invocation (shape, dtype, arity).
    InvalidOpInput,

    // === Distributed protocol ===
    /// The request named a context id that was never created or was closed.
    UnknownContext,
    /// A context with this id is already live.
    ContextAlreadyExists,
    /// The context was closed while the request was in flight.
    ContextClosed,
    /// The request named a program that was never registered.
    UnknownProgram,
    /// The request named a remote object id that is unknown or deleted.
    UnknownObject,
    /// The program bytes could not be decoded.
    InvalidProgram,

    // === Cancellation ===
    /// The operation was cancelled by a caller-level race.
    Cancelled,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::NoSuchOp
            | Self::TensorConversion
            | Self::FailedInput
            | Self::InvalidAttribute
            | Self::InvalidOpInput => ErrorCategory::Dispatch,
            Self::UnknownContext
            | Self::ContextAlreadyExists
            | Self::ContextClosed
            | Self::UnknownProgram
            | Self::UnknownObject
            | Self::InvalidProgram => ErrorCategory::Protocol,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// True for errors that are terminal per invocation or per RPC:
    /// re-issuing the identical request cannot succeed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoSuchOp => "no such op",
            Self::TensorConversion => "tensor conversion unsupported",
            Self::FailedInput => "failed input",
            Self::InvalidAttribute => "invalid attribute",
            Self::InvalidOpInput => "invalid op input",
            Self::UnknownContext => "unknown context",
            Self::ContextAlreadyExists => "context already exists",
            Self::ContextClosed => "context closed",
            Self::UnknownProgram => "unknown program",
            Self::UnknownObject => "unknown remote object",
            Self::InvalidProgram => "invalid program",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// The category of an error, for coarse-grained handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Op lookup, conversion, and failed-input propagation.
    Dispatch,
    /// Distributed context protocol failures, surfaced in responses.
    Protocol,
    /// Cancellation propagated as a value.
    Cancellation,
    /// Runtime bugs and invalid states.
    Internal,
}

/// A Coreflow error: a kind plus a human-readable message.
///
/// Errors are cheap to clone (the message is shared) because a single
/// failure fans out to every declared output of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: Arc<str>,
}

impl Error {
    /// Creates an error with the given kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Arc::from(message.into()),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}
