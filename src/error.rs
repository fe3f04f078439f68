//! Unified error types for the port core.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! API boundary's error mapping uniform.  Each variant maps onto one of the
//! caller-visible [`ErrorCategory`] values via [`Error::category`].

use core::fmt;

use crate::config::ConfigError;
use crate::expr::ExprError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Expression parsing, assignment or evaluation failed.
    Expression(ExprError),
    /// The port is disabled.
    PortDisabled,
    /// The port does not accept writes.
    ReadOnlyPort,
    /// Sequences cannot be played on a port driven by an expression.
    PortWithExpression,
    /// A supplied field failed validation.  Carries the field name.
    InvalidField(String),
    /// The attribute exists but cannot be changed.
    AttributeNotModifiable(String),
    /// No attribute with that name exists on the port.
    NoSuchAttribute(String),
    /// No port with that id exists.
    NoSuchPort(String),
    /// A port with that id already exists.
    DuplicatePort(String),
    /// The virtual port limit has been reached.
    TooManyPorts,
    /// Only virtual ports can be removed.
    PortNotRemovable(String),
    /// A hardware call exceeded its deadline.
    PortTimeout,
    /// The hardware driver reported a fault.
    PortError(String),
    /// The peripheral's work queue is full; retry later.
    Busy,
    /// The peripheral's worker has been stopped.
    RunnerStopped,
    /// Persistence backend failure.
    Storage(StorageError),
    /// The supplied configuration was rejected.
    Config(ConfigError),
    /// Anything not anticipated above, message preserved.
    Unexpected(String),
}

/// Caller-visible categories the API boundary maps errors onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    BadRequest,
    Timeout,
    UpstreamError,
    Conflict,
    ServerError,
}

impl Error {
    /// Map this error onto its API boundary category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoSuchPort(_) => ErrorCategory::NotFound,
            Self::Expression(ExprError::Skipped | ExprError::UnknownPort(_)) => {
                ErrorCategory::ServerError
            }
            Self::Expression(_)
            | Self::PortDisabled
            | Self::ReadOnlyPort
            | Self::PortWithExpression
            | Self::InvalidField(_)
            | Self::AttributeNotModifiable(_)
            | Self::NoSuchAttribute(_)
            | Self::DuplicatePort(_)
            | Self::TooManyPorts
            | Self::PortNotRemovable(_)
            | Self::Config(_) => ErrorCategory::BadRequest,
            Self::PortTimeout => ErrorCategory::Timeout,
            Self::PortError(_) => ErrorCategory::UpstreamError,
            Self::Busy => ErrorCategory::Conflict,
            Self::RunnerStopped | Self::Storage(_) | Self::Unexpected(_) => {
                ErrorCategory::ServerError
            }
        }
    }

    /// Transient conditions the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy | Self::PortTimeout)
    }

    /// Short machine-readable code, as reported to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Expression(ExprError::CircularDependency(_)) => "circular-dependency",
            Self::Expression(_) => "invalid-expression",
            Self::PortDisabled => "port-disabled",
            Self::ReadOnlyPort => "read-only-port",
            Self::PortWithExpression => "port-with-expression",
            Self::InvalidField(_) => "invalid-field",
            Self::AttributeNotModifiable(_) => "attribute-not-modifiable",
            Self::NoSuchAttribute(_) => "no-such-attribute",
            Self::NoSuchPort(_) => "no-such-port",
            Self::DuplicatePort(_) => "duplicate-port",
            Self::TooManyPorts => "too-many-ports",
            Self::PortNotRemovable(_) => "port-not-removable",
            Self::PortTimeout => "port-timeout",
            Self::PortError(_) => "port-error",
            Self::Busy => "busy",
            Self::Config(_) => "invalid-config",
            Self::RunnerStopped | Self::Storage(_) | Self::Unexpected(_) => "unexpected-error",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression(e) => write!(f, "expression: {e}"),
            Self::PortDisabled => write!(f, "port disabled"),
            Self::ReadOnlyPort => write!(f, "read-only port"),
            Self::PortWithExpression => write!(f, "port has an expression"),
            Self::InvalidField(name) => write!(f, "invalid field: {name}"),
            Self::AttributeNotModifiable(name) => write!(f, "attribute not modifiable: {name}"),
            Self::NoSuchAttribute(name) => write!(f, "no such attribute: {name}"),
            Self::NoSuchPort(id) => write!(f, "no such port: {id}"),
            Self::DuplicatePort(id) => write!(f, "duplicate port: {id}"),
            Self::TooManyPorts => write!(f, "too many ports"),
            Self::PortNotRemovable(id) => write!(f, "port not removable: {id}"),
            Self::PortTimeout => write!(f, "port timeout"),
            Self::PortError(msg) => write!(f, "port error: {msg}"),
            Self::Busy => write!(f, "peripheral busy"),
            Self::RunnerStopped => write!(f, "threaded runner stopped"),
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Unexpected(msg) => write!(f, "unexpected error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ExprError> for Error {
    fn from(e: ExprError) -> Self {
        Self::Expression(e)
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors from [`Store`](crate::app::ports::Store) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend refused or failed the operation.
    Backend(String),
    /// A record could not be encoded or decoded.
    Corrupted,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::Corrupted => write!(f, "record corrupted"),
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
