//! Error types for host members

use std::fmt;

/// Result type returned by host member bodies
pub type HostResult<T> = Result<T, HostError>;

/// An exception thrown by host code.
///
/// Keeps the exception type name so script code can tell host failures apart,
/// plus an optional chain of inner causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostException {
    /// Exception type name, e.g. `System.InvalidOperationException`
    pub type_name: String,
    /// Human readable message
    pub message: String,
    /// Wrapped cause
    pub inner: Option<Box<HostException>>,
}

impl HostException {
    /// Create an exception without a cause
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            inner: None,
        }
    }

    /// Attach a cause
    pub fn with_inner(mut self, inner: HostException) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Innermost cause (self when there is none)
    pub fn root(&self) -> &HostException {
        let mut current = self;
        while let Some(inner) = current.inner.as_deref() {
            current = inner;
        }
        current
    }
}

impl fmt::Display for HostException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Host member failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    /// Exception thrown by the host member itself
    #[error("{0}")]
    Exception(HostException),

    /// A value had the wrong host type
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Invalid argument
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// A call back into script code failed
    #[error("{location}{message}")]
    Script {
        /// Error message raised by the script
        message: String,
        /// `chunk:line: ` of the failing call site, or empty
        location: String,
        /// Host failure carried by the script error, if it wrapped one
        cause: Option<Box<HostError>>,
    },
}

impl HostError {
    /// Shorthand for a host exception
    pub fn exception(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        HostError::Exception(HostException::new(type_name, message))
    }

    /// Shorthand for a type mismatch
    pub fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        HostError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// The host exception behind this error, looking through script wrappers
    pub fn host_exception(&self) -> Option<&HostException> {
        match self {
            HostError::Exception(e) => Some(e),
            HostError::Script { cause, .. } => cause.as_deref().and_then(HostError::host_exception),
            _ => None,
        }
    }
}

impl From<HostException> for HostError {
    fn from(e: HostException) -> Self {
        HostError::Exception(e)
    }
}

impl From<String> for HostError {
    fn from(s: String) -> Self {
        HostError::ArgumentError(s)
    }
}

impl From<&str> for HostError {
    fn from(s: &str) -> Self {
        HostError::ArgumentError(s.to_string())
    }
}
