//! Bridge error types
//!
//! `BridgeError` is what host callers see. Inside the dispatch layer every
//! operation returns `Fault`, which is either a bridge failure still to be
//! raised into the script, or a script error already unwinding from deeper
//! in a re-entrant call chain.

use std::fmt;

use tether_script::ScriptError;
use tether_sdk::{HostError, HostException};

/// Result type for host-facing bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error raised into a script, as seen from host code.
///
/// Script code that catches it with a protected call sees an object with
/// `Message`, `Source`, `IsHostException` and `InnerMessage` members.
#[derive(Debug, Clone)]
pub struct ScriptException {
    /// Error message
    pub message: String,
    /// `chunk:line: ` of the script call site, or empty
    pub source: String,
    /// Host failure that caused the error
    pub inner: Option<HostError>,
    /// Interpreter traceback, when enabled
    pub traceback: Option<String>,
}

impl ScriptException {
    /// A script-originated error
    pub fn new(message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
            inner: None,
            traceback: None,
        }
    }

    /// Whether the error was thrown by host code
    pub fn is_host_exception(&self) -> bool {
        matches!(self.inner, Some(HostError::Exception(_)))
            || self
                .inner
                .as_ref()
                .and_then(HostError::host_exception)
                .is_some()
    }

    /// The original host exception, if any
    pub fn host_exception(&self) -> Option<&HostException> {
        self.inner.as_ref().and_then(HostError::host_exception)
    }

    /// The error as host code sees it after a call back into the script failed
    pub fn into_host_error(self) -> HostError {
        HostError::Script {
            message: self.message,
            location: self.source,
            cause: self.inner.map(Box::new),
        }
    }
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.source, self.message)?;
        if let Some(tb) = &self.traceback {
            write!(f, "\n{}", tb)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptException {}

/// Bridge errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// Name not found after every fallback
    #[error("unknown member name {member} on {type_name}")]
    UnknownMember {
        /// Type searched
        type_name: String,
        /// Requested name
        member: String,
    },

    /// No overload of a method group accepted the arguments
    #[error("invalid arguments to method call {type_name}.{method}")]
    NoMatchingOverload {
        /// Declaring type
        type_name: String,
        /// Method group name
        method: String,
    },

    /// No constructor accepted the arguments
    #[error("{type_name}: no constructor matches the given arguments")]
    NoConstructor {
        /// Type being constructed
        type_name: String,
    },

    /// A value could not be converted on an explicit assignment
    #[error("invalid value for {target}: expected {expected}, got {found}")]
    Coercion {
        /// Member or slot being assigned
        target: String,
        /// Expected host type
        expected: String,
        /// Script type found
        found: String,
    },

    /// No operator overload on either operand
    #[error("operator {op} not supported on {type_name}")]
    OperatorNotSupported {
        /// Operator metamethod
        op: &'static str,
        /// Operand type
        type_name: String,
    },

    /// A static method was called on an instance
    #[error("Can't pass instance to static method {method}")]
    StaticThroughInstance {
        /// Method name
        method: String,
    },

    /// An instance method was called without its receiver
    #[error("instance method {method} called without a receiver (use ':')")]
    MissingReceiver {
        /// Method name
        method: String,
    },

    /// Member exists but cannot be assigned
    #[error("{member} on {type_name} cannot be assigned")]
    ReadOnly {
        /// Type
        type_name: String,
        /// Member
        member: String,
    },

    /// Member exists but cannot be read
    #[error("{member} on {type_name} cannot be read")]
    WriteOnly {
        /// Type
        type_name: String,
        /// Member
        member: String,
    },

    /// Array index outside bounds
    #[error("index {index} outside array of length {len}")]
    IndexOutOfRange {
        /// Requested index
        index: i64,
        /// Array length
        len: usize,
    },

    /// Value cannot be called
    #[error("{type_name} is not callable")]
    NotCallable {
        /// Type of the value
        type_name: String,
    },

    /// Abstract types cannot be constructed
    #[error("cannot instantiate abstract type {type_name}")]
    Abstract {
        /// Type
        type_name: String,
    },

    /// Object handle was retired
    #[error("object handle {0} is no longer valid")]
    StaleHandle(String),

    /// A script reference was used with an interpreter that does not own it
    #[error("script reference belongs to another interpreter")]
    ForeignReference,

    /// No bridge is attached to the interpreter
    #[error("no bridge attached to {0}")]
    Detached(String),

    /// Path lookup failed
    #[error("{0} is not a table")]
    NotATable(String),

    /// Host member failed
    #[error("{0}")]
    Host(#[from] HostError),

    /// Script raised an error
    #[error("{0}")]
    Script(ScriptException),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Internal failure inside a dispatch operation
#[derive(Debug)]
pub enum Fault {
    /// Failure to raise into the script
    Bridge(BridgeError),
    /// Error already raised by the interpreter
    Unwind(ScriptError),
}

impl From<BridgeError> for Fault {
    fn from(e: BridgeError) -> Self {
        Fault::Bridge(e)
    }
}

impl From<ScriptError> for Fault {
    fn from(e: ScriptError) -> Self {
        Fault::Unwind(e)
    }
}

impl From<HostError> for Fault {
    fn from(e: HostError) -> Self {
        Fault::Bridge(BridgeError::Host(e))
    }
}

impl Fault {
    /// Collapse into a host error, for failures surfacing inside host code
    pub fn into_host_error(self) -> HostError {
        match self {
            Fault::Bridge(BridgeError::Host(h)) => h,
            Fault::Bridge(BridgeError::Script(exc)) => exc.into_host_error(),
            Fault::Bridge(other) => HostError::ArgumentError(other.to_string()),
            Fault::Unwind(e) => HostError::Script {
                message: e.to_string(),
                location: String::new(),
                cause: None,
            },
        }
    }
}

/// Dispatch result
pub type FaultResult<T> = Result<T, Fault>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_exception_display() {
        let mut e = ScriptException::new("boom", "main.lua:4: ");
        assert_eq!(e.to_string(), "main.lua:4: boom");
        e.traceback = Some("stack traceback:".into());
        assert!(e.to_string().ends_with("\nstack traceback:"));
        assert!(!e.is_host_exception());
    }

    #[test]
    fn test_host_exception_detection() {
        let mut e = ScriptException::new("x", "");
        e.inner = Some(HostError::exception("Io", "disk"));
        assert!(e.is_host_exception());
        e.inner = Some(HostError::ArgumentError("bad".into()));
        assert!(!e.is_host_exception());
    }

    #[test]
    fn test_static_message_wording() {
        let e = BridgeError::StaticThroughInstance { method: "Parse".into() };
        assert_eq!(e.to_string(), "Can't pass instance to static method Parse");
    }
}
