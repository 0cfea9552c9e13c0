//! Tether script runtime
//!
//! The embedded interpreter half of the bridge. This crate provides:
//! - A stack-indexed value API (`ScriptState`) in the style of classic
//!   embeddable interpreters (1-based and negative indices)
//! - Tables with metatables, weak-valued tables and raw access
//! - Native closures, protected calls and error raising with call-site location
//! - A registry for pinning values across calls
//! - Userdata with deferred `__gc` finalization
//! - Coroutine stacks (`xmove`) and a call/return/line debug hook
//!
//! There is no compiler: script functions are closures written against the
//! stack API, optionally tagged with a chunk name so frames report locations.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod gc;
pub mod state;
pub mod table;
pub mod value;

pub use gc::GcStats;
pub use state::{
    ArithOp, CompareOp, Hook, HookEvent, HookMask, RegistryKey, ScriptState, StateId,
    MAX_CALL_DEPTH,
};
pub use value::{FunctionRef, ScriptType, TableRef, ThreadRef, UserDataRef, Value};

/// Script execution errors.
///
/// A raised error carries the script value that was thrown; protected calls
/// push that value back onto the stack.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScriptError {
    /// An error value raised by script or native code
    #[error("{}", describe_error(.0))]
    Runtime(Value),

    /// Call depth exceeded
    #[error("stack overflow")]
    StackOverflow,
}

impl ScriptError {
    /// Raise a plain string message
    pub fn message(msg: impl Into<String>) -> Self {
        ScriptError::Runtime(Value::from(msg.into()))
    }

    /// The value a protected call pushes for this error
    pub fn value(&self) -> Value {
        match self {
            ScriptError::Runtime(v) => v.clone(),
            ScriptError::StackOverflow => Value::from("stack overflow"),
        }
    }
}

fn describe_error(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Integer(_) | Value::Number(_) => value.to_string(),
        other => format!("(error object is a {} value)", other.type_name()),
    }
}

/// Script execution result
pub type ScriptResult<T> = Result<T, ScriptError>;
