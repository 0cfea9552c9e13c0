//! Tether core - the script/host marshaling engine
//!
//! This crate connects a `tether-script` interpreter to host types described
//! with `tether-sdk`:
//! - Host objects cross into scripts as userdata wrappers holding registry
//!   handles (`registry`), one wrapper per live object
//! - Member lookups are reflected once per type and name (`cache`)
//! - Script values convert to typed parameters (`coercion`) and overloads
//!   are matched in declaration order (`resolver`)
//! - Wrapper metatables route indexing, calls, operators and finalization
//!   back into the engine (`dispatch`)
//! - Script tables and functions implement host interfaces, subclass host
//!   classes and back delegates (`adapter`)
//!
//! `Bridge` is the entry point for host applications.
//!
//! # Example
//!
//! ```ignore
//! use tether_core::{Bridge, BridgeOptions};
//!
//! let mut bridge = Bridge::with_options(BridgeOptions::default().with_traceback(true))?;
//! bridge.register_type(&point_type)?;
//! let results = bridge.call_function("update", &[HostValue::I32(1)])?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod adapter;
pub mod bridge;
pub mod builtin;
pub mod cache;
pub mod coercion;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod globals;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod translator;

pub use adapter::{AdapterDescriptor, AdapterGenerator};
pub use bridge::Bridge;
pub use cache::{CachedMember, MemberCache, MethodThunk, ThunkBinding};
pub use config::BridgeOptions;
pub use error::{BridgeError, BridgeResult, Fault, FaultResult, ScriptException};
pub use logging::init_logging;
pub use pool::{pool, TranslatorPool};
pub use registry::{HandleKind, ObjectHandle, ObjectRegistry};
pub use translator::{Translator, WrapperKind};
