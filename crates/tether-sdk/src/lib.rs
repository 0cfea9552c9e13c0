//! Tether SDK - host reflection model
//!
//! This crate describes the statically typed side of the bridge:
//! - Types (`HostType`) built with `TypeBuilder`, including interfaces,
//!   enums, delegates, arrays and nullables
//! - Members with closures as bodies, parameter modes (in/ref/out), defaults
//!   and params arrays, plus script-facing tags (hidden, renamed, non-public)
//! - Values (`HostValue`), shared objects and arrays, delegates and events
//! - `ScriptRef` handles that keep script values pinned from host code
//! - A `TypeCatalog` of named types and extension methods
//!
//! # Example
//!
//! ```ignore
//! use tether_sdk::{types, HostValue, MethodInfo, ParamInfo, TypeBuilder};
//!
//! let math = TypeBuilder::class("Demo.Math")
//!     .method(
//!         MethodInfo::new("add", &types::i32())
//!             .param(ParamInfo::new("a", &types::i32()))
//!             .param(ParamInfo::new("b", &types::i32()))
//!             .as_static()
//!             .body(|inv| Ok(HostValue::I32((inv.arg_i64(0)? + inv.arg_i64(1)?) as i32))),
//!     )
//!     .build();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod builder;
pub mod catalog;
pub mod error;
pub mod event;
pub mod members;
pub mod script_ref;
pub mod types;
pub mod value;

pub use builder::TypeBuilder;
pub use catalog::TypeCatalog;
pub use error::{HostError, HostException, HostResult};
pub use event::HostEvent;
pub use members::{
    Binding, EventInfo, FieldInfo, Invocation, Invoked, MemberAttrs, MemberQuery, MethodBody,
    MethodInfo, ParamInfo, ParamMode, PropertyInfo, Visibility,
};
pub use script_ref::{ReleaseQueue, ScriptRef, ScriptRefKind};
pub use types::{HostType, HostTypeId, Primitive, TypeKind, TypeRef};
pub use value::{Delegate, EnumValue, HostArray, HostObject, HostValue};
