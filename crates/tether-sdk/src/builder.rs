//! Type builder
//!
//! Creates the type shell up front so member signatures can refer to the
//! type being built (`builder.ty()`), then completes it in `build()`.
//!
//! ```ignore
//! let counter = TypeBuilder::class("Demo.Counter");
//! let this_ty = counter.ty();
//! let counter = counter
//!     .constructor(MethodInfo::constructor(&this_ty).body(|_| todo!()))
//!     .method(MethodInfo::new("Next", &types::i64()).body(|inv| todo!()))
//!     .build();
//! ```

use std::sync::Arc;

use crate::error::HostError;
use crate::members::{EventInfo, FieldInfo, MethodInfo, PropertyInfo};
use crate::types::{self, HostType, TypeDef, TypeKind, TypeRef};
use crate::value::HostValue;

/// Builder for classes, structs, interfaces, enums and delegates
pub struct TypeBuilder {
    ty: TypeRef,
    def: TypeDef,
}

impl TypeBuilder {
    fn with_kind(full_name: &str, kind: TypeKind) -> Self {
        Self {
            ty: HostType::shell(full_name, kind),
            def: TypeDef::default(),
        }
    }

    /// A reference type
    pub fn class(full_name: &str) -> Self {
        Self::with_kind(full_name, TypeKind::Class)
    }

    /// A value type
    pub fn structure(full_name: &str) -> Self {
        Self::with_kind(full_name, TypeKind::Struct)
    }

    /// An interface
    pub fn interface(full_name: &str) -> Self {
        Self::with_kind(full_name, TypeKind::Interface)
    }

    /// An enum
    pub fn enumeration(full_name: &str) -> Self {
        let mut b = Self::with_kind(full_name, TypeKind::Enum);
        b.def.sealed = true;
        b
    }

    /// A delegate type with the given `Invoke` signature
    pub fn delegate(full_name: &str, mut signature: MethodInfo) -> Self {
        let mut b = Self::with_kind(full_name, TypeKind::Delegate);
        signature.name = "Invoke".to_string();
        signature.is_static = false;
        signature.body = None;
        b.def.sealed = true;
        b.def.members.methods.push(Arc::new(signature));
        b
    }

    /// The type being built
    pub fn ty(&self) -> TypeRef {
        self.ty.clone()
    }

    /// Set the base class
    pub fn base(mut self, base: &TypeRef) -> Self {
        self.def.base = Some(base.clone());
        self
    }

    /// Implement an interface
    pub fn implements(mut self, iface: &TypeRef) -> Self {
        self.def.interfaces.push(iface.clone());
        self
    }

    /// Forbid derivation
    pub fn sealed(mut self) -> Self {
        self.def.sealed = true;
        self
    }

    /// Forbid direct instantiation
    pub fn abstract_(mut self) -> Self {
        self.def.is_abstract = true;
        self
    }

    /// Add a method
    pub fn method(mut self, m: MethodInfo) -> Self {
        self.def.members.methods.push(Arc::new(m));
        self
    }

    /// Add a constructor
    pub fn constructor(mut self, mut c: MethodInfo) -> Self {
        c.is_static = true;
        self.def.members.constructors.push(Arc::new(c));
        self
    }

    /// Add a field
    pub fn field(mut self, f: FieldInfo) -> Self {
        self.def.members.fields.push(Arc::new(f));
        self
    }

    /// Add a property
    pub fn property(mut self, p: PropertyInfo) -> Self {
        self.def.members.properties.push(Arc::new(p));
        self
    }

    /// Add an event
    pub fn event(mut self, e: EventInfo) -> Self {
        self.def.members.events.push(Arc::new(e));
        self
    }

    /// Add a nested type
    pub fn nested(mut self, t: &TypeRef) -> Self {
        self.def.members.nested.push(t.clone());
        self
    }

    /// Add an enum constant
    pub fn variant(mut self, name: &str, value: i64) -> Self {
        self.def.variants.push((name.to_string(), value));
        self
    }

    /// Complete the type
    pub fn build(self) -> TypeRef {
        self.ty.define(self.def);
        self.ty
    }
}

/// Members every array type exposes
pub(crate) fn define_array_members(ty: &TypeRef) {
    let mut def = TypeDef {
        base: None,
        sealed: true,
        ..TypeDef::default()
    };
    def.members.properties.push(Arc::new(
        PropertyInfo::new("Length", &types::i32()).getter(|inv| match &inv.this {
            Some(HostValue::Array(a)) => Ok(HostValue::I32(a.len() as i32)),
            _ => Err(HostError::ArgumentError("missing array receiver".into())),
        }),
    ));
    ty.define(def);
}
