//! Host static types
//!
//! A `HostType` is created as a shell (name, kind, identity) and later
//! completed with its definition (base, interfaces, members) exactly once.
//! That lets a type mention itself in its own member signatures.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};

use crate::members::{EventInfo, FieldInfo, MethodInfo, PropertyInfo};

/// Shared reference to a host type
pub type TypeRef = Arc<HostType>;

/// Unique identity of a host type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostTypeId(u64);

impl HostTypeId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        HostTypeId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Primitive value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `bool`
    Bool,
    /// `char`
    Char,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
}

impl Primitive {
    /// Whether the primitive holds numbers (chars count as numeric)
    pub fn is_numeric(self) -> bool {
        !matches!(self, Primitive::Bool)
    }

    /// Whether the primitive only holds whole numbers
    pub fn is_integral(self) -> bool {
        !matches!(self, Primitive::Bool | Primitive::F32 | Primitive::F64)
    }

    /// Type name
    pub const fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "Boolean",
            Primitive::Char => "Char",
            Primitive::I8 => "SByte",
            Primitive::I16 => "Int16",
            Primitive::I32 => "Int32",
            Primitive::I64 => "Int64",
            Primitive::U8 => "Byte",
            Primitive::U16 => "UInt16",
            Primitive::U32 => "UInt32",
            Primitive::U64 => "UInt64",
            Primitive::F32 => "Single",
            Primitive::F64 => "Double",
        }
    }
}

/// Kind of a host type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// No value
    Void,
    /// Root reference type, assignable from everything
    Object,
    /// Primitive value type
    Primitive(Primitive),
    /// Immutable string
    String,
    /// Reference type with identity
    Class,
    /// Value type, copied at every crossing
    Struct,
    /// Named integral constants
    Enum,
    /// Abstract contract
    Interface,
    /// Callable signature
    Delegate,
    /// Array of an element type
    Array,
    /// Value type or null
    Nullable,
    /// Unbound generic parameter
    GenericParam,
    /// Host-side handle to a script table
    ScriptTable,
    /// Host-side handle to a script function
    ScriptFunction,
    /// Host-side handle to script userdata
    ScriptUserData,
    /// Host-side handle to a script thread
    ScriptThread,
    /// A type used as a value
    TypeObject,
}

/// Members declared directly on a type
#[derive(Default)]
pub struct TypeMembers {
    /// Methods in declaration order
    pub methods: Vec<Arc<MethodInfo>>,
    /// Constructors in declaration order
    pub constructors: Vec<Arc<MethodInfo>>,
    /// Fields
    pub fields: Vec<Arc<FieldInfo>>,
    /// Properties
    pub properties: Vec<Arc<PropertyInfo>>,
    /// Events
    pub events: Vec<Arc<EventInfo>>,
    /// Nested types
    pub nested: Vec<TypeRef>,
}

/// Everything a type learns when it is completed
#[derive(Default)]
pub struct TypeDef {
    /// Base class
    pub base: Option<TypeRef>,
    /// Directly implemented interfaces
    pub interfaces: Vec<TypeRef>,
    /// Cannot be derived from
    pub sealed: bool,
    /// Cannot be instantiated directly
    pub is_abstract: bool,
    /// Enum constants
    pub variants: Vec<(String, i64)>,
    /// Declared members
    pub members: TypeMembers,
}

/// A host static type
pub struct HostType {
    id: HostTypeId,
    full_name: String,
    kind: TypeKind,
    element: Option<TypeRef>,
    def: OnceCell<TypeDef>,
}

static EMPTY_DEF: Lazy<TypeDef> = Lazy::new(TypeDef::default);

impl HostType {
    /// Create an incomplete type shell
    pub fn shell(full_name: impl Into<String>, kind: TypeKind) -> TypeRef {
        Arc::new(HostType {
            id: HostTypeId::next(),
            full_name: full_name.into(),
            kind,
            element: None,
            def: OnceCell::new(),
        })
    }

    fn with_element(full_name: String, kind: TypeKind, element: TypeRef) -> TypeRef {
        Arc::new(HostType {
            id: HostTypeId::next(),
            full_name,
            kind,
            element: Some(element),
            def: OnceCell::new(),
        })
    }

    /// Complete the type. Returns false if it was already completed.
    pub fn define(&self, def: TypeDef) -> bool {
        self.def.set(def).is_ok()
    }

    fn def(&self) -> &TypeDef {
        self.def.get().unwrap_or(&EMPTY_DEF)
    }

    /// Type identity
    pub fn id(&self) -> HostTypeId {
        self.id
    }

    /// Namespace-qualified name
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Name without namespace
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once('.')
            .map(|(_, n)| n)
            .unwrap_or(&self.full_name)
    }

    /// Type kind
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Element type of arrays and nullables
    pub fn element(&self) -> Option<&TypeRef> {
        self.element.as_ref()
    }

    /// Base class
    pub fn base(&self) -> Option<&TypeRef> {
        self.def().base.as_ref()
    }

    /// Directly implemented interfaces
    pub fn interfaces(&self) -> &[TypeRef] {
        &self.def().interfaces
    }

    /// Declared members
    pub fn members(&self) -> &TypeMembers {
        &self.def().members
    }

    /// Enum constants
    pub fn variants(&self) -> &[(String, i64)] {
        &self.def().variants
    }

    /// Cannot be derived from
    pub fn is_sealed(&self) -> bool {
        self.def().sealed
    }

    /// Cannot be instantiated directly
    pub fn is_abstract(&self) -> bool {
        self.def().is_abstract || self.kind == TypeKind::Interface
    }

    /// Primitive kind, if any
    pub fn primitive(&self) -> Option<Primitive> {
        match self.kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Values of this type are copied rather than shared
    pub fn is_value_type(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Primitive(_) | TypeKind::Struct | TypeKind::Enum
        )
    }

    /// Null is a valid value of this type
    pub fn accepts_null(&self) -> bool {
        !self.is_value_type() && self.kind != TypeKind::Void
    }

    /// Signature of a delegate type
    pub fn delegate_signature(&self) -> Option<&Arc<MethodInfo>> {
        if self.kind != TypeKind::Delegate {
            return None;
        }
        self.members().methods.iter().find(|m| m.name == "Invoke")
    }

    /// Enum constant value by name
    pub fn variant_value(&self, name: &str) -> Option<i64> {
        self.variants()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Enum constant name by value
    pub fn variant_name(&self, value: i64) -> Option<&str> {
        self.variants()
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }

    /// Base chain starting with this type
    pub fn ancestry(self: &Arc<Self>) -> Vec<TypeRef> {
        let mut chain = vec![self.clone()];
        let mut current = self.base().cloned();
        while let Some(t) = current {
            current = t.base().cloned();
            chain.push(t);
        }
        chain
    }

    /// Whether `other` derives from or implements this type
    pub fn is_subtype(&self, other: &HostType) -> bool {
        if self.id == other.id {
            return true;
        }
        if other.interfaces().iter().any(|i| self.is_subtype(i)) {
            return true;
        }
        other.base().map(|b| self.is_subtype(b)).unwrap_or(false)
    }

    /// Whether a value of type `other` can be stored in a slot of this type
    pub fn is_assignable_from(&self, other: &HostType) -> bool {
        if other.kind == TypeKind::Void || self.kind == TypeKind::Void {
            return false;
        }
        if self.id == other.id {
            return true;
        }
        match self.kind {
            TypeKind::Object => true,
            TypeKind::Nullable => self
                .element
                .as_ref()
                .map(|e| e.is_assignable_from(other))
                .unwrap_or(false),
            TypeKind::Array => match (&self.element, &other.element, other.kind) {
                (Some(mine), Some(theirs), TypeKind::Array) => {
                    mine.id == theirs.id || (!theirs.is_value_type() && mine.is_assignable_from(theirs))
                }
                _ => false,
            },
            TypeKind::Class | TypeKind::Interface => self.is_subtype(other),
            _ => false,
        }
    }
}

impl PartialEq for HostType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HostType {}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostType({})", self.full_name)
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

// ============================================================================
// Built-in types
// ============================================================================

macro_rules! builtin {
    ($(#[$doc:meta] $fn_name:ident => $static_name:ident, $full:expr, $kind:expr;)*) => {
        $(
            static $static_name: Lazy<TypeRef> = Lazy::new(|| HostType::shell($full, $kind));

            #[$doc]
            pub fn $fn_name() -> TypeRef {
                $static_name.clone()
            }
        )*
    };
}

builtin! {
    /// `void`
    void => VOID, "System.Void", TypeKind::Void;
    /// Root object type
    object => OBJECT, "System.Object", TypeKind::Object;
    /// String
    string => STRING, "System.String", TypeKind::String;
    /// Boolean
    boolean => BOOL, "System.Boolean", TypeKind::Primitive(Primitive::Bool);
    /// Char
    char => CHAR, "System.Char", TypeKind::Primitive(Primitive::Char);
    /// i8
    i8 => I8, "System.SByte", TypeKind::Primitive(Primitive::I8);
    /// i16
    i16 => I16, "System.Int16", TypeKind::Primitive(Primitive::I16);
    /// i32
    i32 => I32, "System.Int32", TypeKind::Primitive(Primitive::I32);
    /// i64
    i64 => I64, "System.Int64", TypeKind::Primitive(Primitive::I64);
    /// u8
    u8 => U8, "System.Byte", TypeKind::Primitive(Primitive::U8);
    /// u16
    u16 => U16, "System.UInt16", TypeKind::Primitive(Primitive::U16);
    /// u32
    u32 => U32, "System.UInt32", TypeKind::Primitive(Primitive::U32);
    /// u64
    u64 => U64, "System.UInt64", TypeKind::Primitive(Primitive::U64);
    /// f32
    f32 => F32, "System.Single", TypeKind::Primitive(Primitive::F32);
    /// f64
    f64 => F64, "System.Double", TypeKind::Primitive(Primitive::F64);
    /// Handle to a script table
    script_table => SCRIPT_TABLE, "Tether.ScriptTable", TypeKind::ScriptTable;
    /// Handle to a script function
    script_function => SCRIPT_FUNCTION, "Tether.ScriptFunction", TypeKind::ScriptFunction;
    /// Handle to script userdata
    script_userdata => SCRIPT_USERDATA, "Tether.ScriptUserData", TypeKind::ScriptUserData;
    /// Handle to a script thread
    script_thread => SCRIPT_THREAD, "Tether.ScriptThread", TypeKind::ScriptThread;
    /// A type as a value
    type_object => TYPE_OBJECT, "System.Type", TypeKind::TypeObject;
}

/// Type singleton for a primitive
pub fn primitive(p: Primitive) -> TypeRef {
    match p {
        Primitive::Bool => boolean(),
        Primitive::Char => char(),
        Primitive::I8 => i8(),
        Primitive::I16 => i16(),
        Primitive::I32 => i32(),
        Primitive::I64 => i64(),
        Primitive::U8 => u8(),
        Primitive::U16 => u16(),
        Primitive::U32 => u32(),
        Primitive::U64 => u64(),
        Primitive::F32 => f32(),
        Primitive::F64 => f64(),
    }
}

static ARRAY_TYPES: Lazy<DashMap<HostTypeId, TypeRef>> = Lazy::new(DashMap::new);
static NULLABLE_TYPES: Lazy<DashMap<HostTypeId, TypeRef>> = Lazy::new(DashMap::new);

/// The array type of `element`; one instance per element type
pub fn array_of(element: &TypeRef) -> TypeRef {
    ARRAY_TYPES
        .entry(element.id())
        .or_insert_with(|| {
            let ty = HostType::with_element(
                format!("{}[]", element.full_name()),
                TypeKind::Array,
                element.clone(),
            );
            crate::builder::define_array_members(&ty);
            ty
        })
        .clone()
}

/// The nullable type of a value type `element`
pub fn nullable(element: &TypeRef) -> TypeRef {
    NULLABLE_TYPES
        .entry(element.id())
        .or_insert_with(|| {
            HostType::with_element(
                format!("{}?", element.full_name()),
                TypeKind::Nullable,
                element.clone(),
            )
        })
        .clone()
}

/// A fresh unbound generic parameter
pub fn generic_param(name: &str) -> TypeRef {
    HostType::shell(name, TypeKind::GenericParam)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TypeBuilder;

    #[test]
    fn test_builtin_singletons_are_stable() {
        assert_eq!(i32().id(), i32().id());
        assert_ne!(i32().id(), i64().id());
        assert_eq!(string().name(), "String");
    }

    #[test]
    fn test_class_hierarchy_assignability() {
        let shape = TypeBuilder::interface("Geo.IShape").build();
        let base = TypeBuilder::class("Geo.Base").implements(&shape).build();
        let derived = TypeBuilder::class("Geo.Derived").base(&base).build();
        assert!(shape.is_assignable_from(&derived));
        assert!(base.is_assignable_from(&derived));
        assert!(!derived.is_assignable_from(&base));
        assert!(object().is_assignable_from(&derived));
        assert!(object().is_assignable_from(&i32()));
    }

    #[test]
    fn test_array_types_are_cached_and_covariant() {
        let base = TypeBuilder::class("Geo.Node").build();
        let leaf = TypeBuilder::class("Geo.Leaf").base(&base).build();
        assert_eq!(array_of(&leaf).id(), array_of(&leaf).id());
        assert!(array_of(&base).is_assignable_from(&array_of(&leaf)));
        assert!(!array_of(&i64()).is_assignable_from(&array_of(&i32())));
    }

    #[test]
    fn test_nullable_accepts_element() {
        let n = nullable(&i32());
        assert!(n.is_assignable_from(&i32()));
        assert!(n.accepts_null());
        assert!(!i32().accepts_null());
    }
}
