//! Host values
//!
//! `HostValue` is what host member bodies consume and produce. Reference
//! values (objects, arrays) are shared handles; identity is the address of
//! the shared allocation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tether_script::ScriptState;

use crate::error::{HostError, HostResult};
use crate::members::{Invocation, MethodBody};
use crate::script_ref::{ScriptRef, ScriptRefKind};
use crate::types::{self, TypeKind, TypeRef};

/// Instance of a class, struct or delegate type
#[derive(Clone)]
pub struct HostObject {
    payload: Arc<dyn Any + Send + Sync>,
    ty: TypeRef,
}

impl HostObject {
    /// Wrap a payload as an instance of `ty`
    pub fn new<T: Any + Send + Sync>(payload: T, ty: &TypeRef) -> Self {
        Self {
            payload: Arc::new(payload),
            ty: ty.clone(),
        }
    }

    /// Wrap an already shared payload
    pub fn from_arc(payload: Arc<dyn Any + Send + Sync>, ty: &TypeRef) -> Self {
        Self {
            payload,
            ty: ty.clone(),
        }
    }

    /// Runtime type
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    /// Borrow the payload as `T`
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Address identifying this instance
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.payload) as *const () as usize
    }

    /// Same instance
    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        self.identity() == other.identity()
    }

    /// Call a method by name on the runtime type, picking the first overload
    /// in the base chain with a matching parameter count
    pub fn call(
        &self,
        state: &mut ScriptState,
        name: &str,
        args: Vec<HostValue>,
    ) -> HostResult<HostValue> {
        if let Some(delegate) = self.downcast::<Delegate>() {
            if name == "Invoke" {
                return delegate.invoke(state, args);
            }
        }
        let method = self
            .ty
            .ancestry()
            .into_iter()
            .flat_map(|t| t.members().methods.clone())
            .find(|m| m.name == name && !m.is_static && m.params.len() == args.len())
            .ok_or_else(|| {
                HostError::exception(
                    "System.MissingMethodException",
                    format!("{} has no method {}", self.ty.full_name(), name),
                )
            })?;
        Ok(method
            .invoke(state, Some(HostValue::Object(self.clone())), args)?
            .ret)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.ty.full_name(), self.identity())
    }
}

/// Shared mutable array
#[derive(Clone)]
pub struct HostArray {
    element: TypeRef,
    items: Arc<RwLock<Vec<HostValue>>>,
}

impl HostArray {
    /// Create an array of `element` values
    pub fn new(element: &TypeRef, items: Vec<HostValue>) -> Self {
        Self {
            element: element.clone(),
            items: Arc::new(RwLock::new(items)),
        }
    }

    /// Element type
    pub fn element(&self) -> &TypeRef {
        &self.element
    }

    /// Array type
    pub fn ty(&self) -> TypeRef {
        types::array_of(&self.element)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<HostValue> {
        self.items.read().get(index).cloned()
    }

    /// Replace the element at `index`
    pub fn set(&self, index: usize, value: HostValue) -> HostResult<()> {
        let mut items = self.items.write();
        let len = items.len();
        let slot = items.get_mut(index).ok_or_else(|| {
            HostError::exception(
                "System.IndexOutOfRangeException",
                format!("index {} outside array of length {}", index, len),
            )
        })?;
        *slot = value;
        Ok(())
    }

    /// Copy of all elements
    pub fn to_vec(&self) -> Vec<HostValue> {
        self.items.read().clone()
    }

    /// Address identifying this array
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.items) as *const () as usize
    }
}

impl fmt::Debug for HostArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.read().iter()).finish()
    }
}

/// Enum constant
#[derive(Clone)]
pub struct EnumValue {
    /// Enum type
    pub ty: TypeRef,
    /// Underlying value
    pub value: i64,
}

impl EnumValue {
    /// Constant name, or the number when it has none
    pub fn label(&self) -> String {
        self.ty
            .variant_name(self.value)
            .map(str::to_string)
            .unwrap_or_else(|| self.value.to_string())
    }
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        self.ty.id() == other.ty.id() && self.value == other.value
    }
}

impl fmt::Debug for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.ty.full_name(), self.label())
    }
}

/// Payload of delegate instances
pub struct Delegate {
    body: MethodBody,
    origin: Option<ScriptRef>,
}

impl Delegate {
    /// A delegate backed by host code
    pub fn new(
        body: impl Fn(&mut Invocation<'_>) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            body: Arc::new(body),
            origin: None,
        }
    }

    /// A delegate that forwards to a script function
    pub fn forwarding(body: MethodBody, origin: ScriptRef) -> Self {
        Self {
            body,
            origin: Some(origin),
        }
    }

    /// The script function this delegate forwards to
    pub fn origin(&self) -> Option<&ScriptRef> {
        self.origin.as_ref()
    }

    /// Run the delegate
    pub fn invoke(&self, state: &mut ScriptState, args: Vec<HostValue>) -> HostResult<HostValue> {
        let mut inv = Invocation::new(state, None, args);
        (self.body)(&mut inv)
    }

    /// Run the delegate, keeping the (possibly rewritten) arguments
    pub fn invoke_with(&self, inv: &mut Invocation<'_>) -> HostResult<HostValue> {
        (self.body)(inv)
    }
}

/// A host value
#[derive(Clone, Default)]
pub enum HostValue {
    /// Null reference or absent value
    #[default]
    Null,
    /// bool
    Bool(bool),
    /// char
    Char(char),
    /// i8
    I8(i8),
    /// i16
    I16(i16),
    /// i32
    I32(i32),
    /// i64
    I64(i64),
    /// u8
    U8(u8),
    /// u16
    U16(u16),
    /// u32
    U32(u32),
    /// u64
    U64(u64),
    /// f32
    F32(f32),
    /// f64
    F64(f64),
    /// String
    Str(Arc<str>),
    /// Enum constant
    Enum(EnumValue),
    /// Class, struct or delegate instance
    Object(HostObject),
    /// Array
    Array(HostArray),
    /// A type used as a value
    Type(TypeRef),
    /// Handle to a script value
    Script(ScriptRef),
}

impl HostValue {
    /// Runtime type; `None` for null
    pub fn runtime_type(&self) -> Option<TypeRef> {
        Some(match self {
            HostValue::Null => return None,
            HostValue::Bool(_) => types::boolean(),
            HostValue::Char(_) => types::char(),
            HostValue::I8(_) => types::i8(),
            HostValue::I16(_) => types::i16(),
            HostValue::I32(_) => types::i32(),
            HostValue::I64(_) => types::i64(),
            HostValue::U8(_) => types::u8(),
            HostValue::U16(_) => types::u16(),
            HostValue::U32(_) => types::u32(),
            HostValue::U64(_) => types::u64(),
            HostValue::F32(_) => types::f32(),
            HostValue::F64(_) => types::f64(),
            HostValue::Str(_) => types::string(),
            HostValue::Enum(e) => e.ty.clone(),
            HostValue::Object(o) => o.ty().clone(),
            HostValue::Array(a) => a.ty(),
            HostValue::Type(_) => types::type_object(),
            HostValue::Script(r) => match r.kind() {
                ScriptRefKind::Table => types::script_table(),
                ScriptRefKind::Function => types::script_function(),
                ScriptRefKind::UserData => types::script_userdata(),
                ScriptRefKind::Thread => types::script_thread(),
            },
        })
    }

    /// Name of the runtime type, `"null"` for null
    pub fn type_name(&self) -> String {
        self.runtime_type()
            .map(|t| t.full_name().to_string())
            .unwrap_or_else(|| "null".to_string())
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// Whole-number view of integral values, chars and enums
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostValue::Char(c) => Some(*c as i64),
            HostValue::I8(v) => Some(*v as i64),
            HostValue::I16(v) => Some(*v as i64),
            HostValue::I32(v) => Some(*v as i64),
            HostValue::I64(v) => Some(*v),
            HostValue::U8(v) => Some(*v as i64),
            HostValue::U16(v) => Some(*v as i64),
            HostValue::U32(v) => Some(*v as i64),
            HostValue::U64(v) => i64::try_from(*v).ok(),
            HostValue::Enum(e) => Some(e.value),
            _ => None,
        }
    }

    /// Numeric view of any number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::F32(v) => Some(*v as f64),
            HostValue::F64(v) => Some(*v),
            HostValue::U64(v) => Some(*v as f64),
            other => other.as_i64().map(|i| i as f64),
        }
    }

    /// String contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Object instance
    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Array instance
    pub fn as_array(&self) -> Option<&HostArray> {
        match self {
            HostValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Script handle
    pub fn as_script(&self) -> Option<&ScriptRef> {
        match self {
            HostValue::Script(r) => Some(r),
            _ => None,
        }
    }

    /// Same value: identity for references, equality for everything else
    pub fn same(&self, other: &HostValue) -> bool {
        match (self, other) {
            (HostValue::Null, HostValue::Null) => true,
            (HostValue::Object(a), HostValue::Object(b)) => a.ptr_eq(b),
            (HostValue::Array(a), HostValue::Array(b)) => a.identity() == b.identity(),
            (HostValue::Type(a), HostValue::Type(b)) => a.id() == b.id(),
            (HostValue::Enum(a), HostValue::Enum(b)) => a == b,
            (HostValue::Str(a), HostValue::Str(b)) => a == b,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Script(a), HostValue::Script(b)) => a.same_slot(b),
            (HostValue::F32(_) | HostValue::F64(_), _) | (_, HostValue::F32(_) | HostValue::F64(_)) => {
                self.as_f64().is_some() && self.as_f64() == other.as_f64()
            }
            _ => self.as_i64().is_some() && self.as_i64() == other.as_i64(),
        }
    }

    /// Whether the value can be stored in a slot of type `ty`
    pub fn is_instance_of(&self, ty: &TypeRef) -> bool {
        match self.runtime_type() {
            None => ty.accepts_null(),
            Some(rt) => ty.is_assignable_from(&rt) || (ty.kind() == TypeKind::Object),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => write!(f, "null"),
            HostValue::Bool(v) => write!(f, "{}", v),
            HostValue::Char(v) => write!(f, "{:?}", v),
            HostValue::I8(v) => write!(f, "{}i8", v),
            HostValue::I16(v) => write!(f, "{}i16", v),
            HostValue::I32(v) => write!(f, "{}i32", v),
            HostValue::I64(v) => write!(f, "{}i64", v),
            HostValue::U8(v) => write!(f, "{}u8", v),
            HostValue::U16(v) => write!(f, "{}u16", v),
            HostValue::U32(v) => write!(f, "{}u32", v),
            HostValue::U64(v) => write!(f, "{}u64", v),
            HostValue::F32(v) => write!(f, "{}f32", v),
            HostValue::F64(v) => write!(f, "{}f64", v),
            HostValue::Str(s) => write!(f, "{:?}", s),
            HostValue::Enum(e) => write!(f, "{:?}", e),
            HostValue::Object(o) => write!(f, "{:?}", o),
            HostValue::Array(a) => write!(f, "{:?}", a),
            HostValue::Type(t) => write!(f, "typeof({})", t.full_name()),
            HostValue::Script(r) => write!(f, "{:?}", r),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => f.write_str(""),
            HostValue::Bool(v) => write!(f, "{}", if *v { "True" } else { "False" }),
            HostValue::Char(v) => write!(f, "{}", v),
            HostValue::F32(v) => write!(f, "{}", v),
            HostValue::F64(v) => write!(f, "{}", v),
            HostValue::Str(s) => f.write_str(s),
            HostValue::Enum(e) => f.write_str(&e.label()),
            HostValue::Object(o) => f.write_str(o.ty().full_name()),
            HostValue::Array(a) => f.write_str(a.ty().full_name()),
            HostValue::Type(t) => f.write_str(t.full_name()),
            HostValue::Script(r) => write!(f, "{:?}", r),
            other => match other.as_i64() {
                Some(i) => write!(f, "{}", i),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

macro_rules! host_value_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for HostValue {
                fn from(v: $t) -> Self {
                    HostValue::$variant(v)
                }
            }
        )*
    };
}

host_value_from! {
    bool => Bool,
    char => Char,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    HostObject => Object,
    HostArray => Array,
    EnumValue => Enum,
    TypeRef => Type,
    ScriptRef => Script,
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(Arc::from(s))
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::Str(Arc::from(s))
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(HostValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TypeBuilder;

    #[test]
    fn test_numeric_views() {
        assert_eq!(HostValue::U8(7).as_i64(), Some(7));
        assert_eq!(HostValue::Char('A').as_i64(), Some(65));
        assert_eq!(HostValue::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(HostValue::U64(u64::MAX).as_i64(), None);
        assert!(HostValue::I32(3).same(&HostValue::I64(3)));
    }

    #[test]
    fn test_object_identity() {
        let ty = TypeBuilder::class("T.Box").build();
        let a = HostObject::new(1u32, &ty);
        let b = HostObject::new(1u32, &ty);
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
        assert_eq!(a.downcast::<u32>(), Some(&1));
    }

    #[test]
    fn test_enum_label_and_equality() {
        let color = TypeBuilder::enumeration("T.Color")
            .variant("Red", 0)
            .variant("Green", 1)
            .build();
        let g = EnumValue { ty: color.clone(), value: 1 };
        assert_eq!(g.label(), "Green");
        assert!(HostValue::Enum(g.clone()).same(&HostValue::Enum(EnumValue { ty: color, value: 1 })));
    }

    #[test]
    fn test_null_instance_rules() {
        assert!(HostValue::Null.is_instance_of(&types::string()));
        assert!(!HostValue::Null.is_instance_of(&types::i32()));
        assert!(HostValue::I32(1).is_instance_of(&types::object()));
    }
}
