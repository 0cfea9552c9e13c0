//! Script value representation
//!
//! Values are reference counted on the script side. Tables, functions,
//! userdata and threads compare by identity; numbers and strings compare by
//! content. Integers and floats are both of script type `number`.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::gc::{FinalizerQueue, PendingFinalizer};
use crate::state::ScriptState;
use crate::table::Table;
use crate::ScriptResult;

/// Dynamic type tag of a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    /// Invalid (out of range) stack index
    None,
    /// `nil`
    Nil,
    /// `true` / `false`
    Boolean,
    /// Raw address, no metatable
    LightUserData,
    /// Integer or float
    Number,
    /// Immutable string
    String,
    /// Associative table
    Table,
    /// Callable closure
    Function,
    /// Opaque payload with a metatable
    UserData,
    /// Coroutine stack
    Thread,
}

impl ScriptType {
    /// Name as reported in error messages
    pub const fn name(self) -> &'static str {
        match self {
            ScriptType::None => "no value",
            ScriptType::Nil => "nil",
            ScriptType::Boolean => "boolean",
            ScriptType::LightUserData => "userdata",
            ScriptType::Number => "number",
            ScriptType::String => "string",
            ScriptType::Table => "table",
            ScriptType::Function => "function",
            ScriptType::UserData => "userdata",
            ScriptType::Thread => "thread",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Native closure signature.
///
/// Arguments sit at stack indices `1..=top()`; the closure pushes its results
/// and returns how many of the topmost values are results.
pub type NativeFn = dyn Fn(&mut ScriptState) -> ScriptResult<usize>;

/// A callable closure
pub struct Function {
    pub(crate) name: Option<Rc<str>>,
    pub(crate) source: Option<Rc<str>>,
    pub(crate) body: Box<NativeFn>,
}

/// Shared handle to a function
#[derive(Clone)]
pub struct FunctionRef(pub(crate) Rc<Function>);

impl FunctionRef {
    /// Wrap a native closure
    pub fn new(body: impl Fn(&mut ScriptState) -> ScriptResult<usize> + 'static) -> Self {
        FunctionRef(Rc::new(Function {
            name: None,
            source: None,
            body: Box::new(body),
        }))
    }

    /// Wrap a closure that stands for script code loaded from `source`.
    ///
    /// Frames running such a function report `source:line:` locations.
    pub fn chunk(
        source: &str,
        body: impl Fn(&mut ScriptState) -> ScriptResult<usize> + 'static,
    ) -> Self {
        FunctionRef(Rc::new(Function {
            name: None,
            source: Some(Rc::from(source)),
            body: Box::new(body),
        }))
    }

    /// Attach a debug name
    pub fn named(name: &str, body: impl Fn(&mut ScriptState) -> ScriptResult<usize> + 'static) -> Self {
        FunctionRef(Rc::new(Function {
            name: Some(Rc::from(name)),
            source: None,
            body: Box::new(body),
        }))
    }

    /// Debug name, if any
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// Chunk name for script functions
    pub fn source(&self) -> Option<&str> {
        self.0.source.as_deref()
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Shared handle to a table
#[derive(Clone)]
pub struct TableRef(pub(crate) Rc<RefCell<Table>>);

impl TableRef {
    /// Create an empty table
    pub fn new() -> Self {
        TableRef(Rc::new(RefCell::new(Table::new())))
    }

    /// Raw read (no metamethods)
    pub fn raw_get(&self, key: &Value) -> Value {
        self.0.borrow().get(key)
    }

    /// Raw read by string key
    pub fn raw_get_str(&self, key: &str) -> Value {
        self.0.borrow().get(&Value::from(key))
    }

    /// Raw write (no metamethods). Returns false for a nil or NaN key.
    pub fn raw_set(&self, key: Value, value: Value) -> bool {
        self.0.borrow_mut().set(key, value)
    }

    /// Border of the array part
    pub fn raw_len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Snapshot of all live entries
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.0.borrow().pairs()
    }

    /// Attached metatable
    pub fn metatable(&self) -> Option<TableRef> {
        self.0.borrow().metatable.clone()
    }

    /// Replace the metatable; honors `__mode` containing `v`
    pub fn set_metatable(&self, mt: Option<TableRef>) {
        let weak = mt
            .as_ref()
            .map(|m| match m.raw_get_str("__mode") {
                Value::String(mode) => mode.contains('v'),
                _ => false,
            })
            .unwrap_or(false);
        let mut table = self.0.borrow_mut();
        table.metatable = mt;
        table.set_weak_values(weak);
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl Default for TableRef {
    fn default() -> Self {
        Self::new()
    }
}

/// Full userdata: an opaque payload plus a metatable
pub struct UserData {
    payload: RefCell<Option<Box<dyn Any>>>,
    metatable: RefCell<Option<TableRef>>,
    finalizers: Weak<FinalizerQueue>,
    finalized: Cell<bool>,
}

impl UserData {
    pub(crate) fn new(payload: Box<dyn Any>, finalizers: Weak<FinalizerQueue>) -> Self {
        Self {
            payload: RefCell::new(Some(payload)),
            metatable: RefCell::new(None),
            finalizers,
            finalized: Cell::new(false),
        }
    }

    pub(crate) fn resurrected(
        payload: Box<dyn Any>,
        metatable: TableRef,
        finalizers: Weak<FinalizerQueue>,
    ) -> Self {
        Self {
            payload: RefCell::new(Some(payload)),
            metatable: RefCell::new(Some(metatable)),
            finalizers,
            finalized: Cell::new(true),
        }
    }
}

impl Drop for UserData {
    fn drop(&mut self) {
        if self.finalized.get() {
            return;
        }
        let Some(queue) = self.finalizers.upgrade() else {
            return;
        };
        let metatable = self.metatable.get_mut().take();
        let payload = self.payload.get_mut().take();
        if let (Some(metatable), Some(payload)) = (metatable, payload) {
            queue.push(PendingFinalizer { payload, metatable });
        }
    }
}

/// Shared handle to userdata
#[derive(Clone)]
pub struct UserDataRef(pub(crate) Rc<UserData>);

impl UserDataRef {
    /// Attached metatable
    pub fn metatable(&self) -> Option<TableRef> {
        self.0.metatable.borrow().clone()
    }

    /// Replace the metatable
    pub fn set_metatable(&self, mt: Option<TableRef>) {
        *self.0.metatable.borrow_mut() = mt;
    }

    /// Borrow the payload as `T`
    pub fn with_payload<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let payload = self.0.payload.borrow();
        payload.as_ref()?.downcast_ref::<T>().map(f)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Frame record on a thread's call stack
#[derive(Clone)]
pub(crate) struct Frame {
    pub(crate) base: usize,
    pub(crate) function: Option<FunctionRef>,
    pub(crate) line: u32,
}

/// A coroutine stack
pub struct ThreadData {
    pub(crate) stack: RefCell<Vec<Value>>,
    pub(crate) frames: RefCell<Vec<Frame>>,
}

impl ThreadData {
    pub(crate) fn new() -> Self {
        Self {
            stack: RefCell::new(Vec::with_capacity(64)),
            frames: RefCell::new(vec![Frame {
                base: 0,
                function: None,
                line: 0,
            }]),
        }
    }
}

/// Shared handle to a thread
#[derive(Clone)]
pub struct ThreadRef(pub(crate) Rc<ThreadData>);

impl ThreadRef {
    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// A script value
#[derive(Clone, Default)]
pub enum Value {
    /// `nil`
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// Integer subtype of number
    Integer(i64),
    /// Float subtype of number
    Number(f64),
    /// String
    String(Rc<str>),
    /// Table
    Table(TableRef),
    /// Function
    Function(FunctionRef),
    /// Full userdata
    UserData(UserDataRef),
    /// Coroutine
    Thread(ThreadRef),
    /// Light userdata (raw address)
    LightUserData(usize),
}

impl Value {
    /// Dynamic type tag
    pub fn type_of(&self) -> ScriptType {
        match self {
            Value::Nil => ScriptType::Nil,
            Value::Boolean(_) => ScriptType::Boolean,
            Value::Integer(_) | Value::Number(_) => ScriptType::Number,
            Value::String(_) => ScriptType::String,
            Value::Table(_) => ScriptType::Table,
            Value::Function(_) => ScriptType::Function,
            Value::UserData(_) => ScriptType::UserData,
            Value::Thread(_) => ScriptType::Thread,
            Value::LightUserData(_) => ScriptType::LightUserData,
        }
    }

    /// Type name for messages
    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    /// Check for nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `nil` and `false` is truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Numeric value; strings are not converted
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integer value; floats qualify only when they are exactly integral
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) => float_to_integer(*n),
            _ => None,
        }
    }

    /// String contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Primitive equality without metamethods
    pub fn raw_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(_), Value::Number(_)) | (Value::Number(_), Value::Integer(_)) => {
                self.as_number() == other.as_number()
            }
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::LightUserData(a), Value::LightUserData(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Address of a reference value
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Table(t) => Some(t.addr()),
            Value::Function(f) => Some(f.addr()),
            Value::UserData(u) => Some(u.addr()),
            Value::Thread(t) => Some(t.addr()),
            _ => None,
        }
    }

    pub(crate) fn metatable(&self) -> Option<TableRef> {
        match self {
            Value::Table(t) => t.metatable(),
            Value::UserData(u) => u.metatable(),
            _ => None,
        }
    }
}

pub(crate) fn float_to_integer(n: f64) -> Option<i64> {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{:?}", n),
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(
                f,
                "{}: {:#x}",
                other.type_name(),
                other.identity().unwrap_or_default()
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{:.1}", n),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::LightUserData(p) => write!(f, "userdata: {:#x}", p),
            other => write!(
                f,
                "{}: {:#x}",
                other.type_name(),
                other.identity().unwrap_or_default()
            ),
        }
    }
}

/// Hashable table key
#[derive(Clone)]
pub(crate) enum Key {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Ref(usize, Value),
    Light(usize),
}

impl Key {
    /// `None` for keys a table cannot hold (nil, NaN)
    pub(crate) fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Nil => None,
            Value::Boolean(b) => Some(Key::Bool(*b)),
            Value::Integer(i) => Some(Key::Int(*i)),
            Value::Number(n) if n.is_nan() => None,
            Value::Number(n) => Some(match float_to_integer(*n) {
                Some(i) => Key::Int(i),
                None => Key::Float(n.to_bits()),
            }),
            Value::String(s) => Some(Key::Str(s.clone())),
            Value::LightUserData(p) => Some(Key::Light(*p)),
            other => other.identity().map(|addr| Key::Ref(addr, other.clone())),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Key::Bool(b) => Value::Boolean(*b),
            Key::Int(i) => Value::Integer(*i),
            Key::Float(bits) => Value::Number(f64::from_bits(*bits)),
            Key::Str(s) => Value::String(s.clone()),
            Key::Ref(_, v) => v.clone(),
            Key::Light(p) => Value::LightUserData(*p),
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Key::Bool(a), Key::Bool(b)) => a == b,
            (Key::Int(a), Key::Int(b)) => a == b,
            (Key::Float(a), Key::Float(b)) => a == b,
            (Key::Str(a), Key::Str(b)) => a == b,
            (Key::Ref(a, _), Key::Ref(b, _)) => a == b,
            (Key::Light(a), Key::Light(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Key::Bool(b) => b.hash(state),
            Key::Int(i) => i.hash(state),
            Key::Float(bits) => bits.hash(state),
            Key::Str(s) => s.hash(state),
            Key::Ref(addr, _) => addr.hash(state),
            Key::Light(p) => p.hash(state),
        }
    }
}
