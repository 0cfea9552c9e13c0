//! Interpreter state and the stack API
//!
//! # Indexing
//!
//! Stack slots are addressed relative to the running frame. Positive indices
//! count from the frame base (`1` is the first argument of a native call),
//! negative indices count down from the top (`-1` is the topmost value).
//!
//! ```text
//! ┌──────────────────────┐
//! │ value (top)          │  ← -1
//! │ value                │  ← -2
//! │ ...                  │
//! │ argument 1           │  ← 1 (frame base)
//! ├──────────────────────┤
//! │ caller slots         │
//! └──────────────────────┘
//! ```
//!
//! # Errors
//!
//! Raising an error is `Err` propagation. A protected call (`pcall`) is the
//! boundary that stops it: the stack is cut back to the called function's
//! slot and the error value is pushed in its place.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::gc::{FinalizerQueue, GcStats};
use crate::value::{
    Frame, FunctionRef, ScriptType, TableRef, ThreadData, ThreadRef, UserData,
    UserDataRef, Value,
};
use crate::{ScriptError, ScriptResult};

/// Maximum nesting of calls on one thread
pub const MAX_CALL_DEPTH: usize = 200;

/// Maximum number of slots on one thread
const MAX_STACK_SLOTS: usize = 1_000_000;

/// Maximum `__index` / `__newindex` chain length
const MAX_META_CHAIN: usize = 100;

/// Unique identity of an interpreter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u64);

impl StateId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        StateId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

/// Key of a value pinned in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryKey(usize);

impl RegistryKey {
    /// Raw slot number
    pub fn as_usize(&self) -> usize {
        self.0
    }

    /// Rebuild a key from its raw slot number
    pub fn from_usize(raw: usize) -> Self {
        RegistryKey(raw)
    }
}

#[derive(Default)]
struct Registry {
    slots: Vec<Value>,
    free: Vec<usize>,
}

/// Event delivered to a debug hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// A function is about to run
    Call,
    /// A function returned
    Return,
    /// The running script function reached a new line
    Line(u32),
}

/// Which events a hook receives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookMask {
    /// Deliver `Call`
    pub call: bool,
    /// Deliver `Return`
    pub ret: bool,
    /// Deliver `Line`
    pub line: bool,
}

impl HookMask {
    /// Only line events
    pub const LINE: HookMask = HookMask {
        call: false,
        ret: false,
        line: true,
    };

    /// Every event
    pub const ALL: HookMask = HookMask {
        call: true,
        ret: true,
        line: true,
    };

    fn wants(&self, event: HookEvent) -> bool {
        match event {
            HookEvent::Call => self.call,
            HookEvent::Return => self.ret,
            HookEvent::Line(_) => self.line,
        }
    }
}

/// Debug hook callback
pub type Hook = Rc<dyn Fn(&mut ScriptState, HookEvent) -> ScriptResult<()>>;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// unary `-`
    Unm,
}

impl ArithOp {
    /// Metamethod consulted for non-numeric operands
    pub const fn metamethod(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Div => "__div",
            ArithOp::Mod => "__mod",
            ArithOp::Unm => "__unm",
        }
    }
}

struct GlobalState {
    id: StateId,
    globals: TableRef,
    registry: RefCell<Registry>,
    named_metatables: RefCell<FxHashMap<String, TableRef>>,
    finalizers: Rc<FinalizerQueue>,
    hook: RefCell<Option<(Hook, HookMask)>>,
    in_hook: std::cell::Cell<bool>,
}

/// Handle to an interpreter instance, bound to one of its threads.
///
/// Cloning the handle does not copy the interpreter.
#[derive(Clone)]
pub struct ScriptState {
    global: Rc<GlobalState>,
    thread: ThreadRef,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptState {
    /// Create a fresh interpreter with an empty global table
    pub fn new() -> Self {
        let global = Rc::new(GlobalState {
            id: StateId::next(),
            globals: TableRef::new(),
            registry: RefCell::new(Registry::default()),
            named_metatables: RefCell::new(FxHashMap::default()),
            finalizers: Rc::new(FinalizerQueue::default()),
            hook: RefCell::new(None),
            in_hook: std::cell::Cell::new(false),
        });
        Self {
            global,
            thread: ThreadRef(Rc::new(ThreadData::new())),
        }
    }

    /// Identity of the interpreter instance (shared by all its threads)
    pub fn id(&self) -> StateId {
        self.global.id
    }

    /// The global table
    pub fn globals(&self) -> TableRef {
        self.global.globals.clone()
    }

    /// The thread this handle operates on
    pub fn thread(&self) -> ThreadRef {
        self.thread.clone()
    }

    /// A handle to another thread of the same interpreter
    pub fn for_thread(&self, thread: &ThreadRef) -> ScriptState {
        ScriptState {
            global: self.global.clone(),
            thread: thread.clone(),
        }
    }

    // ===== Stack bookkeeping =====

    fn base(&self) -> usize {
        self.thread
            .0
            .frames
            .borrow()
            .last()
            .map(|f| f.base)
            .unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.thread.0.stack.borrow().len()
    }

    fn slot(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        let len = self.len();
        if idx > 0 {
            let abs = base + idx as usize - 1;
            (abs < len).then_some(abs)
        } else if idx < 0 {
            let offset = idx.unsigned_abs() as usize;
            (offset <= len - base).then(|| len - offset)
        } else {
            None
        }
    }

    /// Number of values in the current frame
    pub fn top(&self) -> i32 {
        (self.len() - self.base()) as i32
    }

    /// Grow (with nils) or shrink the current frame.
    ///
    /// A negative argument is relative to the current top: `set_top(-2)` pops one value.
    pub fn set_top(&mut self, idx: i32) {
        let base = self.base();
        let len = self.len();
        let new_len = if idx >= 0 {
            base + idx as usize
        } else {
            (len as i64 + idx as i64 + 1).max(base as i64) as usize
        };
        self.thread.0.stack.borrow_mut().resize(new_len, Value::Nil);
    }

    /// Convert a relative index to a positive one
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 {
            idx
        } else {
            self.top() + idx + 1
        }
    }

    /// Ensure room for `extra` more slots
    pub fn check_stack(&self, extra: usize) -> bool {
        self.len() + extra <= MAX_STACK_SLOTS
    }

    // ===== Push =====

    /// Push any value
    pub fn push_value(&mut self, value: Value) {
        self.thread.0.stack.borrow_mut().push(value);
    }

    /// Push `nil`
    pub fn push_nil(&mut self) {
        self.push_value(Value::Nil);
    }

    /// Push a boolean
    pub fn push_boolean(&mut self, b: bool) {
        self.push_value(Value::Boolean(b));
    }

    /// Push an integer
    pub fn push_integer(&mut self, i: i64) {
        self.push_value(Value::Integer(i));
    }

    /// Push a float
    pub fn push_number(&mut self, n: f64) {
        self.push_value(Value::Number(n));
    }

    /// Push a string
    pub fn push_string(&mut self, s: &str) {
        self.push_value(Value::from(s));
    }

    /// Push a raw address
    pub fn push_light_userdata(&mut self, p: usize) {
        self.push_value(Value::LightUserData(p));
    }

    /// Push a function value
    pub fn push_function(&mut self, f: FunctionRef) {
        self.push_value(Value::Function(f));
    }

    /// Push a native closure
    pub fn push_fn(&mut self, body: impl Fn(&mut ScriptState) -> ScriptResult<usize> + 'static) {
        self.push_function(FunctionRef::new(body));
    }

    /// Push the global table
    pub fn push_global_table(&mut self) {
        let globals = self.globals();
        self.push_value(Value::Table(globals));
    }

    /// Push a fresh userdata wrapping `payload`
    pub fn new_userdata<T: Any>(&mut self, payload: T) -> UserDataRef {
        let ud = UserDataRef(Rc::new(UserData::new(
            Box::new(payload),
            Rc::downgrade(&self.global.finalizers),
        )));
        self.push_value(Value::UserData(ud.clone()));
        ud
    }

    /// Push a fresh table
    pub fn new_table(&mut self) -> TableRef {
        let t = TableRef::new();
        self.push_value(Value::Table(t.clone()));
        t
    }

    // ===== Stack manipulation =====

    /// Pop `n` values
    pub fn pop(&mut self, n: usize) {
        let base = self.base();
        let mut stack = self.thread.0.stack.borrow_mut();
        let new_len = stack.len().saturating_sub(n).max(base);
        stack.truncate(new_len);
    }

    /// Pop and return the top value (nil if the frame is empty)
    pub fn pop_value(&mut self) -> Value {
        if self.top() == 0 {
            return Value::Nil;
        }
        self.thread.0.stack.borrow_mut().pop().unwrap_or_default()
    }

    /// Remove the value at `idx`, shifting the values above it down
    pub fn remove(&mut self, idx: i32) {
        if let Some(abs) = self.slot(idx) {
            self.thread.0.stack.borrow_mut().remove(abs);
        }
    }

    /// Move the top value into `idx`, shifting the values above it up
    pub fn insert(&mut self, idx: i32) {
        if let Some(abs) = self.slot(idx) {
            let mut stack = self.thread.0.stack.borrow_mut();
            if let Some(v) = stack.pop() {
                stack.insert(abs, v);
            }
        }
    }

    /// Pop the top value into `idx`
    pub fn replace(&mut self, idx: i32) {
        if let Some(abs) = self.slot(idx) {
            let mut stack = self.thread.0.stack.borrow_mut();
            if let Some(v) = stack.pop() {
                if abs < stack.len() {
                    stack[abs] = v;
                }
            }
        }
    }

    /// Copy the value at `from` into `to`
    pub fn copy(&mut self, from: i32, to: i32) {
        let v = self.value_at(from);
        if let Some(abs) = self.slot(to) {
            self.thread.0.stack.borrow_mut()[abs] = v;
        }
    }

    /// Push a copy of the value at `idx`
    pub fn push_copy(&mut self, idx: i32) {
        let v = self.value_at(idx);
        self.push_value(v);
    }

    // ===== Read =====

    /// The value at `idx` (nil for an invalid index)
    pub fn value_at(&self, idx: i32) -> Value {
        self.slot(idx)
            .map(|abs| self.thread.0.stack.borrow()[abs].clone())
            .unwrap_or_default()
    }

    /// The type of the value at `idx`
    pub fn type_at(&self, idx: i32) -> ScriptType {
        match self.slot(idx) {
            Some(abs) => self.thread.0.stack.borrow()[abs].type_of(),
            None => ScriptType::None,
        }
    }

    /// True for nil or an invalid index
    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_at(idx), ScriptType::None | ScriptType::Nil)
    }

    /// Numeric value; strings are not converted
    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value_at(idx).as_number()
    }

    /// Integer value; integral floats qualify
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.value_at(idx).as_integer()
    }

    /// Truthiness
    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).is_truthy()
    }

    /// String contents; numbers are not converted
    pub fn to_str(&self, idx: i32) -> Option<Rc<str>> {
        match self.value_at(idx) {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Userdata at `idx`
    pub fn to_userdata(&self, idx: i32) -> Option<UserDataRef> {
        match self.value_at(idx) {
            Value::UserData(u) => Some(u),
            _ => None,
        }
    }

    /// Clone the userdata payload at `idx` if it is a `T`
    pub fn userdata_payload<T: Clone + 'static>(&self, idx: i32) -> Option<T> {
        self.to_userdata(idx)?.with_payload(|p: &T| p.clone())
    }

    /// Display string, honoring `__tostring`
    pub fn tostring(&mut self, idx: i32) -> ScriptResult<String> {
        let value = self.value_at(idx);
        let mm = self.metafield(&value, "__tostring");
        if mm.is_nil() {
            return Ok(value.to_string());
        }
        match self.call_values(mm, &[value], 1)?.into_iter().next() {
            Some(Value::String(s)) => Ok(s.to_string()),
            _ => Err(ScriptError::message("'__tostring' must return a string")),
        }
    }

    // ===== Tables =====

    fn metafield(&self, value: &Value, name: &str) -> Value {
        value
            .metatable()
            .map(|mt| mt.raw_get_str(name))
            .unwrap_or_default()
    }

    /// Index `target[key]`, following `__index`
    pub fn index_value(&mut self, target: Value, key: Value) -> ScriptResult<Value> {
        let mut current = target;
        for _ in 0..MAX_META_CHAIN {
            let handler = if let Value::Table(t) = &current {
                let raw = t.raw_get(&key);
                if !raw.is_nil() {
                    return Ok(raw);
                }
                let handler = self.metafield(&current, "__index");
                if handler.is_nil() {
                    return Ok(Value::Nil);
                }
                handler
            } else {
                let handler = self.metafield(&current, "__index");
                if handler.is_nil() {
                    return Err(self.error_message(&format!(
                        "attempt to index a {} value",
                        current.type_name()
                    )));
                }
                handler
            };
            if let Value::Function(_) = handler {
                let result = self.call_values(handler, &[current, key], 1)?;
                return Ok(result.into_iter().next().unwrap_or_default());
            }
            current = handler;
        }
        Err(self.error_message("'__index' chain too long; possible loop"))
    }

    /// Assign `target[key] = value`, following `__newindex`
    pub fn newindex_value(&mut self, target: Value, key: Value, value: Value) -> ScriptResult<()> {
        let mut current = target;
        for _ in 0..MAX_META_CHAIN {
            let handler = if let Value::Table(t) = &current {
                let handler = self.metafield(&current, "__newindex");
                if handler.is_nil() || !t.raw_get(&key).is_nil() {
                    return self.checked_raw_set(t, key, value);
                }
                handler
            } else {
                let handler = self.metafield(&current, "__newindex");
                if handler.is_nil() {
                    return Err(self.error_message(&format!(
                        "attempt to index a {} value",
                        current.type_name()
                    )));
                }
                handler
            };
            if let Value::Function(_) = handler {
                self.call_values(handler, &[current, key, value], 0)?;
                return Ok(());
            }
            current = handler;
        }
        Err(self.error_message("'__newindex' chain too long; possible loop"))
    }

    fn checked_raw_set(&self, t: &TableRef, key: Value, value: Value) -> ScriptResult<()> {
        if t.raw_set(key.clone(), value) {
            Ok(())
        } else if key.is_nil() {
            Err(ScriptError::message("table index is nil"))
        } else {
            Err(ScriptError::message("table index is NaN"))
        }
    }

    /// Pop a key and push `t[key]` where `t` is at `idx`
    pub fn get_table(&mut self, idx: i32) -> ScriptResult<ScriptType> {
        let target = self.value_at(idx);
        let key = self.pop_value();
        let v = self.index_value(target, key)?;
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// Push `t[name]` where `t` is at `idx`
    pub fn get_field(&mut self, idx: i32, name: &str) -> ScriptResult<ScriptType> {
        let target = self.value_at(idx);
        let v = self.index_value(target, Value::from(name))?;
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// Push `t[n]` where `t` is at `idx`
    pub fn get_index(&mut self, idx: i32, n: i64) -> ScriptResult<ScriptType> {
        let target = self.value_at(idx);
        let v = self.index_value(target, Value::Integer(n))?;
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// `t[k] = v` with `k` at -2 and `v` at -1; pops both
    pub fn set_table(&mut self, idx: i32) -> ScriptResult<()> {
        let target = self.value_at(idx);
        let value = self.pop_value();
        let key = self.pop_value();
        self.newindex_value(target, key, value)
    }

    /// `t[name] = v` with `v` at -1; pops it
    pub fn set_field(&mut self, idx: i32, name: &str) -> ScriptResult<()> {
        let target = self.value_at(idx);
        let value = self.pop_value();
        self.newindex_value(target, Value::from(name), value)
    }

    /// Pop a key and push the raw `t[key]`
    pub fn raw_get(&mut self, idx: i32) -> ScriptType {
        let target = self.value_at(idx);
        let key = self.pop_value();
        let v = match target {
            Value::Table(t) => t.raw_get(&key),
            _ => Value::Nil,
        };
        let ty = v.type_of();
        self.push_value(v);
        ty
    }

    /// Push the raw `t[n]`
    pub fn raw_get_index(&mut self, idx: i32, n: i64) -> ScriptType {
        let v = match self.value_at(idx) {
            Value::Table(t) => t.raw_get(&Value::Integer(n)),
            _ => Value::Nil,
        };
        let ty = v.type_of();
        self.push_value(v);
        ty
    }

    /// Raw `t[k] = v` with `k` at -2 and `v` at -1; pops both
    pub fn raw_set(&mut self, idx: i32) -> ScriptResult<()> {
        let target = self.value_at(idx);
        let value = self.pop_value();
        let key = self.pop_value();
        match target {
            Value::Table(t) => self.checked_raw_set(&t, key, value),
            other => Err(ScriptError::message(format!(
                "table expected, got {}",
                other.type_name()
            ))),
        }
    }

    /// Raw `t[n] = v` with `v` at -1; pops it
    pub fn raw_set_index(&mut self, idx: i32, n: i64) -> ScriptResult<()> {
        let target = self.value_at(idx);
        let value = self.pop_value();
        match target {
            Value::Table(t) => self.checked_raw_set(&t, Value::Integer(n), value),
            other => Err(ScriptError::message(format!(
                "table expected, got {}",
                other.type_name()
            ))),
        }
    }

    /// Raw length of a table or string
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.value_at(idx) {
            Value::Table(t) => t.raw_len(),
            Value::String(s) => s.len(),
            _ => 0,
        }
    }

    /// Push the length of the value at `idx`, honoring `__len`
    pub fn length(&mut self, idx: i32) -> ScriptResult<()> {
        let value = self.value_at(idx);
        let mm = self.metafield(&value, "__len");
        if !mm.is_nil() {
            let result = self.call_values(mm, &[value], 1)?;
            self.push_value(result.into_iter().next().unwrap_or_default());
            return Ok(());
        }
        match value {
            Value::Table(t) => self.push_integer(t.raw_len() as i64),
            Value::String(s) => self.push_integer(s.len() as i64),
            other => {
                return Err(self.error_message(&format!(
                    "attempt to get length of a {} value",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Identity/primitive equality without metamethods
    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        if self.slot(a).is_none() || self.slot(b).is_none() {
            return false;
        }
        self.value_at(a).raw_equals(&self.value_at(b))
    }

    /// Push the metatable of the value at `idx`; false (nothing pushed) if none
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        match self.value_at(idx).metatable() {
            Some(mt) => {
                self.push_value(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `idx`
    pub fn set_metatable(&mut self, idx: i32) -> ScriptResult<()> {
        let target = self.value_at(idx);
        let mt = match self.pop_value() {
            Value::Table(t) => Some(t),
            Value::Nil => None,
            other => {
                return Err(ScriptError::message(format!(
                    "metatable must be a table, got {}",
                    other.type_name()
                )))
            }
        };
        match target {
            Value::Table(t) => t.set_metatable(mt),
            Value::UserData(u) => u.set_metatable(mt),
            other => {
                return Err(ScriptError::message(format!(
                    "cannot set metatable of a {} value",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Push the metatable registered under `name`, creating it if absent.
    ///
    /// Returns true when the table was created by this call.
    pub fn new_metatable(&mut self, name: &str) -> bool {
        let (mt, created) = {
            let mut named = self.global.named_metatables.borrow_mut();
            match named.get(name) {
                Some(mt) => (mt.clone(), false),
                None => {
                    let mt = TableRef::new();
                    mt.raw_set(Value::from("__name"), Value::from(name));
                    named.insert(name.to_string(), mt.clone());
                    (mt, true)
                }
            }
        };
        self.push_value(Value::Table(mt));
        created
    }

    /// The metatable registered under `name`
    pub fn named_metatable(&self, name: &str) -> Option<TableRef> {
        self.global.named_metatables.borrow().get(name).cloned()
    }

    /// Push the global `name`
    pub fn get_global(&mut self, name: &str) -> ScriptResult<ScriptType> {
        let globals = Value::Table(self.globals());
        let v = self.index_value(globals, Value::from(name))?;
        let ty = v.type_of();
        self.push_value(v);
        Ok(ty)
    }

    /// Pop a value into the global `name`
    pub fn set_global(&mut self, name: &str) -> ScriptResult<()> {
        let globals = Value::Table(self.globals());
        let value = self.pop_value();
        self.newindex_value(globals, Value::from(name), value)
    }

    // ===== Operators =====

    /// Compare the values at `a` and `b`, honoring `__eq`, `__lt`, `__le`
    pub fn compare(&mut self, a: i32, b: i32, op: CompareOp) -> ScriptResult<bool> {
        if self.slot(a).is_none() || self.slot(b).is_none() {
            return Ok(false);
        }
        let lhs = self.value_at(a);
        let rhs = self.value_at(b);
        self.compare_values(lhs, rhs, op)
    }

    /// Compare two values, honoring metamethods
    pub fn compare_values(&mut self, lhs: Value, rhs: Value, op: CompareOp) -> ScriptResult<bool> {
        match op {
            CompareOp::Eq => {
                if lhs.raw_equals(&rhs) {
                    return Ok(true);
                }
                let same_kind = matches!(
                    (&lhs, &rhs),
                    (Value::Table(_), Value::Table(_)) | (Value::UserData(_), Value::UserData(_))
                );
                if !same_kind {
                    return Ok(false);
                }
                let mut mm = self.metafield(&lhs, "__eq");
                if mm.is_nil() {
                    mm = self.metafield(&rhs, "__eq");
                }
                if mm.is_nil() {
                    return Ok(false);
                }
                let result = self.call_values(mm, &[lhs, rhs], 1)?;
                Ok(result.first().map(Value::is_truthy).unwrap_or(false))
            }
            CompareOp::Lt | CompareOp::Le => {
                if let (Some(x), Some(y)) = (lhs.as_number(), rhs.as_number()) {
                    return Ok(if op == CompareOp::Lt { x < y } else { x <= y });
                }
                if let (Value::String(x), Value::String(y)) = (&lhs, &rhs) {
                    return Ok(if op == CompareOp::Lt { x < y } else { x <= y });
                }
                let event = if op == CompareOp::Lt { "__lt" } else { "__le" };
                let mut mm = self.metafield(&lhs, event);
                if mm.is_nil() {
                    mm = self.metafield(&rhs, event);
                }
                if mm.is_nil() {
                    let msg = if lhs.type_name() == rhs.type_name() {
                        format!("attempt to compare two {} values", lhs.type_name())
                    } else {
                        format!(
                            "attempt to compare {} with {}",
                            lhs.type_name(),
                            rhs.type_name()
                        )
                    };
                    return Err(self.error_message(&msg));
                }
                let result = self.call_values(mm, &[lhs, rhs], 1)?;
                Ok(result.first().map(Value::is_truthy).unwrap_or(false))
            }
        }
    }

    /// Pop the operand(s) of `op` and push the result.
    ///
    /// Binary operators take their operands from -2 and -1, `Unm` from -1.
    pub fn arith(&mut self, op: ArithOp) -> ScriptResult<()> {
        let rhs = self.pop_value();
        let lhs = if op == ArithOp::Unm {
            rhs.clone()
        } else {
            self.pop_value()
        };
        let result = self.arith_values(op, lhs, rhs)?;
        self.push_value(result);
        Ok(())
    }

    /// Apply `op` to two values, honoring metamethods
    pub fn arith_values(&mut self, op: ArithOp, lhs: Value, rhs: Value) -> ScriptResult<Value> {
        if let Some(v) = self.arith_raw(op, &lhs, &rhs)? {
            return Ok(v);
        }
        let event = op.metamethod();
        let mut mm = self.metafield(&lhs, event);
        if mm.is_nil() {
            mm = self.metafield(&rhs, event);
        }
        if mm.is_nil() {
            let culprit = if lhs.as_number().is_none() { &lhs } else { &rhs };
            return Err(self.error_message(&format!(
                "attempt to perform arithmetic on a {} value",
                culprit.type_name()
            )));
        }
        let result = self.call_values(mm, &[lhs, rhs], 1)?;
        Ok(result.into_iter().next().unwrap_or_default())
    }

    fn arith_raw(&self, op: ArithOp, lhs: &Value, rhs: &Value) -> ScriptResult<Option<Value>> {
        if let (Value::Integer(a), Value::Integer(b)) = (lhs, rhs) {
            let (a, b) = (*a, *b);
            let v = match op {
                ArithOp::Add => Value::Integer(a.wrapping_add(b)),
                ArithOp::Sub => Value::Integer(a.wrapping_sub(b)),
                ArithOp::Mul => Value::Integer(a.wrapping_mul(b)),
                ArithOp::Div => Value::Number(a as f64 / b as f64),
                ArithOp::Mod => {
                    if b == 0 {
                        return Err(ScriptError::message("attempt to perform 'n%0'"));
                    }
                    let r = a.wrapping_rem(b);
                    Value::Integer(if r != 0 && (r ^ b) < 0 { r + b } else { r })
                }
                ArithOp::Unm => Value::Integer(a.wrapping_neg()),
            };
            return Ok(Some(v));
        }
        let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
            return Ok(None);
        };
        let v = match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Mod => {
                let m = a % b;
                if m != 0.0 && (m < 0.0) != (b < 0.0) {
                    m + b
                } else {
                    m
                }
            }
            ArithOp::Unm => -a,
        };
        Ok(Some(Value::Number(v)))
    }

    // ===== Calls =====

    /// Call the function at `-(nargs + 1)` with the `nargs` values above it.
    ///
    /// The function and arguments are replaced by the results, truncated or
    /// padded with nil to `nresults` when given.
    pub fn call(&mut self, nargs: usize, nresults: Option<usize>) -> ScriptResult<()> {
        let len = self.len();
        if len < self.base() + nargs + 1 {
            return Err(ScriptError::message("not enough values on the stack for call"));
        }
        let func_pos = len - nargs - 1;
        let result = self.call_at(func_pos, nresults);
        if result.is_err() {
            self.thread.0.stack.borrow_mut().truncate(func_pos);
        }
        result
    }

    fn call_at(&mut self, func_pos: usize, nresults: Option<usize>) -> ScriptResult<()> {
        let callee = self.thread.0.stack.borrow()[func_pos].clone();
        let function = match callee {
            Value::Function(f) => f,
            other => {
                let mm = self.metafield(&other, "__call");
                if mm.is_nil() {
                    return Err(self.error_message(&format!(
                        "attempt to call a {} value",
                        other.type_name()
                    )));
                }
                self.thread.0.stack.borrow_mut().insert(func_pos, mm);
                return self.call_at(func_pos, nresults);
            }
        };

        if self.thread.0.frames.borrow().len() > MAX_CALL_DEPTH {
            return Err(ScriptError::StackOverflow);
        }
        self.thread.0.frames.borrow_mut().push(Frame {
            base: func_pos + 1,
            function: Some(function.clone()),
            line: 0,
        });

        let outcome = self
            .fire_hook(HookEvent::Call)
            .and_then(|_| (function.0.body)(self))
            .and_then(|n| self.fire_hook(HookEvent::Return).map(|_| n));

        let frame_base = self.base();
        self.thread.0.frames.borrow_mut().pop();
        let produced = outcome?;

        let mut stack = self.thread.0.stack.borrow_mut();
        let available = stack.len().saturating_sub(frame_base);
        let produced = produced.min(available);
        let first = stack.len() - produced;
        let mut results: Vec<Value> = stack.drain(first..).collect();
        stack.truncate(func_pos);
        if let Some(n) = nresults {
            results.resize(n, Value::Nil);
        }
        stack.extend(results);
        Ok(())
    }

    /// Protected call: like `call`, but a raised error stops here.
    ///
    /// On error the stack is cut back to the function slot, the error value
    /// (passed through the handler at `msgh` when non-zero) is pushed, and
    /// the error is returned.
    pub fn pcall(&mut self, nargs: usize, nresults: Option<usize>, msgh: i32) -> ScriptResult<()> {
        let handler = if msgh != 0 {
            Some(self.value_at(msgh))
        } else {
            None
        };
        let len = self.len();
        if len < self.base() + nargs + 1 {
            return Err(ScriptError::message("not enough values on the stack for call"));
        }
        let func_pos = len - nargs - 1;
        let depth = self.thread.0.frames.borrow().len();
        match self.call_at(func_pos, nresults) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.thread.0.frames.borrow_mut().truncate(depth);
                self.thread.0.stack.borrow_mut().truncate(func_pos);
                let mut value = err.value();
                if let Some(h) = handler {
                    value = match self.call_values(h, &[value.clone()], 1) {
                        Ok(r) => r.into_iter().next().unwrap_or_default(),
                        Err(inner) => inner.value(),
                    };
                }
                self.push_value(value.clone());
                Err(match err {
                    ScriptError::StackOverflow if msgh == 0 => ScriptError::StackOverflow,
                    _ => ScriptError::Runtime(value),
                })
            }
        }
    }

    /// Call `f` with `args`, returning exactly `nresults` values
    pub fn call_values(
        &mut self,
        f: Value,
        args: &[Value],
        nresults: usize,
    ) -> ScriptResult<Vec<Value>> {
        self.push_value(f);
        for a in args {
            self.push_value(a.clone());
        }
        self.call(args.len(), Some(nresults))?;
        let mut stack = self.thread.0.stack.borrow_mut();
        let first = stack.len() - nresults;
        Ok(stack.drain(first..).collect())
    }

    /// Pop the top value and turn it into a raised error
    pub fn error(&mut self) -> ScriptError {
        ScriptError::Runtime(self.pop_value())
    }

    /// A raised error whose message is prefixed with the caller's location
    pub fn error_message(&self, msg: &str) -> ScriptError {
        ScriptError::message(format!("{}{}", self.where_(1), msg))
    }

    /// `"chunk:line: "` for the function `level` frames below the running one,
    /// or `""` when that frame is native or does not exist
    pub fn where_(&self, level: usize) -> String {
        let frames = self.thread.0.frames.borrow();
        if level >= frames.len() {
            return String::new();
        }
        let frame = &frames[frames.len() - 1 - level];
        match frame.function.as_ref().and_then(FunctionRef::source) {
            Some(source) => format!("{}:{}: ", source, frame.line),
            None => String::new(),
        }
    }

    /// Record the current line of the running script function
    pub fn set_line(&mut self, line: u32) -> ScriptResult<()> {
        if let Some(frame) = self.thread.0.frames.borrow_mut().last_mut() {
            frame.line = line;
        }
        self.fire_hook(HookEvent::Line(line))
    }

    /// Human readable call stack, innermost first
    pub fn traceback(&self, msg: Option<&str>, level: usize) -> String {
        let mut out = String::new();
        if let Some(m) = msg {
            out.push_str(m);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        let frames = self.thread.0.frames.borrow();
        for frame in frames.iter().rev().skip(level) {
            let Some(function) = frame.function.as_ref() else {
                continue;
            };
            let name = function.name().unwrap_or("?");
            match function.source() {
                Some(source) => {
                    out.push_str(&format!("\n\t{}:{}: in function <{}>", source, frame.line, name))
                }
                None => out.push_str(&format!("\n\t[native]: in function <{}>", name)),
            }
        }
        out
    }

    /// Install (or clear) the debug hook
    pub fn set_hook(&mut self, hook: Option<Hook>, mask: HookMask) {
        *self.global.hook.borrow_mut() = hook.map(|h| (h, mask));
    }

    /// Whether a debug hook is installed
    pub fn has_hook(&self) -> bool {
        self.global.hook.borrow().is_some()
    }

    fn fire_hook(&mut self, event: HookEvent) -> ScriptResult<()> {
        if self.global.in_hook.get() {
            return Ok(());
        }
        let hook = match &*self.global.hook.borrow() {
            Some((hook, mask)) if mask.wants(event) => hook.clone(),
            _ => return Ok(()),
        };
        self.global.in_hook.set(true);
        let result = hook(self, event);
        self.global.in_hook.set(false);
        result
    }

    // ===== Registry =====

    /// Pop the top value and pin it in the registry
    pub fn reference(&mut self) -> RegistryKey {
        let value = self.pop_value();
        let mut registry = self.global.registry.borrow_mut();
        match registry.free.pop() {
            Some(slot) => {
                registry.slots[slot] = value;
                RegistryKey(slot)
            }
            None => {
                registry.slots.push(value);
                RegistryKey(registry.slots.len() - 1)
            }
        }
    }

    /// Push the value pinned under `key`
    pub fn push_reference(&mut self, key: RegistryKey) {
        let value = self
            .global
            .registry
            .borrow()
            .slots
            .get(key.0)
            .cloned()
            .unwrap_or_default();
        self.push_value(value);
    }

    /// The value pinned under `key`
    pub fn reference_value(&self, key: RegistryKey) -> Value {
        self.global
            .registry
            .borrow()
            .slots
            .get(key.0)
            .cloned()
            .unwrap_or_default()
    }

    /// Unpin `key`; releasing twice is a no-op
    pub fn release_reference(&mut self, key: RegistryKey) {
        let mut registry = self.global.registry.borrow_mut();
        if key.0 < registry.slots.len() && !registry.free.contains(&key.0) {
            registry.slots[key.0] = Value::Nil;
            registry.free.push(key.0);
        }
    }

    /// Number of pinned values
    pub fn reference_count(&self) -> usize {
        let registry = self.global.registry.borrow();
        registry.slots.len() - registry.free.len()
    }

    // ===== Threads =====

    /// Push a new thread and return a handle operating on it
    pub fn new_thread(&mut self) -> ScriptState {
        let thread = ThreadRef(Rc::new(ThreadData::new()));
        self.push_value(Value::Thread(thread.clone()));
        self.for_thread(&thread)
    }

    /// Pop `n` values from this thread and push them onto `to`
    pub fn xmove(&mut self, to: &mut ScriptState, n: usize) -> ScriptResult<()> {
        if !Rc::ptr_eq(&self.global, &to.global) {
            return Err(ScriptError::message("moving values between different states"));
        }
        if (self.top() as usize) < n {
            return Err(ScriptError::message("not enough values to move"));
        }
        let moved: Vec<Value> = {
            let mut stack = self.thread.0.stack.borrow_mut();
            let first = stack.len() - n;
            stack.drain(first..).collect()
        };
        to.thread.0.stack.borrow_mut().extend(moved);
        Ok(())
    }

    // ===== Collection =====

    /// Run pending `__gc` finalizers
    pub fn collect_garbage(&mut self) -> GcStats {
        let mut stats = GcStats::default();
        loop {
            let pending = self.global.finalizers.drain();
            if pending.is_empty() {
                return stats;
            }
            for item in pending {
                let gc = item.metatable.raw_get_str("__gc");
                let ud = UserDataRef(Rc::new(UserData::resurrected(
                    item.payload,
                    item.metatable,
                    Rc::downgrade(&self.global.finalizers),
                )));
                if gc.is_nil() {
                    continue;
                }
                let top = self.top();
                self.push_value(gc);
                self.push_value(Value::UserData(ud));
                match self.pcall(1, Some(0), 0) {
                    Ok(()) => stats.finalized += 1,
                    Err(_) => stats.failed += 1,
                }
                self.set_top(top);
            }
        }
    }

    /// Userdata waiting for finalization
    pub fn pending_finalizers(&self) -> usize {
        self.global.finalizers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_and_absolute_indices() {
        let mut s = ScriptState::new();
        s.push_integer(1);
        s.push_integer(2);
        s.push_integer(3);
        assert_eq!(s.top(), 3);
        assert_eq!(s.to_integer(1), Some(1));
        assert_eq!(s.to_integer(-1), Some(3));
        assert_eq!(s.abs_index(-2), 2);
        assert_eq!(s.type_at(4), ScriptType::None);
        s.set_top(-2);
        assert_eq!(s.top(), 2);
    }

    #[test]
    fn test_insert_remove_replace() {
        let mut s = ScriptState::new();
        s.push_string("a");
        s.push_string("b");
        s.push_string("c");
        s.insert(1);
        assert_eq!(s.to_str(1).as_deref(), Some("c"));
        s.remove(1);
        assert_eq!(s.to_str(1).as_deref(), Some("a"));
        s.push_string("z");
        s.replace(1);
        assert_eq!(s.to_str(1).as_deref(), Some("z"));
        assert_eq!(s.top(), 2);
    }

    #[test]
    fn test_call_sees_arguments_from_one() {
        let mut s = ScriptState::new();
        s.push_fn(|s| {
            let a = s.to_integer(1).unwrap_or(0);
            let b = s.to_integer(2).unwrap_or(0);
            s.push_integer(a + b);
            Ok(1)
        });
        s.push_integer(2);
        s.push_integer(3);
        s.call(2, Some(1)).unwrap();
        assert_eq!(s.top(), 1);
        assert_eq!(s.to_integer(-1), Some(5));
    }

    #[test]
    fn test_pcall_restores_stack_and_pushes_error() {
        let mut s = ScriptState::new();
        s.push_string("sentinel");
        s.push_fn(|s| {
            s.push_integer(99);
            s.push_string("boom");
            Err(s.error())
        });
        s.push_integer(1);
        let err = s.pcall(1, Some(1), 0).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(s.top(), 2);
        assert_eq!(s.to_str(-1).as_deref(), Some("boom"));
        assert_eq!(s.to_str(1).as_deref(), Some("sentinel"));
    }

    #[test]
    fn test_where_reports_chunk_location() {
        let mut s = ScriptState::new();
        let native = FunctionRef::new(|s| {
            let loc = s.where_(1);
            s.push_string(&loc);
            Ok(1)
        });
        let chunk = FunctionRef::chunk("main.lua", move |s| {
            s.set_line(7)?;
            s.push_function(native.clone());
            s.call(0, Some(1))?;
            Ok(1)
        });
        s.push_function(chunk);
        s.call(0, Some(1)).unwrap();
        assert_eq!(s.to_str(-1).as_deref(), Some("main.lua:7: "));
    }

    #[test]
    fn test_index_metamethod_function_and_table() {
        let mut s = ScriptState::new();
        let fallback = TableRef::new();
        fallback.raw_set(Value::from("x"), Value::Integer(10));
        let mt = TableRef::new();
        mt.raw_set(Value::from("__index"), Value::Table(fallback));
        let t = s.new_table();
        t.set_metatable(Some(mt));
        assert_eq!(s.get_field(-1, "x").unwrap(), ScriptType::Number);
        assert_eq!(s.to_integer(-1), Some(10));
        s.pop(1);
        assert_eq!(s.get_field(-1, "y").unwrap(), ScriptType::Nil);
    }

    #[test]
    fn test_call_metamethod() {
        let mut s = ScriptState::new();
        let mt = TableRef::new();
        mt.raw_set(
            Value::from("__call"),
            Value::Function(FunctionRef::new(|s| {
                let n = s.to_integer(2).unwrap_or(0);
                s.push_integer(n * 2);
                Ok(1)
            })),
        );
        let t = s.new_table();
        t.set_metatable(Some(mt));
        s.push_integer(21);
        s.call(1, Some(1)).unwrap();
        assert_eq!(s.to_integer(-1), Some(42));
    }

    #[test]
    fn test_registry_pins_values() {
        let mut s = ScriptState::new();
        s.push_string("pinned");
        let key = s.reference();
        assert_eq!(s.top(), 0);
        s.push_reference(key);
        assert_eq!(s.to_str(-1).as_deref(), Some("pinned"));
        s.release_reference(key);
        s.release_reference(key);
        assert_eq!(s.reference_count(), 0);
    }

    #[test]
    fn test_gc_runs_finalizer_for_dropped_userdata() {
        use std::cell::Cell;
        let mut s = ScriptState::new();
        let hits = Rc::new(Cell::new(0));
        let seen = hits.clone();
        let mt = TableRef::new();
        mt.raw_set(
            Value::from("__gc"),
            Value::Function(FunctionRef::new(move |s| {
                if s.userdata_payload::<u32>(1) == Some(7) {
                    seen.set(seen.get() + 1);
                }
                Ok(0)
            })),
        );
        let ud = s.new_userdata(7u32);
        ud.set_metatable(Some(mt));
        drop(ud);
        s.pop(1);
        assert_eq!(s.pending_finalizers(), 1);
        let stats = s.collect_garbage();
        assert_eq!(stats.finalized, 1);
        assert_eq!(hits.get(), 1);
        assert_eq!(s.pending_finalizers(), 0);
    }

    #[test]
    fn test_xmove_between_threads() {
        let mut s = ScriptState::new();
        let mut co = s.new_thread();
        s.push_integer(5);
        s.xmove(&mut co, 1).unwrap();
        assert_eq!(co.to_integer(-1), Some(5));
        assert_eq!(s.top(), 1);
        let mut other = ScriptState::new();
        assert!(co.xmove(&mut other, 1).is_err());
    }

    #[test]
    fn test_integer_arith_and_float_division() {
        let mut s = ScriptState::new();
        s.push_integer(7);
        s.push_integer(2);
        s.arith(ArithOp::Div).unwrap();
        assert_eq!(s.to_number(-1), Some(3.5));
        s.push_integer(-7);
        s.push_integer(3);
        s.arith(ArithOp::Mod).unwrap();
        assert_eq!(s.to_integer(-1), Some(2));
    }

    #[test]
    fn test_stack_overflow_is_caught_by_pcall() {
        let mut s = ScriptState::new();
        let f: Rc<RefCell<Option<FunctionRef>>> = Rc::new(RefCell::new(None));
        let inner = f.clone();
        let rec = FunctionRef::new(move |s| {
            let me = inner.borrow().clone();
            if let Some(me) = me {
                s.push_function(me);
                s.call(0, Some(0))?;
            }
            Ok(0)
        });
        *f.borrow_mut() = Some(rec.clone());
        s.push_function(rec);
        let err = s.pcall(0, Some(0), 0).unwrap_err();
        assert!(matches!(err, ScriptError::StackOverflow));
        assert_eq!(s.to_str(-1).as_deref(), Some("stack overflow"));
        *f.borrow_mut() = None;
    }

    #[test]
    fn test_line_hook_receives_lines() {
        use std::cell::Cell;
        let mut s = ScriptState::new();
        let last = Rc::new(Cell::new(0u32));
        let sink = last.clone();
        s.set_hook(
            Some(Rc::new(move |_s: &mut ScriptState, ev| {
                if let HookEvent::Line(l) = ev {
                    sink.set(l);
                }
                Ok(())
            })),
            HookMask::LINE,
        );
        s.push_function(FunctionRef::chunk("t.lua", |s| {
            s.set_line(3)?;
            Ok(0)
        }));
        s.call(0, Some(0)).unwrap();
        assert_eq!(last.get(), 3);
    }
}
