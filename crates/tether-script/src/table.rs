//! Associative table storage
//!
//! A table with a `__mode` metatable field containing `v` holds its
//! reference-typed values weakly; dead entries read as nil.

use std::rc::Weak;

use rustc_hash::FxHashMap;

use crate::value::{
    Function, FunctionRef, Key, TableRef, ThreadData, ThreadRef, UserData, UserDataRef, Value,
};

#[derive(Clone)]
enum Slot {
    Strong(Value),
    WeakTable(Weak<std::cell::RefCell<Table>>),
    WeakFunction(Weak<Function>),
    WeakUserData(Weak<UserData>),
    WeakThread(Weak<ThreadData>),
}

impl Slot {
    fn new(value: Value, weak: bool) -> Slot {
        if !weak {
            return Slot::Strong(value);
        }
        match value {
            Value::Table(t) => Slot::WeakTable(std::rc::Rc::downgrade(&t.0)),
            Value::Function(f) => Slot::WeakFunction(std::rc::Rc::downgrade(&f.0)),
            Value::UserData(u) => Slot::WeakUserData(std::rc::Rc::downgrade(&u.0)),
            Value::Thread(t) => Slot::WeakThread(std::rc::Rc::downgrade(&t.0)),
            other => Slot::Strong(other),
        }
    }

    fn load(&self) -> Value {
        match self {
            Slot::Strong(v) => v.clone(),
            Slot::WeakTable(w) => w.upgrade().map(|t| Value::Table(TableRef(t))).unwrap_or_default(),
            Slot::WeakFunction(w) => w
                .upgrade()
                .map(|f| Value::Function(FunctionRef(f)))
                .unwrap_or_default(),
            Slot::WeakUserData(w) => w
                .upgrade()
                .map(|u| Value::UserData(UserDataRef(u)))
                .unwrap_or_default(),
            Slot::WeakThread(w) => w
                .upgrade()
                .map(|t| Value::Thread(ThreadRef(t)))
                .unwrap_or_default(),
        }
    }
}

/// Table contents
pub struct Table {
    entries: FxHashMap<Key, Slot>,
    weak_values: bool,
    pub(crate) metatable: Option<TableRef>,
}

impl Table {
    pub(crate) fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            weak_values: false,
            metatable: None,
        }
    }

    pub(crate) fn get(&self, key: &Value) -> Value {
        Key::from_value(key)
            .and_then(|k| self.entries.get(&k).map(Slot::load))
            .unwrap_or_default()
    }

    pub(crate) fn set(&mut self, key: Value, value: Value) -> bool {
        let Some(key) = Key::from_value(&key) else {
            return false;
        };
        if value.is_nil() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, Slot::new(value, self.weak_values));
        }
        true
    }

    /// Smallest `n` such that `t[n] ~= nil` and `t[n+1] == nil`, or 0
    pub(crate) fn len(&self) -> usize {
        let mut n = 0i64;
        while !self.get(&Value::Integer(n + 1)).is_nil() {
            n += 1;
        }
        n as usize
    }

    pub(crate) fn pairs(&self) -> Vec<(Value, Value)> {
        self.entries
            .iter()
            .filter_map(|(k, slot)| {
                let v = slot.load();
                (!v.is_nil()).then(|| (k.to_value(), v))
            })
            .collect()
    }

    pub(crate) fn set_weak_values(&mut self, weak: bool) {
        if self.weak_values == weak {
            return;
        }
        self.weak_values = weak;
        for slot in self.entries.values_mut() {
            let value = slot.load();
            *slot = Slot::new(value, weak);
        }
        self.entries.retain(|_, slot| !slot.load().is_nil());
    }
}
