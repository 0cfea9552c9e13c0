//! Object registry
//!
//! Bidirectional map between host values that crossed into a script and the
//! small handles stored in their script-side wrappers.
//!
//! Handles are `{index, generation}` pairs into a slot arena. Retiring a
//! handle empties its slot and bumps the slot generation, so a stale handle
//! (say, from a wrapper finalized after its slot was reused) never resolves
//! to the slot's new occupant and retiring it again does nothing.
//!
//! The reverse map is keyed by reference identity for objects and arrays,
//! by value for enums and by type for type proxies. Structs are copied at
//! every crossing and are never looked up.

use rustc_hash::FxHashMap;
use tether_sdk::{HostTypeId, HostValue, TypeKind};

use crate::logging;

/// How the handle's value is identified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Shared reference: identity is the allocation
    Reference,
    /// Boxed value: enums collapse by value, structs never collapse
    BoxedValue,
}

/// Script-side stand-in for a host value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    index: u32,
    generation: u32,
    kind: HandleKind,
}

impl ObjectHandle {
    /// Slot number
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at allocation time
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Identity rule used for the value
    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IdentityKey {
    Ref(usize),
    Enum(HostTypeId, i64),
    Type(HostTypeId),
}

fn identity_of(value: &HostValue) -> (HandleKind, Option<IdentityKey>) {
    match value {
        HostValue::Object(o) if o.ty().kind() == TypeKind::Struct => (HandleKind::BoxedValue, None),
        HostValue::Object(o) => (HandleKind::Reference, Some(IdentityKey::Ref(o.identity()))),
        HostValue::Array(a) => (HandleKind::Reference, Some(IdentityKey::Ref(a.identity()))),
        HostValue::Enum(e) => (
            HandleKind::BoxedValue,
            Some(IdentityKey::Enum(e.ty.id(), e.value)),
        ),
        HostValue::Type(t) => (HandleKind::Reference, Some(IdentityKey::Type(t.id()))),
        _ => (HandleKind::BoxedValue, None),
    }
}

struct Slot {
    value: Option<HostValue>,
    key: Option<IdentityKey>,
    generation: u32,
}

/// Handle arena plus reverse identity map
pub struct ObjectRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    back: FxHashMap<IdentityKey, ObjectHandle>,
    reuse: bool,
}

impl ObjectRegistry {
    /// Create an empty registry; `reuse` recycles retired slots
    pub fn new(reuse: bool) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            back: FxHashMap::default(),
            reuse,
        }
    }

    /// Handle for `value`, allocating one unless it is already interned
    pub fn intern(&mut self, value: HostValue) -> ObjectHandle {
        let (kind, key) = identity_of(&value);
        if let Some(existing) = key.and_then(|k| self.back.get(&k)) {
            return *existing;
        }
        let type_name = value.type_name();
        let (index, generation) = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = Some(value);
                slot.key = key;
                (index, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    value: Some(value),
                    key,
                    generation: 0,
                });
                ((self.slots.len() - 1) as u32, 0)
            }
        };
        let handle = ObjectHandle {
            index,
            generation,
            kind,
        };
        if let Some(k) = key {
            self.back.insert(k, handle);
        }
        logging::log_intern(index, generation, &type_name);
        handle
    }

    /// Existing handle for `value`, without allocating
    pub fn is_interned(&self, value: &HostValue) -> Option<ObjectHandle> {
        let (_, key) = identity_of(value);
        key.and_then(|k| self.back.get(&k).copied())
    }

    /// Value behind a live handle
    pub fn resolve(&self, handle: ObjectHandle) -> Option<&HostValue> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Remove both map entries. Returns false for a handle already retired.
    pub fn retire(&mut self, handle: ObjectHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return false;
        };
        if slot.generation != handle.generation || slot.value.is_none() {
            return false;
        }
        slot.value = None;
        if let Some(k) = slot.key.take() {
            if self.back.get(&k) == Some(&handle) {
                self.back.remove(&k);
            }
        }
        slot.generation = slot.generation.wrapping_add(1);
        if self.reuse {
            self.free.push(handle.index);
        }
        logging::log_retire(handle.index, handle.generation);
        true
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    /// True when nothing is interned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_sdk::{types, EnumValue, HostObject, TypeBuilder};

    fn class() -> tether_sdk::TypeRef {
        TypeBuilder::class("Reg.Thing").build()
    }

    #[test]
    fn test_intern_is_stable_for_same_reference() {
        let ty = class();
        let obj = HostValue::Object(HostObject::new(1u8, &ty));
        let mut reg = ObjectRegistry::new(true);
        let a = reg.intern(obj.clone());
        let b = reg.intern(obj.clone());
        assert_eq!(a, b);
        assert_eq!(reg.is_interned(&obj), Some(a));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_distinct_references_get_distinct_handles() {
        let ty = class();
        let mut reg = ObjectRegistry::new(true);
        let a = reg.intern(HostValue::Object(HostObject::new(1u8, &ty)));
        let b = reg.intern(HostValue::Object(HostObject::new(1u8, &ty)));
        assert_ne!(a, b);
    }

    #[test]
    fn test_enums_collapse_by_value_structs_never() {
        let color = TypeBuilder::enumeration("Reg.Color").variant("Red", 1).build();
        let point = TypeBuilder::structure("Reg.Point").build();
        let mut reg = ObjectRegistry::new(true);
        let e1 = reg.intern(HostValue::Enum(EnumValue { ty: color.clone(), value: 1 }));
        let e2 = reg.intern(HostValue::Enum(EnumValue { ty: color, value: 1 }));
        assert_eq!(e1, e2);
        assert_eq!(e1.kind(), HandleKind::BoxedValue);

        let p = HostValue::Object(HostObject::new((), &point));
        let s1 = reg.intern(p.clone());
        let s2 = reg.intern(p.clone());
        assert_ne!(s1, s2);
        assert_eq!(reg.is_interned(&p), None);
    }

    #[test]
    fn test_retire_is_idempotent_and_stale_handles_never_resolve() {
        let ty = class();
        let mut reg = ObjectRegistry::new(true);
        let old_obj = HostValue::Object(HostObject::new(1u8, &ty));
        let old = reg.intern(old_obj.clone());
        assert!(reg.retire(old));
        assert!(!reg.retire(old));
        assert!(reg.resolve(old).is_none());
        assert_eq!(reg.is_interned(&old_obj), None);

        let new_obj = HostValue::Object(HostObject::new(2u8, &ty));
        let new = reg.intern(new_obj);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(reg.resolve(old).is_none());
        assert!(!reg.retire(old));
        assert!(reg.resolve(new).is_some());
    }

    #[test]
    fn test_no_reuse_allocates_fresh_slots() {
        let mut reg = ObjectRegistry::new(false);
        let a = reg.intern(HostValue::Type(types::string()));
        reg.retire(a);
        let b = reg.intern(HostValue::Type(types::string()));
        assert_ne!(a.index(), b.index());
    }
}
