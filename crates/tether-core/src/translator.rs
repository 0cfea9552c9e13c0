//! Per-interpreter engine context
//!
//! A `Translator` owns everything one interpreter instance needs on the host
//! side: the object registry, the member and extractor caches, the adapter
//! generator and the release queue of host-held script references. It moves
//! values across the boundary in both directions and is the single place
//! failures are raised into the script.
//!
//! Script-side wrappers are userdata holding a `Wrapper` (handle plus kind).
//! A weak-valued table maps handle index to the live wrapper, so the same
//! host object pushed twice yields the same script value.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tether_script::{RegistryKey, ScriptError, ScriptState, StateId, TableRef, Value};
use tether_sdk::{
    HostTypeId, HostValue, ReleaseQueue, ScriptRef, ScriptRefKind, TypeCatalog,
};

use crate::adapter::AdapterGenerator;
use crate::builtin;
use crate::cache::MemberCache;
use crate::coercion::Extractor;
use crate::config::BridgeOptions;
use crate::error::{BridgeError, Fault, FaultResult, ScriptException};
use crate::logging;
use crate::registry::{ObjectHandle, ObjectRegistry};

/// Metatable of host instance wrappers
pub const OBJECT_META: &str = "tether.object";

/// Metatable of type proxies
pub const TYPE_META: &str = "tether.type";

/// What a wrapper userdata stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    /// An object, array or enum value
    Instance,
    /// A type proxy
    Type,
}

/// Payload of every wrapper userdata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrapper {
    /// Registry handle
    pub handle: ObjectHandle,
    /// Wrapper kind
    pub kind: WrapperKind,
}

/// Engine state of one interpreter instance
pub struct Translator {
    state_id: StateId,
    options: BridgeOptions,
    catalog: Arc<TypeCatalog>,
    registry: Mutex<ObjectRegistry>,
    members: MemberCache,
    pub(crate) extractors: DashMap<HostTypeId, Extractor>,
    adapters: AdapterGenerator,
    releases: Arc<ReleaseQueue>,
    wrappers: OnceCell<RegistryKey>,
}

impl Translator {
    /// Create the context for the interpreter `state_id`
    pub fn new(state_id: StateId, options: BridgeOptions, catalog: Arc<TypeCatalog>) -> Self {
        let registry = ObjectRegistry::new(options.reuse_handles);
        Self {
            state_id,
            options,
            catalog,
            registry: Mutex::new(registry),
            members: MemberCache::new(),
            extractors: DashMap::new(),
            adapters: AdapterGenerator::new(),
            releases: ReleaseQueue::new(state_id),
            wrappers: OnceCell::new(),
        }
    }

    /// Interpreter this context belongs to
    pub fn state_id(&self) -> StateId {
        self.state_id
    }

    /// Options
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Types and extension methods visible to scripts
    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    /// Member cache
    pub fn members(&self) -> &MemberCache {
        &self.members
    }

    /// Adapter generator
    pub fn adapters(&self) -> &AdapterGenerator {
        &self.adapters
    }

    /// Queue of script references dropped by host code
    pub fn releases(&self) -> &Arc<ReleaseQueue> {
        &self.releases
    }

    /// Number of live object handles
    pub fn live_handles(&self) -> usize {
        self.registry.lock().len()
    }

    /// Create the wrapper table and the wrapper metatables
    pub fn install(&self, state: &mut ScriptState) -> FaultResult<()> {
        if self.wrappers.get().is_none() {
            let table = state.new_table();
            let mode = TableRef::new();
            mode.raw_set(Value::from("__mode"), Value::from("v"));
            table.set_metatable(Some(mode));
            let key = state.reference();
            if self.wrappers.set(key).is_err() {
                state.release_reference(key);
            }
        }
        crate::dispatch::install_metatables(state)?;
        Ok(())
    }

    /// Unpin script references whose host handles were dropped
    pub fn drain_releases(&self, state: &mut ScriptState) -> usize {
        self.releases.drain_into(state)
    }

    // ========================================================================
    // Host -> script
    // ========================================================================

    /// Push a host value
    pub fn push_value(&self, state: &mut ScriptState, value: &HostValue) -> FaultResult<()> {
        match value {
            HostValue::Null => state.push_nil(),
            HostValue::Bool(b) => state.push_boolean(*b),
            HostValue::Char(c) => state.push_integer(*c as i64),
            HostValue::F32(v) => state.push_number(*v as f64),
            HostValue::F64(v) => state.push_number(*v),
            HostValue::U64(v) => match i64::try_from(*v) {
                Ok(i) => state.push_integer(i),
                Err(_) => state.push_number(*v as f64),
            },
            HostValue::Str(s) => state.push_string(s),
            HostValue::Script(r) => {
                if r.state_id() != self.state_id {
                    return Err(BridgeError::ForeignReference.into());
                }
                r.push(state)?;
            }
            HostValue::Type(_) => self.push_wrapper(state, value.clone(), WrapperKind::Type)?,
            HostValue::Enum(_) | HostValue::Object(_) | HostValue::Array(_) => {
                self.push_wrapper(state, value.clone(), WrapperKind::Instance)?
            }
            other => match other.as_i64() {
                Some(i) => state.push_integer(i),
                None => state.push_nil(),
            },
        }
        Ok(())
    }

    fn wrapper_table(&self, state: &ScriptState) -> FaultResult<TableRef> {
        let key = self
            .wrappers
            .get()
            .ok_or_else(|| BridgeError::Detached(self.state_id.to_string()))?;
        match state.reference_value(*key) {
            Value::Table(t) => Ok(t),
            _ => Err(BridgeError::Detached(self.state_id.to_string()).into()),
        }
    }

    fn push_wrapper(
        &self,
        state: &mut ScriptState,
        value: HostValue,
        kind: WrapperKind,
    ) -> FaultResult<()> {
        let wrappers = self.wrapper_table(state)?;
        let handle = {
            let mut registry = self.registry.lock();
            match registry.is_interned(&value) {
                Some(existing) => {
                    let slot = Value::Integer(existing.index() as i64);
                    if let Value::UserData(ud) = wrappers.raw_get(&slot) {
                        if ud.with_payload(|w: &Wrapper| w.handle == existing) == Some(true) {
                            drop(registry);
                            state.push_value(Value::UserData(ud));
                            return Ok(());
                        }
                    }
                    // wrapper collected but not yet finalized
                    registry.retire(existing);
                    registry.intern(value)
                }
                None => registry.intern(value),
            }
        };

        let meta = match kind {
            WrapperKind::Instance => OBJECT_META,
            WrapperKind::Type => TYPE_META,
        };
        let ud = state.new_userdata(Wrapper { handle, kind });
        if let Some(mt) = state.named_metatable(meta) {
            ud.set_metatable(Some(mt));
        }
        wrappers.raw_set(
            Value::Integer(handle.index() as i64),
            Value::UserData(ud),
        );
        Ok(())
    }

    // ========================================================================
    // Script -> host
    // ========================================================================

    /// Wrapper payload of the value at `idx`, if it is one of ours
    pub fn wrapper_at(&self, state: &ScriptState, idx: i32) -> Option<Wrapper> {
        state.userdata_payload::<Wrapper>(idx)
    }

    /// Host value behind a handle
    pub fn resolve(&self, handle: ObjectHandle) -> FaultResult<HostValue> {
        self.registry
            .lock()
            .resolve(handle)
            .cloned()
            .ok_or_else(|| BridgeError::StaleHandle(handle.to_string()).into())
    }

    /// Host value wrapped by the userdata at `idx`; `None` if it is not ours
    pub fn object_at(&self, state: &ScriptState, idx: i32) -> FaultResult<Option<HostValue>> {
        match self.wrapper_at(state, idx) {
            Some(w) => self.resolve(w.handle).map(Some),
            None => Ok(None),
        }
    }

    /// Retire a handle; used by the finalizer hook
    pub fn retire(&self, handle: ObjectHandle) -> bool {
        self.registry.lock().retire(handle)
    }

    /// Pin the value at `idx` and return a host handle to it
    pub fn pin(&self, state: &mut ScriptState, idx: i32, kind: ScriptRefKind) -> ScriptRef {
        state.push_copy(idx);
        let key = state.reference();
        ScriptRef::new(key, kind, &self.releases)
    }

    /// Untyped conversion of the value at `idx`
    pub fn to_host(&self, state: &mut ScriptState, idx: i32) -> FaultResult<HostValue> {
        Ok(match state.value_at(idx) {
            Value::Nil => HostValue::Null,
            Value::Boolean(b) => HostValue::Bool(b),
            Value::Integer(i) => HostValue::F64(i as f64),
            Value::Number(n) => HostValue::F64(n),
            Value::String(s) => HostValue::Str(Arc::from(&*s)),
            Value::Table(_) => HostValue::Script(self.pin(state, idx, ScriptRefKind::Table)),
            Value::Function(_) => HostValue::Script(self.pin(state, idx, ScriptRefKind::Function)),
            Value::Thread(_) => HostValue::Script(self.pin(state, idx, ScriptRefKind::Thread)),
            Value::UserData(_) => match self.object_at(state, idx)? {
                Some(v) => v,
                None => HostValue::Script(self.pin(state, idx, ScriptRefKind::UserData)),
            },
            Value::LightUserData(p) => HostValue::U64(p as u64),
        })
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Turn a fault into the error the interpreter unwinds with.
    ///
    /// Errors already raised by the interpreter pass through untouched.
    /// Bridge failures become a `ScriptException` object carrying the
    /// call-site location and, for host failures, the original cause.
    pub fn raise(&self, state: &mut ScriptState, fault: Fault) -> ScriptError {
        let err = match fault {
            Fault::Unwind(e) => return e,
            Fault::Bridge(e) => e,
        };
        let source = state.where_(1);
        let (message, inner) = match err {
            BridgeError::Host(h) => (h.to_string(), Some(h)),
            BridgeError::Script(exc) => {
                return self.raise_exception(state, exc);
            }
            other => (other.to_string(), None),
        };
        logging::log_raise(&message, &source);
        let traceback = self
            .options
            .use_traceback
            .then(|| state.traceback(None, 1));
        let exc = ScriptException {
            message,
            source,
            inner,
            traceback,
        };
        self.raise_exception(state, exc)
    }

    fn raise_exception(&self, state: &mut ScriptState, exc: ScriptException) -> ScriptError {
        let value = builtin::exception_object(exc.clone());
        match self.push_value(state, &value) {
            Ok(()) => state.error(),
            Err(_) => ScriptError::message(exc.to_string()),
        }
    }

    /// Read the error value at `idx` back as a `ScriptException`
    pub fn exception_at(&self, state: &mut ScriptState, idx: i32) -> ScriptException {
        if let Ok(Some(HostValue::Object(o))) = self.object_at(state, idx) {
            if let Some(exc) = o.downcast::<ScriptException>() {
                return exc.clone();
            }
        }
        let message = match state.value_at(idx) {
            Value::String(s) => s.to_string(),
            _ => state.tostring(idx).unwrap_or_else(|e| e.to_string()),
        };
        ScriptException::new(message, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_sdk::{types, HostObject, TypeBuilder};

    fn setup() -> (ScriptState, Translator) {
        let mut state = ScriptState::new();
        let tr = Translator::new(state.id(), BridgeOptions::default(), Arc::new(TypeCatalog::new()));
        tr.install(&mut state).unwrap();
        (state, tr)
    }

    #[test]
    fn test_same_object_yields_same_wrapper() {
        let (mut state, tr) = setup();
        let ty = TypeBuilder::class("Tr.Thing").build();
        let obj = HostValue::Object(HostObject::new(5i32, &ty));
        tr.push_value(&mut state, &obj).unwrap();
        tr.push_value(&mut state, &obj).unwrap();
        assert!(state.raw_equal(-1, -2));
        assert_eq!(tr.live_handles(), 1);
        let back = tr.to_host(&mut state, -1).unwrap();
        assert!(back.same(&obj));
    }

    #[test]
    fn test_dead_wrapper_gets_fresh_handle() {
        let (mut state, tr) = setup();
        let ty = TypeBuilder::class("Tr.Gone").build();
        let obj = HostValue::Object(HostObject::new(1u8, &ty));
        tr.push_value(&mut state, &obj).unwrap();
        let first = tr.wrapper_at(&state, -1).unwrap().handle;
        state.pop(1);

        tr.push_value(&mut state, &obj).unwrap();
        let second = tr.wrapper_at(&state, -1).unwrap().handle;
        assert_ne!(first, second);
        assert!(tr.resolve(first).is_err());
        assert!(tr.resolve(second).is_ok());
    }

    #[test]
    fn test_primitives_cross_as_script_values() {
        let (mut state, tr) = setup();
        tr.push_value(&mut state, &HostValue::Char('A')).unwrap();
        assert_eq!(state.to_integer(-1), Some(65));
        tr.push_value(&mut state, &HostValue::U64(u64::MAX)).unwrap();
        assert!(state.to_integer(-1).is_none());
        tr.push_value(&mut state, &"hi".into()).unwrap();
        assert_eq!(tr.to_host(&mut state, -1).unwrap().as_str(), Some("hi"));
        state.push_integer(7);
        assert_eq!(tr.to_host(&mut state, -1).unwrap().as_f64(), Some(7.0));
    }

    #[test]
    fn test_tables_are_pinned_and_released() {
        let (mut state, tr) = setup();
        state.new_table();
        let before = state.reference_count();
        let pinned = tr.to_host(&mut state, -1).unwrap();
        assert_eq!(state.reference_count(), before + 1);
        drop(pinned);
        assert_eq!(tr.drain_releases(&mut state), 1);
        assert_eq!(state.reference_count(), before);
    }

    #[test]
    fn test_raise_wraps_bridge_errors() {
        let (mut state, tr) = setup();
        let err = tr.raise(
            &mut state,
            Fault::Bridge(BridgeError::NotCallable {
                type_name: types::string().full_name().to_string(),
            }),
        );
        state.push_value(err.value());
        let exc = tr.exception_at(&mut state, -1);
        assert_eq!(exc.message, "System.String is not callable");
        assert!(!exc.is_host_exception());
    }
}
