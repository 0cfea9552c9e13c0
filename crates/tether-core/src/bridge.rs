//! Host-application facade
//!
//! A `Bridge` owns one interpreter and its translator. Creating it installs
//! the wrapper metatables (and, unless disabled, the helper table) and
//! registers the translator in the process-wide pool; dropping it removes
//! the registration.
//!
//! ```ignore
//! let mut bridge = Bridge::new()?;
//! bridge.register_type(&math)?;
//! bridge.set("config.limit", HostValue::I32(10))?;
//! let results = bridge.call_function("main", &[])?;
//! ```

use std::sync::Arc;

use tether_script::{GcStats, ScriptState, ScriptType, Value};
use tether_sdk::{types, HostValue, MethodInfo, TypeCatalog, TypeRef};

use crate::cache::{MethodThunk, ThunkBinding};
use crate::config::BridgeOptions;
use crate::dispatch::push_thunk;
use crate::error::{BridgeError, BridgeResult, Fault};
use crate::globals;
use crate::logging;
use crate::pool::pool;
use crate::translator::Translator;

/// One interpreter with the bridge installed
pub struct Bridge {
    state: ScriptState,
    translator: Arc<Translator>,
}

impl Bridge {
    /// Bridge with default options and an empty catalog
    pub fn new() -> BridgeResult<Self> {
        Self::with_options(BridgeOptions::default())
    }

    /// Bridge with `options` and an empty catalog
    pub fn with_options(options: BridgeOptions) -> BridgeResult<Self> {
        Self::with_catalog(options, Arc::new(TypeCatalog::new()))
    }

    /// Bridge sharing `catalog` with other bridges
    pub fn with_catalog(options: BridgeOptions, catalog: Arc<TypeCatalog>) -> BridgeResult<Self> {
        let state = ScriptState::new();
        let register_globals = options.register_globals;
        let table = options.globals_table.clone();
        let translator = Arc::new(Translator::new(state.id(), options, catalog));
        pool().add(translator.clone());

        let mut bridge = Self { state, translator };
        let installed = bridge
            .translator
            .install(&mut bridge.state)
            .and_then(|()| {
                if register_globals {
                    globals::install_globals(&mut bridge.state, &table)
                } else {
                    Ok(())
                }
            });
        if let Err(fault) = installed {
            return Err(bridge.fail(fault));
        }
        logging::log_attached(bridge.state.id().as_u64(), register_globals);
        Ok(bridge)
    }

    /// The interpreter
    pub fn state(&self) -> &ScriptState {
        &self.state
    }

    /// The interpreter, for pushing script functions and driving calls
    pub fn state_mut(&mut self) -> &mut ScriptState {
        &mut self.state
    }

    /// The translator of this interpreter
    pub fn translator(&self) -> &Arc<Translator> {
        &self.translator
    }

    fn fail(&mut self, fault: Fault) -> BridgeError {
        match fault {
            Fault::Bridge(e) => e,
            Fault::Unwind(e) => {
                self.state.push_value(e.value());
                let exc = self.translator.exception_at(&mut self.state, -1);
                self.state.pop(1);
                BridgeError::Script(exc)
            }
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Add `ty` to the catalog and expose its proxy under its full name
    pub fn register_type(&mut self, ty: &TypeRef) -> BridgeResult<()> {
        self.translator.catalog().register(ty);
        self.set(ty.full_name(), HostValue::Type(ty.clone()))
    }

    /// Expose a static host function at `path`
    pub fn register_function(&mut self, path: &str, method: MethodInfo) -> BridgeResult<()> {
        let name = method.name.clone();
        let thunk = MethodThunk::new(
            &name,
            &types::object(),
            vec![Arc::new(method.as_static())],
            ThunkBinding::Static,
        );
        push_thunk(&mut self.state, Arc::new(thunk));
        let function = self.state.pop_value();
        self.assign(path, function)
    }

    // ========================================================================
    // Paths
    // ========================================================================

    fn lookup(&mut self, path: &str) -> Result<Value, Fault> {
        let mut current = Value::Table(self.state.globals());
        let mut walked = String::new();
        for segment in path.split('.') {
            match current.type_of() {
                ScriptType::Table | ScriptType::UserData => {}
                ScriptType::Nil => return Ok(Value::Nil),
                _ => return Err(BridgeError::NotATable(walked).into()),
            }
            current = self.state.index_value(current, Value::from(segment))?;
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
        }
        Ok(current)
    }

    fn store(&mut self, path: &str, value: Value) -> Result<(), Fault> {
        let mut target = Value::Table(self.state.globals());
        let (parent, last) = match path.rsplit_once('.') {
            Some((parent, last)) => (parent, last),
            None => return Ok(self.state.newindex_value(target, Value::from(path), value)?),
        };
        let mut walked = String::new();
        for segment in parent.split('.') {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
            let mut next = self.state.index_value(target.clone(), Value::from(segment))?;
            if next.is_nil() {
                next = Value::Table(self.state.new_table());
                self.state.pop(1);
                self.state
                    .newindex_value(target.clone(), Value::from(segment), next.clone())?;
            }
            match next.type_of() {
                ScriptType::Table | ScriptType::UserData => target = next,
                _ => return Err(BridgeError::NotATable(walked).into()),
            }
        }
        Ok(self.state.newindex_value(target, Value::from(last), value)?)
    }

    fn assign(&mut self, path: &str, value: Value) -> BridgeResult<()> {
        self.translator.drain_releases(&mut self.state);
        self.store(path, value).map_err(|fault| self.fail(fault))
    }

    /// Value at a dotted global path; null when any part is missing
    pub fn get(&mut self, path: &str) -> BridgeResult<HostValue> {
        self.translator.drain_releases(&mut self.state);
        let value = match self.lookup(path) {
            Ok(v) => v,
            Err(fault) => return Err(self.fail(fault)),
        };
        self.state.push_value(value);
        self.pop()
    }

    /// Store `value` at a dotted global path, creating intermediate tables
    pub fn set(&mut self, path: &str, value: HostValue) -> BridgeResult<()> {
        self.push(&value)?;
        let value = self.state.pop_value();
        self.assign(path, value)
    }

    // ========================================================================
    // Stack
    // ========================================================================

    /// Push a host value onto the interpreter stack
    pub fn push(&mut self, value: &HostValue) -> BridgeResult<()> {
        if let Err(fault) = self.translator.push_value(&mut self.state, value) {
            return Err(self.fail(fault));
        }
        Ok(())
    }

    /// Pop the top of the stack as a host value
    pub fn pop(&mut self) -> BridgeResult<HostValue> {
        let converted = self.translator.to_host(&mut self.state, -1);
        self.state.pop(1);
        converted.map_err(|fault| self.fail(fault))
    }

    /// Call the function at `path` in protected mode and return its results
    pub fn call_function(&mut self, path: &str, args: &[HostValue]) -> BridgeResult<Vec<HostValue>> {
        self.translator.drain_releases(&mut self.state);
        let function = match self.lookup(path) {
            Ok(v) => v,
            Err(fault) => return Err(self.fail(fault)),
        };
        let base = self.state.top();
        self.state.push_value(function);
        for arg in args {
            if let Err(e) = self.push(arg) {
                self.state.set_top(base);
                return Err(e);
            }
        }
        if self.state.pcall(args.len(), None, 0).is_err() {
            let exc = self.translator.exception_at(&mut self.state, -1);
            self.state.set_top(base);
            return Err(BridgeError::Script(exc));
        }
        let mut results = Vec::new();
        for idx in base + 1..=self.state.top() {
            match self.translator.to_host(&mut self.state, idx) {
                Ok(v) => results.push(v),
                Err(fault) => {
                    self.state.set_top(base);
                    return Err(self.fail(fault));
                }
            }
        }
        self.state.set_top(base);
        Ok(results)
    }

    /// Run pending finalizers, after unpinning references the host dropped
    pub fn collect_garbage(&mut self) -> GcStats {
        self.translator.drain_releases(&mut self.state);
        self.state.collect_garbage()
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        pool().remove(self.state.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_sdk::{ParamInfo, TypeBuilder};

    #[test]
    fn test_dotted_set_creates_tables() {
        let mut bridge = Bridge::new().unwrap();
        bridge.set("a.b.c", HostValue::from("deep")).unwrap();
        assert_eq!(bridge.get("a.b.c").unwrap().as_str(), Some("deep"));
        assert!(bridge.get("a.x.y").unwrap().is_null());
        assert_eq!(bridge.state().top(), 0);
    }

    #[test]
    fn test_set_through_non_table_fails() {
        let mut bridge = Bridge::new().unwrap();
        bridge.set("n", HostValue::I32(1)).unwrap();
        assert!(matches!(
            bridge.set("n.x", HostValue::I32(2)),
            Err(BridgeError::NotATable(p)) if p == "n"
        ));
    }

    #[test]
    fn test_registered_function_is_callable() {
        let mut bridge = Bridge::new().unwrap();
        bridge
            .register_function(
                "util.twice",
                MethodInfo::new("twice", &types::i32())
                    .param(ParamInfo::new("x", &types::i32()))
                    .body(|inv| Ok(HostValue::I32(inv.arg_i64(0)? as i32 * 2))),
            )
            .unwrap();
        let out = bridge.call_function("util.twice", &[HostValue::I32(21)]).unwrap();
        assert_eq!(out[0].as_f64(), Some(42.0));
    }

    #[test]
    fn test_register_type_exposes_proxy() {
        let mut bridge = Bridge::new().unwrap();
        let ty = TypeBuilder::class("Facade.Widget").build();
        bridge.register_type(&ty).unwrap();
        match bridge.get("Facade.Widget").unwrap() {
            HostValue::Type(t) => assert_eq!(t.id(), ty.id()),
            other => panic!("expected a type, got {:?}", other),
        }
        assert!(bridge.translator().catalog().get("Facade.Widget").is_some());
    }

    #[test]
    fn test_pool_registration_follows_lifetime() {
        let bridge = Bridge::new().unwrap();
        let id = bridge.state().id();
        assert!(pool().find(id).is_some());
        drop(bridge);
        assert!(pool().find(id).is_none());
    }
}
