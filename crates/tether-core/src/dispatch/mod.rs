//! Dispatch protocol
//!
//! Metamethods of the two wrapper metatables:
//! - `tether.object` for instances (objects, arrays, enum values)
//! - `tether.type` for type proxies
//!
//! Each hook recovers the owning `Translator` from the pool, unpins script
//! references the host dropped since the last call, runs, and turns any
//! failure into a script error through `Translator::raise`. Hooks only
//! touch the stack above their own arguments and never leave extra values
//! behind, so they are safe to re-enter from nested host or script calls.

mod call;
mod member;
mod operators;

pub(crate) use call::{push_results, push_thunk};

use tether_script::{FunctionRef, ScriptResult, ScriptState, Value};
use tether_sdk::HostValue;

use crate::error::{BridgeError, FaultResult};
use crate::pool::pool;
use crate::translator::{Translator, WrapperKind, OBJECT_META, TYPE_META};

type Hook = fn(&Translator, &mut ScriptState) -> FaultResult<usize>;

/// Run a dispatch operation against the translator that owns `state`
pub(crate) fn run(
    state: &mut ScriptState,
    op: impl FnOnce(&Translator, &mut ScriptState) -> FaultResult<usize>,
) -> ScriptResult<usize> {
    let Some(tr) = pool().find(state.id()) else {
        return Err(state.error_message(&BridgeError::Detached(state.id().to_string()).to_string()));
    };
    tr.drain_releases(state);
    op(&tr, state).map_err(|fault| tr.raise(state, fault))
}

fn hook(name: &str, f: Hook) -> Value {
    Value::Function(FunctionRef::named(name, move |s| run(s, f)))
}

/// Create the wrapper metatables, once per interpreter
pub fn install_metatables(state: &mut ScriptState) -> FaultResult<()> {
    if state.new_metatable(OBJECT_META) {
        if let Value::Table(mt) = state.value_at(-1) {
            let entries: [(&str, Hook); 15] = [
                ("__index", member::index_instance),
                ("__newindex", member::newindex_instance),
                ("__call", call::call_object),
                ("__gc", finalize),
                ("__tostring", call::tostring_instance),
                ("__len", operators::length),
                ("__eq", operators::eq),
                ("__lt", operators::lt),
                ("__le", operators::le),
                ("__add", operators::add),
                ("__sub", operators::sub),
                ("__mul", operators::mul),
                ("__div", operators::div),
                ("__mod", operators::modulo),
                ("__unm", operators::unm),
            ];
            for (name, f) in entries {
                mt.raw_set(Value::from(name), hook(name, f));
            }
        }
    }
    state.pop(1);

    if state.new_metatable(TYPE_META) {
        if let Value::Table(mt) = state.value_at(-1) {
            let entries: [(&str, Hook); 5] = [
                ("__index", member::index_static),
                ("__newindex", member::newindex_static),
                ("__call", call::construct),
                ("__gc", finalize),
                ("__tostring", tostring_type),
            ];
            for (name, f) in entries {
                mt.raw_set(Value::from(name), hook(name, f));
            }
        }
    }
    state.pop(1);
    Ok(())
}

/// `__gc`: the script no longer references the wrapper
fn finalize(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    if let Some(w) = tr.wrapper_at(state, 1) {
        tr.retire(w.handle);
    }
    Ok(0)
}

fn tostring_type(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let text = match tr.object_at(state, 1)? {
        Some(HostValue::Type(t)) => format!("ProxyType({})", t.full_name()),
        _ => "ProxyType(?)".to_string(),
    };
    state.push_string(&text);
    Ok(1)
}

/// Host value behind the wrapper at `idx`, which must be of `kind`
pub(crate) fn wrapped(
    tr: &Translator,
    state: &ScriptState,
    idx: i32,
    kind: WrapperKind,
) -> FaultResult<HostValue> {
    match tr.wrapper_at(state, idx) {
        Some(w) if w.kind == kind => tr.resolve(w.handle),
        _ => Err(BridgeError::NotCallable {
            type_name: state.type_at(idx).name().to_string(),
        }
        .into()),
    }
}
