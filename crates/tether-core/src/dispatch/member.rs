//! Member access hooks (`__index`, `__newindex`)
//!
//! Instance lookup order for a read:
//! 1. integral key on an array: element access (0-based)
//! 2. cached or reflected member: instance, then implicit static, then
//!    extension methods
//! 3. `get_Item` indexer
//! 4. `TryGetValue` (associative containers; missing keys read as nil)
//! 5. the backing table of a script-implemented object
//!
//! Writes go to array elements, settable fields and properties, then
//! `set_Item`. Values assigned to fields, properties and elements must
//! convert to the declared type; there is no silent default.

use tether_script::{ScriptState, ScriptType, Value};
use tether_sdk::{Binding, HostValue, Invocation, TypeRef};

use super::{push_thunk, wrapped};
use crate::adapter::adapter_instance;
use crate::builtin;
use crate::cache::CachedMember;
use crate::coercion::{check_and_extract, extract};
use crate::error::{BridgeError, FaultResult};
use crate::resolver::resolve;
use crate::translator::{Translator, WrapperKind};

fn lookup(tr: &Translator, ty: &TypeRef, name: &str, binding: Binding) -> CachedMember {
    tr.members()
        .lookup(ty, name, binding, tr.options().expose_non_public, tr.catalog())
}

fn key_name(state: &ScriptState, idx: i32) -> Option<String> {
    match state.value_at(idx) {
        Value::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn unknown(ty: &TypeRef, state: &mut ScriptState, idx: i32) -> BridgeError {
    let member = match state.value_at(idx) {
        Value::String(s) => s.to_string(),
        _ => state.tostring(idx).unwrap_or_else(|_| "?".to_string()),
    };
    BridgeError::UnknownMember {
        type_name: ty.full_name().to_string(),
        member,
    }
}

/// Receiver for fields and properties: the base object of a class adapter,
/// since only methods are overridden by the script table
fn member_receiver(target: &HostValue) -> HostValue {
    match adapter_instance(target).and_then(|a| a.base()) {
        Some(base) => HostValue::Object(base.clone()),
        None => target.clone(),
    }
}

fn array_index(state: &ScriptState, idx: i32) -> Option<i64> {
    match state.type_at(idx) {
        ScriptType::Number => state.to_integer(idx),
        _ => None,
    }
}

/// Read a member value and push it; `Ok(false)` when `cached` is not readable
fn push_member(
    tr: &Translator,
    state: &mut ScriptState,
    ty: &TypeRef,
    name: &str,
    cached: CachedMember,
    target: Option<&HostValue>,
) -> FaultResult<bool> {
    match cached {
        CachedMember::Field(f) => {
            let receiver = if f.is_static { None } else { target.map(member_receiver) };
            let value = (f.getter)(receiver.as_ref())?;
            tr.push_value(state, &value)?;
        }
        CachedMember::Property(p) => {
            let getter = p.getter.clone().ok_or_else(|| BridgeError::WriteOnly {
                type_name: ty.full_name().to_string(),
                member: name.to_string(),
            })?;
            let receiver = if p.is_static { None } else { target.map(member_receiver) };
            let mut inv = Invocation::new(state, receiver, Vec::new());
            let value = getter(&mut inv)?;
            tr.push_value(state, &value)?;
        }
        CachedMember::Event(e) => {
            let owner = if e.is_static { None } else { target.cloned() };
            tr.push_value(state, &builtin::event_registration(e, owner))?;
        }
        CachedMember::Method(thunk) => push_thunk(state, thunk),
        CachedMember::NestedType(t) => tr.push_value(state, &HostValue::Type(t))?,
        CachedMember::Invalid(_) => return Ok(false),
    }
    Ok(true)
}

/// Run a one-overload-group method on `target` with the stack range
/// `first..=last` as arguments. `Ok(None)` when no overload fits.
fn call_shaped(
    tr: &Translator,
    state: &mut ScriptState,
    ty: &TypeRef,
    target: &HostValue,
    method: &str,
    first: i32,
    last: i32,
) -> FaultResult<Option<Vec<HostValue>>> {
    let CachedMember::Method(thunk) = lookup(tr, ty, method, Binding::Instance) else {
        return Ok(None);
    };
    let Some(plan) = resolve(tr, state, &thunk.candidates, first, last) else {
        return Ok(None);
    };
    let args = plan.materialize(tr, state)?;
    let invoked = plan.method.invoke(state, Some(target.clone()), args)?;
    let mut results = vec![invoked.ret];
    for i in &plan.out_indices {
        results.push(invoked.args.get(*i).cloned().unwrap_or_default());
    }
    Ok(Some(results))
}

// ============================================================================
// Instances
// ============================================================================

/// `__index` on an instance wrapper: `(object, key)`
pub(super) fn index_instance(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let target = wrapped(tr, state, 1, WrapperKind::Instance)?;
    let ty = target.runtime_type().unwrap_or_else(tether_sdk::types::object);

    if let HostValue::Array(a) = &target {
        if let Some(i) = array_index(state, 2) {
            let item = usize::try_from(i)
                .ok()
                .and_then(|i| a.get(i))
                .ok_or(BridgeError::IndexOutOfRange { index: i, len: a.len() })?;
            tr.push_value(state, &item)?;
            return Ok(1);
        }
    }

    if let Some(name) = key_name(state, 2) {
        let cached = lookup(tr, &ty, &name, Binding::Instance);
        if push_member(tr, state, &ty, &name, cached, Some(&target))? {
            return Ok(1);
        }
    }

    if let Some(results) = call_shaped(tr, state, &ty, &target, "get_Item", 2, 2)? {
        tr.push_value(state, &results[0])?;
        return Ok(1);
    }

    if let Some(results) = call_shaped(tr, state, &ty, &target, "TryGetValue", 2, 2)? {
        let found = results[0].as_bool().unwrap_or(false);
        let value = if found {
            results.get(1).cloned().unwrap_or_default()
        } else {
            HostValue::Null
        };
        tr.push_value(state, &value)?;
        return Ok(1);
    }

    if let Some(table) = adapter_instance(&target).and_then(|a| a.table()) {
        table.push(state)?;
        let t = state.value_at(-1);
        let key = state.value_at(2);
        state.pop(1);
        let value = state.index_value(t, key)?;
        if !value.is_nil() {
            state.push_value(value);
            return Ok(1);
        }
    }

    Err(unknown(&ty, state, 2).into())
}

/// `__newindex` on an instance wrapper: `(object, key, value)`
pub(super) fn newindex_instance(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let target = wrapped(tr, state, 1, WrapperKind::Instance)?;
    let ty = target.runtime_type().unwrap_or_else(tether_sdk::types::object);

    if let HostValue::Array(a) = &target {
        if let Some(i) = array_index(state, 2) {
            let element = a.element().clone();
            let value = convert(tr, state, 3, &element, "array element")?;
            let index = usize::try_from(i)
                .map_err(|_| BridgeError::IndexOutOfRange { index: i, len: a.len() })?;
            a.set(index, value)?;
            return Ok(0);
        }
    }

    if let Some(name) = key_name(state, 2) {
        let cached = lookup(tr, &ty, &name, Binding::Instance);
        if assign_member(tr, state, &ty, &name, cached, Some(&target))? {
            return Ok(0);
        }
    }

    if call_shaped(tr, state, &ty, &target, "set_Item", 2, 3)?.is_some() {
        return Ok(0);
    }
    Err(unknown(&ty, state, 2).into())
}

fn convert(
    tr: &Translator,
    state: &mut ScriptState,
    idx: i32,
    ty: &TypeRef,
    target: &str,
) -> FaultResult<HostValue> {
    match check_and_extract(tr, state, idx, ty) {
        Some(ex) => extract(tr, state, idx, &ex),
        None => Err(BridgeError::Coercion {
            target: target.to_string(),
            expected: ty.full_name().to_string(),
            found: state.type_at(idx).name().to_string(),
        }
        .into()),
    }
}

/// Assign the value at 3; `Ok(false)` when `cached` is not a member at all
fn assign_member(
    tr: &Translator,
    state: &mut ScriptState,
    ty: &TypeRef,
    name: &str,
    cached: CachedMember,
    target: Option<&HostValue>,
) -> FaultResult<bool> {
    let read_only = || BridgeError::ReadOnly {
        type_name: ty.full_name().to_string(),
        member: name.to_string(),
    };
    match cached {
        CachedMember::Field(f) => {
            let setter = f.setter.clone().ok_or_else(read_only)?;
            let value = convert(tr, state, 3, &f.ty, name)?;
            let receiver = if f.is_static { None } else { target.map(member_receiver) };
            setter(receiver.as_ref(), value)?;
        }
        CachedMember::Property(p) => {
            let setter = p.setter.clone().ok_or_else(read_only)?;
            let value = convert(tr, state, 3, &p.ty, name)?;
            let receiver = if p.is_static { None } else { target.map(member_receiver) };
            let mut inv = Invocation::new(state, receiver, vec![value]);
            setter(&mut inv)?;
        }
        CachedMember::Event(_) | CachedMember::Method(_) | CachedMember::NestedType(_) => {
            return Err(read_only().into())
        }
        CachedMember::Invalid(_) => return Ok(false),
    }
    Ok(true)
}

// ============================================================================
// Type proxies
// ============================================================================

fn proxied_type(tr: &Translator, state: &ScriptState) -> FaultResult<TypeRef> {
    match wrapped(tr, state, 1, WrapperKind::Type)? {
        HostValue::Type(t) => Ok(t),
        other => Err(BridgeError::NotCallable {
            type_name: other.type_name(),
        }
        .into()),
    }
}

/// `__index` on a type proxy: `(proxy, key)`
pub(super) fn index_static(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let ty = proxied_type(tr, state)?;
    let Some(name) = key_name(state, 2) else {
        return Err(unknown(&ty, state, 2).into());
    };
    if let Some(value) = ty.variant_value(&name) {
        let v = HostValue::Enum(tether_sdk::EnumValue {
            ty: ty.clone(),
            value,
        });
        tr.push_value(state, &v)?;
        return Ok(1);
    }
    let cached = lookup(tr, &ty, &name, Binding::Static);
    if push_member(tr, state, &ty, &name, cached, None)? {
        return Ok(1);
    }
    Err(unknown(&ty, state, 2).into())
}

/// `__newindex` on a type proxy: `(proxy, key, value)`
pub(super) fn newindex_static(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let ty = proxied_type(tr, state)?;
    if let Some(name) = key_name(state, 2) {
        let cached = lookup(tr, &ty, &name, Binding::Static);
        if assign_member(tr, state, &ty, &name, cached, None)? {
            return Ok(0);
        }
    }
    Err(unknown(&ty, state, 2).into())
}
