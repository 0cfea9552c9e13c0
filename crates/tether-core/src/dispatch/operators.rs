//! Operator hooks
//!
//! Arithmetic and comparison metamethods look for the matching static
//! operator method (`op_Addition`, `op_LessThan`, ...) on the left operand's
//! type first, then on the right's. Equality falls back to identity, and
//! ordering falls back to enum values and `CompareTo`.

use tether_script::ScriptState;
use tether_sdk::{Binding, HostValue, TypeRef};

use super::push_results;
use crate::cache::{CachedMember, ThunkBinding};
use crate::error::{BridgeError, FaultResult};
use crate::resolver::resolve;
use crate::translator::Translator;

fn operator_method(op: &str) -> &'static str {
    match op {
        "__add" => "op_Addition",
        "__sub" => "op_Subtraction",
        "__mul" => "op_Multiply",
        "__div" => "op_Division",
        "__mod" => "op_Modulus",
        "__unm" => "op_UnaryNegation",
        "__eq" => "op_Equality",
        "__lt" => "op_LessThan",
        _ => "op_LessThanOrEqual",
    }
}

fn operand_type(tr: &Translator, state: &ScriptState, idx: i32) -> Option<TypeRef> {
    match tr.object_at(state, idx) {
        Ok(Some(HostValue::Type(_))) | Ok(None) | Err(_) => None,
        Ok(Some(v)) => v.runtime_type(),
    }
}

/// Try the operator method on each operand type; `Ok(None)` if none applies
fn overloaded(
    tr: &Translator,
    state: &mut ScriptState,
    op: &'static str,
    arity: i32,
) -> FaultResult<Option<usize>> {
    let method = operator_method(op);
    let mut seen: Option<TypeRef> = None;
    for idx in 1..=arity {
        let Some(ty) = operand_type(tr, state, idx) else {
            continue;
        };
        if seen.as_ref().map(|s| s.id()) == Some(ty.id()) {
            continue;
        }
        let cached = tr.members().lookup(
            &ty,
            method,
            Binding::Static,
            tr.options().expose_non_public,
            tr.catalog(),
        );
        if let CachedMember::Method(thunk) = cached {
            if thunk.binding == ThunkBinding::Static {
                if let Some(plan) = resolve(tr, state, &thunk.candidates, 1, arity) {
                    let args = plan.materialize(tr, state)?;
                    let invoked = plan.method.invoke(state, None, args)?;
                    return push_results(tr, state, &plan, &invoked.ret, &invoked.args).map(Some);
                }
            }
        }
        seen = Some(ty);
    }
    Ok(None)
}

fn unsupported(tr: &Translator, state: &ScriptState, op: &'static str) -> BridgeError {
    let type_name = operand_type(tr, state, 1)
        .or_else(|| operand_type(tr, state, 2))
        .map(|t| t.full_name().to_string())
        .unwrap_or_else(|| state.type_at(1).name().to_string());
    BridgeError::OperatorNotSupported { op, type_name }
}

fn binary(tr: &Translator, state: &mut ScriptState, op: &'static str) -> FaultResult<usize> {
    state.set_top(2);
    match overloaded(tr, state, op, 2)? {
        Some(n) => Ok(n),
        None => Err(unsupported(tr, state, op).into()),
    }
}

pub(super) fn add(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    binary(tr, state, "__add")
}

pub(super) fn sub(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    binary(tr, state, "__sub")
}

pub(super) fn mul(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    binary(tr, state, "__mul")
}

pub(super) fn div(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    binary(tr, state, "__div")
}

pub(super) fn modulo(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    binary(tr, state, "__mod")
}

/// `__unm` receives the operand twice
pub(super) fn unm(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    state.set_top(1);
    match overloaded(tr, state, "__unm", 1)? {
        Some(n) => Ok(n),
        None => Err(unsupported(tr, state, "__unm").into()),
    }
}

/// Pop the results of an operator method, keeping the truth of the first
fn truthy(state: &mut ScriptState, n: usize) -> bool {
    if n == 0 {
        return false;
    }
    let value = state.value_at(-(n as i32)).is_truthy();
    state.pop(n);
    value
}

pub(super) fn eq(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    state.set_top(2);
    let result = match overloaded(tr, state, "__eq", 2)? {
        Some(n) => truthy(state, n),
        None => match (tr.object_at(state, 1)?, tr.object_at(state, 2)?) {
            (Some(a), Some(b)) => a.same(&b),
            _ => false,
        },
    };
    state.push_boolean(result);
    Ok(1)
}

/// Ordering without an operator method: same-type enum values, then `CompareTo`
fn ordering(tr: &Translator, state: &mut ScriptState, op: &'static str) -> FaultResult<bool> {
    let (Some(a), Some(b)) = (tr.object_at(state, 1)?, tr.object_at(state, 2)?) else {
        return Err(unsupported(tr, state, op).into());
    };
    let strict = op == "__lt";
    if let (HostValue::Enum(x), HostValue::Enum(y)) = (&a, &b) {
        if x.ty.id() == y.ty.id() {
            return Ok(if strict { x.value < y.value } else { x.value <= y.value });
        }
    }
    if let HostValue::Object(o) = &a {
        let has_compare = o.ty().ancestry().iter().any(|t| {
            t.members()
                .methods
                .iter()
                .any(|m| m.name == "CompareTo" && !m.is_static && m.params.len() == 1)
        });
        if has_compare {
            let c = o.call(state, "CompareTo", vec![b])?.as_i64().unwrap_or(0);
            return Ok(if strict { c < 0 } else { c <= 0 });
        }
    }
    Err(unsupported(tr, state, op).into())
}

fn compare(tr: &Translator, state: &mut ScriptState, op: &'static str) -> FaultResult<usize> {
    state.set_top(2);
    let result = match overloaded(tr, state, op, 2)? {
        Some(n) => truthy(state, n),
        None => ordering(tr, state, op)?,
    };
    state.push_boolean(result);
    Ok(1)
}

pub(super) fn lt(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    compare(tr, state, "__lt")
}

pub(super) fn le(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    compare(tr, state, "__le")
}

/// `__len`: array length
pub(super) fn length(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    match tr.object_at(state, 1)? {
        Some(HostValue::Array(a)) => {
            state.push_integer(a.len() as i64);
            Ok(1)
        }
        _ => Err(unsupported(tr, state, "__len").into()),
    }
}
