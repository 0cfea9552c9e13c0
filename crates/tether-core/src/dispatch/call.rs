//! Method thunks, construction and delegate calls

use std::sync::Arc;

use tether_script::{FunctionRef, ScriptState, ScriptType};
use tether_sdk::{Binding, Delegate, HostValue, Invocation, TypeKind, TypeRef};

use super::{run, wrapped};
use crate::cache::{CachedMember, MethodThunk, ThunkBinding};
use crate::coercion::zero_value;
use crate::error::{BridgeError, FaultResult};
use crate::resolver::{resolve, MethodArgs};
use crate::translator::{Translator, WrapperKind};

/// Push a script function that calls the method group `thunk`
pub(crate) fn push_thunk(state: &mut ScriptState, thunk: Arc<MethodThunk>) {
    let name = thunk.name.clone();
    let f = FunctionRef::named(&name, move |s| run(s, |tr, s| invoke_thunk(tr, s, &thunk)));
    state.push_function(f);
}

/// Push the return value (unless void) followed by the ref and out values
pub(crate) fn push_results(
    tr: &Translator,
    state: &mut ScriptState,
    plan: &MethodArgs,
    ret: &HostValue,
    args: &[HostValue],
) -> FaultResult<usize> {
    let mut pushed = 0;
    if !plan.method.is_void() {
        tr.push_value(state, ret)?;
        pushed += 1;
    }
    for i in &plan.out_indices {
        tr.push_value(state, args.get(*i).unwrap_or(&HostValue::Null))?;
        pushed += 1;
    }
    Ok(pushed)
}

fn call_plan(
    tr: &Translator,
    state: &mut ScriptState,
    plan: MethodArgs,
    this: Option<HostValue>,
) -> FaultResult<usize> {
    let args = plan.materialize(tr, state)?;
    let invoked = plan.method.invoke(state, this, args)?;
    push_results(tr, state, &plan, &invoked.ret, &invoked.args)
}

fn receiver_at(
    tr: &Translator,
    state: &ScriptState,
    idx: i32,
    declaring: &TypeRef,
) -> Option<HostValue> {
    match tr.object_at(state, idx) {
        Ok(Some(v)) if !matches!(v, HostValue::Type(_)) && v.is_instance_of(declaring) => Some(v),
        _ => None,
    }
}

/// Call a method group with the arguments on the stack
fn invoke_thunk(
    tr: &Translator,
    state: &mut ScriptState,
    thunk: &MethodThunk,
) -> FaultResult<usize> {
    let top = state.top();
    let (this, first) = match (&thunk.bound, thunk.binding) {
        (Some(bound), _) => (Some(bound.clone()), 1),
        (None, ThunkBinding::Instance) => match receiver_at(tr, state, 1, &thunk.declaring) {
            Some(this) => (Some(this), 2),
            None => {
                return Err(BridgeError::MissingReceiver {
                    method: thunk.name.clone(),
                }
                .into())
            }
        },
        (None, ThunkBinding::ImplicitStatic) => {
            if top >= 1 && receiver_at(tr, state, 1, &thunk.declaring).is_some() {
                return Err(BridgeError::StaticThroughInstance {
                    method: thunk.name.clone(),
                }
                .into());
            }
            (None, 1)
        }
        (None, ThunkBinding::Static | ThunkBinding::Extension | ThunkBinding::Constructor) => {
            (None, 1)
        }
        (None, ThunkBinding::Invalid) => {
            return Err(BridgeError::UnknownMember {
                type_name: thunk.declaring.full_name().to_string(),
                member: thunk.name.clone(),
            }
            .into())
        }
    };

    match resolve(tr, state, &thunk.candidates, first, top) {
        Some(plan) => call_plan(tr, state, plan, this),
        None if thunk.binding == ThunkBinding::Constructor => Err(BridgeError::NoConstructor {
            type_name: thunk.declaring.full_name().to_string(),
        }
        .into()),
        None => Err(BridgeError::NoMatchingOverload {
            type_name: thunk.declaring.full_name().to_string(),
            method: thunk.name.clone(),
        }
        .into()),
    }
}

/// `__call` on a type proxy: `(proxy, args...)`
pub(super) fn construct(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let ty = match wrapped(tr, state, 1, WrapperKind::Type)? {
        HostValue::Type(t) => t,
        other => {
            return Err(BridgeError::NotCallable {
                type_name: other.type_name(),
            }
            .into())
        }
    };
    let top = state.top();

    match ty.kind() {
        TypeKind::Interface => {
            return Err(BridgeError::Abstract {
                type_name: ty.full_name().to_string(),
            }
            .into())
        }
        TypeKind::Delegate if top == 2 && state.type_at(2) == ScriptType::Function => {
            let value = tr.adapters().instantiate(tr, state, 2, &ty)?;
            tr.push_value(state, &value)?;
            return Ok(1);
        }
        _ if ty.is_abstract() => {
            return Err(BridgeError::Abstract {
                type_name: ty.full_name().to_string(),
            }
            .into())
        }
        _ => {}
    }

    let ctors = ty.constructors(tr.options().expose_non_public);
    if let Some(plan) = resolve(tr, state, &ctors, 2, top) {
        return call_plan(tr, state, plan, None);
    }
    if ty.is_value_type() && top == 1 {
        let value = zero_value(state, &ty)?;
        tr.push_value(state, &value)?;
        return Ok(1);
    }
    Err(BridgeError::NoConstructor {
        type_name: ty.full_name().to_string(),
    }
    .into())
}

/// `__call` on an instance: only delegates are callable
pub(super) fn call_object(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let target = wrapped(tr, state, 1, WrapperKind::Instance)?;
    let not_callable = || BridgeError::NotCallable {
        type_name: target.type_name(),
    };
    let object = target.as_object().ok_or_else(not_callable)?;
    let delegate = object.downcast::<Delegate>().ok_or_else(not_callable)?;
    let signature = object
        .ty()
        .delegate_signature()
        .cloned()
        .ok_or_else(not_callable)?;

    let top = state.top();
    let Some(plan) = resolve(tr, state, std::slice::from_ref(&signature), 2, top) else {
        return Err(BridgeError::NoMatchingOverload {
            type_name: object.ty().full_name().to_string(),
            method: "Invoke".to_string(),
        }
        .into());
    };
    let args = plan.materialize(tr, state)?;
    let mut inv = Invocation::new(state, None, args);
    let ret = delegate.invoke_with(&mut inv)?;
    let args = inv.args;
    push_results(tr, state, &plan, &ret, &args)
}

/// `__tostring` on an instance
pub(super) fn tostring_instance(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let target = wrapped(tr, state, 1, WrapperKind::Instance)?;
    let text = match &target {
        HostValue::Enum(e) => e.label(),
        _ => match custom_to_string(tr, state, &target)? {
            Some(text) => text,
            None => {
                let index = tr.wrapper_at(state, 1).map(|w| w.handle.index()).unwrap_or(0);
                format!("{}: {}", target.type_name(), index)
            }
        },
    };
    state.push_string(&text);
    Ok(1)
}

fn custom_to_string(
    tr: &Translator,
    state: &mut ScriptState,
    target: &HostValue,
) -> FaultResult<Option<String>> {
    let Some(ty) = target.runtime_type() else {
        return Ok(None);
    };
    let cached = tr.members().lookup(
        &ty,
        "ToString",
        Binding::Instance,
        tr.options().expose_non_public,
        tr.catalog(),
    );
    let CachedMember::Method(thunk) = cached else {
        return Ok(None);
    };
    if thunk.binding != ThunkBinding::Instance {
        return Ok(None);
    }
    let Some(method) = thunk.candidates.iter().find(|m| m.params.is_empty()) else {
        return Ok(None);
    };
    let invoked = method.invoke(state, Some(target.clone()), Vec::new())?;
    Ok(Some(invoked.ret.to_string()))
}
