//! Host types the bridge itself exposes to scripts
//!
//! - `Tether.ScriptException`: the error object raised into scripts
//! - `Tether.EventRegistration`: what reading an event member yields
//! - `System.Type` instances returned by `ctype`

use std::sync::Arc;

use once_cell::sync::Lazy;
use tether_sdk::{
    types, EventInfo, HostError, HostObject, HostResult, HostValue, Invocation, MethodInfo,
    ParamInfo, PropertyInfo, ScriptRefKind, TypeBuilder, TypeRef,
};

use crate::error::ScriptException;
use crate::pool::pool;

fn exception(inv: &Invocation<'_>) -> HostResult<ScriptException> {
    inv.this::<ScriptException>().cloned()
}

static SCRIPT_EXCEPTION: Lazy<TypeRef> = Lazy::new(|| {
    TypeBuilder::class("Tether.ScriptException")
        .sealed()
        .property(
            PropertyInfo::new("Message", &types::string())
                .getter(|inv| Ok(exception(inv)?.message.into())),
        )
        .property(
            PropertyInfo::new("Source", &types::string())
                .getter(|inv| Ok(exception(inv)?.source.into())),
        )
        .property(
            PropertyInfo::new("IsHostException", &types::boolean())
                .getter(|inv| Ok(exception(inv)?.is_host_exception().into())),
        )
        .property(
            PropertyInfo::new("InnerMessage", &types::string()).getter(|inv| {
                let exc = exception(inv)?;
                Ok(exc
                    .inner
                    .as_ref()
                    .map(|h| match h.host_exception() {
                        Some(e) => e.root().message.clone(),
                        None => h.to_string(),
                    })
                    .into())
            }),
        )
        .method(
            MethodInfo::new("ToString", &types::string())
                .body(|inv| Ok(exception(inv)?.to_string().into())),
        )
        .build()
});

/// The `ScriptException` host type
pub fn script_exception_type() -> TypeRef {
    SCRIPT_EXCEPTION.clone()
}

/// Wrap an exception as a host object
pub fn exception_object(exc: ScriptException) -> HostValue {
    HostValue::Object(HostObject::new(exc, &SCRIPT_EXCEPTION))
}

/// Event member read from an object or type, waiting for `Add`/`Remove`
pub struct PendingRegistration {
    /// The event
    pub event: Arc<EventInfo>,
    /// Instance owning the event; `None` for static events
    pub target: Option<HostValue>,
}

fn registration(inv: &Invocation<'_>) -> HostResult<(Arc<EventInfo>, Option<HostValue>)> {
    let reg = inv.this::<PendingRegistration>()?;
    Ok((reg.event.clone(), reg.target.clone()))
}

fn handler_for(inv: &Invocation<'_>, event: &EventInfo) -> HostResult<HostObject> {
    match inv.arg(0)? {
        HostValue::Object(o) => Ok(o.clone()),
        HostValue::Script(r) if r.kind() == ScriptRefKind::Function => {
            let tr = pool()
                .find(inv.state.id())
                .ok_or_else(|| HostError::ArgumentError("no bridge attached".into()))?;
            tr.adapters().delegate_for(&event.handler_type, r.clone())
        }
        other => Err(HostError::mismatch(
            event.handler_type.full_name(),
            other.type_name(),
        )),
    }
}

static EVENT_REGISTRATION: Lazy<TypeRef> = Lazy::new(|| {
    TypeBuilder::class("Tether.EventRegistration")
        .sealed()
        .method(
            MethodInfo::new("Add", &types::object())
                .param(ParamInfo::new("handler", &types::object()))
                .body(|inv| {
                    let (event, target) = registration(inv)?;
                    let handler = handler_for(inv, &event)?;
                    (event.add)(target.as_ref(), handler.clone())?;
                    Ok(HostValue::Object(handler))
                }),
        )
        .method(
            MethodInfo::new("Remove", &types::void())
                .param(ParamInfo::new("handler", &types::object()))
                .body(|inv| {
                    let (event, target) = registration(inv)?;
                    match inv.arg(0)? {
                        HostValue::Object(o) => (event.remove)(target.as_ref(), o.clone())?,
                        other => {
                            return Err(HostError::mismatch(
                                event.handler_type.full_name(),
                                other.type_name(),
                            ))
                        }
                    }
                    Ok(HostValue::Null)
                }),
        )
        .build()
});

/// Registration object for `event` on `target`
pub fn event_registration(event: Arc<EventInfo>, target: Option<HostValue>) -> HostValue {
    HostValue::Object(HostObject::new(
        PendingRegistration { event, target },
        &EVENT_REGISTRATION,
    ))
}

fn described_type(inv: &Invocation<'_>) -> HostResult<TypeRef> {
    inv.this::<TypeRef>().cloned()
}

static TYPE_OBJECT: Lazy<TypeRef> = Lazy::new(|| {
    TypeBuilder::class("System.RuntimeType")
        .sealed()
        .property(
            PropertyInfo::new("FullName", &types::string())
                .getter(|inv| Ok(described_type(inv)?.full_name().into())),
        )
        .property(
            PropertyInfo::new("Name", &types::string())
                .getter(|inv| Ok(described_type(inv)?.name().into())),
        )
        .method(
            MethodInfo::new("ToString", &types::string())
                .body(|inv| Ok(described_type(inv)?.full_name().into())),
        )
        .build()
});

/// A type as an ordinary object, as opposed to a type proxy
pub fn type_object(ty: &TypeRef) -> HostValue {
    HostValue::Object(HostObject::new(ty.clone(), &TYPE_OBJECT))
}

/// The type described by a value produced by `type_object` or a type proxy
pub fn described(value: &HostValue) -> Option<TypeRef> {
    match value {
        HostValue::Type(t) => Some(t.clone()),
        HostValue::Object(o) => o.downcast::<TypeRef>().cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_script::ScriptState;
    use tether_sdk::HostException;

    #[test]
    fn test_exception_members() {
        let mut exc = ScriptException::new("bad call", "main:3: ");
        exc.inner = Some(HostError::Exception(
            HostException::new("Outer", "wrapped").with_inner(HostException::new("Io", "disk full")),
        ));
        let obj = exception_object(exc);
        let o = obj.as_object().unwrap();
        let mut state = ScriptState::new();
        let ty = script_exception_type();
        let get = |state: &mut ScriptState, name: &str| {
            let p = ty
                .members()
                .properties
                .iter()
                .find(|p| p.name == name)
                .cloned()
                .unwrap();
            let getter = p.getter.clone().unwrap();
            let mut inv = Invocation::new(state, Some(HostValue::Object(o.clone())), vec![]);
            getter(&mut inv).unwrap()
        };
        assert_eq!(get(&mut state, "Message").as_str(), Some("bad call"));
        assert_eq!(get(&mut state, "IsHostException").as_bool(), Some(true));
        assert_eq!(get(&mut state, "InnerMessage").as_str(), Some("disk full"));
    }

    #[test]
    fn test_type_object_describes_its_type() {
        let t = types::i32();
        let v = type_object(&t);
        assert_eq!(described(&v).unwrap().id(), t.id());
        assert_eq!(described(&HostValue::Type(t.clone())).unwrap().id(), t.id());
    }
}
