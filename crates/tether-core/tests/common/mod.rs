//! Shared fixtures for the bridge integration tests
//!
//! Scripts are native closures written against the stack API, registered
//! as globals and run through `Bridge::call_function`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use tether_core::Bridge;
use tether_script::{FunctionRef, ScriptResult, ScriptState, Value};
use tether_sdk::{
    types, EventInfo, FieldInfo, HostArray, HostError, HostEvent, HostObject, HostValue,
    MethodInfo, ParamInfo, PropertyInfo, TypeBuilder, TypeRef,
};

/// Register `body` as the global function `name`
pub fn script(
    bridge: &mut Bridge,
    name: &str,
    body: impl Fn(&mut ScriptState) -> ScriptResult<usize> + 'static,
) {
    let state = bridge.state_mut();
    state.push_function(FunctionRef::named(name, body));
    state.set_global(name).unwrap();
}

/// Push the value at a dotted global path
pub fn lookup(s: &mut ScriptState, path: &str) -> ScriptResult<()> {
    let mut parts = path.split('.');
    s.get_global(parts.next().unwrap_or_default())?;
    for part in parts {
        s.get_field(-1, part)?;
        s.remove(-2);
    }
    Ok(())
}

/// `obj:name(args...)` with the object at `obj`; leaves `nresults` values
pub fn method_call(
    s: &mut ScriptState,
    obj: i32,
    name: &str,
    args: &[Value],
    nresults: usize,
) -> ScriptResult<()> {
    let obj = s.abs_index(obj);
    s.get_field(obj, name)?;
    s.push_copy(obj);
    for a in args {
        s.push_value(a.clone());
    }
    s.call(args.len() + 1, Some(nresults))
}

/// Return everything the script left on its stack
pub fn all(s: &ScriptState) -> ScriptResult<usize> {
    Ok(s.top() as usize)
}

// ============================================================================
// Demo.Math: static methods with overloads, defaults, out and params
// ============================================================================

pub fn math_type() -> TypeRef {
    let int = types::i32();
    let string = types::string();
    TypeBuilder::class("Demo.Math")
        .method(
            MethodInfo::new("add", &int)
                .param(ParamInfo::new("a", &int))
                .param(ParamInfo::new("b", &int))
                .as_static()
                .body(|inv| Ok(HostValue::I32((inv.arg_i64(0)? + inv.arg_i64(1)?) as i32))),
        )
        .method(
            MethodInfo::new("f", &string)
                .param(ParamInfo::new("x", &int))
                .as_static()
                .body(|_| Ok("int".into())),
        )
        .method(
            MethodInfo::new("f", &string)
                .param(ParamInfo::new("x", &string))
                .as_static()
                .body(|_| Ok("string".into())),
        )
        .method(
            MethodInfo::new("g", &int)
                .param(ParamInfo::new("a", &int))
                .param(ParamInfo::new("b", &int).default(10i32))
                .as_static()
                .body(|inv| Ok(HostValue::I32((inv.arg_i64(0)? + inv.arg_i64(1)?) as i32))),
        )
        .method(
            MethodInfo::new("TryParse", &types::boolean())
                .param(ParamInfo::new("s", &string))
                .param(ParamInfo::new("value", &int).out())
                .as_static()
                .body(|inv| {
                    let parsed = inv.arg_str(0)?.and_then(|s| s.parse::<i32>().ok());
                    inv.set_arg(1, parsed.unwrap_or(0))?;
                    Ok(parsed.is_some().into())
                }),
        )
        .method(
            MethodInfo::new("Join", &string)
                .param(ParamInfo::new("sep", &string))
                .param(ParamInfo::new("parts", &string).params())
                .as_static()
                .body(|inv| {
                    let sep = inv.arg_str(0)?.unwrap_or_default().to_string();
                    let parts = inv
                        .arg(1)?
                        .as_array()
                        .map(|a| a.to_vec())
                        .unwrap_or_default();
                    let words: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                    Ok(words.join(&sep).into())
                }),
        )
        .method(
            MethodInfo::new("Fail", &types::void())
                .param(ParamInfo::new("message", &string))
                .as_static()
                .body(|inv| {
                    let message = inv.arg_str(0)?.unwrap_or_default().to_string();
                    Err(HostError::exception("System.InvalidOperationException", message))
                }),
        )
        .method(
            MethodInfo::new("Squares", &types::array_of(&int))
                .param(ParamInfo::new("n", &int))
                .as_static()
                .body(|inv| {
                    let n = inv.arg_i64(0)? as i32;
                    let items = (0..n).map(|i| HostValue::I32(i * i)).collect();
                    Ok(HostArray::new(&types::i32(), items).into())
                }),
        )
        .build()
}

// ============================================================================
// Demo.Counter: constructor, properties, fields, events, ToString
// ============================================================================

/// Payload of `Demo.Counter` instances
pub struct Counter {
    pub value: AtomicI64,
    pub changed: HostEvent,
}

pub fn changed_handler_type() -> TypeRef {
    TypeBuilder::delegate(
        "Demo.ChangedHandler",
        MethodInfo::new("Invoke", &types::void()).param(ParamInfo::new("value", &types::i64())),
    )
    .build()
}

fn counter_of(this: Option<&HostValue>) -> Result<&Counter, HostError> {
    this.and_then(HostValue::as_object)
        .and_then(|o| o.downcast::<Counter>())
        .ok_or_else(|| HostError::ArgumentError("not a counter".into()))
}

pub fn counter_type() -> TypeRef {
    let builder = TypeBuilder::class("Demo.Counter");
    let me = builder.ty();
    let ctor_ty = me.clone();
    let default_ty = me.clone();
    builder
        .constructor(
            MethodInfo::constructor(&me)
                .param(ParamInfo::new("start", &types::i64()))
                .body(move |inv| {
                    let counter = Counter {
                        value: AtomicI64::new(inv.arg_i64(0)?),
                        changed: HostEvent::new(),
                    };
                    Ok(HostObject::new(counter, &ctor_ty).into())
                }),
        )
        .constructor(MethodInfo::constructor(&me).body(move |_| {
            let counter = Counter {
                value: AtomicI64::new(0),
                changed: HostEvent::new(),
            };
            Ok(HostObject::new(counter, &default_ty).into())
        }))
        .method(
            MethodInfo::new("Increment", &types::i64())
                .param(ParamInfo::new("by", &types::i64()).default(1i64))
                .body(|inv| {
                    let by = inv.arg_i64(0)?;
                    let next = {
                        let counter = inv.this::<Counter>()?;
                        counter.value.fetch_add(by, Ordering::SeqCst) + by
                    };
                    let this = inv.this.clone();
                    if let Some(HostValue::Object(o)) = this {
                        if let Some(counter) = o.downcast::<Counter>() {
                            counter.changed.raise(inv.state, vec![HostValue::I64(next)])?;
                        }
                    }
                    Ok(HostValue::I64(next))
                }),
        )
        .method(
            MethodInfo::new("ToString", &types::string()).body(|inv| {
                let counter = inv.this::<Counter>()?;
                Ok(format!("Counter({})", counter.value.load(Ordering::SeqCst)).into())
            }),
        )
        .method(
            MethodInfo::new("Zero", &types::i64())
                .as_static()
                .body(|_| Ok(HostValue::I64(0))),
        )
        .property(
            PropertyInfo::new("Value", &types::i64())
                .getter(|inv| Ok(inv.this::<Counter>()?.value.load(Ordering::SeqCst).into()))
                .setter(|inv| {
                    let v = inv.arg_i64(0)?;
                    inv.this::<Counter>()?.value.store(v, Ordering::SeqCst);
                    Ok(HostValue::Null)
                }),
        )
        .field(FieldInfo::new("Double", &types::i64(), |this| {
            Ok((counter_of(this)?.value.load(Ordering::SeqCst) * 2).into())
        }))
        .event(EventInfo::backed_by::<Counter>(
            "Changed",
            &changed_handler_type(),
            |c| &c.changed,
        ))
        .build()
}

/// A counter instance created from host code
pub fn new_counter(ty: &TypeRef, start: i64) -> HostValue {
    HostObject::new(
        Counter {
            value: AtomicI64::new(start),
            changed: HostEvent::new(),
        },
        ty,
    )
    .into()
}

// ============================================================================
// Demo.Vec2: value type with operators
// ============================================================================

/// Payload of `Demo.Vec2`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

fn vec_arg(v: &HostValue) -> Result<Vec2, HostError> {
    v.as_object()
        .and_then(|o| o.downcast::<Vec2>())
        .copied()
        .ok_or_else(|| HostError::mismatch("Demo.Vec2", v.type_name()))
}

pub fn vec2_type() -> TypeRef {
    let builder = TypeBuilder::structure("Demo.Vec2");
    let me = builder.ty();
    let (ctor_ty, add_ty) = (me.clone(), me.clone());
    builder
        .constructor(
            MethodInfo::constructor(&me)
                .param(ParamInfo::new("x", &types::f64()))
                .param(ParamInfo::new("y", &types::f64()))
                .body(move |inv| {
                    let v = Vec2 {
                        x: inv.arg_f64(0)?,
                        y: inv.arg_f64(1)?,
                    };
                    Ok(HostObject::new(v, &ctor_ty).into())
                }),
        )
        .method(
            MethodInfo::new("op_Addition", &me)
                .param(ParamInfo::new("a", &me))
                .param(ParamInfo::new("b", &me))
                .as_static()
                .body(move |inv| {
                    let (a, b) = (vec_arg(inv.arg(0)?)?, vec_arg(inv.arg(1)?)?);
                    let sum = Vec2 {
                        x: a.x + b.x,
                        y: a.y + b.y,
                    };
                    Ok(HostObject::new(sum, &add_ty).into())
                }),
        )
        .method(
            MethodInfo::new("op_Equality", &types::boolean())
                .param(ParamInfo::new("a", &me))
                .param(ParamInfo::new("b", &me))
                .as_static()
                .body(|inv| Ok((vec_arg(inv.arg(0)?)? == vec_arg(inv.arg(1)?)?).into())),
        )
        .field(FieldInfo::new("X", &types::f64(), |this| {
            Ok(vec_arg(this.ok_or_else(|| HostError::ArgumentError("no receiver".into()))?)?
                .x
                .into())
        }))
        .build()
}

// ============================================================================
// Interfaces, delegates and classes scripts implement
// ============================================================================

pub fn doubler_type() -> TypeRef {
    TypeBuilder::interface("Demo.IDoubler")
        .method(MethodInfo::new("f", &types::i32()).param(ParamInfo::new("x", &types::i32())))
        .build()
}

/// `Demo.Runner.Apply(IDoubler target, int x)` calls `target.f(x)`
pub fn runner_type(doubler: &TypeRef) -> TypeRef {
    TypeBuilder::class("Demo.Runner")
        .method(
            MethodInfo::new("Apply", &types::i32())
                .param(ParamInfo::new("target", doubler))
                .param(ParamInfo::new("x", &types::i32()))
                .as_static()
                .body(|inv| {
                    let target = inv
                        .arg_object(0)?
                        .cloned()
                        .ok_or_else(|| HostError::ArgumentError("null target".into()))?;
                    let x = inv.arg(1)?.clone();
                    target.call(inv.state, "f", vec![x])
                }),
        )
        .build()
}

pub fn animal_type() -> TypeRef {
    let builder = TypeBuilder::class("Demo.Animal");
    let me = builder.ty();
    let ctor_ty = me.clone();
    builder
        .constructor(
            MethodInfo::constructor(&me)
                .body(move |_| Ok(HostObject::new((), &ctor_ty).into())),
        )
        .method(MethodInfo::new("Speak", &types::string()).body(|_| Ok("...".into())))
        .method(MethodInfo::new("Name", &types::string()).body(|_| Ok("animal".into())))
        .build()
}

pub fn color_type() -> TypeRef {
    TypeBuilder::enumeration("Demo.Color")
        .variant("Red", 1)
        .variant("Green", 2)
        .variant("Blue", 4)
        .build()
}

// ============================================================================
// Keyed containers: indexer and TryGetValue shapes
// ============================================================================

/// Payload of `Demo.Table` and `Demo.Registry`
#[derive(Default)]
pub struct Entries(pub Mutex<HashMap<String, i64>>);

fn entries_ctor(ty: &TypeRef, seed: &'static [(&'static str, i64)]) -> MethodInfo {
    let ctor_ty = ty.clone();
    MethodInfo::constructor(ty).body(move |_| {
        let entries = Entries::default();
        entries
            .0
            .lock()
            .extend(seed.iter().map(|(k, v)| (k.to_string(), *v)));
        Ok(HostObject::new(entries, &ctor_ty).into())
    })
}

/// String-keyed map reached through `get_Item`/`set_Item`, seeded with `k = 7`
pub fn table_type() -> TypeRef {
    let builder = TypeBuilder::class("Demo.Table");
    let me = builder.ty();
    builder
        .constructor(entries_ctor(&me, &[("k", 7)]))
        .method(
            MethodInfo::new("get_Item", &types::i64())
                .param(ParamInfo::new("key", &types::string()))
                .body(|inv| {
                    let key = inv.arg_str(0)?.unwrap_or_default().to_string();
                    let found = inv.this::<Entries>()?.0.lock().get(&key).copied();
                    found.map(HostValue::I64).ok_or_else(|| {
                        HostError::exception("System.Collections.Generic.KeyNotFoundException", key)
                    })
                }),
        )
        .method(
            MethodInfo::new("set_Item", &types::void())
                .param(ParamInfo::new("key", &types::string()))
                .param(ParamInfo::new("value", &types::i64()))
                .body(|inv| {
                    let key = inv.arg_str(0)?.unwrap_or_default().to_string();
                    let value = inv.arg_i64(1)?;
                    inv.this::<Entries>()?.0.lock().insert(key, value);
                    Ok(HostValue::Null)
                }),
        )
        .build()
}

/// Map exposing only `TryGetValue`, seeded with `a = 5`
pub fn registry_type() -> TypeRef {
    let builder = TypeBuilder::class("Demo.Registry");
    let me = builder.ty();
    builder
        .constructor(entries_ctor(&me, &[("a", 5)]))
        .method(
            MethodInfo::new("TryGetValue", &types::boolean())
                .param(ParamInfo::new("key", &types::string()))
                .param(ParamInfo::new("value", &types::i64()).out())
                .body(|inv| {
                    let key = inv.arg_str(0)?.unwrap_or_default().to_string();
                    let found = inv.this::<Entries>()?.0.lock().get(&key).copied();
                    inv.set_arg(1, found.unwrap_or(0))?;
                    Ok(found.is_some().into())
                }),
        )
        .build()
}

/// A bridge with every fixture type registered
pub fn demo_bridge() -> Bridge {
    let mut bridge = Bridge::new().unwrap();
    let doubler = doubler_type();
    for ty in [
        math_type(),
        counter_type(),
        vec2_type(),
        runner_type(&doubler),
        doubler,
        animal_type(),
        color_type(),
        changed_handler_type(),
        table_type(),
        registry_type(),
        types::string(),
        types::i32(),
    ] {
        bridge.register_type(&ty).unwrap();
    }
    bridge
}
