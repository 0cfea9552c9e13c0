//! Type coercion engine
//!
//! Converts script values at a stack position into host values of a given
//! static type. `extractor_for` picks the conversion from the target type
//! alone and is cached per type. `check_and_extract` also inspects the
//! actual value and returns `None` when no safe conversion exists; it is
//! the primitive the overload resolver tests parameters with.
//!
//! Policy:
//! - numeric targets take only numbers; integral targets only integral
//!   numbers that fit the target range
//! - string targets take only strings
//! - booleans, script tables, functions, userdata and threads need an exact
//!   type match
//! - nil converts to null for every target that accepts null, and fails
//!   for value types
//! - `object` and generic parameters use a fixed default per script type
//!   (number becomes `f64`)
//! - a table passed for an interface, or a function passed for a delegate,
//!   is adapted; so is a table already backing a host object through
//!   `make_object`

use tether_script::{ScriptState, ScriptType, Value};
use tether_sdk::{
    types, EnumValue, HostArray, HostObject, HostResult, HostValue, Primitive,
    ScriptRefKind, TypeKind, TypeRef,
};

use crate::adapter;
use crate::builtin;
use crate::error::{BridgeError, FaultResult};
use crate::translator::{Translator, WrapperKind};

/// Conversion from a script value to one host type
#[derive(Clone)]
pub enum Extractor {
    /// Nil to null
    Nil,
    /// Boolean
    Bool,
    /// Code point to `char`
    Char,
    /// Integral number to an integer primitive
    Integer(Primitive),
    /// Number to a floating point primitive
    Float(Primitive),
    /// String
    String,
    /// Default conversion by script type
    Generic,
    /// Pin a script value
    ScriptRef(ScriptRefKind),
    /// Wrapped host instance
    Host(TypeRef),
    /// Enum value, number or constant name
    Enum(TypeRef),
    /// Nil or the element conversion
    Nullable(Box<Extractor>),
    /// Type proxy or type object
    TypeObject,
    /// Host array or table of convertible elements
    Array(TypeRef),
    /// Table or function adapted to an interface or delegate
    Adapter(TypeRef),
}

/// Conversion for `ty`, ignoring the dynamic value. Cached per type.
pub fn extractor_for(tr: &Translator, ty: &TypeRef) -> Extractor {
    if let Some(hit) = tr.extractors.get(&ty.id()) {
        return hit.clone();
    }
    let ex = static_extractor(ty);
    tr.extractors.insert(ty.id(), ex.clone());
    ex
}

fn static_extractor(ty: &TypeRef) -> Extractor {
    match ty.kind() {
        TypeKind::Void => Extractor::Nil,
        TypeKind::Primitive(Primitive::Bool) => Extractor::Bool,
        TypeKind::Primitive(Primitive::Char) => Extractor::Char,
        TypeKind::Primitive(p) if p.is_integral() => Extractor::Integer(p),
        TypeKind::Primitive(p) => Extractor::Float(p),
        TypeKind::String => Extractor::String,
        TypeKind::Object | TypeKind::GenericParam => Extractor::Generic,
        TypeKind::ScriptTable => Extractor::ScriptRef(ScriptRefKind::Table),
        TypeKind::ScriptFunction => Extractor::ScriptRef(ScriptRefKind::Function),
        TypeKind::ScriptUserData => Extractor::ScriptRef(ScriptRefKind::UserData),
        TypeKind::ScriptThread => Extractor::ScriptRef(ScriptRefKind::Thread),
        TypeKind::TypeObject => Extractor::TypeObject,
        TypeKind::Enum => Extractor::Enum(ty.clone()),
        TypeKind::Array => Extractor::Array(ty.element().cloned().unwrap_or_else(types::object)),
        TypeKind::Nullable => Extractor::Nullable(Box::new(
            ty.element()
                .map(static_extractor)
                .unwrap_or(Extractor::Generic),
        )),
        TypeKind::Class | TypeKind::Struct | TypeKind::Interface | TypeKind::Delegate => {
            Extractor::Host(ty.clone())
        }
    }
}

fn fits(p: Primitive, v: i64) -> Option<HostValue> {
    Some(match p {
        Primitive::I8 => HostValue::I8(i8::try_from(v).ok()?),
        Primitive::I16 => HostValue::I16(i16::try_from(v).ok()?),
        Primitive::I32 => HostValue::I32(i32::try_from(v).ok()?),
        Primitive::I64 => HostValue::I64(v),
        Primitive::U8 => HostValue::U8(u8::try_from(v).ok()?),
        Primitive::U16 => HostValue::U16(u16::try_from(v).ok()?),
        Primitive::U32 => HostValue::U32(u32::try_from(v).ok()?),
        Primitive::U64 => HostValue::U64(u64::try_from(v).ok()?),
        _ => return None,
    })
}

fn is_char(ty: &TypeRef) -> bool {
    matches!(ty.kind(), TypeKind::Primitive(Primitive::Char))
}

fn ref_kind(t: ScriptType) -> Option<ScriptRefKind> {
    match t {
        ScriptType::Table => Some(ScriptRefKind::Table),
        ScriptType::Function => Some(ScriptRefKind::Function),
        ScriptType::UserData => Some(ScriptRefKind::UserData),
        ScriptType::Thread => Some(ScriptRefKind::Thread),
        _ => None,
    }
}

/// Conversion of the value at `idx` to `ty`, or `None` when it does not fit
pub fn check_and_extract(
    tr: &Translator,
    state: &mut ScriptState,
    idx: i32,
    ty: &TypeRef,
) -> Option<Extractor> {
    let idx = state.abs_index(idx);
    let value = state.value_at(idx);
    if value.is_nil() {
        return ty.accepts_null().then_some(Extractor::Nil);
    }
    match ty.kind() {
        TypeKind::Void => None,
        TypeKind::Primitive(Primitive::Bool) => {
            matches!(value, Value::Boolean(_)).then_some(Extractor::Bool)
        }
        TypeKind::Primitive(Primitive::Char) => value
            .as_integer()
            .and_then(|i| u32::try_from(i).ok())
            .and_then(char::from_u32)
            .map(|_| Extractor::Char),
        TypeKind::Primitive(p) if p.is_integral() => value
            .as_integer()
            .and_then(|i| fits(p, i))
            .map(|_| Extractor::Integer(p)),
        TypeKind::Primitive(p) => value.as_number().map(|_| Extractor::Float(p)),
        TypeKind::String => matches!(value, Value::String(_)).then_some(Extractor::String),
        TypeKind::Object | TypeKind::GenericParam => Some(Extractor::Generic),
        TypeKind::ScriptTable
        | TypeKind::ScriptFunction
        | TypeKind::ScriptUserData
        | TypeKind::ScriptThread => match (static_extractor(ty), ref_kind(value.type_of())) {
            (Extractor::ScriptRef(want), Some(got)) if want == got => {
                Some(Extractor::ScriptRef(want))
            }
            _ => None,
        },
        TypeKind::TypeObject => match tr.object_at(state, idx) {
            Ok(Some(v)) if builtin::described(&v).is_some() => Some(Extractor::TypeObject),
            _ => None,
        },
        TypeKind::Enum => match &value {
            Value::String(s) => ty.variant_value(s).map(|_| Extractor::Enum(ty.clone())),
            Value::Integer(_) | Value::Number(_) => {
                value.as_integer().map(|_| Extractor::Enum(ty.clone()))
            }
            _ => match tr.object_at(state, idx) {
                Ok(Some(HostValue::Enum(e))) if e.ty.id() == ty.id() => {
                    Some(Extractor::Enum(ty.clone()))
                }
                _ => None,
            },
        },
        TypeKind::Nullable => {
            let element = ty.element()?.clone();
            check_and_extract(tr, state, idx, &element).map(|ex| Extractor::Nullable(Box::new(ex)))
        }
        TypeKind::Array => {
            let element = ty.element()?.clone();
            match &value {
                Value::Table(t) => {
                    let len = t.raw_len();
                    let all = (1..=len as i64).all(|i| {
                        state.raw_get_index(idx, i);
                        let ok = check_and_extract(tr, state, -1, &element).is_some();
                        state.pop(1);
                        ok
                    });
                    all.then_some(Extractor::Array(element))
                }
                Value::String(_) if is_char(&element) => Some(Extractor::Array(element)),
                _ => match tr.object_at(state, idx) {
                    Ok(Some(v @ HostValue::Array(_))) if v.is_instance_of(ty) => {
                        Some(Extractor::Array(element))
                    }
                    _ => None,
                },
            }
        }
        TypeKind::Class | TypeKind::Struct | TypeKind::Interface | TypeKind::Delegate => {
            match tr.object_at(state, idx) {
                Ok(Some(v)) => v.is_instance_of(ty).then(|| Extractor::Host(ty.clone())),
                Ok(None) => match (ty.kind(), value.type_of()) {
                    (TypeKind::Interface, ScriptType::Table)
                    | (TypeKind::Delegate, ScriptType::Function) => {
                        Some(Extractor::Adapter(ty.clone()))
                    }
                    (TypeKind::Class, ScriptType::Table) => adapter::backing_object(tr, state, idx)
                        .filter(|v| v.is_instance_of(ty))
                        .map(|_| Extractor::Adapter(ty.clone())),
                    _ => None,
                },
                Err(_) => None,
            }
        }
    }
}

fn mismatch(state: &ScriptState, idx: i32, target: &str, expected: &str) -> BridgeError {
    BridgeError::Coercion {
        target: target.to_string(),
        expected: expected.to_string(),
        found: state.type_at(idx).name().to_string(),
    }
}

/// Run `ex` on the value at `idx`
pub fn extract(
    tr: &Translator,
    state: &mut ScriptState,
    idx: i32,
    ex: &Extractor,
) -> FaultResult<HostValue> {
    let idx = state.abs_index(idx);
    let value = state.value_at(idx);
    match ex {
        Extractor::Nil => Ok(HostValue::Null),
        Extractor::Bool => match value {
            Value::Boolean(b) => Ok(HostValue::Bool(b)),
            _ => Err(mismatch(state, idx, "value", "System.Boolean").into()),
        },
        Extractor::Char => value
            .as_integer()
            .and_then(|i| u32::try_from(i).ok())
            .and_then(char::from_u32)
            .map(HostValue::Char)
            .ok_or_else(|| mismatch(state, idx, "value", "System.Char").into()),
        Extractor::Integer(p) => value
            .as_integer()
            .and_then(|i| fits(*p, i))
            .ok_or_else(|| mismatch(state, idx, "value", p.name()).into()),
        Extractor::Float(p) => match value.as_number() {
            Some(n) if *p == Primitive::F32 => Ok(HostValue::F32(n as f32)),
            Some(n) => Ok(HostValue::F64(n)),
            None => Err(mismatch(state, idx, "value", p.name()).into()),
        },
        Extractor::String => match value {
            Value::String(s) => Ok(HostValue::Str(std::sync::Arc::from(&*s))),
            Value::Nil => Ok(HostValue::Null),
            _ => Err(mismatch(state, idx, "value", "System.String").into()),
        },
        Extractor::Generic => tr.to_host(state, idx),
        Extractor::ScriptRef(kind) => match ref_kind(value.type_of()) {
            Some(got) if got == *kind => Ok(HostValue::Script(tr.pin(state, idx, *kind))),
            _ if value.is_nil() => Ok(HostValue::Null),
            _ => Err(mismatch(state, idx, "value", &format!("{:?}", kind)).into()),
        },
        Extractor::Host(ty) => match tr.object_at(state, idx)? {
            Some(v) if v.is_instance_of(ty) => Ok(v),
            None if value.is_nil() => Ok(HostValue::Null),
            _ => Err(mismatch(state, idx, "value", ty.full_name()).into()),
        },
        Extractor::Enum(ty) => match &value {
            Value::String(s) => ty
                .variant_value(s)
                .map(|v| HostValue::Enum(EnumValue { ty: ty.clone(), value: v }))
                .ok_or_else(|| mismatch(state, idx, "value", ty.full_name()).into()),
            Value::Integer(_) | Value::Number(_) => value
                .as_integer()
                .map(|v| HostValue::Enum(EnumValue { ty: ty.clone(), value: v }))
                .ok_or_else(|| mismatch(state, idx, "value", ty.full_name()).into()),
            _ => match tr.object_at(state, idx)? {
                Some(v @ HostValue::Enum(_)) => Ok(v),
                _ => Err(mismatch(state, idx, "value", ty.full_name()).into()),
            },
        },
        Extractor::Nullable(inner) => {
            if value.is_nil() {
                Ok(HostValue::Null)
            } else {
                extract(tr, state, idx, inner)
            }
        }
        Extractor::TypeObject => match tr.wrapper_at(state, idx) {
            Some(w) if w.kind == WrapperKind::Type => tr.resolve(w.handle),
            Some(w) => {
                let v = tr.resolve(w.handle)?;
                builtin::described(&v)
                    .map(HostValue::Type)
                    .ok_or_else(|| mismatch(state, idx, "value", "System.Type").into())
            }
            None if value.is_nil() => Ok(HostValue::Null),
            None => Err(mismatch(state, idx, "value", "System.Type").into()),
        },
        Extractor::Array(element) => match &value {
            Value::Table(t) => {
                let len = t.raw_len();
                let mut items = Vec::with_capacity(len);
                for i in 1..=len as i64 {
                    state.raw_get_index(idx, i);
                    let item = match check_and_extract(tr, state, -1, element) {
                        Some(ex) => extract(tr, state, -1, &ex),
                        None => Err(mismatch(state, -1, "array element", element.full_name()).into()),
                    };
                    state.pop(1);
                    items.push(item?);
                }
                Ok(HostValue::Array(HostArray::new(element, items)))
            }
            Value::String(s) if is_char(element) => Ok(HostValue::Array(HostArray::new(
                element,
                s.chars().map(HostValue::Char).collect(),
            ))),
            Value::Nil => Ok(HostValue::Null),
            _ => match tr.object_at(state, idx)? {
                Some(v @ HostValue::Array(_)) => Ok(v),
                _ => Err(mismatch(state, idx, "value", &format!("{}[]", element.full_name())).into()),
            },
        },
        Extractor::Adapter(ty) => tr.adapters().instantiate(tr, state, idx, ty),
    }
}

/// Check then extract; `None` when the value does not fit `ty`
pub fn coerce(
    tr: &Translator,
    state: &mut ScriptState,
    idx: i32,
    ty: &TypeRef,
) -> Option<FaultResult<HostValue>> {
    let ex = check_and_extract(tr, state, idx, ty)?;
    Some(extract(tr, state, idx, &ex))
}

/// Value used when a script returns nothing for a slot of type `ty`
pub fn zero_value(state: &mut ScriptState, ty: &TypeRef) -> HostResult<HostValue> {
    Ok(match ty.kind() {
        TypeKind::Primitive(Primitive::Bool) => HostValue::Bool(false),
        TypeKind::Primitive(Primitive::Char) => HostValue::Char('\0'),
        TypeKind::Primitive(Primitive::F32) => HostValue::F32(0.0),
        TypeKind::Primitive(Primitive::F64) => HostValue::F64(0.0),
        TypeKind::Primitive(p) => fits(p, 0).unwrap_or(HostValue::I64(0)),
        TypeKind::Enum => HostValue::Enum(EnumValue {
            ty: ty.clone(),
            value: 0,
        }),
        TypeKind::Struct => {
            let ctor = ty
                .constructors(true)
                .into_iter()
                .find(|c| c.params.is_empty() && !c.is_abstract());
            match ctor {
                Some(c) => c.invoke(state, None, Vec::new())?.ret,
                None => HostValue::Object(HostObject::new((), ty)),
            }
        }
        _ => HostValue::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tether_sdk::{TypeBuilder, TypeCatalog};

    use crate::config::BridgeOptions;

    fn setup() -> (ScriptState, Arc<Translator>) {
        let mut state = ScriptState::new();
        let tr = Arc::new(Translator::new(
            state.id(),
            BridgeOptions::default(),
            Arc::new(TypeCatalog::new()),
        ));
        tr.install(&mut state).unwrap();
        (state, tr)
    }

    #[test]
    fn test_primitive_round_trip() {
        let (mut state, tr) = setup();
        let cases = [
            (HostValue::I8(-5), types::i8()),
            (HostValue::I16(300), types::i16()),
            (HostValue::I32(-70000), types::i32()),
            (HostValue::I64(1 << 40), types::i64()),
            (HostValue::U8(200), types::u8()),
            (HostValue::U16(60000), types::u16()),
            (HostValue::U32(4_000_000_000), types::u32()),
            (HostValue::U64(1 << 50), types::u64()),
            (HostValue::F32(1.5), types::f32()),
            (HostValue::F64(-2.25), types::f64()),
            (HostValue::Bool(true), types::boolean()),
            (HostValue::Char('Z'), types::char()),
            (HostValue::from("text"), types::string()),
        ];
        for (v, ty) in cases {
            tr.push_value(&mut state, &v).unwrap();
            let ex = extractor_for(&tr, &ty);
            let back = extract(&tr, &mut state, -1, &ex).unwrap();
            assert!(back.same(&v), "{:?} came back as {:?}", v, back);
            assert_eq!(back.type_name(), v.type_name());
            state.pop(1);
        }
    }

    #[test]
    fn test_numbers_do_not_come_from_strings() {
        let (mut state, tr) = setup();
        state.push_string("12");
        assert!(check_and_extract(&tr, &mut state, -1, &types::i32()).is_none());
        state.push_number(1.5);
        assert!(check_and_extract(&tr, &mut state, -1, &types::i32()).is_none());
        assert!(check_and_extract(&tr, &mut state, -1, &types::f64()).is_some());
        state.push_integer(300);
        assert!(check_and_extract(&tr, &mut state, -1, &types::u8()).is_none());
        assert!(check_and_extract(&tr, &mut state, -1, &types::string()).is_none());
    }

    #[test]
    fn test_nil_to_reference_only() {
        let (mut state, tr) = setup();
        let class = TypeBuilder::class("Co.Ref").build();
        let iface = TypeBuilder::interface("Co.IRef").build();
        state.push_nil();
        for ty in [
            types::string(),
            class,
            iface,
            types::nullable(&types::i32()),
            types::object(),
            types::array_of(&types::i32()),
        ] {
            let ex = check_and_extract(&tr, &mut state, -1, &ty).expect("nil should fit");
            assert!(extract(&tr, &mut state, -1, &ex).unwrap().is_null());
        }
        for ty in [types::i32(), types::f64(), types::boolean(), types::char()] {
            assert!(check_and_extract(&tr, &mut state, -1, &ty).is_none());
        }
        let point = TypeBuilder::structure("Co.Point").build();
        assert!(check_and_extract(&tr, &mut state, -1, &point).is_none());
    }

    #[test]
    fn test_generic_defaults() {
        let (mut state, tr) = setup();
        let t = types::generic_param("T");
        state.push_integer(4);
        assert!(matches!(coerce(&tr, &mut state, -1, &t), Some(Ok(HostValue::F64(_)))));
        state.push_boolean(false);
        assert!(matches!(coerce(&tr, &mut state, -1, &t), Some(Ok(HostValue::Bool(false)))));
        state.new_table();
        match coerce(&tr, &mut state, -1, &t) {
            Some(Ok(HostValue::Script(r))) => assert_eq!(r.kind(), ScriptRefKind::Table),
            _ => panic!("expected a table handle"),
        }
    }

    #[test]
    fn test_table_to_array() {
        let (mut state, tr) = setup();
        let t = state.new_table();
        t.raw_set(Value::Integer(1), Value::from("a"));
        t.raw_set(Value::Integer(2), Value::from("b"));
        let ty = types::array_of(&types::string());
        match coerce(&tr, &mut state, -1, &ty) {
            Some(Ok(HostValue::Array(a))) => {
                assert_eq!(a.len(), 2);
                assert_eq!(a.get(1).unwrap().as_str(), Some("b"));
            }
            _ => panic!("expected array"),
        }
        t.raw_set(Value::Integer(3), Value::Integer(3));
        assert!(check_and_extract(&tr, &mut state, -1, &ty).is_none());
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_string_to_char_array() {
        let (mut state, tr) = setup();
        state.push_string("abc");
        let chars = types::array_of(&types::char());
        match coerce(&tr, &mut state, -1, &chars) {
            Some(Ok(HostValue::Array(a))) => {
                assert_eq!(a.len(), 3);
                assert!(matches!(a.get(2), Some(HostValue::Char('c'))));
                assert_eq!(a.element().full_name(), "System.Char");
            }
            _ => panic!("expected char array"),
        }
        assert!(check_and_extract(&tr, &mut state, -1, &types::array_of(&types::i32())).is_none());
        assert!(check_and_extract(&tr, &mut state, -1, &types::array_of(&types::string())).is_none());
    }

    #[test]
    fn test_enum_from_name_number_and_value() {
        let (mut state, tr) = setup();
        let color = TypeBuilder::enumeration("Co.Color")
            .variant("Red", 1)
            .variant("Blue", 4)
            .build();
        state.push_string("Blue");
        match coerce(&tr, &mut state, -1, &color) {
            Some(Ok(HostValue::Enum(e))) => assert_eq!(e.value, 4),
            _ => panic!("expected enum"),
        }
        state.push_string("Green");
        assert!(check_and_extract(&tr, &mut state, -1, &color).is_none());
        tr.push_value(&mut state, &HostValue::Enum(EnumValue { ty: color.clone(), value: 1 }))
            .unwrap();
        assert!(check_and_extract(&tr, &mut state, -1, &color).is_some());
    }

    #[test]
    fn test_zero_values() {
        let mut state = ScriptState::new();
        assert_eq!(zero_value(&mut state, &types::i16()).unwrap().as_i64(), Some(0));
        assert_eq!(zero_value(&mut state, &types::boolean()).unwrap().as_bool(), Some(false));
        assert!(zero_value(&mut state, &types::string()).unwrap().is_null());
    }
}
