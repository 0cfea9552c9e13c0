//! Script-side helper functions
//!
//! Installed as a global table (default name `tether`):
//!
//! | function | result |
//! |----------|--------|
//! | `import_type(name)` | type proxy from the catalog, or nil |
//! | `make_object(table, Type)` | object implementing or subclassing `Type` |
//! | `free_object(table)` | detach the table from its object |
//! | `get_method_bysig(obj or Type, name, Type...)` | one exact overload |
//! | `get_constructor_bysig(Type, Type...)` | one exact constructor |
//! | `enum(Type, number or "A, B")` | enum value |
//! | `ctype(Type)` | the type as an ordinary `System.Type` object |

use std::sync::Arc;

use tether_script::{FunctionRef, ScriptState, ScriptType, Value};
use tether_sdk::{EnumValue, HostValue, MethodInfo, TypeKind, TypeRef};

use crate::builtin;
use crate::cache::{MethodThunk, ThunkBinding};
use crate::dispatch::{push_thunk, run};
use crate::error::{BridgeError, FaultResult};
use crate::translator::Translator;

type Helper = fn(&Translator, &mut ScriptState) -> FaultResult<usize>;

const HELPERS: [(&str, Helper); 7] = [
    ("import_type", import_type),
    ("make_object", make_object),
    ("free_object", free_object),
    ("get_method_bysig", get_method_bysig),
    ("get_constructor_bysig", get_constructor_bysig),
    ("enum", enum_value),
    ("ctype", ctype),
];

/// Create the helper table and store it in globals under `table`
pub fn install_globals(state: &mut ScriptState, table: &str) -> FaultResult<()> {
    let helpers = state.new_table();
    for (name, f) in HELPERS {
        let function = FunctionRef::named(name, move |s| run(s, f));
        helpers.raw_set(Value::from(name), Value::Function(function));
    }
    state.set_global(table)?;
    Ok(())
}

fn type_arg(tr: &Translator, state: &ScriptState, idx: i32) -> FaultResult<TypeRef> {
    tr.object_at(state, idx)?
        .as_ref()
        .and_then(builtin::described)
        .ok_or_else(|| {
            BridgeError::Coercion {
                target: format!("argument #{}", idx),
                expected: "System.Type".to_string(),
                found: state.type_at(idx).name().to_string(),
            }
            .into()
        })
}

fn string_arg(state: &ScriptState, idx: i32) -> FaultResult<String> {
    match state.value_at(idx) {
        Value::String(s) => Ok(s.to_string()),
        _ => Err(BridgeError::Coercion {
            target: format!("argument #{}", idx),
            expected: "System.String".to_string(),
            found: state.type_at(idx).name().to_string(),
        }
        .into()),
    }
}

fn import_type(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let name = string_arg(state, 1)?;
    match tr.catalog().get(&name) {
        Some(ty) => tr.push_value(state, &HostValue::Type(ty))?,
        None => state.push_nil(),
    }
    Ok(1)
}

fn make_object(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let ty = type_arg(tr, state, 2)?;
    let value = tr.adapters().make_object(tr, state, 1, &ty)?;
    tr.push_value(state, &value)?;
    Ok(1)
}

fn free_object(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let freed = tr.adapters().free_object(tr, state, 1)?;
    state.push_boolean(freed);
    Ok(1)
}

fn signature_types(tr: &Translator, state: &ScriptState, first: i32) -> FaultResult<Vec<TypeRef>> {
    (first..=state.top()).map(|i| type_arg(tr, state, i)).collect()
}

fn matches_signature(m: &MethodInfo, sig: &[TypeRef]) -> bool {
    m.params.len() == sig.len() && m.params.iter().zip(sig).all(|(p, t)| p.ty.id() == t.id())
}

fn get_method_bysig(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let target = tr.object_at(state, 1)?;
    let (ty, receiver) = match target {
        Some(HostValue::Type(t)) => (t, None),
        Some(v) => match v.runtime_type() {
            Some(t) => (t, Some(v)),
            None => return Err(BridgeError::NotCallable { type_name: v.type_name() }.into()),
        },
        None => {
            return Err(BridgeError::NotCallable {
                type_name: state.type_at(1).name().to_string(),
            }
            .into())
        }
    };
    let name = string_arg(state, 2)?;
    let sig = signature_types(tr, state, 3)?;
    let include_non_public = tr.options().expose_non_public;

    let found = ty.ancestry().into_iter().find_map(|t| {
        t.members()
            .methods
            .iter()
            .find(|m| {
                m.exposed_name() == name
                    && m.is_static == receiver.is_none()
                    && m.attrs.visible(include_non_public)
                    && matches_signature(m, &sig)
            })
            .cloned()
    });
    let Some(method) = found else {
        return Err(BridgeError::NoMatchingOverload {
            type_name: ty.full_name().to_string(),
            method: name,
        }
        .into());
    };
    let binding = if receiver.is_some() {
        ThunkBinding::Instance
    } else {
        ThunkBinding::Static
    };
    let thunk = MethodThunk::new(&name, &ty, vec![method], binding).bind(receiver);
    push_thunk(state, Arc::new(thunk));
    Ok(1)
}

fn get_constructor_bysig(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let ty = type_arg(tr, state, 1)?;
    let sig = signature_types(tr, state, 2)?;
    let ctor = ty
        .constructors(tr.options().expose_non_public)
        .into_iter()
        .find(|c| matches_signature(c, &sig));
    let Some(ctor) = ctor else {
        return Err(BridgeError::NoConstructor {
            type_name: ty.full_name().to_string(),
        }
        .into());
    };
    let thunk = MethodThunk::new(".ctor", &ty, vec![ctor], ThunkBinding::Constructor);
    push_thunk(state, Arc::new(thunk));
    Ok(1)
}

/// Flags are written as a comma-separated list of constant names
fn parse_variants(ty: &TypeRef, text: &str) -> Option<i64> {
    text.split(',')
        .map(str::trim)
        .try_fold(0i64, |acc, part| ty.variant_value(part).map(|v| acc | v))
}

fn enum_value(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    let ty = type_arg(tr, state, 1)?;
    if ty.kind() != TypeKind::Enum {
        return Err(BridgeError::Coercion {
            target: "argument #1".to_string(),
            expected: "enum type".to_string(),
            found: ty.full_name().to_string(),
        }
        .into());
    }
    let value = match state.type_at(2) {
        ScriptType::Number => state.to_integer(2),
        ScriptType::String => state.to_str(2).and_then(|s| parse_variants(&ty, &s)),
        _ => None,
    };
    let Some(value) = value else {
        return Err(BridgeError::Coercion {
            target: "argument #2".to_string(),
            expected: ty.full_name().to_string(),
            found: state.tostring(2).unwrap_or_default(),
        }
        .into());
    };
    tr.push_value(state, &HostValue::Enum(EnumValue { ty, value }))?;
    Ok(1)
}

fn ctype(tr: &Translator, state: &mut ScriptState) -> FaultResult<usize> {
    match tr.object_at(state, 1)? {
        Some(HostValue::Type(t)) => tr.push_value(state, &builtin::type_object(&t))?,
        _ => state.push_nil(),
    }
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_sdk::TypeBuilder;

    #[test]
    fn test_parse_flag_lists() {
        let ty = TypeBuilder::enumeration("Globals.Access")
            .variant("Read", 1)
            .variant("Write", 2)
            .build();
        assert_eq!(parse_variants(&ty, "Read"), Some(1));
        assert_eq!(parse_variants(&ty, "Read, Write"), Some(3));
        assert_eq!(parse_variants(&ty, "Read,Exec"), None);
    }
}
