//! Metamethod dispatch and weak tables through the public stack API

use tether_script::{ArithOp, CompareOp, FunctionRef, ScriptState, ScriptType, TableRef, Value};

/// `{ n = n }` with the shared "Num" metatable
fn push_num(s: &mut ScriptState, n: i64) -> TableRef {
    let t = s.new_table();
    t.raw_set(Value::from("n"), Value::Integer(n));
    s.new_metatable("Num");
    s.set_metatable(-2).unwrap();
    t
}

fn field_n(v: &Value) -> i64 {
    match v {
        Value::Table(t) => t.raw_get_str("n").as_integer().unwrap_or_default(),
        _ => 0,
    }
}

fn install_num(s: &mut ScriptState) {
    s.new_metatable("Num");
    let mt = match s.value_at(-1) {
        Value::Table(t) => t,
        _ => unreachable!(),
    };
    s.pop(1);
    mt.raw_set(
        Value::from("__add"),
        Value::Function(FunctionRef::new(|s| {
            let sum = field_n(&s.value_at(1)) + field_n(&s.value_at(2));
            push_num(s, sum);
            Ok(1)
        })),
    );
    mt.raw_set(
        Value::from("__eq"),
        Value::Function(FunctionRef::new(|s| {
            let eq = field_n(&s.value_at(1)) == field_n(&s.value_at(2));
            s.push_boolean(eq);
            Ok(1)
        })),
    );
    mt.raw_set(
        Value::from("__lt"),
        Value::Function(FunctionRef::new(|s| {
            let lt = field_n(&s.value_at(1)) < field_n(&s.value_at(2));
            s.push_boolean(lt);
            Ok(1)
        })),
    );
    mt.raw_set(
        Value::from("__len"),
        Value::Function(FunctionRef::new(|s| {
            let n = field_n(&s.value_at(1));
            s.push_integer(n);
            Ok(1)
        })),
    );
}

#[test]
fn test_arith_and_comparison_metamethods() {
    let mut s = ScriptState::new();
    install_num(&mut s);

    let a = Value::Table(push_num(&mut s, 2));
    let b = Value::Table(push_num(&mut s, 3));
    let sum = s.arith_values(ArithOp::Add, a.clone(), b.clone()).unwrap();
    assert_eq!(field_n(&sum), 5);

    let also_two = Value::Table(push_num(&mut s, 2));
    assert!(s.compare_values(a.clone(), also_two, CompareOp::Eq).unwrap());
    assert!(!s.compare_values(a.clone(), b.clone(), CompareOp::Eq).unwrap());
    assert!(s.compare_values(a, b, CompareOp::Lt).unwrap());
}

#[test]
fn test_eq_skipped_for_mixed_kinds() {
    let mut s = ScriptState::new();
    install_num(&mut s);
    let a = Value::Table(push_num(&mut s, 1));
    assert!(!s.compare_values(a, Value::Integer(1), CompareOp::Eq).unwrap());
}

#[test]
fn test_length_metamethod() {
    let mut s = ScriptState::new();
    install_num(&mut s);
    push_num(&mut s, 7);
    s.length(-1).unwrap();
    assert_eq!(s.to_integer(-1), Some(7));
}

#[test]
fn test_missing_metamethod_raises() {
    let mut s = ScriptState::new();
    let t = Value::Table(s.new_table());
    let err = s.arith_values(ArithOp::Add, t, Value::Integer(1)).unwrap_err();
    assert!(err.to_string().contains("arithmetic on a table value"));
}

#[test]
fn test_newindex_function_intercepts_assignment() {
    let mut s = ScriptState::new();
    let log = s.new_table();
    let target = s.new_table();
    let mt = TableRef::new();
    let sink = log.clone();
    mt.raw_set(
        Value::from("__newindex"),
        Value::Function(FunctionRef::new(move |s| {
            sink.raw_set(s.value_at(2), s.value_at(3));
            Ok(0)
        })),
    );
    target.set_metatable(Some(mt));

    s.push_integer(42);
    s.set_field(-2, "answer").unwrap();
    assert!(target.raw_get_str("answer").is_nil());
    assert_eq!(log.raw_get_str("answer").as_integer(), Some(42));
}

#[test]
fn test_weak_values_drop_unreferenced_entries() {
    let mut s = ScriptState::new();
    let cache = TableRef::new();
    let mode = TableRef::new();
    mode.raw_set(Value::from("__mode"), Value::from("v"));
    cache.set_metatable(Some(mode));

    let kept = s.new_table();
    cache.raw_set(Value::Integer(1), Value::Table(kept));
    cache.raw_set(Value::Integer(2), Value::Table(TableRef::new()));

    assert_eq!(cache.raw_get(&Value::Integer(1)).type_of(), ScriptType::Table);
    assert!(cache.raw_get(&Value::Integer(2)).is_nil());
}

#[test]
fn test_error_crosses_native_frames() {
    let mut s = ScriptState::new();
    s.push_function(FunctionRef::named("inner", |s| {
        Err(s.error_message("inner failed"))
    }));
    s.set_global("inner").unwrap();
    s.push_function(FunctionRef::named("outer", |s| {
        s.get_global("inner")?;
        s.call(0, Some(0))?;
        Ok(0)
    }));

    assert!(s.pcall(0, Some(0), 0).is_err());
    let message = s.to_str(-1).map(|m| m.to_string()).unwrap_or_default();
    assert!(message.ends_with("inner failed"), "{}", message);
    assert_eq!(s.top(), 1);
}
