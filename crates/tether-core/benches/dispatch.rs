use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_core::Bridge;
use tether_script::{FunctionRef, ScriptState};
use tether_sdk::{types, HostArray, HostValue, MethodInfo, ParamInfo, TypeBuilder, TypeRef};

fn math_type() -> TypeRef {
    let int = types::i32();
    let string = types::string();
    TypeBuilder::class("Bench.Math")
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
        .build()
}

fn bridge() -> Bridge {
    let mut bridge = Bridge::new().unwrap();
    bridge.register_type(&math_type()).unwrap();
    bridge
}

fn call_from_script(s: &mut ScriptState, method: &str, arg: impl Fn(&mut ScriptState)) {
    s.get_global("Bench").unwrap();
    s.get_field(-1, "Math").unwrap();
    s.get_field(-1, method).unwrap();
    arg(s);
    if method == "add" {
        s.push_integer(1);
        s.call(2, Some(1)).unwrap();
    } else {
        s.call(1, Some(1)).unwrap();
    }
    s.set_top(0);
}

fn bench_static_calls(c: &mut Criterion) {
    let mut bridge = bridge();

    c.bench_function("host_calls_add", |b| {
        b.iter(|| {
            bridge
                .call_function(
                    "Bench.Math.add",
                    &[black_box(HostValue::I32(2)), HostValue::I32(3)],
                )
                .unwrap()
        });
    });

    let state = bridge.state_mut();
    c.bench_function("script_calls_add", |b| {
        b.iter(|| call_from_script(state, "add", |s| s.push_integer(black_box(2))));
    });
}

fn bench_overloads(c: &mut Criterion) {
    let mut group = c.benchmark_group("overloads");
    let mut bridge = bridge();
    let state = bridge.state_mut();

    group.bench_function(BenchmarkId::new("f", "int"), |b| {
        b.iter(|| call_from_script(state, "f", |s| s.push_integer(black_box(7))));
    });
    group.bench_function(BenchmarkId::new("f", "string"), |b| {
        b.iter(|| call_from_script(state, "f", |s| s.push_string(black_box("x"))));
    });
    group.finish();
}

fn bench_array_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("arrays");

    for len in [16usize, 256] {
        let mut bridge = bridge();
        let items = (0..len as i32).map(HostValue::I32).collect();
        bridge
            .set("arr", HostArray::new(&types::i32(), items).into())
            .unwrap();
        let state = bridge.state_mut();
        state.push_function(FunctionRef::new(move |s| {
            s.get_global("arr")?;
            let mut sum = 0;
            for i in 0..len as i64 {
                s.get_index(1, i)?;
                sum += s.to_integer(-1).unwrap_or_default();
                s.pop(1);
            }
            s.push_integer(sum);
            Ok(1)
        }));
        state.set_global("sum").unwrap();

        group.bench_with_input(BenchmarkId::new("sum", len), &len, |b, _| {
            b.iter(|| bridge.call_function("sum", &[]).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_static_calls, bench_overloads, bench_array_access);
criterion_main!(benches);
