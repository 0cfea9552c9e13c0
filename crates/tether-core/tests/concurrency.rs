//! Independent interpreters on separate threads sharing one catalog

mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use tether_core::{pool, Bridge, BridgeOptions};
use tether_sdk::{HostValue, TypeCatalog};

#[test]
fn test_bridges_on_threads_share_catalog() {
    let catalog = Arc::new(TypeCatalog::new());
    catalog.register(&math_type());
    catalog.register(&counter_type());

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let catalog = catalog.clone();
            thread::spawn(move || {
                let mut bridge = Bridge::with_catalog(BridgeOptions::default(), catalog).unwrap();
                let math = bridge.translator().catalog().get("Demo.Math").unwrap();
                bridge.register_type(&math).unwrap();

                let mut total = 0.0;
                for i in 0..50 {
                    let out = bridge
                        .call_function("Demo.Math.add", &[HostValue::I32(n), HostValue::I32(i)])
                        .unwrap();
                    total += out[0].as_f64().unwrap_or_default();
                }
                total
            })
        })
        .collect();

    let totals: Vec<f64> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    for (n, total) in totals.iter().enumerate() {
        let expected = (0..50).map(|i| (n as i32 + i) as f64).sum::<f64>();
        assert_eq!(*total, expected);
    }
}

#[test]
fn test_detached_bridge_leaves_pool() {
    let id = {
        let bridge = Bridge::new().unwrap();
        let id = bridge.state().id();
        assert!(pool().find(id).is_some());
        id
    };
    assert!(pool().find(id).is_none());
}

#[test]
fn test_host_objects_cross_threads() {
    let ty = counter_type();
    let counter = new_counter(&ty, 0);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let ty = ty.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                let mut bridge = Bridge::new().unwrap();
                bridge.register_type(&ty).unwrap();
                bridge.set("c", counter).unwrap();
                script(&mut bridge, "bump", |s| {
                    s.get_global("c")?;
                    let c = s.top();
                    for _ in 0..10 {
                        method_call(s, c, "Increment", &[], 0)?;
                    }
                    Ok(0)
                });
                bridge.call_function("bump", &[]).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let payload = counter.as_object().unwrap().downcast::<Counter>().unwrap();
    assert_eq!(payload.value.load(std::sync::atomic::Ordering::SeqCst), 30);
}
