// MibScript host bridge tests: JSON argument conversion, overload choice,
// enum marshalling and shared access from several threads

use std::thread;

use mibscript::bytecode::{ByteCodeValue, ByteDatatype};
use mibscript::interop::{HostBridge, HostType, InteropError};
use mibscript::pipeline::Pipeline;
use serde_json::json;

const SOURCE: &str = "module app {
    enum Mood { Calm, Busy, Away }

    pub int add(int a, int b) { return a + b; }
    pub string describe(int v) { return \"int \" + v; }
    pub string describe(double v) { return \"double \" + v; }
    pub Mood next(Mood m) { return m == Mood::Calm ? Mood::Busy : Mood::Away; }
    pub void touch() { }
    pub int length_of(string text) { return std.strings.length(text); }
}";

fn bridge() -> HostBridge {
    let bytes = Pipeline::default()
        .compile_to_bytes(SOURCE)
        .expect("compile");
    HostBridge::from_bytes(&bytes).expect("load")
}

#[test]
fn json_arguments_call_script_functions() {
    let bridge = bridge();
    assert_eq!(
        bridge.invoke_json("app.add", &[json!(2), json!(40)]).expect("add"),
        json!(42)
    );
    assert_eq!(
        bridge
            .invoke_json("app.length_of", &[json!("bridge")])
            .expect("length_of"),
        json!(6)
    );
}

#[test]
fn lighter_overloads_win_for_integral_json() {
    let bridge = bridge();
    assert_eq!(
        bridge.invoke_json("app.describe", &[json!(2)]).expect("int overload"),
        json!("int 2")
    );
    assert_eq!(
        bridge
            .invoke_json("app.describe", &[json!(2.5)])
            .expect("double overload"),
        json!("double 2.5")
    );
}

#[test]
fn enums_cross_the_bridge_by_member_name() {
    let bridge = bridge();
    assert_eq!(
        bridge.invoke_json("app.next", &[json!("Calm")]).expect("next"),
        json!("Busy")
    );
    assert_eq!(
        bridge.invoke_json("app.next", &[json!(1)]).expect("ordinal argument"),
        json!("Away")
    );
    assert_eq!(
        bridge.datatype("app.Mood").expect("enum type"),
        HostType::Enum {
            name: "app.Mood".into(),
            members: vec!["Calm".into(), "Busy".into(), "Away".into()],
        }
    );
}

#[test]
fn void_functions_return_null() {
    assert_eq!(bridge().invoke_json("app.touch", &[]).expect("touch"), json!(null));
}

#[test]
fn unconvertible_arguments_report_no_overload() {
    let bridge = bridge();
    let err = bridge
        .invoke_json("app.add", &[json!("two"), json!(2)])
        .expect_err("string for int");
    assert!(matches!(err, InteropError::NoOverload { ref name, .. } if name == "app.add"));
    assert!(matches!(
        bridge.invoke_json("app.nothing", &[]),
        Err(InteropError::NoOverload { .. })
    ));
}

#[test]
fn typed_values_round_through_invoke() {
    let bridge = bridge();
    let a = bridge.value(&json!(5), "int").expect("int value");
    let b = bridge.value(&json!(6), "int").expect("int value");
    assert_eq!(
        bridge.invoke("app.add", &[a, b]).expect("invoke"),
        Some(ByteCodeValue::Int(11))
    );
    assert_eq!(
        bridge.datatype("long").expect("long"),
        HostType::Primitive(ByteDatatype::Long)
    );
}

#[test]
fn clones_share_one_vm_across_threads() {
    let bridge = bridge();
    let handles: Vec<_> = (0..4)
        .map(|offset| {
            let bridge = bridge.clone();
            thread::spawn(move || {
                bridge
                    .invoke_json("app.add", &[json!(offset), json!(10)])
                    .expect("threaded add")
            })
        })
        .collect();
    let mut results: Vec<i64> = handles
        .into_iter()
        .map(|handle| {
            handle
                .join()
                .expect("thread")
                .as_i64()
                .expect("integer result")
        })
        .collect();
    results.sort_unstable();
    assert_eq!(results, vec![10, 11, 12, 13]);
}
