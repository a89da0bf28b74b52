use std::{cell::Cell, rc::Rc};

use conduit::{
    Arg, Bridge, Capability, Handle, HostClass, Object, Proxy,
    marshal,
    memory::{self, MemoryRuntime},
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn bridge() -> Bridge {
    Bridge::new(MemoryRuntime::new())
}

fn proxy(bridge: &Bridge, handle: Handle) -> Proxy {
    bridge.wrap(handle).unwrap().into_proxy().expect("expected a proxy")
}

fn ints(values: &[i64]) -> Handle {
    memory::list(values.iter().map(|v| memory::int(*v)).collect())
}

fn empty_class(name: &str) -> Handle {
    memory::class("tests", name, Vec::<(String, Handle)>::new())
}

#[test]
fn attribute_takes_priority_over_item() {
    let bridge = bridge();
    let dict = proxy(&bridge, memory::dict([("copy", memory::int(1))]));
    let resolved = dict.get("copy").unwrap().unwrap();
    assert!(resolved.is_callable(), "expected the dict.copy method, got {resolved:?}");
}

#[test]
fn item_lookup_by_name() {
    let bridge = bridge();
    let dict = proxy(&bridge, memory::dict([("answer", memory::int(42))]));
    assert_eq!(dict.get("answer").unwrap(), Some(Object::Int(42)));
}

#[test]
fn missing_member_is_absent_not_an_error() {
    let bridge = bridge();
    let dict = proxy(&bridge, memory::dict([("a", memory::int(1))]));
    assert_eq!(dict.get("nope").unwrap(), None);
}

#[test]
fn numeric_names_index_sequences() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[10, 20, 30]));
    assert_eq!(list.get("1").unwrap(), Some(Object::Int(20)));
}

#[test]
fn index_errors_propagate() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[10]));
    let err = list.get("5").unwrap_err();
    assert_eq!(err.to_string(), "IndexError: list index out of range");
}

#[test]
fn set_by_index_assigns_the_item() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[1, 2]));
    assert!(list.set("0", 9));
    assert_eq!(list.get("0").unwrap(), Some(Object::Int(9)));
}

#[test]
fn set_new_key_uses_item_assignment() {
    let bridge = bridge();
    let dict = proxy(&bridge, memory::dict(Vec::<(String, Handle)>::new()));
    assert!(dict.set("colour", "red"));
    assert_eq!(dict.get("colour").unwrap(), Some(Object::String("red".to_owned())));
    assert!(!dict.has_attr("colour"));
}

#[test]
fn set_falls_back_to_attribute_assignment() {
    let bridge = bridge();
    let instance = empty_class("Thing").invoke(Vec::new()).unwrap();
    let thing = proxy(&bridge, instance);
    assert!(thing.set("colour", "red"));
    assert!(thing.has_attr("colour"));
    assert_eq!(thing.get("colour").unwrap(), Some(Object::String("red".to_owned())));
}

#[test]
fn set_reports_refusal() {
    let bridge = bridge();
    let tuple = proxy(&bridge, memory::tuple(vec![memory::int(1)]));
    assert!(!tuple.set("0", 2));
    assert!(!tuple.set("name", 2));
}

#[test]
fn call_passes_all_arguments_in_one_invocation() {
    let calls = Rc::new(Cell::new(0));
    let seen = Rc::clone(&calls);
    let add = memory::function("add", move |args, _kwargs| {
        seen.set(seen.get() + 1);
        let total = args.iter().map(|a| a.to_str().unwrap().parse::<i64>().unwrap()).sum();
        Ok(memory::int(total))
    });
    let bridge = bridge();
    let add = proxy(&bridge, add);
    let result = add.call(vec![Arg::Int(2), Arg::Int(3), Arg::Int(4)]).unwrap();
    assert_eq!(result, Object::Int(9));
    assert_eq!(calls.get(), 1);
}

#[test]
fn call_spreads_keyword_arguments() {
    let scale = memory::function("scale", |args, kwargs| {
        let value: i64 = args[0].to_str()?.parse().unwrap();
        let factor: i64 = kwargs["by"].to_str()?.parse().unwrap();
        Ok(memory::int(value * factor))
    });
    let bridge = bridge();
    let scale = proxy(&bridge, scale);
    let result = scale
        .call(vec![Arg::Int(6), marshal::kwargs(json!({ "by": 7 })).unwrap()])
        .unwrap();
    assert_eq!(result, Object::Int(42));
}

#[test]
fn calling_a_non_callable_is_a_foreign_type_error() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[]));
    let err = list.call(Vec::new()).unwrap_err();
    assert_eq!(err.to_string(), "TypeError: 'list' object is not callable");
}

#[test]
fn call_method_mutates_the_foreign_value() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[1]));
    assert_eq!(list.call_method("append", vec![Arg::Int(2)]).unwrap(), Object::None);
    assert_eq!(list.len().unwrap(), 2);
}

#[test]
fn capabilities_resolve_with_the_prefix() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[1, 2]));

    let Some(Object::Method(to_string)) = list.get("$to_string").unwrap() else {
        panic!("expected a bound capability");
    };
    assert_eq!(to_string.as_capability(), Some(Capability::ToString));
    assert_eq!(to_string.call(Vec::new()).unwrap(), Object::String("[1, 2]".to_owned()));

    let raw = list.get("$handle").unwrap().unwrap().call(Vec::new()).unwrap();
    assert_eq!(raw, Object::Handle(Rc::clone(list.handle())));

    let has_append = list.get("$has_attr").unwrap().unwrap().call(vec!["append".into()]).unwrap();
    assert_eq!(has_append, Object::Bool(true));

    let item = list.get("$get_item").unwrap().unwrap().call(vec![Object::Int(1)]).unwrap();
    let Object::Handle(item) = item else {
        panic!("get_item should not wrap, got {item:?}");
    };
    assert_eq!(bridge.wrap(item).unwrap(), Object::Int(2));
}

#[test]
fn capability_names_do_not_shadow_foreign_members() {
    let bridge = bridge();
    let dict = proxy(&bridge, memory::dict([("hash", memory::str("stored"))]));
    assert_eq!(dict.get("hash").unwrap(), Some(Object::String("stored".to_owned())));
    assert!(dict.get("$hash").unwrap().unwrap().is_callable());
}

#[test]
fn unknown_capability_falls_through_to_foreign_lookup() {
    let bridge = bridge();
    let dict = proxy(&bridge, memory::dict([("$nope", memory::int(1))]));
    assert_eq!(dict.get("$nope").unwrap(), Some(Object::Int(1)));
}

#[test]
fn capability_names_round_trip() {
    assert_eq!(Capability::SetItem.member_name(), "$set_item");
    assert_eq!(Capability::from_member_name("$get_attr"), Some(Capability::GetAttr));
    assert_eq!(Capability::from_member_name("get_attr"), None);
}

#[test]
fn set_capabilities_report_status_codes() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[1]));
    let ok = list
        .get("$set_item")
        .unwrap()
        .unwrap()
        .call(vec![Object::Int(0), Object::Int(5)])
        .unwrap();
    assert_eq!(ok, Object::Int(0));
    let failed = list
        .get("$set_attr")
        .unwrap()
        .unwrap()
        .call(vec!["x".into(), Object::Int(5)])
        .unwrap();
    assert_eq!(failed, Object::Int(-1));
}

#[test]
fn slice_returns_the_subsequence() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[0, 1, 2, 3, 4]));
    let middle = list.slice(Some(1), Some(4), None).unwrap();
    assert_eq!(middle.to_string(), "[1, 2, 3]");
    let reversed = list.slice(None, None, Some(-1)).unwrap();
    assert_eq!(reversed.to_string(), "[4, 3, 2, 1, 0]");
}

#[test]
fn slice_capability_accepts_none_bounds() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[0, 1, 2, 3]));
    let every_other = list
        .get("$slice")
        .unwrap()
        .unwrap()
        .call(vec![Object::None, Object::None, Object::Int(2)])
        .unwrap();
    assert_eq!(every_other.to_string(), "[0, 2]");
}

#[test]
fn slice_with_extreme_steps_stops_at_the_bounds() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[0, 1, 2]));
    assert_eq!(list.slice(Some(1), None, Some(i64::MAX)).unwrap().to_string(), "[1]");
    assert_eq!(list.slice(None, None, Some(i64::MIN)).unwrap().to_string(), "[2]");
}

#[test]
fn display_uses_the_foreign_string_conversion() {
    let bridge = bridge();
    let dict = proxy(&bridge, memory::dict([("a", memory::int(1))]));
    assert_eq!(format!("{dict}"), "{'a': 1}");
}

#[test]
fn dispatch_wraps_raw_arguments() {
    let bridge = bridge();
    let list = proxy(&bridge, ints(&[]));
    let wrapped = list
        .dispatch(Ok, vec![memory::int(1), memory::none(), ints(&[1])])
        .unwrap();
    assert_eq!(wrapped[0], Object::Int(1));
    assert_eq!(wrapped[1], Object::None);
    assert!(wrapped[2].as_proxy().is_some());
}

#[test]
fn construct_installs_host_methods() {
    let inits = Rc::new(Cell::new(0));
    let counter = Rc::clone(&inits);
    let init = memory::function("__init__", move |_args, _kwargs| {
        counter.set(counter.get() + 1);
        Ok(memory::none())
    });
    let bridge = bridge();
    let class = proxy(&bridge, memory::class("geo", "Shape", [("__init__", init)]));

    let host = HostClass::new("Square")
        .method("sides", |_receiver, _args| Ok(Object::Int(4)))
        .method("describe", |receiver, args| {
            Ok(Object::String(format!("{} with {} args", receiver.type_info(), args.len())))
        });
    let square = class.construct(&host).unwrap().into_proxy().unwrap();

    // once by instantiation, once by the explicit call
    assert_eq!(inits.get(), 2);
    assert_eq!(square.call_method("sides", Vec::new()).unwrap(), Object::Int(4));
    assert_eq!(
        square.call_method("describe", vec![Arg::Int(1), Arg::Int(2)]).unwrap(),
        Object::String("geo.Shape with 2 args".to_owned())
    );
}

#[test]
fn installed_methods_are_visible_to_evaluated_code() {
    let runtime = Rc::new(MemoryRuntime::new());
    let bridge = Bridge::with_loader(
        Rc::clone(&runtime) as Rc<dyn conduit::ForeignRuntime>,
        conduit::BridgeOptions::default(),
        conduit::DelegatorRegistry::load,
    );
    let class = proxy(&bridge, empty_class("Counter"));
    let host = HostClass::new("Counter").method("double", |_receiver, args| match &args[0] {
        Object::Int(i) => Ok(Object::Int(i * 2)),
        other => Err(conduit::Error::type_error(format!("expected int, got {}", other.type_name()))),
    });
    let counter = class.construct(&host).unwrap().into_proxy().unwrap();

    let globals = bridge.globals().unwrap().into_proxy().unwrap();
    assert!(globals.set("counter", counter.handle()));
    assert_eq!(bridge.evaluate("counter.double(21)").unwrap(), Object::Int(42));
    assert!(runtime.global("counter").is_some());
}

#[test]
fn installed_methods_outlive_the_host_proxy() {
    let runtime = Rc::new(MemoryRuntime::new());
    let bridge = Bridge::with_loader(
        Rc::clone(&runtime) as Rc<dyn conduit::ForeignRuntime>,
        conduit::BridgeOptions::default(),
        conduit::DelegatorRegistry::load,
    );
    let class = proxy(&bridge, empty_class("Counter"));
    let host = HostClass::new("Counter").method("kind", |receiver, _args| {
        Ok(Object::String(receiver.type_info().name.clone()))
    });
    let counter = class.construct(&host).unwrap().into_proxy().unwrap();
    let globals = bridge.globals().unwrap().into_proxy().unwrap();
    assert!(globals.set("counter", counter.handle()));
    drop(counter);

    assert_eq!(bridge.evaluate("counter.kind()").unwrap(), Object::String("Counter".to_owned()));
    assert_eq!(bridge.evaluate("counter.kind").unwrap().to_string(), "<bound method kind>");
}

#[test]
fn installed_methods_do_not_keep_their_receiver_alive() {
    let bridge = bridge();
    let class = proxy(&bridge, empty_class("Counter"));
    let host = HostClass::new("Counter").method("kind", |_receiver, _args| Ok(Object::None));
    let counter = class.construct(&host).unwrap().into_proxy().unwrap();
    let method = counter.get_attr("kind").unwrap();
    drop(counter);

    let err = method.invoke(Vec::new()).unwrap_err();
    assert_eq!(err.to_string(), "ReferenceError: weakly-referenced object no longer exists");
}
