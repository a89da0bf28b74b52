use std::{cell::Cell, rc::Rc};

use conduit::{
    Bridge, BridgeOptions, Delegator, DelegatorRegistry, Member, Members, Object, TypeInfo,
    memory::{self, MemoryRuntime},
};
use pretty_assertions::assert_eq;

fn bridge() -> Bridge {
    Bridge::new(MemoryRuntime::new())
}

fn point_class() -> conduit::Handle {
    memory::class("geo", "Point", Vec::<(String, conduit::Handle)>::new())
}

#[test]
fn none_maps_to_none() {
    assert_eq!(bridge().wrap(memory::none()).unwrap(), Object::None);
}

#[test]
fn absent_handle_passes_through_as_none() {
    assert_eq!(bridge().wrap_optional(None).unwrap(), Object::None);
}

#[test]
fn primitives_are_unwrapped() {
    let bridge = bridge();
    assert_eq!(bridge.wrap(memory::int(42)).unwrap(), Object::Int(42));
    assert_eq!(bridge.wrap(memory::float(1.5)).unwrap(), Object::Float(1.5));
    assert_eq!(bridge.wrap(memory::bool(true)).unwrap(), Object::Bool(true));
    assert_eq!(bridge.wrap(memory::str("hi")).unwrap(), Object::String("hi".to_owned()));
}

#[test]
fn containers_become_proxies() {
    let value = bridge().wrap(memory::list(vec![memory::int(1)])).unwrap();
    let proxy = value.as_proxy().expect("list should be proxied");
    assert_eq!(proxy.type_info(), &TypeInfo::new("builtins", "list"));
}

#[test]
fn type_identity_comes_from_the_type_object() {
    let instance = point_class().invoke(Vec::new()).unwrap();
    let info = TypeInfo::of(&*instance).unwrap();
    assert_eq!(info, TypeInfo::new("geo", "Point"));
    assert_eq!(info.to_string(), "geo.Point");
    assert!(!info.is_primitive());
}

#[test]
fn callables_use_the_callee_delegator() {
    let greet = memory::function("greet", |_args, _kwargs| Ok(memory::str("hello")));
    let proxy = bridge().wrap(greet).unwrap().into_proxy().unwrap();
    assert_eq!(proxy.get("name").unwrap(), Some(Object::String("greet".to_owned())));
}

#[test]
fn callee_delegator_wins_over_type_delegator() {
    let loader = || {
        let mut registry = DelegatorRegistry::load();
        registry.register(
            TypeInfo::new("builtins", "type"),
            Delegator::new(|_, _| {
                let mut members = Members::new();
                members.insert("typed".to_owned(), Member::Value(Object::Bool(true)));
                Ok(members)
            }),
        );
        registry
    };
    let bridge = Bridge::with_loader(Rc::new(MemoryRuntime::new()), BridgeOptions::default(), loader);
    let proxy = bridge.wrap(point_class()).unwrap().into_proxy().unwrap();
    assert!(proxy.members().contains_key("name"));
    assert!(!proxy.members().contains_key("typed"));
}

#[test]
fn type_delegator_adds_members() {
    let loader = || {
        let mut registry = DelegatorRegistry::new();
        registry.register(
            TypeInfo::new("geo", "Point"),
            Delegator::new(|_, _| {
                let mut members = Members::new();
                members.insert("dimensions".to_owned(), Member::Value(Object::Int(2)));
                Ok(members)
            }),
        );
        registry
    };
    let bridge = Bridge::with_loader(Rc::new(MemoryRuntime::new()), BridgeOptions::default(), loader);
    let instance = point_class().invoke(Vec::new()).unwrap();
    let proxy = bridge.wrap(instance).unwrap().into_proxy().unwrap();
    assert_eq!(proxy.get("dimensions").unwrap(), Some(Object::Int(2)));
}

#[test]
fn default_delegator_covers_unregistered_types() {
    let loader = || {
        let mut registry = DelegatorRegistry::new();
        registry.set_default(Delegator::new(|_, _| {
            let mut members = Members::new();
            members.insert("fallback".to_owned(), Member::Value(Object::Bool(true)));
            Ok(members)
        }));
        registry
    };
    let bridge = Bridge::with_loader(Rc::new(MemoryRuntime::new()), BridgeOptions::default(), loader);
    let proxy = bridge.wrap(memory::tuple(Vec::new())).unwrap().into_proxy().unwrap();
    assert_eq!(proxy.get("fallback").unwrap(), Some(Object::Bool(true)));
}

#[test]
fn registry_loads_once_per_bridge() {
    let loads = Rc::new(Cell::new(0));
    let counter = Rc::clone(&loads);
    let bridge = Bridge::with_loader(Rc::new(MemoryRuntime::new()), BridgeOptions::default(), move || {
        counter.set(counter.get() + 1);
        DelegatorRegistry::load()
    });
    assert_eq!(loads.get(), 0);
    bridge.wrap(memory::list(Vec::new())).unwrap();
    bridge.wrap(memory::dict([("a", memory::int(1))])).unwrap();
    assert_eq!(loads.get(), 1);
}

#[test]
fn each_wrap_builds_a_fresh_proxy_for_the_same_handle() {
    let bridge = bridge();
    let handle = memory::list(Vec::new());
    let first = bridge.wrap(Rc::clone(&handle)).unwrap();
    let second = bridge.wrap(handle).unwrap();
    // equality is foreign identity, not proxy identity
    assert_eq!(first, second);
}

#[test]
fn import_and_builtin_are_wrapped() {
    let runtime = MemoryRuntime::new();
    runtime.register_module("geo", memory::module("geo", [("origin", memory::int(0))]));
    let bridge = Bridge::new(runtime);

    let module = bridge.import("geo").unwrap().into_proxy().unwrap();
    assert_eq!(module.get("origin").unwrap(), Some(Object::Int(0)));

    let len = bridge.builtin("len").unwrap().into_proxy().unwrap();
    assert_eq!(len.get("name").unwrap(), Some(Object::String("len".to_owned())));

    let err = bridge.import("missing").unwrap_err();
    assert_eq!(err.to_string(), "ModuleNotFoundError: No module named 'missing'");
}
