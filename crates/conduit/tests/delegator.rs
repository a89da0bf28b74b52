use conduit::{
    Bridge, Delegator, DelegatorKey, DelegatorRegistry, Member, Members, Object, TypeInfo,
    memory::{self, MemoryRuntime},
};
use pretty_assertions::assert_eq;

#[test]
fn builtin_table_covers_containers() {
    let registry = DelegatorRegistry::load();
    assert_eq!(registry.len(), 3);
    for name in ["list", "tuple", "dict"] {
        assert!(
            registry.get(&TypeInfo::new("builtins", name).into()).is_some(),
            "missing delegator for {name}"
        );
    }
    assert!(registry.get(&DelegatorKey::Callee).is_some());
    assert!(registry.get(&DelegatorKey::Default).is_some());
}

#[test]
fn unknown_type_lookup_misses() {
    let registry = DelegatorRegistry::load();
    assert!(registry.get(&TypeInfo::new("builtins", "set").into()).is_none());
    assert!(registry.get(&TypeInfo::new("collections", "list").into()).is_none());
}

#[test]
fn empty_registry_has_no_fallbacks() {
    let registry = DelegatorRegistry::new();
    assert!(registry.is_empty());
    assert!(registry.get(&DelegatorKey::Default).is_none());
}

#[test]
fn register_replaces_existing_entries() {
    let mut registry = DelegatorRegistry::load();
    registry.register(
        TypeInfo::new("builtins", "list"),
        Delegator::new(|_, _| {
            let mut members = Members::new();
            members.insert("replaced".to_owned(), Member::Value(Object::Bool(true)));
            Ok(members)
        }),
    );
    assert_eq!(registry.len(), 3);

    let bridge = Bridge::new(MemoryRuntime::new());
    let handle = memory::list(Vec::new());
    let delegator = registry.get(&TypeInfo::new("builtins", "list").into()).unwrap();
    let members = delegator.build(&handle, &bridge).unwrap();
    assert!(members.contains_key("replaced"));
    assert!(!members.contains_key("len"));
}

#[test]
fn sequence_len_member() {
    let bridge = Bridge::new(MemoryRuntime::new());
    let tuple = bridge
        .wrap(memory::tuple(vec![memory::int(1), memory::int(2)]))
        .unwrap()
        .into_proxy()
        .unwrap();
    let len = tuple.get("len").unwrap().unwrap();
    assert_eq!(len.call(Vec::new()).unwrap(), Object::Int(2));
}

#[test]
fn dict_keys_member_wins_over_the_foreign_method() {
    let bridge = Bridge::new(MemoryRuntime::new());
    let dict = bridge
        .wrap(memory::dict([("a", memory::int(1)), ("b", memory::int(2))]))
        .unwrap()
        .into_proxy()
        .unwrap();

    let Some(Object::Method(keys)) = dict.get("keys").unwrap() else {
        panic!("keys should resolve to the delegator member");
    };
    assert_eq!(keys.name(), "keys");
    assert_eq!(keys.as_capability(), None);
    assert_eq!(keys.call(Vec::new()).unwrap().to_string(), "['a', 'b']");
    assert_eq!(dict.get("len").unwrap().unwrap().call(Vec::new()).unwrap(), Object::Int(2));
}

#[test]
fn callee_name_member_is_a_plain_value() {
    let bridge = Bridge::new(MemoryRuntime::new());
    let class = memory::class("geo", "Point", Vec::<(String, conduit::Handle)>::new());
    let proxy = bridge.wrap(class).unwrap().into_proxy().unwrap();
    assert_eq!(proxy.get("name").unwrap(), Some(Object::String("Point".to_owned())));
}
