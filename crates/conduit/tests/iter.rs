use conduit::{
    Arg, Bridge, BridgeResult, Handle, Object, Proxy,
    memory::{self, MemoryRuntime},
};
use pretty_assertions::assert_eq;

fn bridge() -> Bridge {
    Bridge::new(MemoryRuntime::new())
}

fn proxy(bridge: &Bridge, handle: Handle) -> Proxy {
    bridge.wrap(handle).unwrap().into_proxy().expect("expected a proxy")
}

fn ints(values: &[i64]) -> Vec<Handle> {
    values.iter().map(|v| memory::int(*v)).collect()
}

#[test]
fn sequence_yields_each_element_in_order() {
    let bridge = bridge();
    let list = proxy(&bridge, memory::list(ints(&[1, 2, 3])));
    let values: Vec<Object> = list.iter().unwrap().collect::<BridgeResult<_>>().unwrap();
    assert_eq!(values, vec![Object::Int(1), Object::Int(2), Object::Int(3)]);
}

#[test]
fn tuples_iterate_as_sequences() {
    let bridge = bridge();
    let tuple = proxy(&bridge, memory::tuple(ints(&[4, 5])));
    assert_eq!(tuple.iter().unwrap().count(), 2);
}

#[test]
fn iterator_protocol_is_stepped_until_done() {
    let bridge = bridge();
    let iterator = proxy(&bridge, memory::iterator(ints(&[7, 8])));
    let mut iter = iterator.iter().unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), Object::Int(7));
    assert_eq!(iter.next().unwrap().unwrap(), Object::Int(8));
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
    assert_eq!(iter.cursor(), None);
}

#[test]
fn iterators_are_consumed_by_iteration() {
    let bridge = bridge();
    let iterator = proxy(&bridge, memory::iterator(ints(&[1, 2])));
    assert_eq!(iterator.iter().unwrap().count(), 2);
    assert_eq!(iterator.iter().unwrap().count(), 0);
}

#[test]
fn elements_are_wrapped() {
    let bridge = bridge();
    let nested = memory::list(vec![memory::list(ints(&[1])), memory::none(), memory::str("x")]);
    let list = proxy(&bridge, nested);
    let values: Vec<Object> = list.iter().unwrap().map(Result::unwrap).collect();
    assert!(values[0].as_proxy().is_some());
    assert_eq!(values[1], Object::None);
    assert_eq!(values[2], Object::String("x".to_owned()));
}

#[test]
fn non_iterable_is_a_type_error() {
    let bridge = bridge();
    let class = memory::class("tests", "Opaque", Vec::<(String, Handle)>::new());
    let opaque = proxy(&bridge, class.invoke(Vec::new()).unwrap());

    let err = opaque.iter().unwrap_err();
    assert!(err.is_type_error());
    assert_eq!(err.to_string(), "TypeError: 'Opaque' object is neither iterable nor a sequence");

    let mut via_ref = (&opaque).into_iter();
    assert!(via_ref.next().unwrap().unwrap_err().is_type_error());
    assert!(via_ref.next().is_none());
}

#[test]
fn length_is_requeried_on_every_step() {
    let bridge = bridge();
    let list = proxy(&bridge, memory::list(ints(&[1, 2])));
    let mut seen = Vec::new();
    for value in &list {
        let value = value.unwrap();
        if value == Object::Int(1) {
            list.call_method("append", vec![Arg::Int(3)]).unwrap();
        }
        seen.push(value);
    }
    assert_eq!(seen, vec![Object::Int(1), Object::Int(2), Object::Int(3)]);
}

#[test]
fn shrinking_during_iteration_stops_early() {
    let bridge = bridge();
    let list = proxy(&bridge, memory::list(ints(&[1, 2, 3, 4])));
    let mut iter = list.iter().unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), Object::Int(1));
    list.call_method("pop", Vec::new()).unwrap();
    list.call_method("pop", Vec::new()).unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), Object::Int(2));
    assert!(iter.next().is_none());
}

#[test]
fn cursor_tracks_sequence_position() {
    let bridge = bridge();
    let list = proxy(&bridge, memory::list(ints(&[1, 2])));
    let mut iter = list.iter().unwrap();
    assert_eq!(iter.cursor(), Some(0));
    iter.next();
    assert_eq!(iter.cursor(), Some(1));
}
