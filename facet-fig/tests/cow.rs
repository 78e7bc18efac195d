//! Copy-on-write sessions over shared value graphs.

use std::cell::Cell;
use std::rc::Rc;

use facet_fig::{Args, Class, CopyOnWrite, FigError, Key, Value};
use facet_testhelpers::test;
use insta::assert_snapshot;

/// `{'leaf': [1, 2], 'sibling': {'k': 0}}`, with handles on both children.
fn tree() -> (Value, Value, Value) {
    let leaf = Value::list([Value::Int(1), Value::Int(2)]);
    let sibling = Value::dict([("k", Value::Int(0))]);
    let root = Value::dict([("leaf", leaf.clone()), ("sibling", sibling.clone())]);
    (root, leaf, sibling)
}

#[test]
fn reads_are_transparent_and_never_copy() {
    let (root, leaf, _) = tree();
    let mut cow = CopyOnWrite::new();
    let r = cow.wrap(root.clone());
    let l = cow.get_item(r, "leaf").unwrap();
    let first = cow.get_item(l, 0).unwrap();

    assert_eq!(cow.unwrap(first), Value::Int(1));
    assert_eq!(cow.unwrap(l), leaf);
    assert_eq!(cow.unwrap(r), root);
    assert_eq!(cow.copies(), 0);
    assert!(!cow.is_copy(r));
    assert_eq!(cow.get_item(r, "leaf").unwrap(), l);
}

#[test]
fn writes_leave_the_original_alone() {
    let (root, leaf, sibling) = tree();
    let mut cow = CopyOnWrite::new();
    let r = cow.wrap(root.clone());
    let l = cow.get_item(r, "leaf").unwrap();
    let s = cow.get_item(r, "sibling").unwrap();
    cow.set_item(l, 0, 99).unwrap();

    assert_snapshot!(root.to_string(), @"{'leaf': [1, 2], 'sibling': {'k': 0}}");
    assert_snapshot!(leaf.to_string(), @"[1, 2]");
    assert_snapshot!(cow.unwrap(r).to_string(), @"{'leaf': [99, 2], 'sibling': {'k': 0}}");

    assert!(cow.is_copy(r));
    assert!(cow.is_copy(l));
    assert!(!cow.is_copy(s));
    let shared = cow.unwrap(r).get_item(&Value::from("sibling")).unwrap();
    assert_eq!(shared, sibling);
}

#[test]
fn each_node_is_copied_once() {
    let (root, _, _) = tree();
    let mut cow = CopyOnWrite::new();
    let r = cow.wrap(root);
    let l = cow.get_item(r, "leaf").unwrap();
    cow.set_item(l, 0, 10).unwrap();
    assert_eq!(cow.copies(), 2);

    cow.set_item(l, 1, 20).unwrap();
    cow.set_item(r, "extra", true).unwrap();
    assert_eq!(cow.copies(), 2);

    let s = cow.get_item(r, "sibling").unwrap();
    cow.set_item(s, "k", 1).unwrap();
    assert_eq!(cow.copies(), 3);
    assert_snapshot!(
        cow.unwrap(r).to_string(),
        @"{'leaf': [10, 20], 'sibling': {'k': 1}, 'extra': True}"
    );
}

#[test]
fn deletes_copy_first() {
    let (root, leaf, _) = tree();
    let mut cow = CopyOnWrite::new();
    let r = cow.wrap(root.clone());
    let l = cow.get_item(r, "leaf").unwrap();
    cow.del_item(l, 0).unwrap();
    cow.del_item(r, "sibling").unwrap();

    assert_snapshot!(cow.unwrap(r).to_string(), @"{'leaf': [2]}");
    assert_snapshot!(root.to_string(), @"{'leaf': [1, 2], 'sibling': {'k': 0}}");
    assert_snapshot!(leaf.to_string(), @"[1, 2]");
}

#[test]
fn stale_children_are_dropped_after_a_delete() {
    let list = Value::list([Value::Int(1), Value::Int(2), Value::Int(3)]);
    let mut cow = CopyOnWrite::new();
    let r = cow.wrap(list);
    let second = cow.get_item(r, 1).unwrap();
    let third = cow.get_item(r, 2).unwrap();
    assert_eq!(cow.unwrap(second), Value::Int(2));
    assert_eq!(cow.unwrap(third), Value::Int(3));

    cow.del_item(r, 0).unwrap();
    let second_now = cow.get_item(r, 1).unwrap();
    assert_ne!(second_now, second);
    assert_eq!(cow.unwrap(second_now), Value::Int(3));
    assert!(cow.get_item(r, 2).is_err());
}

#[test]
fn a_grafted_node_updates_every_parent() {
    let shared = Value::list([Value::Int(1)]);
    let a = Value::dict([("x", shared.clone())]);
    let b = Value::dict([("y", Value::None)]);

    let mut cow = CopyOnWrite::new();
    let ra = cow.wrap(a.clone());
    let rb = cow.wrap(b.clone());
    let x = cow.get_item(ra, "x").unwrap();
    cow.graft(rb, Key::item("y"), x).unwrap();
    cow.set_item(x, 0, 7).unwrap();

    assert_snapshot!(cow.unwrap(ra).to_string(), @"{'x': [7]}");
    assert_snapshot!(cow.unwrap(rb).to_string(), @"{'y': [7]}");
    assert_snapshot!(a.to_string(), @"{'x': [1]}");
    assert_snapshot!(b.to_string(), @"{'y': None}");
    assert_snapshot!(shared.to_string(), @"[1]");

    let in_a = cow.unwrap(ra).get_item(&Value::from("x")).unwrap();
    let in_b = cow.unwrap(rb).get_item(&Value::from("y")).unwrap();
    assert_eq!(in_a, in_b);
    assert_eq!(cow.parents(x).count(), 2);
}

#[test]
fn method_calls_mutate_the_copy() {
    let items = Value::list([Value::Int(1)]);
    let root = Value::dict([("items", items.clone())]);
    let mut cow = CopyOnWrite::new();
    let r = cow.wrap(root.clone());
    let i = cow.get_item(r, "items").unwrap();

    cow.call_method(i, "append", &Args::new().with_arg(2)).unwrap();
    cow.call_method(i, "append", &Args::new().with_arg(3)).unwrap();

    assert_snapshot!(cow.unwrap(r).to_string(), @"{'items': [1, 2, 3]}");
    assert_snapshot!(items.to_string(), @"[1]");
    assert_eq!(cow.copies(), 2);
}

#[test]
fn calling_a_non_callable_fails() {
    let mut cow = CopyOnWrite::new();
    let r = cow.wrap(Value::dict([("n", Value::Int(1))]));
    let n = cow.get_item(r, "n").unwrap();
    let err = cow.call(n, &Args::new()).unwrap_err();
    assert!(matches!(err, FigError::NotCallable { .. }));
}

fn counted_classes(calls: &Rc<Cell<usize>>) -> (Rc<Class>, Rc<Class>) {
    let counter = calls.clone();
    let inner = Class::builder("Inner")
        .field("size", 1)
        .slot("double")
        .derive(move |obj| {
            counter.set(counter.get() + 1);
            let size = obj.get_attr("size")?.as_int().unwrap_or_default();
            obj.set_attr("double", Value::Int(size * 2))
        })
        .build()
        .unwrap();
    let factory = inner.clone();
    let outer = Class::builder("Outer")
        .fig()
        .field_with("inner", move || {
            factory.instantiate(&Args::new()).unwrap_or(Value::None)
        })
        .build()
        .unwrap();
    (inner, outer)
}

#[test]
fn exit_finalizes_children_first_and_installs_the_result() {
    let calls = Rc::new(Cell::new(0));
    let (_, outer) = counted_classes(&calls);
    let config = outer.instantiate(&Args::new()).unwrap();

    let (finished, ()) = CopyOnWrite::scope(config.clone(), |cow, root| {
        let inner = cow.get_attr(root, "inner")?;
        cow.set_attr(inner, "size", 5)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(calls.get(), 1);
    assert!(finished.is_finalized());
    assert!(finished.get_attr("inner").unwrap().is_finalized());
    assert_snapshot!(finished.to_string(), @"Outer(inner=Inner(size=5, double=10))");
    assert_snapshot!(config.to_string(), @"Outer(inner=Inner(size=1))");
}

#[test]
fn explicit_finalize_is_not_repeated_on_exit() {
    let calls = Rc::new(Cell::new(0));
    let (inner, _) = counted_classes(&calls);
    let config = inner.instantiate(&Args::new().with_kwarg("size", 3)).unwrap();

    let (finished, result) = CopyOnWrite::scope(config, |cow, root| {
        let done = cow.call_method(root, "finalize", &Args::new())?;
        assert!(cow.is_finalized(root));
        Ok(cow.unwrap(done))
    })
    .unwrap();

    assert_eq!(calls.get(), 1);
    assert_snapshot!(result.to_string(), @"Inner(size=3, double=6)");
    assert!(!finished.is_finalized());
}

#[test]
fn the_body_error_wins() {
    let err = CopyOnWrite::scope(Value::list([]), |cow, root| {
        cow.get_item(root, 3)?;
        Ok(())
    })
    .unwrap_err();
    assert!(matches!(err, FigError::IndexOutOfRange { index: 3, len: 0 }));
}

#[test]
fn a_config_reached_twice_is_finalized_once() {
    let calls = Rc::new(Cell::new(0));
    let (inner, _) = counted_classes(&calls);
    let shared = inner.instantiate(&Args::new()).unwrap();
    let pair = Class::builder("Pair")
        .slot("x")
        .slot("y")
        .build()
        .unwrap()
        .instantiate(&Args::new().with_kwarg("x", shared.clone()).with_kwarg("y", shared.clone()))
        .unwrap();

    let (finished, ()) = CopyOnWrite::scope(pair.clone(), |cow, root| {
        cow.get_attr(root, "x")?;
        cow.get_attr(root, "y")?;
        Ok(())
    })
    .unwrap();

    assert_eq!(calls.get(), 1);
    let x = finished.get_attr("x").unwrap();
    assert!(x.is_finalized());
    assert_eq!(x, finished.get_attr("y").unwrap());
    assert_eq!(pair.get_attr("x").unwrap(), shared);
    assert!(!shared.is_finalized());
}

#[test]
fn an_already_finalized_config_is_left_alone() {
    let calls = Rc::new(Cell::new(0));
    let (inner, _) = counted_classes(&calls);
    let done = inner.instantiate(&Args::new()).unwrap().finalize().unwrap();
    assert_eq!(calls.get(), 1);

    let (finished, ()) = CopyOnWrite::scope(done.clone(), |cow, root| {
        cow.get_attr(root, "size")?;
        Ok(())
    })
    .unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(finished, done);
}

#[test]
fn grafting_an_ancestor_keeps_its_copy() {
    let leaf = Value::dict([("v", Value::Int(0))]);
    let root = Value::dict([("leaf", leaf.clone())]);
    let mut cow = CopyOnWrite::new();
    let r = cow.wrap(root.clone());
    let l = cow.get_item(r, "leaf").unwrap();
    cow.graft(l, Key::item("up"), r).unwrap();
    cow.set_item(r, "marker", 1).unwrap();

    let copied_root = cow.unwrap(r);
    let copied_leaf = copied_root.get_item(&Value::from("leaf")).unwrap();
    assert_eq!(copied_leaf.get_item(&Value::from("up")).unwrap(), copied_root);
    assert_snapshot!(leaf.to_string(), @"{'v': 0}");
    assert_snapshot!(root.to_string(), @"{'leaf': {'v': 0}}");
}
