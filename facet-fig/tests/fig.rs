//! Config records: make, finalize and update.

use std::cell::RefCell;
use std::rc::Rc;

use facet_fig::{
    Args, Class, FigError, Func, Value, attribute_names, finalize_value, make, update,
};
use facet_testhelpers::test;
use indexmap::IndexMap;
use insta::assert_snapshot;

/// A parent constructor that records what it was called with.
fn recorder(name: &str) -> Func {
    let label = name.to_string();
    Func::new(name, move |args: &Args| {
        Ok(Value::from(format!("{label}{args:?}")))
    })
}

fn names(value: &Value) -> Vec<String> {
    attribute_names(value)
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[test]
fn make_passes_the_finalized_config() {
    let config = Class::builder("Config")
        .nested_in("Model")
        .field("width", 128)
        .makes(recorder("Model"))
        .build()
        .unwrap();
    let instance = config
        .instantiate(&Args::new().with_kwarg("width", 256))
        .unwrap();

    let made = make(&instance).unwrap();
    assert_snapshot!(made.as_str().unwrap(), @"Model(Model.Config(width=256))");
}

#[test]
fn make_with_kwargs_spreads_the_fields() {
    let config = Class::builder("Config")
        .nested_in("Layer")
        .field("units", 4)
        .field("activation", "relu")
        .slot("unset")
        .makes_with_kwargs(recorder("Layer"))
        .build()
        .unwrap();
    let instance = config.instantiate(&Args::new()).unwrap();

    let made = make(&instance).unwrap();
    assert_snapshot!(made.as_str().unwrap(), @"Layer(units=4, activation='relu')");
}

#[test]
fn make_without_a_parent_fails() {
    let config = Class::builder("Orphan").fig().build().unwrap();
    let instance = config.instantiate(&Args::new()).unwrap();
    let err = make(&instance).unwrap_err();
    assert!(matches!(err, FigError::NoParentClass { .. }));
    assert_eq!(err.to_string(), "Orphan must be nested in a parent class to make it");
}

#[test]
fn required_fields_must_be_given() {
    let config = Class::builder("Config").required("path").fig().build().unwrap();
    let err = config.instantiate(&Args::new()).unwrap_err();
    assert!(matches!(err, FigError::MissingField { .. }));
}

#[test]
fn finalize_copies_and_keeps_the_original() {
    let config = Class::builder("Config").field("n", 1).fig().build().unwrap();
    let original = config.instantiate(&Args::new()).unwrap();
    let finalized = original.finalize().unwrap();

    assert!(finalized.is_finalized());
    assert!(!original.is_finalized());
    assert_ne!(finalized, original);
    assert_eq!(names(&finalized), ["n"]);

    // finalizing again yields another copy, not the same object
    assert_ne!(finalized.finalize().unwrap(), finalized);
}

#[test]
fn nested_configs_finalize_inside_containers() {
    let leaf = Class::builder("Leaf")
        .field("n", 1)
        .slot("twice")
        .derive(|obj| {
            let n = obj.get_attr("n")?.as_int().unwrap_or_default();
            obj.set_attr("twice", Value::Int(n * 2))
        })
        .build()
        .unwrap();
    let leaf_of = |n: i64| leaf.instantiate(&Args::new().with_kwarg("n", n)).unwrap();

    let data = Value::dict([
        ("list", Value::list([leaf_of(1), Value::Int(0)])),
        ("tuple", Value::tuple([leaf_of(2)])),
        ("set", Value::set([Value::from("plain")])),
        ("nested", Value::dict([("leaf", leaf_of(3))])),
    ]);
    let finalized = finalize_value(&data).unwrap();

    assert_snapshot!(finalized.to_string(), @"{'list': [Leaf(n=1, twice=2), 0], 'tuple': (Leaf(n=2, twice=4),), 'set': {'plain'}, 'nested': {'leaf': Leaf(n=3, twice=6)}}");
    assert_snapshot!(data.to_string(), @"{'list': [Leaf(n=1), 0], 'tuple': (Leaf(n=2),), 'set': {'plain'}, 'nested': {'leaf': Leaf(n=3)}}");
    assert_eq!(finalized.type_name().as_ref(), "dict");
    let tuple = finalized.get_item(&Value::from("tuple")).unwrap();
    assert_eq!(tuple.type_name().as_ref(), "tuple");
}

#[test]
fn finalize_value_terminates_on_cycles() {
    let config = Class::builder("Node").slot("next").fig().build().unwrap();
    let node = config.instantiate(&Args::new()).unwrap();
    node.set_attr("next", node.clone()).unwrap();

    let finalized = finalize_value(&node).unwrap();
    assert!(finalized.is_finalized());
    assert_eq!(finalized.get_attr("next").unwrap(), node);
}

#[test]
fn derive_hooks_run_outermost_base_first() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let base_log = order.clone();
    let base = Class::builder("Base")
        .derive(move |_| {
            base_log.borrow_mut().push("Base");
            Ok(())
        })
        .build()
        .unwrap();
    let child_log = order.clone();
    let child = Class::builder("Child")
        .base(&base)
        .derive(move |_| {
            child_log.borrow_mut().push("Child");
            Ok(())
        })
        .build()
        .unwrap();

    child.instantiate(&Args::new()).unwrap().finalize().unwrap();
    assert_eq!(*order.borrow(), ["Base", "Child"]);
}

fn optimizer() -> Rc<Class> {
    Class::builder("Optimizer")
        .field("lr", 0.1)
        .field("momentum", 0.9)
        .fig()
        .build()
        .unwrap()
}

#[test]
fn update_copies_source_then_applies_overrides() {
    let class = optimizer();
    let target = class.instantiate(&Args::new()).unwrap();
    let source = class
        .instantiate(&Args::new().with_kwarg("lr", 0.5).with_kwarg("momentum", 0.0))
        .unwrap();
    let mut overrides = IndexMap::new();
    overrides.insert(Rc::from("lr"), Value::Float(0.01));

    update(&target, Some(&source), false, &overrides).unwrap();
    assert_snapshot!(target.to_string(), @"Optimizer(lr=0.01, momentum=0.0)");
}

#[test]
fn update_skip_missing_only_writes_known_names() {
    let sgd = Class::builder("Sgd").field("lr", 0.1).dynamic().fig().build().unwrap();
    let source = Class::builder("Source")
        .field("lr", 0.3)
        .field("nesterov", true)
        .build()
        .unwrap()
        .instantiate(&Args::new())
        .unwrap();

    let skipping = sgd.instantiate(&Args::new()).unwrap();
    update(&skipping, Some(&source), true, &IndexMap::new()).unwrap();
    assert_snapshot!(skipping.to_string(), @"Sgd(lr=0.3)");

    let adding = sgd.instantiate(&Args::new()).unwrap();
    update(&adding, Some(&source), false, &IndexMap::new()).unwrap();
    assert_snapshot!(adding.to_string(), @"Sgd(lr=0.3, nesterov=True)");
}

#[test]
fn update_skips_what_the_target_cannot_hold() {
    let class = optimizer();
    let target = class.instantiate(&Args::new()).unwrap();
    let source = Class::builder("Wide")
        .field("lr", 1.0)
        .field("extra", 2)
        .build()
        .unwrap()
        .instantiate(&Args::new())
        .unwrap();

    update(&target, Some(&source), false, &IndexMap::new()).unwrap();
    assert_snapshot!(target.to_string(), @"Optimizer(lr=1.0, momentum=0.9)");
}

#[test]
fn update_method_takes_keywords() {
    let class = optimizer();
    let target = class.instantiate(&Args::new()).unwrap();
    let returned = target
        .call_method(
            "update",
            &Args::new()
                .with_arg(Value::None)
                .with_kwarg("momentum", 0.5)
                .with_kwarg("skip_missing", true),
        )
        .unwrap();

    assert_eq!(returned, target);
    assert_snapshot!(target.to_string(), @"Optimizer(lr=0.1, momentum=0.5)");

    let err = target
        .call_method("update", &Args::new().with_arg(Value::None).with_arg(1))
        .unwrap_err();
    assert!(matches!(err, FigError::UnexpectedArgument { .. }));
}

#[test]
fn unknown_attributes_are_reported() {
    let class = optimizer();
    let target = class.instantiate(&Args::new()).unwrap();
    let err = target.get_attr("beta").unwrap_err();
    assert!(err.is_attribute_not_found());
    assert_eq!(err.to_string(), "'Optimizer' object has no attribute 'beta'");
}
