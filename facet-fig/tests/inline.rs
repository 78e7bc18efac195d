//! Function calls described as editable configs.

use std::cell::Cell;
use std::rc::Rc;

use facet_fig::{
    Args, Class, CopyOnWrite, FigError, Func, Value, inline_config, is_inline_config, make,
    partial_config,
};
use facet_testhelpers::test;
use insta::assert_snapshot;

fn add() -> Func {
    Func::new("add", |args: &Args| {
        let a = args.require("add", 0)?.as_int().unwrap_or_default();
        let b = match args.kwarg("b") {
            Some(b) => b.as_int().unwrap_or_default(),
            None => args.require("add", 1)?.as_int().unwrap_or_default(),
        };
        Ok(Value::Int(a + b))
    })
}

fn echo() -> Func {
    Func::new("echo", |args: &Args| Ok(Value::from(format!("echo{args:?}"))))
}

#[test]
fn make_calls_the_function() {
    let config = inline_config(add(), Args::new().with_arg(2).with_kwarg("b", 3)).unwrap();
    assert!(is_inline_config(&config));
    assert_eq!(make(&config).unwrap(), Value::Int(5));
    assert_snapshot!(config.to_string(), @"InlineConfig(func=<function add>, args=[2], kwargs={'b': 3})");
}

#[test]
fn keywords_read_and_write_as_attributes() {
    let config = inline_config(add(), Args::new().with_arg(2).with_kwarg("b", 3)).unwrap();
    assert_eq!(config.get_attr("b").unwrap(), Value::Int(3));

    config.set_attr("b", Value::Int(40)).unwrap();
    assert_eq!(make(&config).unwrap(), Value::Int(42));

    config.del_attr("b").unwrap();
    config.set_attr("args", Value::list([Value::Int(1), Value::Int(1)])).unwrap();
    assert_eq!(make(&config).unwrap(), Value::Int(2));
    assert!(config.get_attr("b").unwrap_err().is_attribute_not_found());
}

#[test]
fn nested_inline_configs_are_made_first() {
    let inner = inline_config(add(), Args::new().with_arg(1).with_arg(2)).unwrap();
    let outer = inline_config(echo(), Args::new().with_arg(inner).with_kwarg("tag", "x")).unwrap();
    assert_snapshot!(make(&outer).unwrap().as_str().unwrap(), @"echo(3, tag='x')");
}

#[test]
fn config_arguments_are_finalized_not_made() {
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let settings = Class::builder("Settings")
        .field("depth", 2)
        .derive(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        })
        .build()
        .unwrap()
        .instantiate(&Args::new())
        .unwrap();

    let config = inline_config(echo(), Args::new().with_kwarg("settings", settings.clone())).unwrap();
    let made = make(&config).unwrap();

    assert_eq!(calls.get(), 1);
    assert_snapshot!(made.as_str().unwrap(), @"echo(settings=Settings(depth=2))");
    assert!(!settings.is_finalized());
}

#[test]
fn finalize_leaves_the_original_kwargs_alone() {
    let config = inline_config(add(), Args::new().with_arg(1).with_kwarg("b", 1)).unwrap();
    let finalized = config.finalize().unwrap();
    assert!(finalized.is_finalized());

    finalized.set_attr("b", Value::Int(100)).unwrap();
    assert_eq!(config.get_attr("b").unwrap(), Value::Int(1));
    assert_eq!(make(&finalized).unwrap(), Value::Int(101));
}

#[test]
fn update_writes_keywords() {
    let config = inline_config(add(), Args::new().with_arg(1).with_kwarg("b", 1)).unwrap();
    config
        .call_method(
            "update",
            &Args::new().with_kwarg("b", 9).with_kwarg("skip_missing", true),
        )
        .unwrap();
    assert_eq!(make(&config).unwrap(), Value::Int(10));

    let err = config
        .call_method("update", &Args::new().with_arg(Value::None).with_arg(2))
        .unwrap_err();
    assert!(matches!(err, FigError::UnexpectedArgument { .. }));
}

#[test]
fn partial_binds_without_calling() {
    let config = partial_config(add(), Args::new().with_kwarg("b", 10)).unwrap();
    assert!(is_inline_config(&config));

    let bound = make(&config).unwrap();
    assert!(bound.as_func().is_some());
    assert_eq!(bound.call(&Args::new().with_arg(5)).unwrap(), Value::Int(15));
    assert_eq!(
        bound
            .call(&Args::new().with_arg(5).with_kwarg("b", 1))
            .unwrap(),
        Value::Int(6)
    );
}

#[test]
fn inline_configs_edit_through_copy_on_write() {
    let config = inline_config(add(), Args::new().with_arg(1).with_kwarg("b", 2)).unwrap();
    let (edited, ()) = CopyOnWrite::scope(config.clone(), |cow, root| {
        cow.set_attr(root, "b", 20)?;
        Ok(())
    })
    .unwrap();

    assert!(edited.is_finalized());
    assert_eq!(make(&edited).unwrap(), Value::Int(21));
    assert_eq!(make(&config).unwrap(), Value::Int(3));
}

#[test]
fn keyword_writes_survive_a_copy_of_their_config() {
    let config = inline_config(add(), Args::new().with_arg(1).with_kwarg("b", 1)).unwrap();
    let mut cow = CopyOnWrite::new();
    let root = cow.wrap(config.clone());
    let kwargs = cow.get_attr(root, "kwargs").unwrap();

    cow.set_attr(root, "foo", 1).unwrap();
    assert!(cow.is_copy(kwargs));
    cow.set_item(kwargs, "bar", 2).unwrap();

    let edited = cow.unwrap(root).get_attr("kwargs").unwrap();
    assert_eq!(cow.unwrap(kwargs), edited);
    assert_snapshot!(edited.to_string(), @"{'b': 1, 'foo': 1, 'bar': 2}");
    assert_snapshot!(config.get_attr("kwargs").unwrap().to_string(), @"{'b': 1}");
    assert_eq!(cow.copies(), 1);
}
