//! Configs for plain functions.
//!
//! [`inline_config`] stores a function with its arguments; `make()` calls it.
//! Arguments that are themselves configs are finalized first, and nested
//! inline configs are made, so whole call trees can be described as data
//! and edited before anything runs.
//!
//! Keyword arguments double as attributes: reading, writing or deleting an
//! attribute the record does not declare goes to the stored keywords.

use alloc::rc::Rc;
use alloc::vec::Vec;

use indexmap::IndexMap;

use crate::FigError;
use crate::call::{self, Args, Func};
use crate::class::{Class, Record};
use crate::fig::attribute_names;
use crate::tracing_macros::debug;
use crate::value::{Obj, Object, Value};

std::thread_local! {
    static INLINE_CONFIG: Result<Rc<Class>, FigError> = inline_class();
}

fn inline_class() -> Result<Rc<Class>, FigError> {
    Class::builder("InlineConfig")
        .slot("func")
        .field_with("args", || Value::list([]))
        .field_with("kwargs", || Value::object(Object::Dict(IndexMap::new())))
        .route_unknown_to("kwargs")
        .finalize_with(finalize_inline)
        .method("make", |obj, args| {
            args.expect_at_most("make", 0)?;
            make_inline(obj)
        })
        .method("update", update_inline)
        .build()
}

/// A config that calls `func` with `args` when made.
pub fn inline_config(func: Func, args: Args) -> Result<Value, FigError> {
    let class = INLINE_CONFIG.with(Clone::clone)?;
    let mut record = Record::new(&class);
    record.set_attr("func", Value::Func(func))?;
    record.set_attr("args", Value::list(args.args().iter().cloned()))?;
    record.set_attr(
        "kwargs",
        Value::dict(
            args.kwargs()
                .iter()
                .map(|(name, value)| (Value::Str(name.clone()), value.clone())),
        ),
    )?;
    Ok(Value::from(record))
}

/// A config whose `make()` returns `func` with `args` bound, not its result.
pub fn partial_config(func: Func, args: Args) -> Result<Value, FigError> {
    let bind = Func::new("partial", |args: &Args| {
        let target = args.require("partial", 0)?.clone();
        let bound = args.without_first();
        match target {
            Value::Func(func) => Ok(Value::Func(func.partial(bound))),
            other if other.is_callable() => Ok(Value::Func(Func::new(
                "partial",
                move |late: &Args| other.call(&bound.merged(late)),
            ))),
            other => Err(FigError::NotCallable {
                repr: other.to_string(),
            }),
        }
    });
    inline_config(bind, Args::new().with_arg(func).merged(&args))
}

/// True if `value` was built by [`inline_config`] or [`partial_config`].
pub fn is_inline_config(value: &Value) -> bool {
    let Value::Object(obj) = value else {
        return false;
    };
    let object = obj.borrow();
    let Some(record) = object.as_record() else {
        return false;
    };
    INLINE_CONFIG.with(|class| {
        class
            .as_ref()
            .is_ok_and(|class| Rc::ptr_eq(class, record.class()))
    })
}

fn finalize_if_capable(value: &Value) -> Result<Value, FigError> {
    if value.can_finalize() {
        value.finalize()
    } else {
        Ok(value.clone())
    }
}

fn make_if_inline(value: &Value) -> Result<Value, FigError> {
    if is_inline_config(value) {
        value.call_method("make", &Args::new())
    } else {
        Ok(value.clone())
    }
}

fn dict_entries(value: &Value) -> Result<Vec<(Value, Value)>, FigError> {
    match value.as_obj().map(|obj| obj.borrow().clone()) {
        Some(Object::Dict(entries)) => Ok(entries.into_iter().collect()),
        _ => Err(FigError::WrongType {
            expected: "dict",
            actual: value.type_name(),
        }),
    }
}

/// Copy with the direct arguments finalized.
fn finalize_inline(obj: &Obj) -> Result<Value, FigError> {
    let copy = obj.shallow_copy();
    let args = call::iterate(&copy.get_attr("args")?)?
        .iter()
        .map(finalize_if_capable)
        .collect::<Result<Vec<_>, _>>()?;
    let mut kwargs = IndexMap::new();
    for (name, value) in dict_entries(&copy.get_attr("kwargs")?)? {
        kwargs.insert(name, finalize_if_capable(&value)?);
    }
    copy.set_attr("args", Value::list(args))?;
    copy.set_attr("kwargs", Value::object(Object::Dict(kwargs)))?;
    if let Some(record) = copy.borrow_mut().as_record_mut() {
        record.mark_finalized();
    }
    Ok(Value::Object(copy))
}

fn make_inline(obj: &Obj) -> Result<Value, FigError> {
    let config = Value::Object(obj.clone()).finalize()?;
    let func = config.get_attr("func")?;
    let mut args: Args = call::iterate(&config.get_attr("args")?)?
        .iter()
        .map(make_if_inline)
        .collect::<Result<_, _>>()?;
    for (name, value) in dict_entries(&config.get_attr("kwargs")?)? {
        let Value::Str(name) = name else {
            return Err(FigError::WrongType {
                expected: "keyword name",
                actual: name.type_name(),
            });
        };
        args = args.with_kwarg(&name, make_if_inline(&value)?);
    }
    debug!("make inline config {}", func);
    func.call(&args)
}

/// Write the source's attributes and the keyword overrides into the stored
/// keywords. `skip_missing` is accepted and ignored, as there are no fixed
/// names to check against.
fn update_inline(obj: &Obj, args: &Args) -> Result<Value, FigError> {
    if let Some(extra) = args.arg(1) {
        return Err(FigError::UnexpectedArgument {
            callee: Rc::from("update"),
            argument: extra.to_string(),
        });
    }
    let store = obj.get_attr("kwargs")?;
    if let Some(source) = args.arg(0).filter(|source| !source.is_none()) {
        for name in attribute_names(source) {
            if name.starts_with('_') {
                continue;
            }
            match source.get_attr(&name) {
                Ok(value) => store.set_item(&Value::Str(name), value)?,
                Err(err) if err.is_attribute_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
    }
    for (name, value) in args.kwargs() {
        if &**name != "skip_missing" {
            store.set_item(&Value::Str(name.clone()), value.clone())?;
        }
    }
    Ok(Value::Object(obj.clone()))
}
