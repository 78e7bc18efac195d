//! The config capability: `finalize`, `make` and `update` on config records.
//!
//! A config is a record whose class was declared with
//! [`ClassBuilder::fig`](crate::ClassBuilder::fig). Such a class can be
//! nested in the class it builds:
//!
//! ```
//! use facet_fig::{Args, Class, Func, Value, make};
//!
//! let model = Func::new("Model", |args: &Args| {
//!     let config = args.require("Model", 0)?;
//!     Ok(Value::dict([("width", config.get_attr("width")?)]))
//! });
//! let config = Class::builder("Config")
//!     .nested_in("Model")
//!     .field("width", 128)
//!     .makes(model)
//!     .build()
//!     .unwrap();
//!
//! let instance = config.instantiate(&Args::new().with_kwarg("width", 256)).unwrap();
//! assert_eq!(make(&instance).unwrap().to_string(), "{'width': 256}");
//! ```

use alloc::rc::Rc;
use alloc::vec::Vec;
use std::collections::HashSet;

use indexmap::IndexMap;

use crate::FigError;
use crate::call::Args;
use crate::class::Finalizer;
use crate::tracing_macros::{debug, trace};
use crate::value::{Obj, ObjId, Object, Value};

/// Names of the attributes `value` holds: set slots in layout order, then the
/// dynamic store sorted by name. Non-records have none.
pub fn attribute_names(value: &Value) -> Vec<Rc<str>> {
    match value {
        Value::Object(obj) => obj
            .borrow()
            .as_record()
            .map(|record| record.attribute_names())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Finalize everything reachable from `value`, keeping container kinds.
///
/// - finalize-capable values that are not finalized yet are finalized;
/// - lists, tuples, dicts and sets are rebuilt from finalized members;
/// - other records are shallow-copied with finalized attributes;
/// - everything else is returned as is.
///
/// An object met again while it is being finalized is returned unchanged.
pub fn finalize_value(value: &Value) -> Result<Value, FigError> {
    finalize_within(value, &mut HashSet::new())
}

fn finalize_within(value: &Value, active: &mut HashSet<ObjId>) -> Result<Value, FigError> {
    let Value::Object(obj) = value else {
        return Ok(value.clone());
    };
    if !active.insert(obj.id()) {
        trace!("finalize_value: {} is already being finalized", obj.type_name());
        return Ok(value.clone());
    }
    let result = finalize_object(value, obj, active);
    active.remove(&obj.id());
    result
}

fn finalize_object(
    value: &Value,
    obj: &Obj,
    active: &mut HashSet<ObjId>,
) -> Result<Value, FigError> {
    if !value.is_finalized() {
        match value.finalizer() {
            Some(Finalizer::Fig) => return finalize_fig_within(obj, active),
            Some(Finalizer::Custom(_)) => return value.finalize(),
            None => {}
        }
    }

    // snapshot, so finalize hooks below may borrow the object
    let snapshot = obj.borrow().clone();
    let rebuilt = match snapshot {
        Object::List(items) => Object::List(finalize_all(&items, active)?),
        Object::Tuple(items) => Object::Tuple(finalize_all(&items, active)?),
        Object::Dict(entries) => {
            let mut finalized = IndexMap::with_capacity(entries.len());
            for (key, item) in entries {
                finalized.insert(key, finalize_within(&item, active)?);
            }
            Object::Dict(finalized)
        }
        Object::Set(members) => {
            let members: Vec<Value> = members.into_iter().collect();
            Object::Set(finalize_all(&members, active)?.into_iter().collect())
        }
        Object::Record(_) => {
            let copy = obj.shallow_copy();
            finalize_attributes(&copy, active)?;
            return Ok(Value::Object(copy));
        }
    };
    Ok(Value::object(rebuilt))
}

fn finalize_all(items: &[Value], active: &mut HashSet<ObjId>) -> Result<Vec<Value>, FigError> {
    items
        .iter()
        .map(|item| finalize_within(item, active))
        .collect()
}

/// Replace each attribute of the record `copy` by its finalized value.
fn finalize_attributes(copy: &Obj, active: &mut HashSet<ObjId>) -> Result<(), FigError> {
    let attributes = copy
        .borrow()
        .as_record()
        .map(|record| record.attributes())
        .unwrap_or_default();
    for (name, current) in attributes {
        let finalized = finalize_within(&current, active)?;
        if finalized != current {
            copy.set_attr(&name, finalized)?;
        }
    }
    Ok(())
}

/// The default config finalize.
pub(crate) fn finalize_fig(obj: &Obj) -> Result<Value, FigError> {
    let mut active = HashSet::new();
    active.insert(obj.id());
    finalize_fig_within(obj, &mut active)
}

/// Shallow copy, finalize every attribute, set the finalized flag, then run
/// the derive hooks, outermost base first.
fn finalize_fig_within(obj: &Obj, active: &mut HashSet<ObjId>) -> Result<Value, FigError> {
    debug!("finalize {}", obj.type_name());
    let copy = obj.shallow_copy();
    finalize_attributes(&copy, active)?;
    let hooks = match copy.borrow_mut().as_record_mut() {
        Some(record) => {
            record.mark_finalized();
            record.class().derive_hooks()
        }
        None => Vec::new(),
    };
    for hook in hooks {
        hook(&copy)?;
    }
    Ok(Value::Object(copy))
}

/// Call the `make` method of `config`.
///
/// For config records this finalizes the config and constructs the class it
/// is nested in; inline configs call their function.
pub fn make(config: &Value) -> Result<Value, FigError> {
    config.call_method("make", &Args::new())
}

/// `make` of config records.
pub(crate) fn make_fig(obj: &Obj) -> Result<Value, FigError> {
    let config = Value::Object(obj.clone()).finalize()?;
    let Some(finalized) = config.as_obj() else {
        return Err(FigError::WrongType {
            expected: "config record",
            actual: config.type_name(),
        });
    };

    let (maker, class, fields) = match &*finalized.borrow() {
        Object::Record(record) => {
            let class = record.class();
            let fields: Vec<(Rc<str>, Value)> = class
                .layout()
                .iter()
                .filter_map(|field| {
                    let value = record.slot(field.name())?;
                    Some((Rc::from(field.name()), value.clone()))
                })
                .collect();
            (class.maker().cloned(), class.name_rc(), fields)
        }
        other => {
            return Err(FigError::WrongType {
                expected: "config record",
                actual: other.type_name(),
            });
        }
    };
    let Some(maker) = maker else {
        return Err(FigError::NoParentClass { class });
    };

    debug!("make {} with {}", class, maker.parent().name());
    let args = if maker.with_kwargs() {
        fields
            .into_iter()
            .fold(Args::new(), |args, (name, value)| args.with_kwarg(&name, value))
    } else {
        Args::new().with_arg(config.clone())
    };
    maker.parent().call(&args)
}

/// Copy attributes onto `target`.
///
/// Attributes of `source` are copied first, except those named in
/// `overrides`, which are applied afterwards. A source attribute that cannot
/// be read, or that `target` cannot hold, is skipped. With `skip_missing`,
/// only names `target` already holds are written at all.
pub fn update(
    target: &Value,
    source: Option<&Value>,
    skip_missing: bool,
    overrides: &IndexMap<Rc<str>, Value>,
) -> Result<(), FigError> {
    let valid = skip_missing.then(|| attribute_names(target));
    let allowed = |name: &str| {
        valid
            .as_ref()
            .is_none_or(|names| names.iter().any(|valid| &**valid == name))
    };

    if let Some(source) = source {
        for name in attribute_names(source) {
            if overrides.contains_key(&name) || !allowed(name.as_ref()) {
                continue;
            }
            let value = match source.get_attr(&name) {
                Ok(value) => value,
                Err(err) if err.is_attribute_not_found() => continue,
                Err(err) => return Err(err),
            };
            match target.set_attr(&name, value) {
                Ok(()) => {}
                Err(err) if err.is_attribute_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
    }

    for (name, value) in overrides {
        if allowed(name.as_ref()) {
            target.set_attr(name, value.clone())?;
        }
    }
    Ok(())
}

/// `update` of config records: `update(source=None, *, skip_missing=False, **overrides)`.
pub(crate) fn update_method(obj: &Obj, args: &Args) -> Result<Value, FigError> {
    if args.args().len() > 1 {
        return Err(FigError::UnexpectedArgument {
            callee: Rc::from("update"),
            argument: args.args()[1].to_string(),
        });
    }
    let source = args.arg(0).filter(|source| !source.is_none());
    let skip_missing = args
        .kwarg("skip_missing")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let mut overrides = args.kwargs().clone();
    overrides.shift_remove("skip_missing");

    let receiver = Value::Object(obj.clone());
    update(&receiver, source, skip_missing, &overrides)?;
    Ok(receiver)
}
