//! Callables: functions, bound methods and the built-in container methods.

use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;

use indexmap::IndexMap;

use crate::FigError;
use crate::class::{Class, Finalizer};
use crate::tracing_macros::trace;
use crate::value::{Obj, Object, Value};

/// Arguments of a call: positional values then keyword values.
#[derive(Clone, Default)]
pub struct Args {
    args: Vec<Value>,
    kwargs: IndexMap<Rc<str>, Value>,
}

impl Args {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn with_kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(Rc::from(name), value.into());
        self
    }

    /// Positional argument at `position`.
    pub fn arg(&self, position: usize) -> Option<&Value> {
        self.args.get(position)
    }

    /// Keyword argument `name`.
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// All positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// All keyword arguments, in the order they were given.
    pub fn kwargs(&self) -> &IndexMap<Rc<str>, Value> {
        &self.kwargs
    }

    /// True if there are no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// Positional argument at `position`, or [`FigError::MissingArgument`].
    pub fn require(&self, callee: &str, position: usize) -> Result<&Value, FigError> {
        self.args.get(position).ok_or_else(|| FigError::MissingArgument {
            callee: Rc::from(callee),
            position,
        })
    }

    /// Fail if more than `max` positional arguments or any keyword was given.
    pub fn expect_at_most(&self, callee: &str, max: usize) -> Result<(), FigError> {
        if let Some(extra) = self.args.get(max) {
            return Err(FigError::UnexpectedArgument {
                callee: Rc::from(callee),
                argument: extra.to_string(),
            });
        }
        if let Some(name) = self.kwargs.keys().next() {
            return Err(FigError::UnexpectedArgument {
                callee: Rc::from(callee),
                argument: name.to_string(),
            });
        }
        Ok(())
    }

    /// These arguments without the first positional one.
    pub fn without_first(&self) -> Args {
        Args {
            args: self.args.iter().skip(1).cloned().collect(),
            kwargs: self.kwargs.clone(),
        }
    }

    /// These arguments followed by `later`; later keywords win.
    pub fn merged(&self, later: &Args) -> Args {
        let mut merged = self.clone();
        merged.args.extend(later.args.iter().cloned());
        for (name, value) in &later.kwargs {
            merged.kwargs.insert(name.clone(), value.clone());
        }
        merged
    }
}

impl FromIterator<Value> for Args {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().collect(),
            kwargs: IndexMap::new(),
        }
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{arg}")?;
        }
        for (name, value) in &self.kwargs {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        f.write_str(")")
    }
}

/// Body of a [`Func`].
pub type FuncBody = dyn Fn(&Args) -> Result<Value, FigError>;

/// A named function.
#[derive(Clone)]
pub struct Func {
    name: Rc<str>,
    body: Rc<FuncBody>,
}

impl Func {
    /// Wrap a closure.
    pub fn new(name: &str, body: impl Fn(&Args) -> Result<Value, FigError> + 'static) -> Self {
        Self {
            name: Rc::from(name),
            body: Rc::new(body),
        }
    }

    /// The function's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function.
    pub fn call(&self, args: &Args) -> Result<Value, FigError> {
        trace!("call {}{:?}", self.name, args);
        (self.body)(args)
    }

    /// True if both handles share a body.
    pub fn ptr_eq(&self, other: &Func) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.body) as *const () as usize
    }

    /// A new function that calls this one with `bound` in front of its own
    /// arguments. Keywords given at call time override bound ones.
    pub fn partial(&self, bound: Args) -> Func {
        let inner = self.clone();
        Func {
            name: self.name.clone(),
            body: Rc::new(move |args: &Args| inner.call(&bound.merged(args))),
        }
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// A method name bound to its receiver.
#[derive(Clone)]
pub struct BoundMethod {
    receiver: Obj,
    name: Rc<str>,
}

impl BoundMethod {
    pub(crate) fn new(receiver: Obj, name: &str) -> Self {
        Self {
            receiver,
            name: Rc::from(name),
        }
    }

    /// The object the method is bound to.
    pub fn receiver(&self) -> &Obj {
        &self.receiver
    }

    /// The method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the method on its receiver.
    pub fn call(&self, args: &Args) -> Result<Value, FigError> {
        trace!("call {}.{}{:?}", self.receiver.type_name(), self.name, args);
        call_method(&self.receiver, &self.name, args)
    }
}

const LIST_METHODS: &[&str] = &["append", "extend", "insert", "pop", "clear"];
const DICT_METHODS: &[&str] = &["get", "pop", "setdefault", "update", "clear"];
const SET_METHODS: &[&str] = &["add", "discard", "clear"];

enum Receiver {
    List,
    Tuple,
    Dict,
    Set,
    Record(Rc<Class>),
}

fn receiver_kind(obj: &Obj) -> Receiver {
    match &*obj.borrow() {
        Object::List(_) => Receiver::List,
        Object::Tuple(_) => Receiver::Tuple,
        Object::Dict(_) => Receiver::Dict,
        Object::Set(_) => Receiver::Set,
        Object::Record(record) => Receiver::Record(record.class().clone()),
    }
}

/// Capability methods a record gets from its class's finalizer tag.
fn capability_methods(class: &Class) -> &'static [&'static str] {
    match class.finalizer() {
        Some(Finalizer::Fig) => &["finalize", "make", "update"],
        Some(Finalizer::Custom(_)) => &["finalize"],
        None => &[],
    }
}

pub(crate) fn has_method(obj: &Obj, name: &str) -> bool {
    match receiver_kind(obj) {
        Receiver::List => LIST_METHODS.contains(&name),
        Receiver::Tuple => false,
        Receiver::Dict => DICT_METHODS.contains(&name),
        Receiver::Set => SET_METHODS.contains(&name),
        Receiver::Record(class) => {
            class.find_method(name).is_some() || capability_methods(&class).contains(&name)
        }
    }
}

pub(crate) fn call_method(obj: &Obj, name: &str, args: &Args) -> Result<Value, FigError> {
    match receiver_kind(obj) {
        Receiver::List => list_method(obj, name, args),
        Receiver::Dict => dict_method(obj, name, args),
        Receiver::Set => set_method(obj, name, args),
        Receiver::Tuple => Err(crate::value::attribute_not_found(Rc::from("tuple"), name)),
        Receiver::Record(class) => {
            if let Some(method) = class.find_method(name) {
                return method(obj, args);
            }
            let receiver = Value::Object(obj.clone());
            match (name, capability_methods(&class).contains(&name)) {
                ("finalize", true) => {
                    args.expect_at_most("finalize", 0)?;
                    receiver.finalize()
                }
                ("make", true) => {
                    args.expect_at_most("make", 0)?;
                    crate::fig::make_fig(obj)
                }
                ("update", true) => crate::fig::update_method(obj, args),
                _ => Err(crate::value::attribute_not_found(class.name_rc(), name)),
            }
        }
    }
}

/// Members of an iterable value: sequence items, dict keys, set members.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, FigError> {
    let Value::Object(obj) = value else {
        return Err(FigError::WrongType {
            expected: "iterable",
            actual: value.type_name(),
        });
    };
    match &*obj.borrow() {
        Object::List(items) | Object::Tuple(items) => Ok(items.clone()),
        Object::Dict(entries) => Ok(entries.keys().cloned().collect()),
        Object::Set(members) => Ok(members.iter().cloned().collect()),
        Object::Record(record) => Err(FigError::WrongType {
            expected: "iterable",
            actual: record.class().name_rc(),
        }),
    }
}

fn list_method(obj: &Obj, name: &str, args: &Args) -> Result<Value, FigError> {
    match name {
        "append" => {
            args.expect_at_most("append", 1)?;
            let item = args.require("append", 0)?.clone();
            with_list(obj, |items| items.push(item));
            Ok(Value::None)
        }
        "extend" => {
            args.expect_at_most("extend", 1)?;
            // collected first: `xs.extend(xs)` must not borrow twice
            let extra = iterate(args.require("extend", 0)?)?;
            with_list(obj, |items| items.extend(extra));
            Ok(Value::None)
        }
        "insert" => {
            args.expect_at_most("insert", 2)?;
            let index = int_arg(args, "insert", 0)?;
            let item = args.require("insert", 1)?.clone();
            with_list(obj, |items| {
                let len = items.len() as i64;
                let at = if index < 0 { (len + index).max(0) } else { index.min(len) };
                items.insert(at as usize, item);
            });
            Ok(Value::None)
        }
        "pop" => {
            args.expect_at_most("pop", 1)?;
            let index = match args.arg(0) {
                Some(_) => int_arg(args, "pop", 0)?,
                None => -1,
            };
            let key = Value::Int(index);
            let item = obj.get_item(&key)?;
            obj.del_item(&key)?;
            Ok(item)
        }
        "clear" => {
            args.expect_at_most("clear", 0)?;
            with_list(obj, Vec::clear);
            Ok(Value::None)
        }
        _ => Err(crate::value::attribute_not_found(Rc::from("list"), name)),
    }
}

fn dict_method(obj: &Obj, name: &str, args: &Args) -> Result<Value, FigError> {
    match name {
        "get" => {
            args.expect_at_most("get", 2)?;
            let key = args.require("get", 0)?;
            let found = with_dict(obj, |entries| entries.get(key).cloned());
            Ok(found.unwrap_or_else(|| args.arg(1).cloned().unwrap_or(Value::None)))
        }
        "pop" => {
            args.expect_at_most("pop", 2)?;
            let key = args.require("pop", 0)?;
            match (with_dict(obj, |entries| entries.shift_remove(key)), args.arg(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(FigError::KeyNotFound {
                    key: key.to_string(),
                }),
            }
        }
        "setdefault" => {
            args.expect_at_most("setdefault", 2)?;
            let key = args.require("setdefault", 0)?.clone();
            let default = args.arg(1).cloned().unwrap_or(Value::None);
            Ok(with_dict(obj, |entries| {
                entries.entry(key).or_insert(default).clone()
            }))
        }
        "update" => {
            if args.args().len() > 1 {
                args.expect_at_most("update", 1)?;
            }
            let mut incoming = Vec::new();
            if let Some(other) = args.arg(0) {
                let Some(Object::Dict(entries)) = other.as_obj().map(|o| o.borrow().clone())
                else {
                    return Err(FigError::WrongType {
                        expected: "dict",
                        actual: other.type_name(),
                    });
                };
                incoming.extend(entries);
            }
            for (name, value) in args.kwargs() {
                incoming.push((Value::Str(name.clone()), value.clone()));
            }
            with_dict(obj, |entries| entries.extend(incoming));
            Ok(Value::None)
        }
        "clear" => {
            args.expect_at_most("clear", 0)?;
            with_dict(obj, |entries| entries.clear());
            Ok(Value::None)
        }
        _ => Err(crate::value::attribute_not_found(Rc::from("dict"), name)),
    }
}

fn set_method(obj: &Obj, name: &str, args: &Args) -> Result<Value, FigError> {
    let mut object = obj.borrow_mut();
    let Object::Set(members) = &mut *object else {
        return Err(crate::value::attribute_not_found(object.type_name(), name));
    };
    match name {
        "add" => {
            args.expect_at_most("add", 1)?;
            members.insert(args.require("add", 0)?.clone());
        }
        "discard" => {
            args.expect_at_most("discard", 1)?;
            members.shift_remove(args.require("discard", 0)?);
        }
        "clear" => {
            args.expect_at_most("clear", 0)?;
            members.clear();
        }
        _ => return Err(crate::value::attribute_not_found(Rc::from("set"), name)),
    }
    Ok(Value::None)
}

fn int_arg(args: &Args, callee: &str, position: usize) -> Result<i64, FigError> {
    let value = args.require(callee, position)?;
    value.as_int().ok_or_else(|| FigError::WrongType {
        expected: "int",
        actual: value.type_name(),
    })
}

fn with_list<R>(obj: &Obj, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
    match &mut *obj.borrow_mut() {
        Object::List(items) => f(items),
        _ => f(&mut Vec::new()),
    }
}

fn with_dict<R>(obj: &Obj, f: impl FnOnce(&mut IndexMap<Value, Value>) -> R) -> R {
    match &mut *obj.borrow_mut() {
        Object::Dict(entries) => f(entries),
        _ => f(&mut IndexMap::new()),
    }
}
