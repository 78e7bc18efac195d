//! Dynamic values and the shared objects they point at.
//!
//! Scalars ([`Value::Int`], [`Value::Str`], ...) are immutable and have no
//! identity. Containers and records live behind an [`Obj`], a shared handle
//! with identity: cloning a [`Value::Object`] aliases the same object, and
//! [`Obj::shallow_copy`] creates a new object whose members still alias the
//! old one's. That is the model the copy-on-write proxy and the traversal
//! engine are written against.
//!
//! Equality and hashing follow the same split: scalars compare by value
//! (floats by bit pattern), objects and callables by identity. Every value
//! can therefore be a dict key or a set member.

use alloc::collections::BTreeSet;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::{Ref, RefCell, RefMut};
use core::fmt;
use core::hash::{Hash, Hasher};

use indexmap::{IndexMap, IndexSet};

use crate::FigError;
use crate::call::{self, Args, BoundMethod, Func};
use crate::class::{Finalizer, Record};
use crate::tracing_macros::debug;

/// A dynamically typed value.
#[derive(Clone)]
pub enum Value {
    /// The absent value.
    None,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// Text. Always a leaf, never traversed.
    Str(Rc<str>),
    /// Bytes. Always a leaf, never traversed.
    Bytes(Rc<[u8]>),
    /// A named function.
    Func(Func),
    /// A method bound to its receiver.
    Method(BoundMethod),
    /// A shared container or record.
    Object(Obj),
}

/// Identity of an [`Obj`], stable for as long as the object is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId(usize);

/// Shared handle to an [`Object`].
#[derive(Clone)]
pub struct Obj(Rc<RefCell<Object>>);

/// Container and record shapes.
#[derive(Clone)]
pub enum Object {
    /// Ordered, mutable sequence.
    List(Vec<Value>),
    /// Ordered, immutable sequence.
    Tuple(Vec<Value>),
    /// Key-unique mapping, in insertion order.
    Dict(IndexMap<Value, Value>),
    /// Set, in insertion order.
    Set(IndexSet<Value>),
    /// Attribute-bearing object.
    Record(Record),
}

/// How a proxy node (or a path step) reaches a value from its parent.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Attribute access, `parent.name`.
    Attr(Rc<str>),
    /// Item access, `parent[key]`.
    Item(Value),
}

impl Key {
    /// Attribute key.
    pub fn attr(name: &str) -> Self {
        Key::Attr(Rc::from(name))
    }

    /// Item key.
    pub fn item(key: impl Into<Value>) -> Self {
        Key::Item(key.into())
    }

    /// True for the attribute key with this name.
    pub fn is_attr(&self, name: &str) -> bool {
        matches!(self, Key::Attr(attr) if &**attr == name)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Attr(name) => write!(f, ".{name}"),
            Key::Item(key) => write!(f, "[{key}]"),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ============================================================================
// Obj
// ============================================================================

impl Obj {
    /// Allocate a new object.
    pub fn new(object: Object) -> Self {
        Obj(Rc::new(RefCell::new(object)))
    }

    /// Identity of this object.
    pub fn id(&self) -> ObjId {
        ObjId(Rc::as_ptr(&self.0) as *const () as usize)
    }

    /// True if both handles point at the same object.
    pub fn ptr_eq(&self, other: &Obj) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Borrow the object.
    ///
    /// # Panics
    /// Panics if the object is currently borrowed mutably.
    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    /// Borrow the object mutably.
    ///
    /// # Panics
    /// Panics if the object is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, Object> {
        self.0.borrow_mut()
    }

    /// A new object with the same members, which keep aliasing the old ones.
    ///
    /// Records that route unknown attributes into a dict slot get their own
    /// copy of that dict, so that attribute writes on the copy cannot reach
    /// the original.
    pub fn shallow_copy(&self) -> Obj {
        let mut object = self.borrow().clone();
        if let Object::Record(record) = &mut object {
            record.detach_routed_store();
        }
        Obj::new(object)
    }

    /// Name of the object's type, as used in errors and reprs.
    pub fn type_name(&self) -> Rc<str> {
        self.borrow().type_name()
    }

    /// Read an attribute: record fields first, then methods.
    pub fn get_attr(&self, name: &str) -> Result<Value, FigError> {
        let found = match &*self.borrow() {
            Object::Record(record) => record.lookup(name),
            _ => None,
        };
        if let Some(value) = found {
            return Ok(value);
        }
        if call::has_method(self, name) {
            return Ok(Value::Method(BoundMethod::new(self.clone(), name)));
        }
        Err(attribute_not_found(self.type_name(), name))
    }

    /// Write an attribute. Only records have writable attributes.
    pub fn set_attr(&self, name: &str, value: Value) -> Result<(), FigError> {
        let mut object = self.borrow_mut();
        match &mut *object {
            Object::Record(record) => record.set_attr(name, value),
            other => Err(attribute_not_found(other.type_name(), name)),
        }
    }

    /// Delete an attribute.
    pub fn del_attr(&self, name: &str) -> Result<(), FigError> {
        let mut object = self.borrow_mut();
        match &mut *object {
            Object::Record(record) => record.del_attr(name),
            other => Err(attribute_not_found(other.type_name(), name)),
        }
    }

    /// Read an item: sequences by integer index, dicts by key.
    pub fn get_item(&self, key: &Value) -> Result<Value, FigError> {
        match &*self.borrow() {
            Object::List(items) | Object::Tuple(items) => {
                let index = sequence_index(key, items.len())?;
                Ok(items[index].clone())
            }
            Object::Dict(entries) => entries.get(key).cloned().ok_or_else(|| {
                FigError::KeyNotFound {
                    key: key.to_string(),
                }
            }),
            other => Err(FigError::NotSubscriptable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Write an item. Lists need an existing index; dicts insert or replace.
    pub fn set_item(&self, key: &Value, value: Value) -> Result<(), FigError> {
        let mut object = self.borrow_mut();
        match &mut *object {
            Object::List(items) => {
                let index = sequence_index(key, items.len())?;
                items[index] = value;
                Ok(())
            }
            Object::Dict(entries) => {
                entries.insert(key.clone(), value);
                Ok(())
            }
            Object::Tuple(_) => Err(FigError::Immutable {
                type_name: Rc::from("tuple"),
            }),
            other => Err(FigError::NotSubscriptable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Delete an item. Dicts keep the order of the remaining entries.
    pub fn del_item(&self, key: &Value) -> Result<(), FigError> {
        let mut object = self.borrow_mut();
        match &mut *object {
            Object::List(items) => {
                let index = sequence_index(key, items.len())?;
                items.remove(index);
                Ok(())
            }
            Object::Dict(entries) => match entries.shift_remove(key) {
                Some(_) => Ok(()),
                None => Err(FigError::KeyNotFound {
                    key: key.to_string(),
                }),
            },
            Object::Tuple(_) => Err(FigError::Immutable {
                type_name: Rc::from("tuple"),
            }),
            other => Err(FigError::NotSubscriptable {
                type_name: other.type_name(),
            }),
        }
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Repr::new().write_obj(self, f)
    }
}

impl Object {
    /// Name of this object's type.
    pub fn type_name(&self) -> Rc<str> {
        match self {
            Object::List(_) => Rc::from("list"),
            Object::Tuple(_) => Rc::from("tuple"),
            Object::Dict(_) => Rc::from("dict"),
            Object::Set(_) => Rc::from("set"),
            Object::Record(record) => record.class().name_rc(),
        }
    }

    /// The record, if this is one.
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Object::Record(record) => Some(record),
            _ => None,
        }
    }

    /// The record, mutably, if this is one.
    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Object::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// Resolve a (possibly negative) integer index into a sequence position.
fn sequence_index(key: &Value, len: usize) -> Result<usize, FigError> {
    let Value::Int(index) = key else {
        return Err(FigError::WrongType {
            expected: "integer index",
            actual: key.type_name(),
        });
    };
    let resolved = if *index < 0 {
        i64::try_from(len).ok().map(|len| len + index)
    } else {
        Some(*index)
    };
    match resolved.and_then(|i| usize::try_from(i).ok()) {
        Some(i) if i < len => Ok(i),
        _ => Err(FigError::IndexOutOfRange { index: *index, len }),
    }
}

pub(crate) fn attribute_not_found(type_name: Rc<str>, name: &str) -> FigError {
    FigError::AttributeNotFound {
        type_name,
        name: Rc::from(name),
    }
}

// ============================================================================
// Value
// ============================================================================

impl Value {
    /// Wrap an object in a fresh shared handle.
    pub fn object(object: Object) -> Self {
        Value::Object(Obj::new(object))
    }

    /// A new list.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::object(Object::List(items.into_iter().collect()))
    }

    /// A new tuple.
    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::object(Object::Tuple(items.into_iter().collect()))
    }

    /// A new dict, keeping the order of `entries`.
    pub fn dict<K: Into<Value>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::object(Object::Dict(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// A new set.
    pub fn set(members: impl IntoIterator<Item = Value>) -> Self {
        Value::object(Object::Set(members.into_iter().collect()))
    }

    /// True for [`Value::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The float, if this is one. Integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The text, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The object handle, if this is an object.
    pub fn as_obj(&self) -> Option<&Obj> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// The function, if this is one.
    pub fn as_func(&self) -> Option<&Func> {
        match self {
            Value::Func(func) => Some(func),
            _ => None,
        }
    }

    /// Identity of values that have one: objects and functions.
    pub fn identity(&self) -> Option<ObjId> {
        match self {
            Value::Object(obj) => Some(obj.id()),
            Value::Func(func) => Some(ObjId(func.addr())),
            _ => None,
        }
    }

    /// Name of the value's type.
    pub fn type_name(&self) -> Rc<str> {
        match self {
            Value::None => Rc::from("NoneType"),
            Value::Bool(_) => Rc::from("bool"),
            Value::Int(_) => Rc::from("int"),
            Value::Float(_) => Rc::from("float"),
            Value::Str(_) => Rc::from("str"),
            Value::Bytes(_) => Rc::from("bytes"),
            Value::Func(_) => Rc::from("function"),
            Value::Method(_) => Rc::from("method"),
            Value::Object(obj) => obj.type_name(),
        }
    }

    /// Shallow copy: objects get a new identity, everything else is returned as is.
    pub fn shallow_copy(&self) -> Value {
        match self {
            Value::Object(obj) => Value::Object(obj.shallow_copy()),
            other => other.clone(),
        }
    }

    /// Read an attribute.
    pub fn get_attr(&self, name: &str) -> Result<Value, FigError> {
        match self {
            Value::Object(obj) => obj.get_attr(name),
            other => Err(attribute_not_found(other.type_name(), name)),
        }
    }

    /// Write an attribute.
    pub fn set_attr(&self, name: &str, value: Value) -> Result<(), FigError> {
        match self {
            Value::Object(obj) => obj.set_attr(name, value),
            other => Err(attribute_not_found(other.type_name(), name)),
        }
    }

    /// Delete an attribute.
    pub fn del_attr(&self, name: &str) -> Result<(), FigError> {
        match self {
            Value::Object(obj) => obj.del_attr(name),
            other => Err(attribute_not_found(other.type_name(), name)),
        }
    }

    /// Read an item.
    pub fn get_item(&self, key: &Value) -> Result<Value, FigError> {
        match self {
            Value::Object(obj) => obj.get_item(key),
            other => Err(FigError::NotSubscriptable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Write an item.
    pub fn set_item(&self, key: &Value, value: Value) -> Result<(), FigError> {
        match self {
            Value::Object(obj) => obj.set_item(key, value),
            other => Err(FigError::NotSubscriptable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Delete an item.
    pub fn del_item(&self, key: &Value) -> Result<(), FigError> {
        match self {
            Value::Object(obj) => obj.del_item(key),
            other => Err(FigError::NotSubscriptable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Read through a [`Key`].
    pub fn get(&self, key: &Key) -> Result<Value, FigError> {
        match key {
            Key::Attr(name) => self.get_attr(name),
            Key::Item(item) => self.get_item(item),
        }
    }

    /// Write through a [`Key`].
    pub fn put(&self, key: &Key, value: Value) -> Result<(), FigError> {
        match key {
            Key::Attr(name) => self.set_attr(name, value),
            Key::Item(item) => self.set_item(item, value),
        }
    }

    /// Delete through a [`Key`].
    pub fn delete(&self, key: &Key) -> Result<(), FigError> {
        match key {
            Key::Attr(name) => self.del_attr(name),
            Key::Item(item) => self.del_item(item),
        }
    }

    /// True for functions and bound methods.
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Func(_) | Value::Method(_))
    }

    /// Call a function or bound method.
    pub fn call(&self, args: &Args) -> Result<Value, FigError> {
        match self {
            Value::Func(func) => func.call(args),
            Value::Method(method) => method.call(args),
            other => Err(FigError::NotCallable {
                repr: other.to_string(),
            }),
        }
    }

    /// Call the method `name` on this value.
    pub fn call_method(&self, name: &str, args: &Args) -> Result<Value, FigError> {
        self.get_attr(name)?.call(args)
    }

    /// The finalizer tag of this value's class, if it has one.
    pub(crate) fn finalizer(&self) -> Option<Finalizer> {
        let Value::Object(obj) = self else {
            return None;
        };
        match &*obj.borrow() {
            Object::Record(record) => record.class().finalizer().cloned(),
            _ => None,
        }
    }

    /// True if the value declares the finalize capability.
    pub fn can_finalize(&self) -> bool {
        self.finalizer().is_some()
    }

    /// True if the value is a record produced by a finalize.
    pub fn is_finalized(&self) -> bool {
        let Value::Object(obj) = self else {
            return false;
        };
        obj.borrow()
            .as_record()
            .is_some_and(|record| record.is_finalized())
    }

    /// Run the value's finalize capability.
    ///
    /// Values without the capability have nothing to finalize and are
    /// returned as they are.
    pub fn finalize(&self) -> Result<Value, FigError> {
        match (self, self.finalizer()) {
            (Value::Object(obj), Some(Finalizer::Fig)) => crate::fig::finalize_fig(obj),
            (Value::Object(obj), Some(Finalizer::Custom(hook))) => {
                debug!("finalize {} with custom hook", obj.type_name());
                hook(obj)
            }
            _ => Ok(self.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            (Value::Method(a), Value::Method(b)) => {
                a.receiver().ptr_eq(b.receiver()) && a.name() == b.name()
            }
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::None => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Func(func) => func.addr().hash(state),
            Value::Method(method) => {
                method.receiver().id().hash(state);
                method.name().hash(state);
            }
            Value::Object(obj) => obj.id().hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for Value {
    fn from(value: Rc<str>) -> Self {
        Value::Str(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(Rc::from(value))
    }
}

impl From<Func> for Value {
    fn from(value: Func) -> Self {
        Value::Func(value)
    }
}

impl From<Obj> for Value {
    fn from(value: Obj) -> Self {
        Value::Object(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::object(Object::Record(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

// ============================================================================
// Repr
// ============================================================================

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Repr::new().write_value(self, f)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Repr writer; objects already being printed render as `...`.
struct Repr {
    active: BTreeSet<ObjId>,
}

impl Repr {
    fn new() -> Self {
        Self {
            active: BTreeSet::new(),
        }
    }

    fn write_value(&mut self, value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match value {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => {
                f.write_str("'")?;
                for c in s.chars() {
                    match c {
                        '\'' => f.write_str("\\'")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("'")
            }
            Value::Bytes(b) => write!(f, "b'{}'", b.escape_ascii()),
            Value::Func(func) => write!(f, "<function {}>", func.name()),
            Value::Method(method) => write!(
                f,
                "<bound method {}.{}>",
                method.receiver().type_name(),
                method.name()
            ),
            Value::Object(obj) => self.write_obj(obj, f),
        }
    }

    fn write_obj(&mut self, obj: &Obj, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = obj.id();
        let object = obj.borrow();
        if !self.active.insert(id) {
            return match &*object {
                Object::List(_) => f.write_str("[...]"),
                Object::Dict(_) => f.write_str("{...}"),
                _ => f.write_str("..."),
            };
        }
        let result = match &*object {
            Object::List(items) => self.write_seq("[", items.iter(), "]", f),
            Object::Tuple(items) if items.len() == 1 => {
                f.write_str("(")?;
                self.write_value(&items[0], f)?;
                f.write_str(",)")
            }
            Object::Tuple(items) => self.write_seq("(", items.iter(), ")", f),
            Object::Set(members) if members.is_empty() => f.write_str("set()"),
            Object::Set(members) => self.write_seq("{", members.iter(), "}", f),
            Object::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    self.write_value(k, f)?;
                    f.write_str(": ")?;
                    self.write_value(v, f)?;
                }
                f.write_str("}")
            }
            Object::Record(record) => {
                write!(f, "{}(", record.class().name())?;
                for (i, (name, value)) in record.attributes().into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}=")?;
                    self.write_value(&value, f)?;
                }
                f.write_str(")")
            }
        };
        self.active.remove(&id);
        result
    }

    fn write_seq<'a>(
        &mut self,
        open: &str,
        items: impl Iterator<Item = &'a Value>,
        close: &str,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(open)?;
        for (i, item) in items.enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            self.write_value(item, f)?;
        }
        f.write_str(close)
    }
}
