//! Classes and their instances.
//!
//! A [`Class`] declares named slots, optional methods and capability tags,
//! and inherits all of them from its bases along a C3 method-resolution
//! order. A [`Record`] is one instance: a value per declared slot (possibly
//! unset), an optional dynamic attribute store, and the hidden `finalized`
//! flag set by the config finalize.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::iter;

use indexmap::IndexMap;

use crate::FigError;
use crate::call::{Args, Func};
use crate::tracing_macros::{debug, trace};
use crate::value::{Obj, Object, Value, attribute_not_found};

/// User method: receives the receiver and the call arguments.
pub type MethodFn = dyn Fn(&Obj, &Args) -> Result<Value, FigError>;

/// A complete finalize implementation: receives the receiver, returns the
/// finalized value.
pub type FinalizeFn = dyn Fn(&Obj) -> Result<Value, FigError>;

/// Derived-defaults hook, run on the finalized copy.
pub type DeriveFn = dyn Fn(&Obj) -> Result<(), FigError>;

/// How a slot gets its value when the class is instantiated.
#[derive(Clone)]
pub enum FieldDefault {
    /// Left unset unless given.
    Unset,
    /// Must be given.
    Required,
    /// This value (shared, not copied).
    Value(Value),
    /// A fresh value from this factory per instance.
    Factory(Rc<dyn Fn() -> Value>),
}

/// A declared slot.
#[derive(Clone)]
pub struct Field {
    name: Rc<str>,
    default: FieldDefault,
}

impl Field {
    /// Slot name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default used at instantiation.
    pub fn default(&self) -> &FieldDefault {
        &self.default
    }
}

/// Which finalize a class provides.
#[derive(Clone)]
pub enum Finalizer {
    /// The config finalize: finalize every attribute on a copy, set the
    /// finalized flag, run the derive hooks.
    Fig,
    /// A finalize written by the class itself.
    Custom(Rc<FinalizeFn>),
}

/// The parent constructor a config class makes.
#[derive(Clone)]
pub struct Maker {
    parent: Func,
    with_kwargs: bool,
}

impl Maker {
    /// The constructor.
    pub fn parent(&self) -> &Func {
        &self.parent
    }

    /// True if fields are passed as keyword arguments instead of the config.
    pub fn with_kwargs(&self) -> bool {
        self.with_kwargs
    }
}

/// A class: slots, methods and capability tags, with inheritance.
pub struct Class {
    name: Rc<str>,
    bases: Vec<Rc<Class>>,
    ancestors: Vec<Rc<Class>>,
    fields: Vec<Field>,
    layout: Vec<Field>,
    dynamic: bool,
    methods: IndexMap<Rc<str>, Rc<MethodFn>>,
    finalizer: Option<Finalizer>,
    derive: Option<Rc<DeriveFn>>,
    maker: Option<Maker>,
    route_unknown: Option<Rc<str>>,
}

impl Class {
    /// Start declaring a class.
    pub fn builder(name: &str) -> ClassBuilder {
        ClassBuilder {
            name: String::from(name),
            bases: Vec::new(),
            fields: Vec::new(),
            dynamic: false,
            methods: IndexMap::new(),
            finalizer: None,
            derive: None,
            maker: None,
            route_unknown: None,
        }
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        self.name.clone()
    }

    /// Direct bases, in declaration order.
    pub fn bases(&self) -> &[Rc<Class>] {
        &self.bases
    }

    /// The method-resolution order without the class itself.
    pub fn ancestors(&self) -> &[Rc<Class>] {
        &self.ancestors
    }

    /// Slots declared by this class alone.
    pub fn own_fields(&self) -> &[Field] {
        &self.fields
    }

    /// Every slot of an instance: this class's first, then each ancestor's
    /// in resolution order, without duplicates.
    pub fn layout(&self) -> &[Field] {
        &self.layout
    }

    /// Position of a slot in [`Class::layout`].
    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.layout.iter().position(|field| &*field.name == name)
    }

    /// This class, then its ancestors.
    fn lineage(&self) -> impl Iterator<Item = &Class> {
        iter::once(self).chain(self.ancestors.iter().map(|class| &**class))
    }

    /// True if instances carry a dynamic attribute store.
    pub fn is_dynamic(&self) -> bool {
        self.lineage().any(|class| class.dynamic)
    }

    /// True if `other` is this class or one of its ancestors.
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        self.lineage().any(|class| core::ptr::eq(class, other))
    }

    /// Resolve a user method along the resolution order.
    pub fn find_method(&self, name: &str) -> Option<Rc<MethodFn>> {
        self.lineage()
            .find_map(|class| class.methods.get(name).cloned())
    }

    /// The nearest finalizer tag.
    pub fn finalizer(&self) -> Option<&Finalizer> {
        self.lineage().find_map(|class| class.finalizer.as_ref())
    }

    /// The nearest maker.
    pub fn maker(&self) -> Option<&Maker> {
        self.lineage().find_map(|class| class.maker.as_ref())
    }

    /// Derive hooks, outermost base first.
    pub fn derive_hooks(&self) -> Vec<Rc<DeriveFn>> {
        let mut hooks: Vec<_> = self
            .lineage()
            .filter_map(|class| class.derive.clone())
            .collect();
        hooks.reverse();
        hooks
    }

    /// The dict slot that takes unknown attributes, if any.
    pub fn routes_unknown_to(&self) -> Option<&str> {
        self.lineage()
            .find_map(|class| class.route_unknown.as_deref())
    }

    /// Build an instance from keyword arguments.
    ///
    /// Positional arguments are rejected. Keywords that name no slot land in
    /// the dynamic store (or the routed dict) when the class has one, and
    /// are rejected otherwise.
    pub fn instantiate(self: &Rc<Self>, args: &Args) -> Result<Value, FigError> {
        if let Some(first) = args.arg(0) {
            return Err(FigError::UnexpectedArgument {
                callee: self.name.clone(),
                argument: alloc::format!("positional {first}"),
            });
        }
        let mut record = Record::new(self);
        for (index, field) in self.layout.iter().enumerate() {
            record.slots[index] = match (args.kwarg(&field.name), &field.default) {
                (Some(value), _) => Some(value.clone()),
                (None, FieldDefault::Unset) => None,
                (None, FieldDefault::Required) => {
                    return Err(FigError::MissingField {
                        class: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
                (None, FieldDefault::Value(value)) => Some(value.clone()),
                (None, FieldDefault::Factory(factory)) => Some(factory()),
            };
        }
        for (name, value) in args.kwargs() {
            if self.slot_index(name).is_some() {
                continue;
            }
            if record.dict.is_none() && self.routes_unknown_to().is_none() {
                return Err(FigError::UnexpectedField {
                    class: self.name.clone(),
                    field: name.clone(),
                });
            }
            record.set_attr(name, value.clone())?;
        }
        trace!("instantiate {}", self.name);
        Ok(Value::object(Object::Record(record)))
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field(
                "layout",
                &self.layout.iter().map(Field::name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`Class::builder`].
pub struct ClassBuilder {
    name: String,
    bases: Vec<Rc<Class>>,
    fields: Vec<Field>,
    dynamic: bool,
    methods: IndexMap<Rc<str>, Rc<MethodFn>>,
    finalizer: Option<Finalizer>,
    derive: Option<Rc<DeriveFn>>,
    maker: Option<Maker>,
    route_unknown: Option<Rc<str>>,
}

impl ClassBuilder {
    /// Qualify the name with the class it is nested in (`Owner.Name`).
    pub fn nested_in(mut self, owner: &str) -> Self {
        self.name = alloc::format!("{owner}.{}", self.name);
        self
    }

    /// Add a base class.
    pub fn base(mut self, base: &Rc<Class>) -> Self {
        self.bases.push(base.clone());
        self
    }

    fn push_field(mut self, name: &str, default: FieldDefault) -> Self {
        self.fields.retain(|field| &*field.name != name);
        self.fields.push(Field {
            name: Rc::from(name),
            default,
        });
        self
    }

    /// Slot that starts unset.
    pub fn slot(self, name: &str) -> Self {
        self.push_field(name, FieldDefault::Unset)
    }

    /// Slot with a default value.
    pub fn field(self, name: &str, default: impl Into<Value>) -> Self {
        self.push_field(name, FieldDefault::Value(default.into()))
    }

    /// Slot with a default factory, called once per instance.
    pub fn field_with(self, name: &str, factory: impl Fn() -> Value + 'static) -> Self {
        self.push_field(name, FieldDefault::Factory(Rc::new(factory)))
    }

    /// Slot that must be given at instantiation.
    pub fn required(self, name: &str) -> Self {
        self.push_field(name, FieldDefault::Required)
    }

    /// Give instances a dynamic attribute store.
    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    /// Add a method.
    pub fn method(
        mut self,
        name: &str,
        body: impl Fn(&Obj, &Args) -> Result<Value, FigError> + 'static,
    ) -> Self {
        self.methods.insert(Rc::from(name), Rc::new(body));
        self
    }

    /// Make this a config class: default finalize, `make` and `update`.
    pub fn fig(mut self) -> Self {
        self.finalizer = Some(Finalizer::Fig);
        self
    }

    /// Derived defaults, computed on the finalized copy.
    ///
    /// Implies [`ClassBuilder::fig`].
    pub fn derive(mut self, hook: impl Fn(&Obj) -> Result<(), FigError> + 'static) -> Self {
        self.derive = Some(Rc::new(hook));
        self.fig()
    }

    /// Give the class its own finalize.
    pub fn finalize_with(
        mut self,
        hook: impl Fn(&Obj) -> Result<Value, FigError> + 'static,
    ) -> Self {
        self.finalizer = Some(Finalizer::Custom(Rc::new(hook)));
        self
    }

    /// `make()` calls `parent` with the finalized config.
    ///
    /// Implies [`ClassBuilder::fig`] unless a finalize was already given.
    pub fn makes(mut self, parent: Func) -> Self {
        self.maker = Some(Maker {
            parent,
            with_kwargs: false,
        });
        self.finalizer.get_or_insert(Finalizer::Fig);
        self
    }

    /// `make()` calls `parent` with each field as a keyword argument.
    pub fn makes_with_kwargs(self, parent: Func) -> Self {
        let mut builder = self.makes(parent);
        if let Some(maker) = &mut builder.maker {
            maker.with_kwargs = true;
        }
        builder
    }

    /// Unknown attribute reads, writes and deletes go to the dict in `slot`.
    pub fn route_unknown_to(mut self, slot: &str) -> Self {
        self.route_unknown = Some(Rc::from(slot));
        self
    }

    /// Linearize the bases and lay out the slots.
    pub fn build(self) -> Result<Rc<Class>, FigError> {
        let name: Rc<str> = Rc::from(self.name);
        let ancestors = linearize(&name, &self.bases)?;
        let mut layout: Vec<Field> = Vec::new();
        let declared = self
            .fields
            .iter()
            .chain(ancestors.iter().flat_map(|class| class.fields.iter()));
        for field in declared {
            if !layout.iter().any(|seen| seen.name == field.name) {
                layout.push(field.clone());
            }
        }
        debug!("class {} layout {:?}", name, layout.iter().map(Field::name).collect::<Vec<_>>());
        Ok(Rc::new(Class {
            name,
            bases: self.bases,
            ancestors,
            fields: self.fields,
            layout,
            dynamic: self.dynamic,
            methods: self.methods,
            finalizer: self.finalizer,
            derive: self.derive,
            maker: self.maker,
            route_unknown: self.route_unknown,
        }))
    }
}

/// C3 linearization of `bases`, excluding the class being built.
fn linearize(name: &Rc<str>, bases: &[Rc<Class>]) -> Result<Vec<Rc<Class>>, FigError> {
    let mut sequences: Vec<Vec<Rc<Class>>> = bases
        .iter()
        .map(|base| {
            iter::once(base.clone())
                .chain(base.ancestors.iter().cloned())
                .collect()
        })
        .collect();
    sequences.push(bases.to_vec());

    let mut order = Vec::new();
    loop {
        sequences.retain(|sequence| !sequence.is_empty());
        if sequences.is_empty() {
            return Ok(order);
        }
        let next = sequences
            .iter()
            .map(|sequence| &sequence[0])
            .find(|head| {
                !sequences
                    .iter()
                    .any(|sequence| sequence[1..].iter().any(|class| Rc::ptr_eq(class, head)))
            })
            .cloned();
        let Some(next) = next else {
            return Err(FigError::InconsistentMro {
                class: name.clone(),
            });
        };
        for sequence in &mut sequences {
            if Rc::ptr_eq(&sequence[0], &next) {
                sequence.remove(0);
            }
        }
        order.push(next);
    }
}

/// An instance of a [`Class`].
#[derive(Clone)]
pub struct Record {
    class: Rc<Class>,
    slots: Vec<Option<Value>>,
    dict: Option<BTreeMap<Rc<str>, Value>>,
    finalized: bool,
}

impl Record {
    /// An instance with every slot unset.
    pub fn new(class: &Rc<Class>) -> Self {
        Self {
            class: class.clone(),
            slots: alloc::vec![None; class.layout.len()],
            dict: class.is_dynamic().then(BTreeMap::new),
            finalized: false,
        }
    }

    /// The instance's class.
    pub fn class(&self) -> &Rc<Class> {
        &self.class
    }

    /// True once the config finalize produced this record.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    /// Value of a declared slot, if set.
    pub fn slot(&self, name: &str) -> Option<&Value> {
        let index = self.class.slot_index(name)?;
        self.slots[index].as_ref()
    }

    fn routed_store(&self) -> Option<Obj> {
        let slot = self.class.routes_unknown_to()?;
        match self.slot(slot)? {
            Value::Object(obj) if matches!(&*obj.borrow(), Object::Dict(_)) => Some(obj.clone()),
            _ => None,
        }
    }

    pub(crate) fn detach_routed_store(&mut self) {
        let Some(slot) = self.class.routes_unknown_to() else {
            return;
        };
        if let Some(index) = self.class.slot_index(slot)
            && let Some(Value::Object(obj)) = &self.slots[index]
        {
            self.slots[index] = Some(Value::Object(obj.shallow_copy()));
        }
    }

    /// Read an attribute stored on the record: slot, dynamic store, then
    /// the routed dict. Methods are resolved by the caller.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(index) = self.class.slot_index(name) {
            if let Some(value) = &self.slots[index] {
                return Some(value.clone());
            }
        }
        if let Some(value) = self.dict.as_ref().and_then(|dict| dict.get(name)) {
            return Some(value.clone());
        }
        let store = self.routed_store()?;
        let object = store.borrow();
        match &*object {
            Object::Dict(entries) => entries.get(&Value::from(name)).cloned(),
            _ => None,
        }
    }

    /// Write an attribute.
    pub fn set_attr(&mut self, name: &str, value: Value) -> Result<(), FigError> {
        if let Some(index) = self.class.slot_index(name) {
            self.slots[index] = Some(value);
            return Ok(());
        }
        if let Some(dict) = &mut self.dict {
            dict.insert(Rc::from(name), value);
            return Ok(());
        }
        if let Some(store) = self.routed_store() {
            if let Object::Dict(entries) = &mut *store.borrow_mut() {
                entries.insert(Value::from(name), value);
                return Ok(());
            }
        }
        Err(attribute_not_found(self.class.name_rc(), name))
    }

    /// Delete an attribute. The routed dict is tried first, as it holds
    /// what the record does not declare.
    pub fn del_attr(&mut self, name: &str) -> Result<(), FigError> {
        if let Some(store) = self.routed_store()
            && let Object::Dict(entries) = &mut *store.borrow_mut()
            && entries.shift_remove(&Value::from(name)).is_some()
        {
            return Ok(());
        }
        if let Some(index) = self.class.slot_index(name)
            && self.slots[index].take().is_some()
        {
            return Ok(());
        }
        if let Some(dict) = &mut self.dict
            && dict.remove(name).is_some()
        {
            return Ok(());
        }
        Err(attribute_not_found(self.class.name_rc(), name))
    }

    /// Every attribute that holds a value: set slots in layout order, then
    /// the dynamic store sorted by name. The finalized flag is not an
    /// attribute.
    pub fn attributes(&self) -> Vec<(Rc<str>, Value)> {
        let slots = self
            .class
            .layout
            .iter()
            .zip(&self.slots)
            .filter_map(|(field, value)| Some((field.name.clone(), value.clone()?)));
        let dynamic = self
            .dict
            .iter()
            .flat_map(|dict| dict.iter().map(|(name, value)| (name.clone(), value.clone())));
        slots.chain(dynamic).collect()
    }

    /// Names of [`Record::attributes`].
    pub fn attribute_names(&self) -> Vec<Rc<str>> {
        self.attributes().into_iter().map(|(name, _)| name).collect()
    }
}
