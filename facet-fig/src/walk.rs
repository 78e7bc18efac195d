//! Depth-first traversal of nested values.
//!
//! [`walk`] yields `(path, value)` for the root and every descendant it can
//! reach, in pre-order.
//!
//! # Children
//!
//! | Value               | Children                          | Segment          |
//! |---------------------|-----------------------------------|------------------|
//! | list, tuple         | items in order                    | `Index(i)`       |
//! | dict                | values in insertion order         | `Key(k)`         |
//! | set                 | members in iteration order        | `Index(i)`       |
//! | record              | set slots, then the dynamic store | `Attr(name)`     |
//! | anything else       | none (strings and bytes included) |                  |
//!
//! Record slots come in layout order and unset slots are skipped; the
//! dynamic store follows, sorted by name.
//!
//! # Traversal control
//!
//! Each candidate is checked against the `seen` set first: a value with an
//! identity that was already visited is skipped entirely. Otherwise its
//! identity is recorded, and then the `recurse` predicate decides whether the
//! value is yielded and entered. A rejected value is still recorded as seen.
//!
//! Scalars have no identity and are never deduplicated.

use alloc::vec::Vec;
use std::collections::HashSet;

use crate::path::{Path, Segment};
use crate::tracing_macros::trace;
use crate::value::{ObjId, Object, Value};

/// Identities visited so far.
pub type Seen = HashSet<ObjId>;

enum SeenStore<'s> {
    Owned(Seen),
    Borrowed(&'s mut Seen),
}

impl SeenStore<'_> {
    fn get_mut(&mut self) -> &mut Seen {
        match self {
            SeenStore::Owned(seen) => seen,
            SeenStore::Borrowed(seen) => seen,
        }
    }
}

/// Lazy pre-order iterator over a value and its descendants.
///
/// Not restartable; call [`walk`] again for a fresh traversal.
pub struct Descendants<'s, F> {
    stack: Vec<(Path, Value)>,
    recurse: F,
    seen: SeenStore<'s>,
}

/// Walk `root`, entering only values for which `recurse` returns true.
pub fn walk<F>(root: &Value, recurse: F) -> Descendants<'static, F>
where
    F: FnMut(&Path, &Value) -> bool,
{
    Descendants {
        stack: alloc::vec![(Path::root(), root.clone())],
        recurse,
        seen: SeenStore::Owned(Seen::new()),
    }
}

/// Walk everything reachable from `root`.
pub fn walk_all(root: &Value) -> Descendants<'static, fn(&Path, &Value) -> bool> {
    fn always(_: &Path, _: &Value) -> bool {
        true
    }
    walk(root, always as fn(&Path, &Value) -> bool)
}

/// Walk `root`, sharing the `seen` set with the caller.
///
/// Identities already in `seen` are skipped, and everything visited is added
/// to it, so several walks can together visit each object once.
pub fn walk_with_seen<'s, F>(root: &Value, recurse: F, seen: &'s mut Seen) -> Descendants<'s, F>
where
    F: FnMut(&Path, &Value) -> bool,
{
    Descendants {
        stack: alloc::vec![(Path::root(), root.clone())],
        recurse,
        seen: SeenStore::Borrowed(seen),
    }
}

impl<F> Descendants<'_, F> {
    /// Report paths relative to `path` instead of the empty root path.
    ///
    /// Only meaningful before the first call to `next`.
    pub fn starting_at(mut self, path: Path) -> Self {
        if let [(root, _)] = self.stack.as_mut_slice() {
            *root = path;
        }
        self
    }
}

impl<F> Iterator for Descendants<'_, F>
where
    F: FnMut(&Path, &Value) -> bool,
{
    type Item = (Path, Value);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, value)) = self.stack.pop() {
            if let Some(id) = value.identity()
                && !self.seen.get_mut().insert(id)
            {
                trace!("walk: {path} already seen");
                continue;
            }
            if !(self.recurse)(&path, &value) {
                continue;
            }
            let children = children(&value);
            self.stack.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|(segment, child)| (path.child(segment), child)),
            );
            return Some((path, value));
        }
        None
    }
}

/// The direct children of `value`, in traversal order.
pub fn children(value: &Value) -> Vec<(Segment, Value)> {
    let Value::Object(obj) = value else {
        return Vec::new();
    };
    match &*obj.borrow() {
        Object::List(items) | Object::Tuple(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (Segment::Index(i), item.clone()))
            .collect(),
        Object::Dict(entries) => entries
            .iter()
            .map(|(key, item)| (Segment::Key(key.clone()), item.clone()))
            .collect(),
        Object::Set(members) => members
            .iter()
            .enumerate()
            .map(|(i, member)| (Segment::Index(i), member.clone()))
            .collect(),
        Object::Record(record) => record
            .attributes()
            .into_iter()
            .map(|(name, item)| (Segment::Attr(name), item))
            .collect(),
    }
}
