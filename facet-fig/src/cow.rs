//! Copy-on-write editing of shared value graphs.
//!
//! A [`CopyOnWrite`] session hands out [`NodeId`]s, one per path that was
//! read through it. Reads never copy. The first mutation below a node
//! shallow-copies that node and every ancestor node that reached it, and
//! re-points each ancestor at the copy of its child, so the original graph
//! is never written to.
//!
//! ```
//! use facet_fig::{CopyOnWrite, Value};
//!
//! let inner = Value::list([Value::Int(1)]);
//! let original = Value::dict([("items", inner.clone())]);
//!
//! let mut cow = CopyOnWrite::new();
//! let root = cow.wrap(original.clone());
//! let items = cow.get_item(root, "items").unwrap();
//! cow.set_item(items, 0, Value::Int(42)).unwrap();
//!
//! assert_eq!(inner.to_string(), "[1]");
//! assert_eq!(cow.unwrap(root).to_string(), "{'items': [42]}");
//! ```
//!
//! # Exit
//!
//! [`CopyOnWrite::exit`] finishes a node: children first, then any node
//! whose value can finalize and was not finalized yet is finalized, and the
//! result replaces the old value in every parent. An object reached through
//! several nodes is finalized once and every node gets the same result. [`CopyOnWrite::scope`]
//! runs a closure against a fresh session and always exits the root.

use alloc::vec::Vec;
use core::fmt;
use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};

use crate::FigError;
use crate::call::Args;
use crate::tracing_macros::trace;
use crate::value::{Key, Value};

/// Handle to a node of one [`CopyOnWrite`] session.
///
/// Ids are only meaningful to the session that created them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct ProxyNode {
    wrapped: Value,
    parents: IndexSet<(NodeId, Key)>,
    children: IndexMap<Key, NodeId>,
    is_copy: bool,
    is_finalized: bool,
}

/// A copy-on-write session over one or more value graphs.
///
/// # Panics
///
/// Methods taking a [`NodeId`] panic if the id came from another session.
#[derive(Default)]
pub struct CopyOnWrite {
    nodes: Vec<ProxyNode>,
    copies: usize,
}

impl CopyOnWrite {
    /// An empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` against a session rooted at `value`, then exit the root.
    ///
    /// The root is exited whether or not `body` fails. Returns the root's
    /// final value and the body's result. When both fail, the body's error
    /// is returned.
    pub fn scope<R>(
        value: Value,
        body: impl FnOnce(&mut CopyOnWrite, NodeId) -> Result<R, FigError>,
    ) -> Result<(Value, R), FigError> {
        let mut cow = CopyOnWrite::new();
        let root = cow.wrap(value);
        let outcome = body(&mut cow, root);
        let exited = cow.exit(root);
        let result = outcome?;
        exited?;
        Ok((cow.unwrap(root), result))
    }

    /// Start tracking `value` as a root node.
    pub fn wrap(&mut self, value: Value) -> NodeId {
        self.alloc(value, None)
    }

    fn alloc(&mut self, wrapped: Value, parent: Option<(NodeId, Key)>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(ProxyNode {
            wrapped,
            parents: parent.into_iter().collect(),
            children: IndexMap::new(),
            is_copy: false,
            is_finalized: false,
        });
        id
    }

    fn node(&self, id: NodeId) -> &ProxyNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut ProxyNode {
        &mut self.nodes[id.0]
    }

    /// The node's current value.
    pub fn unwrap(&self, id: NodeId) -> Value {
        self.node(id).wrapped.clone()
    }

    /// True once the node holds a private copy.
    pub fn is_copy(&self, id: NodeId) -> bool {
        self.node(id).is_copy
    }

    /// True once the node was finalized, by exit or an explicit call.
    pub fn is_finalized(&self, id: NodeId) -> bool {
        self.node(id).is_finalized
    }

    /// The `(parent, key)` pairs that reach this node.
    pub fn parents(&self, id: NodeId) -> impl Iterator<Item = &(NodeId, Key)> {
        self.node(id).parents.iter()
    }

    /// The cached child at `key`, if it was read.
    pub fn child(&self, id: NodeId, key: &Key) -> Option<NodeId> {
        self.node(id).children.get(key).copied()
    }

    /// Number of shallow copies made so far.
    pub fn copies(&self) -> usize {
        self.copies
    }

    /// Register `parent` as reaching `id` through `key`.
    pub fn add_parent(&mut self, id: NodeId, parent: NodeId, key: Key) {
        trace!("cow: {id:?} gains parent {parent:?}{key}");
        self.node_mut(id).parents.insert((parent, key));
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// The node for the value at `key`. Repeated reads return the same node.
    pub fn get(&mut self, id: NodeId, key: Key) -> Result<NodeId, FigError> {
        if let Some(child) = self.child(id, &key) {
            return Ok(child);
        }
        trace!("cow: get {}{key}", self.node(id).wrapped.type_name());
        let value = self.node(id).wrapped.get(&key)?;
        let child = self.alloc(value, Some((id, key.clone())));
        self.node_mut(id).children.insert(key, child);
        Ok(child)
    }

    /// [`CopyOnWrite::get`] with an attribute key.
    pub fn get_attr(&mut self, id: NodeId, name: &str) -> Result<NodeId, FigError> {
        self.get(id, Key::attr(name))
    }

    /// [`CopyOnWrite::get`] with an item key.
    pub fn get_item(&mut self, id: NodeId, key: impl Into<Value>) -> Result<NodeId, FigError> {
        self.get(id, Key::Item(key.into()))
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Store a plain value at `key`, copying first.
    pub fn set(&mut self, id: NodeId, key: Key, value: Value) -> Result<(), FigError> {
        trace!("cow: set {}{key} = {value}", self.node(id).wrapped.type_name());
        self.detach_child(id, &key);
        self.copy(id)?;
        self.node(id).wrapped.put(&key, value)
    }

    /// [`CopyOnWrite::set`] with an attribute key.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<Value>) -> Result<(), FigError> {
        self.set(id, Key::attr(name), value.into())
    }

    /// [`CopyOnWrite::set`] with an item key.
    pub fn set_item(
        &mut self,
        id: NodeId,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<(), FigError> {
        self.set(id, Key::Item(key.into()), value.into())
    }

    /// Store the value of node `child` at `key`, and make `id` one of its
    /// parents: when `child` is copied later, `id` sees the copy.
    pub fn graft(&mut self, id: NodeId, key: Key, child: NodeId) -> Result<(), FigError> {
        trace!("cow: graft {child:?} at {id:?}{key}");
        self.copy(id)?;
        self.add_parent(child, id, key.clone());
        if let Some(old) = self.node_mut(id).children.insert(key.clone(), child)
            && old != child
        {
            self.node_mut(old).parents.shift_remove(&(id, key.clone()));
        }
        // `child` may be an ancestor of `id` and copied just now
        let value = self.unwrap(child);
        self.node(id).wrapped.put(&key, value)
    }

    /// Delete the value at `key`, copying first.
    pub fn delete(&mut self, id: NodeId, key: Key) -> Result<(), FigError> {
        trace!("cow: del {}{key}", self.node(id).wrapped.type_name());
        self.detach_child(id, &key);
        self.copy(id)?;
        self.node(id).wrapped.delete(&key)?;
        // positions after a deleted index moved
        self.resync(id);
        Ok(())
    }

    /// [`CopyOnWrite::delete`] with an attribute key.
    pub fn del_attr(&mut self, id: NodeId, name: &str) -> Result<(), FigError> {
        self.delete(id, Key::attr(name))
    }

    /// [`CopyOnWrite::delete`] with an item key.
    pub fn del_item(&mut self, id: NodeId, key: impl Into<Value>) -> Result<(), FigError> {
        self.delete(id, Key::Item(key.into()))
    }

    fn detach_child(&mut self, id: NodeId, key: &Key) {
        if let Some(child) = self.node_mut(id).children.shift_remove(key) {
            self.node_mut(child).parents.shift_remove(&(id, key.clone()));
        }
    }

    /// Copy `id` and every uncopied ancestor, then re-point each parent at
    /// its child's copy.
    fn copy(&mut self, id: NodeId) -> Result<(), FigError> {
        let mut order = Vec::new();
        self.collect_uncopied(id, &mut HashSet::new(), &mut order);
        if order.is_empty() {
            trace!("cow: copy {id:?} skipped, already a copy");
            return Ok(());
        }
        let mut adopted = Vec::new();
        for &id in &order {
            // already replaced by the copy of an ancestor in this pass
            if self.node(id).is_copy {
                continue;
            }
            let node = &mut self.nodes[id.0];
            trace!("cow: copy {}", node.wrapped.type_name());
            node.wrapped = node.wrapped.shallow_copy();
            node.is_copy = true;
            self.copies += 1;
            self.adopt_replaced_children(id, &mut adopted);
        }
        for &node in &order {
            self.repoint_parents(node)?;
        }
        for node in adopted {
            let parents: Vec<NodeId> = self.parents(node).map(|(parent, _)| *parent).collect();
            for parent in parents {
                self.copy(parent)?;
            }
            self.repoint_parents(node)?;
        }
        Ok(())
    }

    /// After `id` was copied, point cached children at the members the copy
    /// replaced instead of sharing.
    ///
    /// A shallow copy aliases its members, except for stores it detaches
    /// (the routed keyword dict of a record). Such a child now wraps an
    /// object private to this session, so it counts as a copy. Bound methods
    /// are rebound to the copy.
    fn adopt_replaced_children(&mut self, id: NodeId, adopted: &mut Vec<NodeId>) {
        let cached: Vec<(Key, NodeId)> = self
            .node(id)
            .children
            .iter()
            .map(|(key, child)| (key.clone(), *child))
            .collect();
        for (key, child) in cached {
            let current = self.node(id).wrapped.get(&key);
            let held = &self.node(child).wrapped;
            match current {
                Ok(value) if value == *held => {}
                Ok(value) if value.is_callable() && held.is_callable() => {
                    self.node_mut(child).wrapped = value;
                }
                Ok(value) => {
                    trace!("cow: adopt detached {id:?}{key}");
                    let node = self.node_mut(child);
                    node.wrapped = value;
                    node.is_copy = true;
                    adopted.push(child);
                }
                Err(_) => self.detach_child(id, &key),
            }
        }
    }

    /// Parents before children; each node once even on cyclic parent graphs.
    fn collect_uncopied(&self, id: NodeId, visiting: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
        if self.node(id).is_copy || !visiting.insert(id) {
            return;
        }
        for (parent, _) in &self.node(id).parents {
            self.collect_uncopied(*parent, visiting, order);
        }
        order.push(id);
    }

    fn repoint_parents(&mut self, id: NodeId) -> Result<(), FigError> {
        let value = self.unwrap(id);
        let parents: Vec<(NodeId, Key)> = self.node(id).parents.iter().cloned().collect();
        for (parent, key) in parents {
            self.node(parent).wrapped.put(&key, value.clone())?;
        }
        Ok(())
    }

    /// Bring the cached children of `id` back in line with its value.
    ///
    /// Children whose value is unchanged stay. Callables are rebound to the
    /// current receiver. Anything else is evicted and detached.
    fn resync(&mut self, id: NodeId) {
        let cached: Vec<(Key, NodeId)> = self
            .node(id)
            .children
            .iter()
            .map(|(key, child)| (key.clone(), *child))
            .collect();
        for (key, child) in cached {
            let current = self.node(id).wrapped.get(&key);
            let held = &self.node(child).wrapped;
            match current {
                Ok(value) if value == *held => {}
                Ok(value) if value.is_callable() && held.is_callable() => {
                    self.node_mut(child).wrapped = value;
                }
                _ => {
                    trace!("cow: evict stale {id:?}{key}");
                    self.detach_child(id, &key);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    /// Call the callable held by `id`.
    ///
    /// The receiver is copied first, and the callable is resolved again from
    /// the copy so that a bound method mutates the copy. Calling a node read
    /// as `finalize` marks its parent finalized. The result is a new root node.
    pub fn call(&mut self, id: NodeId, args: &Args) -> Result<NodeId, FigError> {
        let parents: Vec<(NodeId, Key)> = self.node(id).parents.iter().cloned().collect();
        trace!("cow: call {}{args:?}", self.node(id).wrapped);
        for (parent, key) in &parents {
            if key.is_attr("finalize") {
                self.node_mut(*parent).is_finalized = true;
            }
        }
        for (parent, _) in &parents {
            self.copy(*parent)?;
        }
        let callable = match parents.first() {
            Some((parent, key)) => self.node(*parent).wrapped.get(key)?,
            None => self.unwrap(id),
        };
        if !callable.is_callable() {
            return Err(FigError::NotCallable {
                repr: callable.to_string(),
            });
        }
        let result = callable.call(args)?;
        for (parent, _) in &parents {
            self.resync(*parent);
        }
        Ok(self.wrap(result))
    }

    /// Read `name` from `id` and call it.
    pub fn call_method(&mut self, id: NodeId, name: &str, args: &Args) -> Result<NodeId, FigError> {
        let method = self.get_attr(id, name)?;
        self.call(method, args)
    }

    // ------------------------------------------------------------------------
    // Exit
    // ------------------------------------------------------------------------

    /// Finish `id` and everything read below it.
    ///
    /// Children are finished first, each node once. A node whose value can
    /// finalize and that was not finalized yet is finalized; the result is
    /// installed in every parent (copying them first) and becomes the node's
    /// own value.
    pub fn exit(&mut self, id: NodeId) -> Result<(), FigError> {
        self.exit_node(id, &mut HashSet::new(), &mut HashMap::new())
    }

    /// `finished` maps each object finalized during this exit to its result,
    /// so an object reached through several nodes is finalized once.
    fn exit_node(
        &mut self,
        id: NodeId,
        visited: &mut HashSet<NodeId>,
        finished: &mut HashMap<Value, Value>,
    ) -> Result<(), FigError> {
        if !visited.insert(id) {
            return Ok(());
        }
        let children: Vec<NodeId> = self.node(id).children.values().copied().collect();
        for child in children {
            self.exit_node(child, visited, finished)?;
        }

        let node = self.node(id);
        trace!(
            "cow: exit {} is_copy={} is_finalized={}",
            node.wrapped.type_name(),
            node.is_copy,
            node.is_finalized
        );
        if node.is_finalized || !node.wrapped.can_finalize() || node.wrapped.is_finalized() {
            return Ok(());
        }
        let current = node.wrapped.clone();
        let finalized = match finished.get(&current) {
            Some(done) => done.clone(),
            None => {
                let done = current.finalize()?;
                finished.insert(current.clone(), done.clone());
                done
            }
        };
        self.node_mut(id).is_finalized = true;
        if finalized == current {
            return Ok(());
        }

        let parents: Vec<NodeId> = self.parents(id).map(|(parent, _)| *parent).collect();
        for parent in parents {
            self.copy(parent)?;
        }
        let node = self.node_mut(id);
        node.wrapped = finalized;
        node.is_copy = true;
        self.repoint_parents(id)?;
        self.resync(id);
        Ok(())
    }
}

impl fmt::Debug for CopyOnWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOnWrite")
            .field("nodes", &self.nodes.len())
            .field("copies", &self.copies)
            .finish()
    }
}
