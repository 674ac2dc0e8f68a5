//! Arena representation of a dereferenced schema graph.
//!
//! Nodes are addressed by [`NodeId`]; two positions holding the same id hold
//! the same node. The graph may contain cycles, so walkers that recurse
//! through it must track the ids they have visited.

use std::collections::HashSet;

use serde_json::{Map, Number, Value};

/// Stable handle to a node in a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Object members in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(String, NodeId)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<NodeId> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, id)| *id)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace.
    pub fn insert(&mut self, key: impl Into<String>, id: NodeId) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = id,
            None => self.entries.push((key, id)),
        }
    }

    /// Insert only when `key` is not present yet.
    pub fn insert_if_absent(&mut self, key: &str, id: NodeId) {
        if !self.contains_key(key) {
            self.entries.push((key.to_string(), id));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.entries.iter().map(|(k, id)| (k.as_str(), *id))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A node of the dereferenced graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<NodeId>),
    Object(Fields),
}

impl Node {
    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Node::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[NodeId]> {
        match self {
            Node::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// A dereferenced schema graph.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    uris: Vec<Option<String>>,
    root: NodeId,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            uris: Vec::new(),
            root: NodeId(0),
        }
    }

    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.uris.push(None);
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn set(&mut self, id: NodeId, node: Node) {
        self.nodes[id.0] = node;
    }

    pub(crate) fn set_uri(&mut self, id: NodeId, uri: &str) {
        if self.uris[id.0].is_none() {
            self.uris[id.0] = Some(uri.to_string());
        }
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    /// Copy a source value as a plain tree with no identities.
    pub(crate) fn insert_value(&mut self, value: &Value) -> NodeId {
        match value {
            Value::Null => self.alloc(Node::Null),
            Value::Bool(b) => self.alloc(Node::Bool(*b)),
            Value::Number(n) => self.alloc(Node::Number(n.clone())),
            Value::String(s) => self.alloc(Node::String(s.clone())),
            Value::Array(items) => {
                let ids = items.iter().map(|item| self.insert_value(item)).collect();
                self.alloc(Node::Array(ids))
            }
            Value::Object(map) => {
                let mut fields = Fields::new();
                for (key, child) in map {
                    let id = self.insert_value(child);
                    fields.insert(key.clone(), id);
                }
                self.alloc(Node::Object(fields))
            }
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Canonical source URI of a node that came from an indexed schema.
    pub fn uri_of(&self, id: NodeId) -> Option<&str> {
        self.uris.get(id.0).and_then(|u| u.as_deref())
    }

    /// Member `key` of an object node.
    pub fn get(&self, id: NodeId, key: &str) -> Option<NodeId> {
        self.node(id).as_object()?.get(key)
    }

    /// Element `index` of an array node.
    pub fn item(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.node(id).as_array()?.get(index).copied()
    }

    /// Follow a JSON Pointer from `id`.
    pub fn pointer(&self, id: NodeId, pointer: &str) -> Option<NodeId> {
        if pointer.is_empty() {
            return Some(id);
        }
        let rest = pointer.strip_prefix('/')?;
        let mut current = id;
        for step in rest.split('/') {
            let step = crate::types::unescape_pointer_step(step);
            current = match self.node(current) {
                Node::Object(fields) => fields.get(&step)?,
                Node::Array(items) => *items.get(step.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Serialize the subgraph at `id`.
    ///
    /// A node reached again while it is still being serialized (a cycle) is
    /// written as `{"$ref": <its canonical URI>}`. Shared nodes that do not
    /// form a cycle are written out in full at every position.
    pub fn to_value_from(&self, id: NodeId) -> Value {
        let mut stack = HashSet::new();
        self.serialize(id, &mut stack)
    }

    /// Serialize the whole graph from its root.
    pub fn to_value(&self) -> Value {
        self.to_value_from(self.root)
    }

    fn serialize(&self, id: NodeId, stack: &mut HashSet<NodeId>) -> Value {
        match self.node(id) {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Array(items) => {
                if !stack.insert(id) {
                    return self.back_reference(id);
                }
                let out = items.iter().map(|item| self.serialize(*item, stack)).collect();
                stack.remove(&id);
                Value::Array(out)
            }
            Node::Object(fields) => {
                if !stack.insert(id) {
                    return self.back_reference(id);
                }
                let mut out = Map::new();
                for (key, child) in fields.iter() {
                    out.insert(key.to_string(), self.serialize(child, stack));
                }
                stack.remove(&id);
                Value::Object(out)
            }
        }
    }

    fn back_reference(&self, id: NodeId) -> Value {
        let target = self.uri_of(id).unwrap_or("#");
        let mut map = Map::new();
        map.insert(crate::types::REF.to_string(), Value::String(target.to_string()));
        Value::Object(map)
    }

    /// Ids of every node reachable from `id`, each listed once.
    pub fn reachable(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            order.push(current);
            match self.node(current) {
                Node::Array(items) => stack.extend(items.iter().rev().copied()),
                Node::Object(fields) => {
                    let children: Vec<_> = fields.iter().map(|(_, c)| c).collect();
                    stack.extend(children.into_iter().rev());
                }
                _ => {}
            }
        }
        order
    }
}
