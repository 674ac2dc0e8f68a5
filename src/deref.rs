//! Dereferencing: rewrite an indexed schema into a [`Graph`] in which every
//! static reference is replaced by the node it designates.
//!
//! One depth-first clone pass materializes schemas and hands out
//! placeholders for targets that are not materialized yet. Placeholders for
//! pure references are filled when their target is cloned, either later in
//! the same pass or from the worklist afterwards. References with siblings
//! whose target is still incomplete wait for the patch-up phase, which
//! merges target members under the siblings once the target is done.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{Map, Value};
use url::Url;

use crate::error::DerefError;
use crate::graph::{Fields, Graph, Node, NodeId};
use crate::index::SchemaIndex;
use crate::indexer::Reference;
use crate::store::{Retrieve, Store};
use crate::types::{DerefOptions, Location, RefKeyword};

/// Dereference `schema` with default options, retrieving external documents
/// through `retriever`.
///
/// # Example
///
/// ```
/// use schema_deref::{dereference, NoRetriever};
/// use serde_json::json;
///
/// let schema = json!({
///     "$id": "urn:x",
///     "definitions": { "self": { "$ref": "#" } },
///     "properties": { "self": { "$ref": "urn:x#/definitions/self" } }
/// });
/// let graph = dereference(schema, NoRetriever).unwrap();
/// let properties = graph.get(graph.root(), "properties").unwrap();
/// assert_eq!(graph.get(properties, "self"), Some(graph.root()));
/// ```
pub fn dereference(schema: Value, retriever: impl Retrieve + 'static) -> Result<Graph, DerefError> {
    dereference_with(
        schema,
        None,
        Arc::new(Store::new(retriever)),
        DerefOptions::default(),
    )
}

/// Dereference `schema` registered under `base_uri` using a shared store.
pub fn dereference_with(
    schema: Value,
    base_uri: Option<&str>,
    store: Arc<Store>,
    options: DerefOptions,
) -> Result<Graph, DerefError> {
    let mut index = SchemaIndex::new(store, options);
    let root = index.add_root_schema(schema, base_uri)?;
    index.dereference(root)
}

#[derive(Debug, Clone)]
enum Slot {
    /// Registered; members are still being cloned.
    Filling,
    /// Stand-in for a node that is not materialized yet. `indirect` is the
    /// target a reference-with-siblings still has to merge.
    Placeholder {
        site: Location,
        indirect: Option<NodeId>,
    },
}

enum Claim {
    Existing(NodeId),
    Fresh(NodeId),
}

pub(crate) struct Dereferencer<'a> {
    index: &'a SchemaIndex,
    graph: Graph,
    /// Nodes that are not done yet. Absent means done.
    pending: HashMap<NodeId, Slot>,
    results: HashMap<Url, NodeId>,
    by_source: HashMap<Location, NodeId>,
    worklist: VecDeque<(NodeId, Location)>,
    indirect: Vec<NodeId>,
}

impl<'a> Dereferencer<'a> {
    pub(crate) fn new(index: &'a SchemaIndex) -> Self {
        Self {
            index,
            graph: Graph::new(),
            pending: HashMap::new(),
            results: HashMap::new(),
            by_source: HashMap::new(),
            worklist: VecDeque::new(),
            indirect: Vec::new(),
        }
    }

    pub(crate) fn run(mut self, root: &Location) -> Result<Graph, DerefError> {
        let index = self.index;
        let value = index
            .value_at(root)
            .ok_or_else(|| DerefError::UnresolvedReference {
                reference: index.describe(root),
                location: "root".to_string(),
            })?;
        let root_id = self.clone_node(root, value)?;
        self.drain_worklist()?;
        self.patch_indirect()?;
        self.ensure_complete()?;
        tracing::debug!(
            "dereferenced {} into {} nodes",
            index.describe(root),
            self.graph.len()
        );
        self.graph.set_root(root_id);
        Ok(self.graph)
    }

    fn clone_node(&mut self, location: &Location, value: &'a Value) -> Result<NodeId, DerefError> {
        let index = self.index;
        match value {
            Value::Object(map) => {
                if let Some(reference) = index.reference(location) {
                    return self.clone_reference(location, map, reference);
                }
                if index.uris_of(location).is_empty() {
                    let fields = self.clone_members(location, map, None)?;
                    return Ok(self.graph.alloc(Node::Object(fields)));
                }
                self.clone_schema(location, value)
            }
            Value::Bool(_) if !index.uris_of(location).is_empty() => {
                self.clone_schema(location, value)
            }
            Value::Array(items) => {
                let mut ids = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    ids.push(self.clone_node(&location.child(&i.to_string()), item)?);
                }
                Ok(self.graph.alloc(Node::Array(ids)))
            }
            _ => Ok(self.graph.insert_value(value)),
        }
    }

    fn clone_schema(&mut self, location: &Location, value: &'a Value) -> Result<NodeId, DerefError> {
        let id = match self.claim(location) {
            Claim::Existing(id) => return Ok(id),
            Claim::Fresh(id) => id,
        };
        self.pending.insert(id, Slot::Filling);
        let node = match value {
            Value::Object(map) => Node::Object(self.clone_members(location, map, None)?),
            Value::Bool(b) => Node::Bool(*b),
            other => {
                let copy = self.graph.insert_value(other);
                self.graph.node(copy).clone()
            }
        };
        self.graph.set(id, node);
        self.pending.remove(&id);
        Ok(id)
    }

    fn clone_reference(
        &mut self,
        location: &Location,
        map: &'a Map<String, Value>,
        reference: &'a Reference,
    ) -> Result<NodeId, DerefError> {
        let index = self.index;
        if let Some(&id) = self.by_source.get(location) {
            return Ok(id);
        }

        // Dynamic references stay in the graph; their target depends on the
        // scope a validator is in when it reaches them.
        if reference.keyword == RefKeyword::DynamicRef {
            let id = match self.claim(location) {
                Claim::Existing(id) => return Ok(id),
                Claim::Fresh(id) => id,
            };
            self.pending.insert(id, Slot::Filling);
            let fields = self.clone_members(location, map, None)?;
            self.graph.set(id, Node::Object(fields));
            self.pending.remove(&id);
            return Ok(id);
        }

        let target = index.resolve_reference(location)?;
        let target_id = self.target_node(target.location, location);

        if reference.pure {
            self.by_source.insert(location.clone(), target_id);
            for uri in index.uris_of(location) {
                self.results.entry(uri.clone()).or_insert(target_id);
            }
            return Ok(target_id);
        }

        let id = match self.claim(location) {
            Claim::Existing(id) => return Ok(id),
            Claim::Fresh(id) => id,
        };
        self.pending.insert(id, Slot::Filling);
        let siblings = self.clone_members(location, map, Some(reference.keyword.as_str()))?;
        self.graph.set(id, Node::Object(siblings));
        if self.is_done(target_id) {
            self.merge_target(id, target_id);
            self.pending.remove(&id);
        } else {
            self.pending.insert(
                id,
                Slot::Placeholder {
                    site: location.clone(),
                    indirect: Some(target_id),
                },
            );
            self.indirect.push(id);
        }
        Ok(id)
    }

    fn clone_members(
        &mut self,
        location: &Location,
        map: &'a Map<String, Value>,
        skip: Option<&str>,
    ) -> Result<Fields, DerefError> {
        let index = self.index;
        let mut fields = Fields::new();
        for (key, child) in map {
            if Some(key.as_str()) == skip {
                continue;
            }
            let child_location = location.child(key);
            let id = if index.is_data(&child_location) {
                self.graph.insert_value(child)
            } else {
                self.clone_node(&child_location, child)?
            };
            fields.insert(key.clone(), id);
        }
        Ok(fields)
    }

    /// Find or allocate the result node for a schema location. A placeholder
    /// handed out earlier for this location is adopted and filled in place.
    fn claim(&mut self, location: &Location) -> Claim {
        if let Some(&id) = self.by_source.get(location) {
            return Claim::Existing(id);
        }
        let found = self
            .index
            .uris_of(location)
            .iter()
            .find_map(|uri| self.results.get(uri).copied());
        match found {
            Some(id) if self.is_plain_placeholder(id) => {
                self.register(location, id);
                Claim::Fresh(id)
            }
            Some(id) => {
                self.by_source.insert(location.clone(), id);
                Claim::Existing(id)
            }
            None => {
                let id = self.graph.alloc(Node::Null);
                self.register(location, id);
                Claim::Fresh(id)
            }
        }
    }

    fn register(&mut self, location: &Location, id: NodeId) {
        let index = self.index;
        let uris = index.uris_of(location);
        self.by_source.insert(location.clone(), id);
        for uri in uris {
            self.results.entry(uri.clone()).or_insert(id);
        }
        if let Some(first) = uris.first() {
            self.graph.set_uri(id, first.as_str());
        }
    }

    /// The result node a reference designates, or a fresh placeholder
    /// registered under every URI of the target.
    fn target_node(&mut self, target: &Location, site: &Location) -> NodeId {
        if let Some(&id) = self.by_source.get(target) {
            return id;
        }
        let index = self.index;
        let uris = index.uris_of(target);
        if let Some(id) = uris.iter().find_map(|uri| self.results.get(uri).copied()) {
            return id;
        }
        let id = self.graph.alloc(Node::Null);
        self.pending.insert(
            id,
            Slot::Placeholder {
                site: site.clone(),
                indirect: None,
            },
        );
        for uri in uris {
            self.results.insert(uri.clone(), id);
        }
        if let Some(first) = uris.first() {
            self.graph.set_uri(id, first.as_str());
        }
        self.worklist.push_back((id, target.clone()));
        id
    }

    /// Materialize targets no traversal reached, such as definitions in
    /// other documents.
    fn drain_worklist(&mut self) -> Result<(), DerefError> {
        let index = self.index;
        while let Some((id, target)) = self.worklist.pop_front() {
            if !self.is_plain_placeholder(id) {
                continue;
            }
            let value = index
                .value_at(&target)
                .ok_or_else(|| DerefError::UnresolvedReference {
                    reference: index.describe(&target),
                    location: self.site_of(id),
                })?;
            // The placeholder is registered under every URI of the target,
            // so cloning the target adopts it.
            let produced = self.clone_node(&target, value)?;
            if produced != id {
                return Err(DerefError::UnresolvedReference {
                    reference: index.describe(&target),
                    location: self.site_of(id),
                });
            }
        }
        Ok(())
    }

    fn patch_indirect(&mut self) -> Result<(), DerefError> {
        let mut waiting = std::mem::take(&mut self.indirect);
        let budget = self
            .index
            .options()
            .max_patch_passes
            .unwrap_or(waiting.len() + 1);
        let mut passes = 0;

        while !waiting.is_empty() {
            if passes >= budget {
                return Err(self.indirect_cycle(&waiting));
            }
            passes += 1;
            let before = waiting.len();
            let mut deferred = Vec::new();
            for id in waiting {
                let target = match self.pending.get(&id) {
                    Some(Slot::Placeholder {
                        indirect: Some(target),
                        ..
                    }) => *target,
                    _ => continue,
                };
                if self.is_done(target) {
                    self.merge_target(id, target);
                    self.pending.remove(&id);
                } else {
                    deferred.push(id);
                }
            }
            tracing::trace!(
                "patch-up pass {}: {} of {} placeholders deferred",
                passes,
                deferred.len(),
                before
            );
            if deferred.len() == before {
                return Err(self.indirect_cycle(&deferred));
            }
            waiting = deferred;
        }
        Ok(())
    }

    fn ensure_complete(&self) -> Result<(), DerefError> {
        let Some((&id, _)) = self.pending.iter().min_by_key(|(id, _)| **id) else {
            return Ok(());
        };
        Err(DerefError::UnresolvedReference {
            reference: self.graph.uri_of(id).unwrap_or("<anonymous>").to_string(),
            location: self.site_of(id),
        })
    }

    /// Overlay the target's members under the siblings already on `id`.
    fn merge_target(&mut self, id: NodeId, target: NodeId) {
        match self.graph.node(target).clone() {
            Node::Object(source) => {
                if let Node::Object(mut fields) = self.graph.node(id).clone() {
                    for (key, child) in source.iter() {
                        fields.insert_if_absent(key, child);
                    }
                    self.graph.set(id, Node::Object(fields));
                }
            }
            // `false` rejects everything whatever the siblings say.
            Node::Bool(false) => self.graph.set(id, Node::Bool(false)),
            _ => {}
        }
    }

    fn is_done(&self, id: NodeId) -> bool {
        !self.pending.contains_key(&id)
    }

    fn is_plain_placeholder(&self, id: NodeId) -> bool {
        matches!(
            self.pending.get(&id),
            Some(Slot::Placeholder { indirect: None, .. })
        )
    }

    fn site_of(&self, id: NodeId) -> String {
        match self.pending.get(&id) {
            Some(Slot::Placeholder { site, .. }) => self.index.describe(site),
            _ => self.graph.uri_of(id).unwrap_or("<anonymous>").to_string(),
        }
    }

    fn indirect_cycle(&self, ids: &[NodeId]) -> DerefError {
        let mut locations: Vec<String> = ids.iter().map(|id| self.site_of(*id)).collect();
        locations.sort();
        DerefError::IndirectCycle { locations }
    }
}
