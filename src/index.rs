//! Schema Index: the indexed closure of documents reachable from the root
//! schemas of one session, and the lookup services built on it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::deref::Dereferencer;
use crate::error::DerefError;
use crate::graph::Graph;
use crate::indexer::{index_document, ContentIndex, Identity, NodeKind, Reference};
use crate::loader::NoRetriever;
use crate::store::{Retrieve, Store};
use crate::types::{
    AnchorKind, DerefOptions, DocumentId, Location, RefKeyword, ScopePath, DYNAMIC_ANCHOR, ID,
};
use crate::uri;

/// A schema node found through the index.
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    /// Canonical (structural) URI of the node.
    pub uri: &'a Url,
    pub location: &'a Location,
    pub value: &'a Value,
}

#[derive(Debug)]
struct Document {
    uri: Url,
    value: Arc<Value>,
}

#[derive(Debug, Clone)]
struct Entry {
    location: Location,
    kind: NodeKind,
    anchor: Option<AnchorKind>,
}

/// Session-scoped index over every document in the closure of its roots.
///
/// Documents come from the shared [`Store`]; everything else (identities,
/// references, resolution results) lives and dies with the session.
///
/// # Example
///
/// ```
/// use schema_deref::{MapRetriever, SchemaIndex};
/// use serde_json::json;
///
/// let retriever = MapRetriever::new().with("urn:other", json!({"defs": {"a": {"type": "string"}}}));
/// let mut index = SchemaIndex::with_retriever(retriever);
/// let root = index
///     .add_root_schema(json!({"$ref": "urn:other#/defs/a"}), Some("urn:root"))
///     .unwrap();
///
/// let target = index.resolve_reference(&index.root_location(root)).unwrap();
/// assert_eq!(target.uri.as_str(), "urn:other#/defs/a");
/// assert_eq!(target.value["type"], "string");
/// ```
#[derive(Debug)]
pub struct SchemaIndex {
    store: Arc<Store>,
    options: DerefOptions,
    documents: Vec<Document>,
    by_uri: HashMap<Url, DocumentId>,
    /// Fragment-free URIs that are documents or `$id` resources.
    known: HashSet<Url>,
    identities: HashMap<Url, Entry>,
    aliases: HashMap<Location, Vec<Url>>,
    references: HashMap<Location, Reference>,
    resources: HashMap<Location, Url>,
    data: HashSet<Location>,
}

impl SchemaIndex {
    pub fn new(store: Arc<Store>, options: DerefOptions) -> Self {
        Self {
            store,
            options,
            documents: Vec::new(),
            by_uri: HashMap::new(),
            known: HashSet::new(),
            identities: HashMap::new(),
            aliases: HashMap::new(),
            references: HashMap::new(),
            resources: HashMap::new(),
            data: HashSet::new(),
        }
    }

    /// Session with its own private store over `retriever`.
    pub fn with_retriever(retriever: impl Retrieve + 'static) -> Self {
        Self::new(Arc::new(Store::new(retriever)), DerefOptions::default())
    }

    /// Session that can only see its root schemas.
    pub fn offline() -> Self {
        Self::with_retriever(NoRetriever)
    }

    pub fn options(&self) -> &DerefOptions {
        &self.options
    }

    /// Register a root document under `base_uri` (or the configured default)
    /// and index the closure of everything it references.
    ///
    /// # Errors
    ///
    /// Fails on the first retrieval failure, ambiguous identity or malformed
    /// URI found anywhere in the closure.
    pub fn add_root_schema(
        &mut self,
        root: Value,
        base_uri: Option<&str>,
    ) -> Result<DocumentId, DerefError> {
        let base = uri::strip_fragment(&uri::parse(
            base_uri.unwrap_or(&self.options.base_uri),
        )?);
        if let Some(&existing) = self.by_uri.get(&base) {
            tracing::debug!("root {} already indexed", base);
            return Ok(existing);
        }
        let id = self.add_document(base, Arc::new(root))?;
        self.complete_closure()?;
        Ok(id)
    }

    fn add_document(&mut self, uri: Url, value: Arc<Value>) -> Result<DocumentId, DerefError> {
        let id = DocumentId(self.documents.len());
        let content = index_document(id, &value, &uri, &self.options)?;
        self.documents.push(Document {
            uri: uri.clone(),
            value,
        });
        self.by_uri.insert(uri.clone(), id);
        self.known.insert(uri);
        self.merge(content);
        Ok(id)
    }

    fn merge(&mut self, content: ContentIndex) {
        let ContentIndex {
            identities,
            references,
            resources,
            data,
        } = content;
        self.data.extend(data);
        for Identity {
            uri,
            location,
            kind,
            anchor,
        } in identities
        {
            if let Some(entry) = self.identities.get(&uri) {
                // Within a document duplicates were already rejected; across
                // documents the first claimant keeps the URI.
                if entry.location != location {
                    tracing::warn!("{} already claimed by another document; keeping first", uri);
                }
                continue;
            }
            self.aliases
                .entry(location.clone())
                .or_default()
                .push(uri.clone());
            self.identities.insert(
                uri,
                Entry {
                    location,
                    kind,
                    anchor,
                },
            );
        }
        for reference in references {
            self.references.insert(reference.location.clone(), reference);
        }
        for (location, base) in resources {
            self.known.insert(base.clone());
            self.resources.insert(location, base);
        }
    }

    /// Fetch and index every document a reference points into until no
    /// reference names an unknown document.
    ///
    /// A failed retrieval is only fatal once the closure is exhausted: the
    /// URI may still turn out to be an `$id` resource embedded in a document
    /// fetched later.
    fn complete_closure(&mut self) -> Result<(), DerefError> {
        let mut queue: VecDeque<(Url, Location)> = self.pending_targets(None).into();
        let mut requested = HashSet::new();
        let mut failed = Vec::new();

        while let Some((doc_uri, site)) = queue.pop_front() {
            if self.known.contains(&doc_uri) || !requested.insert(doc_uri.clone()) {
                continue;
            }
            let value = match self.store.fetch(&doc_uri) {
                Ok(value) => value,
                Err(source) => {
                    tracing::debug!("deferring {} after failed retrieval", doc_uri);
                    failed.push((doc_uri, site, source));
                    continue;
                }
            };
            let before = self.references.len();
            let id = self.add_document(doc_uri.clone(), value)?;
            tracing::debug!(
                "indexed {} as document {} ({} new references)",
                doc_uri,
                id.0,
                self.references.len() - before
            );
            queue.extend(self.pending_targets(Some(id)));
        }

        match failed
            .into_iter()
            .find(|(doc_uri, _, _)| !self.known.contains(doc_uri))
        {
            Some((doc_uri, site, source)) => Err(DerefError::Retrieval {
                uri: doc_uri.to_string(),
                location: self.describe(&site),
                source,
            }),
            None => Ok(()),
        }
    }

    /// Target documents of the references in `document` (or in every
    /// document), with the referencing location, ordered by location.
    fn pending_targets(&self, document: Option<DocumentId>) -> Vec<(Url, Location)> {
        let mut targets: Vec<_> = self
            .references
            .values()
            .filter(|r| document.map_or(true, |d| r.location.document == d))
            .map(|r| (uri::strip_fragment(&r.target), r.location.clone()))
            .collect();
        targets.sort_by(|a, b| a.1.cmp(&b.1));
        targets
    }

    /// Location of a document's root node.
    pub fn root_location(&self, document: DocumentId) -> Location {
        Location::root(document)
    }

    /// URI a document was registered or retrieved under.
    pub fn document_uri(&self, document: DocumentId) -> Option<&Url> {
        self.documents.get(document.0).map(|d| &d.uri)
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// The source value at a location.
    pub fn value_at(&self, location: &Location) -> Option<&Value> {
        let document = self.documents.get(location.document.0)?;
        document.value.pointer(&location.pointer)
    }

    /// Every URI a node is known by, structural identity first.
    pub fn uris_of(&self, location: &Location) -> &[Url] {
        self.aliases
            .get(location)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True for a value that sits under a data keyword and is copied as is.
    pub fn is_data(&self, location: &Location) -> bool {
        self.data.contains(location)
    }

    /// The reference node at a location, if it is one.
    pub fn reference(&self, location: &Location) -> Option<&Reference> {
        self.references.get(location)
    }

    /// All reference nodes in the closure, in no particular order.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.references.values()
    }

    /// Locate the node indexed under `uri`.
    pub fn location_of(&self, uri: &str) -> Option<&Location> {
        let url = uri::parse(uri).ok()?;
        self.identities.get(&url).map(|e| &e.location)
    }

    /// What schema is at `uri`.
    pub fn schema_at(&self, uri: &str) -> Option<Resolved<'_>> {
        let url = uri::parse(uri).ok()?;
        let entry = self.identities.get(&url)?;
        self.resolved(&entry.location)
    }

    fn resolved(&self, location: &Location) -> Option<Resolved<'_>> {
        let (location, uris) = self.aliases.get_key_value(location)?;
        Some(Resolved {
            uri: uris.first()?,
            location,
            value: self.value_at(location)?,
        })
    }

    /// Resolve the reference node at `reference` to the node at its target.
    ///
    /// Chains of pure `$ref` nodes are followed to the first node that is
    /// not one, so every alias of a schema ends at the same location.
    ///
    /// # Errors
    ///
    /// `UnresolvedReference` if nothing was indexed at the target, or
    /// `ReferenceCycle` if a chain of pure references loops.
    pub fn resolve_reference(&self, reference: &Location) -> Result<Resolved<'_>, DerefError> {
        let mut current = self.reference(reference).ok_or_else(|| {
            DerefError::UnresolvedReference {
                reference: "<not a reference>".to_string(),
                location: self.describe(reference),
            }
        })?;
        let mut seen = HashSet::new();
        loop {
            let entry = self.identities.get(&current.target).ok_or_else(|| {
                DerefError::UnresolvedReference {
                    reference: current.target.to_string(),
                    location: self.describe(&current.location),
                }
            })?;
            let next = match self.reference(&entry.location) {
                Some(next) if next.pure && next.keyword == RefKeyword::Ref => next,
                _ => {
                    return self.resolved(&entry.location).ok_or_else(|| {
                        DerefError::UnresolvedReference {
                            reference: current.target.to_string(),
                            location: self.describe(&current.location),
                        }
                    })
                }
            };
            if !seen.insert(&next.location) {
                return Err(DerefError::ReferenceCycle {
                    uri: current.target.to_string(),
                });
            }
            current = next;
        }
    }

    /// Resolve a dynamic reference against the scope path a validator walked
    /// to reach it.
    ///
    /// The statically resolved target names a dynamic anchor `D` through its
    /// URI fragment. The scope is walked from the root outward-in: a node
    /// carrying a reference is replaced by that reference's target; the first
    /// node declaring `$dynamicAnchor: D`, or declaring `$id` under which
    /// `D` is indexed as a dynamic anchor, wins. With no winner the static
    /// target is returned. A JSON Pointer fragment skips the search.
    ///
    /// A scope node carrying `$ref` is replaced before its own keywords are
    /// looked at, so its `$id` and `$dynamicAnchor` never win. In the common
    /// extension pattern
    /// `{"$id": "urn:strict-tree", "$dynamicAnchor": "node", "$ref": "urn:tree"}`
    /// used as the scope root, the walk continues from `urn:tree` and the
    /// winner is `urn:tree#`. To make the extension win, keep `$ref` off the
    /// scope node, for example by wrapping it in `allOf`.
    ///
    /// # Errors
    ///
    /// Errors from static resolution, an unknown scope root, or a scope step
    /// that leads nowhere.
    pub fn resolve_dynamic_reference(
        &self,
        reference: &Location,
        scope: &ScopePath,
    ) -> Result<Resolved<'_>, DerefError> {
        let fallback = self.resolve_reference(reference)?;
        let Some(info) = self.reference(reference) else {
            return Ok(fallback);
        };
        let anchor = info.target.fragment().unwrap_or_default();
        if uri::is_pointer_fragment(anchor) {
            return Ok(fallback);
        }

        let mut current = self
            .location_of(&scope.root)
            .cloned()
            .ok_or_else(|| DerefError::UnresolvedReference {
                reference: scope.root.clone(),
                location: "dynamic scope root".to_string(),
            })?;
        let mut steps = scope.steps.iter();
        loop {
            current = self.follow_scope_references(current)?;
            if let Some(winner) = self.dynamic_match(&current, anchor) {
                tracing::debug!(
                    "{} resolved dynamically to {}",
                    info.raw,
                    winner.uri
                );
                return Ok(winner);
            }
            let Some(step) = steps.next() else { break };
            let next = current.child(step);
            if self.value_at(&next).is_none() {
                return Err(DerefError::UnresolvedReference {
                    reference: format!("{}/{}", self.describe(&current), step),
                    location: "dynamic scope path".to_string(),
                });
            }
            current = next;
        }
        Ok(fallback)
    }

    fn follow_scope_references(&self, mut current: Location) -> Result<Location, DerefError> {
        let mut seen = HashSet::new();
        while self.reference(&current).is_some() {
            if !seen.insert(current.clone()) {
                return Err(DerefError::ReferenceCycle {
                    uri: self.describe(&current),
                });
            }
            current = self.resolve_reference(&current)?.location.clone();
        }
        Ok(current)
    }

    fn dynamic_match(&self, location: &Location, anchor: &str) -> Option<Resolved<'_>> {
        let value = self.value_at(location)?;
        if value.get(DYNAMIC_ANCHOR).and_then(Value::as_str) == Some(anchor) {
            return self.resolved(location);
        }
        if value.get(ID).is_some() {
            let base = self.resources.get(location)?;
            let entry = self.identities.get(&uri::with_fragment(base, anchor))?;
            // A same-named static anchor is never a dynamic match.
            if entry.anchor == Some(AnchorKind::Static) {
                return None;
            }
            return self.resolved(&entry.location);
        }
        None
    }

    /// Produce the dereferenced graph rooted at `document`.
    pub fn dereference(&self, document: DocumentId) -> Result<Graph, DerefError> {
        Dereferencer::new(self).run(&Location::root(document))
    }

    pub(crate) fn describe(&self, location: &Location) -> String {
        match self.uris_of(location).first() {
            Some(uri) => uri.to_string(),
            None => match self.document_uri(location.document) {
                Some(doc) => uri::with_fragment(doc, &location.pointer).to_string(),
                None => location.to_string(),
            },
        }
    }
}
