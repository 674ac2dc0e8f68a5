//! Content indexing: one depth-first walk over a document that records every
//! identity a schema node is known by and every reference node found.

use std::collections::HashMap;

use serde_json::{Map, Value};
use url::Url;

use crate::error::DerefError;
use crate::types::{
    escape_pointer_step, AnchorKind, DerefOptions, DocumentId, Location, RefKeyword, ANCHOR,
    DYNAMIC_ANCHOR, DYNAMIC_REF, ID, REF, SCHEMA_MAP_KEYWORDS,
};
use crate::uri;

/// Whether an identity names a schema or a reference node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Schema,
    Reference,
}

/// One URI a node is known by.
#[derive(Debug, Clone)]
pub struct Identity {
    pub uri: Url,
    pub location: Location,
    pub kind: NodeKind,
    /// Set when the URI was introduced by `$anchor` or `$dynamicAnchor`.
    pub anchor: Option<AnchorKind>,
}

/// A reference node and the absolute URI it points at.
#[derive(Debug, Clone)]
pub struct Reference {
    pub keyword: RefKeyword,
    /// The reference string exactly as written.
    pub raw: String,
    /// Base URI in effect at the reference's location.
    pub base: Url,
    pub target: Url,
    pub location: Location,
    /// Only the reference keyword is present, so the node can be substituted
    /// by its target directly.
    pub pure: bool,
}

/// Everything one walk over a document produced.
#[derive(Debug, Default)]
pub struct ContentIndex {
    /// Identities in discovery order; for each location the structural
    /// identity comes first.
    pub identities: Vec<Identity>,
    pub references: Vec<Reference>,
    /// Bases introduced by `$id`, keyed by the node declaring them.
    pub resources: Vec<(Location, Url)>,
    /// Values under a data keyword in keyword position, copied verbatim.
    pub data: Vec<Location>,
}

/// Walk `root` (the document stored at `document_uri`) and index it.
///
/// # Errors
///
/// Returns `DerefError::AmbiguousIdentity` if two distinct nodes claim the
/// same URI, or `DerefError::InvalidUri` for an `$id` or reference that
/// cannot be resolved against its base.
pub fn index_document(
    document: DocumentId,
    root: &Value,
    document_uri: &Url,
    options: &DerefOptions,
) -> Result<ContentIndex, DerefError> {
    let mut indexer = Indexer {
        document_uri: uri::strip_fragment(document_uri),
        options,
        claimed: HashMap::new(),
        out: ContentIndex::default(),
    };
    let base = indexer.document_uri.clone();
    indexer.walk(root, Location::root(document), &base, "", true, false)?;
    tracing::trace!(
        "indexed {}: {} identities, {} references",
        indexer.document_uri,
        indexer.out.identities.len(),
        indexer.out.references.len()
    );
    Ok(indexer.out)
}

struct Indexer<'a> {
    document_uri: Url,
    options: &'a DerefOptions,
    claimed: HashMap<Url, (Location, usize)>,
    out: ContentIndex,
}

impl Indexer<'_> {
    /// `resource_pointer` is the pointer from the nearest `$id`-declaring
    /// ancestor; `register` is false inside the siblings of a reference node,
    /// where references are still collected but no identities are claimed.
    /// `schema_map` is set for the value of `properties`, `$defs` and the
    /// like, whose member names are not keywords.
    fn walk(
        &mut self,
        value: &Value,
        location: Location,
        base: &Url,
        resource_pointer: &str,
        register: bool,
        schema_map: bool,
    ) -> Result<(), DerefError> {
        match value {
            Value::Object(map) => {
                self.walk_object(map, location, base, resource_pointer, register, schema_map)
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let step = i.to_string();
                    self.walk(
                        item,
                        location.child(&step),
                        base,
                        &format!("{resource_pointer}/{step}"),
                        register,
                        false,
                    )?;
                }
                Ok(())
            }
            Value::Bool(_) if register => {
                self.claim_structural(&location, base, resource_pointer, NodeKind::Schema)
            }
            _ => Ok(()),
        }
    }

    fn walk_object(
        &mut self,
        map: &Map<String, Value>,
        location: Location,
        base: &Url,
        resource_pointer: &str,
        register: bool,
        schema_map: bool,
    ) -> Result<(), DerefError> {
        let reference = reference_keyword(map);
        let kind = match reference {
            Some(_) => NodeKind::Reference,
            None => NodeKind::Schema,
        };

        if register {
            self.claim_structural(&location, base, resource_pointer, kind)?;
        }

        // `$id` rebases this node and its subtree. A fragment-only `$id` is
        // the pre-2019 spelling of `$anchor`.
        let mut scope_base = base.clone();
        let mut scope_pointer = resource_pointer.to_string();
        let mut legacy_anchor = None;
        if let Some(id) = map.get(ID).and_then(Value::as_str) {
            if let Some(name) = id.strip_prefix('#') {
                legacy_anchor = Some(name.to_string());
            } else {
                scope_base = uri::strip_fragment(&uri::resolve(base, id)?);
                scope_pointer = String::new();
                self.out.resources.push((location.clone(), scope_base.clone()));
                if register {
                    self.claim(uri::with_fragment(&scope_base, ""), &location, kind, None)?;
                }
            }
        }

        if register {
            let anchors = [
                (legacy_anchor.as_deref(), AnchorKind::Static),
                (map.get(ANCHOR).and_then(Value::as_str), AnchorKind::Static),
                (
                    map.get(DYNAMIC_ANCHOR).and_then(Value::as_str),
                    AnchorKind::Dynamic,
                ),
            ];
            for (name, anchor) in anchors {
                if let Some(name) = name.filter(|n| !n.is_empty()) {
                    let uri = uri::with_fragment(&scope_base, name);
                    self.claim(uri, &location, kind, Some(anchor))?;
                }
            }
        }

        if let Some(keyword) = reference {
            let raw = map
                .get(keyword.as_str())
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let target = uri::resolve(&scope_base, &raw)?;
            self.out.references.push(Reference {
                keyword,
                raw,
                base: scope_base.clone(),
                target,
                location: location.clone(),
                pure: map.len() == 1,
            });
        }

        // Below a reference node only references are collected.
        let register_children = register && reference.is_none();
        for (key, child) in map {
            if !schema_map && self.options.is_data_keyword(key) {
                self.out.data.push(location.child(key));
                continue;
            }
            self.walk(
                child,
                location.child(key),
                &scope_base,
                &format!("{scope_pointer}/{}", escape_pointer_step(key)),
                register_children,
                !schema_map && SCHEMA_MAP_KEYWORDS.contains(&key.as_str()),
            )?;
        }
        Ok(())
    }

    /// Claim the document-relative pointer URI and, inside an embedded
    /// resource, the resource-relative one.
    fn claim_structural(
        &mut self,
        location: &Location,
        base: &Url,
        resource_pointer: &str,
        kind: NodeKind,
    ) -> Result<(), DerefError> {
        let canonical = uri::with_fragment(&self.document_uri, &location.pointer);
        self.claim(canonical, location, kind, None)?;
        if base != &self.document_uri {
            self.claim(uri::with_fragment(base, resource_pointer), location, kind, None)?;
        }
        Ok(())
    }

    fn claim(
        &mut self,
        uri: Url,
        location: &Location,
        kind: NodeKind,
        anchor: Option<AnchorKind>,
    ) -> Result<(), DerefError> {
        if let Some((owner, slot)) = self.claimed.get(&uri) {
            if owner != location {
                return Err(DerefError::AmbiguousIdentity {
                    uri: uri.to_string(),
                    first: uri::with_fragment(&self.document_uri, &owner.pointer).to_string(),
                    second: uri::with_fragment(&self.document_uri, &location.pointer).to_string(),
                });
            }
            // Same node, same URI: `$anchor` and `$dynamicAnchor` with one
            // name. The dynamic declaration wins.
            if anchor == Some(AnchorKind::Dynamic) {
                self.out.identities[*slot].anchor = anchor;
            }
            return Ok(());
        }
        self.claimed
            .insert(uri.clone(), (location.clone(), self.out.identities.len()));
        self.out.identities.push(Identity {
            uri,
            location: location.clone(),
            kind,
            anchor,
        });
        Ok(())
    }
}

/// The reference keyword an object carries, if any. `$ref` takes precedence
/// when both are present.
pub fn reference_keyword(map: &Map<String, Value>) -> Option<RefKeyword> {
    if map.get(REF).map(Value::is_string).unwrap_or(false) {
        Some(RefKeyword::Ref)
    } else if map.get(DYNAMIC_REF).map(Value::is_string).unwrap_or(false) {
        Some(RefKeyword::DynamicRef)
    } else {
        None
    }
}
