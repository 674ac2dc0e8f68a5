//! Schema Deref
//!
//! Reference resolution and dereferencing for JSON Schema document graphs.
//!
//! A [`SchemaIndex`] indexes a root schema together with every document it
//! references (transitively), recording every URI each schema node is known
//! by: its structural `base#pointer` identity, `$id` bases, `$anchor` and
//! `$dynamicAnchor` names. On top of the index it resolves `$ref` statically,
//! resolves `$dynamicRef` against the dynamic scope a validator is in, and
//! produces a dereferenced [`Graph`] in which every static reference is
//! replaced by the shared node it designates.
//!
//! # Example
//!
//! ```
//! use schema_deref::{MapRetriever, SchemaIndex};
//! use serde_json::json;
//!
//! let retriever = MapRetriever::new().with(
//!     "https://example.com/types.json",
//!     json!({ "$defs": { "id": { "type": "string", "format": "uuid" } } }),
//! );
//! let mut index = SchemaIndex::with_retriever(retriever);
//! let root = index
//!     .add_root_schema(
//!         json!({
//!             "$id": "https://example.com/order.json",
//!             "properties": {
//!                 "id": { "$ref": "types.json#/$defs/id" },
//!                 "parent": { "$ref": "#" }
//!             }
//!         }),
//!         None,
//!     )
//!     .unwrap();
//!
//! let graph = index.dereference(root).unwrap();
//! let properties = graph.get(graph.root(), "properties").unwrap();
//!
//! // Self references become cycles in the graph
//! assert_eq!(graph.get(properties, "parent"), Some(graph.root()));
//!
//! // External references are replaced by their targets
//! let id = graph.get(properties, "id").unwrap();
//! assert_eq!(graph.to_value_from(id), json!({ "type": "string", "format": "uuid" }));
//! ```
//!
//! # Reference Rules
//!
//! | Node | Result in the graph |
//! |------|---------------------|
//! | `{"$ref": R}` | The node at `R`, shared with every other alias |
//! | `{"$ref": R, ...siblings}` | Members of `R` merged under the siblings |
//! | `{"$ref": R, ...}` with `R` = `false` | `false` |
//! | `{"$dynamicRef": R}` | Kept; resolve with [`SchemaIndex::resolve_dynamic_reference`] |
//! | `const`, `enum`, `default`, `examples` keywords | Copied as data, never dereferenced |
//! | A property or definition named `default` (etc.) | A subschema like any other |

mod deref;
mod error;
mod graph;
mod index;
mod indexer;
mod linter;
mod loader;
mod store;
mod types;
mod uri;

pub use deref::{dereference, dereference_with};
pub use error::{DerefError, RetrieveError};
pub use graph::{Fields, Graph, Node, NodeId};
pub use index::{Resolved, SchemaIndex};
pub use indexer::{index_document, ContentIndex, Identity, NodeKind, Reference};
pub use linter::{lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity};
pub use loader::{
    file_uri, is_url, load_schema, load_schema_str, ChainRetriever, FileRetriever, MapRetriever,
    NoRetriever,
};
pub use store::{Retrieve, Store};
pub use types::{
    AnchorKind, DerefOptions, DocumentId, Location, RefKeyword, ScopePath, DATA_KEYWORDS,
    DEFAULT_BASE_URI, SCHEMA_MAP_KEYWORDS,
};

#[cfg(feature = "remote")]
pub use loader::{load_schema_url, HttpRetriever};
