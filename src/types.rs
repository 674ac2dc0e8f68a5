//! Core types shared by the indexer, index and dereferencing engine.

use std::fmt;

use serde::Serialize;

/// Static reference keyword.
pub const REF: &str = "$ref";
/// Dynamic (scope-sensitive) reference keyword.
pub const DYNAMIC_REF: &str = "$dynamicRef";
/// Base URI rebasing keyword.
pub const ID: &str = "$id";
/// Static anchor keyword.
pub const ANCHOR: &str = "$anchor";
/// Dynamic anchor keyword.
pub const DYNAMIC_ANCHOR: &str = "$dynamicAnchor";

/// Keywords whose values are instance data rather than subschemas.
pub const DATA_KEYWORDS: &[&str] = &["const", "enum", "default", "examples"];

/// Keywords whose values map arbitrary member names to subschemas. Their
/// member names are never keywords.
pub const SCHEMA_MAP_KEYWORDS: &[&str] = &[
    "properties",
    "patternProperties",
    "$defs",
    "definitions",
    "dependentSchemas",
];

/// Default base URI for root schemas supplied without one.
pub const DEFAULT_BASE_URI: &str = "urn:schema-deref:root";

/// Index of a document inside one session's document table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocumentId(pub(crate) usize);

/// Structural position of a source node: a document plus a JSON Pointer
/// from that document's root.
///
/// Two locations are equal exactly when they name the same source node,
/// which is what the engine uses in place of object identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Location {
    pub document: DocumentId,
    pub pointer: String,
}

impl Location {
    pub(crate) fn root(document: DocumentId) -> Self {
        Self {
            document,
            pointer: String::new(),
        }
    }

    /// Location of the child reached by one unescaped path step.
    pub fn child(&self, step: &str) -> Self {
        Self {
            document: self.document,
            pointer: format!("{}/{}", self.pointer, escape_pointer_step(step)),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc{}#{}", self.document.0, self.pointer)
    }
}

/// Escape one JSON Pointer step (RFC 6901: `~` => `~0`, `/` => `~1`).
pub fn escape_pointer_step(step: &str) -> String {
    step.replace('~', "~0").replace('/', "~1")
}

/// Reverse of [`escape_pointer_step`].
pub fn unescape_pointer_step(step: &str) -> String {
    step.replace("~1", "/").replace("~0", "~")
}

/// Which keyword a reference node uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RefKeyword {
    Ref,
    DynamicRef,
}

impl RefKeyword {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKeyword::Ref => REF,
            RefKeyword::DynamicRef => DYNAMIC_REF,
        }
    }
}

/// How an anchor-derived identity was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorKind {
    Static,
    Dynamic,
}

/// Options for a resolution session.
///
/// # Example
///
/// ```
/// use schema_deref::DerefOptions;
///
/// let options = DerefOptions::new().base_uri("urn:example").max_patch_passes(16);
/// assert_eq!(options.base_uri, "urn:example");
/// ```
#[derive(Debug, Clone)]
pub struct DerefOptions {
    /// Base URI assigned to root schemas that arrive without one.
    pub base_uri: String,
    /// Budget for indirect placeholder patch-up passes. `None` derives the
    /// budget from the number of pending placeholders.
    pub max_patch_passes: Option<usize>,
    /// Keywords whose values are copied as opaque data.
    pub data_keywords: Vec<String>,
}

impl Default for DerefOptions {
    fn default() -> Self {
        Self {
            base_uri: DEFAULT_BASE_URI.to_string(),
            max_patch_passes: None,
            data_keywords: DATA_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl DerefOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback base URI.
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = uri.into();
        self
    }

    /// Cap the number of indirect patch-up passes.
    pub fn max_patch_passes(mut self, passes: usize) -> Self {
        self.max_patch_passes = Some(passes);
        self
    }

    /// Replace the set of opaque data keywords.
    pub fn data_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn is_data_keyword(&self, key: &str) -> bool {
        self.data_keywords.iter().any(|k| k == key)
    }
}

/// The static schema path walked from a root schema to the current
/// evaluation point, supplied by a validator for dynamic resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePath {
    /// URI of the root schema the walk starts from.
    pub root: String,
    /// Unescaped JSON Pointer steps, outermost first.
    pub steps: Vec<String>,
}

impl ScopePath {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            steps: Vec::new(),
        }
    }

    /// Build from a root URI and a JSON Pointer such as `/properties/a`.
    pub fn from_pointer(root: impl Into<String>, pointer: &str) -> Self {
        let steps = pointer
            .split('/')
            .skip(1)
            .map(unescape_pointer_step)
            .collect();
        Self {
            root: root.into(),
            steps,
        }
    }

    pub fn push(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    pub fn with(mut self, step: impl Into<String>) -> Self {
        self.push(step);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_child_escapes_steps() {
        let loc = Location::root(DocumentId(0)).child("$defs").child("a/b~c");
        assert_eq!(loc.pointer, "/$defs/a~1b~0c");
    }

    #[test]
    fn scope_path_from_pointer() {
        let path = ScopePath::from_pointer("urn:x", "/properties/a~1b/items");
        assert_eq!(path.steps, vec!["properties", "a/b", "items"]);
        assert!(ScopePath::from_pointer("urn:x", "").steps.is_empty());
    }

    #[test]
    fn options_builder() {
        let options = DerefOptions::new()
            .max_patch_passes(3)
            .data_keywords(["const"]);
        assert_eq!(options.max_patch_passes, Some(3));
        assert!(options.is_data_keyword("const"));
        assert!(!options.is_data_keyword("enum"));
        assert_eq!(options.base_uri, DEFAULT_BASE_URI);
    }
}
