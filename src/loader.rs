//! Document loading from files, strings and HTTP URLs, plus the bundled
//! [`Retrieve`] implementations built on top of them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use url::Url;

use crate::error::RetrieveError;
use crate::store::Retrieve;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Load a JSON document from a file path.
///
/// # Errors
///
/// Returns `RetrieveError::NotFound` if the file doesn't exist,
/// or `RetrieveError::InvalidJson` if the file isn't valid JSON.
pub fn load_schema(path: &Path) -> Result<Value, RetrieveError> {
    if !path.exists() {
        return Err(RetrieveError::NotFound {
            uri: path.display().to_string(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| RetrieveError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| RetrieveError::InvalidJson {
        uri: path.display().to_string(),
        source,
    })
}

/// Load a JSON document from a string.
pub fn load_schema_str(content: &str) -> Result<Value, RetrieveError> {
    serde_json::from_str(content).map_err(|source| RetrieveError::InvalidJson {
        uri: "<string>".to_string(),
        source,
    })
}

/// Load a JSON document from an HTTP/HTTPS URL.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
pub fn load_schema_url(url: &str) -> Result<Value, RetrieveError> {
    let network = |source| RetrieveError::Network {
        uri: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    let response = client.get(url).send().map_err(network)?;

    // Check for HTTP errors before parsing
    let response = response.error_for_status().map_err(network)?;

    response.json().map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Compute the URI a local file is known by.
pub fn file_uri(path: &Path) -> Result<Url, RetrieveError> {
    let absolute = path.canonicalize().map_err(|source| RetrieveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Url::from_file_path(&absolute)
        .map_err(|()| RetrieveError::Other(format!("not a file path: {}", absolute.display())))
}

/// Fixed in-memory documents keyed by absolute URI.
///
/// # Example
///
/// ```
/// use schema_deref::{MapRetriever, Retrieve};
/// use serde_json::json;
///
/// let retriever = MapRetriever::new().with("urn:other", json!({"type": "string"}));
/// let url = url::Url::parse("urn:other").unwrap();
/// assert_eq!(retriever.retrieve(&url).unwrap()["type"], "string");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MapRetriever {
    documents: HashMap<String, Value>,
}

impl MapRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document. The key's fragment, if any, is ignored.
    pub fn with(mut self, uri: &str, document: Value) -> Self {
        self.insert(uri, document);
        self
    }

    pub fn insert(&mut self, uri: &str, document: Value) {
        let key = uri.split('#').next().unwrap_or(uri).to_string();
        self.documents.insert(key, document);
    }
}

impl Retrieve for MapRetriever {
    fn retrieve(&self, uri: &Url) -> Result<Value, RetrieveError> {
        self.documents
            .get(uri.as_str())
            .cloned()
            .ok_or_else(|| RetrieveError::NotFound {
                uri: uri.to_string(),
            })
    }
}

/// Reads `file://` URIs from disk, and maps configured URI prefixes onto
/// local directories.
///
/// # Example
/// ```text
/// prefix = "https://schemas.example.com/v1/"
/// dir    = "site/schemas"
/// https://schemas.example.com/v1/buyer.json -> site/schemas/buyer.json
/// ```
#[derive(Debug, Clone, Default)]
pub struct FileRetriever {
    mappings: Vec<(String, PathBuf)>,
}

impl FileRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every URI starting with `prefix` to the same relative path under `dir`.
    pub fn map_prefix(mut self, prefix: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.mappings.push((prefix.into(), dir.into()));
        self
    }

    fn local_path(&self, uri: &Url) -> Option<PathBuf> {
        let text = uri.as_str();
        // Longest prefix wins so nested mappings can override broad ones.
        let mapped = self
            .mappings
            .iter()
            .filter(|(prefix, _)| text.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());
        if let Some((prefix, dir)) = mapped {
            let remainder = &text[prefix.len()..];
            return Some(dir.join(remainder.trim_start_matches('/')));
        }
        if uri.scheme() == "file" {
            return uri.to_file_path().ok();
        }
        None
    }
}

impl Retrieve for FileRetriever {
    fn retrieve(&self, uri: &Url) -> Result<Value, RetrieveError> {
        let path = self
            .local_path(uri)
            .ok_or_else(|| RetrieveError::Unsupported {
                uri: uri.to_string(),
            })?;
        tracing::debug!("reading {} from {}", uri, path.display());
        load_schema(&path)
    }
}

/// Fetches `http://` and `https://` URIs.
#[cfg(feature = "remote")]
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRetriever;

#[cfg(feature = "remote")]
impl Retrieve for HttpRetriever {
    fn retrieve(&self, uri: &Url) -> Result<Value, RetrieveError> {
        if !is_url(uri.as_str()) {
            return Err(RetrieveError::Unsupported {
                uri: uri.to_string(),
            });
        }
        tracing::debug!("fetching {}", uri);
        load_schema_url(uri.as_str())
    }
}

/// Tries each retriever in order; the first one that does not report
/// `Unsupported` decides the outcome.
#[derive(Default)]
pub struct ChainRetriever {
    retrievers: Vec<Box<dyn Retrieve>>,
}

impl ChainRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, retriever: impl Retrieve + 'static) -> Self {
        self.retrievers.push(Box::new(retriever));
        self
    }
}

impl std::fmt::Debug for ChainRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRetriever")
            .field("retrievers", &self.retrievers.len())
            .finish()
    }
}

impl Retrieve for ChainRetriever {
    fn retrieve(&self, uri: &Url) -> Result<Value, RetrieveError> {
        for retriever in &self.retrievers {
            match retriever.retrieve(uri) {
                Err(RetrieveError::Unsupported { .. }) => continue,
                outcome => return outcome,
            }
        }
        Err(RetrieveError::Unsupported {
            uri: uri.to_string(),
        })
    }
}

/// Rejects every URI. Used when a session must stay within its root documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetriever;

impl Retrieve for NoRetriever {
    fn retrieve(&self, uri: &Url) -> Result<Value, RetrieveError> {
        Err(RetrieveError::Unsupported {
            uri: uri.to_string(),
        })
    }
}
