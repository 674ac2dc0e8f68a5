//! URI/Document Store: a read-through cache of retrieved documents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;
use url::Url;

use crate::error::RetrieveError;
use crate::loader::NoRetriever;
use crate::uri;

/// Retrieval capability handed to a session.
///
/// Implementations receive an absolute URI without fragment and return the
/// document stored there. Closures of the right shape implement it too:
///
/// ```
/// use schema_deref::{Retrieve, RetrieveError};
/// use serde_json::json;
///
/// let retriever = |uri: &url::Url| -> Result<serde_json::Value, RetrieveError> {
///     Ok(json!({ "title": uri.as_str() }))
/// };
/// let doc = retriever.retrieve(&url::Url::parse("urn:a").unwrap()).unwrap();
/// assert_eq!(doc["title"], "urn:a");
/// ```
pub trait Retrieve: Send + Sync {
    fn retrieve(&self, uri: &Url) -> Result<Value, RetrieveError>;
}

impl<F> Retrieve for F
where
    F: Fn(&Url) -> Result<Value, RetrieveError> + Send + Sync,
{
    fn retrieve(&self, uri: &Url) -> Result<Value, RetrieveError> {
        self(uri)
    }
}

type Outcome = Result<Arc<Value>, Arc<RetrieveError>>;

/// Document cache keyed by fragment-free absolute URI.
///
/// A store may be shared (behind an `Arc`) by several sessions, including
/// concurrently: each URI is retrieved at most once, and callers racing on
/// the same URI wait for that single retrieval. Failed retrievals are cached
/// as well until [`Store::evict`] clears them.
pub struct Store {
    retriever: Box<dyn Retrieve>,
    slots: Mutex<HashMap<String, Arc<OnceLock<Outcome>>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(NoRetriever)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("documents", &self.len()).finish()
    }
}

impl Store {
    pub fn new(retriever: impl Retrieve + 'static) -> Self {
        Self {
            retriever: Box::new(retriever),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-seed a document so it is never retrieved.
    pub fn insert(&self, uri: &Url, document: Value) {
        let slot = OnceLock::new();
        let _ = slot.set(Ok(Arc::new(document)));
        self.lock().insert(key(uri), Arc::new(slot));
    }

    /// Return the document at `uri`, retrieving it on first use.
    pub fn fetch(&self, uri: &Url) -> Result<Arc<Value>, Arc<RetrieveError>> {
        let slot = {
            let mut slots = self.lock();
            Arc::clone(slots.entry(key(uri)).or_default())
        };
        // Initialization happens outside the map lock so unrelated URIs are
        // not blocked behind a slow retrieval.
        slot.get_or_init(|| {
            let bare = uri::strip_fragment(uri);
            tracing::debug!("retrieving {}", bare);
            self.retriever
                .retrieve(&bare)
                .map(Arc::new)
                .map_err(|e| {
                    tracing::warn!("retrieval of {} failed: {}", bare, e);
                    Arc::new(e)
                })
        })
        .clone()
    }

    /// True if a successful document is cached for `uri`.
    pub fn contains(&self, uri: &Url) -> bool {
        self.lock()
            .get(&key(uri))
            .and_then(|slot| slot.get())
            .map(|outcome| outcome.is_ok())
            .unwrap_or(false)
    }

    /// Drop any cached outcome for `uri`.
    pub fn evict(&self, uri: &Url) {
        self.lock().remove(&key(uri));
    }

    /// Number of URIs with a settled outcome.
    pub fn len(&self) -> usize {
        self.lock().values().filter(|s| s.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OnceLock<Outcome>>>> {
        // Slots are only inserted or removed under the lock, so a poisoned map
        // is still consistent.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn key(uri: &Url) -> String {
    uri::strip_fragment(uri).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_store(calls: Arc<AtomicUsize>) -> Store {
        Store::new(move |uri: &Url| -> Result<Value, RetrieveError> {
            calls.fetch_add(1, Ordering::SeqCst);
            if uri.as_str() == "urn:missing" {
                Err(RetrieveError::NotFound {
                    uri: uri.to_string(),
                })
            } else {
                Ok(json!({ "title": uri.as_str() }))
            }
        })
    }

    #[test]
    fn fetch_strips_fragment_and_memoizes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counting_store(Arc::clone(&calls));

        let a = store.fetch(&Url::parse("urn:doc#/defs/a").unwrap()).unwrap();
        let b = store.fetch(&Url::parse("urn:doc").unwrap()).unwrap();
        assert_eq!(a["title"], "urn:doc");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failures_are_cached_until_evicted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counting_store(Arc::clone(&calls));
        let missing = Url::parse("urn:missing").unwrap();

        assert!(store.fetch(&missing).is_err());
        assert!(store.fetch(&missing).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!store.contains(&missing));

        store.evict(&missing);
        assert!(store.fetch(&missing).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn inserted_documents_skip_retrieval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = counting_store(Arc::clone(&calls));
        let url = Url::parse("urn:seeded").unwrap();
        store.insert(&url, json!({"type": "null"}));

        assert_eq!(store.fetch(&url).unwrap()["type"], "null");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.contains(&url));
    }

    #[test]
    fn concurrent_fetches_retrieve_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(counting_store(Arc::clone(&calls)));
        let url = Url::parse("urn:shared").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let url = url.clone();
                std::thread::spawn(move || store.fetch(&url).is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
