//! Error types for schema retrieval, indexing and dereferencing.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by a [`Retrieve`](crate::Retrieve) implementation.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("document not found: {uri}")]
    NotFound { uri: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {uri}: {source}")]
    InvalidJson {
        uri: String,
        #[source]
        source: serde_json::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {uri}: {source}")]
    Network {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no retriever handles {uri}")]
    Unsupported { uri: String },

    #[error("{0}")]
    Other(String),
}

impl RetrieveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            RetrieveError::InvalidJson { .. } => 2,
            _ => 3,
        }
    }
}

/// Errors during indexing and dereferencing. Every variant aborts the session.
#[derive(Debug, Error)]
pub enum DerefError {
    #[error("cannot retrieve {uri} (referenced at {location}): {source}")]
    Retrieval {
        uri: String,
        /// The first reference that needed the document.
        location: String,
        #[source]
        source: std::sync::Arc<RetrieveError>,
    },

    #[error("ambiguous identity: {uri} is claimed by both {first} and {second}")]
    AmbiguousIdentity {
        uri: String,
        first: String,
        second: String,
    },

    #[error("unresolved reference {reference} at {location}")]
    UnresolvedReference { reference: String, location: String },

    #[error("indirect reference cycle never resolves: {}", locations.join(", "))]
    IndirectCycle { locations: Vec<String> },

    #[error("reference chain loops without reaching a schema: {uri}")]
    ReferenceCycle { uri: String },

    #[error("invalid URI {uri}: {message}")]
    InvalidUri { uri: String, message: String },

    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

impl DerefError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            DerefError::Retrieval { source, .. } => source.exit_code(),
            _ => 2,
        }
    }

    /// True for the error kinds that point at a missing target rather than
    /// a malformed graph.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            DerefError::UnresolvedReference { .. } | DerefError::Retrieval { .. }
        )
    }
}
