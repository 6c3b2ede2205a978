//! Error types for pinalbum.
//!
//! Each layer has its own error enum so callers can tell a bad coordinate
//! apart from a flaky network or an empty search. The binary wraps all of
//! them in `anyhow` at the edge.

use thiserror::Error;
use uuid::Uuid;

/// Failures reported by an [`HttpTransport`](crate::transport::HttpTransport)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request never produced a response (DNS, connect, timeout, body read)
    #[error("request failed: {0}")]
    Request(String),
    /// The server answered with a non-2xx status
    #[error("server returned status {0}")]
    Status(u16),
}

/// Failures of a photo search
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// Coordinates outside the valid latitude/longitude ranges
    #[error("invalid coordinate: {0}")]
    Validation(String),
    /// Transport-level failure, including timeouts and non-2xx responses
    #[error("network error: {0}")]
    Network(#[from] TransportError),
    /// The body was not JSON or lacked the photo list
    #[error("could not parse search response: {0}")]
    Parse(String),
    /// The search succeeded but matched nothing
    #[error("no photos found")]
    EmptyResult,
}

/// Failures of the location catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid coordinate: {0}")]
    Validation(String),
    #[error("location {0} not found")]
    LocationNotFound(Uuid),
    #[error("photo {0} not found")]
    PhotoNotFound(Uuid),
    /// Payloads are write-once
    #[error("photo {0} already has a payload")]
    AlreadySet(Uuid),
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

/// Failures of a collection sync
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("location {0} not found")]
    LocationNotFound(Uuid),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Failures of an image resolve.
///
/// Cloneable so one in-flight download can hand its result to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("could not download image: {0}")]
    Download(String),
    #[error("catalog error while resolving image: {0}")]
    Catalog(String),
}

impl From<CatalogError> for ImageError {
    fn from(err: CatalogError) -> Self {
        ImageError::Catalog(err.to_string())
    }
}
