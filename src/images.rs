//! Image byte cache for pinalbum.
//!
//! `ImageStore::resolve` looks for a photo's bytes in three places, cheapest
//! first: an in-memory map keyed by URL, the catalog's stored payloads, and
//! finally the network. A successful download is written back to both the
//! memory map and the catalog, so each photo is downloaded at most once.
//!
//! Overlapping resolves of one URL share a single download. Each download is
//! a single attempt; callers retry by resolving again.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::catalog::{LocationCatalog, run_blocking};
use crate::error::{CatalogError, ImageError};
use crate::transport::HttpTransport;
use crate::util::lock;

/// Image bytes, cheap to clone
pub type ImageBytes = Arc<[u8]>;

type Download = Shared<BoxFuture<'static, Result<ImageBytes, ImageError>>>;

struct Inner {
    transport: Arc<dyn HttpTransport>,
    catalog: Arc<dyn LocationCatalog>,
    memory: Mutex<HashMap<String, ImageBytes>>,
    in_flight: Mutex<HashMap<String, Download>>,
}

/// Memory, catalog, then network lookup of photo bytes
#[derive(Clone)]
pub struct ImageStore {
    inner: Arc<Inner>,
}

impl ImageStore {
    pub fn new(transport: Arc<dyn HttpTransport>, catalog: Arc<dyn LocationCatalog>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                catalog,
                memory: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the bytes for `url`, downloading them if nothing has them yet
    pub async fn resolve(&self, url: &str) -> Result<ImageBytes, ImageError> {
        let cached = lock(&self.inner.memory).get(url).cloned();
        if let Some(bytes) = cached {
            debug!("Memory cache hit for {url}");
            return Ok(bytes);
        }

        let owned_url = url.to_string();
        let stored =
            run_blocking(&self.inner.catalog, move |c| c.find_payload_by_url(&owned_url)).await?;
        if let Some(payload) = stored {
            debug!("Catalog hit for {url}");
            let bytes: ImageBytes = Arc::from(payload);
            lock(&self.inner.memory).insert(url.to_string(), bytes.clone());
            return Ok(bytes);
        }

        let download = {
            let mut in_flight = lock(&self.inner.in_flight);
            in_flight
                .entry(url.to_string())
                .or_insert_with(|| download_once(self.inner.clone(), url.to_string()).boxed().shared())
                .clone()
        };
        download.await
    }

    /// Starts resolving `url` in the background.
    ///
    /// The returned request can be cancelled when its result is no longer
    /// wanted; a cancelled request finishes with `None`.
    pub fn request(&self, url: &str) -> ImageRequest {
        let store = self.clone();
        let url = url.to_string();
        ImageRequest {
            handle: tokio::spawn(async move { store.resolve(&url).await }),
        }
    }

    /// Drops `url` from the memory cache
    pub fn evict(&self, url: &str) -> bool {
        lock(&self.inner.memory).remove(url).is_some()
    }

    pub fn clear_memory(&self) {
        lock(&self.inner.memory).clear();
    }

    /// Number of URLs held in memory
    pub fn cached_count(&self) -> usize {
        lock(&self.inner.memory).len()
    }
}

async fn download_once(inner: Arc<Inner>, url: String) -> Result<ImageBytes, ImageError> {
    let result = fetch_and_store(&inner, &url).await;
    lock(&inner.in_flight).remove(&url);
    result
}

async fn fetch_and_store(inner: &Inner, url: &str) -> Result<ImageBytes, ImageError> {
    info!("Downloading {url}");
    let payload = inner.transport.get_bytes(url).await.map_err(|e| {
        warn!("Download of {url} failed: {e}");
        ImageError::Download(format!("{url}: {e}"))
    })?;
    if payload.is_empty() {
        warn!("Download of {url} returned an empty body");
        return Err(ImageError::Download(format!("{url}: empty response body")));
    }

    let bytes: ImageBytes = Arc::from(payload);
    lock(&inner.memory).insert(url.to_string(), bytes.clone());

    let owned_url = url.to_string();
    let stored = bytes.clone();
    run_blocking(&inner.catalog, move |catalog| {
        store_payload(catalog, &owned_url, &stored);
        Ok(())
    })
    .await?;

    Ok(bytes)
}

/// Attaches downloaded bytes to the photo they belong to, if it still wants them
fn store_payload(catalog: &dyn LocationCatalog, url: &str, bytes: &[u8]) {
    let photo = match catalog.find_photo_by_url(url) {
        Ok(photo) => photo,
        Err(e) => {
            warn!("Could not look up photo for {url}: {e}");
            return;
        }
    };

    match photo {
        Some(photo) if !photo.has_payload() => match catalog.attach_payload(photo.id, bytes) {
            Ok(()) => debug!("Stored payload for photo {}", photo.id),
            Err(CatalogError::AlreadySet(id)) => debug!("Photo {id} got its payload elsewhere"),
            Err(CatalogError::PhotoNotFound(id)) => debug!("Photo {id} was deleted mid-download"),
            Err(e) => warn!("Could not store payload for {url}: {e}"),
        },
        Some(_) => debug!("Payload for {url} already stored"),
        None => debug!("No photo record for {url}, keeping bytes in memory only"),
    }
}

/// A background resolve that can be cancelled
pub struct ImageRequest {
    handle: JoinHandle<Result<ImageBytes, ImageError>>,
}

impl ImageRequest {
    /// Stops waiting for the result
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the result; `None` if the request was cancelled
    pub async fn outcome(self) -> Option<Result<ImageBytes, ImageError>> {
        match self.handle.await {
            Ok(result) => Some(result),
            Err(e) if e.is_cancelled() => None,
            Err(e) => Some(Err(ImageError::Download(format!("download task failed: {e}")))),
        }
    }
}
