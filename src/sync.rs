//! Core synchronization logic for pinalbum.
//!
//! This module keeps each pin's photo collection in step with the photo
//! search API:
//! - Populating a pin the first time its album is opened
//! - Replacing the whole collection when the user asks for a new one
//! - Treating an empty search as a valid, terminal result
//! - Leaving stored photos untouched when a search fails
//!
//! The `CollectionSyncEngine` runs at most one operation per pin at a time.
//! A second call for the same pin waits for the first to finish and then
//! acts on whatever state it left behind, so two overlapping
//! `ensure_populated` calls issue a single search.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::catalog::{Location, LocationCatalog, run_blocking};
use crate::error::{SearchError, SyncError};
use crate::search::PhotoSearchClient;
use crate::util::lock;

/// Where a pin's collection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    /// Never fetched
    Empty,
    /// First search in flight
    Fetching,
    /// A search result (possibly empty) is stored
    Populated,
    /// New-collection search in flight; the old photos are still stored
    Replacing,
}

/// Result of a successful sync call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to do, the pin already had a collection
    AlreadyPopulated,
    /// This many photos were stored
    Populated(usize),
    /// The search matched nothing; the pin now has an empty collection
    NoPhotosFound,
}

impl SyncOutcome {
    pub fn photo_count(&self) -> Option<usize> {
        match self {
            SyncOutcome::AlreadyPopulated => None,
            SyncOutcome::Populated(count) => Some(*count),
            SyncOutcome::NoPhotosFound => Some(0),
        }
    }
}

/// Page hints used when the pin has no page count from an earlier search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Hint for a pin's first fetch (`None` requests page 1)
    pub first_fetch_page_hint: Option<u32>,
    /// Hint for a new collection
    pub new_collection_page_hint: Option<u32>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            first_fetch_page_hint: None,
            new_collection_page_hint: Some(20),
        }
    }
}

/// Keeps pins' photo collections populated
pub struct CollectionSyncEngine {
    search: Arc<PhotoSearchClient>,
    catalog: Arc<dyn LocationCatalog>,
    settings: SyncSettings,
    /// One queue per pin, dropped once nobody is waiting on it
    pin_locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    /// Pins with a search in flight
    in_flight: Mutex<HashMap<Uuid, CollectionState>>,
}

/// Clears a pin's in-flight marker when the operation ends or is dropped
struct InFlight<'a> {
    engine: &'a CollectionSyncEngine,
    location_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(&self.engine.in_flight).remove(&self.location_id);
    }
}

/// Holds a pin's queue slot and prunes the queue when the last holder leaves
struct PinLease<'a> {
    engine: &'a CollectionSyncEngine,
    location_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PinLease<'_> {
    fn drop(&mut self) {
        let mut locks = lock(&self.engine.pin_locks);
        self.guard.take();
        if locks
            .get(&self.location_id)
            .is_some_and(|queue| Arc::strong_count(queue) == 1)
        {
            locks.remove(&self.location_id);
        }
    }
}

impl CollectionSyncEngine {
    pub fn new(
        search: Arc<PhotoSearchClient>,
        catalog: Arc<dyn LocationCatalog>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            search,
            catalog,
            settings,
            pin_locks: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn LocationCatalog> {
        &self.catalog
    }

    /// Current state of a pin's collection
    pub fn state(&self, location_id: Uuid) -> Result<CollectionState, SyncError> {
        if let Some(state) = lock(&self.in_flight).get(&location_id) {
            return Ok(*state);
        }
        let location = self.load_location(location_id)?;
        if self.has_collection(&location)? {
            Ok(CollectionState::Populated)
        } else {
            Ok(CollectionState::Empty)
        }
    }

    /// Fetches photos for a pin that has never had any.
    ///
    /// Returns `AlreadyPopulated` without touching the network when the pin
    /// already has a stored search result, including an empty one.
    pub async fn ensure_populated(&self, location_id: Uuid) -> Result<SyncOutcome, SyncError> {
        let _queued = self.queue(location_id).await;

        let location = self.load_location(location_id)?;
        if self.has_collection(&location)? {
            debug!("Pin {location_id} already populated, skipping search");
            return Ok(SyncOutcome::AlreadyPopulated);
        }

        let _marker = self.mark(location_id, CollectionState::Fetching);
        let hint = location
            .total_pages
            .or(self.settings.first_fetch_page_hint);
        info!("Fetching photos for pin {location_id}");
        self.search_and_store(&location, hint).await
    }

    /// Replaces a pin's collection with a fresh search result.
    ///
    /// The stored photos are only removed once the search has returned; a
    /// failed search leaves them as they were.
    pub async fn replace_collection(&self, location_id: Uuid) -> Result<SyncOutcome, SyncError> {
        let _queued = self.queue(location_id).await;

        let location = self.load_location(location_id)?;
        let _marker = self.mark(location_id, CollectionState::Replacing);
        let hint = location
            .total_pages
            .or(self.settings.new_collection_page_hint);
        info!("Replacing collection for pin {location_id}");
        self.search_and_store(&location, hint).await
    }

    async fn search_and_store(
        &self,
        location: &Location,
        page_hint: Option<u32>,
    ) -> Result<SyncOutcome, SyncError> {
        let result = self
            .search
            .search(location.latitude, location.longitude, page_hint)
            .await;

        match result {
            Ok(page) => {
                let location_id = location.id;
                let records = run_blocking(&self.catalog, move |c| {
                    c.replace_photos(location_id, &page.photos, page.pages)
                })
                .await?;
                info!("Stored {} photos for pin {}", records.len(), location.id);
                Ok(SyncOutcome::Populated(records.len()))
            }
            Err(SearchError::EmptyResult) => {
                let location_id = location.id;
                run_blocking(&self.catalog, move |c| c.replace_photos(location_id, &[], None))
                    .await?;
                info!("No photos found for pin {}", location.id);
                Ok(SyncOutcome::NoPhotosFound)
            }
            Err(e) => {
                warn!("Search for pin {} failed: {e}", location.id);
                Err(e.into())
            }
        }
    }

    fn load_location(&self, location_id: Uuid) -> Result<Location, SyncError> {
        self.catalog
            .get_location(location_id)?
            .ok_or(SyncError::LocationNotFound(location_id))
    }

    fn has_collection(&self, location: &Location) -> Result<bool, SyncError> {
        Ok(location.is_synced() || self.catalog.photo_count(location.id)? > 0)
    }

    /// Waits for this pin's earlier operations to finish
    async fn queue(&self, location_id: Uuid) -> PinLease<'_> {
        let queue = lock(&self.pin_locks)
            .entry(location_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let mut lease = PinLease {
            engine: self,
            location_id,
            guard: None,
        };
        lease.guard = Some(queue.lock_owned().await);
        lease
    }

    fn mark(&self, location_id: Uuid, state: CollectionState) -> InFlight<'_> {
        lock(&self.in_flight).insert(location_id, state);
        InFlight {
            engine: self,
            location_id,
        }
    }
}
