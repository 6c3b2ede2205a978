use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    CatalogEvent, CatalogState, LocationCatalog, Location, LocationSort, PhotoRecord, Result,
    event_channel,
};
use crate::search::PhotoDescriptor;
use crate::util::lock;

#[derive(Default)]
struct Inner {
    state: CatalogState,
    payloads: HashMap<Uuid, Vec<u8>>,
}

/// Catalog that keeps everything in memory
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
    events: broadcast::Sender<CatalogEvent>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events: event_channel(),
        }
    }

    fn notify(&self, event: CatalogEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationCatalog for MemoryCatalog {
    fn create_location(&self, latitude: f64, longitude: f64) -> Result<Location> {
        let location = lock(&self.inner).state.create_location(latitude, longitude)?;
        self.notify(CatalogEvent::LocationCreated(location.id));
        Ok(location)
    }

    fn find_location(&self, latitude: f64, longitude: f64) -> Result<Option<Location>> {
        Ok(lock(&self.inner)
            .state
            .find_location(latitude, longitude)
            .cloned())
    }

    fn get_location(&self, id: Uuid) -> Result<Option<Location>> {
        Ok(lock(&self.inner).state.get_location(id).cloned())
    }

    fn list_locations(&self, sort: LocationSort) -> Result<Vec<Location>> {
        Ok(lock(&self.inner).state.list_locations(sort))
    }

    fn list_photos(&self, location_id: Uuid) -> Result<Vec<PhotoRecord>> {
        Ok(lock(&self.inner).state.list_photos(location_id))
    }

    fn replace_photos(
        &self,
        location_id: Uuid,
        descriptors: &[PhotoDescriptor],
        total_pages: Option<u32>,
    ) -> Result<Vec<PhotoRecord>> {
        let records = {
            let mut inner = lock(&self.inner);
            let (records, removed) =
                inner
                    .state
                    .replace_photos(location_id, descriptors, total_pages)?;
            for id in removed {
                inner.payloads.remove(&id);
            }
            records
        };
        self.notify(CatalogEvent::PhotosReplaced {
            location_id,
            count: records.len(),
        });
        Ok(records)
    }

    fn attach_payload(&self, photo_id: Uuid, bytes: &[u8]) -> Result<()> {
        let location_id = {
            let mut inner = lock(&self.inner);
            let location_id = inner.state.mark_payload(photo_id)?;
            inner.payloads.insert(photo_id, bytes.to_vec());
            location_id
        };
        self.notify(CatalogEvent::PayloadAttached {
            location_id,
            photo_id,
        });
        Ok(())
    }

    fn payload(&self, photo_id: Uuid) -> Result<Option<Vec<u8>>> {
        Ok(lock(&self.inner).payloads.get(&photo_id).cloned())
    }

    fn find_payload_by_url(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let inner = lock(&self.inner);
        Ok(inner
            .state
            .photo_with_payload(url)
            .and_then(|photo| inner.payloads.get(&photo.id).cloned())
            .filter(|bytes| !bytes.is_empty()))
    }

    fn find_photo_by_url(&self, url: &str) -> Result<Option<PhotoRecord>> {
        Ok(lock(&self.inner).state.find_photo_by_url(url).cloned())
    }

    fn delete_photo(&self, photo_id: Uuid) -> Result<()> {
        let photo = {
            let mut inner = lock(&self.inner);
            let photo = inner.state.delete_photo(photo_id)?;
            inner.payloads.remove(&photo_id);
            photo
        };
        self.notify(CatalogEvent::PhotoDeleted {
            location_id: photo.location_id,
            photo_id,
        });
        Ok(())
    }

    fn delete_location(&self, location_id: Uuid) -> Result<()> {
        {
            let mut inner = lock(&self.inner);
            let removed = inner.state.delete_location(location_id)?;
            for id in removed {
                inner.payloads.remove(&id);
            }
        }
        self.notify(CatalogEvent::LocationDeleted(location_id));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }
}
