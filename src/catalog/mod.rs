//! Durable registry of pins and their photos.
//!
//! The [`LocationCatalog`] trait is the only way the rest of the crate
//! touches stored data. It returns plain values and reports every change on a
//! broadcast channel, so a UI can refresh without knowing how the data is
//! stored.
//!
//! ## Implementations
//!
//! - [`FileCatalog`]: YAML index plus one file per downloaded payload
//! - [`MemoryCatalog`]: nothing persisted, for tests and throwaway sessions
//!
//! Both keep their data in a [`CatalogState`] behind a mutex; the state type
//! owns all of the bookkeeping rules (cascade deletes, write-once payloads,
//! replace-not-append) so the two backends only differ in how they persist.
//!
//! Every mutating call has finished its durable write when it returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::CatalogError;
use crate::geo::Coordinate;
use crate::search::PhotoDescriptor;

pub mod file;
pub mod memory;

pub use file::FileCatalog;
pub use memory::MemoryCatalog;

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Capacity of the change-notification channel
const EVENT_CAPACITY: usize = 256;

/// A saved pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    /// When a search result (possibly empty) was last committed
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    /// Page count reported by the last search
    #[serde(default)]
    pub total_pages: Option<u32>,
}

impl Location {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Whether a search result has ever been stored for this pin
    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }
}

/// One photo belonging to a pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: Uuid,
    pub location_id: Uuid,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set once the image bytes have been stored
    #[serde(default)]
    pub payload_attached_at: Option<DateTime<Utc>>,
}

impl PhotoRecord {
    pub fn has_payload(&self) -> bool {
        self.payload_attached_at.is_some()
    }
}

/// Ordering for [`LocationCatalog::list_locations`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationSort {
    #[default]
    CreatedAt,
    Latitude,
    Longitude,
}

impl FromStr for LocationSort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" | "created_at" | "date" => Ok(LocationSort::CreatedAt),
            "lat" | "latitude" => Ok(LocationSort::Latitude),
            "lon" | "long" | "longitude" => Ok(LocationSort::Longitude),
            other => Err(format!("unknown sort key '{other}' (expected created, lat or lon)")),
        }
    }
}

/// A change that has been committed to the catalog
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    LocationCreated(Uuid),
    LocationDeleted(Uuid),
    PhotosReplaced { location_id: Uuid, count: usize },
    PayloadAttached { location_id: Uuid, photo_id: Uuid },
    PhotoDeleted { location_id: Uuid, photo_id: Uuid },
}

/// Repository interface over pins and photos
pub trait LocationCatalog: Send + Sync {
    /// Stores a new pin; fails with `Validation` for out-of-range coordinates
    fn create_location(&self, latitude: f64, longitude: f64) -> Result<Location>;

    /// Finds a pin within `COORDINATE_EPSILON` of the coordinate
    fn find_location(&self, latitude: f64, longitude: f64) -> Result<Option<Location>>;

    fn get_location(&self, id: Uuid) -> Result<Option<Location>>;

    fn list_locations(&self, sort: LocationSort) -> Result<Vec<Location>>;

    /// Photos of a pin in insertion order; empty for unknown pins
    fn list_photos(&self, location_id: Uuid) -> Result<Vec<PhotoRecord>>;

    fn photo_count(&self, location_id: Uuid) -> Result<usize> {
        Ok(self.list_photos(location_id)?.len())
    }

    /// Swaps a pin's whole collection for one record per descriptor
    fn replace_photos(
        &self,
        location_id: Uuid,
        descriptors: &[PhotoDescriptor],
        total_pages: Option<u32>,
    ) -> Result<Vec<PhotoRecord>>;

    /// Stores image bytes for a photo; fails with `AlreadySet` the second time
    fn attach_payload(&self, photo_id: Uuid, bytes: &[u8]) -> Result<()>;

    fn payload(&self, photo_id: Uuid) -> Result<Option<Vec<u8>>>;

    /// Stored bytes of any photo with this URL; an empty payload is a miss
    fn find_payload_by_url(&self, url: &str) -> Result<Option<Vec<u8>>>;

    /// A photo with this URL, preferring one that still lacks a payload
    fn find_photo_by_url(&self, url: &str) -> Result<Option<PhotoRecord>>;

    fn delete_photo(&self, photo_id: Uuid) -> Result<()>;

    /// Removes a pin together with all of its photos
    fn delete_location(&self, location_id: Uuid) -> Result<()>;

    /// Receives every committed change from now on
    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent>;
}

/// In-memory bookkeeping shared by every catalog backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogState {
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default)]
    pub photos: Vec<PhotoRecord>,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogState {
    pub fn new() -> Self {
        Self {
            last_updated: Utc::now(),
            locations: Vec::new(),
            photos: Vec::new(),
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn create_location(&mut self, latitude: f64, longitude: f64) -> Result<Location> {
        let coordinate = Coordinate::new(latitude, longitude).map_err(CatalogError::Validation)?;
        let location = Location {
            id: Uuid::new_v4(),
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            created_at: Utc::now(),
            synced_at: None,
            total_pages: None,
        };
        self.locations.push(location.clone());
        self.touch();
        Ok(location)
    }

    pub fn find_location(&self, latitude: f64, longitude: f64) -> Option<&Location> {
        let target = Coordinate {
            latitude,
            longitude,
        };
        self.locations
            .iter()
            .find(|l| l.coordinate().approx_eq(&target))
    }

    pub fn get_location(&self, id: Uuid) -> Option<&Location> {
        self.locations.iter().find(|l| l.id == id)
    }

    pub fn list_locations(&self, sort: LocationSort) -> Vec<Location> {
        let mut locations = self.locations.clone();
        match sort {
            LocationSort::CreatedAt => locations.sort_by_key(|l| l.created_at),
            LocationSort::Latitude => locations.sort_by(|a, b| a.latitude.total_cmp(&b.latitude)),
            LocationSort::Longitude => {
                locations.sort_by(|a, b| a.longitude.total_cmp(&b.longitude))
            }
        }
        locations
    }

    pub fn list_photos(&self, location_id: Uuid) -> Vec<PhotoRecord> {
        self.photos
            .iter()
            .filter(|p| p.location_id == location_id)
            .cloned()
            .collect()
    }

    pub fn get_photo(&self, photo_id: Uuid) -> Option<&PhotoRecord> {
        self.photos.iter().find(|p| p.id == photo_id)
    }

    /// Replaces a pin's photos, returning the new records and the ids removed
    pub fn replace_photos(
        &mut self,
        location_id: Uuid,
        descriptors: &[PhotoDescriptor],
        total_pages: Option<u32>,
    ) -> Result<(Vec<PhotoRecord>, Vec<Uuid>)> {
        let now = Utc::now();
        let location = self
            .locations
            .iter_mut()
            .find(|l| l.id == location_id)
            .ok_or(CatalogError::LocationNotFound(location_id))?;
        location.synced_at = Some(now);
        if total_pages.is_some() {
            location.total_pages = total_pages;
        }

        let removed: Vec<Uuid> = self
            .photos
            .iter()
            .filter(|p| p.location_id == location_id)
            .map(|p| p.id)
            .collect();
        self.photos.retain(|p| p.location_id != location_id);

        let records: Vec<PhotoRecord> = descriptors
            .iter()
            .map(|d| PhotoRecord {
                id: Uuid::new_v4(),
                location_id,
                url: d.url.clone(),
                title: d.title.clone(),
                created_at: now,
                payload_attached_at: None,
            })
            .collect();
        self.photos.extend(records.iter().cloned());
        self.touch();

        Ok((records, removed))
    }

    /// Checks that a payload may be attached, without changing anything
    pub fn check_attachable(&self, photo_id: Uuid) -> Result<&PhotoRecord> {
        let photo = self
            .get_photo(photo_id)
            .ok_or(CatalogError::PhotoNotFound(photo_id))?;
        if photo.has_payload() {
            return Err(CatalogError::AlreadySet(photo_id));
        }
        Ok(photo)
    }

    /// Records that a payload is attached, returning the owning pin
    pub fn mark_payload(&mut self, photo_id: Uuid) -> Result<Uuid> {
        self.check_attachable(photo_id)?;
        let photo = self
            .photos
            .iter_mut()
            .find(|p| p.id == photo_id)
            .ok_or(CatalogError::PhotoNotFound(photo_id))?;
        photo.payload_attached_at = Some(Utc::now());
        let location_id = photo.location_id;
        self.touch();
        Ok(location_id)
    }

    /// First photo with this URL that already has its payload
    pub fn photo_with_payload(&self, url: &str) -> Option<&PhotoRecord> {
        self.photos.iter().find(|p| p.url == url && p.has_payload())
    }

    pub fn find_photo_by_url(&self, url: &str) -> Option<&PhotoRecord> {
        self.photos
            .iter()
            .find(|p| p.url == url && !p.has_payload())
            .or_else(|| self.photos.iter().find(|p| p.url == url))
    }

    /// Removes one photo, returning it
    pub fn delete_photo(&mut self, photo_id: Uuid) -> Result<PhotoRecord> {
        let position = self
            .photos
            .iter()
            .position(|p| p.id == photo_id)
            .ok_or(CatalogError::PhotoNotFound(photo_id))?;
        let photo = self.photos.remove(position);
        self.touch();
        Ok(photo)
    }

    /// Removes a pin and its photos, returning the removed photo ids
    pub fn delete_location(&mut self, location_id: Uuid) -> Result<Vec<Uuid>> {
        let position = self
            .locations
            .iter()
            .position(|l| l.id == location_id)
            .ok_or(CatalogError::LocationNotFound(location_id))?;
        self.locations.remove(position);

        let removed: Vec<Uuid> = self
            .photos
            .iter()
            .filter(|p| p.location_id == location_id)
            .map(|p| p.id)
            .collect();
        self.photos.retain(|p| p.location_id != location_id);
        self.touch();
        Ok(removed)
    }
}

/// Runs a catalog call on tokio's blocking pool.
///
/// Async callers go through here so index rewrites and payload file I/O
/// stay off the runtime's worker threads.
pub async fn run_blocking<T, F>(catalog: &Arc<dyn LocationCatalog>, call: F) -> Result<T>
where
    F: FnOnce(&dyn LocationCatalog) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let catalog = Arc::clone(catalog);
    tokio::task::spawn_blocking(move || call(catalog.as_ref()))
        .await
        .map_err(|e| CatalogError::Io(std::io::Error::other(e)))?
}

pub(crate) fn event_channel() -> broadcast::Sender<CatalogEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(url: &str) -> PhotoDescriptor {
        PhotoDescriptor {
            remote_id: None,
            title: Some(format!("Title for {url}")),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_create_and_find_location() {
        let mut state = CatalogState::new();
        let created = state.create_location(41.8781, -87.6298).unwrap();

        let found = state.find_location(41.8781, -87.6298).unwrap();
        assert_eq!(found.id, created.id);
        assert!(state.find_location(41.9, -87.6298).is_none());
    }

    #[test]
    fn test_create_location_validates() {
        let mut state = CatalogState::new();
        let err = state.create_location(95.0, 0.0).unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert!(state.locations.is_empty());
    }

    #[test]
    fn test_replace_photos_replaces() {
        let mut state = CatalogState::new();
        let location = state.create_location(10.0, 10.0).unwrap();
        let other = state.create_location(20.0, 20.0).unwrap();
        state
            .replace_photos(other.id, &[descriptor("https://example.com/o.jpg")], None)
            .unwrap();

        let (first, removed) = state
            .replace_photos(
                location.id,
                &[descriptor("https://example.com/1.jpg"), descriptor("https://example.com/2.jpg")],
                Some(12),
            )
            .unwrap();
        assert_eq!(first.len(), 2);
        assert!(removed.is_empty());

        let (second, removed) = state
            .replace_photos(location.id, &[descriptor("https://example.com/3.jpg")], None)
            .unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(second.len(), 1);

        let photos = state.list_photos(location.id);
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].url, "https://example.com/3.jpg");
        assert_eq!(state.list_photos(other.id).len(), 1);

        let stored = state.get_location(location.id).unwrap();
        assert!(stored.is_synced());
        assert_eq!(stored.total_pages, Some(12));
    }

    #[test]
    fn test_replace_photos_unknown_location() {
        let mut state = CatalogState::new();
        let err = state
            .replace_photos(Uuid::new_v4(), &[descriptor("https://example.com/1.jpg")], None)
            .unwrap_err();
        assert!(matches!(err, CatalogError::LocationNotFound(_)));
        assert!(state.photos.is_empty());
    }

    #[test]
    fn test_mark_payload_is_write_once() {
        let mut state = CatalogState::new();
        let location = state.create_location(10.0, 10.0).unwrap();
        let (records, _) = state
            .replace_photos(location.id, &[descriptor("https://example.com/1.jpg")], None)
            .unwrap();
        let photo_id = records[0].id;

        assert_eq!(state.mark_payload(photo_id).unwrap(), location.id);
        let err = state.mark_payload(photo_id).unwrap_err();
        assert!(matches!(err, CatalogError::AlreadySet(_)));
    }

    #[test]
    fn test_delete_location_cascades() {
        let mut state = CatalogState::new();
        let location = state.create_location(10.0, 10.0).unwrap();
        state
            .replace_photos(
                location.id,
                &[descriptor("https://example.com/1.jpg"), descriptor("https://example.com/2.jpg")],
                None,
            )
            .unwrap();

        let removed = state.delete_location(location.id).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(state.list_photos(location.id).is_empty());
        assert!(state.get_location(location.id).is_none());
    }

    #[test]
    fn test_list_locations_sorting() {
        let mut state = CatalogState::new();
        state.create_location(30.0, -10.0).unwrap();
        state.create_location(-5.0, 50.0).unwrap();
        state.create_location(10.0, 0.0).unwrap();

        let by_lat: Vec<f64> = state
            .list_locations(LocationSort::Latitude)
            .iter()
            .map(|l| l.latitude)
            .collect();
        assert_eq!(by_lat, vec![-5.0, 10.0, 30.0]);

        let by_lon: Vec<f64> = state
            .list_locations(LocationSort::Longitude)
            .iter()
            .map(|l| l.longitude)
            .collect();
        assert_eq!(by_lon, vec![-10.0, 0.0, 50.0]);
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!("lat".parse::<LocationSort>().unwrap(), LocationSort::Latitude);
        assert_eq!("Created".parse::<LocationSort>().unwrap(), LocationSort::CreatedAt);
        assert!("color".parse::<LocationSort>().is_err());
    }
}
