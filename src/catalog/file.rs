//! File-backed catalog.
//!
//! Layout on disk:
//!
//! ```text
//! data/pinalbum/
//! ├── catalog.yaml           # pins and photo records
//! └── catalog-payloads/
//!     └── <photo-id>.img     # downloaded image bytes
//! ```
//!
//! The YAML index is rewritten through a temporary file and a rename on
//! every mutation, so a crash leaves either the old or the new index.

use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    CatalogEvent, CatalogState, LocationCatalog, Location, LocationSort, PhotoRecord, Result,
    event_channel,
};
use crate::search::PhotoDescriptor;
use crate::util::lock;

/// Catalog persisted to a YAML index plus a payload directory
pub struct FileCatalog {
    index_path: PathBuf,
    payload_dir: PathBuf,
    state: Mutex<CatalogState>,
    events: broadcast::Sender<CatalogEvent>,
}

impl FileCatalog {
    /// Opens the catalog at `index_path`, starting empty if it doesn't exist
    pub fn open(index_path: &Path) -> Result<Self> {
        let state = if index_path.exists() {
            let yaml = fs::read_to_string(index_path)?;
            serde_yaml::from_str(&yaml)?
        } else {
            CatalogState::new()
        };

        let catalog = Self {
            index_path: index_path.to_path_buf(),
            payload_dir: payload_dir_for(index_path),
            state: Mutex::new(state),
            events: event_channel(),
        };
        debug!(
            "Opened catalog at {} ({} pins)",
            index_path.display(),
            lock(&catalog.state).locations.len()
        );
        Ok(catalog)
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn payload_dir(&self) -> &Path {
        &self.payload_dir
    }

    fn payload_path(&self, photo_id: Uuid) -> PathBuf {
        self.payload_dir.join(format!("{photo_id}.img"))
    }

    fn save(&self, state: &CatalogState) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(state)?;
        let tmp_path = self.index_path.with_extension("yaml.tmp");
        fs::write(&tmp_path, yaml)?;
        fs::rename(&tmp_path, &self.index_path)?;
        Ok(())
    }

    fn remove_payloads(&self, photo_ids: &[Uuid]) {
        for id in photo_ids {
            let path = self.payload_path(*id);
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove payload {}: {e}", path.display());
                }
            }
        }
    }

    fn read_payload(&self, photo_id: Uuid) -> Result<Option<Vec<u8>>> {
        let path = self.payload_path(photo_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn notify(&self, event: CatalogEvent) {
        let _ = self.events.send(event);
    }
}

/// `data/catalog.yaml` keeps its payloads in `data/catalog-payloads/`
fn payload_dir_for(index_path: &Path) -> PathBuf {
    let stem = index_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "catalog".to_string());
    index_path.with_file_name(format!("{stem}-payloads"))
}

impl LocationCatalog for FileCatalog {
    fn create_location(&self, latitude: f64, longitude: f64) -> Result<Location> {
        let location = {
            let mut state = lock(&self.state);
            let mut next = state.clone();
            let location = next.create_location(latitude, longitude)?;
            self.save(&next)?;
            *state = next;
            location
        };
        self.notify(CatalogEvent::LocationCreated(location.id));
        Ok(location)
    }

    fn find_location(&self, latitude: f64, longitude: f64) -> Result<Option<Location>> {
        Ok(lock(&self.state).find_location(latitude, longitude).cloned())
    }

    fn get_location(&self, id: Uuid) -> Result<Option<Location>> {
        Ok(lock(&self.state).get_location(id).cloned())
    }

    fn list_locations(&self, sort: LocationSort) -> Result<Vec<Location>> {
        Ok(lock(&self.state).list_locations(sort))
    }

    fn list_photos(&self, location_id: Uuid) -> Result<Vec<PhotoRecord>> {
        Ok(lock(&self.state).list_photos(location_id))
    }

    fn replace_photos(
        &self,
        location_id: Uuid,
        descriptors: &[PhotoDescriptor],
        total_pages: Option<u32>,
    ) -> Result<Vec<PhotoRecord>> {
        let records = {
            let mut state = lock(&self.state);
            let mut next = state.clone();
            let (records, removed) = next.replace_photos(location_id, descriptors, total_pages)?;
            self.save(&next)?;
            *state = next;
            self.remove_payloads(&removed);
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
            let mut state = lock(&self.state);
            let mut next = state.clone();
            let location_id = next.mark_payload(photo_id)?;

            fs::create_dir_all(&self.payload_dir)?;
            let path = self.payload_path(photo_id);
            let tmp_path = path.with_extension("img.tmp");
            fs::write(&tmp_path, bytes)?;
            fs::rename(&tmp_path, &path)?;

            if let Err(e) = self.save(&next) {
                self.remove_payloads(&[photo_id]);
                return Err(e);
            }
            *state = next;
            location_id
        };
        self.notify(CatalogEvent::PayloadAttached {
            location_id,
            photo_id,
        });
        Ok(())
    }

    fn payload(&self, photo_id: Uuid) -> Result<Option<Vec<u8>>> {
        let attached = lock(&self.state)
            .get_photo(photo_id)
            .is_some_and(|p| p.has_payload());
        if !attached {
            return Ok(None);
        }
        self.read_payload(photo_id)
    }

    fn find_payload_by_url(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let photo_id = lock(&self.state).photo_with_payload(url).map(|p| p.id);
        match photo_id {
            Some(id) => Ok(self.read_payload(id)?.filter(|bytes| !bytes.is_empty())),
            None => Ok(None),
        }
    }

    fn find_photo_by_url(&self, url: &str) -> Result<Option<PhotoRecord>> {
        Ok(lock(&self.state).find_photo_by_url(url).cloned())
    }

    fn delete_photo(&self, photo_id: Uuid) -> Result<()> {
        let photo = {
            let mut state = lock(&self.state);
            let mut next = state.clone();
            let photo = next.delete_photo(photo_id)?;
            self.save(&next)?;
            *state = next;
            self.remove_payloads(&[photo_id]);
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
            let mut state = lock(&self.state);
            let mut next = state.clone();
            let removed = next.delete_location(location_id)?;
            self.save(&next)?;
            *state = next;
            self.remove_payloads(&removed);
        }
        self.notify(CatalogEvent::LocationDeleted(location_id));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use tempfile::tempdir;

    fn descriptors(urls: &[&str]) -> Vec<PhotoDescriptor> {
        urls.iter()
            .map(|url| PhotoDescriptor {
                remote_id: None,
                title: Some("Title".to_string()),
                url: url.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_open_nonexistent_starts_empty() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let catalog = FileCatalog::open(&temp_dir.path().join("catalog.yaml"))?;

        assert!(catalog.list_locations(LocationSort::CreatedAt)?.is_empty());
        assert_eq!(
            catalog.payload_dir(),
            temp_dir.path().join("catalog-payloads")
        );
        Ok(())
    }

    #[test]
    fn test_mutations_survive_reopen() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let index_path = temp_dir.path().join("data/catalog.yaml");

        let (location_id, photo_id) = {
            let catalog = FileCatalog::open(&index_path)?;
            let location = catalog.create_location(40.0, -73.0)?;
            let records = catalog.replace_photos(
                location.id,
                &descriptors(&["https://example.com/1.jpg", "https://example.com/2.jpg"]),
                Some(8),
            )?;
            catalog.attach_payload(records[0].id, b"jpeg bytes")?;
            (location.id, records[0].id)
        };

        let reopened = FileCatalog::open(&index_path)?;
        let location = reopened.find_location(40.0, -73.0)?.expect("pin should persist");
        assert_eq!(location.id, location_id);
        assert_eq!(location.total_pages, Some(8));
        assert!(location.is_synced());

        let photos = reopened.list_photos(location_id)?;
        assert_eq!(photos.len(), 2);
        assert!(photos[0].has_payload());
        assert!(!photos[1].has_payload());
        assert_eq!(reopened.payload(photo_id)?, Some(b"jpeg bytes".to_vec()));
        assert_eq!(
            reopened.find_payload_by_url("https://example.com/1.jpg")?,
            Some(b"jpeg bytes".to_vec())
        );
        Ok(())
    }

    #[test]
    fn test_attach_twice_keeps_first_payload() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let catalog = FileCatalog::open(&temp_dir.path().join("catalog.yaml"))?;
        let location = catalog.create_location(1.0, 1.0)?;
        let records =
            catalog.replace_photos(location.id, &descriptors(&["https://example.com/1.jpg"]), None)?;

        catalog.attach_payload(records[0].id, b"first")?;
        let err = catalog.attach_payload(records[0].id, b"second").unwrap_err();
        assert!(matches!(err, CatalogError::AlreadySet(_)));
        assert_eq!(catalog.payload(records[0].id)?, Some(b"first".to_vec()));
        Ok(())
    }

    #[test]
    fn test_replace_and_delete_remove_payload_files() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let catalog = FileCatalog::open(&temp_dir.path().join("catalog.yaml"))?;
        let location = catalog.create_location(1.0, 1.0)?;
        let records =
            catalog.replace_photos(location.id, &descriptors(&["https://example.com/1.jpg"]), None)?;
        catalog.attach_payload(records[0].id, b"old")?;
        let old_payload = catalog.payload_dir().join(format!("{}.img", records[0].id));
        assert!(old_payload.exists());

        let fresh =
            catalog.replace_photos(location.id, &descriptors(&["https://example.com/2.jpg"]), None)?;
        assert!(!old_payload.exists());
        catalog.attach_payload(fresh[0].id, b"new")?;

        catalog.delete_location(location.id)?;
        assert!(catalog.list_photos(location.id)?.is_empty());
        assert!(!catalog.payload_dir().join(format!("{}.img", fresh[0].id)).exists());
        Ok(())
    }

    #[test]
    fn test_empty_payload_file_is_a_miss() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let catalog = FileCatalog::open(&temp_dir.path().join("catalog.yaml"))?;
        let location = catalog.create_location(1.0, 1.0)?;
        let records =
            catalog.replace_photos(location.id, &descriptors(&["https://example.com/e.jpg"]), None)?;

        catalog.attach_payload(records[0].id, b"")?;
        assert_eq!(catalog.find_payload_by_url("https://example.com/e.jpg")?, None);
        Ok(())
    }

    #[test]
    fn test_failed_validation_writes_nothing() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let index_path = temp_dir.path().join("catalog.yaml");
        let catalog = FileCatalog::open(&index_path)?;

        assert!(catalog.create_location(0.0, 500.0).is_err());
        assert!(!index_path.exists());
        Ok(())
    }
}
