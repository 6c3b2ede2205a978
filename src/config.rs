use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::search::{DEFAULT_API_URL, DEFAULT_PER_PAGE, SearchSettings};
use crate::sync::SyncSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Photo search API key
    pub api_key: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// YAML index of pins and photos; payloads live beside it
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_bbox_half")]
    pub bbox_half_width: f64,
    #[serde(default = "default_bbox_half")]
    pub bbox_half_height: f64,
    /// Page hint for a pin's first fetch; unset requests page 1
    #[serde(default)]
    pub first_fetch_page_hint: Option<u32>,
    /// Page hint for a new collection when a pin has no page count yet
    #[serde(default = "default_new_collection_page_hint")]
    pub new_collection_page_hint: Option<u32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_catalog_file() -> String {
    "data/pinalbum/catalog.yaml".to_string()
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

fn default_bbox_half() -> f64 {
    1.0
}

fn default_new_collection_page_hint() -> Option<u32> {
    Some(20)
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_download_concurrency() -> usize {
    8
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: "YOUR_FLICKR_API_KEY".to_string(),
            api_url: default_api_url(),
            catalog_file: default_catalog_file(),
            per_page: default_per_page(),
            bbox_half_width: default_bbox_half(),
            bbox_half_height: default_bbox_half(),
            first_fetch_page_hint: None,
            new_collection_page_hint: default_new_collection_page_hint(),
            request_timeout_secs: default_request_timeout_secs(),
            download_concurrency: default_download_concurrency(),
        }
    }
}

impl Config {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn get_config_path(config_arg: &Option<PathBuf>) -> PathBuf {
        config_arg
            .clone()
            .unwrap_or_else(|| PathBuf::from("config.yaml"))
    }

    /// Rejects values the search client can't work with
    pub fn validate(&self) -> Result<()> {
        let api_url = Url::parse(&self.api_url)
            .with_context(|| format!("Invalid api_url: {}", self.api_url))?;
        if !matches!(api_url.scheme(), "http" | "https") {
            anyhow::bail!("api_url must be http or https, got {}", api_url.scheme());
        }
        if self.per_page == 0 {
            anyhow::bail!("per_page must be at least 1");
        }
        if !(self.bbox_half_width > 0.0 && self.bbox_half_height > 0.0) {
            anyhow::bail!("bbox_half_width and bbox_half_height must be positive");
        }
        if self.download_concurrency == 0 {
            anyhow::bail!("download_concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            per_page: self.per_page,
            bbox_half_width: self.bbox_half_width,
            bbox_half_height: self.bbox_half_height,
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            first_fetch_page_hint: self.first_fetch_page_hint,
            new_collection_page_hint: self.new_collection_page_hint,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
