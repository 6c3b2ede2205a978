//! Photo search against a Flickr-style REST API.
//!
//! `PhotoSearchClient` turns a pin into one search request: it builds a
//! bounding box around the point, picks a page (randomly when the caller
//! knows how many pages exist, so "new collection" shows different photos),
//! and parses the nested `photos.photo` list into `PhotoDescriptor`s.
//!
//! The client is stateless apart from its random number generator.

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{SearchError, TransportError};
use crate::geo::{BoundingBox, Coordinate};
use crate::transport::HttpTransport;
use crate::util::lock;

/// Default API endpoint
pub const DEFAULT_API_URL: &str = "https://api.flickr.com/services/rest";
/// One page of results; also the most photos a pin keeps
pub const DEFAULT_PER_PAGE: u32 = 21;
/// The API never returns results past this many photos
pub const MAX_RESULTS: u32 = 4000;

const SEARCH_METHOD: &str = "flickr.photos.search";
const RESPONSE_FORMAT: &str = "json";
const DISPLAY_URL_EXTRA: &str = "url_m";

/// Settings for a [`PhotoSearchClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub api_url: String,
    pub api_key: String,
    pub per_page: u32,
    /// Latitude expansion in degrees on each side of the pin
    pub bbox_half_width: f64,
    /// Longitude expansion in degrees on each side of the pin
    pub bbox_half_height: f64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            per_page: DEFAULT_PER_PAGE,
            bbox_half_width: 1.0,
            bbox_half_height: 1.0,
        }
    }
}

/// One photo returned by a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoDescriptor {
    /// Remote photo id, if the API sent one
    pub remote_id: Option<String>,
    pub title: Option<String>,
    /// Display-size image URL
    pub url: String,
}

/// The photos of one search page, in API order
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    /// Page that was requested
    pub page: u32,
    /// Total pages the API reported, if any
    pub pages: Option<u32>,
    pub photos: Vec<PhotoDescriptor>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    photos: Option<PhotosEnvelope>,
    stat: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhotosEnvelope {
    pages: Option<u32>,
    photo: Option<Vec<RawPhoto>>,
}

#[derive(Debug, Deserialize)]
struct RawPhoto {
    id: Option<String>,
    title: Option<String>,
    url_m: Option<String>,
}

/// Searches for photos around a coordinate
pub struct PhotoSearchClient {
    transport: Arc<dyn HttpTransport>,
    settings: SearchSettings,
    rng: Mutex<StdRng>,
}

impl PhotoSearchClient {
    /// Creates a client with an entropy-seeded page picker
    pub fn new(transport: Arc<dyn HttpTransport>, settings: SearchSettings) -> Self {
        Self {
            transport,
            settings,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates a client whose page picks are reproducible
    pub fn with_seed(transport: Arc<dyn HttpTransport>, settings: SearchSettings, seed: u64) -> Self {
        Self {
            transport,
            settings,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Highest page the API will serve for the configured page size
    pub fn max_page(&self) -> u32 {
        (MAX_RESULTS / self.settings.per_page.max(1)).max(1)
    }

    /// Picks the page to request.
    ///
    /// With a hint the page is uniform in `1..=min(hint, max_page)`,
    /// otherwise it is always 1.
    pub fn choose_page(&self, page_hint: Option<u32>) -> u32 {
        match page_hint {
            Some(hint) => {
                let upper = hint.clamp(1, self.max_page());
                lock(&self.rng).gen_range(1..=upper)
            }
            None => 1,
        }
    }

    /// Builds the query parameters for one search request
    pub fn query_for(&self, bbox: &BoundingBox, page: u32) -> Vec<(String, String)> {
        vec![
            ("method".to_string(), SEARCH_METHOD.to_string()),
            ("api_key".to_string(), self.settings.api_key.clone()),
            ("format".to_string(), RESPONSE_FORMAT.to_string()),
            ("extras".to_string(), DISPLAY_URL_EXTRA.to_string()),
            ("nojsoncallback".to_string(), "1".to_string()),
            ("safe_search".to_string(), "1".to_string()),
            ("bbox".to_string(), bbox.to_query_value()),
            ("per_page".to_string(), self.settings.per_page.to_string()),
            ("page".to_string(), page.to_string()),
        ]
    }

    /// Searches for photos around `(latitude, longitude)`
    pub async fn search(
        &self,
        latitude: f64,
        longitude: f64,
        page_hint: Option<u32>,
    ) -> Result<SearchPage, SearchError> {
        let center = Coordinate::new(latitude, longitude).map_err(SearchError::Validation)?;
        let bbox = BoundingBox::around(
            center,
            self.settings.bbox_half_width,
            self.settings.bbox_half_height,
        );
        let page = self.choose_page(page_hint);

        info!("Searching photos near {center} (bbox {bbox}, page {page})");
        let query = self.query_for(&bbox, page);
        let response = self.transport.get(&self.settings.api_url, &query).await?;

        if !response.is_success() {
            warn!("Photo search returned status {}", response.status);
            return Err(SearchError::Network(TransportError::Status(
                response.status,
            )));
        }

        let page = parse_search_body(&response.body, page, self.settings.per_page)?;
        debug!(
            "Search page {} of {:?} yielded {} photos",
            page.page,
            page.pages,
            page.photos.len()
        );
        Ok(page)
    }
}

/// Parses a search body into a page of unique, displayable photos.
///
/// Entries without a display URL are skipped, repeated URLs keep their first
/// occurrence, and the list is cut at `per_page`.
pub fn parse_search_body(body: &[u8], page: u32, per_page: u32) -> Result<SearchPage, SearchError> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| SearchError::Parse(format!("body is not valid JSON: {e}")))?;

    let envelope = response.photos.ok_or_else(|| {
        let detail = match (response.stat, response.message) {
            (Some(stat), Some(message)) => format!("missing photos field (stat={stat}: {message})"),
            _ => "missing photos field".to_string(),
        };
        SearchError::Parse(detail)
    })?;

    let raw_photos = envelope
        .photo
        .ok_or_else(|| SearchError::Parse("missing photos.photo list".to_string()))?;

    if raw_photos.is_empty() {
        return Err(SearchError::EmptyResult);
    }

    let mut seen = HashSet::new();
    let photos: Vec<PhotoDescriptor> = raw_photos
        .into_iter()
        .filter_map(|raw| {
            let url = raw.url_m.filter(|u| !u.is_empty())?;
            if !seen.insert(url.clone()) {
                return None;
            }
            Some(PhotoDescriptor {
                remote_id: raw.id,
                title: raw.title.filter(|t| !t.is_empty()),
                url,
            })
        })
        .take(per_page as usize)
        .collect();

    if photos.is_empty() {
        warn!("Search returned entries but none had a display URL");
        return Err(SearchError::EmptyResult);
    }

    Ok(SearchPage {
        page,
        pages: envelope.pages,
        photos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockTransport, search_body};

    fn client_with(transport: Arc<MockTransport>) -> PhotoSearchClient {
        PhotoSearchClient::with_seed(transport, SearchSettings::default(), 7)
    }

    #[test]
    fn test_parse_three_photos() {
        let body = search_body(&[
            "https://example.com/1.jpg",
            "https://example.com/2.jpg",
            "https://example.com/3.jpg",
        ]);
        let page = parse_search_body(body.as_bytes(), 1, 21).unwrap();
        assert_eq!(page.photos.len(), 3);
        assert_eq!(page.photos[0].url, "https://example.com/1.jpg");
        assert_eq!(page.pages, Some(10));
    }

    #[test]
    fn test_parse_empty_list() {
        let body = search_body(&[]);
        let err = parse_search_body(body.as_bytes(), 1, 21).unwrap_err();
        assert_eq!(err, SearchError::EmptyResult);
    }

    #[test]
    fn test_parse_malformed_body() {
        let err = parse_search_body(b"<html>oops</html>", 1, 21).unwrap_err();
        assert!(matches!(err, SearchError::Parse(_)));

        let err = parse_search_body(b"{\"stat\":\"fail\",\"message\":\"Invalid API Key\"}", 1, 21)
            .unwrap_err();
        match err {
            SearchError::Parse(detail) => assert!(detail.contains("Invalid API Key")),
            other => panic!("expected parse error, got {other:?}"),
        }

        let err = parse_search_body(b"{\"photos\":{\"pages\":1}}", 1, 21).unwrap_err();
        assert!(matches!(err, SearchError::Parse(_)));
    }

    #[test]
    fn test_parse_dedupes_and_truncates() {
        let body = r#"{"photos":{"page":1,"pages":2,"photo":[
            {"id":"1","title":"a","url_m":"https://example.com/a.jpg"},
            {"id":"2","title":"","url_m":"https://example.com/a.jpg"},
            {"id":"3","title":"no url"},
            {"id":"4","title":"b","url_m":"https://example.com/b.jpg"},
            {"id":"5","title":"c","url_m":"https://example.com/c.jpg"}
        ]},"stat":"ok"}"#;
        let page = parse_search_body(body.as_bytes(), 1, 2).unwrap();
        let urls: Vec<_> = page.photos.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/a.jpg", "https://example.com/b.jpg"]);
        assert_eq!(page.photos[0].remote_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_choose_page_bounds() {
        let client = client_with(Arc::new(MockTransport::new()));
        assert_eq!(client.choose_page(None), 1);
        assert_eq!(client.choose_page(Some(0)), 1);
        assert_eq!(client.choose_page(Some(1)), 1);
        assert_eq!(client.max_page(), 190);

        for _ in 0..200 {
            let page = client.choose_page(Some(5));
            assert!((1..=5).contains(&page));
        }
        for _ in 0..200 {
            let page = client.choose_page(Some(10_000));
            assert!((1..=190).contains(&page));
        }
    }

    #[tokio::test]
    async fn test_search_sends_expected_query() {
        let transport = Arc::new(MockTransport::new());
        transport.push_search_ok(search_body(&["https://example.com/1.jpg"]));
        let client = client_with(transport.clone());

        let page = client.search(40.0, -73.0, None).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.photos.len(), 1);

        let requests = transport.search_requests();
        assert_eq!(requests.len(), 1);
        let query = &requests[0];
        let get = |key: &str| {
            query
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("method"), "flickr.photos.search");
        assert_eq!(get("bbox"), "-74,39,-72,41");
        assert_eq!(get("page"), "1");
        assert_eq!(get("per_page"), "21");
        assert_eq!(get("extras"), "url_m");
        assert_eq!(get("safe_search"), "1");
    }

    #[tokio::test]
    async fn test_search_rejects_bad_coordinates_without_io() {
        let transport = Arc::new(MockTransport::new());
        let client = client_with(transport.clone());

        let err = client.search(120.0, 0.0, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Validation(_)));
        assert!(transport.search_requests().is_empty());
    }

    #[tokio::test]
    async fn test_search_maps_transport_failures() {
        let transport = Arc::new(MockTransport::new());
        transport.push_search_status(500, "");
        transport.push_search_err(TransportError::Request("timed out".to_string()));
        let client = client_with(transport);

        let err = client.search(10.0, 10.0, None).await.unwrap_err();
        assert_eq!(err, SearchError::Network(TransportError::Status(500)));

        let err = client.search(10.0, 10.0, None).await.unwrap_err();
        assert!(matches!(err, SearchError::Network(TransportError::Request(_))));
    }
}
