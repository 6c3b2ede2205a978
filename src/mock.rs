//! Scripted stand-ins for the network, for tests and offline runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::{HttpResponse, HttpTransport};
use crate::util::lock;

/// Builds a search response body listing `urls` as `url_m` entries
pub fn search_body(urls: &[&str]) -> String {
    let photos: Vec<serde_json::Value> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            serde_json::json!({
                "id": format!("{}", 1000 + i),
                "title": format!("Mock Photo {}", i + 1),
                "url_m": url,
            })
        })
        .collect();

    serde_json::json!({
        "photos": {
            "page": 1,
            "pages": 10,
            "perpage": 21,
            "total": "210",
            "photo": photos,
        },
        "stat": "ok",
    })
    .to_string()
}

/// A transport that replays queued responses and records what was asked.
///
/// Search responses are consumed in order regardless of URL. Byte downloads
/// are scripted per URL; an unscripted URL answers 404.
#[derive(Default)]
pub struct MockTransport {
    searches: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    search_log: Mutex<Vec<Vec<(String, String)>>>,
    downloads: Mutex<HashMap<String, VecDeque<Result<Vec<u8>, TransportError>>>>,
    download_log: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every request wait before answering
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn push_search_ok(&self, body: String) {
        self.push_search_status(200, &body);
    }

    pub fn push_search_status(&self, status: u16, body: &str) {
        lock(&self.searches).push_back(Ok(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        }));
    }

    pub fn push_search_err(&self, err: TransportError) {
        lock(&self.searches).push_back(Err(err));
    }

    pub fn push_download(&self, url: &str, result: Result<Vec<u8>, TransportError>) {
        lock(&self.downloads)
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    /// Query parameters of every search request, oldest first
    pub fn search_requests(&self) -> Vec<Vec<(String, String)>> {
        lock(&self.search_log).clone()
    }

    /// How many times `url` was downloaded
    pub fn download_count(&self, url: &str) -> usize {
        lock(&self.download_log)
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    async fn wait(&self) {
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(
        &self,
        _url: &str,
        query: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        lock(&self.search_log).push(query.to_vec());
        self.wait().await;
        lock(&self.searches)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no scripted response".to_string())))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        lock(&self.download_log).push(url.to_string());
        self.wait().await;
        lock(&self.downloads)
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Err(TransportError::Status(404)))
    }
}
