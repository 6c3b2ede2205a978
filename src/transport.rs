//! HTTP transport used by the search client and the image store.
//!
//! The core only needs two operations: a GET with query parameters that
//! returns the status and body, and a GET that returns image bytes. Keeping
//! them behind a trait lets tests swap in scripted fakes (see `mock`).

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use std::time::Duration;

use crate::error::TransportError;

/// Status code and body of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal HTTP interface the core depends on
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `url` with `query` appended; any status is returned as-is
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<HttpResponse, TransportError>;

    /// GET `url` and return the body, treating non-2xx as an error
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// [`HttpTransport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::with_client(Client::new())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        debug!("GET {url} ({} query parameters)", query.len());
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
