//! Collaborators that bring page content and API responses to strategies
//!
//! Both traits report failure as `None`: timeouts, retries and backoff are
//! the implementation's business, not the caller's.

pub mod document;
pub mod http;

#[cfg(test)]
use mockall::automock;

pub use document::{Document, Link};
pub use http::HttpClient;

/// Status and decoded JSON body of an API call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// `Null` when the body was empty or not JSON
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches web pages, either as served or after script execution
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch the page as served by the origin
    async fn fetch_static(&self, url: &str) -> Option<Document>;

    /// Fetch the page after client-side rendering
    async fn fetch_rendered(&self, url: &str) -> Option<Document>;
}

/// Calls JSON APIs
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ApiClient: Send + Sync {
    /// Returns `None` only when no response could be obtained at all;
    /// non-2xx responses are returned with their status.
    async fn request_json(&self, url: &str, headers: &[(String, String)]) -> Option<ApiResponse>;
}
