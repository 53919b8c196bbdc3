//! reqwest-backed implementation of both fetch collaborators

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::fetch::{ApiClient, ApiResponse, ContentFetcher, Document};

/// Longest backoff exponent; keeps the delay bounded on large retry counts
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// HTTP client with a bounded timeout and exponential-backoff retries
pub struct HttpClient {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
    render_endpoint: Option<String>,
}

impl HttpClient {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            render_endpoint: config.render_endpoint.clone(),
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(1 << attempt.min(MAX_BACKOFF_EXPONENT))
    }

    /// GET `url`, retrying network errors, 429 and 5xx responses.
    /// Any other response is returned as is.
    async fn get_with_retry(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Option<reqwest::Response> {
        for attempt in 0..self.max_retries {
            let mut request = self.client.get(url);
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }

            match request.send().await {
                Ok(response) if is_retryable_status(response.status()) => {
                    warn!(
                        "{} returned status {} (attempt {}/{})",
                        url,
                        response.status(),
                        attempt + 1,
                        self.max_retries
                    );
                }
                Ok(response) => return Some(response),
                Err(e) => {
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}",
                        url,
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                }
            }

            if attempt + 1 < self.max_retries {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        warn!("Giving up on {} after {} attempts", url, self.max_retries);
        None
    }

    async fn fetch_page(&self, request_url: &str, document_url: &str) -> Option<Document> {
        let response = self.get_with_retry(request_url, &[]).await?;
        let status = response.status();
        if !status.is_success() {
            debug!("{} returned status {}", request_url, status);
            return None;
        }

        match response.text().await {
            Ok(body) => Some(Document::new(document_url, body)),
            Err(e) => {
                warn!("Failed to read body of {}: {}", request_url, e);
                None
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait::async_trait]
impl ContentFetcher for HttpClient {
    async fn fetch_static(&self, url: &str) -> Option<Document> {
        self.fetch_page(url, url).await
    }

    async fn fetch_rendered(&self, url: &str) -> Option<Document> {
        let Some(endpoint) = &self.render_endpoint else {
            debug!("No render endpoint configured, skipping rendered fetch of {}", url);
            return None;
        };
        let render_url = format!("{}/{}", endpoint.trim_end_matches('/'), url);
        self.fetch_page(&render_url, url).await
    }
}

#[async_trait::async_trait]
impl ApiClient for HttpClient {
    async fn request_json(&self, url: &str, headers: &[(String, String)]) -> Option<ApiResponse> {
        let response = self.get_with_retry(url, headers).await?;
        let status = response.status().as_u16();

        let body = match response.bytes().await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null),
            Err(e) => {
                warn!("Failed to read body of {}: {}", url, e);
                serde_json::Value::Null
            }
        };

        Some(ApiResponse::new(status, body))
    }
}
