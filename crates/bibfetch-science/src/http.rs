use std::sync::Arc;
use std::time::{Duration, Instant};

use bibfetch_core::config::NetworkConfig;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{Result, ScienceError};

const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Connection settings shared by every backend client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub min_interval: Duration,
    pub max_retries: u32,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_network(&NetworkConfig::default())
    }
}

impl ClientSettings {
    pub fn from_network(network: &NetworkConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(network.min_interval_ms),
            max_retries: network.max_retries,
            timeout: Duration::from_secs(network.timeout_secs.max(1)),
            user_agent: network.user_agent.clone(),
        }
    }
}

/// A response body together with its status, for callers that judge the status themselves.
#[derive(Debug, Clone)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

// ─── RateLimitedClient ────────────────────────────────────────────────────────

pub struct RateLimitedClient {
    client: reqwest::Client,
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
    max_retries: u32,
}

impl RateLimitedClient {
    pub fn new(settings: &ClientSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .gzip(true)
            .build()?;
        Ok(Self {
            client,
            min_interval: settings.min_interval,
            last_request: Arc::new(Mutex::new(None)),
            max_retries: settings.max_retries,
        })
    }

    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Send a request, retrying transport errors and 429s with backoff.
    ///
    /// Every other status is handed back to the caller untouched.
    async fn send<F>(&self, url: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            self.wait_for_rate_limit().await;
            match build(&self.client).send().await {
                Ok(r) if r.status() == 429 => {
                    let wait = r
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(MAX_RETRY_AFTER_SECS)
                        .min(MAX_RETRY_AFTER_SECS);
                    if attempt >= self.max_retries {
                        return Err(ScienceError::RateLimit(url.to_string(), wait));
                    }
                    debug!(url, wait, attempt, "rate limited, backing off");
                    sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Ok(r) => return Ok(r),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(transport_error(url, e));
                    }
                    let backoff = 2u64.pow(attempt);
                    debug!(url, backoff, attempt, error = %e, "request failed, retrying");
                    sleep(Duration::from_secs(backoff)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// GET a page without judging its status.
    pub async fn get_page(&self, url: &str) -> Result<Page> {
        self.get_page_with_headers(url, HeaderMap::new()).await
    }

    pub async fn get_page_with_headers(&self, url: &str, headers: HeaderMap) -> Result<Page> {
        let resp = self
            .send(url, |c| c.get(url).headers(headers.clone()))
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| transport_error(url, e))?;
        Ok(Page { status, body })
    }

    /// GET a body, failing on any non-success status.
    pub async fn get(&self, url: &str) -> Result<String> {
        let resp = self.send(url, |c| c.get(url)).await?;
        let resp = ensure_success(url, resp).await?;
        resp.text().await.map_err(|e| transport_error(url, e))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self.get(url).await?;
        serde_json::from_str(&text).map_err(|e| ScienceError::Parse(e.to_string()))
    }

    /// GET JSON with HTTP basic authentication.
    pub async fn get_json_basic_auth<T: DeserializeOwned>(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<T> {
        let resp = self
            .send(url, |c| c.get(url).basic_auth(username, Some(password)))
            .await?;
        let resp = ensure_success(url, resp).await?;
        let text = resp.text().await.map_err(|e| transport_error(url, e))?;
        serde_json::from_str(&text).map_err(|e| ScienceError::Parse(e.to_string()))
    }

    /// GET raw bytes, failing on any non-success status.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.send(url, |c| c.get(url)).await?;
        let resp = ensure_success(url, resp).await?;
        let bytes = resp.bytes().await.map_err(|e| transport_error(url, e))?;
        Ok(bytes.to_vec())
    }
}

async fn ensure_success(url: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(ScienceError::ApiError(
        url.to_string(),
        format!("HTTP {status}: {snippet}"),
    ))
}

fn transport_error(url: &str, e: reqwest::Error) -> ScienceError {
    if e.is_timeout() {
        ScienceError::Timeout(url.to_string())
    } else {
        ScienceError::Http(e)
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> ClientSettings {
    ClientSettings {
        min_interval: Duration::ZERO,
        max_retries: 0,
        timeout: Duration::from_secs(5),
        user_agent: "bibfetch-test".to_string(),
    }
}
