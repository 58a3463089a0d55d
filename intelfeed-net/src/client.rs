//! HTTP client and page fetching
//!
//! Every request goes through one shared client with an explicit timeout, a
//! rotated user agent and the per-host rate limiter.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{header, Client, Proxy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::HostRateLimiter;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Bodies shorter than this are fetch failures
    pub min_body_bytes: usize,
    /// Minimum delay between requests to one host
    pub per_host_delay_ms: u64,
    /// Fixed user agent; rotated from a built-in list when unset
    pub user_agent: Option<String>,
    /// Optional proxy URL (http, https or socks5h)
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            min_body_bytes: 500,
            per_host_delay_ms: 200,
            user_agent: None,
            proxy: None,
        }
    }
}

/// Errors from page fetching
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Response from {url} too short ({len} bytes)")]
    TooShort { url: String, len: usize },

    #[error("Non-text content type '{content_type}' from {url}")]
    NotText { url: String, content_type: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// A fetched response body
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// Requested URL
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub body: String,
}

/// Anything that can fetch a page body by URL
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Create the shared HTTP client
pub fn create_client(config: &HttpConfig) -> Result<Client, FetchError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(5));

    if let Some(proxy) = &config.proxy {
        let proxy = Proxy::all(proxy).map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}

/// Reject bodies below the configured minimum length
pub fn ensure_min_length(page: FetchedPage, min_bytes: usize) -> Result<FetchedPage, FetchError> {
    if page.body.len() < min_bytes {
        return Err(FetchError::TooShort {
            url: page.url,
            len: page.body.len(),
        });
    }
    Ok(page)
}

fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.contains("html") || ct.contains("xml") || ct.contains("json")
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
    config: HttpConfig,
    limiter: Arc<HostRateLimiter>,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Result<Self, FetchError> {
        let limiter = Arc::new(HostRateLimiter::new(Duration::from_millis(
            config.per_host_delay_ms,
        )));
        Self::with_limiter(config, limiter)
    }

    /// Build a fetcher that shares an existing rate limiter
    pub fn with_limiter(
        config: HttpConfig,
        limiter: Arc<HostRateLimiter>,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client: create_client(&config)?,
            config,
            limiter,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn user_agent(&self) -> &str {
        self.config
            .user_agent
            .as_deref()
            .unwrap_or_else(|| random_user_agent())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?
            .to_lowercase();

        self.limiter.acquire(&host).await;

        debug!("Fetching: {}", url);

        let response = self
            .client
            .get(parsed)
            .header(header::USER_AGENT, self.user_agent())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(ct) = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_textual(ct) {
                return Err(FetchError::NotText {
                    url: url.to_string(),
                    content_type: ct.to_string(),
                });
            }
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| self.classify(e))?;

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            body,
        })
    }
}

impl HttpFetcher {
    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.config.timeout_secs)
        } else {
            FetchError::Request(e)
        }
    }
}

/// Fetcher serving fixed bodies from memory; unknown URLs are 404s
#[derive(Debug, Default)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(url.into(), body.into());
        self
    }

    /// Number of `get` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs requested so far, in call order
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().push(url.to_string());
        match self.pages.get(url) {
            Some(body) => Ok(FetchedPage {
                url: url.to_string(),
                final_url: url.to_string(),
                body: body.clone(),
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}
