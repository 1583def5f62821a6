//! Fetch gateway: resolves a page URL to raw content.
//!
//! The pipelines depend only on the [`FetchGateway`] trait; the HTTP
//! implementation owns retries, user-agent rotation and the optional
//! JS renderer hop. Caching is an explicit per-run handle, never a
//! process-wide install.

use crate::error::FetchError;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default timeout for page fetches in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of attempts per page
const DEFAULT_ATTEMPTS: u32 = 3;

/// User agents rotated across fetch requests
pub(crate) const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:90.0) Gecko/20100101 Firefox/90.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:89.0) Gecko/20100101 Firefox/89.0",
];

pub(crate) fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Resolves a logical page reference to raw content
#[async_trait]
pub trait FetchGateway: Send + Sync {
    /// Fetch the page body. `requires_rendering` asks for a JS-capable
    /// renderer; gateways without one fail with
    /// [`FetchError::RendererUnavailable`].
    async fn fetch(&self, url: &str, requires_rendering: bool) -> Result<String, FetchError>;
}

/// Configuration for the HTTP fetcher
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    /// Attempts per page before giving up
    pub attempts: u32,
    /// Browserless-style renderer endpoint for JS pages
    pub renderer_url: Option<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            attempts: DEFAULT_ATTEMPTS,
            renderer_url: None,
        }
    }
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
}

/// HTTP implementation of the fetch gateway
pub struct HttpFetcher {
    config: FetcherConfig,
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }

    async fn fetch_rendered_once(&self, url: &str) -> Result<String, FetchError> {
        let renderer = self
            .config
            .renderer_url
            .as_deref()
            .ok_or(FetchError::RendererUnavailable)?;
        let response = self
            .client
            .post(renderer)
            .json(&RenderRequest { url })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl FetchGateway for HttpFetcher {
    async fn fetch(&self, url: &str, requires_rendering: bool) -> Result<String, FetchError> {
        let mut last_error = FetchError::RendererUnavailable;
        for attempt in 1..=self.config.attempts.max(1) {
            debug!(url, attempt, requires_rendering, "fetching page");
            let result = if requires_rendering {
                self.fetch_rendered_once(url).await
            } else {
                self.fetch_once(url).await
            };
            match result {
                Ok(body) => {
                    info!(url, bytes = body.len(), "page fetched");
                    return Ok(body);
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "fetch attempt failed");
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// Explicit TTL cache handle for fetched page bodies, scoped to one run
pub struct PageCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl PageCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, url: &str) -> Option<String> {
        let entries = self.entries.lock().expect("page cache poisoned");
        entries
            .get(url)
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, body)| body.clone())
    }

    pub fn put(&self, url: &str, body: String) {
        let mut entries = self.entries.lock().expect("page cache poisoned");
        entries.insert(url.to_string(), (Instant::now(), body));
    }
}

/// Wraps any gateway with a per-run page cache
pub struct CachingFetcher<G> {
    inner: G,
    cache: PageCache,
}

impl<G: FetchGateway> CachingFetcher<G> {
    pub fn new(inner: G, ttl: Duration) -> Self {
        Self {
            inner,
            cache: PageCache::new(ttl),
        }
    }
}

#[async_trait]
impl<G: FetchGateway> FetchGateway for CachingFetcher<G> {
    async fn fetch(&self, url: &str, requires_rendering: bool) -> Result<String, FetchError> {
        if let Some(body) = self.cache.get(url) {
            debug!(url, "cache hit");
            return Ok(body);
        }
        let body = self.inner.fetch(url, requires_rendering).await?;
        self.cache.put(url, body.clone());
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGateway {
        body: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FetchGateway for &CountingGateway {
        async fn fetch(&self, _url: &str, _rendering: bool) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.clone())
        }
    }

    #[test]
    fn test_page_cache_roundtrip() {
        let cache = PageCache::new(Duration::from_secs(300));
        assert!(cache.get("http://a/").is_none());
        cache.put("http://a/", "<html></html>".to_string());
        assert_eq!(cache.get("http://a/").unwrap(), "<html></html>");
    }

    #[test]
    fn test_page_cache_expiry() {
        let cache = PageCache::new(Duration::ZERO);
        cache.put("http://a/", "<html></html>".to_string());
        assert!(cache.get("http://a/").is_none());
    }

    #[tokio::test]
    async fn test_caching_fetcher_hits_inner_once() {
        let gateway = CountingGateway {
            body: "body".to_string(),
            calls: AtomicUsize::new(0),
        };
        let caching = CachingFetcher::new(&gateway, Duration::from_secs(300));

        assert_eq!(caching.fetch("http://a/", false).await.unwrap(), "body");
        assert_eq!(caching.fetch("http://a/", false).await.unwrap(), "body");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rendering_without_renderer_fails_fast() {
        let fetcher = HttpFetcher::new(FetcherConfig::default()).unwrap();
        let err = fetcher.fetch("http://a/", true).await.unwrap_err();
        assert!(matches!(err, FetchError::RendererUnavailable));
    }

    #[test]
    fn test_random_user_agent_is_from_pool() {
        let ua = random_user_agent();
        assert!(USER_AGENTS.contains(&ua));
    }
}
