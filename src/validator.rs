//! Reachability validation for proxy candidates.
//!
//! A candidate is probed through itself as a forward proxy against a pool of
//! test endpoints; the verdict tolerates a configurable number of flaky
//! endpoints (default one, the N-1 quorum). [`vet_all`] fans validations out
//! over a bounded pool and collects verdicts as they complete, so one slow or
//! broken candidate never stalls its siblings.

use crate::fetch::random_user_agent;
use crate::models::{Candidate, Protocol};
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Proxy as ReqwestProxy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Default timeout for a single probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of concurrent validations
const DEFAULT_CONCURRENCY: usize = 10;

/// Default endpoints probed through a candidate
const DEFAULT_TEST_URLS: &[&str] = &[
    "http://httpbin.org/ip",
    "http://api.ipify.org/",
    "http://ifconfig.me/ip",
];

/// The alive/dead outcome of validating one candidate
#[derive(Debug, Clone)]
pub struct Verdict {
    pub alive: bool,
    pub candidate: Candidate,
}

/// Configuration for the validator
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Endpoints to probe through the candidate
    pub test_urls: Vec<String>,
    /// Timeout per probe; independent, a timed-out probe is a failed probe
    pub timeout: Duration,
    /// Bound on concurrent validations
    pub concurrency: usize,
    /// Probes allowed to fail while still calling the candidate alive
    pub max_failed_probes: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            test_urls: DEFAULT_TEST_URLS.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            max_failed_probes: 1,
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_test_urls(mut self, urls: Vec<String>) -> Self {
        self.test_urls = urls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_failed_probes(mut self, max_failed: usize) -> Self {
        self.max_failed_probes = max_failed;
        self
    }
}

/// Probes required to pass for an alive verdict: `N - allowed` with a floor
/// of one, so a single test endpoint is a strict check.
pub(crate) fn required_successes(total: usize, max_failed: usize) -> usize {
    total.saturating_sub(max_failed).max(1)
}

/// The validation seam the orchestrators depend on
#[async_trait]
pub trait Vet: Send + Sync {
    async fn vet(&self, candidate: &Candidate) -> Verdict;
}

/// HTTP validator probing candidates against the configured test endpoints
#[derive(Debug, Clone)]
pub struct HttpValidator {
    config: ValidatorConfig,
}

impl HttpValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    fn create_client(&self, candidate: &Candidate) -> Result<Client, reqwest::Error> {
        let proxy_url = candidate.proxy_url();
        let proxy = match candidate.protocol {
            Protocol::Http | Protocol::Https => ReqwestProxy::http(&proxy_url)?,
            Protocol::Socks4 | Protocol::Socks5 => ReqwestProxy::all(&proxy_url)?,
        };
        Client::builder()
            .proxy(proxy)
            .timeout(self.config.timeout)
            .build()
    }

    async fn probe(&self, client: &Client, url: &str) -> bool {
        let request = client
            .get(url)
            .header(reqwest::header::USER_AGENT, random_user_agent())
            .send();
        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(Ok(response)) => response.status().is_success(),
            Ok(Err(_)) | Err(_) => false,
        }
    }
}

#[async_trait]
impl Vet for HttpValidator {
    async fn vet(&self, candidate: &Candidate) -> Verdict {
        let client = match self.create_client(candidate) {
            Ok(client) => client,
            Err(e) => {
                warn!(proxy = %candidate, error = %e, "could not build proxied client");
                return Verdict {
                    alive: false,
                    candidate: candidate.clone(),
                };
            }
        };

        // one independent probe per endpoint, all in flight at once
        let probes = self.config.test_urls.iter().map(|url| self.probe(&client, url));
        let outcomes = join_all(probes).await;
        let successes = outcomes.iter().filter(|ok| **ok).count();

        let alive = successes
            >= required_successes(self.config.test_urls.len(), self.config.max_failed_probes);
        debug!(proxy = %candidate, successes, total = self.config.test_urls.len(), alive, "probed");

        Verdict {
            alive,
            candidate: candidate.clone(),
        }
    }
}

/// Fan validations out over a bounded pool, collecting verdicts as they
/// complete. The pool belongs to one validation phase; it is not shared
/// across runs.
pub async fn vet_all<V: Vet>(vet: &V, candidates: Vec<Candidate>, concurrency: usize) -> Vec<Verdict> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    stream::iter(candidates)
        .map(|candidate| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // Acquire only fails if the semaphore is closed, which cannot
                // happen while we hold the Arc for the whole phase.
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("Semaphore closed unexpectedly");
                vet.vet(&candidate).await
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Calls every even port alive, everything else dead
    pub(crate) struct ParityVet;

    #[async_trait]
    impl Vet for ParityVet {
        async fn vet(&self, candidate: &Candidate) -> Verdict {
            Verdict {
                alive: candidate.port % 2 == 0,
                candidate: candidate.clone(),
            }
        }
    }

    #[test]
    fn test_quorum_tolerates_one_flaky_endpoint() {
        // 3 endpoints, 1 failing: alive
        assert!(2 >= required_successes(3, 1));
        // 3 endpoints, 2 failing: dead
        assert!(1 < required_successes(3, 1));
    }

    #[test]
    fn test_quorum_single_endpoint_is_strict() {
        assert_eq!(required_successes(1, 1), 1);
        assert_eq!(required_successes(1, 0), 1);
    }

    #[test]
    fn test_quorum_configurable_allowance() {
        assert_eq!(required_successes(5, 2), 3);
        assert_eq!(required_successes(4, 0), 4);
        // allowance larger than the pool still needs one pass
        assert_eq!(required_successes(2, 5), 1);
    }

    #[test]
    fn test_config_builder() {
        let config = ValidatorConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_concurrency(0)
            .with_max_failed_probes(2)
            .with_test_urls(vec!["http://example.com/".to_string()]);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.concurrency, 1); // floor of one worker
        assert_eq!(config.max_failed_probes, 2);
        assert_eq!(config.test_urls.len(), 1);
    }

    #[tokio::test]
    async fn test_vet_all_collects_every_verdict() {
        let candidates: Vec<Candidate> = (1u16..=20)
            .map(|port| Candidate::new("10.0.0.1", port, Protocol::Http))
            .collect();

        let verdicts = vet_all(&ParityVet, candidates, 4).await;
        assert_eq!(verdicts.len(), 20);
        assert_eq!(verdicts.iter().filter(|v| v.alive).count(), 10);
    }

    #[tokio::test]
    async fn test_vet_all_empty_input() {
        let verdicts = vet_all(&ParityVet, Vec::new(), 4).await;
        assert!(verdicts.is_empty());
    }
}
