//! Proxy Harvester - Proxy List Harvesting and Validation
//!
//! Harvests proxy endpoints from public proxy-list sites, verifies that each
//! endpoint actually routes traffic, and maintains a live, deduplicated
//! inventory of working proxies that callers can draw from on demand.

pub mod database;
pub mod error;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod sources;
pub mod validator;

pub use database::{ProxyFilter, Store};
pub use models::*;
pub use pipeline::{run_harvest, run_health_check, select_random_working, RetirementPolicy};

use crate::fetch::FetcherConfig;
use crate::validator::ValidatorConfig;
use std::time::Duration;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    pub database_url: String,
    /// Endpoints proxies are probed against
    pub test_urls: Vec<String>,
    /// Timeout per reachability probe
    pub probe_timeout: Duration,
    /// Bound on concurrent validations per phase
    pub concurrency: usize,
    /// Probes allowed to fail while still calling a proxy alive
    pub max_failed_probes: usize,
    /// Timeout per page fetch
    pub fetch_timeout: Duration,
    /// Fetch attempts per page
    pub fetch_attempts: u32,
    /// How long fetched page bodies stay cached within a run
    pub cache_ttl: Duration,
    /// Browserless-style renderer endpoint for JS pages
    pub renderer_url: Option<String>,
    /// What the health check does with dead entries
    pub retirement: RetirementPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let validator = ValidatorConfig::default();
        Self {
            database_url: "proxies.db".to_string(),
            test_urls: validator.test_urls,
            probe_timeout: validator.timeout,
            concurrency: validator.concurrency,
            max_failed_probes: validator.max_failed_probes,
            fetch_timeout: Duration::from_secs(30),
            fetch_attempts: 3,
            cache_ttl: Duration::from_secs(5 * 60),
            renderer_url: None,
            retirement: RetirementPolicy::default(),
        }
    }
}

impl Config {
    pub fn validator_config(&self) -> ValidatorConfig {
        ValidatorConfig::new()
            .with_test_urls(self.test_urls.clone())
            .with_timeout(self.probe_timeout)
            .with_concurrency(self.concurrency)
            .with_max_failed_probes(self.max_failed_probes)
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: self.fetch_timeout,
            attempts: self.fetch_attempts,
            renderer_url: self.renderer_url.clone(),
        }
    }
}
