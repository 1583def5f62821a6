//! Inventory operations: dedup against persisted entries, persistence of
//! validated candidates, lazy random selection and retirement.

use crate::database::{ProxyFilter, Store};
use crate::models::{Candidate, ProxyEntry};
use crate::validator::{Verdict, Vet};
use crate::Result;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What the health check does with an entry that fails validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetirementPolicy {
    /// Remove failed entries outright, keeping the live inventory lean
    #[default]
    Delete,
    /// Keep the row but flag it dead
    MarkDead,
}

impl RetirementPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "delete" => Some(RetirementPolicy::Delete),
            "mark-dead" | "mark_dead" => Some(RetirementPolicy::MarkDead),
            _ => None,
        }
    }
}

/// Drop candidates that duplicate one another or an existing active,
/// non-dead entry. Existing entries are the health check's responsibility;
/// harvesting never re-probes them.
pub async fn dedupe(store: &Store, candidates: Vec<Candidate>) -> Result<Vec<Candidate>> {
    let mut seen = HashSet::new();
    let mut fresh = Vec::new();
    for candidate in candidates {
        if !seen.insert(candidate.key()) {
            continue;
        }
        if store.proxy_exists(&candidate.ip, candidate.port).await? {
            debug!(proxy = %candidate, "already in inventory, skipping");
            continue;
        }
        fresh.push(candidate);
    }
    Ok(fresh)
}

/// Upsert the alive verdicts, associating each entry with the page it was
/// found in. A persistence failure for one candidate is logged and does not
/// disturb the ones already saved.
pub async fn persist(
    store: &Store,
    page_id: Option<i64>,
    verdicts: &[Verdict],
) -> Vec<ProxyEntry> {
    let mut saved = Vec::new();
    for verdict in verdicts.iter().filter(|v| v.alive) {
        match store.upsert_proxy(page_id, &verdict.candidate).await {
            Ok((entry, created)) => {
                debug!(%entry, created, "saved in inventory");
                saved.push(entry);
            }
            Err(e) => {
                warn!(proxy = %verdict.candidate, error = %e, "failed to save candidate");
            }
        }
    }
    saved
}

/// Shuffle the filtered active inventory and validate entries one at a time
/// until one passes. Lazy and short-circuiting: an empty filtered set returns
/// `None` without a single probe, and validation stops at the first pass.
pub async fn select_random_working<V: Vet>(
    store: &Store,
    vet: &V,
    filter: &ProxyFilter,
) -> Result<Option<ProxyEntry>> {
    let mut entries = store.active_proxies(filter).await?;
    if entries.is_empty() {
        return Ok(None);
    }
    entries.shuffle(&mut rand::thread_rng());

    for entry in entries {
        let verdict = vet.vet(&entry.to_candidate()).await;
        if verdict.alive {
            info!(%entry, "working proxy selected");
            return Ok(Some(entry));
        }
    }
    Ok(None) // no working proxies fallback
}

/// Apply a health-check verdict to an entry. Returns whether the entry was
/// retired.
pub async fn retire(
    store: &Store,
    policy: RetirementPolicy,
    entry: &ProxyEntry,
    alive: bool,
) -> Result<bool> {
    if alive {
        info!(%entry, "verified, updating");
        store.mark_checked(entry.id).await?;
        return Ok(false);
    }
    match policy {
        RetirementPolicy::Delete => {
            info!(%entry, "dead, deleting");
            store.delete_proxy(entry.id).await?;
        }
        RetirementPolicy::MarkDead => {
            info!(%entry, "dead, flagging");
            store.mark_dead(entry.id).await?;
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Protocol;
    use crate::validator::Verdict;
    use async_trait::async_trait;

    /// Fails the test if the selection scan probes anything
    struct PanicVet;

    #[async_trait]
    impl Vet for PanicVet {
        async fn vet(&self, candidate: &Candidate) -> Verdict {
            panic!("validator invoked for {candidate}");
        }
    }

    struct AliveVet;

    #[async_trait]
    impl Vet for AliveVet {
        async fn vet(&self, candidate: &Candidate) -> Verdict {
            Verdict {
                alive: true,
                candidate: candidate.clone(),
            }
        }
    }

    struct DeadVet;

    #[async_trait]
    impl Vet for DeadVet {
        async fn vet(&self, candidate: &Candidate) -> Verdict {
            Verdict {
                alive: false,
                candidate: candidate.clone(),
            }
        }
    }

    fn candidate(ip: &str, port: u16) -> Candidate {
        Candidate::new(ip, port, Protocol::Http)
    }

    #[test]
    fn test_retirement_policy_parse() {
        assert_eq!(RetirementPolicy::parse("delete"), Some(RetirementPolicy::Delete));
        assert_eq!(RetirementPolicy::parse("mark-dead"), Some(RetirementPolicy::MarkDead));
        assert_eq!(RetirementPolicy::parse("MARK_DEAD"), Some(RetirementPolicy::MarkDead));
        assert_eq!(RetirementPolicy::parse("purge"), None);
    }

    #[tokio::test]
    async fn test_dedupe_drops_in_batch_duplicates() {
        let store = Store::open_in_memory().await.unwrap();
        let fresh = dedupe(
            &store,
            vec![candidate("1.2.3.4", 8080), candidate("1.2.3.4", 8080)],
        )
        .await
        .unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn test_dedupe_drops_persisted_entries() {
        let store = Store::open_in_memory().await.unwrap();
        store.upsert_proxy(None, &candidate("1.2.3.4", 8080)).await.unwrap();

        let fresh = dedupe(
            &store,
            vec![candidate("1.2.3.4", 8080), candidate("5.6.7.8", 3128)],
        )
        .await
        .unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].ip, "5.6.7.8");
    }

    #[tokio::test]
    async fn test_dedupe_readmits_dead_entries() {
        let store = Store::open_in_memory().await.unwrap();
        let (entry, _) = store.upsert_proxy(None, &candidate("1.2.3.4", 8080)).await.unwrap();
        store.mark_dead(entry.id).await.unwrap();

        // a dead row is not an active entry, so the candidate is fresh again
        let fresh = dedupe(&store, vec![candidate("1.2.3.4", 8080)]).await.unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_saves_only_alive() {
        let store = Store::open_in_memory().await.unwrap();
        let verdicts = vec![
            Verdict { alive: true, candidate: candidate("1.2.3.4", 8080) },
            Verdict { alive: false, candidate: candidate("5.6.7.8", 3128) },
        ];
        let saved = persist(&store, None, &verdicts).await;
        assert_eq!(saved.len(), 1);
        assert!(store.find_proxy("5.6.7.8", 3128).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persist_failure_leaves_saved_entries_intact() {
        let store = Store::open_in_memory().await.unwrap();
        let source = store
            .add_source("SSLProxies", "SSLP", "https://www.sslproxies.org")
            .await
            .unwrap();
        let page = store.add_page(source.id, "/", false).await.unwrap();

        let verdicts = vec![Verdict { alive: true, candidate: candidate("1.2.3.4", 8080) }];
        let saved = persist(&store, Some(page.id), &verdicts).await;
        assert_eq!(saved.len(), 1);

        // a dangling page id trips the foreign key on every page link insert
        let verdicts = vec![
            Verdict { alive: true, candidate: candidate("5.6.7.8", 3128) },
            Verdict { alive: true, candidate: candidate("9.9.9.9", 1080) },
        ];
        let saved = persist(&store, Some(page.id + 1000), &verdicts).await;
        assert!(saved.is_empty());

        // entries saved before the failures are untouched
        let entry = store.find_proxy("1.2.3.4", 8080).await.unwrap().unwrap();
        assert_eq!(store.pages_for_proxy(entry.id).await.unwrap(), vec![page.id]);
    }

    #[tokio::test]
    async fn test_select_empty_inventory_never_probes() {
        let store = Store::open_in_memory().await.unwrap();
        let picked = select_random_working(&store, &PanicVet, &ProxyFilter::default())
            .await
            .unwrap();
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn test_select_returns_first_working() {
        let store = Store::open_in_memory().await.unwrap();
        let mut c = candidate("1.2.3.4", 8080);
        c.anonymity = crate::models::Anonymity::Elite;
        store.upsert_proxy(None, &c).await.unwrap();

        let picked = select_random_working(&store, &AliveVet, &ProxyFilter::default())
            .await
            .unwrap();
        assert_eq!(picked.unwrap().ip, "1.2.3.4");
    }

    #[tokio::test]
    async fn test_select_exhausted_inventory_returns_none() {
        let store = Store::open_in_memory().await.unwrap();
        let mut c = candidate("1.2.3.4", 8080);
        c.anonymity = crate::models::Anonymity::Elite;
        store.upsert_proxy(None, &c).await.unwrap();

        let picked = select_random_working(&store, &DeadVet, &ProxyFilter::default())
            .await
            .unwrap();
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn test_retire_delete_policy() {
        let store = Store::open_in_memory().await.unwrap();
        let (entry, _) = store.upsert_proxy(None, &candidate("1.2.3.4", 8080)).await.unwrap();

        let retired = retire(&store, RetirementPolicy::Delete, &entry, false).await.unwrap();
        assert!(retired);
        assert!(store.find_proxy("1.2.3.4", 8080).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retire_mark_dead_policy() {
        let store = Store::open_in_memory().await.unwrap();
        let (entry, _) = store.upsert_proxy(None, &candidate("1.2.3.4", 8080)).await.unwrap();

        let retired = retire(&store, RetirementPolicy::MarkDead, &entry, false).await.unwrap();
        assert!(retired);
        let row = store.find_proxy("1.2.3.4", 8080).await.unwrap().unwrap();
        assert!(row.is_dead);
        assert_eq!(row.checked_count, 1);
    }

    #[tokio::test]
    async fn test_retire_alive_updates_bookkeeping() {
        let store = Store::open_in_memory().await.unwrap();
        let (entry, _) = store.upsert_proxy(None, &candidate("1.2.3.4", 8080)).await.unwrap();

        let retired = retire(&store, RetirementPolicy::Delete, &entry, true).await.unwrap();
        assert!(!retired);
        let row = store.find_proxy("1.2.3.4", 8080).await.unwrap().unwrap();
        assert_eq!(row.checked_count, 1);
        assert!(row.checked_at.is_some());
    }
}
