//! The health-check pipeline: re-validate the whole active inventory in
//! parallel and retire entries that no longer route traffic.

use super::{inventory, RetirementPolicy, RunOutcome};
use crate::database::{ProxyFilter, Store};
use crate::models::RunKind;
use crate::validator::{vet_all, Vet};
use crate::Result;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Run the health-check pipeline over all active entries. An empty inventory
/// finalizes immediately as a successful run with zero processed.
pub async fn run_health_check<V: Vet>(
    store: &Store,
    vet: &V,
    concurrency: usize,
    policy: RetirementPolicy,
) -> Result<RunOutcome> {
    let run_id = store.create_run(RunKind::HealthCheck).await?;
    info!(run_id, "health check commenced");

    match check_all(store, vet, concurrency, policy).await {
        Ok(checked) => {
            store.finish_run(run_id, true, None, checked).await?;
            info!(run_id, checked, "health check complete");
            Ok(RunOutcome {
                run_id,
                processed: checked,
            })
        }
        Err(e) => {
            error!(run_id, error = %e, "health check failed");
            store
                .finish_run(run_id, false, Some(&format!("{e:#}")), 0)
                .await?;
            Ok(RunOutcome {
                run_id,
                processed: 0,
            })
        }
    }
}

async fn check_all<V: Vet>(
    store: &Store,
    vet: &V,
    concurrency: usize,
    policy: RetirementPolicy,
) -> Result<i64> {
    let entries = store.active_proxies(&ProxyFilter::any()).await?;
    if entries.is_empty() {
        return Ok(0);
    }

    let by_key: HashMap<(String, u16), _> = entries
        .iter()
        .map(|entry| ((entry.ip.clone(), entry.port), entry))
        .collect();

    let candidates = entries.iter().map(|entry| entry.to_candidate()).collect();
    let verdicts = vet_all(vet, candidates, concurrency).await;

    let mut checked = 0;
    for verdict in &verdicts {
        let Some(entry) = by_key.get(&verdict.candidate.key()) else {
            continue;
        };
        match inventory::retire(store, policy, entry, verdict.alive).await {
            Ok(_) => checked += 1,
            Err(e) => {
                // one entry's bookkeeping failure never aborts the sweep
                warn!(%entry, error = %e, "failed to apply verdict");
            }
        }
    }

    Ok(checked)
}
