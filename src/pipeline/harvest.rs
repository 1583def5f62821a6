//! The harvest pipeline: fetch each active source's pages, extract
//! candidates, validate the new ones concurrently and persist survivors.
//!
//! Every source and page iteration is wrapped in a continue-on-error
//! boundary: a source with no registered adapter, an unreachable page or a
//! page full of garbage contributes an empty result and the run moves on.
//! Only an error escaping all of those boundaries fails the run, and even
//! then the run record is finalized with the error text.

use super::{inventory, RunOutcome};
use crate::database::Store;
use crate::fetch::FetchGateway;
use crate::models::{Page, RunKind, Source};
use crate::sources::{adapter_for, ProxyAdapter, SourceCode};
use crate::validator::{vet_all, Vet};
use crate::Result;
use tracing::{error, info, warn};

/// Run the harvest pipeline. Always leaves behind exactly one finalized run
/// record; the returned outcome carries its id for status polling.
pub async fn run_harvest<F, V>(
    store: &Store,
    fetcher: &F,
    vet: &V,
    concurrency: usize,
) -> Result<RunOutcome>
where
    F: FetchGateway,
    V: Vet,
{
    let run_id = store.create_run(RunKind::Harvest).await?;
    info!(run_id, "harvest commenced");

    match harvest_all(store, fetcher, vet, concurrency, run_id).await {
        Ok(discovered) => {
            store.finish_run(run_id, true, None, discovered).await?;
            info!(run_id, discovered, "harvest complete");
            Ok(RunOutcome {
                run_id,
                processed: discovered,
            })
        }
        Err(e) => {
            error!(run_id, error = %e, "harvest failed");
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

async fn harvest_all<F, V>(
    store: &Store,
    fetcher: &F,
    vet: &V,
    concurrency: usize,
    run_id: i64,
) -> Result<i64>
where
    F: FetchGateway,
    V: Vet,
{
    let sources = store.active_sources().await?;
    let mut discovered = 0;

    for source in &sources {
        store.link_run_source(run_id, source.id).await?;
        match harvest_source(store, fetcher, vet, concurrency, run_id, source).await {
            Ok(count) => discovered += count,
            Err(e) => {
                // continue to the next source on any error
                error!(%source, error = %e, "source harvest failed");
                continue;
            }
        }
    }

    Ok(discovered)
}

async fn harvest_source<F, V>(
    store: &Store,
    fetcher: &F,
    vet: &V,
    concurrency: usize,
    run_id: i64,
    source: &Source,
) -> Result<i64>
where
    F: FetchGateway,
    V: Vet,
{
    let Some(code) = SourceCode::parse(&source.code) else {
        warn!(%source, code = %source.code, "no adapter registered, skipping");
        return Ok(0);
    };
    let adapter = adapter_for(code);

    info!(%source, "commenced scraping");
    let pages = store.active_pages(source.id).await?;

    let mut discovered = 0;
    for page in &pages {
        store.link_run_page(run_id, page.id).await?;
        match harvest_page(store, fetcher, vet, concurrency, adapter, source, page).await {
            Ok(count) => discovered += count,
            Err(e) => {
                // continue to the next page on any error
                error!(%page, error = %e, "page harvest failed");
                continue;
            }
        }
    }

    info!(%source, discovered, "scrape complete");
    Ok(discovered)
}

async fn harvest_page<F, V>(
    store: &Store,
    fetcher: &F,
    vet: &V,
    concurrency: usize,
    adapter: &dyn ProxyAdapter,
    source: &Source,
    page: &Page,
) -> Result<i64>
where
    F: FetchGateway,
    V: Vet,
{
    let url = page.full_url(source);

    let content = match fetcher.fetch(&url, page.has_js).await {
        Ok(content) => content,
        Err(e) => {
            // no fetchable content: empty result, run continues
            warn!(%page, url, error = %e, "failed to get page source");
            return Ok(0);
        }
    };

    let candidates = adapter.parse(&content);
    info!(%page, extracted = candidates.len(), "parsing complete");

    let fresh = inventory::dedupe(store, candidates).await?;
    let verdicts = vet_all(vet, fresh, concurrency).await;
    let saved = inventory::persist(store, Some(page.id), &verdicts).await;

    info!(%page, saved = saved.len(), "scrape complete");
    Ok(saved.len() as i64)
}
