//! Sync pipeline orchestration: config, poll cycles, enrichment and export.

use std::sync::Arc;

use adwatch_adapters::{HtmlFieldExtractor, HttpDetailFetcher, HttpFeedFetcher};
use adwatch_storage::{Catalog, HttpFetcher};
use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

mod config;
mod enrich;
mod export;
mod poll;

pub use config::{AppConfig, DATABASE_ENV, DEFAULT_CONFIG_FILE, DEFAULT_USER_AGENT};
pub use enrich::{EnrichmentPass, EnrichmentSummary, EnrichmentTarget};
pub use export::{export_active, write_csv, DEFAULT_EXPORT_FILE, EXPORT_COLUMNS};
pub use poll::{CycleState, CycleSummary, Poller};

pub const CRATE_NAME: &str = "adwatch-sync";

/// Shutdown signal shared by the poll and enrichment loops. `true` means stop.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Flips the shutdown signal on the first Ctrl-C.
pub fn spawn_ctrl_c_handler(tx: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, finishing current entry");
                let _ = tx.send(true);
            }
            Err(err) => warn!(error = %err, "cannot listen for interrupt"),
        }
    })
}

pub async fn open_catalog(config: &AppConfig) -> Result<Catalog> {
    Catalog::open(&config.database)
        .await
        .with_context(|| format!("opening catalog {}", config.database.display()))
}

pub async fn build_poller(config: &AppConfig, catalog: Catalog) -> Result<Poller> {
    let http = HttpFetcher::new(config.http_client_config())?;
    Poller::new(
        catalog,
        Arc::new(HttpFeedFetcher::new(http)),
        config.feeds.clone(),
    )
    .await
}

pub fn build_enrichment(config: &AppConfig, catalog: Catalog) -> Result<EnrichmentPass> {
    let http = HttpFetcher::new(config.http_client_config())?;
    let extractor = HtmlFieldExtractor::new().context("compiling detail page selectors")?;
    Ok(EnrichmentPass::new(
        catalog,
        Arc::new(HttpDetailFetcher::new(http)),
        Arc::new(extractor),
        config.enrich_delay(),
    ))
}
