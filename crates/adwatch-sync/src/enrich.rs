//! Enrichment pass: visit detail pages and patch what the feed left out.

use std::sync::Arc;
use std::time::Duration;

use adwatch_adapters::{patch_from_fields, DetailFetcher, FieldExtractor};
use adwatch_core::{extract_listing_id, Epoch};
use adwatch_storage::{Catalog, CatalogError};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentTarget {
    pub id: String,
    pub url: String,
}

impl EnrichmentTarget {
    /// Derives the listing id from the detail URL itself.
    pub fn from_url(url: &str) -> Option<Self> {
        let id = extract_listing_id(url).ok()?;
        Some(Self {
            id: id.to_string(),
            url: url.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub targets: usize,
    pub enriched: usize,
    pub not_found: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct EnrichmentPass {
    catalog: Catalog,
    fetcher: Arc<dyn DetailFetcher>,
    extractor: Arc<dyn FieldExtractor>,
    delay: Duration,
}

impl EnrichmentPass {
    pub fn new(
        catalog: Catalog,
        fetcher: Arc<dyn DetailFetcher>,
        extractor: Arc<dyn FieldExtractor>,
        delay: Duration,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            extractor,
            delay,
        }
    }

    /// Raw URLs as given on the command line; those without an id are
    /// counted as skipped.
    pub async fn run_urls(
        &self,
        urls: &[String],
        shutdown: &watch::Receiver<bool>,
    ) -> Result<EnrichmentSummary> {
        let mut targets = Vec::with_capacity(urls.len());
        let mut skipped = 0;
        for url in urls {
            match EnrichmentTarget::from_url(url) {
                Some(target) => targets.push(target),
                None => {
                    warn!(url = %url, "no listing id in url, skipping");
                    skipped += 1;
                }
            }
        }
        let mut summary = self.run(&targets, shutdown).await?;
        summary.targets += skipped;
        summary.skipped += skipped;
        Ok(summary)
    }

    /// Active entries that still lack a description. Selected entries are
    /// stamped as attempted first, so a page that never yields a description
    /// cannot hold the head of the queue.
    pub async fn run_pending(
        &self,
        limit: u32,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<EnrichmentSummary> {
        let targets: Vec<EnrichmentTarget> = self
            .catalog
            .enrichment_candidates(limit)
            .await
            .context("selecting entries to enrich")?
            .into_iter()
            .map(|entry| EnrichmentTarget {
                id: entry.id,
                url: entry.link,
            })
            .collect();

        let ids: Vec<String> = targets.iter().map(|t| t.id.clone()).collect();
        self.catalog
            .mark_enrichment_attempted(&ids, Epoch::from_datetime(Utc::now()))
            .await
            .context("recording enrichment attempts")?;
        self.run(&targets, shutdown).await
    }

    pub async fn run(
        &self,
        targets: &[EnrichmentTarget],
        shutdown: &watch::Receiver<bool>,
    ) -> Result<EnrichmentSummary> {
        self.run_at(targets, Local::now().date_naive(), shutdown)
            .await
    }

    /// Processes targets in order with `delay` between detail fetches.
    /// Missing catalog entries and fetch failures are counted and passed
    /// over; any other catalog failure ends the pass.
    pub async fn run_at(
        &self,
        targets: &[EnrichmentTarget],
        today: NaiveDate,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<EnrichmentSummary> {
        let pass_id = Uuid::new_v4();
        let span = info_span!("enrichment_pass", %pass_id, targets = targets.len());
        async move {
            let mut summary = EnrichmentSummary {
                targets: targets.len(),
                ..EnrichmentSummary::default()
            };

            for (index, target) in targets.iter().enumerate() {
                if *shutdown.borrow() {
                    summary.skipped += targets.len() - index;
                    break;
                }
                if index > 0 && !self.delay.is_zero() {
                    let mut rx = shutdown.clone();
                    tokio::select! {
                        _ = tokio::time::sleep(self.delay) => {}
                        _ = rx.changed() => {}
                    }
                    if *shutdown.borrow() {
                        summary.skipped += targets.len() - index;
                        break;
                    }
                }

                let page = match self.fetcher.fetch_detail(&target.url).await {
                    Ok(page) => page,
                    Err(err) => {
                        warn!(id = %target.id, url = %target.url, error = %err, "detail fetch failed");
                        summary.failed += 1;
                        continue;
                    }
                };

                let patch = patch_from_fields(&self.extractor.extract(&page), today);
                if patch.is_empty() {
                    debug!(id = %target.id, "detail page yielded no fields");
                }
                match self.catalog.apply_enrichment(&target.id, &patch).await {
                    Ok(()) => {
                        debug!(id = %target.id, "entry enriched");
                        summary.enriched += 1;
                    }
                    Err(CatalogError::NotFound { id }) => {
                        warn!(id = %id, "enrichment target not in catalog");
                        summary.not_found += 1;
                    }
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("enriching listing {}", target.id));
                    }
                }
            }

            info!(
                enriched = summary.enriched,
                not_found = summary.not_found,
                failed = summary.failed,
                skipped = summary.skipped,
                "enrichment pass complete"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Repeats `run_pending` every `interval` until shutdown; runs alongside
    /// the poll loop.
    pub async fn run_pending_loop(
        &self,
        limit: u32,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_pending(limit, &shutdown).await {
                error!(error = %format!("{err:#}"), "enrichment pass aborted");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("enrichment loop stopped");
        Ok(())
    }
}
