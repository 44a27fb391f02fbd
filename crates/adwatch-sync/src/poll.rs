//! Poll cycle: fetch every feed, merge what was seen, sweep what was not.

use std::sync::Arc;
use std::time::Duration;

use adwatch_adapters::{candidate_from_entry, FeedFetcher};
use adwatch_core::{Epoch, EpochClock};
use adwatch_storage::Catalog;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleState {
    Idle,
    Fetching,
    Extracting,
    Merging,
    Sweeping,
    Sleeping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub epoch: Epoch,
    pub feeds_polled: usize,
    pub feeds_failed: usize,
    pub entries_seen: usize,
    pub entries_merged: usize,
    pub entries_skipped: usize,
    pub deactivated: u64,
    /// False when every feed failed or shutdown cut the cycle short; entries not
    /// reached this cycle are then left as they were.
    pub swept: bool,
    pub interrupted: bool,
}

pub struct Poller {
    catalog: Catalog,
    fetcher: Arc<dyn FeedFetcher>,
    feeds: Vec<String>,
    clock: EpochClock,
    state: CycleState,
}

impl Poller {
    /// Resumes the epoch clock past everything already in the catalog.
    pub async fn new(
        catalog: Catalog,
        fetcher: Arc<dyn FeedFetcher>,
        feeds: Vec<String>,
    ) -> Result<Self> {
        let last = catalog
            .max_last_seen()
            .await
            .context("reading newest last_seen to resume epoch clock")?;
        Ok(Self {
            catalog,
            fetcher,
            feeds,
            clock: EpochClock::resume_after(last),
            state: CycleState::Idle,
        })
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    fn enter(&mut self, state: CycleState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "poll state");
            self.state = state;
        }
    }

    pub async fn run_cycle(&mut self, shutdown: &watch::Receiver<bool>) -> Result<CycleSummary> {
        self.run_cycle_at(Utc::now(), Local::now().date_naive(), shutdown)
            .await
    }

    /// One full cycle with an explicit clock reading and reference date for
    /// relative posting dates.
    ///
    /// A catalog failure aborts the cycle before the sweep and is returned.
    pub async fn run_cycle_at(
        &mut self,
        now: DateTime<Utc>,
        today: NaiveDate,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleSummary> {
        self.enter(CycleState::Fetching);
        let epoch = self.clock.next_at(now);
        let cycle_id = Uuid::new_v4();
        let span = info_span!("poll_cycle", %cycle_id, %epoch);

        let result = self
            .cycle_body(cycle_id, epoch, today, shutdown)
            .instrument(span)
            .await;
        self.enter(CycleState::Idle);
        result
    }

    async fn cycle_body(
        &mut self,
        cycle_id: Uuid,
        epoch: Epoch,
        today: NaiveDate,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleSummary> {
        let mut summary = CycleSummary {
            cycle_id,
            epoch,
            feeds_polled: 0,
            feeds_failed: 0,
            entries_seen: 0,
            entries_merged: 0,
            entries_skipped: 0,
            deactivated: 0,
            swept: false,
            interrupted: false,
        };

        let feeds = self.feeds.clone();
        'feeds: for feed in &feeds {
            if *shutdown.borrow() {
                summary.interrupted = true;
                break;
            }

            self.enter(CycleState::Fetching);
            let entries = match self.fetcher.fetch_feed(feed).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(feed = %feed, error = %err, "feed fetch failed");
                    summary.feeds_failed += 1;
                    continue;
                }
            };
            summary.feeds_polled += 1;
            summary.entries_seen += entries.len();

            for entry in &entries {
                if *shutdown.borrow() {
                    summary.interrupted = true;
                    break 'feeds;
                }

                self.enter(CycleState::Extracting);
                let candidate = match candidate_from_entry(entry, today) {
                    Ok(candidate) => candidate,
                    Err(err) => {
                        warn!(feed = %feed, error = %err, "skipping feed entry");
                        summary.entries_skipped += 1;
                        continue;
                    }
                };

                self.enter(CycleState::Merging);
                self.catalog
                    .upsert(&candidate, epoch)
                    .await
                    .with_context(|| format!("merging listing {}", candidate.id))?;
                summary.entries_merged += 1;
            }
        }

        let all_feeds_failed = summary.feeds_failed > 0 && summary.feeds_polled == 0;
        if !all_feeds_failed && !summary.interrupted {
            self.enter(CycleState::Sweeping);
            summary.deactivated = self
                .catalog
                .sweep_inactive(epoch)
                .await
                .context("sweeping stale listings")?;
            summary.swept = true;
        } else {
            warn!(
                feeds_failed = summary.feeds_failed,
                interrupted = summary.interrupted,
                "liveness sweep skipped, no feed was read"
            );
        }

        info!(
            feeds = summary.feeds_polled,
            merged = summary.entries_merged,
            skipped = summary.entries_skipped,
            deactivated = summary.deactivated,
            "poll cycle complete"
        );
        Ok(summary)
    }

    /// Runs cycles until `shutdown` flips, sleeping `interval` between them.
    /// The entry in flight always finishes before the loop exits.
    pub async fn run_loop(
        &mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_cycle(&shutdown).await {
                error!(error = %format!("{err:#}"), "poll cycle aborted");
            }
            if *shutdown.borrow() {
                break;
            }

            self.enter(CycleState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.enter(CycleState::Idle);
        info!("poll loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adwatch_adapters::{AdapterError, RawFeedEntry};
    use adwatch_storage::FetchError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct FakeFeeds {
        pages: Mutex<HashMap<String, Option<Vec<RawFeedEntry>>>>,
    }

    impl FakeFeeds {
        fn set(&self, url: &str, entries: Option<Vec<RawFeedEntry>>) {
            self.pages.lock().unwrap().insert(url.to_string(), entries);
        }
    }

    #[async_trait]
    impl FeedFetcher for FakeFeeds {
        async fn fetch_feed(&self, url: &str) -> Result<Vec<RawFeedEntry>, AdapterError> {
            match self.pages.lock().unwrap().get(url).cloned().flatten() {
                Some(entries) => Ok(entries),
                None => Err(AdapterError::Fetch(FetchError::HttpStatus {
                    status: 503,
                    url: url.to_string(),
                })),
            }
        }
    }

    fn entry(id: &str) -> RawFeedEntry {
        RawFeedEntry {
            link: format!("https://www.kleinanzeigen.de/s-anzeige/x/{id}"),
            title: format!("Anzeige {id}"),
            summary: "<p>20 €</p>".to_string(),
            published: Some("Heute".to_string()),
            image: None,
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).single().unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    async fn setup(feeds: &[&str]) -> (TempDir, Catalog, Arc<FakeFeeds>, Poller) {
        let dir = tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("ads.db")).await.unwrap();
        let fake = Arc::new(FakeFeeds::default());
        let poller = Poller::new(
            catalog.clone(),
            fake.clone(),
            feeds.iter().map(|f| f.to_string()).collect(),
        )
        .await
        .unwrap();
        (dir, catalog, fake, poller)
    }

    #[tokio::test]
    async fn listing_missing_from_next_cycle_becomes_inactive() {
        let (_dir, catalog, fake, mut poller) = setup(&["feed"]).await;
        let (_tx, rx) = watch::channel(false);

        fake.set("feed", Some(vec![entry("1"), entry("2")]));
        let first = poller.run_cycle_at(at(8), today(), &rx).await.unwrap();
        assert_eq!(first.entries_merged, 2);
        assert!(first.swept);

        fake.set("feed", Some(vec![entry("1")]));
        let second = poller.run_cycle_at(at(9), today(), &rx).await.unwrap();
        assert_eq!(second.deactivated, 1);

        let a = catalog.get("1").await.unwrap().unwrap();
        let b = catalog.get("2").await.unwrap().unwrap();
        assert!(a.is_active);
        assert!(!b.is_active);
        assert_eq!(a.first_seen, first.epoch);
        assert_eq!(a.last_seen, second.epoch);
        assert_eq!(a.price, Some(20));
        assert_eq!(a.date_posted, Some(today()));
        assert_eq!(poller.state(), CycleState::Idle);
    }

    #[tokio::test]
    async fn frozen_clock_still_deactivates_vanished_listing() {
        let (_dir, catalog, fake, mut poller) = setup(&["feed"]).await;
        let (_tx, rx) = watch::channel(false);

        fake.set("feed", Some(vec![entry("1"), entry("2")]));
        let first = poller.run_cycle_at(at(8), today(), &rx).await.unwrap();
        fake.set("feed", Some(vec![entry("1")]));
        let second = poller.run_cycle_at(at(8), today(), &rx).await.unwrap();

        assert!(second.epoch > first.epoch);
        assert!(!catalog.get("2").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn entries_without_identity_are_skipped() {
        let (_dir, catalog, fake, mut poller) = setup(&["feed"]).await;
        let (_tx, rx) = watch::channel(false);

        let mut broken = entry("x");
        broken.link = "https://www.kleinanzeigen.de/s-suchanfrage/fahrrad/".to_string();
        fake.set("feed", Some(vec![entry("1"), broken, entry("3")]));

        let summary = poller.run_cycle_at(at(8), today(), &rx).await.unwrap();
        assert_eq!(summary.entries_seen, 3);
        assert_eq!(summary.entries_merged, 2);
        assert_eq!(summary.entries_skipped, 1);
        assert!(summary.swept);
        assert_eq!(catalog.count_active().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dead_feed_does_not_stop_liveness_of_healthy_feed() {
        let (_dir, catalog, fake, mut poller) = setup(&["good", "dead"]).await;
        let (_tx, rx) = watch::channel(false);

        fake.set("good", Some(vec![entry("1"), entry("2")]));
        fake.set("dead", None);
        poller.run_cycle_at(at(8), today(), &rx).await.unwrap();

        fake.set("good", Some(vec![entry("1")]));
        for hour in 9..12 {
            let summary = poller.run_cycle_at(at(hour), today(), &rx).await.unwrap();
            assert_eq!(summary.feeds_failed, 1);
            assert!(summary.swept);
        }
        assert!(catalog.get("1").await.unwrap().unwrap().is_active);
        assert!(!catalog.get("2").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn sweep_is_skipped_when_every_feed_fails() {
        let (_dir, catalog, fake, mut poller) = setup(&["a", "b"]).await;
        let (_tx, rx) = watch::channel(false);

        fake.set("a", Some(vec![entry("1")]));
        fake.set("b", Some(vec![entry("2")]));
        poller.run_cycle_at(at(8), today(), &rx).await.unwrap();

        fake.set("a", None);
        fake.set("b", None);
        let summary = poller.run_cycle_at(at(9), today(), &rx).await.unwrap();
        assert_eq!(summary.feeds_failed, 2);
        assert!(!summary.swept);
        assert_eq!(catalog.count_active().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn shutdown_before_cycle_merges_nothing_and_skips_sweep() {
        let (_dir, catalog, fake, mut poller) = setup(&["feed"]).await;
        fake.set("feed", Some(vec![entry("1")]));
        let (_tx, rx) = watch::channel(false);
        poller.run_cycle_at(at(8), today(), &rx).await.unwrap();

        let (_tx, stopped) = watch::channel(true);
        fake.set("feed", Some(vec![]));
        let summary = poller.run_cycle_at(at(9), today(), &stopped).await.unwrap();
        assert!(summary.interrupted);
        assert!(!summary.swept);
        assert!(catalog.get("1").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn catalog_failure_aborts_cycle() {
        let (_dir, catalog, fake, mut poller) = setup(&["feed"]).await;
        let (_tx, rx) = watch::channel(false);
        fake.set("feed", Some(vec![entry("1")]));
        catalog.close().await;

        let err = poller.run_cycle_at(at(8), today(), &rx).await.unwrap_err();
        assert!(format!("{err:#}").contains("merging listing 1"));
        assert_eq!(poller.state(), CycleState::Idle);
    }

    #[tokio::test]
    async fn loop_exits_when_shutdown_flips_during_sleep() {
        let (_dir, _catalog, fake, mut poller) = setup(&["feed"]).await;
        fake.set("feed", Some(vec![entry("1")]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            poller
                .run_loop(Duration::from_secs(3600), rx)
                .await
                .map(|_| poller.state())
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let state = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop stops promptly")
            .unwrap()
            .unwrap();
        assert_eq!(state, CycleState::Idle);
    }
}
