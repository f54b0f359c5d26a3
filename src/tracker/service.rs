use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, info, warn};

use super::scheduler::{AdaptivePolling, PollingMode};
use super::store::MatchStore;
use crate::enrich::StreamLinkScraper;
use crate::feed::{FeedClient, FeedError, Transition};
use crate::notify::Dispatcher;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub health_check_threshold: Duration,
    pub max_cycle_failures: u32,
    pub enable_stream_scraping: bool,
    pub max_enrich_tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub live_match_count: usize,
    pub consecutive_failures: u32,
    pub last_successful_update: Option<DateTime<Utc>>,
    pub time_since_last_update_ms: Option<u64>,
    pub polling_mode: PollingMode,
    pub current_interval_ms: u64,
    pub consecutive_empty_polls: u32,
    pub estimated_polls_per_hour: f64,
    pub breaker_open: bool,
    pub dropped_record_count: u64,
}

#[derive(Debug)]
struct HealthState {
    consecutive_failures: u32,
    last_success_wall: Option<DateTime<Utc>>,
    last_success_mono: Option<Instant>,
}

/// Ties the core together: drives the self-rearming poll loop, hands feed
/// snapshots to the diff engine, fans transitions out, and launches
/// enrichment tasks off the critical path.
pub struct TrackerService {
    client: Arc<FeedClient>,
    store: Arc<MatchStore>,
    scraper: Arc<StreamLinkScraper>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Mutex<AdaptivePolling>,
    health: Mutex<HealthState>,
    wake: Notify,
    enrich_permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    config: TrackerConfig,
}

impl TrackerService {
    pub fn new(
        client: Arc<FeedClient>,
        store: Arc<MatchStore>,
        scraper: Arc<StreamLinkScraper>,
        dispatcher: Arc<Dispatcher>,
        scheduler: AdaptivePolling,
        config: TrackerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        TrackerService {
            client,
            store,
            scraper,
            dispatcher,
            scheduler: Mutex::new(scheduler),
            health: Mutex::new(HealthState {
                consecutive_failures: 0,
                last_success_wall: None,
                last_success_mono: None,
            }),
            wake: Notify::new(),
            enrich_permits: Arc::new(Semaphore::new(config.max_enrich_tasks)),
            shutdown,
            config,
        }
    }

    /// The poll loop: run a cycle, re-arm with the adaptive interval, wait
    /// for the timer, a forced wake-up, or shutdown. One cycle is in flight
    /// at a time; the loop never re-arms after shutdown is signaled.
    pub async fn run(self: Arc<Self>) {
        info!("Starting adaptive polling for match tracking");
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle().await;

            let has_live = !self.store.is_empty();
            let interval = self.scheduler.lock().unwrap().next_interval(has_live);
            debug!(
                "Next poll in {:?} ({} live matches)",
                interval,
                self.store.len()
            );

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.wake.notified() => {
                    debug!("Poll loop woken early by forced refresh");
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("Poll loop stopped");
    }

    async fn run_cycle(&self) {
        let snapshots = match self.client.fetch_live_matches().await {
            Ok(snapshots) => snapshots,
            Err(FeedError::CircuitOpen) => {
                // Expected fail-fast; health degrades on its own as the last
                // successful update ages out.
                debug!("Circuit breaker open, skipping this cycle");
                return;
            }
            Err(e) => {
                self.on_cycle_failure(&e);
                return;
            }
        };

        let was_empty = self.store.is_empty();
        let count = snapshots.len();
        let transitions = self.store.reconcile(snapshots);
        self.apply_transitions(&transitions).await;

        self.on_cycle_success();

        let empty_polls = self.scheduler.lock().unwrap().consecutive_empty_polls();
        if count == 0 && empty_polls == 0 && !was_empty {
            info!("No live matches found, switching to idle polling");
        } else if count > 0 && empty_polls > 0 {
            info!(
                "Live matches resumed ({} matches), switching to active polling",
                count
            );
        }
    }

    /// Dispatch each transition and run its side effects: enrichment for new
    /// matches, cache eviction for completed ones.
    async fn apply_transitions(&self, transitions: &[Transition]) {
        for transition in transitions {
            self.dispatcher.dispatch(transition).await;

            match transition {
                Transition::New { snapshot } if self.config.enable_stream_scraping => {
                    self.spawn_enrichment(snapshot.id().to_string());
                }
                // The match will not be re-queried; keep the cache bounded.
                Transition::Completed { snapshot } => {
                    self.scraper.forget(snapshot.id());
                }
                _ => {}
            }
        }
    }

    fn on_cycle_success(&self) {
        let mut health = self.health.lock().unwrap();
        health.consecutive_failures = 0;
        health.last_success_wall = Some(Utc::now());
        health.last_success_mono = Some(Instant::now());
    }

    fn on_cycle_failure(&self, error: &FeedError) {
        let mut health = self.health.lock().unwrap();
        health.consecutive_failures += 1;
        warn!(
            "Poll cycle failed ({} consecutive, class {}): {}",
            health.consecutive_failures,
            error.class(),
            error
        );
        drop(health);

        self.store.record_cycle_failure();
    }

    /// Launch a background enrichment task for a newly-seen match. The poll
    /// cycle never blocks on this; the permit pool caps concurrency and
    /// shutdown is checked before the store write.
    fn spawn_enrichment(&self, match_id: String) {
        let scraper = Arc::clone(&self.scraper);
        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let permits = Arc::clone(&self.enrich_permits);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            // The match may already have completed while waiting for a permit.
            if *shutdown.borrow() || !store.contains(&match_id) {
                return;
            }

            let Some(stream_link) = scraper.resolve(&match_id).await else {
                debug!("No stream link resolved for {}", match_id);
                return;
            };

            if *shutdown.borrow() {
                return;
            }

            // Late results for completed matches are a no-op here.
            if let Some((old, new)) = store.merge_stream_link(&match_id, &stream_link) {
                dispatcher
                    .dispatch(&Transition::Updated { old, new })
                    .await;
            }
        });
    }

    /// Admin action: reset the scheduler and trigger an immediate
    /// out-of-cycle poll.
    pub fn force_refresh(&self) {
        info!("Forcing manual refresh of match data");
        self.scheduler.lock().unwrap().reset();
        self.wake.notify_one();
    }

    /// Admin action: drop the enrichment cache and the store's auxiliary
    /// bookkeeping. Circuit-breaker state is deliberately left alone.
    pub fn clear_caches(&self) {
        info!("Clearing cached data");
        self.scraper.clear_cache();
        self.store.clear_bookkeeping();
        self.scheduler.lock().unwrap().reset();
    }

    pub fn health(&self) -> HealthReport {
        let health = self.health.lock().unwrap();
        let scheduler = self.scheduler.lock().unwrap();

        let age = health.last_success_mono.map(|t| t.elapsed());
        let fresh = age
            .map(|a| a <= self.config.health_check_threshold)
            .unwrap_or(false);
        let healthy =
            fresh && health.consecutive_failures < self.config.max_cycle_failures;

        HealthReport {
            healthy,
            live_match_count: self.store.len(),
            consecutive_failures: health.consecutive_failures,
            last_successful_update: health.last_success_wall,
            time_since_last_update_ms: age.map(|a| a.as_millis() as u64),
            polling_mode: scheduler.mode(),
            current_interval_ms: scheduler.current_interval().as_millis() as u64,
            consecutive_empty_polls: scheduler.consecutive_empty_polls(),
            estimated_polls_per_hour: scheduler.polls_per_hour(),
            breaker_open: self.client.breaker_open(),
            dropped_record_count: self.client.dropped_record_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::models::test_snapshot;
    use crate::feed::FeedClientConfig;
    use crate::notify::Sink;
    use crate::tracker::scheduler::AdaptivePollingConfig;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink(AtomicUsize);

    #[async_trait]
    impl Sink for NullSink {
        async fn deliver(&self, _transition: &Transition) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn name(&self) -> &str {
            "null"
        }
    }

    fn service() -> (Arc<TrackerService>, watch::Sender<bool>) {
        let client = Arc::new(
            FeedClient::new(FeedClientConfig {
                base_url: "http://127.0.0.1:9".into(),
                connect_timeout: Duration::from_millis(200),
                request_timeout: Duration::from_millis(500),
                retries: 0,
                retry_delay: Duration::from_millis(10),
                max_consecutive_failures: 5,
                breaker_timeout: Duration::from_secs(60),
            })
            .unwrap(),
        );
        let store = Arc::new(MatchStore::new(Duration::from_secs(3600), 10));
        let scraper = Arc::new(
            StreamLinkScraper::new(Duration::from_secs(1), Duration::from_secs(600)).unwrap(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            vec![Arc::new(NullSink(AtomicUsize::new(0)))],
            Duration::from_secs(1),
        ));
        let scheduler = AdaptivePolling::new(AdaptivePollingConfig {
            active_interval: Duration::from_secs(15),
            idle_interval: Duration::from_secs(120),
            deep_idle_interval: Duration::from_secs(300),
            max_empty_polls: 10,
        });
        let (tx, rx) = watch::channel(false);
        let service = Arc::new(TrackerService::new(
            client,
            store,
            scraper,
            dispatcher,
            scheduler,
            TrackerConfig {
                health_check_threshold: Duration::from_secs(60),
                max_cycle_failures: 5,
                enable_stream_scraping: false,
                max_enrich_tasks: 2,
            },
            rx,
        ));
        (service, tx)
    }

    #[tokio::test]
    async fn test_unhealthy_before_first_success() {
        let (service, _tx) = service();
        let report = service.health();
        assert!(!report.healthy);
        assert_eq!(report.live_match_count, 0);
        assert_eq!(report.polling_mode, PollingMode::Active);
    }

    #[tokio::test]
    async fn test_failed_cycle_degrades_health_but_loop_continues() {
        let (service, _tx) = service();
        // The feed URL is unreachable, so the cycle fails.
        service.run_cycle().await;
        let report = service.health();
        assert!(!report.healthy);
        assert_eq!(report.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_healthy_after_success_marker() {
        let (service, _tx) = service();
        service.on_cycle_success();
        let report = service.health();
        assert!(report.healthy);
        assert!(report.last_successful_update.is_some());
        assert!(report.time_since_last_update_ms.unwrap() < 1_000);
    }

    #[tokio::test]
    async fn test_force_refresh_resets_scheduler_and_wakes_loop() {
        let (service, _tx) = service();
        {
            let mut scheduler = service.scheduler.lock().unwrap();
            for _ in 0..20 {
                scheduler.next_interval(false);
            }
            assert_eq!(scheduler.mode(), PollingMode::DeepIdle);
        }

        service.force_refresh();
        assert_eq!(
            service.scheduler.lock().unwrap().mode(),
            PollingMode::Active
        );
        // The pending wake-up resolves immediately.
        tokio::time::timeout(Duration::from_millis(100), service.wake.notified())
            .await
            .expect("wake notification not delivered");
    }

    #[tokio::test]
    async fn test_completed_match_evicts_scraper_cache_entry() {
        let (service, _tx) = service();
        service
            .store
            .reconcile(vec![test_snapshot("https://www.vlr.gg/1", "1", "0")]);
        service
            .scraper
            .seed_resolved("https://www.vlr.gg/1", "https://www.twitch.tv/vct");

        // The feed drops the match: its cache entry goes with it.
        let transitions = service.store.reconcile(vec![]);
        assert_eq!(transitions.len(), 1);
        service.apply_transitions(&transitions).await;
        assert!(service.scraper.cached("https://www.vlr.gg/1").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        let (service, tx) = service();
        let handle = tokio::spawn(Arc::clone(&service).run());

        // Let the first (failing) cycle finish, then signal shutdown.
        tokio::time::sleep(Duration::from_millis(700)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("poll loop did not stop after shutdown")
            .unwrap();
    }
}
