use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::Client;
use tracing::{debug, warn};

use super::breaker::CircuitBreaker;
use super::error::FeedError;
use super::models::{LiveFeedPayload, MatchSnapshot};

#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Extra attempts after the first, inside one caller-visible fetch.
    pub retries: u32,
    pub retry_delay: Duration,
    pub max_consecutive_failures: u32,
    pub breaker_timeout: Duration,
}

/// Client for the live-match feed, owning retry and circuit-breaker state.
///
/// Retry convention: retries happen inside one `fetch_live_matches` call and
/// only the final outcome of the call counts as a single breaker
/// success/failure.
pub struct FeedClient {
    http: Client,
    base_url: String,
    retries: u32,
    retry_delay: Duration,
    breaker: CircuitBreaker,
    dropped_records: AtomicU64,
}

impl FeedClient {
    pub fn new(config: FeedClientConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(FeedClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retries: config.retries,
            retry_delay: config.retry_delay,
            breaker: CircuitBreaker::new(
                config.max_consecutive_failures,
                config.breaker_timeout,
            ),
            dropped_records: AtomicU64::new(0),
        })
    }

    /// Fetch the current live-match snapshot set.
    ///
    /// Fails fast with `FeedError::CircuitOpen` (no network call) while the
    /// breaker is open. Otherwise retries a small fixed number of times with
    /// a jittered delay before surfacing the last error.
    pub async fn fetch_live_matches(&self) -> Result<Vec<MatchSnapshot>, FeedError> {
        if !self.breaker.try_acquire() {
            return Err(FeedError::CircuitOpen);
        }

        let mut last_error = FeedError::MissingData;
        for attempt in 0..=self.retries {
            match self.attempt_fetch().await {
                Ok(snapshots) => {
                    self.breaker.record_success();
                    return Ok(snapshots);
                }
                Err(e) => {
                    warn!(
                        "Feed fetch attempt {}/{} failed ({}): {}",
                        attempt + 1,
                        self.retries + 1,
                        e.class(),
                        e
                    );
                    last_error = e;
                    if attempt < self.retries {
                        tokio::time::sleep(self.jittered_delay()).await;
                    }
                }
            }
        }

        self.breaker.record_failure();
        Err(last_error)
    }

    async fn attempt_fetch(&self) -> Result<Vec<MatchSnapshot>, FeedError> {
        let url = format!("{}/match?q=live_score", self.base_url);
        debug!("Fetching live matches from {}", url);

        let resp = self.http.get(&url).send().await.map_err(classify_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status(status));
        }

        let payload: LiveFeedPayload = resp
            .json()
            .await
            .map_err(|e| FeedError::Parse(e.to_string()))?;

        let data = payload.data.ok_or(FeedError::MissingData)?;
        let segments = data.segments.unwrap_or_default();
        Ok(self.filter_valid(segments))
    }

    /// Drop malformed records from the batch without failing the fetch.
    fn filter_valid(&self, segments: Vec<MatchSnapshot>) -> Vec<MatchSnapshot> {
        let total = segments.len();
        let valid: Vec<MatchSnapshot> = segments.into_iter().filter(|s| s.is_valid()).collect();

        let dropped = total - valid.len();
        if dropped > 0 {
            self.dropped_records
                .fetch_add(dropped as u64, Ordering::Relaxed);
            debug!("Filtered out {} invalid match records", dropped);
        }
        valid
    }

    fn jittered_delay(&self) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..=self.retry_delay.as_millis() as u64 / 2);
        self.retry_delay + Duration::from_millis(jitter_ms)
    }

    pub fn breaker_open(&self) -> bool {
        self.breaker.is_open()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.breaker.consecutive_failures()
    }

    /// Total malformed records dropped since startup (observability only).
    pub fn dropped_record_count(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }
}

fn classify_reqwest(e: reqwest::Error) -> FeedError {
    if e.is_timeout() {
        FeedError::Timeout
    } else {
        FeedError::Network(e.to_string())
    }
}
