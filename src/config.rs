use clap::Parser;
use std::time::Duration;
use url::Url;

/// Valorant live-match tracker
#[derive(Parser, Debug, Clone)]
#[command(name = "spike-tracker", version, about)]
pub struct Config {
    /// Live-match feed base URL (VLR-style API)
    #[arg(long, env = "FEED_API_URL", default_value = "https://vlrggapi.vercel.app")]
    pub feed_api_url: String,

    /// Dashboard listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:8080")]
    pub dashboard_addr: String,

    /// Poll interval while matches are live (ms)
    #[arg(long, env = "ACTIVE_INTERVAL_MS", default_value = "15000")]
    pub active_interval_ms: u64,

    /// Poll interval after a few empty polls (ms)
    #[arg(long, env = "IDLE_INTERVAL_MS", default_value = "120000")]
    pub idle_interval_ms: u64,

    /// Poll interval once the feed has been quiet for a while (ms)
    #[arg(long, env = "DEEP_IDLE_INTERVAL_MS", default_value = "300000")]
    pub deep_idle_interval_ms: u64,

    /// Empty polls before dropping to the deep-idle tier
    #[arg(long, env = "MAX_EMPTY_POLLS", default_value = "10")]
    pub max_empty_polls: u32,

    /// Consecutive feed failures before the circuit breaker opens
    #[arg(long, env = "MAX_CONSECUTIVE_FAILURES", default_value = "5")]
    pub max_consecutive_failures: u32,

    /// Circuit breaker cooldown before a probe call is allowed (ms)
    #[arg(long, env = "BREAKER_TIMEOUT_MS", default_value = "60000")]
    pub breaker_timeout_ms: u64,

    /// Feed connect timeout (ms)
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// Feed request timeout (ms)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "15000")]
    pub request_timeout_ms: u64,

    /// Extra fetch attempts inside one poll before surfacing failure
    #[arg(long, env = "FETCH_RETRIES", default_value = "2")]
    pub fetch_retries: u32,

    /// Base delay between fetch attempts (ms, jitter added)
    #[arg(long, env = "RETRY_DELAY_MS", default_value = "500")]
    pub retry_delay_ms: u64,

    /// Enable background stream-link scraping for new matches
    #[arg(long, env = "ENABLE_STREAM_SCRAPING", default_value = "true")]
    pub enable_stream_scraping: bool,

    /// Stream-link scrape timeout (ms)
    #[arg(long, env = "ENRICH_TIMEOUT_MS", default_value = "10000")]
    pub enrich_timeout_ms: u64,

    /// Cooldown before re-scraping a match that yielded no link (secs)
    #[arg(long, env = "ENRICH_COOLDOWN_SECS", default_value = "600")]
    pub enrich_cooldown_secs: u64,

    /// Cap on concurrent enrichment tasks
    #[arg(long, env = "MAX_ENRICH_TASKS", default_value = "4")]
    pub max_enrich_tasks: usize,

    /// Remove tracked matches unseen for this long (secs)
    #[arg(long, env = "STALE_AFTER_SECS", default_value = "3600")]
    pub stale_after_secs: u64,

    /// Failed cycles a tracked match survives before being dropped
    #[arg(long, env = "MAX_MATCH_FAILURES", default_value = "10")]
    pub max_match_failures: u32,

    /// Health turns degraded once the last update is older than this (ms)
    #[arg(long, env = "HEALTH_CHECK_THRESHOLD_MS", default_value = "60000")]
    pub health_check_threshold_ms: u64,

    /// Per-sink delivery timeout (ms)
    #[arg(long, env = "DISPATCH_TIMEOUT_MS", default_value = "5000")]
    pub dispatch_timeout_ms: u64,

    /// Discord-compatible webhook URL for chat notifications (optional)
    #[arg(long, env = "DISCORD_WEBHOOK_URL")]
    pub discord_webhook_url: Option<String>,

    /// Username shown on webhook messages
    #[arg(long, env = "WEBHOOK_USERNAME", default_value = "spike-tracker")]
    pub webhook_username: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        Url::parse(&self.feed_api_url)
            .map_err(|e| anyhow::anyhow!("invalid feed_api_url '{}': {}", self.feed_api_url, e))?;

        if self.active_interval_ms == 0 {
            anyhow::bail!("active_interval_ms must be positive");
        }
        if self.idle_interval_ms < self.active_interval_ms {
            anyhow::bail!("idle_interval_ms must not be shorter than active_interval_ms");
        }
        if self.deep_idle_interval_ms < self.idle_interval_ms {
            anyhow::bail!("deep_idle_interval_ms must not be shorter than idle_interval_ms");
        }
        if self.max_empty_polls == 0 {
            anyhow::bail!("max_empty_polls must be positive");
        }
        if self.max_consecutive_failures == 0 {
            anyhow::bail!("max_consecutive_failures must be positive");
        }
        if self.max_enrich_tasks == 0 {
            anyhow::bail!("max_enrich_tasks must be positive");
        }
        if self.max_match_failures == 0 {
            anyhow::bail!("max_match_failures must be positive");
        }
        if let Some(url) = &self.discord_webhook_url {
            Url::parse(url)
                .map_err(|e| anyhow::anyhow!("invalid discord_webhook_url: {}", e))?;
        }
        Ok(())
    }

    pub fn active_interval(&self) -> Duration {
        Duration::from_millis(self.active_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn deep_idle_interval(&self) -> Duration {
        Duration::from_millis(self.deep_idle_interval_ms)
    }

    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.breaker_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
