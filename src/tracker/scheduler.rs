use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollingMode {
    Active,
    Idle,
    DeepIdle,
}

#[derive(Debug, Clone)]
pub struct AdaptivePollingConfig {
    pub active_interval: Duration,
    pub idle_interval: Duration,
    pub deep_idle_interval: Duration,
    pub max_empty_polls: u32,
}

/// Decides how soon the next poll should run based on whether any match is
/// live. Pure state machine, no I/O: the interval returned is always one of
/// the three configured tiers.
pub struct AdaptivePolling {
    config: AdaptivePollingConfig,
    current_interval: Duration,
    consecutive_empty_polls: u32,
    mode: PollingMode,
}

impl AdaptivePolling {
    pub fn new(config: AdaptivePollingConfig) -> Self {
        info!(
            "Adaptive polling configured - active: {:?}, idle: {:?}, deep idle: {:?}",
            config.active_interval, config.idle_interval, config.deep_idle_interval
        );
        let current_interval = config.active_interval;
        AdaptivePolling {
            config,
            current_interval,
            consecutive_empty_polls: 0,
            mode: PollingMode::Active,
        }
    }

    pub fn next_interval(&mut self, has_live_matches: bool) -> Duration {
        if has_live_matches {
            self.consecutive_empty_polls = 0;
            self.mode = PollingMode::Active;
            self.current_interval = self.config.active_interval;
            return self.current_interval;
        }

        self.consecutive_empty_polls += 1;

        if self.consecutive_empty_polls > self.config.max_empty_polls {
            self.mode = PollingMode::DeepIdle;
            self.current_interval = self.config.deep_idle_interval;
            debug!(
                "Switching to deep idle mode after {} empty polls",
                self.consecutive_empty_polls
            );
        } else if self.consecutive_empty_polls > self.config.max_empty_polls / 2 {
            self.mode = PollingMode::Idle;
            self.current_interval = self.config.idle_interval;
            debug!(
                "Switching to idle mode after {} empty polls",
                self.consecutive_empty_polls
            );
        } else {
            self.mode = PollingMode::Active;
            self.current_interval = self.config.active_interval;
        }

        self.current_interval
    }

    /// Force active polling; used when a refresh is requested externally or
    /// when the first live match reappears after idling.
    pub fn reset(&mut self) {
        self.consecutive_empty_polls = 0;
        self.mode = PollingMode::Active;
        self.current_interval = self.config.active_interval;
        info!("Adaptive polling reset to active mode");
    }

    pub fn mode(&self) -> PollingMode {
        self.mode
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn consecutive_empty_polls(&self) -> u32 {
        self.consecutive_empty_polls
    }

    /// Rough upstream request rate at the current tier, for the health view.
    pub fn polls_per_hour(&self) -> f64 {
        3_600_000.0 / self.current_interval.as_millis() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(max_empty: u32) -> AdaptivePolling {
        AdaptivePolling::new(AdaptivePollingConfig {
            active_interval: Duration::from_secs(15),
            idle_interval: Duration::from_secs(120),
            deep_idle_interval: Duration::from_secs(300),
            max_empty_polls: max_empty,
        })
    }

    #[test]
    fn test_live_matches_always_active() {
        let mut s = scheduler(10);
        for _ in 0..20 {
            s.next_interval(false);
        }
        assert_eq!(s.mode(), PollingMode::DeepIdle);

        let interval = s.next_interval(true);
        assert_eq!(interval, Duration::from_secs(15));
        assert_eq!(s.mode(), PollingMode::Active);
        assert_eq!(s.consecutive_empty_polls(), 0);
    }

    #[test]
    fn test_tier_walk_active_idle_deep_idle() {
        let mut s = scheduler(10);

        // 1..=5 empty polls: still active.
        for _ in 0..5 {
            assert_eq!(s.next_interval(false), Duration::from_secs(15));
        }
        assert_eq!(s.mode(), PollingMode::Active);

        // 6..=10: idle tier.
        assert_eq!(s.next_interval(false), Duration::from_secs(120));
        assert_eq!(s.mode(), PollingMode::Idle);
        for _ in 0..4 {
            s.next_interval(false);
        }
        assert_eq!(s.mode(), PollingMode::Idle);

        // 11th empty poll crosses the max: deep idle.
        assert_eq!(s.next_interval(false), Duration::from_secs(300));
        assert_eq!(s.mode(), PollingMode::DeepIdle);
    }

    #[test]
    fn test_empty_poll_counter_increments() {
        let mut s = scheduler(10);
        s.next_interval(false);
        assert_eq!(s.consecutive_empty_polls(), 1);
    }

    #[test]
    fn test_reset_forces_active() {
        let mut s = scheduler(4);
        for _ in 0..10 {
            s.next_interval(false);
        }
        assert_eq!(s.mode(), PollingMode::DeepIdle);

        s.reset();
        assert_eq!(s.mode(), PollingMode::Active);
        assert_eq!(s.consecutive_empty_polls(), 0);
        assert_eq!(s.current_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_interval_is_always_a_configured_tier() {
        let mut s = scheduler(6);
        for i in 0..30 {
            let interval = s.next_interval(i % 7 == 0);
            assert!(
                [15u64, 120, 300]
                    .iter()
                    .any(|&secs| interval == Duration::from_secs(secs)),
                "unexpected interval {:?}",
                interval
            );
        }
    }
}
