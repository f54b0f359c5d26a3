use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::feed::models::{MatchSnapshot, Transition};

#[derive(Debug, Clone)]
struct TrackedMatch {
    snapshot: MatchSnapshot,
    last_seen: Instant,
    /// Whole-cycle failures observed while this match was tracked.
    cycle_failures: u32,
}

/// Authoritative in-memory view of currently-live matches.
///
/// The poll loop and enrichment tasks mutate it concurrently; every mutation
/// takes the write lock and readers get copy-on-read snapshots, so a partial
/// view is never observable.
pub struct MatchStore {
    matches: RwLock<HashMap<String, TrackedMatch>>,
    stale_after: Duration,
    max_cycle_failures: u32,
}

impl MatchStore {
    pub fn new(stale_after: Duration, max_cycle_failures: u32) -> Self {
        MatchStore {
            matches: RwLock::new(HashMap::new()),
            stale_after,
            max_cycle_failures,
        }
    }

    /// Diff the latest snapshot batch against the tracked set and return the
    /// resulting transitions in dispatch order: completions for matches that
    /// dropped out first, then new/updated matches from the current batch.
    pub fn reconcile(&self, latest: Vec<MatchSnapshot>) -> Vec<Transition> {
        let mut matches = self.matches.write().unwrap();
        let mut transitions = Vec::new();
        let now = Instant::now();

        let current_ids: Vec<&str> = latest.iter().map(|s| s.id()).collect();
        let completed_ids: Vec<String> = matches
            .keys()
            .filter(|id| !current_ids.contains(&id.as_str()))
            .cloned()
            .collect();

        for id in completed_ids {
            if let Some(tracked) = matches.remove(&id) {
                info!(
                    "Match completed: {} ({})",
                    tracked.snapshot.describe(),
                    id
                );
                transitions.push(Transition::Completed {
                    snapshot: tracked.snapshot,
                });
            }
        }

        for mut snapshot in latest {
            let id = snapshot.id().to_string();
            match matches.get_mut(&id) {
                None => {
                    info!("New match detected: {} ({})", snapshot.describe(), id);
                    matches.insert(
                        id,
                        TrackedMatch {
                            snapshot: snapshot.clone(),
                            last_seen: now,
                            cycle_failures: 0,
                        },
                    );
                    transitions.push(Transition::New { snapshot });
                }
                Some(tracked) => {
                    tracked.last_seen = now;
                    tracked.cycle_failures = 0;
                    // The feed never carries a stream link; keep the enriched
                    // one so it neither churns the diff nor gets lost.
                    if snapshot.stream_link.is_none() {
                        snapshot.stream_link = tracked.snapshot.stream_link.clone();
                    }
                    if tracked.snapshot.has_significant_change(&snapshot) {
                        let old = std::mem::replace(&mut tracked.snapshot, snapshot.clone());
                        if old.has_score_change(&snapshot) {
                            info!("Score updated in {}: {}", id, snapshot.describe());
                        }
                        transitions.push(Transition::Updated { old, new: snapshot });
                    }
                }
            }
        }

        transitions
    }

    /// Safety net for a feed outage: a match unseen past the staleness
    /// horizon, or tracked through too many consecutive failed cycles, was
    /// never observed completing. It is removed without a transition rather
    /// than reported with a stale score.
    fn sweep_stale(
        matches: &mut HashMap<String, TrackedMatch>,
        stale_after: Duration,
        max_cycle_failures: u32,
    ) {
        matches.retain(|id, tracked| {
            if tracked.last_seen.elapsed() > stale_after {
                warn!("Removing stale match {} (unseen for over {:?})", id, stale_after);
                return false;
            }
            if tracked.cycle_failures > max_cycle_failures {
                warn!(
                    "Removing match {} after {} failed cycles",
                    id, tracked.cycle_failures
                );
                return false;
            }
            true
        });
    }

    /// Merge an enrichment result into the stored snapshot. Returns the
    /// (old, new) pair when the match is still tracked and the link actually
    /// changed; a late result for a completed match is a no-op.
    pub fn merge_stream_link(
        &self,
        match_id: &str,
        stream_link: &str,
    ) -> Option<(MatchSnapshot, MatchSnapshot)> {
        let mut matches = self.matches.write().unwrap();
        let tracked = matches.get_mut(match_id)?;

        if tracked.snapshot.stream_link.as_deref() == Some(stream_link) {
            return None;
        }

        let old = tracked.snapshot.clone();
        tracked.snapshot.stream_link = Some(stream_link.to_string());
        Some((old, tracked.snapshot.clone()))
    }

    /// Count a failed poll cycle against every tracked match, then drop any
    /// match the outage has left unseen past the staleness horizon or past
    /// the failure threshold.
    pub fn record_cycle_failure(&self) {
        let mut matches = self.matches.write().unwrap();
        for tracked in matches.values_mut() {
            tracked.cycle_failures += 1;
        }
        Self::sweep_stale(&mut matches, self.stale_after, self.max_cycle_failures);
    }

    /// Reset auxiliary bookkeeping (failure counters, last-seen timestamps)
    /// without touching the tracked snapshots.
    pub fn clear_bookkeeping(&self) {
        let mut matches = self.matches.write().unwrap();
        let now = Instant::now();
        for tracked in matches.values_mut() {
            tracked.cycle_failures = 0;
            tracked.last_seen = now;
        }
    }

    /// Copy-on-read view for the dashboard and WebSocket snapshot.
    pub fn snapshot(&self) -> Vec<MatchSnapshot> {
        let matches = self.matches.read().unwrap();
        let mut all: Vec<MatchSnapshot> =
            matches.values().map(|t| t.snapshot.clone()).collect();
        all.sort_by(|a, b| a.match_page.cmp(&b.match_page));
        all
    }

    pub fn contains(&self, match_id: &str) -> bool {
        self.matches.read().unwrap().contains_key(match_id)
    }

    pub fn len(&self) -> usize {
        self.matches.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.read().unwrap().is_empty()
    }

    #[cfg(test)]
    fn backdate(&self, match_id: &str, age: Duration) {
        let mut matches = self.matches.write().unwrap();
        if let Some(tracked) = matches.get_mut(match_id) {
            tracked.last_seen = Instant::now() - age;
        }
    }
}
