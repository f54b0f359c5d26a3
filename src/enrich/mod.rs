use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

/// Ordered selector strategies for finding the stream link on a match page.
/// The first selector that yields an allowed link wins; the ordering is the
/// tie-break, so new strategies go to the back.
const SELECTOR_STRATEGIES: [&str; 3] = [
    "div.match-streams-container a[href]",
    "div.match-streams a.match-streams-btn-external[href]",
    "div.match-streams a[href]",
];

/// Hosts we accept as stream destinations. Match pages link to plenty of
/// other places (betting partners, VOD archives) that must not be surfaced.
const ALLOWED_STREAM_HOSTS: [&str; 4] = ["twitch.tv", "youtube.com", "youtu.be", "kick.com"];

#[derive(Debug, Clone)]
enum CacheEntry {
    Resolved(String),
    FailedAt(Instant),
}

/// Resolves a human-facing stream URL for a match page, independent of the
/// polling cycle. A match with no resolvable stream is a valid, common
/// outcome and is reported as `None`, never as an error.
pub struct StreamLinkScraper {
    http: Client,
    selectors: Vec<Selector>,
    timeout: Duration,
    failure_cooldown: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl StreamLinkScraper {
    pub fn new(timeout: Duration, failure_cooldown: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build scraper HTTP client")?;

        let selectors = SELECTOR_STRATEGIES
            .iter()
            .map(|s| Selector::parse(s).map_err(|e| anyhow!("Bad selector '{}': {}", s, e)))
            .collect::<Result<Vec<_>>>()?;

        Ok(StreamLinkScraper {
            http,
            selectors,
            timeout,
            failure_cooldown,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve the stream link for a match page, consulting the cache first.
    /// Repeated calls for the same match are idempotent and side-effect-free:
    /// a resolved link is returned from cache, and a recent failure is not
    /// retried until its cooldown expires.
    pub async fn resolve(&self, match_url: &str) -> Option<String> {
        match self.cached(match_url) {
            Some(Some(link)) => return Some(link),
            Some(None) => return None,
            None => {}
        }

        let result = match tokio::time::timeout(self.timeout, self.scrape(match_url)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Stream link scrape timed out for {}", match_url);
                None
            }
        };

        let mut cache = self.cache.lock().unwrap();
        match &result {
            Some(link) => {
                info!("Scraped stream link for {}: {}", match_url, link);
                cache.insert(match_url.to_string(), CacheEntry::Resolved(link.clone()));
            }
            None => {
                cache.insert(match_url.to_string(), CacheEntry::FailedAt(Instant::now()));
            }
        }
        result
    }

    /// Cache lookup: `Some(Some)` hit, `Some(None)` known-failed within
    /// cooldown, `None` miss.
    pub(crate) fn cached(&self, match_url: &str) -> Option<Option<String>> {
        let mut cache = self.cache.lock().unwrap();
        match cache.get(match_url).cloned() {
            Some(CacheEntry::Resolved(link)) => Some(Some(link)),
            Some(CacheEntry::FailedAt(at)) => {
                if at.elapsed() < self.failure_cooldown {
                    debug!("Skipping re-enrichment for {} (failure cooldown)", match_url);
                    Some(None)
                } else {
                    cache.remove(match_url);
                    None
                }
            }
            None => None,
        }
    }

    async fn scrape(&self, match_url: &str) -> Option<String> {
        let resp = match self.http.get(match_url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to fetch match page {}: {}", match_url, e);
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!(
                "Match page {} returned status {}",
                match_url,
                resp.status()
            );
            return None;
        }

        let body = match resp.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to read match page {}: {}", match_url, e);
                return None;
            }
        };

        extract_stream_link(&body, &self.selectors)
    }

    /// Drop the cache entry for a single match. Called when the match
    /// completes; without this the cache grows by one entry per match ever
    /// seen until an admin clears it.
    pub fn forget(&self, match_url: &str) {
        if self.cache.lock().unwrap().remove(match_url).is_some() {
            debug!("Evicted stream link cache entry for {}", match_url);
        }
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock().unwrap();
        let evicted = cache.len();
        cache.clear();
        info!("Cleared stream link cache ({} entries)", evicted);
    }

    #[cfg(test)]
    pub(crate) fn seed_resolved(&self, match_url: &str, link: &str) {
        self.cache.lock().unwrap().insert(
            match_url.to_string(),
            CacheEntry::Resolved(link.to_string()),
        );
    }

    #[cfg(test)]
    fn seed_failure(&self, match_url: &str, age: Duration) {
        self.cache.lock().unwrap().insert(
            match_url.to_string(),
            CacheEntry::FailedAt(Instant::now() - age),
        );
    }
}

/// Walk the selector strategies in order and return the first href that
/// normalizes to an allowed streaming host.
fn extract_stream_link(html: &str, selectors: &[Selector]) -> Option<String> {
    let document = Html::parse_document(html);

    for selector in selectors {
        for element in document.select(selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if let Some(link) = normalize_stream_url(href) {
                if is_allowed_stream_host(&link) {
                    return Some(link);
                }
            }
        }
    }
    None
}

/// Normalize protocol-relative and plain-http links to https. Anything that
/// is not an absolute http(s) URL after normalization is rejected.
fn normalize_stream_url(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let absolute = if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else if let Some(rest) = href.strip_prefix("http://") {
        format!("https://{}", rest)
    } else if href.starts_with("https://") {
        href.to_string()
    } else {
        return None;
    };

    Url::parse(&absolute).ok().map(|u| u.to_string())
}

fn is_allowed_stream_host(link: &str) -> bool {
    let Ok(url) = Url::parse(link) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    ALLOWED_STREAM_HOSTS
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> Vec<Selector> {
        SELECTOR_STRATEGIES
            .iter()
            .map(|s| Selector::parse(s).unwrap())
            .collect()
    }

    #[test]
    fn test_extracts_first_allowed_link() {
        let html = r#"
            <div class="match-streams-container">
                <a href="https://www.twitch.tv/valorant">Main stream</a>
                <a href="https://www.youtube.com/watch?v=abc">Co-stream</a>
            </div>
        "#;
        assert_eq!(
            extract_stream_link(html, &selectors()).as_deref(),
            Some("https://www.twitch.tv/valorant")
        );
    }

    #[test]
    fn test_selector_ordering_is_the_tiebreak() {
        // The container selector comes first, so its link wins even though
        // the fallback selector would also match the second anchor.
        let html = r#"
            <div class="match-streams">
                <a class="match-streams-btn-external" href="https://www.kick.com/vct">B</a>
            </div>
            <div class="match-streams-container">
                <a href="https://www.twitch.tv/vct">A</a>
            </div>
        "#;
        assert_eq!(
            extract_stream_link(html, &selectors()).as_deref(),
            Some("https://www.twitch.tv/vct")
        );
    }

    #[test]
    fn test_disallowed_hosts_are_skipped() {
        let html = r#"
            <div class="match-streams-container">
                <a href="https://bet.example.com/promo">Sponsor</a>
                <a href="https://www.youtube.com/watch?v=xyz">Stream</a>
            </div>
        "#;
        assert_eq!(
            extract_stream_link(html, &selectors()).as_deref(),
            Some("https://www.youtube.com/watch?v=xyz")
        );
    }

    #[test]
    fn test_no_match_is_none() {
        let html = "<div class=\"content\"><a href=\"/match/123\">details</a></div>";
        assert_eq!(extract_stream_link(html, &selectors()), None);
    }

    #[test]
    fn test_normalize_protocol_relative_and_http() {
        assert_eq!(
            normalize_stream_url("//www.twitch.tv/vct").as_deref(),
            Some("https://www.twitch.tv/vct")
        );
        assert_eq!(
            normalize_stream_url("http://www.twitch.tv/vct").as_deref(),
            Some("https://www.twitch.tv/vct")
        );
        assert_eq!(
            normalize_stream_url("https://youtu.be/abc").as_deref(),
            Some("https://youtu.be/abc")
        );
        assert_eq!(normalize_stream_url("/relative/path"), None);
        assert_eq!(normalize_stream_url(""), None);
    }

    #[test]
    fn test_allowed_host_matching_includes_subdomains() {
        assert!(is_allowed_stream_host("https://www.twitch.tv/vct"));
        assert!(is_allowed_stream_host("https://twitch.tv/vct"));
        assert!(is_allowed_stream_host("https://youtu.be/abc"));
        assert!(!is_allowed_stream_host("https://nottwitch.tv/vct"));
        assert!(!is_allowed_stream_host("https://twitch.tv.evil.com/vct"));
    }

    #[tokio::test]
    async fn test_failure_cooldown_skips_rescrape() {
        let scraper =
            StreamLinkScraper::new(Duration::from_secs(1), Duration::from_secs(600)).unwrap();
        scraper.seed_failure("https://www.vlr.gg/1", Duration::from_secs(10));

        // Within cooldown: short-circuits to None without a network attempt
        // (the URL is unreachable, so a real attempt would be slow/noisy).
        assert_eq!(scraper.resolve("https://www.vlr.gg/1").await, None);
    }

    #[tokio::test]
    async fn test_forget_evicts_single_entry() {
        let scraper =
            StreamLinkScraper::new(Duration::from_secs(1), Duration::from_secs(600)).unwrap();
        scraper.seed_resolved("https://www.vlr.gg/1", "https://www.twitch.tv/vct");
        scraper.seed_resolved("https://www.vlr.gg/2", "https://www.twitch.tv/other");

        scraper.forget("https://www.vlr.gg/1");
        assert!(scraper.cached("https://www.vlr.gg/1").is_none());
        // Other entries are untouched, and forgetting again is a no-op.
        assert_eq!(
            scraper.cached("https://www.vlr.gg/2"),
            Some(Some("https://www.twitch.tv/other".to_string()))
        );
        scraper.forget("https://www.vlr.gg/1");
    }

    #[tokio::test]
    async fn test_cache_clear_forgets_failures() {
        let scraper =
            StreamLinkScraper::new(Duration::from_secs(1), Duration::from_secs(600)).unwrap();
        scraper.seed_failure("https://www.vlr.gg/1", Duration::from_secs(10));
        scraper.clear_cache();
        assert!(scraper.cached("https://www.vlr.gg/1").is_none());
    }
}
