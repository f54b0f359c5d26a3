use serde::{Deserialize, Serialize};
use url::Url;

/// One feed-reported state of a live match at a single poll tick.
///
/// The VLR-style feed reports every numeric field as a string, so they are
/// kept as strings here and compared as strings. `match_page` (the canonical
/// match URL) is the stable identifier. `stream_link` is never present in the
/// feed payload; it is filled in later by the enrichment scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSnapshot {
    #[serde(default)]
    pub team1: String,
    #[serde(default)]
    pub team2: String,
    pub flag1: Option<String>,
    pub flag2: Option<String>,
    pub score1: Option<String>,
    pub score2: Option<String>,
    pub team1_round_ct: Option<String>,
    pub team1_round_t: Option<String>,
    pub team2_round_ct: Option<String>,
    pub team2_round_t: Option<String>,
    pub map_number: Option<String>,
    pub current_map: Option<String>,
    pub time_until_match: Option<String>,
    pub match_event: Option<String>,
    pub match_series: Option<String>,
    pub unix_timestamp: Option<String>,
    #[serde(default)]
    pub match_page: String,
    /// Scraped later; never part of the feed JSON.
    #[serde(default)]
    pub stream_link: Option<String>,
}

impl MatchSnapshot {
    /// Stable identifier for this match (the canonical match-page URL).
    pub fn id(&self) -> &str {
        &self.match_page
    }

    /// A record is usable only if it carries an identifier, both team names
    /// and a syntactically valid match-page URL. Anything else is dropped
    /// from the batch without failing the fetch.
    pub fn is_valid(&self) -> bool {
        if self.match_page.trim().is_empty() {
            return false;
        }
        if self.team1.trim().is_empty() || self.team2.trim().is_empty() {
            return false;
        }
        Url::parse(&self.match_page).is_ok()
    }

    /// True when the scoreline moved: either map score or any of the four
    /// round counters differs.
    pub fn has_score_change(&self, other: &MatchSnapshot) -> bool {
        self.score1 != other.score1
            || self.score2 != other.score2
            || self.team1_round_ct != other.team1_round_ct
            || self.team1_round_t != other.team1_round_t
            || self.team2_round_ct != other.team2_round_ct
            || self.team2_round_t != other.team2_round_t
    }

    /// Whether the difference between two successive snapshots is worth a
    /// notification. Cosmetic fields (flags, logos, event labels) are
    /// deliberately excluded to avoid notification spam downstream.
    pub fn has_significant_change(&self, other: &MatchSnapshot) -> bool {
        self.has_score_change(other)
            || self.current_map != other.current_map
            || self.stream_link != other.stream_link
            || self.time_until_match != other.time_until_match
    }

    pub fn describe(&self) -> String {
        format!(
            "{} vs {} ({}-{})",
            self.team1,
            self.team2,
            self.score1.as_deref().unwrap_or("?"),
            self.score2.as_deref().unwrap_or("?")
        )
    }
}

/// Top-level feed response: `{ "data": { "status": ..., "segments": [...] } }`
#[derive(Debug, Deserialize)]
pub struct LiveFeedPayload {
    pub data: Option<LiveFeedData>,
}

#[derive(Debug, Deserialize)]
pub struct LiveFeedData {
    #[allow(dead_code)]
    pub status: Option<i64>,
    pub segments: Option<Vec<MatchSnapshot>>,
}

/// A classified change between successive snapshots of one match.
/// Produced once per poll cycle per affected match and handed straight to
/// the dispatcher; never retained.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    New { snapshot: MatchSnapshot },
    Updated { old: MatchSnapshot, new: MatchSnapshot },
    Completed { snapshot: MatchSnapshot },
}

impl Transition {
    pub fn match_id(&self) -> &str {
        match self {
            Transition::New { snapshot } => snapshot.id(),
            Transition::Updated { new, .. } => new.id(),
            Transition::Completed { snapshot } => snapshot.id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transition::New { .. } => "new",
            Transition::Updated { .. } => "updated",
            Transition::Completed { .. } => "completed",
        }
    }

    pub fn snapshot(&self) -> &MatchSnapshot {
        match self {
            Transition::New { snapshot } => snapshot,
            Transition::Updated { new, .. } => new,
            Transition::Completed { snapshot } => snapshot,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_snapshot(page: &str, score1: &str, score2: &str) -> MatchSnapshot {
    MatchSnapshot {
        team1: "Sentinels".into(),
        team2: "Fnatic".into(),
        flag1: Some("us".into()),
        flag2: Some("eu".into()),
        score1: Some(score1.into()),
        score2: Some(score2.into()),
        team1_round_ct: Some("4".into()),
        team1_round_t: Some("5".into()),
        team2_round_ct: Some("3".into()),
        team2_round_t: Some("1".into()),
        map_number: Some("2".into()),
        current_map: Some("Ascent".into()),
        time_until_match: Some("LIVE".into()),
        match_event: Some("Champions Tour".into()),
        match_series: Some("Playoffs".into()),
        unix_timestamp: Some("1700000000".into()),
        match_page: page.into(),
        stream_link: None,
    }
}
