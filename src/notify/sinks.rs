use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use super::Sink;
use crate::feed::models::Transition;

/// Sink backing the live WebSocket topic: transitions are pushed onto a
/// broadcast channel that each connected socket subscribes to.
pub struct BroadcastSink {
    tx: broadcast::Sender<Transition>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<Transition>) -> Self {
        BroadcastSink { tx }
    }
}

#[async_trait]
impl Sink for BroadcastSink {
    async fn deliver(&self, transition: &Transition) -> Result<()> {
        // No subscribers is normal (nobody watching the dashboard); the
        // transition is simply dropped, matching at-most-once semantics.
        if self.tx.send(transition.clone()).is_err() {
            debug!("No WebSocket subscribers for {} transition", transition.kind());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "websocket-topic"
    }
}

/// Chat sink posting embed-style messages to a Discord-compatible webhook.
pub struct DiscordWebhookSink {
    http: Client,
    webhook_url: String,
    username: String,
}

impl DiscordWebhookSink {
    pub fn new(webhook_url: &str, username: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(DiscordWebhookSink {
            http,
            webhook_url: webhook_url.to_string(),
            username: username.to_string(),
        })
    }

    fn build_payload(&self, transition: &Transition) -> serde_json::Value {
        let snapshot = transition.snapshot();
        let (title, color) = match transition {
            Transition::New { .. } => ("🎮 Live Match Started", 0xe74c3c),
            Transition::Updated { .. } => ("🔄 Match Update", 0x3498db),
            Transition::Completed { .. } => ("🏁 Match Completed", 0x808080),
        };

        let score_label = match transition {
            Transition::Completed { .. } => "Final Score",
            _ => "Current Score",
        };
        let score = format!(
            "{} - {}",
            snapshot.score1.as_deref().unwrap_or("?"),
            snapshot.score2.as_deref().unwrap_or("?")
        );

        let mut embed = json!({
            "title": title,
            "description": format!("**{}** vs **{}**", snapshot.team1, snapshot.team2),
            "color": color,
            "timestamp": Utc::now().to_rfc3339(),
            "fields": [
                { "name": "Event", "value": snapshot.match_event.as_deref().unwrap_or("Unknown"), "inline": false },
                { "name": "Series", "value": snapshot.match_series.as_deref().unwrap_or("Unknown"), "inline": false },
                { "name": score_label, "value": score, "inline": false },
            ],
        });
        if let Some(stream) = &snapshot.stream_link {
            embed["url"] = json!(stream);
        }

        json!({
            "username": self.username,
            "embeds": [embed],
        })
    }
}

#[async_trait]
impl Sink for DiscordWebhookSink {
    async fn deliver(&self, transition: &Transition) -> Result<()> {
        let payload = self.build_payload(transition);

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("Webhook request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Webhook returned status {}", resp.status());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "discord-webhook"
    }
}
