pub mod sinks;

pub use sinks::{BroadcastSink, DiscordWebhookSink};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::feed::models::Transition;

/// Any consumer of match transitions: the WebSocket topic, a chat webhook,
/// future sinks. Registered once at startup; the dispatcher is agnostic to
/// how many there are.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, transition: &Transition) -> Result<()>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Fans each transition out to every registered sink, at most once per sink.
///
/// Delivery is best-effort: a failing or slow sink is isolated behind its
/// own timeout and never fails the poll cycle or starves the other sinks.
pub struct Dispatcher {
    sinks: Vec<Arc<dyn Sink>>,
    delivery_timeout: Duration,
}

impl Dispatcher {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, delivery_timeout: Duration) -> Self {
        Dispatcher {
            sinks,
            delivery_timeout,
        }
    }

    pub async fn dispatch(&self, transition: &Transition) {
        debug!(
            "Dispatching {} transition for {} to {} sink(s)",
            transition.kind(),
            transition.match_id(),
            self.sinks.len()
        );

        let deliveries = self.sinks.iter().map(|sink| {
            let sink = Arc::clone(sink);
            async move {
                match tokio::time::timeout(self.delivery_timeout, sink.deliver(transition)).await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("Sink '{}' failed to deliver: {}", sink.name(), e);
                    }
                    Err(_) => {
                        warn!(
                            "Sink '{}' timed out after {:?}",
                            sink.name(),
                            self.delivery_timeout
                        );
                    }
                }
            }
        });

        futures_util::future::join_all(deliveries).await;
    }
}
