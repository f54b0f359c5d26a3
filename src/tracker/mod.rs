pub mod scheduler;
pub mod service;
pub mod store;

pub use scheduler::{AdaptivePolling, AdaptivePollingConfig, PollingMode};
pub use service::{HealthReport, TrackerConfig, TrackerService};
pub use store::MatchStore;
