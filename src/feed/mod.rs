pub mod breaker;
pub mod client;
pub mod error;
pub mod models;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client::{FeedClient, FeedClientConfig};
pub use error::FeedError;
pub use models::{MatchSnapshot, Transition};
