//! # Inference Validator
//!
//! Drives orchestration rounds against the inference network: fetches a
//! challenge payload, obtains a quota-checked batch of miners from the
//! managing service, dispatches signed requests concurrently, gates scoring
//! through a per-miner sliding window and reports scores back.

pub mod cli;
pub mod clients;
pub mod config;
pub mod metrics;
pub mod orchestrator;
pub mod window;

pub use cli::{Args, Command};
pub use config::ValidatorConfig;
pub use orchestrator::{MinerOutcome, MinerReport, Orchestrator, RoundClients, RoundReport};
pub use window::ScoreTrackingWindow;

/// Validator library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
