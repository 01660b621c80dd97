//! # Inference Miner
//!
//! Serves one route per registered challenge. Every request must carry a
//! fresh message signed by the calling validator and addressed to this miner.

pub mod auth;
pub mod config;
pub mod error;
pub mod server;

pub use config::MinerConfig;
pub use error::{MinerError, Result};
pub use server::{build_router, AppState};

/// Version of the inference-miner crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
