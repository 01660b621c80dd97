//! # Inference Sidecar
//!
//! Mirrors the ledger's metagraph into the shared state store on a fixed
//! interval and serves the stored snapshot to the rest of the network.

pub mod config;
pub mod error;
pub mod ledger;
pub mod server;
pub mod sync;

pub use config::SidecarConfig;
pub use error::{Result, SidecarError};
pub use server::{build_router, AppState};

/// Version of the inference-sidecar crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
