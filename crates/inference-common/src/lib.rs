//! # Inference Common
//!
//! Building blocks shared by the managing, validator, miner and sidecar
//! services:
//!
//! - **State store**: the key-value store with expiries, atomic counters and
//!   sliding windows that holds every piece of shared state
//! - **Membership**: the network snapshot, its TTL cache and the sidecar client
//! - **Identity and auth**: ed25519 identities and signed miner requests
//! - **Protocol**: challenge registry and wire types of every HTTP API

pub mod auth;
pub mod clock;
pub mod config;
pub mod identity;
pub mod membership;
pub mod protocol;
pub mod store;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigValidation, ConfigurationError};
pub use identity::Keypair;
pub use store::{SharedStore, SqliteStateStore, StateStore, StoreError};

/// Version of the inference-common crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
