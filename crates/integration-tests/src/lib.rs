//! Shared helpers for cross-service tests
//!
//! Every service runs its real router on an ephemeral loopback port, backed by
//! an in-memory state store.

use anyhow::{Context, Result};
use axum::Router;
use chrono::{DateTime, Utc};
use inference_common::membership::{MemberRecord, NodeAddress, StaticMembership};
use inference_common::{Keypair, ManualClock, SharedClock, SharedStore, SqliteStateStore};
use inference_managing::{AppState as ManagingState, ManagingConfig, Server as ManagingServer};
use inference_miner::{AppState as MinerState, MinerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Wall-clock-like start for manual clocks
pub const START_UNIX: i64 = 1_700_000_000;

/// A router served on `127.0.0.1:0` until dropped
pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn(router: Router) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind test listener")?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self { addr, handle })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn node_address(&self) -> NodeAddress {
        NodeAddress {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            scheme: "http".to_string(),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn memory_store() -> Result<SharedStore> {
    Ok(Arc::new(SqliteStateStore::in_memory().await?))
}

pub fn member(uid: u16, identity: &str, stake: f64, address: NodeAddress) -> MemberRecord {
    MemberRecord {
        uid,
        identity: identity.to_string(),
        address,
        stake_alpha: stake,
        stake_tao: 0.0,
        stake_total: stake,
        trust: 0.0,
        last_updated: DateTime::<Utc>::from_timestamp(START_UNIX, 0).unwrap_or_default(),
    }
}

/// Address of a node that does not serve anything
pub fn unreachable_address() -> NodeAddress {
    NodeAddress {
        host: "127.0.0.1".to_string(),
        port: 9,
        scheme: "http".to_string(),
    }
}

/// A managing service over static membership
pub struct TestManaging {
    pub server: TestServer,
    pub state: ManagingState,
    pub membership: Arc<StaticMembership>,
}

impl TestManaging {
    pub async fn start(
        config: ManagingConfig,
        nodes: Vec<MemberRecord>,
        clock: SharedClock,
    ) -> Result<Self> {
        let membership = Arc::new(StaticMembership::new(nodes));
        let state = ManagingState::new(config, memory_store().await?, membership.clone(), clock);
        let server = TestServer::spawn(ManagingServer::build_router(state.clone())).await?;
        Ok(Self {
            server,
            state,
            membership,
        })
    }
}

/// A miner answering as `keypair`, optionally restricted to `allowed` callers
pub async fn start_miner(keypair: &Keypair, allowed: &[&str], clock: SharedClock) -> Result<TestServer> {
    let mut config = MinerConfig::default();
    config.auth.allowed_validators = allowed.iter().map(|id| id.to_string()).collect();
    let state = MinerState::new(config, keypair.identity(), clock);
    TestServer::spawn(inference_miner::build_router(state)).await
}

pub fn manual_clock() -> ManualClock {
    ManualClock::at_unix(START_UNIX)
}
