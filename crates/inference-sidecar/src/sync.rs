//! Periodic metagraph sync into the shared state store

use crate::ledger::LedgerSource;
use anyhow::{Context, Result};
use inference_common::membership::NodesResponse;
use inference_common::store::keys;
use inference_common::{SharedClock, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct MetagraphSync {
    source: Arc<dyn LedgerSource>,
    store: SharedStore,
    clock: SharedClock,
    netuid: u16,
    interval: Duration,
}

impl MetagraphSync {
    pub fn new(
        source: Arc<dyn LedgerSource>,
        store: SharedStore,
        clock: SharedClock,
        netuid: u16,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            netuid,
            interval,
        }
    }

    pub fn snapshot_key(&self) -> String {
        keys::node_infos(self.netuid)
    }

    /// Fetch, convert and store one snapshot; returns the node count
    pub async fn sync_once(&self) -> Result<usize> {
        info!(
            "Fetching metagraph for netuid {} from {}",
            self.netuid,
            self.source.describe()
        );
        let raw = self.source.fetch_metagraph(self.netuid).await?;
        let nodes = raw.to_members();
        let count = nodes.len();

        let value = serde_json::to_string(&NodesResponse { nodes })
            .context("Failed to serialize membership snapshot")?;
        self.store
            .set(
                &self.snapshot_key(),
                &value,
                Some(self.interval * 3),
                self.clock.now(),
            )
            .await
            .context("Failed to store membership snapshot")?;

        info!(netuid = self.netuid, nodes = count, "Membership snapshot updated");
        Ok(count)
    }

    /// Drop the previous snapshot, then sync every interval until aborted
    pub async fn run(self) {
        if let Err(e) = self.store.delete(&self.snapshot_key()).await {
            warn!("Failed to reset membership snapshot: {}", e);
        }

        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sync_once().await {
                warn!("Metagraph sync failed, retrying next interval: {:#}", e);
            }
        }
    }
}
