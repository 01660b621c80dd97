//! HTTP server of the membership sidecar

use crate::config::SidecarConfig;
use crate::error::{Result, SidecarError};
use crate::ledger::LedgerSource;
use crate::sync::MetagraphSync;
use axum::{extract::State, routing::get, Json, Router};
use inference_common::membership::{MembershipSnapshot, SidecarStatus};
use inference_common::protocol::HealthResponse;
use inference_common::store::keys;
use inference_common::{SharedClock, SharedStore};
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SidecarConfig>,
    pub store: SharedStore,
    pub clock: SharedClock,
    /// Identity of the sidecar's own wallet
    pub identity: String,
}

impl AppState {
    async fn snapshot(&self) -> Result<MembershipSnapshot> {
        let netuid = self.config.ledger.netuid;
        let stored = self
            .store
            .get(&keys::node_infos(netuid), self.clock.now())
            .await?
            .ok_or(SidecarError::SnapshotUnavailable { netuid })?;
        Ok(serde_json::from_str(&stored)?)
    }
}

async fn get_nodes(State(state): State<AppState>) -> Result<Json<MembershipSnapshot>> {
    Ok(Json(state.snapshot().await?))
}

async fn get_status(State(state): State<AppState>) -> Result<Json<SidecarStatus>> {
    let snapshot = state.snapshot().await?;
    Ok(Json(SidecarStatus {
        uid: snapshot.uid(&state.identity),
        identity: state.identity,
    }))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy(crate::VERSION))
}

pub fn build_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.server.request_timeout()));

    Router::new()
        .route("/api/nodes", get(get_nodes))
        .route("/api/status", get(get_status))
        .route("/api/health", get(health_check))
        .layer(middleware)
        .with_state(state)
}

/// Run the sync loop and serve until shutdown
pub async fn run(state: AppState, source: Arc<dyn LedgerSource>) -> anyhow::Result<()> {
    let addr = state.config.server.bind_address;
    let sync = MetagraphSync::new(
        source,
        state.store.clone(),
        state.clock.clone(),
        state.config.ledger.netuid,
        state.config.ledger.sync_interval(),
    );
    let sync_task = tokio::spawn(sync.run());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to address {addr}: {e}"))?;
    info!("Inference sidecar listening on {}", addr);

    let result = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {e}"));

    sync_task.abort();
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, shutting down"),
        _ = terminate => warn!("Received terminate signal, shutting down"),
    }
}
