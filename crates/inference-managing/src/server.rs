//! HTTP server of the managing service

use crate::{
    api,
    config::ManagingConfig,
    error::{ManagingError, Result},
    quota::QuotaLedger,
    scores::ScoreStore,
    selection::SelectionEngine,
    tasks,
};
use axum::Router;
use inference_common::membership::{MembershipCache, MembershipSource, SidecarClient};
use inference_common::{SharedClock, SharedStore, SqliteStateStore, SystemClock};
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Main server structure
pub struct Server {
    config: Arc<ManagingConfig>,
    state: AppState,
    app: Router,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ManagingConfig>,
    pub store: SharedStore,
    pub clock: SharedClock,
    pub membership: Arc<MembershipCache>,
    pub quota: Arc<QuotaLedger>,
    pub scores: Arc<ScoreStore>,
    pub selection: Arc<SelectionEngine>,
}

impl AppState {
    /// Wire the ledger, score store and selection engine over one store
    pub fn new(
        config: ManagingConfig,
        store: SharedStore,
        source: Arc<dyn MembershipSource>,
        clock: SharedClock,
    ) -> Self {
        let config = Arc::new(config);

        let membership = Arc::new(MembershipCache::new(
            source,
            clock.clone(),
            chrono::Duration::seconds(config.membership.cache_ttl_secs as i64),
            chrono::Duration::seconds(config.membership.max_staleness_secs as i64),
        ));
        let quota = Arc::new(QuotaLedger::new(
            store.clone(),
            membership.clone(),
            clock.clone(),
            config.quota.clone(),
        ));
        let scores = Arc::new(ScoreStore::new(
            store.clone(),
            clock.clone(),
            config.scores.history_len,
            config.score_ttl(),
        ));
        let selection = Arc::new(SelectionEngine::new(
            quota.clone(),
            scores.clone(),
            membership.clone(),
        ));

        Self {
            config,
            store,
            clock,
            membership,
            quota,
            scores,
            selection,
        }
    }
}

impl Server {
    /// Connect the store and sidecar, then build the router
    pub async fn new(config: ManagingConfig) -> Result<Self> {
        info!("Initializing inference managing service");

        let store = SqliteStateStore::connect(&config.store.url, config.store.max_connections)
            .await
            .map_err(|e| ManagingError::Internal {
                message: format!("Failed to open state store {}: {e}", config.store.url),
            })?;

        let sidecar = SidecarClient::new(
            config.sidecar.base_url.clone(),
            config.sidecar.request_timeout(),
        )
        .map_err(|e| ManagingError::Internal {
            message: format!("Failed to create sidecar client: {e}"),
        })?;
        info!("Reading membership from sidecar at {}", config.sidecar.base_url);

        let state = AppState::new(
            config,
            Arc::new(store),
            Arc::new(sidecar),
            SystemClock::shared(),
        );
        Ok(Self::from_state(state))
    }

    pub fn from_state(state: AppState) -> Self {
        let app = Self::build_router(state.clone());
        Self {
            config: state.config.clone(),
            state,
            app,
        }
    }

    /// Build the application router with all routes and middleware
    pub fn build_router(state: AppState) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let middleware = ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(state.config.server.request_timeout()))
            .layer(cors);

        Router::new()
            .merge(api::routes())
            .layer(middleware)
            .with_state(state)
    }

    /// Run the server and background tasks until shutdown signal
    pub async fn run(self) -> Result<()> {
        let addr = self.config.server.bind_address;

        // Prime allotments so the first consume does not pay for a recompute
        if let Err(e) = self.state.quota.recompute_allotments().await {
            warn!("Initial allotment computation failed: {}", e);
        }
        let background = tasks::spawn_background_tasks(&self.state);

        info!("Starting HTTP server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ManagingError::Internal {
                message: format!("Failed to bind to address {addr}: {e}"),
            })?;

        info!("Inference managing service listening on {}", addr);

        let result = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ManagingError::Internal {
                message: format!("Server error: {e}"),
            });

        for handle in background {
            handle.abort();
        }
        result
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
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
        _ = ctrl_c => {
            warn!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            warn!("Received terminate signal, shutting down");
        },
    }
}
