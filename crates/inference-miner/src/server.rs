//! HTTP server of the miner

use crate::auth::AuthenticatedCaller;
use crate::config::MinerConfig;
use crate::error::{MinerError, Result};
use axum::{
    extract::rejection::JsonRejection,
    routing::{get, post},
    Json, Router,
};
use inference_common::auth::{RequestVerifier, VerifierConfig};
use inference_common::protocol::{
    ArithmeticResponse, Challenge, ChallengePayload, HealthResponse,
};
use inference_common::SharedClock;
use serde_json::Value;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MinerConfig>,
    pub verifier: RequestVerifier,
}

impl AppState {
    /// State for a miner answering as `identity`
    pub fn new(config: MinerConfig, identity: &str, clock: SharedClock) -> Self {
        let mut verifier_config = VerifierConfig::new(identity);
        verifier_config.freshness = chrono::Duration::seconds(config.auth.freshness_secs);
        verifier_config.allowed_callers = config.auth.allowed_validators.iter().cloned().collect();

        Self {
            config: Arc::new(config),
            verifier: RequestVerifier::new(verifier_config, clock),
        }
    }
}

async fn solve_challenge(
    challenge: Challenge,
    caller: AuthenticatedCaller,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<ArithmeticResponse>> {
    let Json(value) = body.map_err(|rejection| MinerError::InvalidPayload {
        message: rejection.body_text(),
    })?;
    let payload = challenge
        .decode_payload(value)
        .map_err(|e| MinerError::InvalidPayload {
            message: e.to_string(),
        })?;

    let operands = match payload {
        ChallengePayload::Addition(operands) | ChallengePayload::Multiplication(operands) => {
            operands
        }
    };
    let response = challenge.solve(&operands).map_err(MinerError::Unsolvable)?;

    debug!(
        caller = %caller.identity,
        "Solved {} challenge",
        challenge
    );
    Ok(Json(response))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy(crate::VERSION))
}

/// One POST route per registered challenge plus health
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new().route("/api/health", get(health_check));
    for challenge in Challenge::ALL {
        router = router.route(
            challenge.api_route(),
            post(
                move |caller: AuthenticatedCaller,
                      body: std::result::Result<Json<Value>, JsonRejection>| {
                    solve_challenge(challenge, caller, body)
                },
            ),
        );
    }

    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.server.request_timeout()));

    router.layer(middleware).with_state(state)
}

/// Serve until Ctrl+C or SIGTERM
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.server.bind_address;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to address {addr}: {e}"))?;
    info!("Inference miner listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {e}"))
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
