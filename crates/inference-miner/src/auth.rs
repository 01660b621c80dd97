//! Signed-request extractor
//!
//! Handlers that take an [`AuthenticatedCaller`] only run once the request's
//! message and signature headers have passed every verification check.

use crate::error::MinerError;
use crate::server::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use inference_common::auth::{MESSAGE_HEADER, SIGNATURE_HEADER};
use tracing::{debug, warn};

/// Identity of a verified caller
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller {
    pub identity: String,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedCaller {
    type Rejection = MinerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let verified = state
            .verifier
            .verify(
                header(&parts.headers, MESSAGE_HEADER),
                header(&parts.headers, SIGNATURE_HEADER),
            )
            .await
            .map_err(|e| {
                warn!("Rejected request to {}: {}", parts.uri.path(), e);
                MinerError::from(e)
            })?;

        debug!("Authenticated caller {}", verified.caller_identity);
        Ok(AuthenticatedCaller {
            identity: verified.caller_identity,
        })
    }
}
