//! Request authentication between validators and miners
//!
//! Every miner-bound request carries two headers: a message
//! `minerIdentity:callerIdentity:nonce` (nonce = caller clock in unix
//! nanoseconds) and the caller's signature over that message.

use crate::clock::SharedClock;
use crate::identity::{verify_signature, Keypair};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const MESSAGE_HEADER: &str = "message";
pub const SIGNATURE_HEADER: &str = "signature";

/// Freshness window used by the network, in seconds
pub const DEFAULT_FRESHNESS_SECS: i64 = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Malformed auth message: {0}")]
    MalformedMessage(String),

    #[error("Message addressed to miner {received}, expected {expected}")]
    WrongMiner { expected: String, received: String },

    #[error("Caller {0} is not an allowed validator")]
    CallerNotAllowed(String),

    #[error("Request expired: nonce is {age_ms} ms old")]
    Expired { age_ms: i64 },

    #[error("Request nonce is in the future")]
    FromFuture,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Message already used")]
    Replayed,
}

impl AuthError {
    /// Allow-list rejections are authorization failures; everything else is
    /// an authentication failure
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AuthError::CallerNotAllowed(_))
    }
}

/// Parsed auth message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMessage {
    pub miner_identity: String,
    pub caller_identity: String,
    pub nonce_ns: i64,
}

impl fmt::Display for AuthMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.miner_identity, self.caller_identity, self.nonce_ns
        )
    }
}

impl FromStr for AuthMessage {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [miner, caller, nonce] = parts.as_slice() else {
            return Err(AuthError::MalformedMessage(format!(
                "expected 3 fields, got {}",
                parts.len()
            )));
        };
        if miner.is_empty() || caller.is_empty() {
            return Err(AuthError::MalformedMessage("empty identity".to_string()));
        }
        let nonce_ns = nonce
            .parse::<i64>()
            .map_err(|e| AuthError::MalformedMessage(format!("bad nonce: {e}")))?;

        Ok(Self {
            miner_identity: miner.to_string(),
            caller_identity: caller.to_string(),
            nonce_ns,
        })
    }
}

fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1_000))
}

/// Header values for one signed request
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub message: String,
    pub signature: String,
}

/// Signs outgoing miner requests with the local key pair
#[derive(Clone)]
pub struct RequestSigner {
    keypair: Arc<Keypair>,
    clock: SharedClock,
}

impl RequestSigner {
    pub fn new(keypair: Arc<Keypair>, clock: SharedClock) -> Self {
        Self { keypair, clock }
    }

    pub fn identity(&self) -> &str {
        self.keypair.identity()
    }

    pub fn sign_for(&self, miner_identity: &str) -> SignedHeaders {
        let message = AuthMessage {
            miner_identity: miner_identity.to_string(),
            caller_identity: self.keypair.identity().to_string(),
            nonce_ns: nanos(self.clock.now()),
        }
        .to_string();
        let signature = self.keypair.sign(message.as_bytes());
        SignedHeaders { message, signature }
    }
}

/// Verification policy of a receiving miner
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Identity the miner answers to
    pub miner_identity: String,
    /// Maximum nonce age and maximum forward clock skew
    pub freshness: Duration,
    /// Accepted callers; empty accepts any correctly signed caller
    pub allowed_callers: HashSet<String>,
}

impl VerifierConfig {
    pub fn new(miner_identity: impl Into<String>) -> Self {
        Self {
            miner_identity: miner_identity.into(),
            freshness: Duration::seconds(DEFAULT_FRESHNESS_SECS),
            allowed_callers: HashSet::new(),
        }
    }
}

/// Verifies incoming signed requests
#[derive(Clone)]
pub struct RequestVerifier {
    config: VerifierConfig,
    clock: SharedClock,
    /// Accepted messages and when they were accepted
    seen_messages: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl RequestVerifier {
    pub fn new(config: VerifierConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            seen_messages: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn miner_identity(&self) -> &str {
        &self.config.miner_identity
    }

    /// Run every check in order, returning the caller identity on success
    pub async fn verify(
        &self,
        message: Option<&str>,
        signature: Option<&str>,
    ) -> Result<AuthMessage, AuthError> {
        let message = message.ok_or(AuthError::MissingHeader(MESSAGE_HEADER))?;
        let signature = signature.ok_or(AuthError::MissingHeader(SIGNATURE_HEADER))?;

        let parsed: AuthMessage = message.parse()?;

        if parsed.miner_identity != self.config.miner_identity {
            return Err(AuthError::WrongMiner {
                expected: self.config.miner_identity.clone(),
                received: parsed.miner_identity,
            });
        }

        if !self.config.allowed_callers.is_empty()
            && !self.config.allowed_callers.contains(&parsed.caller_identity)
        {
            return Err(AuthError::CallerNotAllowed(parsed.caller_identity));
        }

        let now = self.clock.now();
        let window_ns = self.config.freshness.num_nanoseconds().unwrap_or(i64::MAX);
        let age_ns = nanos(now).saturating_sub(parsed.nonce_ns);
        if age_ns > window_ns {
            return Err(AuthError::Expired {
                age_ms: age_ns / 1_000_000,
            });
        }
        if age_ns < -window_ns {
            return Err(AuthError::FromFuture);
        }

        if let Err(e) = verify_signature(&parsed.caller_identity, message.as_bytes(), signature) {
            warn!(
                "Signature verification failed for caller {}: {}",
                parsed.caller_identity, e
            );
            return Err(AuthError::InvalidSignature);
        }

        let mut seen = self.seen_messages.write().await;
        if seen.contains_key(message) {
            return Err(AuthError::Replayed);
        }
        seen.insert(message.to_string(), now);

        let cutoff = now - self.config.freshness * 2;
        seen.retain(|_, accepted_at| *accepted_at > cutoff);
        drop(seen);

        debug!("Verified request from caller {}", parsed.caller_identity);
        Ok(parsed)
    }
}
