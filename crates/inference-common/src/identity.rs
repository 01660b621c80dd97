//! Network identities and the signing primitive
//!
//! An identity is the lowercase hex encoding of a 32-byte ed25519 public key.
//! Wallet key files are JSON documents holding the secret seed.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid identity {identity}: {reason}")]
    InvalidIdentity { identity: String, reason: String },

    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Failed to read key file {path}: {reason}")]
    KeyFile { path: String, reason: String },
}

/// Signing key pair of the local process
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    identity: String,
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletFile {
    secret_seed: String,
}

impl Keypair {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let identity = hex::encode(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            identity,
        }
    }

    /// Fresh random key pair
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let identity = hex::encode(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            identity,
        }
    }

    /// Parse a `0x`-optional hex seed
    pub fn from_hex_seed(seed: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(strip_hex_prefix(seed)).map_err(|e| {
            IdentityError::InvalidIdentity {
                identity: "<seed>".to_string(),
                reason: e.to_string(),
            }
        })?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidIdentity {
                identity: "<seed>".to_string(),
                reason: "seed must be 32 bytes".to_string(),
            })?;
        Ok(Self::from_seed(seed))
    }

    /// Load a wallet key file (`{"secretSeed": "0x..."}`)
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let key_file_error = |reason: String| IdentityError::KeyFile {
            path: path.display().to_string(),
            reason,
        };
        let contents = std::fs::read_to_string(path).map_err(|e| key_file_error(e.to_string()))?;
        let wallet: WalletFile =
            serde_json::from_str(&contents).map_err(|e| key_file_error(e.to_string()))?;
        Self::from_hex_seed(&wallet.secret_seed)
    }

    /// Serialize this key pair in the wallet file format
    pub fn to_wallet_json(&self) -> String {
        serde_json::json!({
            "secretSeed": format!("0x{}", hex::encode(self.signing_key.to_bytes())),
        })
        .to_string()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Sign `message`, returning a `0x`-prefixed hex signature
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        format!("0x{}", hex::encode(signature.to_bytes()))
    }
}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Parse an identity string into a verifying key
pub fn parse_identity(identity: &str) -> Result<VerifyingKey, IdentityError> {
    let invalid = |reason: String| IdentityError::InvalidIdentity {
        identity: identity.to_string(),
        reason,
    };
    let bytes = hex::decode(strip_hex_prefix(identity)).map_err(|e| invalid(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| invalid("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| invalid(e.to_string()))
}

/// Verify a hex signature (with or without `0x`) over `message`
pub fn verify_signature(
    identity: &str,
    message: &[u8],
    signature: &str,
) -> Result<(), IdentityError> {
    let key = parse_identity(identity)?;
    let bytes = hex::decode(strip_hex_prefix(signature))
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    let signature = Signature::from_slice(&bytes)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    key.verify(message, &signature)
        .map_err(|_| IdentityError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::from_seed([7u8; 32]);
        let signature = keypair.sign(b"hello");

        assert!(signature.starts_with("0x"));
        verify_signature(keypair.identity(), b"hello", &signature).unwrap();
        verify_signature(keypair.identity(), b"hello", &signature[2..]).unwrap();
        assert!(matches!(
            verify_signature(keypair.identity(), b"other", &signature),
            Err(IdentityError::VerificationFailed)
        ));
    }

    #[test]
    fn test_identity_is_lowercase_hex() {
        let keypair = Keypair::generate();
        assert_eq!(keypair.identity().len(), 64);
        assert!(keypair
            .identity()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_wallet_file_round_trip() {
        let keypair = Keypair::generate();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), keypair.to_wallet_json()).unwrap();

        let loaded = Keypair::load(file.path()).unwrap();
        assert_eq!(loaded.identity(), keypair.identity());
    }

    #[test]
    fn test_rejects_malformed_identity() {
        assert!(parse_identity("not-hex").is_err());
        assert!(parse_identity("abcd").is_err());
    }
}
