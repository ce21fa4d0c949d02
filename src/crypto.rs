//! Caller proof for user-scoped endpoints.
//!
//! User ids are hex-encoded SEC1 P-256 public keys. A caller proves control
//! of the id by signing a fixed challenge string; the server never stores
//! secrets and the proof carries no replayable server state.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};

use crate::error::{AppError, Result};

pub const CALLER_PROOF_MESSAGE: &str = "subsync caller proof v1";

/// Check that `signature_b64` is a valid signature of the challenge string
/// under the public key encoded in `user_id`. Accepts DER and fixed-size
/// signature encodings; any decoding or verification failure is the same
/// `Unauthorized`, details go to the log only.
pub fn verify_caller(user_id: &str, signature_b64: &str) -> Result<()> {
    let key_bytes = hex::decode(user_id).map_err(|err| {
        tracing::debug!("Caller proof: user id is not hex: {}", err);
        AppError::Unauthorized
    })?;
    let key = VerifyingKey::from_sec1_bytes(&key_bytes).map_err(|err| {
        tracing::debug!("Caller proof: user id is not a P-256 key: {}", err);
        AppError::Unauthorized
    })?;

    let sig_bytes = BASE64.decode(signature_b64).map_err(|err| {
        tracing::debug!("Caller proof: signature is not base64: {}", err);
        AppError::Unauthorized
    })?;
    let signature = Signature::from_der(&sig_bytes)
        .or_else(|_| Signature::from_slice(&sig_bytes))
        .map_err(|err| {
            tracing::debug!("Caller proof: signature is malformed: {}", err);
            AppError::Unauthorized
        })?;

    key.verify(CALLER_PROOF_MESSAGE.as_bytes(), &signature)
        .map_err(|_| AppError::Unauthorized)
}
