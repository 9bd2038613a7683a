//! Webhook signature primitives.
//!
//! All comparisons are constant-time; every decoding problem is reported as
//! a failed check.

use crate::error::{PaymentError, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `message` keyed by `secret`.
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|e| PaymentError::Crypto(format!("invalid HMAC key: {e}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex HMAC-SHA256 `signature` of `payload`.
pub fn verify_hmac_sha256(payload: &[u8], signature: &str, secret: &[u8]) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Hex SHA-256 of `message`.
pub fn sha256_hex(message: &[u8]) -> String {
    hex::encode(Sha256::digest(message))
}

/// Case-insensitive constant-time comparison of two hex digests.
pub fn hex_digest_eq(expected: &str, provided: &str) -> bool {
    let expected = expected.trim().to_ascii_lowercase();
    let provided = provided.trim().to_ascii_lowercase();
    if provided.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
