// src/signature.rs
//! HMAC-SHA256 webhook signatures.
//!
//! Signatures travel as lowercase hex, optionally prefixed with `sha256=`.
//! Verification compares digests in constant time and fails closed when the
//! header is missing or malformed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

fn mac_for(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"))
}

/// Hex-encoded HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = mac_for(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks `signature_header` against the HMAC of `raw_body`.
pub fn verify(raw_body: &[u8], signature_header: &str, shared_secret: &str) -> bool {
    let provided = signature_header.trim();
    let provided = provided.strip_prefix(SIGNATURE_PREFIX).unwrap_or(provided);
    if provided.is_empty() {
        return false;
    }
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };

    let mut mac = mac_for(shared_secret);
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();
    expected.as_slice().ct_eq(provided.as_slice()).into()
}

/// Constant-time equality for plain shared keys (no HMAC involved).
pub fn keys_match(provided: &str, expected: &str) -> bool {
    if provided.is_empty() || expected.is_empty() {
        return false;
    }
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Response token for a Twitter CRC challenge: `sha256=<hex hmac of token>`.
pub fn crc_response_token(crc_token: &str, secret: &str) -> String {
    format!("{SIGNATURE_PREFIX}{}", sign(crc_token.as_bytes(), secret))
}
