//! Signature verification for inbound webhooks

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

pub const SHA1_PREFIX: &str = "sha1=";
pub const SHA256_PREFIX: &str = "sha256=";

/// Compute the lower-case hex HMAC-SHA1 of `message` keyed by `secret`.
pub fn compute_hmac_sha1_hex(secret: &str, message: &[u8]) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Compute the lower-case hex HMAC-SHA256 of `message` keyed by `secret`.
pub fn compute_hmac_sha256_hex(secret: &str, message: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a `sha1=<hex>` signature over `message`.
///
/// The expected value is rebuilt as `"sha1=" + hex(hmac)` and compared in
/// constant time against `provided`. Returns `false` for an empty secret or
/// anything malformed.
pub fn verify_hmac_sha1(secret: &str, message: &[u8], provided: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    match compute_hmac_sha1_hex(secret, message) {
        Some(digest) => constant_time_str_eq(&format!("{SHA1_PREFIX}{digest}"), provided.trim()),
        None => false,
    }
}

/// Verify a `sha256=<hex>` signature over `message` (GitHub's newer header).
pub fn verify_hmac_sha256(secret: &str, message: &[u8], provided: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    match compute_hmac_sha256_hex(secret, message) {
        Some(digest) => {
            constant_time_str_eq(&format!("{SHA256_PREFIX}{digest}"), provided.trim())
        }
        None => false,
    }
}

/// Plain shared-token check, still compared in constant time.
pub fn verify_token(secret: &str, provided: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    constant_time_str_eq(secret, provided)
}

fn constant_time_str_eq(expected: &str, provided: &str) -> bool {
    if expected.len() != provided.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
