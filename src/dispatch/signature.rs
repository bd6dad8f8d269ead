//! Inbound delivery authentication

use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a `sha256=<hex>` HMAC signature header against the body.
/// GitHub sends it as `X-Hub-Signature-256`, Bitbucket as `X-Hub-Signature`.
/// An empty secret never verifies.
pub fn verify_hmac_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(hex_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex_decode(hex_signature) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Compare a plain shared token (GitLab's `X-Gitlab-Token`) in constant time
pub fn verify_token(expected: &str, provided: &str) -> bool {
    !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
}

/// Compute a `sha256=<hex>` header value, as a provider would
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
