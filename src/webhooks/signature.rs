//! Webhook authenticity.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw body, keyed with
//! the secret configured on the webhook, and sends `sha256=<hex>` in the
//! `X-Hub-Signature-256` header. A delivery is only parsed after its
//! signature checks out.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header does not start with {PREFIX}")]
    UnsupportedScheme,

    #[error("signature is not valid hex")]
    MalformedDigest,

    #[error("signature does not match payload")]
    Mismatch,
}

fn mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length")
}

/// Checks `header` against the payload. The comparison is constant-time.
pub fn verify_signature(payload: &[u8], header: &str, secret: &[u8]) -> Result<(), SignatureError> {
    let digest = header
        .strip_prefix(PREFIX)
        .ok_or(SignatureError::UnsupportedScheme)?;
    let expected = hex::decode(digest).map_err(|_| SignatureError::MalformedDigest)?;

    let mut mac = mac(secret);
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// The header value GitHub would send for `payload`.
pub fn signature_header(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = mac(secret);
    mac.update(payload);
    format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}
