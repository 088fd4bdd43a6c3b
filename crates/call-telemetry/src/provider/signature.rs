use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, TelemetryError};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw webhook body
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Hex HMAC-SHA256 of `body`, as the provider computes it
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| TelemetryError::internal("failed to initialize HMAC"))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a webhook signature. Accepts an optional
/// `sha256=` prefix.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> Result<()> {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let expected = hex::decode(signature)
        .map_err(|_| TelemetryError::unauthorized("invalid webhook signature encoding"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| TelemetryError::internal("failed to initialize HMAC"))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| TelemetryError::unauthorized("invalid webhook signature"))
}
