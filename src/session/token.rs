//! Signed session identifiers
//!
//! Cookie format: `{id}.{base64(hmac_sha256(id))}`. The id itself is 32
//! random bytes, base64url encoded.

use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use super::SessionError;

type HmacSha256 = Hmac<Sha256>;

/// Generate a fresh, unguessable session identifier
pub fn generate_session_id() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn mac(secret: &str) -> Result<HmacSha256, SessionError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| SessionError::Signing(e.to_string()))
}

/// Sign a session identifier for the session cookie
pub fn sign_session_id(id: &str, secret: &str) -> Result<String, SessionError> {
    let mut mac = mac(secret)?;
    mac.update(id.as_bytes());
    let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{}.{}", id, signature))
}

/// Verify a session cookie value and return the identifier it carries
///
/// Returns `None` for malformed or tampered values.
pub fn verify_session_cookie(value: &str, secret: &str) -> Option<String> {
    let (id, signature_b64) = value.split_once('.')?;
    if id.is_empty() {
        return None;
    }

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .ok()?;

    let mut mac = mac(secret).ok()?;
    mac.update(id.as_bytes());
    mac.verify_slice(&signature).ok()?;

    Some(id.to_string())
}
