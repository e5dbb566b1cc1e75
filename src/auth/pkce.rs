//! PKCE helpers for email links
//!
//! Sign-up and recovery requests carry an S256 challenge; the verifier
//! stays in a short-lived cookie until the visitor comes back with the code.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Generates a random code verifier.
///
/// Returns a 64-character URL-safe string (RFC 7636 allows 43-128).
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut bytes = [0_u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `BASE64URL(SHA256(verifier))`
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
