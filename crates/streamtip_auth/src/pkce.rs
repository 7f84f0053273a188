//! PKCE code verifier and challenge material (RFC 7636, S256).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a code verifier from `len` cryptographically random bytes,
/// base64url-encoded without padding.
pub fn generate_code_verifier(len: usize) -> String {
	let mut bytes = vec![0u8; len];
	rand::rng().fill(&mut bytes[..]);
	URL_SAFE_NO_PAD.encode(&bytes)
}

/// Derive the S256 challenge for a verifier: base64url(SHA-256(verifier)).
pub fn derive_code_challenge(verifier: &str) -> String {
	let digest = Sha256::digest(verifier.as_bytes());
	URL_SAFE_NO_PAD.encode(digest)
}
