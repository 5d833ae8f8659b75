//! PKCE S256 challenge generation and anti-CSRF state nonces
//!
//! This module implements the Proof Key for Code Exchange (PKCE) extension
//! to OAuth 2.0 as defined in RFC 7636, restricted to the `S256` method.
//!
//! # How PKCE works
//!
//! 1. The client generates a high-entropy random string called the `code_verifier`.
//! 2. The client computes a SHA-256 hash of the verifier and base64url-encodes
//!    it to produce the `code_challenge`.
//! 3. The authorization request includes `code_challenge` and
//!    `code_challenge_method=S256`.
//! 4. The token exchange request includes the original `code_verifier`.
//! 5. The authorization server recomputes the challenge and compares it to
//!    the value sent in step 3, proving possession of the verifier.
//!
//! # References
//!
//! - RFC 7636 <https://www.rfc-editor.org/rfc/rfc7636>

use base64::Engine as _;
use rand::RngCore as _;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq as _;

/// Number of random bytes behind verifiers and state nonces.
const ENTROPY_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// PkceChallenge
// ---------------------------------------------------------------------------

/// A PKCE S256 challenge pair consisting of a verifier and its derived
/// challenge value.
///
/// Lives only for one authorization attempt.
///
/// # Examples
///
/// ```
/// use authful_mcp_proxy::auth::pkce::PkceChallenge;
///
/// let pkce = PkceChallenge::generate();
/// assert_eq!(pkce.verifier.len(), 43);
/// assert_ne!(pkce.verifier, pkce.challenge);
/// ```
#[derive(Clone)]
pub struct PkceChallenge {
    /// The code verifier: 32 random bytes, base64url-encoded without padding
    /// (43 characters). Sent as `code_verifier` during code exchange.
    pub verifier: String,

    /// `BASE64URL(SHA256(ASCII(verifier)))`, sent as `code_challenge` in the
    /// authorization request.
    pub challenge: String,
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl PkceChallenge {
    /// The only challenge method this crate produces.
    pub const METHOD: &'static str = "S256";

    /// Generates a fresh verifier and its S256 challenge.
    pub fn generate() -> Self {
        let verifier = random_urlsafe(ENTROPY_BYTES);
        let challenge = s256_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// Computes the S256 code challenge for a verifier (RFC 7636 section 4.2).
pub fn s256_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
}

/// Generates a random anti-CSRF `state` value.
///
/// 32 random bytes encoded as base64url without padding.
///
/// # Examples
///
/// ```
/// use authful_mcp_proxy::auth::pkce::generate_state;
///
/// let a = generate_state();
/// let b = generate_state();
/// assert_eq!(a.len(), 43);
/// assert_ne!(a, b);
/// ```
pub fn generate_state() -> String {
    random_urlsafe(ENTROPY_BYTES)
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Compares two strings without short-circuiting on the first difference.
///
/// Strings of different lengths compare unequal; lengths of state nonces
/// are not secret.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
