//! Hashing, identifiers, and token generation.
//!
//! Session ids are deterministic; tokens come from a cryptographically
//! strong source. PKCE verification follows RFC 7636 S256.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// SHA-256 of `data`, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Deterministic session id: `sha256_hex(project || "||" || branch)`.
pub fn session_id(project: &str, branch: &str) -> String {
    sha256_hex(format!("{project}||{branch}").as_bytes())
}

/// Hash of a comment's anchored line content. `None` hashes the empty string
/// so stored hashes are always present and comparable.
pub fn line_content_hash(content: Option<&str>) -> String {
    sha256_hex(content.unwrap_or("").as_bytes())
}

/// base64url without padding.
pub fn base64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// PKCE S256 check: `challenge == base64url(sha256(verifier))`.
pub fn pkce_verify(challenge: &str, verifier: &str) -> bool {
    base64url(&Sha256::digest(verifier.as_bytes())) == challenge
}

/// Generate a secure random token, hex-encoded (64 chars).
pub fn generate_token() -> Result<String, crate::ServiceError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| crate::ServiceError::Internal(format!("RNG failure: {e}")))?;
    Ok(hex::encode(bytes))
}

/// Fresh v4 UUID string, used for comment and OAuth client ids.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_deterministic_64_hex() {
        let a = session_id("myproj", "working");
        let b = session_id("myproj", "working");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, session_id("myproj", "main"));
    }

    #[test]
    fn line_content_hash_treats_none_as_empty() {
        assert_eq!(line_content_hash(None), line_content_hash(Some("")));
        assert_ne!(line_content_hash(None), line_content_hash(Some("x")));
    }

    #[test]
    fn pkce_round_trip() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = base64url(&sha2::Sha256::digest(verifier.as_bytes()));
        assert!(pkce_verify(&challenge, verifier));
        assert!(!pkce_verify(&challenge, "wrong-verifier"));
    }

    #[test]
    fn tokens_are_unique_and_hex() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
