// src/auth.rs

//! Bearer-token gate.
//!
//! Only the SHA-256 digest of the configured token is kept. A presented
//! credential is hashed the same way and the two 32-byte digests are compared
//! with an XOR fold, so timing depends on neither the content nor the length
//! of what the client sent.

use sha2::{Digest, Sha256};

use crate::error::AuthError;

type TokenDigest = [u8; 32];

fn digest(token: &str) -> TokenDigest {
    Sha256::digest(token.as_bytes()).into()
}

fn constant_time_compare(a: &TokenDigest, b: &TokenDigest) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Clone)]
pub struct AuthGate {
    expected: TokenDigest,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

impl AuthGate {
    /// `token` must be non-empty; `Config::validate` enforces that at startup.
    pub fn new(token: &str) -> Self {
        AuthGate { expected: digest(token) }
    }

    /// Accept the credential only if it is present, non-empty and equal to the token.
    pub fn verify(&self, credential: Option<&str>) -> Result<(), AuthError> {
        match credential {
            Some(presented) if !presented.is_empty() => {
                if constant_time_compare(&digest(presented), &self.expected) {
                    Ok(())
                } else {
                    Err(AuthError)
                }
            }
            _ => Err(AuthError),
        }
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_the_configured_token() {
        let gate = AuthGate::new("s3cret");
        assert_eq!(gate.verify(Some("s3cret")), Ok(()));
        assert_eq!(gate.verify(Some("s3cret ")), Err(AuthError));
        assert_eq!(gate.verify(Some("other")), Err(AuthError));
        assert_eq!(gate.verify(Some("")), Err(AuthError));
        assert_eq!(gate.verify(None), Err(AuthError));
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
    }

    #[test]
    fn debug_does_not_leak_digest() {
        let gate = AuthGate::new("s3cret");
        assert_eq!(format!("{gate:?}"), "AuthGate { .. }");
    }
}
