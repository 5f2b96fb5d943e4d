//! Shared-secret authentication.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Header carrying the caller's key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Hex characters of the SHA-256 digest kept in fingerprints.
const FINGERPRINT_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no API key presented")]
    Missing,
    #[error("API key does not match")]
    Mismatch,
}

/// Compares presented keys with the configured secret in constant time.
pub struct Authenticator {
    expected: Vec<u8>,
}

impl Authenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            expected: secret.into().into_bytes(),
        }
    }

    /// `presented` is the raw header value; it need not be valid text.
    pub fn verify(&self, presented: Option<&[u8]>) -> Result<(), AuthError> {
        let presented = presented.ok_or(AuthError::Missing)?;
        // An unset secret must never authorize an empty key.
        if self.expected.is_empty() {
            return Err(AuthError::Mismatch);
        }
        if bool::from(presented.ct_eq(&self.expected)) {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }
}

/// Short SHA-256 fingerprint of a presented key, safe to log.
pub fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_key() {
        let auth = Authenticator::new("s3cret");
        assert_eq!(auth.verify(Some(b"s3cret")), Ok(()));
    }

    #[test]
    fn rejects_missing_and_wrong_keys() {
        let auth = Authenticator::new("s3cret");
        assert_eq!(auth.verify(None), Err(AuthError::Missing));
        assert_eq!(auth.verify(Some(b"")), Err(AuthError::Mismatch));
        assert_eq!(auth.verify(Some(b"s3cret ")), Err(AuthError::Mismatch));
        assert_eq!(auth.verify(Some(b"S3CRET")), Err(AuthError::Mismatch));
        assert_eq!(auth.verify(Some(b"s3cr\xe9t")), Err(AuthError::Mismatch));
    }

    #[test]
    fn empty_secret_never_authorizes() {
        let auth = Authenticator::new("");
        assert_eq!(auth.verify(Some(b"")), Err(AuthError::Mismatch));
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let fp = fingerprint(b"s3cret");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert_eq!(fp, fingerprint(b"s3cret"));
        assert_ne!(fp, fingerprint(b"s3cret2"));
        assert!(!fp.contains("s3cret"));
        assert_eq!(fingerprint(b"\xff\xfe").len(), FINGERPRINT_LEN);
    }
}
