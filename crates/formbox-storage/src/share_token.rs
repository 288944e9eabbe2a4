//! Signed share tokens for time-limited access to stored files.
//!
//! Token = base64url(expiry_unix_secs ":" hex(HMAC-SHA256(secret, path ":" expiry_unix_secs))).
//! Tokens are stateless; the path is not embedded and must be supplied again on
//! validation, so a token only unlocks the file it was minted for.

use base64::Engine;
use chrono::{DateTime, Utc};
use formbox_core::{ErrorMetadata, LogLevel};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::traits::{StorageError, StorageResult};

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Share token validation failures
///
/// Clients only ever see one "Access denied" message for all variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Share token has expired")]
    Expired,
    #[error("Share token is malformed")]
    Invalid,
    #[error("Share token signature does not match")]
    Mismatch,
}

impl ErrorMetadata for TokenError {
    fn http_status_code(&self) -> u16 {
        403
    }

    fn error_code(&self) -> &'static str {
        "ACCESS_DENIED"
    }

    fn is_recoverable(&self) -> bool {
        false
    }

    fn client_message(&self) -> String {
        "Access denied".to_string()
    }

    fn log_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

/// Mints and verifies share tokens with a server-side secret.
#[derive(Clone)]
pub struct ShareTokenSigner {
    mac: Hmac<Sha256>,
}

impl std::fmt::Debug for ShareTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareTokenSigner").finish_non_exhaustive()
    }
}

impl ShareTokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> StorageResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(StorageError::ConfigError(
                "Share token secret must not be empty".to_string(),
            ));
        }
        let mac = Hmac::<Sha256>::new_from_slice(secret)
            .map_err(|e| StorageError::ConfigError(format!("Invalid share token secret: {}", e)))?;
        Ok(Self { mac })
    }

    /// Token for `path` valid for `ttl` (zero means one hour).
    pub fn generate_token(&self, path: &str, ttl: Duration) -> String {
        self.generate_token_at(path, ttl, Utc::now())
    }

    pub fn generate_token_at(&self, path: &str, ttl: Duration, now: DateTime<Utc>) -> String {
        let ttl = if ttl.is_zero() { DEFAULT_TTL } else { ttl };
        let expiry = now
            .timestamp()
            .max(0)
            .saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

        let signature = hex::encode(self.sign(path, expiry));
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!("{}:{}", expiry, signature))
    }

    pub fn validate_token(&self, path: &str, token: &str) -> Result<(), TokenError> {
        self.validate_token_at(path, token, Utc::now())
    }

    pub fn validate_token_at(
        &self,
        path: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        let (expiry, signature) = decode(token)?;

        if now.timestamp() > expiry {
            return Err(TokenError::Expired);
        }

        let expected = hex::encode(self.sign(path, expiry));
        if expected.as_bytes().ct_eq(&signature).into() {
            Ok(())
        } else {
            Err(TokenError::Mismatch)
        }
    }

    /// Expiry encoded in a token, without verifying it. Display only.
    pub fn expiration(token: &str) -> Result<DateTime<Utc>, TokenError> {
        let (expiry, _) = decode(token)?;
        DateTime::from_timestamp(expiry, 0).ok_or(TokenError::Invalid)
    }

    fn sign(&self, path: &str, expiry: i64) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(path.as_bytes());
        mac.update(b":");
        mac.update(expiry.to_string().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// Splits a token into its expiry and raw signature bytes.
///
/// Only the expiry has to be text; the signature is compared byte for byte.
fn decode(token: &str) -> Result<(i64, Vec<u8>), TokenError> {
    let mut raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token.trim().trim_end_matches('='))
        .map_err(|_| TokenError::Invalid)?;
    let colon = raw.iter().position(|b| *b == b':').ok_or(TokenError::Invalid)?;
    let signature = raw.split_off(colon + 1);
    let expiry = std::str::from_utf8(&raw[..colon]).map_err(|_| TokenError::Invalid)?;
    let expiry: i64 = expiry.parse().map_err(|_| TokenError::Invalid)?;
    if expiry < 0 {
        return Err(TokenError::Invalid);
    }
    Ok((expiry, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "files/2025/01/abcd1234_report.pdf";

    fn signer() -> ShareTokenSigner {
        ShareTokenSigner::new("0123456789abcdef0123456789abcdef").unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            ShareTokenSigner::new(""),
            Err(StorageError::ConfigError(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let signer = signer();
        let token = signer.generate_token(PATH, Duration::from_secs(60));
        assert_eq!(signer.validate_token(PATH, &token), Ok(()));
    }

    #[test]
    fn test_wire_format() {
        let token = signer().generate_token_at(PATH, Duration::from_secs(60), at(1_000));
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&token)
            .unwrap();
        let text = String::from_utf8(raw).unwrap();
        let (expiry, signature) = text.split_once(':').unwrap();
        assert_eq!(expiry, "1060");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_zero_ttl_means_one_hour() {
        let token = signer().generate_token_at(PATH, Duration::ZERO, at(0));
        assert_eq!(ShareTokenSigner::expiration(&token).unwrap(), at(3600));
    }

    #[test]
    fn test_expiry_boundary() {
        let signer = signer();
        let token = signer.generate_token_at(PATH, Duration::from_secs(10), at(100));
        assert_eq!(signer.validate_token_at(PATH, &token, at(110)), Ok(()));
        assert_eq!(
            signer.validate_token_at(PATH, &token, at(111)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_token_bound_to_path() {
        let signer = signer();
        let token = signer.generate_token(PATH, Duration::from_secs(60));
        assert_eq!(
            signer.validate_token("files/2025/01/other.pdf", &token),
            Err(TokenError::Mismatch)
        );
    }

    #[test]
    fn test_tampered_tokens() {
        let signer = signer();
        let token = signer.generate_token_at(PATH, Duration::from_secs(60), at(1_000));

        // extend the expiry but keep the old signature
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&token)
            .unwrap();
        let text = String::from_utf8(raw).unwrap();
        let (_, signature) = text.split_once(':').unwrap();
        let forged = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(format!("{}:{}", 999_999, signature));
        assert_eq!(
            signer.validate_token_at(PATH, &forged, at(1_000)),
            Err(TokenError::Mismatch)
        );

        // flip one signature character
        let (expiry, signature) = text.split_once(':').unwrap();
        let mut flipped: Vec<char> = signature.chars().collect();
        flipped[10] = if flipped[10] == '0' { '1' } else { '0' };
        let flipped = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(format!(
            "{}:{}",
            expiry,
            flipped.into_iter().collect::<String>()
        ));
        assert_eq!(
            signer.validate_token_at(PATH, &flipped, at(1_000)),
            Err(TokenError::Mismatch)
        );

        let other = ShareTokenSigner::new("another-secret-another-secret-xx").unwrap();
        assert_eq!(
            other.validate_token_at(PATH, &token, at(1_000)),
            Err(TokenError::Mismatch)
        );
    }

    #[test]
    fn test_any_flipped_signature_byte_is_mismatch() {
        let signer = signer();
        let token = signer.generate_token_at(PATH, Duration::from_secs(60), at(1_000));
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&token)
            .unwrap();
        let colon = raw.iter().position(|b| *b == b':').unwrap();

        for i in colon + 1..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x80;
            let tampered = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&tampered);
            assert_eq!(
                signer.validate_token_at(PATH, &tampered, at(1_000)),
                Err(TokenError::Mismatch),
                "byte {}",
                i
            );
        }
    }

    #[test]
    fn test_signer_reusable_across_calls() {
        let signer = signer();
        let first = signer.generate_token_at(PATH, Duration::from_secs(60), at(1_000));
        let second = signer.generate_token_at(PATH, Duration::from_secs(60), at(1_000));
        assert_eq!(first, second);
        assert_eq!(signer.validate_token_at(PATH, &first, at(1_000)), Ok(()));
    }

    #[test]
    fn test_malformed_tokens() {
        let signer = signer();
        let no_colon = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("12345");
        let bad_expiry = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("soon:abcd");

        for token in ["", "!!!not-base64!!!", no_colon.as_str(), bad_expiry.as_str()] {
            assert_eq!(
                signer.validate_token(PATH, token),
                Err(TokenError::Invalid),
                "token {:?}",
                token
            );
        }
    }

    #[test]
    fn test_padded_token_accepted() {
        let signer = signer();
        let token = signer.generate_token(PATH, Duration::from_secs(60));
        let padded = format!("{}==", token);
        assert_eq!(signer.validate_token(PATH, &padded), Ok(()));
    }

    #[test]
    fn test_uniform_client_message() {
        for err in [TokenError::Expired, TokenError::Invalid, TokenError::Mismatch] {
            assert_eq!(err.http_status_code(), 403);
            assert_eq!(err.client_message(), "Access denied");
        }
    }
}
