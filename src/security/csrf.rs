//! Double-submit CSRF tokens.
//!
//! A token is `{session_id}.{expiry_unix}.{hex(hmac_sha256(secret, sid.exp))}`.
//! The cookie carrying it is intentionally script-readable (`HttpOnly=false`)
//! so the client can echo it back in the `X-CSRF-Token` header; a cross-origin
//! attacker can make the browser send the cookie but cannot read it to forge
//! the header copy.

use crate::error::AppError;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const CSRF_HEADER_NAME: &str = "X-CSRF-Token";

#[derive(Clone)]
pub struct CsrfGuard {
    secret: Vec<u8>,
    lifetime: Duration,
}

impl CsrfGuard {
    pub fn new(secret: &str, lifetime_hours: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            lifetime: Duration::hours(lifetime_hours),
        }
    }

    /// Mint a token bound to `session_id`, valid for the configured lifetime.
    pub fn issue(&self, session_id: &str) -> Result<String, AppError> {
        let expires_at = Utc::now()
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| AppError::Internal("CSRF expiry overflow".to_string()))?
            .timestamp();
        self.issue_at(session_id, expires_at)
    }

    fn issue_at(&self, session_id: &str, expires_at: i64) -> Result<String, AppError> {
        if session_id.is_empty() || session_id.contains('.') {
            return Err(AppError::Internal(
                "CSRF session id must be non-empty and dot-free".to_string(),
            ));
        }
        let signature = self.sign(session_id, expires_at)?;
        Ok(format!("{}.{}.{}", session_id, expires_at, signature))
    }

    fn sign(&self, session_id: &str, expires_at: i64) -> Result<String, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(format!("Failed to create HMAC: {}", e)))?;
        mac.update(session_id.as_bytes());
        mac.update(b".");
        mac.update(expires_at.to_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Validate the double-submit pair: the out-of-band copy must byte-equal
    /// the cookie, and the cookie must carry a valid, unexpired signature.
    /// An expired token is treated exactly like a missing one.
    pub fn verify_pair(&self, cookie_value: &str, submitted_value: &str) -> Result<(), AppError> {
        if cookie_value.is_empty() || submitted_value.is_empty() {
            return Err(AppError::CsrfMissing);
        }

        if !bool::from(cookie_value.as_bytes().ct_eq(submitted_value.as_bytes())) {
            return Err(AppError::CsrfMismatch(
                "submitted token does not match cookie".to_string(),
            ));
        }

        // rsplitn keeps any dots inside a (malformed) session id from
        // shifting the signature field.
        let mut parts = cookie_value.rsplitn(3, '.');
        let signature = parts.next().unwrap_or_default();
        let expiry_str = parts.next().unwrap_or_default();
        let session_id = parts.next().unwrap_or_default();

        if session_id.is_empty() || signature.is_empty() {
            return Err(AppError::CsrfMismatch("malformed token".to_string()));
        }

        let expires_at: i64 = expiry_str
            .parse()
            .map_err(|_| AppError::CsrfMismatch("malformed expiry".to_string()))?;

        let expected = self.sign(session_id, expires_at)?;
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(AppError::CsrfMismatch("invalid signature".to_string()));
        }

        if expires_at <= Utc::now().timestamp() {
            // Fail closed: expired == missing.
            return Err(AppError::CsrfMissing);
        }

        Ok(())
    }
}
