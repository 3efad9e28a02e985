//! Signed tokens
//!
//! Password-reset and CSRF tokens are `payload.signature` strings where the
//! signature is HMAC-SHA256 over the payload with the configured secret key.

use chrono::{DateTime, Duration, Utc};
use data_encoding::{BASE64URL_NOPAD, HEXLOWER};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Reset tokens stay valid for an hour
pub const RESET_TOKEN_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Malformed => f.write_str("malformed token"),
            TokenError::BadSignature => f.write_str("invalid token signature"),
            TokenError::Expired => f.write_str("token expired"),
        }
    }
}

impl std::error::Error for TokenError {}

#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid signing key: {}", e))?;
        Ok(Self { mac })
    }

    fn mac(&self) -> HmacSha256 {
        self.mac.clone()
    }

    fn signature(&self, payload: &str) -> String {
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        HEXLOWER.encode(&mac.finalize().into_bytes())
    }

    /// `payload.sig`
    pub fn sign(&self, payload: &str) -> String {
        format!("{}.{}", payload, self.signature(payload))
    }

    /// Return the payload if the signature matches
    pub fn verify<'a>(&self, token: &'a str) -> Result<&'a str, TokenError> {
        let (payload, sig) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let sig = HEXLOWER
            .decode(sig.as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;
        Ok(payload)
    }

    /// Password-reset token for `user_id`, valid for an hour
    pub fn reset_token(&self, user_id: i64, now: DateTime<Utc>) -> String {
        let expires = (now + Duration::seconds(RESET_TOKEN_TTL_SECONDS)).timestamp();
        let signed = self.sign(&format!("{}.{}", user_id, expires));
        BASE64URL_NOPAD.encode(signed.as_bytes())
    }

    /// User id carried by a valid reset token
    pub fn verify_reset_token(&self, token: &str, now: DateTime<Utc>) -> Result<i64, TokenError> {
        let raw = BASE64URL_NOPAD
            .decode(token.trim().as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        let raw = String::from_utf8(raw).map_err(|_| TokenError::Malformed)?;
        let payload = self.verify(&raw)?;
        let (user_id, expires) = payload.split_once('.').ok_or(TokenError::Malformed)?;
        let user_id: i64 = user_id.parse().map_err(|_| TokenError::Malformed)?;
        let expires: i64 = expires.parse().map_err(|_| TokenError::Malformed)?;
        if now.timestamp() > expires {
            return Err(TokenError::Expired);
        }
        Ok(user_id)
    }

    /// CSRF token bound to `session_key` (a session id, or a visitor fingerprint)
    pub fn csrf_token(&self, session_key: &str, ttl_seconds: i64, now: DateTime<Utc>) -> String {
        let expires = (now + Duration::seconds(ttl_seconds)).timestamp();
        let sig = self.signature(&format!("csrf:{}:{}", session_key, expires));
        format!("{}.{}", expires, sig)
    }

    pub fn verify_csrf_token(
        &self,
        token: &str,
        session_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        let (expires, sig) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let expires_at: i64 = expires.parse().map_err(|_| TokenError::Malformed)?;
        let sig = HEXLOWER
            .decode(sig.as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac();
        mac.update(format!("csrf:{}:{}", session_key, expires).as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;
        if now.timestamp() > expires_at {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

/// Visitor fingerprint: md5 hex of `"{ip}:{user_agent}"`
pub fn fingerprint(ip: &str, user_agent: &str) -> String {
    format!("{:x}", md5::compute(format!("{}:{}", ip, user_agent)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("test-secret-key-0123456789").unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let s = signer();
        let token = s.sign("hello");
        assert_eq!(s.verify(&token).unwrap(), "hello");

        let tampered = token.replacen("hello", "hellp", 1);
        assert_eq!(s.verify(&tampered), Err(TokenError::BadSignature));
        assert_eq!(s.verify("no-dot-here"), Err(TokenError::Malformed));

        let other = TokenSigner::new("another-secret-key-xyz").unwrap();
        assert_eq!(other.verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_reset_token_expiry() {
        let s = signer();
        let now = Utc::now();
        let token = s.reset_token(42, now);
        assert_eq!(s.verify_reset_token(&token, now).unwrap(), 42);
        assert_eq!(
            s.verify_reset_token(&token, now + Duration::seconds(RESET_TOKEN_TTL_SECONDS + 5)),
            Err(TokenError::Expired)
        );
        assert_eq!(
            s.verify_reset_token("!!not-base64!!", now),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_csrf_token_bound_to_session() {
        let s = signer();
        let now = Utc::now();
        let token = s.csrf_token("session-a", 3600, now);
        assert!(s.verify_csrf_token(&token, "session-a", now).is_ok());
        assert_eq!(
            s.verify_csrf_token(&token, "session-b", now),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            s.verify_csrf_token(&token, "session-a", now + Duration::hours(2)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_fingerprint() {
        let fp = fingerprint("127.0.0.1", "curl/8");
        assert_eq!(fp.len(), 32);
        assert_eq!(fp, format!("{:x}", md5::compute("127.0.0.1:curl/8")));
        assert_ne!(fp, fingerprint("127.0.0.2", "curl/8"));
    }
}
