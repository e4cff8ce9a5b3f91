//! Bearer token verification.
//!
//! Tokens are compact JWS strings (`header.payload.signature`, base64url
//! without padding) signed with HMAC-SHA-256. HS256 is the only accepted
//! algorithm; the payload is not decoded until the signature has verified.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Number;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const ALLOWED_ALG: &str = "HS256";

// Far above any legitimate token; bounds decoding work on hostile input.
const MAX_TOKEN_LENGTH: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token missing")]
    Missing,
    #[error("token is not a well-formed JWS")]
    Malformed,
    #[error("token algorithm {0:?} is not allowed")]
    AlgorithmNotAllowed(String),
    #[error("token signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Deserialize)]
struct JoseHeader {
    alg: String,
}

/// Claims of a verified token.
///
/// Time values may be fractional JSON numbers; they are floored to whole
/// seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(deserialize_with = "numeric_date")]
    pub exp: i64,
    #[serde(default, deserialize_with = "opt_numeric_date")]
    pub iat: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    /// How long the replay record must outlive first use, in seconds.
    #[serde(rename = "timeToLifeSec", default, deserialize_with = "opt_seconds")]
    pub time_to_life_sec: Option<u64>,
}

fn whole_seconds(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then(|| f.floor() as i64)
}

fn numeric_date<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let n = Number::deserialize(d)?;
    whole_seconds(&n).ok_or_else(|| D::Error::custom("NumericDate out of range"))
}

fn opt_numeric_date<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Option::<Number>::deserialize(d)?
        .map(|n| whole_seconds(&n).ok_or_else(|| D::Error::custom("NumericDate out of range")))
        .transpose()
}

fn opt_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    Option::<Number>::deserialize(d)?
        .map(|n| {
            whole_seconds(&n)
                .and_then(|s| u64::try_from(s).ok())
                .ok_or_else(|| D::Error::custom("seconds must be a non-negative number"))
        })
        .transpose()
}

impl TokenClaims {
    /// Seconds until `exp`, zero once expired.
    pub fn remaining_lifetime(&self, now: i64) -> u64 {
        self.exp.saturating_sub(now).max(0) as u64
    }
}

#[derive(Debug)]
pub struct TokenVerifier {
    secret: SecretString,
}

impl TokenVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Verify `token` at unix time `now` (seconds).
    pub fn verify(&self, token: Option<&str>, now: i64) -> Result<TokenClaims, TokenError> {
        let token = match token.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(TokenError::Missing),
        };
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(TokenError::Malformed);
        }

        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s)) if parts.next().is_none() => (h, p, s),
                _ => return Err(TokenError::Malformed),
            };

        let header: JoseHeader = {
            let bytes = B64.decode(header_b64).map_err(|_| TokenError::Malformed)?;
            serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?
        };
        if header.alg != ALLOWED_ALG {
            return Err(TokenError::AlgorithmNotAllowed(header.alg));
        }

        let signature = B64
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| TokenError::BadSignature)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: TokenClaims = {
            let bytes = B64.decode(payload_b64).map_err(|_| TokenError::Malformed)?;
            serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?
        };

        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
