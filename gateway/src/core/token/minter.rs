//! HS256 token signing.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use super::credential::{Credential, CredentialError};

type HmacSha256 = Hmac<Sha256>;

/// Lifetime used when the caller supplies no usable hint.
pub const DEFAULT_LIFETIME_SECONDS: u64 = 600;

/// Shortest lifetime a token may be minted with.
pub const MIN_LIFETIME_SECONDS: u64 = 60;

/// Longest lifetime a token may be minted with.
pub const MAX_LIFETIME_SECONDS: u64 = 3600;

#[derive(Serialize)]
struct TokenHeader {
    alg: &'static str,
    sign_type: &'static str,
}

const HEADER: TokenHeader = TokenHeader {
    alg: "HS256",
    sign_type: "SIGN",
};

/// Decoded token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Public credential identifier
    pub api_key: String,
    /// Absolute expiry, epoch milliseconds
    pub exp: u64,
    /// Signing time, epoch milliseconds
    pub timestamp: u64,
}

/// A signed, time-boxed token. Immutable once minted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    /// `header.payload.signature`
    pub token: String,
    /// Absolute expiry, epoch milliseconds
    pub expires_at_ms: u64,
    /// Signing time, epoch milliseconds
    pub signed_at_ms: u64,
}

/// Clamp a caller-supplied lifetime hint into the accepted window.
///
/// The hint is read as a decimal number. Absent, blank, non-numeric,
/// non-finite and zero values fall back to `default_seconds`; the result is
/// then clamped to `[60, 3600]` and truncated to whole seconds.
pub fn resolve_lifetime(hint: Option<&str>, default_seconds: u64) -> u64 {
    let parsed = hint
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value != 0.0);

    let seconds = match parsed {
        Some(value) => value,
        None => default_seconds as f64,
    };

    seconds.clamp(MIN_LIFETIME_SECONDS as f64, MAX_LIFETIME_SECONDS as f64) as u64
}

/// Mints signed tokens from a static credential.
#[derive(Debug, Clone)]
pub struct TokenMinter {
    default_lifetime_seconds: u64,
}

impl Default for TokenMinter {
    fn default() -> Self {
        Self::new(DEFAULT_LIFETIME_SECONDS)
    }
}

impl TokenMinter {
    pub fn new(default_lifetime_seconds: u64) -> Self {
        Self {
            default_lifetime_seconds,
        }
    }

    /// Parse `credential` and sign a token valid for the clamped lifetime.
    pub fn mint(
        &self,
        credential: &str,
        lifetime_hint: Option<&str>,
    ) -> Result<SignedToken, CredentialError> {
        self.mint_at(credential, lifetime_hint, now_ms())
    }

    /// Same as [`mint`](Self::mint) with an explicit signing time.
    pub fn mint_at(
        &self,
        credential: &str,
        lifetime_hint: Option<&str>,
        now_ms: u64,
    ) -> Result<SignedToken, CredentialError> {
        let credential = Credential::parse(credential)?;
        let lifetime = resolve_lifetime(lifetime_hint, self.default_lifetime_seconds);

        let claims = TokenClaims {
            api_key: credential.id().to_string(),
            exp: now_ms + lifetime * 1000,
            timestamp: now_ms,
        };
        let token = sign(&credential, &claims)?;

        debug!(lifetime_seconds = lifetime, "Minted realtime token");

        Ok(SignedToken {
            token,
            expires_at_ms: claims.exp,
            signed_at_ms: claims.timestamp,
        })
    }
}

fn sign(credential: &Credential, claims: &TokenClaims) -> Result<String, CredentialError> {
    let header = encode_segment(&HEADER)?;
    let payload = encode_segment(claims)?;
    let signing_input = format!("{header}.{payload}");

    let mut mac = HmacSha256::new_from_slice(credential.secret())
        .map_err(|e| CredentialError::Signing(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    let signature = BASE64_URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{signing_input}.{signature}"))
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, CredentialError> {
    let json = serde_json::to_vec(value).map_err(|e| CredentialError::Signing(e.to_string()))?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(json))
}

/// Decode the payload segment of a token without verifying it.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = BASE64_URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
