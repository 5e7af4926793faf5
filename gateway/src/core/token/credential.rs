//! Credential parsing and diagnostics.
//!
//! A credential is a single configuration string of the form `{id}.{secret}`,
//! optionally prefixed with an authorization scheme (`Bearer `). Parsing is
//! strict: every malformed shape maps to a distinct [`CredentialError`] so the
//! operator can tell a truncated copy from a wrong key.

use serde::Serialize;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Separator between the public identifier and the signing secret.
pub const CREDENTIAL_DELIMITER: char = '.';

/// Authorization scheme prefix tolerated in front of a credential.
pub const BEARER_PREFIX: &str = "bearer ";

/// Markers left behind when a key is copied from a masked console display.
const MASK_MARKERS: [&str; 2] = ["...", "\u{2026}"];

/// Minimum plausible identifier length.
const MIN_ID_LEN: usize = 6;

/// Minimum plausible secret length.
const MIN_SECRET_LEN: usize = 16;

/// Errors raised while parsing or signing with a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Nothing configured (or only whitespace / a bare scheme prefix)
    #[error("credential is empty: configure it as '{{id}}.{{secret}}'")]
    Empty,

    /// The value contains an ellipsis, i.e. it was copied from a masked display
    #[error("credential looks masked or truncated (contains '...'): copy the full key")]
    Masked,

    /// Wrong number of delimiters
    #[error("credential format invalid: expected exactly one '.' separating id and secret, found {found}")]
    DelimiterCount {
        /// Number of delimiters found
        found: usize,
    },

    /// Exactly one delimiter but the id or the secret is empty
    #[error("credential format invalid: id and secret must both be non-empty")]
    MissingPart,

    /// HMAC keying failed
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// A parsed `{id, secret}` pair.
///
/// Lives only for the duration of one signing operation; the secret is wiped
/// from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    id: String,
    secret: String,
}

impl Credential {
    /// Parse a raw credential string.
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let value = strip_scheme(raw.trim());
        if value.is_empty() {
            return Err(CredentialError::Empty);
        }
        if looks_masked(value) {
            return Err(CredentialError::Masked);
        }

        let found = value.matches(CREDENTIAL_DELIMITER).count();
        if found != 1 {
            return Err(CredentialError::DelimiterCount { found });
        }

        match value.split_once(CREDENTIAL_DELIMITER) {
            Some((id, secret)) if !id.is_empty() && !secret.is_empty() => Ok(Self {
                id: id.to_string(),
                secret: secret.to_string(),
            }),
            _ => Err(CredentialError::MissingPart),
        }
    }

    /// Public identifier, safe to embed in token payloads.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn secret(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Shape report for a raw credential string, safe to expose to operators.
///
/// Never contains any part of the secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDiagnostics {
    /// Whether anything non-blank was configured
    pub configured: bool,
    /// Length of the trimmed value, scheme prefix removed
    pub length: usize,
    /// Number of delimiter characters
    pub delimiter_count: usize,
    /// Whether an ellipsis marker is present
    pub looks_masked: bool,
    /// Whether the value carried a `Bearer ` prefix
    pub has_bearer_prefix: bool,
    /// Length of the part before the first delimiter
    pub id_length: usize,
    /// Length of the part after the first delimiter
    pub secret_length: usize,
}

impl CredentialDiagnostics {
    /// Inspect a raw credential value without parsing it.
    pub fn inspect(raw: &str) -> Self {
        let trimmed = raw.trim();
        let has_bearer_prefix = has_scheme(trimmed);
        let value = strip_scheme(trimmed);

        let (id_length, secret_length) = match value.split_once(CREDENTIAL_DELIMITER) {
            Some((id, secret)) => (id.len(), secret.len()),
            None => (value.len(), 0),
        };

        Self {
            configured: !value.is_empty(),
            length: value.len(),
            delimiter_count: value.matches(CREDENTIAL_DELIMITER).count(),
            looks_masked: looks_masked(value),
            has_bearer_prefix,
            id_length,
            secret_length,
        }
    }

    /// Heuristic used by `check-key`: well-formed keys have one delimiter, an
    /// id of at least 6 characters and a secret of at least 16.
    pub fn looks_abnormal(&self) -> bool {
        self.delimiter_count != 1
            || self.id_length < MIN_ID_LEN
            || self.secret_length < MIN_SECRET_LEN
    }
}

fn has_scheme(value: &str) -> bool {
    value
        .get(..BEARER_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(BEARER_PREFIX))
}

fn strip_scheme(value: &str) -> &str {
    if has_scheme(value) {
        value[BEARER_PREFIX.len()..].trim()
    } else {
        value
    }
}

fn looks_masked(value: &str) -> bool {
    MASK_MARKERS.iter().any(|marker| value.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_credential() {
        let credential = Credential::parse("abc123.supersecretvalue").unwrap();
        assert_eq!(credential.id(), "abc123");
        assert_eq!(credential.secret(), b"supersecretvalue");
    }

    #[test]
    fn test_parse_strips_bearer_prefix_and_whitespace() {
        let credential = Credential::parse("  Bearer  abc123.supersecretvalue \n").unwrap();
        assert_eq!(credential.id(), "abc123");

        let credential = Credential::parse("bearer abc123.s").unwrap();
        assert_eq!(credential.id(), "abc123");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Credential::parse("").unwrap_err(), CredentialError::Empty);
        assert_eq!(Credential::parse("   ").unwrap_err(), CredentialError::Empty);
        assert_eq!(
            Credential::parse("Bearer   ").unwrap_err(),
            CredentialError::Empty
        );
    }

    #[test]
    fn test_parse_masked_wins_over_format() {
        assert_eq!(
            Credential::parse("...masked...").unwrap_err(),
            CredentialError::Masked
        );
        assert_eq!(
            Credential::parse("abc123.supe\u{2026}").unwrap_err(),
            CredentialError::Masked
        );
    }

    #[test]
    fn test_parse_delimiter_count() {
        assert_eq!(
            Credential::parse("nodelimiter").unwrap_err(),
            CredentialError::DelimiterCount { found: 0 }
        );
        assert_eq!(
            Credential::parse("a.b.c").unwrap_err(),
            CredentialError::DelimiterCount { found: 2 }
        );
    }

    #[test]
    fn test_parse_missing_part() {
        assert_eq!(
            Credential::parse(".secret").unwrap_err(),
            CredentialError::MissingPart
        );
        assert_eq!(
            Credential::parse("id.").unwrap_err(),
            CredentialError::MissingPart
        );
    }

    #[test]
    fn test_error_messages_are_distinct() {
        let messages = [
            CredentialError::Empty.to_string(),
            CredentialError::Masked.to_string(),
            CredentialError::DelimiterCount { found: 0 }.to_string(),
            CredentialError::MissingPart.to_string(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in messages.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = Credential::parse("abc123.supersecretvalue").unwrap();
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("supersecretvalue"));
        assert!(debug.contains("abc123"));
    }

    #[test]
    fn test_diagnostics() {
        let diag = CredentialDiagnostics::inspect("Bearer abc123.supersecretvalue");
        assert!(diag.configured);
        assert!(diag.has_bearer_prefix);
        assert!(!diag.looks_masked);
        assert_eq!(diag.delimiter_count, 1);
        assert_eq!(diag.length, "abc123.supersecretvalue".len());
        assert_eq!(diag.id_length, 6);
        assert_eq!(diag.secret_length, 16);
        assert!(!diag.looks_abnormal());

        let diag = CredentialDiagnostics::inspect("");
        assert!(!diag.configured);
        assert_eq!(diag.length, 0);

        let diag = CredentialDiagnostics::inspect("abc1...xyz");
        assert!(diag.looks_masked);
        assert!(diag.looks_abnormal());
    }

    #[test]
    fn test_diagnostics_serialize_camel_case() {
        let json = serde_json::to_value(CredentialDiagnostics::inspect("a.b")).unwrap();
        assert_eq!(json["delimiterCount"], 1);
        assert_eq!(json["hasBearerPrefix"], false);
        assert_eq!(json["looksMasked"], false);
        assert_eq!(json["configured"], true);
    }
}
