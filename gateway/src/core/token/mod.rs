//! Short-lived credentials for realtime connections.
//!
//! [`TokenMinter`] turns a static `{id}.{secret}` credential into an HS256
//! token with a clamped lifetime, and [`TokenGrant`] bundles that token with
//! the ordered list of URLs a client should try.

mod credential;
mod endpoints;
mod minter;

pub use credential::{
    BEARER_PREFIX, CREDENTIAL_DELIMITER, Credential, CredentialDiagnostics, CredentialError,
};
pub use endpoints::{
    CandidateContext, CandidateEndpoint, DEFAULT_BASE_URL, EmbeddedValue, Placement,
    TokenEmbedding, build_candidates, default_strategies, merge_candidates,
    probe_header_strategies,
};
pub use minter::{
    DEFAULT_LIFETIME_SECONDS, MAX_LIFETIME_SECONDS, MIN_LIFETIME_SECONDS, SignedToken,
    TokenClaims, TokenMinter, decode_claims, resolve_lifetime,
};

pub(crate) use minter::now_ms;

use serde::{Deserialize, Serialize};

/// Wire shape of a successful minting response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub token: String,
    pub expires_at_ms: u64,
    /// Highest-priority candidate
    pub ws_url: String,
    /// Every candidate, in priority order
    #[serde(default)]
    pub ws_urls: Vec<String>,
}

impl TokenGrant {
    /// Bundle `signed` with URL candidates built from `strategies`.
    ///
    /// Header embeddings cannot be expressed as a URL and are left out.
    pub fn new(signed: SignedToken, base_url: &str, strategies: &[TokenEmbedding]) -> Self {
        let query_only: Vec<TokenEmbedding> = strategies
            .iter()
            .filter(|s| s.placement == Placement::Query && s.value == EmbeddedValue::Token)
            .cloned()
            .collect();
        let ctx = CandidateContext {
            base_url,
            token: &signed.token,
            credential: None,
            model: "",
        };
        let ws_urls: Vec<String> = build_candidates(&ctx, &query_only)
            .into_iter()
            .map(|c| c.url)
            .collect();

        Self {
            ws_url: ws_urls.first().cloned().unwrap_or_else(|| base_url.to_string()),
            ws_urls,
            token: signed.token,
            expires_at_ms: signed.expires_at_ms,
        }
    }

    /// Candidates in the order a client should try them: `wsUrls`, then
    /// `wsUrl`, then `local`, without duplicates.
    pub fn candidates(&self, local: Vec<CandidateEndpoint>) -> Vec<CandidateEndpoint> {
        let issued = self
            .ws_urls
            .iter()
            .cloned()
            .map(CandidateEndpoint::from_url)
            .collect();
        let primary = if self.ws_url.is_empty() {
            Vec::new()
        } else {
            vec![CandidateEndpoint::from_url(self.ws_url.clone())]
        };
        merge_candidates([issued, primary, local])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_urls_follow_strategy_order() {
        let signed = TokenMinter::default()
            .mint_at("abc123.supersecretvalue", None, 1)
            .unwrap();
        let token = signed.token.clone();
        let mut strategies = default_strategies();
        strategies.extend(probe_header_strategies());

        let grant = TokenGrant::new(signed, DEFAULT_BASE_URL, &strategies);
        assert_eq!(grant.ws_urls.len(), 6);
        assert_eq!(grant.ws_url, format!("{DEFAULT_BASE_URL}?token={token}"));
        assert_eq!(grant.ws_url, grant.ws_urls[0]);
    }

    #[test]
    fn test_grant_serializes_camel_case() {
        let grant = TokenGrant {
            token: "t".into(),
            expires_at_ms: 9,
            ws_url: "wss://a".into(),
            ws_urls: vec!["wss://a".into()],
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["expiresAtMs"], 9);
        assert_eq!(json["wsUrl"], "wss://a");
        assert_eq!(json["wsUrls"][0], "wss://a");
    }

    #[test]
    fn test_grant_candidates_merge() {
        let grant = TokenGrant {
            token: "t".into(),
            expires_at_ms: 0,
            ws_url: "wss://a/rt?token=t".into(),
            ws_urls: vec!["wss://a/rt?token=t".into(), "wss://a/rt?access_token=t".into()],
        };
        let local = vec![
            CandidateEndpoint::from_url("wss://a/rt?access_token=t"),
            CandidateEndpoint::from_url("wss://a/rt?Authorization=t"),
        ];
        let urls: Vec<String> = grant.candidates(local).into_iter().map(|c| c.url).collect();
        assert_eq!(
            urls,
            vec![
                "wss://a/rt?token=t",
                "wss://a/rt?access_token=t",
                "wss://a/rt?Authorization=t"
            ]
        );
    }
}
