//! Candidate connection endpoints.
//!
//! The upstream service is inconsistent about where it accepts the token, so
//! a connection is attempted against a priority-ordered list of embeddings.
//! The list is data ([`TokenEmbedding`]); the negotiator only walks it.

use serde::{Deserialize, Serialize};
use url::Url;

/// Default realtime endpoint.
pub const DEFAULT_BASE_URL: &str = "wss://open.bigmodel.cn/api/paas/v4/realtime";

/// Authorization scheme used by bearer embeddings.
const BEARER_SCHEME: &str = "Bearer ";

/// Query parameter names the upstream has been seen to accept.
const KNOWN_QUERY_NAMES: [&str; 3] = ["token", "access_token", "Authorization"];

/// Where the secret value is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Query string parameter
    Query,
    /// Handshake request header
    Header,
}

/// Which value gets embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddedValue {
    /// The minted token
    #[default]
    Token,
    /// The raw credential; only available to operator tooling
    Credential,
}

/// One way of presenting the secret to the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEmbedding {
    pub placement: Placement,
    /// Query parameter or header name
    pub name: String,
    /// Prefix the value with `Bearer `
    #[serde(default)]
    pub bearer: bool,
    #[serde(default)]
    pub value: EmbeddedValue,
    /// Also pass `model=<model>` in the query string
    #[serde(default)]
    pub with_model: bool,
}

impl TokenEmbedding {
    pub fn query(name: &str, bearer: bool) -> Self {
        Self {
            placement: Placement::Query,
            name: name.to_string(),
            bearer,
            value: EmbeddedValue::Token,
            with_model: false,
        }
    }

    pub fn header(name: &str, bearer: bool, value: EmbeddedValue, with_model: bool) -> Self {
        Self {
            placement: Placement::Header,
            name: name.to_string(),
            bearer,
            value,
            with_model,
        }
    }

    /// Short, secret-free description used in logs and attempt records.
    pub fn label(&self) -> String {
        let placement = match self.placement {
            Placement::Query => "query",
            Placement::Header => "header",
        };
        let mut label = format!("{placement}:{}", self.name);
        if self.value == EmbeddedValue::Credential {
            label.push_str(":key");
        }
        if self.bearer {
            label.push_str(":bearer");
        }
        if self.with_model {
            label.push_str(":model");
        }
        label
    }
}

/// The default priority list: every query spelling raw, then with a scheme.
pub fn default_strategies() -> Vec<TokenEmbedding> {
    let raw = KNOWN_QUERY_NAMES
        .iter()
        .map(|name| TokenEmbedding::query(name, false));
    let bearer = KNOWN_QUERY_NAMES
        .iter()
        .map(|name| TokenEmbedding::query(name, true));
    raw.chain(bearer).collect()
}

/// Header-based variants tried by the connection probe before the query list.
pub fn probe_header_strategies() -> Vec<TokenEmbedding> {
    let mut strategies = Vec::with_capacity(8);
    for with_model in [true, false] {
        for bearer in [false, true] {
            strategies.push(TokenEmbedding::header(
                "Authorization",
                bearer,
                EmbeddedValue::Credential,
                with_model,
            ));
        }
    }
    for with_model in [false, true] {
        for bearer in [false, true] {
            strategies.push(TokenEmbedding::header(
                "Authorization",
                bearer,
                EmbeddedValue::Token,
                with_model,
            ));
        }
    }
    strategies
}

/// A fully formed connection target.
#[derive(Clone, PartialEq, Eq)]
pub struct CandidateEndpoint {
    pub url: String,
    /// Extra handshake headers
    pub headers: Vec<(String, String)>,
    /// Secret-free description
    pub label: String,
}

impl std::fmt::Debug for CandidateEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateEndpoint")
            .field("label", &self.label)
            .field("host", &self.host())
            .finish()
    }
}

impl CandidateEndpoint {
    /// Wrap a URL handed out by the minting endpoint.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let label = describe_url(&url);
        Self {
            url,
            headers: Vec::new(),
            label,
        }
    }

    /// Host portion of the URL, for logging.
    pub fn host(&self) -> String {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Inputs shared by every embedding.
#[derive(Debug, Clone, Copy)]
pub struct CandidateContext<'a> {
    pub base_url: &'a str,
    pub token: &'a str,
    /// Raw credential; strategies needing it are skipped when absent
    pub credential: Option<&'a str>,
    pub model: &'a str,
}

/// Build the ordered candidate list for `strategies`.
///
/// Strategies that cannot be applied (unparseable base URL, missing raw
/// credential) are skipped. Duplicates are removed keeping first-seen order.
pub fn build_candidates(
    ctx: &CandidateContext<'_>,
    strategies: &[TokenEmbedding],
) -> Vec<CandidateEndpoint> {
    let candidates = strategies
        .iter()
        .filter_map(|strategy| build_candidate(ctx, strategy))
        .collect();
    merge_candidates([candidates])
}

fn build_candidate(
    ctx: &CandidateContext<'_>,
    strategy: &TokenEmbedding,
) -> Option<CandidateEndpoint> {
    let secret = match strategy.value {
        EmbeddedValue::Token => ctx.token,
        EmbeddedValue::Credential => ctx.credential?,
    };
    let value = if strategy.bearer {
        format!("{BEARER_SCHEME}{secret}")
    } else {
        secret.to_string()
    };

    let mut url = Url::parse(ctx.base_url).ok()?;
    let mut headers = Vec::new();
    {
        let mut query = url.query_pairs_mut();
        if strategy.with_model {
            query.append_pair("model", ctx.model);
        }
        match strategy.placement {
            Placement::Query => {
                query.append_pair(&strategy.name, &value);
            }
            Placement::Header => headers.push((strategy.name.clone(), value)),
        }
    }
    // An empty query string would otherwise leave a trailing '?'
    if url.query() == Some("") {
        url.set_query(None);
    }

    Some(CandidateEndpoint {
        url: url.to_string(),
        headers,
        label: strategy.label(),
    })
}

/// Concatenate candidate lists, dropping duplicates while preserving order.
pub fn merge_candidates<I>(lists: I) -> Vec<CandidateEndpoint>
where
    I: IntoIterator<Item = Vec<CandidateEndpoint>>,
{
    let mut merged: Vec<CandidateEndpoint> = Vec::new();
    for candidate in lists.into_iter().flatten() {
        let seen = merged
            .iter()
            .any(|c| c.url == candidate.url && c.headers == candidate.headers);
        if !seen {
            merged.push(candidate);
        }
    }
    merged
}

fn describe_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return "url".to_string();
    };
    parsed
        .query_pairs()
        .find(|(name, _)| KNOWN_QUERY_NAMES.contains(&name.as_ref()))
        .map(|(name, value)| {
            if value.starts_with(BEARER_SCHEME) {
                format!("query:{name}:bearer")
            } else {
                format!("query:{name}")
            }
        })
        .unwrap_or_else(|| "url".to_string())
}
