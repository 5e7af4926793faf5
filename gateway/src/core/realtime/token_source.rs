//! Where a session gets its token from.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::token::{CredentialError, TokenEmbedding, TokenGrant, TokenMinter};

/// Errors raised while obtaining a token.
#[derive(Debug, Error)]
pub enum TokenSourceError {
    /// The local credential is missing or malformed
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The minting endpoint answered with an error
    #[error("token endpoint returned {status}: {message}")]
    Endpoint { status: u16, message: String },

    #[error("token request failed: {0}")]
    Http(String),

    #[error("token response malformed: {0}")]
    Malformed(String),
}

/// Produces a fresh [`TokenGrant`] for each connection attempt.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<TokenGrant, TokenSourceError>;
}

/// Mints tokens in-process from a credential held in memory.
pub struct LocalTokenSource {
    credential: Zeroizing<String>,
    minter: TokenMinter,
    base_url: String,
    strategies: Vec<TokenEmbedding>,
    lifetime_hint: Option<String>,
}

impl LocalTokenSource {
    pub fn new(
        credential: impl Into<String>,
        minter: TokenMinter,
        base_url: impl Into<String>,
        strategies: Vec<TokenEmbedding>,
    ) -> Self {
        Self {
            credential: Zeroizing::new(credential.into()),
            minter,
            base_url: base_url.into(),
            strategies,
            lifetime_hint: None,
        }
    }

    pub fn with_lifetime(mut self, seconds: u64) -> Self {
        self.lifetime_hint = Some(seconds.to_string());
        self
    }
}

#[async_trait]
impl TokenSource for LocalTokenSource {
    async fn fetch(&self) -> Result<TokenGrant, TokenSourceError> {
        let signed = self
            .minter
            .mint(&self.credential, self.lifetime_hint.as_deref())?;
        Ok(TokenGrant::new(signed, &self.base_url, &self.strategies))
    }
}

#[derive(Deserialize)]
struct EndpointError {
    #[serde(default)]
    error: Option<String>,
}

/// Fetches tokens from a minting endpoint over HTTP. Nothing is cached.
#[derive(Debug, Clone)]
pub struct HttpTokenSource {
    client: reqwest::Client,
    endpoint: String,
    exp_seconds: Option<u64>,
}

impl HttpTokenSource {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TokenSourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TokenSourceError::Http(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            exp_seconds: None,
        })
    }

    /// Request a specific lifetime; the server clamps it.
    pub fn with_exp_seconds(mut self, seconds: u64) -> Self {
        self.exp_seconds = Some(seconds);
        self
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch(&self) -> Result<TokenGrant, TokenSourceError> {
        let mut request = self
            .client
            .get(&self.endpoint)
            .header(reqwest::header::CACHE_CONTROL, "no-store");
        if let Some(seconds) = self.exp_seconds {
            request = request.query(&[("expSeconds", seconds)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TokenSourceError::Http(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TokenSourceError::Http(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<EndpointError>(&body)
                .ok()
                .and_then(|e| e.error)
                .unwrap_or_else(|| format!("token api status {}", status.as_u16()));
            return Err(TokenSourceError::Endpoint {
                status: status.as_u16(),
                message,
            });
        }

        let grant: TokenGrant = serde_json::from_slice(&body)
            .map_err(|e| TokenSourceError::Malformed(e.to_string()))?;
        if grant.token.is_empty() {
            return Err(TokenSourceError::Malformed("missing token".to_string()));
        }
        debug!(candidates = grant.ws_urls.len(), "Fetched realtime token");
        Ok(grant)
    }
}
