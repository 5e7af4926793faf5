//! Token minting endpoint.
//!
//! `GET /api/token[?expSeconds=N]` signs a short-lived token with the server
//! credential and returns it with the candidate URLs a client should try.
//! The credential itself never leaves the process.

use std::sync::Arc;

use axum::{
    Json,
    extract::{RawQuery, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::API_KEY_ENV;
use crate::core::token::{CredentialDiagnostics, CredentialError, TokenGrant};
use crate::state::AppState;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TokenQuery {
    /// Requested lifetime in seconds; clamped by the minter
    pub exp_seconds: Option<String>,
}

impl TokenQuery {
    /// Lenient parse: the first `expSeconds` wins, anything else is ignored.
    pub fn from_raw(raw: Option<&str>) -> Self {
        let exp_seconds = raw.and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(name, _)| name == "expSeconds")
                .map(|(_, value)| value.into_owned())
        });
        Self { exp_seconds }
    }
}

pub async fn mint_token(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
) -> Response {
    let query = TokenQuery::from_raw(raw_query.as_deref());
    let raw = state.config.api_key();

    if raw.trim().is_empty() {
        warn!("Token requested but no credential is configured");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("{API_KEY_ENV} is not configured: set it to '{{id}}.{{secret}}'"),
                "diag": CredentialDiagnostics::inspect(raw),
            })),
        )
            .into_response();
    }

    match state.minter.mint(raw, query.exp_seconds.as_deref()) {
        Ok(signed) => {
            let grant = TokenGrant::new(
                signed,
                &state.config.negotiation.base_url,
                &state.config.negotiation.strategies,
            );
            info!(
                expires_at_ms = grant.expires_at_ms,
                candidates = grant.ws_urls.len(),
                "Issued realtime token"
            );
            (StatusCode::OK, Json(grant)).into_response()
        }
        Err(CredentialError::Signing(e)) => {
            error!("Token signing failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to sign token" })),
            )
                .into_response()
        }
        Err(e) => {
            warn!("Configured credential is malformed: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": e.to_string(),
                    "diag": CredentialDiagnostics::inspect(raw),
                })),
            )
                .into_response()
        }
    }
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}
