use axum::{Router, routing::get};
use http::{HeaderValue, header::CACHE_CONTROL};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::token;
use crate::state::AppState;
use std::sync::Arc;

/// Create the API router
///
/// Every response from the token route, errors included, is marked uncacheable.
pub fn create_api_router() -> Router<Arc<AppState>> {
    let token_route = get(token::mint_token).fallback(token::method_not_allowed);

    Router::new()
        .route("/api/token", token_route.clone())
        .route("/api/token/", token_route)
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store, max-age=0"),
        ))
        .layer(TraceLayer::new_for_http())
}
