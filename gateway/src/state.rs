use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::token::TokenMinter;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub minter: TokenMinter,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        let minter = TokenMinter::new(config.token_default_lifetime_seconds);
        Arc::new(Self { config, minter })
    }
}
