//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `token` - Realtime token minting

pub mod api;
pub mod token;

pub use token::mint_token;
