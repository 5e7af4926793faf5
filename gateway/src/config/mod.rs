//! Configuration module for the push-to-talk gateway
//!
//! Handles server configuration from .env files, environment variables and YAML
//! files. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Example
//! ```rust,no_run
//! use ptt_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::str::FromStr;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::DeviceTier;
use crate::core::realtime::{NegotiationSettings, SessionSettings};
use crate::core::token::{DEFAULT_LIFETIME_SECONDS, MAX_LIFETIME_SECONDS, MIN_LIFETIME_SECONDS};

/// Primary credential variable.
pub const API_KEY_ENV: &str = "REALTIME_API_KEY";

/// Accepted when [`API_KEY_ENV`] is unset.
pub const LEGACY_API_KEY_ENV: &str = "ZHIPU_API_KEY";

/// TLS configuration for HTTPS
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains everything needed to run the token endpoint and the CLI tools:
/// - Server settings (host, port, TLS)
/// - The upstream credential and realtime base URL
/// - Session and negotiation settings shared with clients
/// - Security settings (CORS, rate limiting)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// Raw `{id}.{secret}` credential, untrimmed. `None` when unset.
    pub realtime_api_key: Option<String>,
    /// Lifetime used when a request carries no usable hint
    pub token_default_lifetime_seconds: u64,

    pub session: SessionSettings,
    pub negotiation: NegotiationSettings,
    /// Forced device tier; `None` means detect
    pub device_tier: Option<DeviceTier>,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,
}

/// Zeroize the credential when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.realtime_api_key {
            key.zeroize();
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5173,
            tls: None,
            realtime_api_key: None,
            token_default_lifetime_seconds: DEFAULT_LIFETIME_SECONDS,
            session: SessionSettings::default(),
            negotiation: NegotiationSettings::default(),
            device_tier: None,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// .env values are expected to be loaded already (see `main.rs`).
    ///
    /// # Errors
    /// Returns an error if a numeric variable cannot be parsed or only one of
    /// `TLS_CERT_PATH`/`TLS_KEY_PATH` is set.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Self::default();

        let cert_path = env_var("TLS_CERT_PATH");
        let key_path = env_var("TLS_KEY_PATH");
        let tls = match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".into()),
        };

        let mut negotiation = NegotiationSettings::default();
        if let Some(base_url) = env_var("REALTIME_BASE_URL") {
            negotiation.base_url = base_url;
        }

        let config = Self {
            host: env_var("HOST").unwrap_or_else(|| defaults.host.clone()),
            port: parse_env("PORT", defaults.port)?,
            tls,
            realtime_api_key: raw_env_var(API_KEY_ENV).or_else(|| raw_env_var(LEGACY_API_KEY_ENV)),
            token_default_lifetime_seconds: parse_env(
                "TOKEN_DEFAULT_LIFETIME_SECONDS",
                defaults.token_default_lifetime_seconds,
            )?,
            session: SessionSettings::default(),
            negotiation,
            device_tier: None,
            cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: parse_env(
                "RATE_LIMIT_REQUESTS_PER_SECOND",
                defaults.rate_limit_requests_per_second,
            )?,
            rate_limit_burst_size: parse_env(
                "RATE_LIMIT_BURST_SIZE",
                defaults.rate_limit_burst_size,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed, an
    /// environment variable has an invalid format, or validation fails.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = Self::from_env()?;
        config.apply_yaml(yaml_config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(tls) = server.tls {
                match (tls.enabled, tls.cert_path, tls.key_path) {
                    (Some(false), _, _) => self.tls = None,
                    (_, Some(cert), Some(key)) => {
                        self.tls = Some(TlsConfig {
                            cert_path: PathBuf::from(cert),
                            key_path: PathBuf::from(key),
                        })
                    }
                    (Some(true), _, _) => {
                        return Err("TLS enabled but cert_path or key_path is missing".into());
                    }
                    _ => {}
                }
            }
        }

        if let Some(realtime) = yaml.realtime {
            if let Some(key) = realtime.api_key {
                if let Some(ref mut old) = self.realtime_api_key {
                    use zeroize::Zeroize;
                    old.zeroize();
                }
                self.realtime_api_key = Some(key);
            }
            if let Some(base_url) = realtime.base_url {
                self.negotiation.base_url = base_url;
            }
            if let Some(seconds) = realtime.token_default_lifetime_seconds {
                self.token_default_lifetime_seconds = seconds;
            }
        }

        if let Some(session) = yaml.session {
            self.session = session;
        }

        if let Some(negotiation) = yaml.negotiation {
            if let Some(ms) = negotiation.connect_timeout_ms {
                self.negotiation.connect_timeout_ms = ms;
            }
            if let Some(strategies) = negotiation.strategies {
                self.negotiation.strategies = strategies;
            }
        }

        if let Some(audio) = yaml.audio {
            self.device_tier = audio.tier;
        }

        if let Some(security) = yaml.security {
            if let Some(origins) = security.cors_allowed_origins {
                self.cors_allowed_origins = Some(origins);
            }
            if let Some(rps) = security.rate_limit_requests_per_second {
                self.rate_limit_requests_per_second = rps;
            }
            if let Some(burst) = security.rate_limit_burst_size {
                self.rate_limit_burst_size = burst;
            }
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !(MIN_LIFETIME_SECONDS..=MAX_LIFETIME_SECONDS)
            .contains(&self.token_default_lifetime_seconds)
        {
            return Err(format!(
                "token_default_lifetime_seconds must be between {MIN_LIFETIME_SECONDS} and {MAX_LIFETIME_SECONDS}, got {}",
                self.token_default_lifetime_seconds
            )
            .into());
        }
        if self.negotiation.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be greater than zero".into());
        }
        if self.negotiation.strategies.is_empty() {
            return Err("at least one negotiation strategy is required".into());
        }
        url::Url::parse(&self.negotiation.base_url)
            .map_err(|e| format!("Invalid realtime base URL '{}': {e}", self.negotiation.base_url))?;
        if self.rate_limit_requests_per_second == 0 || self.rate_limit_burst_size == 0 {
            return Err("rate limit values must be greater than zero".into());
        }
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// The configured credential, or an empty string when unset.
    pub fn api_key(&self) -> &str {
        self.realtime_api_key.as_deref().unwrap_or_default()
    }
}

/// A set, non-blank variable, trimmed.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A set variable as-is; credential diagnostics need the untrimmed value.
fn raw_env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T>(name: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(value) => value
            .parse()
            .map_err(|e| format!("Invalid {name} value '{value}': {e}")),
        None => Ok(default),
    }
}
