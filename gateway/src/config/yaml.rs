use serde::Deserialize;
use std::path::PathBuf;

use crate::core::audio::DeviceTier;
use crate::core::realtime::SessionSettings;
use crate::core::token::TokenEmbedding;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 5173
///   tls:
///     enabled: true
///     cert_path: "/etc/ptt/cert.pem"
///     key_path: "/etc/ptt/key.pem"
///
/// realtime:
///   api_key: "{id}.{secret}"
///   base_url: "wss://open.bigmodel.cn/api/paas/v4/realtime"
///   token_default_lifetime_seconds: 600
///
/// session:
///   voice: "tongtong"
///   temperature: 0.6
///   greeting:
///     enabled: true
///     content: "hello"
///
/// negotiation:
///   connect_timeout_ms: 6500
///   strategies:
///     - { placement: query, name: token }
///     - { placement: query, name: token, bearer: true }
///
/// audio:
///   tier: lite
///
/// security:
///   cors_allowed_origins: "*"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub session: Option<SessionSettings>,
    pub negotiation: Option<NegotiationYaml>,
    pub audio: Option<AudioYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Upstream realtime service
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    /// Credential in `{id}.{secret}` form
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub token_default_lifetime_seconds: Option<u64>,
}

/// Candidate negotiation overrides
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NegotiationYaml {
    pub connect_timeout_ms: Option<u64>,
    /// Replaces the default strategy list when present
    pub strategies: Option<Vec<TokenEmbedding>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    /// Forces a device tier instead of detecting one
    pub tier: Option<DeviceTier>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
