//! Session and negotiation settings.
//!
//! The behavior instructions, voice and greeting are product decisions, so
//! they live here as overridable defaults rather than in protocol code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::messages::{BetaFields, GreetingConfig, MaxTokens, NoiseReduction, SessionConfig};
use crate::core::token::{DEFAULT_BASE_URL, TokenEmbedding, default_strategies};

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "glm-realtime";

/// Default voice identity.
pub const DEFAULT_VOICE: &str = "tongtong";

/// Default behavior instructions.
pub const DEFAULT_INSTRUCTIONS: &str = "你是一个善于与5岁幼儿园小朋友对话的陪伴型老师，名字叫“海皮”。你认识一个小朋友叫 CC（5岁多，不到6岁），很聪明很可爱；你在和 CC 聊天。用非常友好、耐心、鼓励的语气。句子短一点，多提开放式问题，引导孩子表达感受与想法。避免恐怖、暴力、成人、危险行为内容。孩子说错也不要纠正得太硬，先肯定再轻轻引导。";

/// Default greeting spoken when the session opens.
pub const DEFAULT_GREETING: &str = "你好CC，我是海皮";

/// Default per-candidate connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 6500;

/// Greeting behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreetingSettings {
    pub enabled: bool,
    pub content: String,
}

impl Default for GreetingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            content: DEFAULT_GREETING.to_string(),
        }
    }
}

/// Everything sent in `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub model: String,
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// `None` disables noise reduction
    pub noise_reduction: Option<String>,
    pub temperature: f32,
    pub max_response_output_tokens: MaxTokens,
    pub chat_mode: String,
    pub tts_source: String,
    pub greeting: GreetingSettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm".to_string(),
            noise_reduction: Some("far_field".to_string()),
            temperature: 0.6,
            max_response_output_tokens: MaxTokens::default(),
            chat_mode: "audio".to_string(),
            tts_source: "e2e".to_string(),
            greeting: GreetingSettings::default(),
        }
    }
}

impl SessionSettings {
    /// Build the `session.update` payload.
    pub fn to_session_config(&self) -> SessionConfig {
        let greeting_config = if self.greeting.enabled {
            GreetingConfig {
                enable: true,
                content: Some(self.greeting.content.clone()).filter(|c| !c.is_empty()),
            }
        } else {
            GreetingConfig {
                enable: false,
                content: None,
            }
        };

        SessionConfig {
            model: self.model.clone(),
            modalities: self.modalities.clone(),
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
            input_audio_format: self.input_audio_format.clone(),
            output_audio_format: self.output_audio_format.clone(),
            input_audio_noise_reduction: self
                .noise_reduction
                .clone()
                .map(|mode| NoiseReduction { mode }),
            temperature: Some(self.temperature),
            max_response_output_tokens: Some(self.max_response_output_tokens.clone()),
            beta_fields: Some(BetaFields {
                chat_mode: self.chat_mode.clone(),
                tts_source: self.tts_source.clone(),
                greeting_config: Some(greeting_config),
            }),
        }
    }
}

/// How connection candidates are built and tried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationSettings {
    /// Realtime endpoint the local candidates are derived from
    pub base_url: String,
    /// Per-candidate timeout
    pub connect_timeout_ms: u64,
    /// Token embeddings, highest priority first
    pub strategies: Vec<TokenEmbedding>,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            strategies: default_strategies(),
        }
    }
}

impl NegotiationSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_config() {
        let config = SessionSettings::default().to_session_config();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["model"], "glm-realtime");
        assert_eq!(value["voice"], "tongtong");
        assert_eq!(value["input_audio_format"], "pcm16");
        assert_eq!(value["output_audio_format"], "pcm");
        assert_eq!(value["input_audio_noise_reduction"]["type"], "far_field");
        assert_eq!(value["max_response_output_tokens"], "inf");
        assert_eq!(value["beta_fields"]["chat_mode"], "audio");
        assert_eq!(value["beta_fields"]["tts_source"], "e2e");
        assert_eq!(value["beta_fields"]["greeting_config"]["enable"], true);
        assert_eq!(
            value["beta_fields"]["greeting_config"]["content"],
            DEFAULT_GREETING
        );
        assert_eq!(value["instructions"], DEFAULT_INSTRUCTIONS);
        assert!((value["temperature"].as_f64().unwrap() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_greeting_disabled() {
        let settings = SessionSettings {
            greeting: GreetingSettings {
                enabled: false,
                content: "ignored".to_string(),
            },
            noise_reduction: None,
            ..Default::default()
        };
        let value = serde_json::to_value(settings.to_session_config()).unwrap();
        assert_eq!(value["beta_fields"]["greeting_config"]["enable"], false);
        assert!(value["beta_fields"]["greeting_config"].get("content").is_none());
        assert!(value.get("input_audio_noise_reduction").is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "voice: xiaochen\ntemperature: 0.8\ngreeting:\n  enabled: false\n";
        let settings: SessionSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.voice, "xiaochen");
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.instructions, DEFAULT_INSTRUCTIONS);
        assert!(!settings.greeting.enabled);
        assert_eq!(settings.greeting.content, DEFAULT_GREETING);
    }

    #[test]
    fn test_negotiation_defaults() {
        let settings = NegotiationSettings::default();
        assert_eq!(settings.connect_timeout(), Duration::from_millis(6500));
        assert_eq!(settings.strategies.len(), 6);
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
    }
}
