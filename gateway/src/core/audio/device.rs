//! Audio device abstractions and capability tiers.
//!
//! The session never talks to hardware directly. It is handed a
//! [`AudioBackend`] that opens a [`CaptureDevice`] and an [`AudioOutput`]
//! configured by a [`DeviceProfile`]. The profile comes from a
//! [`DevicePolicy`], so tier detection can be swapped or forced in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by capture or playback backends.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("capture device unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),

    #[error("capture already running")]
    AlreadyCapturing,

    #[error("audio I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio format error: {0}")]
    Format(String),
}

/// Capability tier of the host environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTier {
    #[default]
    Standard,
    /// Embedded webviews and older tablets: larger buffers, fewer callbacks
    Lite,
}

/// Capture configuration handed to a backend at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub tier: DeviceTier,
    /// Samples per capture callback
    pub buffer_size: usize,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl DeviceProfile {
    pub fn for_tier(tier: DeviceTier) -> Self {
        let buffer_size = match tier {
            DeviceTier::Standard => 2048,
            DeviceTier::Lite => 4096,
        };
        Self {
            tier,
            buffer_size,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self::for_tier(DeviceTier::Standard)
    }
}

/// What the host reports about itself.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentHints {
    pub user_agent: String,
    pub platform: String,
    pub max_touch_points: u32,
    /// Longest screen edge in CSS pixels
    pub screen_long_edge: Option<u32>,
    /// Reported device memory in GB
    pub device_memory_gb: Option<f64>,
}

/// Chooses a [`DeviceProfile`] for the host.
pub trait DevicePolicy: Send + Sync {
    fn profile(&self, hints: &EnvironmentHints) -> DeviceProfile;
}

/// Always returns the same tier.
#[derive(Debug, Clone, Copy)]
pub struct FixedTierPolicy(pub DeviceTier);

impl DevicePolicy for FixedTierPolicy {
    fn profile(&self, _hints: &EnvironmentHints) -> DeviceProfile {
        DeviceProfile::for_tier(self.0)
    }
}

/// User-agent heuristics: in-app webviews and first-generation iPad Pro
/// class tablets get the lite tier. A forced tier overrides detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAgentPolicy {
    pub forced: Option<DeviceTier>,
}

impl UserAgentPolicy {
    fn is_embedded_webview(hints: &EnvironmentHints) -> bool {
        hints.user_agent.to_ascii_lowercase().contains("micromessenger")
    }

    fn is_constrained_tablet(hints: &EnvironmentHints) -> bool {
        // Desktop-class Safari on iPad reports MacIntel with touch points
        let is_ipad = hints.user_agent.to_ascii_lowercase().contains("ipad")
            || (hints.platform == "MacIntel" && hints.max_touch_points > 1);
        is_ipad
            && hints.screen_long_edge.is_some_and(|edge| edge <= 1366)
            && hints.device_memory_gb.is_none_or(|gb| gb <= 4.0)
    }
}

impl DevicePolicy for UserAgentPolicy {
    fn profile(&self, hints: &EnvironmentHints) -> DeviceProfile {
        let tier = self.forced.unwrap_or_else(|| {
            if Self::is_embedded_webview(hints) || Self::is_constrained_tablet(hints) {
                DeviceTier::Lite
            } else {
                DeviceTier::Standard
            }
        });
        DeviceProfile::for_tier(tier)
    }
}

/// Called from the capture thread with one buffer of mono samples at the
/// device rate. Must not block.
pub type CaptureCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A live input device.
pub trait CaptureDevice: Send {
    /// Native sample rate
    fn sample_rate(&self) -> u32;

    /// Begin delivering buffers to `callback`.
    fn start(&mut self, callback: CaptureCallback) -> Result<(), DeviceError>;

    /// Stop delivering buffers and release the device. Idempotent.
    fn stop(&mut self);
}

/// A playback sink with its own clock.
pub trait AudioOutput: Send {
    /// Native sample rate
    fn sample_rate(&self) -> u32;

    /// Current position of the output clock, in seconds
    fn current_time(&self) -> f64;

    /// Play `samples` starting at `start_at` on the output clock.
    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<(), DeviceError>;

    /// Release the output. Idempotent.
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Opens devices for a session.
pub trait AudioBackend: Send + Sync {
    fn open_capture(&self, profile: &DeviceProfile) -> Result<Box<dyn CaptureDevice>, DeviceError>;

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, DeviceError>;
}
