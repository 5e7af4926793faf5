//! Audio path: capture framing, rate conversion and playback scheduling.

mod chunker;
mod device;
mod playback;
mod resample;
pub mod wav;

pub use chunker::{CaptureChunker, FRAME_BYTES};
pub use device::{
    AudioBackend, AudioOutput, CaptureCallback, CaptureDevice, DeviceError, DevicePolicy,
    DeviceProfile, DeviceTier, EnvironmentHints, FixedTierPolicy, UserAgentPolicy,
};
pub use playback::{LATENCY_GUARD_SECONDS, PlaybackScheduler, ScheduledChunk};
pub use resample::{
    PROTOCOL_INPUT_RATE, PROTOCOL_OUTPUT_RATE, f32_to_pcm16_le, pcm16_le_to_f32,
    quantize_sample, resample_linear,
};
pub use wav::{WavBackend, WavCaptureDevice, WavOutput};
