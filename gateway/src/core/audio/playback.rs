//! Gap-free scheduling of inbound audio.

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use tracing::{trace, warn};

use super::device::{AudioOutput, DeviceError};
use super::resample::{PROTOCOL_OUTPUT_RATE, pcm16_le_to_f32, resample_linear};

/// Minimum lead between "now" and a chunk's start, in seconds.
pub const LATENCY_GUARD_SECONDS: f64 = 0.02;

/// Where a chunk landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    pub start_at: f64,
    pub duration: f64,
    pub frames: usize,
}

/// Keeps a single cursor on the output clock and places each chunk at
/// `max(now + guard, cursor)`, then advances the cursor by the chunk's
/// duration. Enqueue order is play order.
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    next_start: f64,
    guard: f64,
    input_rate: u32,
}

impl PlaybackScheduler {
    pub fn new(now: f64) -> Self {
        Self {
            next_start: now,
            guard: LATENCY_GUARD_SECONDS,
            input_rate: PROTOCOL_OUTPUT_RATE,
        }
    }

    pub fn with_guard(mut self, guard: f64) -> Self {
        self.guard = guard.max(0.0);
        self
    }

    /// The next free slot on the output clock.
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Rewind the cursor to `now`, e.g. after the output was reopened.
    pub fn reset(&mut self, now: f64) {
        self.next_start = now;
    }

    /// Reserve `duration` seconds and return the start time.
    pub fn schedule(&mut self, now: f64, duration: f64) -> f64 {
        let start = (now + self.guard).max(self.next_start);
        self.next_start = start + duration.max(0.0);
        start
    }

    /// Decode a base64 PCM16 chunk at 24 kHz, resample it to the output rate
    /// and hand it to `output` at the next free slot.
    ///
    /// Undecodable or empty chunks are dropped and yield `Ok(None)`.
    pub fn enqueue(
        &mut self,
        audio_b64: &str,
        output: &mut dyn AudioOutput,
    ) -> Result<Option<ScheduledChunk>, DeviceError> {
        let bytes = match BASE64_STANDARD.decode(audio_b64) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {}", e);
                return Ok(None);
            }
        };
        let samples = pcm16_le_to_f32(&bytes);
        if samples.is_empty() {
            return Ok(None);
        }

        let out_rate = output.sample_rate();
        let samples = resample_linear(&samples, self.input_rate, out_rate);
        if samples.is_empty() {
            return Ok(None);
        }

        let frames = samples.len();
        let duration = frames as f64 / out_rate as f64;
        let start_at = self.schedule(output.current_time(), duration);
        output.schedule(samples, start_at)?;

        trace!(start_at, duration, frames, "Scheduled playback chunk");
        Ok(Some(ScheduledChunk {
            start_at,
            duration,
            frames,
        }))
    }
}
