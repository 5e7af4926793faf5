//! Fixed-size framing of captured audio.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::resample::{PROTOCOL_INPUT_RATE, f32_to_pcm16_le, resample_linear};

/// Outbound frame size: 200 ms of 16-bit mono PCM at 16 kHz.
pub const FRAME_BYTES: usize = 6400;

/// Turns capture buffers at the device rate into 6400-byte PCM16 frames.
///
/// Spans are queued in arrival order and frames are sliced off byte-exact,
/// so the concatenation of everything emitted (including the flushed tail)
/// equals the concatenation of everything pushed.
#[derive(Debug)]
pub struct CaptureChunker {
    device_rate: u32,
    frame_bytes: usize,
    pending: VecDeque<Bytes>,
    pending_len: usize,
}

impl CaptureChunker {
    pub fn new(device_rate: u32) -> Self {
        Self::with_frame_size(device_rate, FRAME_BYTES)
    }

    pub fn with_frame_size(device_rate: u32, frame_bytes: usize) -> Self {
        Self {
            device_rate,
            frame_bytes: frame_bytes.max(2),
            pending: VecDeque::new(),
            pending_len: 0,
        }
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Bytes queued but not yet emitted.
    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    /// Resample and quantize one capture buffer, returning any full frames.
    pub fn push_samples(&mut self, samples: &[f32]) -> Vec<Bytes> {
        let resampled = resample_linear(samples, self.device_rate, PROTOCOL_INPUT_RATE);
        self.push_bytes(Bytes::from(f32_to_pcm16_le(&resampled)))
    }

    /// Queue already-encoded PCM16 bytes, returning any full frames.
    pub fn push_bytes(&mut self, bytes: Bytes) -> Vec<Bytes> {
        if bytes.is_empty() {
            return Vec::new();
        }
        self.pending_len += bytes.len();
        self.pending.push_back(bytes);

        let mut frames = Vec::new();
        while self.pending_len >= self.frame_bytes {
            frames.push(self.take(self.frame_bytes));
        }
        frames
    }

    /// Emit whatever is queued as one final, possibly undersized frame.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.pending_len == 0 {
            return None;
        }
        let tail = self.take(self.pending_len);
        self.clear();
        Some(tail)
    }

    /// Drop everything queued.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.pending_len = 0;
    }

    fn take(&mut self, len: usize) -> Bytes {
        // Single span covers the frame: slice without copying
        if let Some(front) = self.pending.front_mut() {
            if front.len() >= len {
                let frame = front.split_to(len);
                if front.is_empty() {
                    self.pending.pop_front();
                }
                self.pending_len -= len;
                return frame;
            }
        }

        let mut frame = BytesMut::with_capacity(len);
        while frame.len() < len {
            let Some(front) = self.pending.front_mut() else {
                break;
            };
            let need = len - frame.len();
            if front.len() <= need {
                frame.extend_from_slice(front);
                self.pending.pop_front();
            } else {
                frame.extend_from_slice(&front.split_to(need));
            }
        }
        self.pending_len -= frame.len();
        frame.freeze()
    }
}
