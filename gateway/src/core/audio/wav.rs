//! WAV file backend.
//!
//! Capture replays a file through the capture callback in device-sized
//! buffers; output renders every scheduled chunk at its clock position and
//! writes the result when closed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::device::{
    AudioBackend, AudioOutput, CaptureCallback, CaptureDevice, DeviceError, DeviceProfile,
};
use super::resample::quantize_sample;

impl From<hound::Error> for DeviceError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => DeviceError::Io(io),
            other => DeviceError::Format(other.to_string()),
        }
    }
}

/// Read a WAV file as mono floats, averaging channels.
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32), DeviceError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(Result::ok)
                .map(|s| s as f32 / max_val)
                .collect()
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().filter_map(Result::ok).collect(),
    };

    let mono = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

/// Wakes the replay thread out of its lead-in and pacing waits.
#[derive(Default)]
struct StopSignal {
    raised: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *self.raised.lock() = true;
        self.wake.notify_all();
    }

    fn reset(&self) {
        *self.raised.lock() = false;
    }

    fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Block for up to `timeout`. Returns `true` if stop was raised.
    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut raised = self.raised.lock();
        while !*raised {
            if self.wake.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        *raised
    }
}

/// Replays samples through the capture callback.
pub struct WavCaptureDevice {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    buffer_size: usize,
    realtime: bool,
    lead_in: Duration,
    stop: Arc<StopSignal>,
    worker: Option<JoinHandle<()>>,
}

impl WavCaptureDevice {
    pub fn open(path: &Path, profile: &DeviceProfile, realtime: bool) -> Result<Self, DeviceError> {
        let (samples, sample_rate) = read_wav_mono(path)
            .map_err(|e| DeviceError::CaptureUnavailable(format!("{}: {}", path.display(), e)))?;
        debug!(
            "Opened WAV capture {} ({} samples at {} Hz)",
            path.display(),
            samples.len(),
            sample_rate
        );
        Ok(Self::from_samples(samples, sample_rate, profile.buffer_size, realtime))
    }

    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, buffer_size: usize, realtime: bool) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            buffer_size: buffer_size.max(1),
            realtime,
            lead_in: Duration::ZERO,
            stop: Arc::new(StopSignal::default()),
            worker: None,
        }
    }

    /// Wait this long after `start` before the first buffer.
    pub fn with_lead_in(mut self, lead_in: Duration) -> Self {
        self.lead_in = lead_in;
        self
    }

    /// Length of the source material.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

impl CaptureDevice for WavCaptureDevice {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, mut callback: CaptureCallback) -> Result<(), DeviceError> {
        if self.worker.is_some() {
            return Err(DeviceError::AlreadyCapturing);
        }
        self.stop.reset();

        let samples = Arc::clone(&self.samples);
        let stop = Arc::clone(&self.stop);
        let buffer_size = self.buffer_size;
        let lead_in = self.lead_in;
        let pace = self.realtime.then(|| {
            Duration::from_secs_f64(buffer_size as f64 / self.sample_rate.max(1) as f64)
        });

        let worker = std::thread::Builder::new()
            .name("wav-capture".to_string())
            .spawn(move || {
                if !lead_in.is_zero() && stop.wait(lead_in) {
                    return;
                }
                for buffer in samples.chunks(buffer_size) {
                    if stop.is_raised() {
                        break;
                    }
                    callback(buffer);
                    if let Some(pace) = pace {
                        if stop.wait(pace) {
                            break;
                        }
                    }
                }
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.raise();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("WAV capture thread panicked");
            }
        }
    }
}

impl Drop for WavCaptureDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Renders scheduled chunks into a WAV file on a wall-clock timeline.
pub struct WavOutput {
    path: PathBuf,
    sample_rate: u32,
    epoch: Instant,
    timeline: Vec<f32>,
    closed: bool,
}

impl WavOutput {
    pub fn new(path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            path: path.into(),
            sample_rate: sample_rate.max(1),
            epoch: Instant::now(),
            timeline: Vec::new(),
            closed: false,
        }
    }

    /// Rendered samples so far.
    pub fn rendered(&self) -> &[f32] {
        &self.timeline
    }
}

impl AudioOutput for WavOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, samples: Vec<f32>, start_at: f64) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::OutputUnavailable("output closed".to_string()));
        }
        let offset = (start_at.max(0.0) * self.sample_rate as f64).round() as usize;
        let end = offset + samples.len();
        if self.timeline.len() < end {
            self.timeline.resize(end, 0.0);
        }
        // overlapping chunks are mixed
        for (slot, sample) in self.timeline[offset..end].iter_mut().zip(samples) {
            *slot += sample;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&self.path, spec)?;
        for &sample in &self.timeline {
            writer.write_sample(quantize_sample(sample))?;
        }
        writer.finalize()?;
        info!(
            "Wrote {:.2}s of playback to {}",
            self.timeline.len() as f64 / self.sample_rate as f64,
            self.path.display()
        );
        Ok(())
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to write playback file: {}", e);
        }
    }
}

/// Opens a [`WavCaptureDevice`] on `input` and a [`WavOutput`] on `output`.
#[derive(Debug, Clone)]
pub struct WavBackend {
    pub input: PathBuf,
    pub output: PathBuf,
    pub output_rate: u32,
    /// Pace capture at real time instead of as fast as possible
    pub realtime: bool,
    /// Delay before the first capture buffer
    pub lead_in: Duration,
}

impl AudioBackend for WavBackend {
    fn open_capture(&self, profile: &DeviceProfile) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        let device = WavCaptureDevice::open(&self.input, profile, self.realtime)?;
        Ok(Box::new(device.with_lead_in(self.lead_in)))
    }

    fn open_output(&self) -> Result<Box<dyn AudioOutput>, DeviceError> {
        Ok(Box::new(WavOutput::new(self.output.clone(), self.output_rate)))
    }
}
