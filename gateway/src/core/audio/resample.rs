//! Sample-rate conversion and PCM16 quantization.
//!
//! Linear interpolation only. This is not a band-limited resampler; the exact
//! formula matters because both ends of the pipeline must agree on it.

/// Protocol input rate (microphone to remote).
pub const PROTOCOL_INPUT_RATE: u32 = 16_000;

/// Protocol output rate (remote to speaker).
pub const PROTOCOL_OUTPUT_RATE: u32 = 24_000;

/// Resample mono `input` from `in_rate` to `out_rate`.
///
/// For output index `i` the source position is `i * in_rate / out_rate`; the
/// sample is a linear blend of `floor(pos)` and `floor(pos) + 1`, reusing the
/// left neighbour past the end. Equal rates copy the input. An empty input or
/// a zero rate yields an empty output; otherwise at least one sample is
/// produced.
pub fn resample_linear(input: &[f32], in_rate: u32, out_rate: u32) -> Vec<f32> {
    if in_rate == out_rate {
        return input.to_vec();
    }
    if input.is_empty() || in_rate == 0 || out_rate == 0 {
        return Vec::new();
    }

    let ratio = in_rate as f64 / out_rate as f64;
    let out_len = ((input.len() as f64 / ratio).floor() as usize).max(1);
    let last = input[input.len() - 1];

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let s0 = input.get(idx).copied().unwrap_or(last);
            let s1 = input.get(idx + 1).copied().unwrap_or(s0);
            s0 + (s1 - s0) * frac
        })
        .collect()
}

/// Quantize one float sample to a signed 16-bit value.
///
/// Positive samples scale by 32767 and negative ones by 32768, so both
/// full-scale ends are reachable.
#[inline]
pub fn quantize_sample(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

/// Quantize float samples to 16-bit little-endian PCM bytes.
pub fn f32_to_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&quantize_sample(sample).to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM into floats in `[-1, 1]`.
///
/// A trailing odd byte is ignored.
pub fn pcm16_le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect()
}
