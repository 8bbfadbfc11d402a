use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

/// Basic facts about a WAV payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

/// Write PCM f32 samples as a 16-bit mono PCM WAV file.
pub fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    const I16_MAX_F32: f32 = i16::MAX as f32;
    for &s in samples {
        // Clamp and convert f32 [-1.0, 1.0] -> i16
        let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
        writer
            .write_sample(v)
            .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
    }
    writer
        .finalize()
        .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    Ok(())
}

/// Inspect an in-memory WAV payload. `None` if it is not a readable WAV.
pub fn describe(bytes: &[u8]) -> Option<WavInfo> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return None;
    }
    // duration() counts frames, i.e. samples per channel
    let frames = u64::from(reader.duration());
    Some(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration_ms: frames * 1000 / u64::from(spec.sample_rate),
    })
}

/// Scale amplitude in place.
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

/// Play `samples` back `speed` times faster using linear interpolation.
pub fn time_scale(samples: &[f32], speed: f32) -> Vec<f32> {
    if samples.is_empty() || !speed.is_finite() || speed <= 0.0 || (speed - 1.0).abs() < f32::EPSILON {
        return samples.to_vec();
    }

    let out_len = ((samples.len() as f32) / speed).round().max(1.0) as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f32 * speed;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac.clamp(0.0, 1.0)
        })
        .collect()
}
