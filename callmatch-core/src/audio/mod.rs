//! Offline audio helpers: WAV decoding, mono down-mix and resampling.
//!
//! Live capture is the host's job; the engine only ever sees mono f32
//! chunks. Master calls on disk are decoded here with `hound`.

pub mod resample;

use std::path::Path;

use tracing::debug;

use crate::error::Result;

/// Decoded mono recording.
#[derive(Debug, Clone)]
pub struct MonoRecording {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl MonoRecording {
    /// Returns the duration of this recording in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Lowest input rate sessions and recordings may use (Hz).
pub const MIN_SAMPLE_RATE: u32 = 1_000;
/// Highest input rate sessions and recordings may use (Hz).
pub const MAX_SAMPLE_RATE: u32 = 768_000;

/// Read a WAV file (float or 8/16/24/32-bit integer PCM) and down-mix to mono.
///
/// # Errors
/// Returns `CallMatchError::Wav` if the file is missing or malformed.
pub fn read_wav_mono(path: &Path) -> Result<MonoRecording> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample <= 16 {
                let max = ((1_i32 << (spec.bits_per_sample.max(1) - 1)) - 1).max(1) as f32;
                reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| f32::from(v) / max))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            } else {
                let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        }
    };

    debug!(
        path = %path.display(),
        channels,
        sample_rate = spec.sample_rate,
        frames = interleaved.len() / channels,
        "decoded wav"
    );

    Ok(MonoRecording {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let scale = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}
