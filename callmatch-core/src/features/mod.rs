//! Spectral feature extraction.
//!
//! The `FeatureExtractor` trait is the seam between the session pipeline and
//! the spectral internals: the session only sees a config, a per-frame call
//! and `reset()`. `MfccExtractor` is the default (and currently only)
//! implementation.
//!
//! ## Framing
//!
//! ```text
//! |<------ frame_size ------>|
//!           |<------ frame_size ------>|
//! |<-hop->|
//! ```
//!
//! A buffer of `L` samples yields `⌊(L − frame_size) / hop_size⌋ + 1` frames
//! when `L ≥ frame_size`, otherwise none. Trailing partial windows are dropped.

pub mod fingerprint;
pub mod mfcc;

pub use fingerprint::Fingerprint;
pub use mfcc::MfccExtractor;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// MFCC front-end configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct FeatureConfig {
    /// Analysis sample rate in Hz. Live sessions and master calls are
    /// resampled to this rate before framing.
    pub sample_rate: u32,
    /// Window length in samples (also the FFT length).
    pub frame_size: usize,
    /// Stride between consecutive windows. Must not exceed `frame_size`.
    pub hop_size: usize,
    /// Cepstral coefficients kept per frame.
    pub num_coeffs: usize,
    /// Triangular mel bands.
    pub num_filters: usize,
    /// Lower edge of the filterbank (Hz).
    pub low_freq: f32,
    /// Upper edge of the filterbank (Hz). `0` means Nyquist.
    pub high_freq: f32,
    /// Replace coefficient 0 with the frame's log-energy.
    pub use_energy: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 2048,
            hop_size: 512,
            num_coeffs: 13,
            num_filters: 26,
            low_freq: 0.0,
            high_freq: 0.0,
            use_energy: true,
        }
    }
}

impl FeatureConfig {
    /// Nyquist frequency of the analysis rate.
    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Return a copy with every field clamped into its valid range.
    ///
    /// Out-of-range values are clamped rather than rejected; a zero or
    /// over-Nyquist `high_freq` resolves to Nyquist.
    pub fn resolved(&self) -> Self {
        let mut cfg = self.clone();
        cfg.sample_rate = cfg.sample_rate.max(1_000);
        cfg.frame_size = cfg.frame_size.max(2);
        cfg.hop_size = cfg.hop_size.clamp(1, cfg.frame_size);
        cfg.num_coeffs = cfg.num_coeffs.max(1);
        cfg.num_filters = cfg.num_filters.max(1);

        let nyquist = cfg.nyquist();
        if !(cfg.high_freq > 0.0) || cfg.high_freq > nyquist {
            cfg.high_freq = nyquist;
        }
        if !(cfg.low_freq >= 0.0) || cfg.low_freq >= cfg.high_freq {
            cfg.low_freq = 0.0;
        }
        cfg
    }

    /// Number of frames `process_buffer` produces for `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.frame_size || self.hop_size == 0 {
            0
        } else {
            (len - self.frame_size) / self.hop_size + 1
        }
    }
}

/// Cepstral fingerprint of one analysis window. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    /// `num_coeffs` cepstral coefficients.
    pub coefficients: Vec<f32>,
    /// Natural-log energy of the windowed frame.
    pub energy: f32,
    /// Position within the sequence this frame was emitted into.
    pub frame_index: usize,
}

/// Contract for spectral feature front ends.
///
/// `process_frame` must be a pure function of its input and the config:
/// repeated calls with the same samples produce bit-identical coefficients
/// and energy. The only state carried between calls is the emission counter
/// stamped into `FeatureFrame::frame_index`.
pub trait FeatureExtractor: Send + 'static {
    /// The resolved configuration this extractor was built with.
    fn config(&self) -> &FeatureConfig;

    /// Extract coefficients for exactly `frame_size` samples into `out`
    /// (`num_coeffs` long) and return the frame's log-energy.
    ///
    /// Allocation-free; this is the call used on the real-time path.
    fn process_frame_into(&mut self, frame: &[f32], out: &mut [f32]) -> Result<f32>;

    /// Extract one owned `FeatureFrame`.
    fn process_frame(&mut self, frame: &[f32]) -> Result<FeatureFrame>;

    /// Split `buffer` into hop-strided windows and extract each one.
    fn process_buffer(&mut self, buffer: &[f32]) -> Result<Vec<FeatureFrame>> {
        let frame_size = self.config().frame_size;
        let hop_size = self.config().hop_size;
        let count = self.config().frame_count(buffer.len());

        let mut frames = Vec::with_capacity(count);
        for i in 0..count {
            let start = i * hop_size;
            frames.push(self.process_frame(&buffer[start..start + frame_size])?);
        }
        Ok(frames)
    }

    /// Clear derived runtime state. The config stays valid.
    fn reset(&mut self);
}

/// Build the default extractor for `config`.
pub fn default_extractor(config: &FeatureConfig) -> Box<dyn FeatureExtractor> {
    Box::new(MfccExtractor::new(config))
}
