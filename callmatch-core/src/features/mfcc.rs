//! `MfccExtractor` — Hamming window → FFT power spectrum → mel filterbank →
//! log → DCT-II.
//!
//! All buffers (FFT input, FFT scratch, power spectrum, band energies) are
//! allocated once in `new()`; `process_frame_into` does no heap work.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::{FeatureConfig, FeatureExtractor, FeatureFrame};
use crate::error::{CallMatchError, Result};

/// Floor added before every logarithm.
const LOG_FLOOR: f32 = 1e-10;

/// One triangular mel band, stored sparsely from its first non-zero bin.
struct MelBand {
    start_bin: usize,
    weights: Vec<f32>,
}

pub struct MfccExtractor {
    config: FeatureConfig,
    window: Vec<f32>,
    bands: Vec<MelBand>,
    /// Row-major `[num_coeffs][num_filters]`.
    dct: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_buf: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    power: Vec<f32>,
    band_energies: Vec<f32>,
    frames_emitted: usize,
}

impl MfccExtractor {
    /// Build an extractor; `config` is resolved (clamped) first.
    pub fn new(config: &FeatureConfig) -> Self {
        let config = config.resolved();
        let n = config.frame_size;

        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
        let scratch_len = fft.get_inplace_scratch_len();

        Self {
            window: build_hamming_window(n),
            bands: build_mel_bands(&config),
            dct: build_dct_matrix(config.num_coeffs, config.num_filters),
            fft_buf: vec![Complex::new(0.0, 0.0); n],
            fft_scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            power: vec![0.0; n / 2 + 1],
            band_energies: vec![0.0; config.num_filters],
            fft,
            config,
            frames_emitted: 0,
        }
    }
}

impl FeatureExtractor for MfccExtractor {
    fn config(&self) -> &FeatureConfig {
        &self.config
    }

    fn process_frame_into(&mut self, frame: &[f32], out: &mut [f32]) -> Result<f32> {
        let n = self.config.frame_size;
        if frame.len() != n {
            return Err(CallMatchError::FrameLength {
                expected: n,
                got: frame.len(),
            });
        }
        if out.len() != self.config.num_coeffs {
            return Err(CallMatchError::DimensionMismatch {
                expected: self.config.num_coeffs,
                got: out.len(),
            });
        }

        let mut energy = 0.0f32;
        for ((slot, &s), &w) in self.fft_buf.iter_mut().zip(frame).zip(&self.window) {
            let v = s * w;
            energy += v * v;
            *slot = Complex::new(v, 0.0);
        }
        let log_energy = (energy + LOG_FLOOR).ln();

        self.fft
            .process_with_scratch(&mut self.fft_buf, &mut self.fft_scratch);

        for (p, c) in self.power.iter_mut().zip(&self.fft_buf) {
            *p = c.norm_sqr();
        }

        for (e, band) in self.band_energies.iter_mut().zip(&self.bands) {
            let bins = &self.power[band.start_bin..band.start_bin + band.weights.len()];
            let sum: f32 = bins.iter().zip(&band.weights).map(|(p, w)| p * w).sum();
            *e = (sum + LOG_FLOOR).ln();
        }

        let num_filters = self.config.num_filters;
        for (i, c) in out.iter_mut().enumerate() {
            let row = &self.dct[i * num_filters..(i + 1) * num_filters];
            *c = row
                .iter()
                .zip(&self.band_energies)
                .map(|(d, e)| d * e)
                .sum();
        }

        if self.config.use_energy {
            out[0] = log_energy;
        }

        Ok(log_energy)
    }

    fn process_frame(&mut self, frame: &[f32]) -> Result<FeatureFrame> {
        let mut coefficients = vec![0.0; self.config.num_coeffs];
        let energy = self.process_frame_into(frame, &mut coefficients)?;
        let frame_index = self.frames_emitted;
        self.frames_emitted += 1;
        Ok(FeatureFrame {
            coefficients,
            energy,
            frame_index,
        })
    }

    fn reset(&mut self) {
        self.frames_emitted = 0;
        self.fft_buf.fill(Complex::new(0.0, 0.0));
        self.power.fill(0.0);
        self.band_energies.fill(0.0);
    }
}

fn build_hamming_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    let denom = (n - 1).max(1) as f32;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / denom).cos())
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular bands with unit peaks, evenly spaced on the mel scale between
/// `low_freq` and `high_freq`.
fn build_mel_bands(config: &FeatureConfig) -> Vec<MelBand> {
    let n_bins = config.frame_size / 2 + 1;
    let n_bands = config.num_filters;
    let mel_min = hz_to_mel(config.low_freq);
    let mel_max = hz_to_mel(config.high_freq);

    let hz_pts: Vec<f32> = (0..n_bands + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_bands + 1) as f32))
        .collect();
    let bin_hz = config.sample_rate as f32 / config.frame_size as f32;

    (0..n_bands)
        .map(|m| {
            let lower = hz_pts[m];
            let center = hz_pts[m + 1];
            let upper = hz_pts[m + 2];
            let down = (center - lower).max(1e-6);
            let up = (upper - center).max(1e-6);

            let dense: Vec<f32> = (0..n_bins)
                .map(|k| {
                    let f = k as f32 * bin_hz;
                    if f >= lower && f <= center {
                        (f - lower) / down
                    } else if f > center && f <= upper {
                        (upper - f) / up
                    } else {
                        0.0
                    }
                })
                .collect();

            match dense.iter().position(|&w| w > 0.0) {
                Some(first) => {
                    let last = dense.iter().rposition(|&w| w > 0.0).unwrap_or(first);
                    MelBand {
                        start_bin: first,
                        weights: dense[first..=last].to_vec(),
                    }
                }
                // Band narrower than one bin: contributes only the log floor.
                None => MelBand {
                    start_bin: 0,
                    weights: Vec::new(),
                },
            }
        })
        .collect()
}

/// Orthonormal DCT-II basis, first `num_coeffs` rows.
fn build_dct_matrix(num_coeffs: usize, num_filters: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    let scale = (2.0 / num_filters as f32).sqrt();
    let first = (1.0 / num_filters as f32).sqrt();
    let mut dct = Vec::with_capacity(num_coeffs * num_filters);
    for i in 0..num_coeffs {
        for j in 0..num_filters {
            let basis = (PI * i as f32 * (j as f32 + 0.5) / num_filters as f32).cos();
            dct.push(if i == 0 { basis * first } else { basis * scale });
        }
    }
    dct
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_config() -> FeatureConfig {
        FeatureConfig {
            sample_rate: 16_000,
            frame_size: 512,
            hop_size: 256,
            num_coeffs: 13,
            num_filters: 26,
            low_freq: 0.0,
            high_freq: 0.0,
            use_energy: true,
        }
    }

    fn sine(freq: f32, rate: u32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn process_frame_is_bit_identical_across_calls() {
        let mut mfcc = MfccExtractor::new(&small_config());
        let frame = sine(440.0, 16_000, 512, 0.4);

        let a = mfcc.process_frame(&frame).unwrap();
        let b = mfcc.process_frame(&frame).unwrap();
        let c = mfcc.process_frame(&frame).unwrap();

        for (x, y) in a.coefficients.iter().zip(&b.coefficients) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
        for (x, y) in a.coefficients.iter().zip(&c.coefficients) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
        assert_eq!(a.energy.to_bits(), c.energy.to_bits());
        assert_eq!((a.frame_index, b.frame_index, c.frame_index), (0, 1, 2));
    }

    #[test]
    fn reset_restarts_frame_index_without_changing_output() {
        let mut mfcc = MfccExtractor::new(&small_config());
        let frame = sine(1_000.0, 16_000, 512, 0.3);
        let before = mfcc.process_frame(&frame).unwrap();
        mfcc.process_frame(&frame).unwrap();

        mfcc.reset();
        let after = mfcc.process_frame(&frame).unwrap();
        assert_eq!(after.frame_index, 0);
        assert_eq!(before.coefficients, after.coefficients);
    }

    #[test]
    fn process_buffer_frame_count_follows_hop_formula() {
        let mut mfcc = MfccExtractor::new(&small_config());
        for len in [0usize, 100, 511, 512, 767, 768, 1_000, 4_096] {
            let buf = sine(300.0, 16_000, len, 0.2);
            let frames = mfcc.process_buffer(&buf).unwrap();
            let expected = if len >= 512 { (len - 512) / 256 + 1 } else { 0 };
            assert_eq!(frames.len(), expected, "len={len}");
        }
    }

    #[test]
    fn use_energy_overwrites_first_coefficient() {
        let frame = sine(700.0, 16_000, 512, 0.5);

        let mut with_energy = MfccExtractor::new(&small_config());
        let f = with_energy.process_frame(&frame).unwrap();
        assert_eq!(f.coefficients[0], f.energy);

        let mut cepstral_only = MfccExtractor::new(&FeatureConfig {
            use_energy: false,
            ..small_config()
        });
        let g = cepstral_only.process_frame(&frame).unwrap();
        assert_ne!(g.coefficients[0], g.energy);
        // Higher-order coefficients do not depend on the energy flag.
        assert_eq!(f.coefficients[1..], g.coefficients[1..]);
    }

    #[test]
    fn log_energy_matches_windowed_sum_of_squares() {
        let mut mfcc = MfccExtractor::new(&small_config());
        let frame = vec![0.25f32; 512];
        let f = mfcc.process_frame(&frame).unwrap();

        let window = build_hamming_window(512);
        let expected: f32 = window.iter().map(|w| (0.25 * w) * (0.25 * w)).sum();
        assert_relative_eq!(f.energy, (expected + LOG_FLOOR).ln(), epsilon = 1e-4);
    }

    #[test]
    fn different_tones_produce_different_fingerprints() {
        let mut mfcc = MfccExtractor::new(&small_config());
        let low = mfcc.process_frame(&sine(250.0, 16_000, 512, 0.4)).unwrap();
        let high = mfcc.process_frame(&sine(3_000.0, 16_000, 512, 0.4)).unwrap();
        let dist: f32 = low
            .coefficients
            .iter()
            .zip(&high.coefficients)
            .skip(1)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt();
        assert!(dist > 1.0, "cepstral distance too small: {dist}");
    }

    #[test]
    fn wrong_frame_length_is_rejected() {
        let mut mfcc = MfccExtractor::new(&small_config());
        let err = mfcc.process_frame(&[0.0; 100]).unwrap_err();
        assert!(matches!(
            err,
            CallMatchError::FrameLength {
                expected: 512,
                got: 100
            }
        ));
    }

    #[test]
    fn mel_bands_stay_within_spectrum() {
        let cfg = small_config().resolved();
        let bands = build_mel_bands(&cfg);
        assert_eq!(bands.len(), 26);
        for band in &bands {
            assert!(band.start_bin + band.weights.len() <= cfg.frame_size / 2 + 1);
            assert!(band.weights.iter().all(|&w| (0.0..=1.0).contains(&w)));
        }
    }

    #[test]
    fn dct_rows_are_orthonormal() {
        let dct = build_dct_matrix(13, 26);
        for a in 0..13 {
            for b in 0..13 {
                let dot: f32 = (0..26).map(|j| dct[a * 26 + j] * dct[b * 26 + j]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert_relative_eq!(dot, expected, epsilon = 1e-4);
            }
        }
    }
}
