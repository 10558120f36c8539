//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Every fingerprint is computed at the engine's analysis rate. Sessions
//! started at another rate, and master-call WAVs recorded at another rate,
//! go through a `RateConverter` first so live and reference frames cover the
//! same bandwidth and duration.
//!
//! When input rate == analysis rate, `RateConverter` is a passthrough — no
//! rubato state is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{CallMatchError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `input_rate`: Sample rate of the incoming audio (Hz).
    /// - `output_rate`: Analysis sample rate (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `1024`).
    ///
    /// # Errors
    /// Returns `CallMatchError::Resampler` if rubato fails to initialise.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio: 1.0,
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let chunk_size = chunk_size.max(1);

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| CallMatchError::Resampler(format!("init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(input_rate, output_rate, chunk_size, max_out, "resampler created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
            ratio,
        })
    }

    /// Reserve room for callers that push up to `max_chunk` samples per call,
    /// so steady-state processing does not grow the accumulation buffer.
    pub fn reserve_input(&mut self, max_chunk: usize) {
        if self.resampler.is_some() {
            let wanted = self.chunk_size + max_chunk;
            if self.input_buf.capacity() < wanted {
                self.input_buf.reserve(wanted - self.input_buf.len());
            }
        }
    }

    /// Upper bound on output samples for `input_len` input samples.
    pub fn max_output_len(&self, input_len: usize) -> usize {
        match &self.resampler {
            None => input_len,
            Some(r) => {
                let blocks = (input_len + self.chunk_size) / self.chunk_size + 1;
                blocks * r.output_frames_max()
            }
        }
    }

    /// Resample `samples`, appending output to `out`.
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call. In
    /// passthrough mode, input is copied straight to `out`.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(ref mut resampler) = self.resampler else {
            out.extend_from_slice(samples);
            return Ok(());
        };

        self.input_buf.extend_from_slice(samples);

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            let (_consumed, produced) = resampler
                .process_into_buffer(&[input_slice], &mut self.output_buf, None)
                .map_err(|e| CallMatchError::Resampler(e.to_string()))?;
            out.extend_from_slice(&self.output_buf[0][..produced]);

            self.input_buf.drain(..self.chunk_size);
        }

        Ok(())
    }

    /// Input samples waiting for a full block.
    pub fn pending_len(&self) -> usize {
        self.input_buf.len()
    }

    /// Pad the pending partial block with silence and push it through.
    /// Returns how many real input samples were pending.
    pub fn flush_into(&mut self, out: &mut Vec<f32>) -> Result<usize> {
        let pending = self.input_buf.len();
        if self.resampler.is_none() || pending == 0 {
            return Ok(0);
        }
        self.input_buf.resize(pending.div_ceil(self.chunk_size) * self.chunk_size, 0.0);
        self.process_into(&[], out)?;
        Ok(pending)
    }

    /// Returns `true` when input rate == output rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Resample a complete recording in one go.
///
/// The tail is flushed with zero padding and the output trimmed to
/// `round(len · output_rate / input_rate)` samples.
pub fn resample_all(samples: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    const OFFLINE_CHUNK: usize = 1024;

    let mut rc = RateConverter::new(input_rate, output_rate, OFFLINE_CHUNK)?;
    if rc.is_passthrough() {
        return Ok(samples.to_vec());
    }

    let expected = (samples.len() as f64 * rc.ratio).round() as usize;
    let mut out = Vec::with_capacity(rc.max_output_len(samples.len() + 2 * OFFLINE_CHUNK));
    rc.process_into(samples, &mut out)?;

    // Push silence until rubato's delay line has emitted the real tail.
    let silence = [0.0f32; OFFLINE_CHUNK];
    let mut guard = 0;
    while out.len() < expected && guard < 8 {
        rc.process_into(&silence, &mut out)?;
        guard += 1;
    }
    out.truncate(expected);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_has_no_state() {
        let mut rc = RateConverter::new(44_100, 44_100, 1024).unwrap();
        assert!(rc.is_passthrough());
        assert_eq!(rc.max_output_len(480), 480);

        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let mut out = Vec::new();
        rc.process_into(&samples, &mut out).unwrap();
        assert_eq!(out, samples);
        assert_eq!(rc.flush_into(&mut out).unwrap(), 0);
        assert_eq!(out.len(), 480);
    }

    #[test]
    fn steady_state_stays_within_reserved_buffers() {
        let max_chunk = 960;
        let mut rc = RateConverter::new(48_000, 16_000, 1024).unwrap();
        rc.reserve_input(max_chunk);
        let reserved = rc.input_buf.capacity();
        assert!(reserved >= 1024 + max_chunk);

        let bound = rc.max_output_len(max_chunk);
        let mut out = Vec::with_capacity(bound);
        let chunk = vec![0.25f32; max_chunk];
        for _ in 0..200 {
            out.clear();
            rc.process_into(&chunk, &mut out).unwrap();
            assert!(out.len() <= bound, "{} > {bound}", out.len());
            assert!(rc.pending_len() < 1024);
            assert_eq!(rc.input_buf.capacity(), reserved);
        }
    }

    #[test]
    fn flush_pushes_partial_block_out() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let mut out = Vec::new();
        rc.process_into(&vec![0.5f32; 500], &mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(rc.pending_len(), 500);

        assert_eq!(rc.flush_into(&mut out).unwrap(), 500);
        assert_eq!(rc.pending_len(), 0);
        assert!((out.len() as isize - 320).unsigned_abs() <= 10, "len={}", out.len());
        assert_eq!(rc.flush_into(&mut out).unwrap(), 0);
    }

    #[test]
    fn resample_all_trims_to_expected_length() {
        let samples = vec![0.1f32; 22_050];
        let out = resample_all(&samples, 22_050, 44_100).unwrap();
        assert_eq!(out.len(), 44_100);
    }
}
