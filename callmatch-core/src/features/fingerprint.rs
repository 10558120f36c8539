//! Flat, fixed-capacity storage for a sequence of feature frames.
//!
//! Coefficients live in one contiguous `Vec<f32>` with a `num_coeffs` stride,
//! energies in a parallel column. Capacity is reserved up front, so pushing
//! below capacity never reallocates.

use super::FeatureFrame;
use crate::error::{CallMatchError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    num_coeffs: usize,
    capacity: usize,
    coefficients: Vec<f32>,
    energies: Vec<f32>,
}

impl Fingerprint {
    /// Empty fingerprint able to hold `frames` frames without reallocating.
    pub fn with_capacity(num_coeffs: usize, frames: usize) -> Self {
        let num_coeffs = num_coeffs.max(1);
        Self {
            num_coeffs,
            capacity: frames,
            coefficients: Vec::with_capacity(num_coeffs * frames),
            energies: Vec::with_capacity(frames),
        }
    }

    /// Pack owned frames. Every frame must carry `num_coeffs` coefficients.
    pub fn from_frames(num_coeffs: usize, frames: &[FeatureFrame]) -> Result<Self> {
        let mut fp = Self::with_capacity(num_coeffs, frames.len());
        for frame in frames {
            if frame.coefficients.len() != fp.num_coeffs {
                return Err(CallMatchError::DimensionMismatch {
                    expected: fp.num_coeffs,
                    got: frame.coefficients.len(),
                });
            }
            fp.push(&frame.coefficients, frame.energy);
        }
        Ok(fp)
    }

    /// Build from a flat row-major coefficient block, as stored in feature
    /// files. Those files carry no energy column: when `energy_in_c0` is set
    /// the energy is recovered from coefficient 0, otherwise it is 0.
    pub fn from_flat(num_coeffs: usize, coefficients: Vec<f32>, energy_in_c0: bool) -> Result<Self> {
        if num_coeffs == 0 || coefficients.len() % num_coeffs != 0 {
            return Err(CallMatchError::InvalidParams(format!(
                "{} values do not divide into frames of {num_coeffs}",
                coefficients.len()
            )));
        }
        let frames = coefficients.len() / num_coeffs;
        let energies = coefficients
            .chunks_exact(num_coeffs)
            .map(|c| if energy_in_c0 { c[0] } else { 0.0 })
            .collect();
        Ok(Self {
            num_coeffs,
            capacity: frames,
            coefficients,
            energies,
        })
    }

    /// Append one frame. Returns `false` (and stores nothing) when full.
    pub fn push(&mut self, coefficients: &[f32], energy: f32) -> bool {
        debug_assert_eq!(coefficients.len(), self.num_coeffs);
        if self.is_full() {
            return false;
        }
        self.coefficients.extend_from_slice(coefficients);
        self.energies.push(energy);
        true
    }

    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn num_coeffs(&self) -> usize {
        self.num_coeffs
    }

    /// Coefficients of frame `index`.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn frame(&self, index: usize) -> &[f32] {
        let start = index * self.num_coeffs;
        &self.coefficients[start..start + self.num_coeffs]
    }

    pub fn energy(&self, index: usize) -> f32 {
        self.energies[index]
    }

    /// Iterate frames in order.
    pub fn frames(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        self.coefficients.chunks_exact(self.num_coeffs)
    }

    /// Row-major coefficient block.
    pub fn as_flat(&self) -> &[f32] {
        &self.coefficients
    }

    /// Copy out as owned frames, indexed from 0.
    pub fn to_feature_frames(&self) -> Vec<FeatureFrame> {
        self.frames()
            .zip(&self.energies)
            .enumerate()
            .map(|(frame_index, (c, &energy))| FeatureFrame {
                coefficients: c.to_vec(),
                energy,
                frame_index,
            })
            .collect()
    }

    /// Drop all frames, keeping the reserved capacity.
    pub fn clear(&mut self) {
        self.coefficients.clear();
        self.energies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_stops_at_capacity_without_reallocating() {
        let mut fp = Fingerprint::with_capacity(3, 2);
        let reserved = fp.as_flat().as_ptr();
        assert!(fp.push(&[1.0, 2.0, 3.0], 0.5));
        assert!(fp.push(&[4.0, 5.0, 6.0], 0.6));
        assert!(!fp.push(&[7.0, 8.0, 9.0], 0.7));
        assert_eq!(fp.len(), 2);
        assert_eq!(fp.frame(1), &[4.0, 5.0, 6.0]);
        assert_eq!(fp.as_flat().as_ptr(), reserved);
    }

    #[test]
    fn from_flat_recovers_energy_from_first_coefficient() {
        let fp = Fingerprint::from_flat(2, vec![-3.0, 0.1, -4.0, 0.2], true).unwrap();
        assert_eq!(fp.len(), 2);
        assert_eq!(fp.energy(1), -4.0);

        let plain = Fingerprint::from_flat(2, vec![-3.0, 0.1], false).unwrap();
        assert_eq!(plain.energy(0), 0.0);
    }

    #[test]
    fn from_flat_rejects_ragged_block() {
        assert!(Fingerprint::from_flat(3, vec![0.0; 7], true).is_err());
    }

    #[test]
    fn from_frames_rejects_mismatched_width() {
        let frames = vec![FeatureFrame {
            coefficients: vec![0.0; 4],
            energy: 0.0,
            frame_index: 0,
        }];
        let err = Fingerprint::from_frames(13, &frames).unwrap_err();
        assert!(matches!(
            err,
            CallMatchError::DimensionMismatch {
                expected: 13,
                got: 4
            }
        ));
    }

    #[test]
    fn to_feature_frames_reindexes_from_zero() {
        let mut fp = Fingerprint::with_capacity(1, 4);
        fp.push(&[0.3], 1.0);
        fp.push(&[0.4], 2.0);
        let frames = fp.to_feature_frames();
        assert_eq!(frames[1].frame_index, 1);
        assert_eq!(frames[1].coefficients, vec![0.4]);
        assert_eq!(frames[1].energy, 2.0);
    }
}
