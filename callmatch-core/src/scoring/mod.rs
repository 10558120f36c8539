//! Sequence scoring.
//!
//! A live session fingerprint is aligned against the current master-call
//! fingerprint with banded dynamic time warping. Lower cost = closer match.
//! Mapping the raw cost onto a user-facing percentage is the caller's job.

pub mod dtw;

pub use dtw::{Alignment, DtwScorer};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Alignment parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DtwConfig {
    /// Half-width of the Sakoe-Chiba style band in normalized time,
    /// `|i/N − j/M| ≤ window_ratio`. Clamped to `[0, 1]`.
    pub window_ratio: f32,
    /// `false` searches the full cost matrix.
    pub use_window: bool,
    /// Divide the cumulative cost by `N + M`.
    pub normalize: bool,
    /// Multiplier applied to every local distance.
    pub distance_weight: f32,
}

impl Default for DtwConfig {
    fn default() -> Self {
        Self {
            window_ratio: 0.1,
            use_window: true,
            normalize: true,
            distance_weight: 1.0,
        }
    }
}

impl DtwConfig {
    pub fn normalize(&mut self) {
        self.window_ratio = if self.window_ratio.is_nan() {
            0.0
        } else {
            self.window_ratio.clamp(0.0, 1.0)
        };
        if !(self.distance_weight.is_finite() && self.distance_weight > 0.0) {
            self.distance_weight = 1.0;
        }
    }
}

/// Why a pair of sequences could not be aligned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("live sequence is empty")]
    EmptySession,

    #[error("reference sequence is empty")]
    EmptyReference,

    #[error("coefficient count mismatch: session {session}, reference {reference}")]
    DimensionMismatch { session: usize, reference: usize },
}
