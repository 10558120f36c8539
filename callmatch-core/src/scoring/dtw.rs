//! Banded dynamic time warping.
//!
//! ```text
//! cost(0,0) = 0, cost(i,0) = cost(0,j) = ∞
//! cost(i,j) = d(s_i, r_j) + min(cost(i−1,j), cost(i,j−1), cost(i−1,j−1))
//! raw       = cost(N,M) / (N + M)
//! ```
//!
//! Only cells inside the band are evaluated. The band for row `i` is
//! `|i/N − j/M| ≤ window_ratio` widened to cover the diagonal staircase
//! `⌈(i−1)M/N⌉ ..= ⌈iM/N⌉`, so the end cell is reachable for every ratio and a
//! wider ratio only ever adds cells.

use super::{DtwConfig, ScoreError};
use crate::features::Fingerprint;

const DIAGONAL: u8 = 0;
const UP: u8 = 1;
const LEFT: u8 = 2;

/// Cost plus the optimal warping path as 0-based `(session, reference)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub cost: f32,
    pub path: Vec<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct DtwScorer {
    config: DtwConfig,
}

impl DtwScorer {
    pub fn new(mut config: DtwConfig) -> Self {
        config.normalize();
        Self { config }
    }

    pub fn config(&self) -> &DtwConfig {
        &self.config
    }

    /// Set the band ratio; out-of-range values are clamped to `[0, 1]`.
    pub fn set_window_ratio(&mut self, ratio: f32) {
        self.config.window_ratio = ratio;
        self.config.normalize();
    }

    /// Raw alignment cost of `session` against `reference`.
    ///
    /// Uses two rolling rows, so memory is `O(M)`.
    pub fn score(&self, session: &Fingerprint, reference: &Fingerprint) -> Result<f32, ScoreError> {
        let (n, m) = check_inputs(session, reference)?;

        let mut prev = vec![f32::INFINITY; m + 1];
        let mut cur = vec![f32::INFINITY; m + 1];
        prev[0] = 0.0;

        for i in 1..=n {
            cur.fill(f32::INFINITY);
            let (lo, hi) = self.band(i, n, m);
            let s = session.frame(i - 1);
            for j in lo..=hi {
                let local = euclidean(s, reference.frame(j - 1)) * self.config.distance_weight;
                let best = prev[j].min(cur[j - 1]).min(prev[j - 1]);
                cur[j] = local + best;
            }
            std::mem::swap(&mut prev, &mut cur);
        }

        Ok(self.finish(prev[m], n, m))
    }

    /// Like [`score`](Self::score) but also recovers the warping path.
    ///
    /// Keeps the full `(N+1) × (M+1)` matrix.
    pub fn score_with_path(
        &self,
        session: &Fingerprint,
        reference: &Fingerprint,
    ) -> Result<Alignment, ScoreError> {
        let (n, m) = check_inputs(session, reference)?;
        let width = m + 1;
        let mut cost = vec![f32::INFINITY; (n + 1) * width];
        let mut step = vec![DIAGONAL; (n + 1) * width];
        cost[0] = 0.0;

        for i in 1..=n {
            let (lo, hi) = self.band(i, n, m);
            let s = session.frame(i - 1);
            for j in lo..=hi {
                let local = euclidean(s, reference.frame(j - 1)) * self.config.distance_weight;
                let diag = cost[(i - 1) * width + j - 1];
                let up = cost[(i - 1) * width + j];
                let left = cost[i * width + j - 1];

                let (best, dir) = if diag <= up && diag <= left {
                    (diag, DIAGONAL)
                } else if up <= left {
                    (up, UP)
                } else {
                    (left, LEFT)
                };
                cost[i * width + j] = local + best;
                step[i * width + j] = dir;
            }
        }

        let mut path = Vec::with_capacity(n + m);
        let (mut i, mut j) = (n, m);
        while i > 0 && j > 0 {
            path.push((i - 1, j - 1));
            match step[i * width + j] {
                DIAGONAL => {
                    i -= 1;
                    j -= 1;
                }
                UP => i -= 1,
                _ => j -= 1,
            }
        }
        path.reverse();

        Ok(Alignment {
            cost: self.finish(cost[n * width + m], n, m),
            path,
        })
    }

    /// Inclusive 1-based column range evaluated for row `i`.
    fn band(&self, i: usize, n: usize, m: usize) -> (usize, usize) {
        if !self.config.use_window {
            return (1, m);
        }
        let stair_lo = ((i - 1) * m).div_ceil(n).max(1);
        let stair_hi = (i * m).div_ceil(n).clamp(1, m);

        let ratio = f64::from(self.config.window_ratio);
        let center = i as f64 / n as f64;
        let band_lo = ((center - ratio) * m as f64).ceil().max(1.0) as usize;
        let band_hi = ((center + ratio) * m as f64).floor().min(m as f64).max(0.0) as usize;

        (band_lo.min(stair_lo), band_hi.max(stair_hi).min(m))
    }

    fn finish(&self, total: f32, n: usize, m: usize) -> f32 {
        if self.config.normalize {
            total / (n + m) as f32
        } else {
            total
        }
    }
}

impl Default for DtwScorer {
    fn default() -> Self {
        Self::new(DtwConfig::default())
    }
}

fn check_inputs(session: &Fingerprint, reference: &Fingerprint) -> Result<(usize, usize), ScoreError> {
    if session.is_empty() {
        return Err(ScoreError::EmptySession);
    }
    if reference.is_empty() {
        return Err(ScoreError::EmptyReference);
    }
    if session.num_coeffs() != reference.num_coeffs() {
        return Err(ScoreError::DimensionMismatch {
            session: session.num_coeffs(),
            reference: reference.num_coeffs(),
        });
    }
    Ok((session.len(), reference.len()))
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}
