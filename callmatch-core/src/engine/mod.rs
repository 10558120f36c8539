//! `CallMatchEngine`: session lifecycle, reference management and scoring.
//!
//! ## Lifecycle
//!
//! ```text
//! CallMatchEngine::new(config)
//!     └─► initialize()                   → feature cache directory created
//!         ├─► load_master_call(id)       → current reference replaced
//!         └─► start_realtime_session()   → SessionId
//!             ├─► process_audio_chunk()  (any number of times)
//!             ├─► get_similarity_score() (against the reference current *now*)
//!             └─► end_realtime_session() → SessionSummary
//!     └─► shutdown()                     → sessions and reference dropped
//! ```
//!
//! ## Threading
//!
//! Every operation runs to completion on the calling thread. The engine is
//! `Send + Sync`; wrap it in an `Arc` to drive sessions from several threads.
//! Calls on different sessions only meet on the registry's read lock.

pub mod diagnostics;
pub mod pipeline;
pub mod session;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    audio,
    error::{CallMatchError, Result},
    features::{FeatureConfig, Fingerprint},
    reference::{ReferenceConfig, ReferenceFingerprint, ReferenceStore},
    report::{ScoreReport, SessionSummary},
    scoring::{DtwConfig, DtwScorer, ScoreError},
    vad::VadConfig,
};

use self::{
    diagnostics::{DiagnosticsSnapshot, EngineDiagnostics},
    pipeline::{FeedReport, SegmentPipeline},
    session::{Session, SessionId, SessionRegistry},
};

/// Accepted host sample rates (Hz).
const MIN_SAMPLE_RATE: f32 = audio::MIN_SAMPLE_RATE as f32;
const MAX_SAMPLE_RATE: f32 = audio::MAX_SAMPLE_RATE as f32;
const DEFAULT_MAX_SESSION_SECONDS: f32 = 120.0;
const MAX_SESSION_SECONDS: f32 = 3_600.0;

/// Configuration for `CallMatchEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub vad: VadConfig,
    pub dtw: DtwConfig,
    pub reference: ReferenceConfig,
    /// Voiced audio a session can hold before frames are dropped.
    /// Fingerprint storage is sized from this at session start.
    pub max_session_seconds: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            vad: VadConfig::default(),
            dtw: DtwConfig::default(),
            reference: ReferenceConfig::default(),
            max_session_seconds: DEFAULT_MAX_SESSION_SECONDS,
        }
    }
}

impl EngineConfig {
    /// Clamp every field into range.
    pub fn normalize(&mut self) {
        self.features = self.features.resolved();
        self.vad.normalize();
        self.dtw.normalize();
        self.max_session_seconds = if self.max_session_seconds.is_finite() && self.max_session_seconds > 0.0 {
            self.max_session_seconds.clamp(1.0, MAX_SESSION_SECONDS)
        } else {
            DEFAULT_MAX_SESSION_SECONDS
        };
    }

    /// Fingerprint capacity for one session.
    pub fn max_session_frames(&self) -> usize {
        let samples = f64::from(self.max_session_seconds) * f64::from(self.features.sample_rate);
        (samples / self.features.hop_size.max(1) as f64).ceil() as usize + 1
    }
}

/// The top-level engine handle.
///
/// Owned by the caller; several independent engines can coexist.
pub struct CallMatchEngine {
    config: EngineConfig,
    sessions: SessionRegistry,
    references: ReferenceStore,
    scorer: RwLock<DtwScorer>,
    diagnostics: Arc<EngineDiagnostics>,
}

impl CallMatchEngine {
    pub fn new(mut config: EngineConfig) -> Self {
        config.normalize();
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let references = ReferenceStore::new(
            config.reference.clone(),
            &config.features,
            &config.vad,
            Arc::clone(&diagnostics),
        );
        Self {
            scorer: RwLock::new(DtwScorer::new(config.dtw.clone())),
            sessions: SessionRegistry::new(),
            references,
            diagnostics,
            config,
        }
    }

    /// Normalized configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prepare on-disk state. Safe to call more than once.
    pub fn initialize(&self) -> Result<()> {
        self.references.ensure_dirs()?;
        info!(
            analysis_rate = self.config.features.sample_rate,
            frame_size = self.config.features.frame_size,
            hop_size = self.config.features.hop_size,
            num_coeffs = self.config.features.num_coeffs,
            "engine initialized"
        );
        Ok(())
    }

    /// Drop every session and the current reference. The engine stays usable.
    pub fn shutdown(&self) {
        let dropped = self.sessions.clear();
        self.references.clear();
        info!(dropped_sessions = dropped, "engine shut down");
    }

    // ── Reference ────────────────────────────────────────────────────────────

    /// Resolve `id` and make it the current master call. On failure the
    /// previous master call stays current.
    pub fn load_master_call(&self, id: &str) -> Result<()> {
        self.references.load(id).map(|_| ())
    }

    /// Make an externally computed fingerprint the current master call.
    pub fn publish_master_call(&self, id: &str, fingerprint: Fingerprint) -> Result<()> {
        self.references.publish(id, fingerprint).map(|_| ())
    }

    pub fn current_master_call(&self) -> Option<Arc<ReferenceFingerprint>> {
        self.references.current()
    }

    pub fn reference_store(&self) -> &ReferenceStore {
        &self.references
    }

    /// Change the DTW band for subsequent scores. Clamped to `[0, 1]`.
    pub fn set_window_ratio(&self, ratio: f32) {
        self.scorer.write().set_window_ratio(ratio);
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Open a live session for mono audio at `sample_rate` delivered in
    /// chunks of about `buffer_size` samples.
    ///
    /// # Errors
    /// `InvalidParams` for a non-finite or out-of-range rate or a zero
    /// buffer size.
    pub fn start_realtime_session(&self, sample_rate: f32, buffer_size: usize) -> Result<SessionId> {
        if !sample_rate.is_finite() || !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(CallMatchError::InvalidParams(format!(
                "sample rate {sample_rate} outside {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE} Hz"
            )));
        }
        if buffer_size == 0 {
            return Err(CallMatchError::InvalidParams("buffer size must be > 0".into()));
        }

        let pipeline = SegmentPipeline::new(
            &self.config.features,
            &self.config.vad,
            sample_rate.round() as u32,
            buffer_size,
            self.config.max_session_frames(),
            Arc::clone(&self.diagnostics),
        )?;
        let id = self.sessions.allocate_id();
        self.sessions.insert(Session::new(id, sample_rate, buffer_size, pipeline));
        EngineDiagnostics::bump(&self.diagnostics.sessions_started, 1);

        info!(session = %id, sample_rate, buffer_size, "session started");
        Ok(id)
    }

    /// Feed one chunk of mono samples to session `id`.
    ///
    /// # Errors
    /// - `InvalidSession` if `id` is unknown or ended.
    /// - `BufferOverflow` once the session fingerprint is full. The chunk is
    ///   still consumed and earlier frames are kept.
    pub fn process_audio_chunk(&self, id: SessionId, samples: &[f32]) -> Result<FeedReport> {
        let handle = self.sessions.get(id)?;
        EngineDiagnostics::bump(&self.diagnostics.chunks_in, 1);
        EngineDiagnostics::bump(&self.diagnostics.samples_in, samples.len());

        let result = handle.lock().process_chunk(samples);
        if let Err(CallMatchError::BufferOverflow(_)) = &result {
            warn!(session = %id, "session fingerprint full, frames dropped");
        }
        result
    }

    /// Normalized DTW cost of session `id` against the current master call.
    ///
    /// Aligns a copy of the frames captured so far; the session lock is not
    /// held during alignment, so chunks keep flowing while this runs.
    ///
    /// # Errors
    /// - `InvalidSession` if `id` is unknown or ended.
    /// - `InvalidReference` if no master call is loaded.
    /// - `DegenerateSession` if the session has no feature frames yet.
    pub fn get_similarity_score(&self, id: SessionId) -> Result<f32> {
        let handle = self.sessions.get(id)?;
        let reference = self.references.current().ok_or(CallMatchError::InvalidReference)?;
        let scorer = self.scorer.read().clone();

        let live = handle.lock().fingerprint().clone();
        let score = scorer
            .score(&live, &reference.fingerprint)
            .map_err(|e| score_error(id, e))?;
        EngineDiagnostics::bump(&self.diagnostics.scores_computed, 1);
        Ok(score)
    }

    /// Like [`get_similarity_score`](Self::get_similarity_score) with context,
    /// and optionally the warping path length.
    pub fn score_report(&self, id: SessionId, with_path: bool) -> Result<ScoreReport> {
        let handle = self.sessions.get(id)?;
        let reference = self.references.current().ok_or(CallMatchError::InvalidReference)?;
        let scorer = self.scorer.read().clone();

        let live = handle.lock().fingerprint().clone();
        let (score, path_len) = if with_path {
            let alignment = scorer
                .score_with_path(&live, &reference.fingerprint)
                .map_err(|e| score_error(id, e))?;
            (alignment.cost, Some(alignment.path.len()))
        } else {
            let cost = scorer
                .score(&live, &reference.fingerprint)
                .map_err(|e| score_error(id, e))?;
            (cost, None)
        };
        EngineDiagnostics::bump(&self.diagnostics.scores_computed, 1);

        Ok(ScoreReport {
            session_id: id,
            master_call_id: reference.id.clone(),
            score,
            session_frames: live.len(),
            reference_frames: reference.len(),
            path_len,
        })
    }

    /// Remove session `id` and discard its buffers.
    ///
    /// # Errors
    /// `InvalidSession` if `id` is unknown or already ended.
    pub fn end_realtime_session(&self, id: SessionId) -> Result<SessionSummary> {
        let handle = self.sessions.remove(id)?;
        let summary = handle.lock().summary();
        EngineDiagnostics::bump(&self.diagnostics.sessions_ended, 1);
        info!(
            session = %id,
            duration_ms = summary.elapsed_ms,
            frames = summary.feature_frames,
            samples = summary.samples_ingested,
            "session ended"
        );
        Ok(summary)
    }

    pub fn session_feature_count(&self, id: SessionId) -> Result<usize> {
        Ok(self.sessions.get(id)?.lock().feature_count())
    }

    pub fn session_summary(&self, id: SessionId) -> Result<SessionSummary> {
        Ok(self.sessions.get(id)?.lock().summary())
    }

    /// Copy of the session's fingerprint so far.
    pub fn session_fingerprint(&self, id: SessionId) -> Result<Fingerprint> {
        Ok(self.sessions.get(id)?.lock().fingerprint().clone())
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions.ids()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

fn score_error(id: SessionId, err: ScoreError) -> CallMatchError {
    match err {
        ScoreError::EmptySession => CallMatchError::DegenerateSession(id),
        ScoreError::EmptyReference => CallMatchError::InvalidReference,
        ScoreError::DimensionMismatch { session, reference } => CallMatchError::DimensionMismatch {
            expected: reference,
            got: session,
        },
    }
}
