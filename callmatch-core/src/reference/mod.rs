//! Master-call fingerprints.
//!
//! ## Resolution order for `load(id)`
//!
//! ```text
//! 1. <features_dir>/<id>.mfc      precomputed, used as-is if it decodes
//! 2. <master_calls_dir>/<id>.wav  decoded, resampled, featurized,
//!                                 then cached as <id>.mfc
//! ```
//!
//! Exactly one fingerprint is current. Publishing swaps the `Arc`; scorers
//! that already cloned the old one keep reading it undisturbed. A failed
//! load leaves the current fingerprint in place.

pub mod mfc;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    audio::{read_wav_mono, resample::resample_all, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE},
    engine::{diagnostics::EngineDiagnostics, pipeline::SegmentPipeline},
    error::{CallMatchError, Result},
    features::{default_extractor, FeatureConfig, FeatureExtractor, Fingerprint},
    vad::VadConfig,
};

/// Samples per chunk when a recording is pushed through the voice gate.
const OFFLINE_CHUNK: usize = 4096;

/// How a master-call recording becomes a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferencePolicy {
    /// The whole file is one voiced span.
    #[default]
    WholeRecording,
    /// The file goes through the same VAD gate as live capture.
    VoiceGated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ReferenceConfig {
    /// Directory holding `<id>.wav` recordings.
    pub master_calls_dir: PathBuf,
    /// Directory holding (and receiving) `<id>.mfc` feature files.
    pub features_dir: PathBuf,
    pub policy: ReferencePolicy,
    /// Write `<id>.mfc` after featurizing a recording.
    pub cache_features: bool,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            master_calls_dir: PathBuf::from("data/master_calls"),
            features_dir: PathBuf::from("data/features"),
            policy: ReferencePolicy::WholeRecording,
            cache_features: true,
        }
    }
}

/// Where a published fingerprint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceSource {
    FeatureFile,
    Recording,
    Published,
}

/// An immutable, published master-call fingerprint.
#[derive(Debug, Clone)]
pub struct ReferenceFingerprint {
    pub id: String,
    pub source: ReferenceSource,
    pub fingerprint: Fingerprint,
}

impl ReferenceFingerprint {
    pub fn len(&self) -> usize {
        self.fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprint.is_empty()
    }
}

pub struct ReferenceStore {
    config: ReferenceConfig,
    features: FeatureConfig,
    vad: VadConfig,
    current: RwLock<Option<Arc<ReferenceFingerprint>>>,
    diagnostics: Arc<EngineDiagnostics>,
}

impl ReferenceStore {
    pub fn new(
        config: ReferenceConfig,
        features: &FeatureConfig,
        vad: &VadConfig,
        diagnostics: Arc<EngineDiagnostics>,
    ) -> Self {
        Self {
            config,
            features: features.resolved(),
            vad: vad.clone(),
            current: RwLock::new(None),
            diagnostics,
        }
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Create the feature cache directory when caching is on.
    pub fn ensure_dirs(&self) -> Result<()> {
        if self.config.cache_features {
            std::fs::create_dir_all(&self.config.features_dir)?;
        }
        Ok(())
    }

    /// Resolve `id` and make it current.
    pub fn load(&self, id: &str) -> Result<Arc<ReferenceFingerprint>> {
        EngineDiagnostics::bump(&self.diagnostics.reference_loads, 1);
        match self.resolve(id) {
            Ok(reference) => Ok(self.swap_in(reference)),
            Err(err) => {
                EngineDiagnostics::bump(&self.diagnostics.reference_failures, 1);
                warn!(id, error = %err, "master call load failed; keeping previous reference");
                Err(err)
            }
        }
    }

    /// Resolve `id` without touching the current reference.
    pub fn resolve(&self, id: &str) -> Result<ReferenceFingerprint> {
        validate_id(id)?;

        let feature_path = self.feature_path(id);
        let mut stale: Option<mfc::MfcError> = None;
        if feature_path.is_file() {
            match mfc::read_file(&feature_path, self.features.num_coeffs, self.features.use_energy) {
                Ok(fingerprint) => {
                    debug!(id, frames = fingerprint.len(), "master call read from feature file");
                    return Ok(ReferenceFingerprint {
                        id: id.to_string(),
                        source: ReferenceSource::FeatureFile,
                        fingerprint,
                    });
                }
                Err(err) => {
                    warn!(id, path = %feature_path.display(), error = %err, "feature file unusable, trying recording");
                    stale = Some(err);
                }
            }
        }

        let audio_path = self.audio_path(id);
        if !audio_path.is_file() {
            let reason = match stale {
                Some(err) => format!("{err}; no recording at {}", audio_path.display()),
                None => format!(
                    "neither {} nor {} exists",
                    feature_path.display(),
                    audio_path.display()
                ),
            };
            return Err(CallMatchError::load_failure(id, reason));
        }

        let fingerprint = self.featurize_recording(id, &audio_path)?;
        if self.config.cache_features {
            self.write_cache(id, &feature_path, &fingerprint);
        }
        Ok(ReferenceFingerprint {
            id: id.to_string(),
            source: ReferenceSource::Recording,
            fingerprint,
        })
    }

    /// Publish an externally resolved fingerprint as current.
    pub fn publish(&self, id: &str, fingerprint: Fingerprint) -> Result<Arc<ReferenceFingerprint>> {
        if fingerprint.is_empty() {
            return Err(CallMatchError::load_failure(id, "fingerprint has no frames"));
        }
        if fingerprint.num_coeffs() != self.features.num_coeffs {
            return Err(CallMatchError::DimensionMismatch {
                expected: self.features.num_coeffs,
                got: fingerprint.num_coeffs(),
            });
        }
        Ok(self.swap_in(ReferenceFingerprint {
            id: id.to_string(),
            source: ReferenceSource::Published,
            fingerprint,
        }))
    }

    pub fn current(&self) -> Option<Arc<ReferenceFingerprint>> {
        self.current.read().clone()
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn feature_path(&self, id: &str) -> PathBuf {
        self.config.features_dir.join(format!("{id}.mfc"))
    }

    pub fn audio_path(&self, id: &str) -> PathBuf {
        self.config.master_calls_dir.join(format!("{id}.wav"))
    }

    fn swap_in(&self, reference: ReferenceFingerprint) -> Arc<ReferenceFingerprint> {
        let reference = Arc::new(reference);
        info!(
            id = %reference.id,
            source = ?reference.source,
            frames = reference.len(),
            "master call loaded"
        );
        *self.current.write() = Some(Arc::clone(&reference));
        reference
    }

    fn featurize_recording(&self, id: &str, path: &Path) -> Result<Fingerprint> {
        let recording = read_wav_mono(path).map_err(|e| CallMatchError::load_failure(id, e.to_string()))?;
        if recording.samples.is_empty() {
            return Err(CallMatchError::load_failure(id, "recording is empty"));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&recording.sample_rate) {
            return Err(CallMatchError::load_failure(
                id,
                format!("unsupported sample rate {} Hz", recording.sample_rate),
            ));
        }

        let fingerprint = match self.config.policy {
            ReferencePolicy::WholeRecording => {
                let samples = resample_all(&recording.samples, recording.sample_rate, self.features.sample_rate)
                    .map_err(|e| CallMatchError::load_failure(id, e.to_string()))?;
                let mut extractor = default_extractor(&self.features);
                let frames = extractor
                    .process_buffer(&samples)
                    .map_err(|e| CallMatchError::load_failure(id, e.to_string()))?;
                Fingerprint::from_frames(self.features.num_coeffs, &frames)?
            }
            ReferencePolicy::VoiceGated => {
                // Room for the recording plus the padded final resampler block.
                let padded_len = recording.samples.len() + OFFLINE_CHUNK;
                let analysis_len = (padded_len as f64 * f64::from(self.features.sample_rate)
                    / f64::from(recording.sample_rate))
                .ceil() as usize;
                let max_frames = analysis_len / self.features.hop_size + 2;
                let mut pipeline = SegmentPipeline::new(
                    &self.features,
                    &self.vad,
                    recording.sample_rate,
                    OFFLINE_CHUNK,
                    max_frames,
                    Arc::clone(&self.diagnostics),
                )
                .map_err(|e| CallMatchError::load_failure(id, e.to_string()))?;

                let mut dropped = 0;
                for chunk in recording.samples.chunks(OFFLINE_CHUNK) {
                    dropped += pipeline.feed(chunk)?.frames_dropped;
                }
                dropped += pipeline.finish()?.frames_dropped;
                if dropped > 0 {
                    warn!(id, dropped, capacity = max_frames, "master call frames dropped at capacity");
                }
                pipeline.into_fingerprint()
            }
        };

        if fingerprint.is_empty() {
            return Err(CallMatchError::load_failure(
                id,
                format!(
                    "recording ({:.2}s) produced no feature frames",
                    recording.duration_secs()
                ),
            ));
        }
        debug!(id, policy = ?self.config.policy, frames = fingerprint.len(), "master call featurized");
        Ok(fingerprint)
    }

    fn write_cache(&self, id: &str, path: &Path, fingerprint: &Fingerprint) {
        let result = std::fs::create_dir_all(&self.config.features_dir)
            .map_err(mfc::MfcError::from)
            .and_then(|()| mfc::write_file(path, fingerprint));
        match result {
            Ok(()) => debug!(id, path = %path.display(), "feature file cached"),
            Err(err) => warn!(id, path = %path.display(), error = %err, "feature cache write failed"),
        }
    }
}

/// Ids name files inside the configured directories and nothing else.
fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains(['/', '\\', '\0'])
        || Path::new(id).is_absolute();
    if bad {
        return Err(CallMatchError::load_failure(id, "invalid master call id"));
    }
    Ok(())
}
