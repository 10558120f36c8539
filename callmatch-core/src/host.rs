//! Sentinel-returning facade for hosts across a foreign-function or
//! cross-runtime boundary.
//!
//! | Operation                | Success        | Failure |
//! |--------------------------|----------------|---------|
//! | `initialize`             | `1`            | `-1`    |
//! | `shutdown`               | `1`            | `-1`    |
//! | `load_master_call`       | `1`            | `-1`    |
//! | `start_realtime_session` | session id > 0 | `-1`    |
//! | `process_audio_chunk`    | `1`            | `-1`    |
//! | `get_similarity_score`   | cost ≥ 0       | `-1.0`  |
//! | `end_realtime_session`   | `1`            | `-1`    |
//!
//! The precise reason for the last failure is kept in `last_status`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::error;

use crate::engine::{session::SessionId, CallMatchEngine, EngineConfig};
use crate::error::{Result, StatusCode};

pub const FAILURE: i32 = -1;
pub const SUCCESS: i32 = 1;
pub const SCORE_FAILURE: f32 = -1.0;

pub struct HostBridge {
    engine: CallMatchEngine,
    last_status: AtomicI32,
}

impl HostBridge {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_engine(CallMatchEngine::new(config))
    }

    pub fn with_engine(engine: CallMatchEngine) -> Self {
        Self {
            engine,
            last_status: AtomicI32::new(StatusCode::Ok as i32),
        }
    }

    pub fn engine(&self) -> &CallMatchEngine {
        &self.engine
    }

    /// Status of the most recent call on this bridge (from any thread).
    pub fn last_status(&self) -> i32 {
        self.last_status.load(Ordering::Relaxed)
    }

    pub fn initialize(&self) -> i32 {
        self.status_call(|e| e.initialize())
    }

    /// Drop every session and the current master call. The bridge stays
    /// usable; ids issued before this call are invalid afterwards.
    pub fn shutdown(&self) -> i32 {
        self.status_call(|e| {
            e.shutdown();
            Ok(())
        })
    }

    pub fn load_master_call(&self, id: &str) -> i32 {
        self.status_call(|e| e.load_master_call(id))
    }

    pub fn start_realtime_session(&self, sample_rate: f32, buffer_size: i32) -> i32 {
        let outcome = self.guarded(|e| {
            let buffer_size = usize::try_from(buffer_size).unwrap_or(0);
            e.start_realtime_session(sample_rate, buffer_size)
        });
        match outcome {
            Some(id) => i32::try_from(id.get()).unwrap_or(FAILURE),
            None => FAILURE,
        }
    }

    pub fn process_audio_chunk(&self, session_id: i32, samples: &[f32]) -> i32 {
        let Some(id) = to_session(session_id) else {
            return self.reject(StatusCode::InvalidSession);
        };
        self.status_call(|e| e.process_audio_chunk(id, samples).map(|_| ()))
    }

    pub fn get_similarity_score(&self, session_id: i32) -> f32 {
        let Some(id) = to_session(session_id) else {
            self.reject(StatusCode::InvalidSession);
            return SCORE_FAILURE;
        };
        self.guarded(|e| e.get_similarity_score(id))
            .unwrap_or(SCORE_FAILURE)
    }

    pub fn end_realtime_session(&self, session_id: i32) -> i32 {
        let Some(id) = to_session(session_id) else {
            return self.reject(StatusCode::InvalidSession);
        };
        self.status_call(|e| e.end_realtime_session(id).map(|_| ()))
    }

    /// Frames captured so far, or `-1`.
    pub fn session_feature_count(&self, session_id: i32) -> i32 {
        let Some(id) = to_session(session_id) else {
            return self.reject(StatusCode::InvalidSession);
        };
        self.guarded(|e| e.session_feature_count(id))
            .map(|n| i32::try_from(n).unwrap_or(i32::MAX))
            .unwrap_or(FAILURE)
    }

    fn status_call(&self, op: impl FnOnce(&CallMatchEngine) -> Result<()>) -> i32 {
        match self.guarded(op) {
            Some(()) => SUCCESS,
            None => FAILURE,
        }
    }

    /// Run `op`, record its status, and keep panics on this side of the
    /// boundary.
    fn guarded<T>(&self, op: impl FnOnce(&CallMatchEngine) -> Result<T>) -> Option<T> {
        match catch_unwind(AssertUnwindSafe(|| op(&self.engine))) {
            Ok(Ok(value)) => {
                self.record(StatusCode::Ok);
                Some(value)
            }
            Ok(Err(err)) => {
                self.record(err.status());
                None
            }
            Err(_) => {
                error!("engine call panicked");
                self.record(StatusCode::Internal);
                None
            }
        }
    }

    fn reject(&self, status: StatusCode) -> i32 {
        self.record(status);
        FAILURE
    }

    fn record(&self, status: StatusCode) {
        self.last_status.store(status as i32, Ordering::Relaxed);
    }
}

fn to_session(raw: i32) -> Option<SessionId> {
    u32::try_from(raw).ok().filter(|&v| v > 0).map(SessionId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureConfig, Fingerprint};
    use crate::reference::ReferenceConfig;

    fn bridge(dir: &std::path::Path) -> HostBridge {
        HostBridge::new(EngineConfig {
            features: FeatureConfig {
                sample_rate: 16_000,
                frame_size: 512,
                hop_size: 256,
                ..FeatureConfig::default()
            },
            reference: ReferenceConfig {
                master_calls_dir: dir.join("calls"),
                features_dir: dir.join("features"),
                ..ReferenceConfig::default()
            },
            ..EngineConfig::default()
        })
    }

    #[test]
    fn sentinels_for_unknown_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let host = bridge(dir.path());
        assert_eq!(host.initialize(), SUCCESS);
        assert!(dir.path().join("features").is_dir());

        assert_eq!(host.process_audio_chunk(42, &[0.0; 64]), FAILURE);
        assert_eq!(host.last_status(), StatusCode::InvalidSession as i32);
        assert_eq!(host.get_similarity_score(-3), SCORE_FAILURE);
        assert_eq!(host.end_realtime_session(0), FAILURE);
        assert_eq!(host.session_feature_count(7), FAILURE);
    }

    #[test]
    fn start_failure_and_success() {
        let dir = tempfile::tempdir().unwrap();
        let host = bridge(dir.path());
        assert_eq!(host.start_realtime_session(0.0, 512), FAILURE);
        assert_eq!(host.last_status(), StatusCode::InvalidParams as i32);
        assert_eq!(host.start_realtime_session(16_000.0, -1), FAILURE);

        let id = host.start_realtime_session(16_000.0, 512);
        assert!(id > 0);
        assert_eq!(host.last_status(), StatusCode::Ok as i32);
        assert_eq!(host.session_feature_count(id), 0);
    }

    #[test]
    fn score_sentinels_distinguish_causes() {
        let dir = tempfile::tempdir().unwrap();
        let host = bridge(dir.path());
        let id = host.start_realtime_session(16_000.0, 320);

        assert_eq!(host.get_similarity_score(id), SCORE_FAILURE);
        assert_eq!(host.last_status(), StatusCode::InvalidReference as i32);

        host.engine()
            .publish_master_call("flat", Fingerprint::from_flat(13, vec![0.0; 26], true).unwrap())
            .unwrap();
        assert_eq!(host.get_similarity_score(id), SCORE_FAILURE);
        assert_eq!(host.last_status(), StatusCode::DegenerateSession as i32);

        assert_eq!(host.load_master_call("missing"), FAILURE);
        assert_eq!(host.last_status(), StatusCode::LoadFailure as i32);
        assert_eq!(host.engine().current_master_call().unwrap().id, "flat");

        assert_eq!(host.end_realtime_session(id), SUCCESS);
        assert_eq!(host.end_realtime_session(id), FAILURE);
    }

    #[test]
    fn shutdown_invalidates_ids_and_keeps_bridge_usable() {
        let dir = tempfile::tempdir().unwrap();
        let host = bridge(dir.path());
        assert_eq!(host.initialize(), SUCCESS);
        let before = host.start_realtime_session(16_000.0, 320);
        assert!(before > 0);
        host.engine()
            .publish_master_call("flat", Fingerprint::from_flat(13, vec![0.0; 26], true).unwrap())
            .unwrap();

        assert_eq!(host.shutdown(), SUCCESS);
        assert_eq!(host.last_status(), StatusCode::Ok as i32);
        assert!(host.engine().current_master_call().is_none());

        assert_eq!(host.process_audio_chunk(before, &[0.0; 320]), FAILURE);
        assert_eq!(host.last_status(), StatusCode::InvalidSession as i32);
        assert_eq!(host.end_realtime_session(before), FAILURE);

        let after = host.start_realtime_session(16_000.0, 320);
        assert!(after > before);
        assert_eq!(host.process_audio_chunk(after, &[0.0; 320]), SUCCESS);
        assert_eq!(host.shutdown(), SUCCESS);
    }
}
