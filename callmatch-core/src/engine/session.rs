//! Live sessions and the registry that owns them.
//!
//! ## Locking
//!
//! ```text
//! SessionRegistry
//!   RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>
//!     write lock: insert / remove
//!     read lock : clone one Arc, released before any audio work
//! ```
//!
//! A chunk for session A never waits on a chunk for session B. Ending a
//! session while a call on it is in flight is safe: the caller still holds
//! an `Arc`, and the session is dropped when that call returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::pipeline::{FeedReport, SegmentPipeline};
use crate::error::{CallMatchError, Result};
use crate::features::Fingerprint;
use crate::report::SessionSummary;

/// Opaque handle for one live session. Never reused within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State owned by one live session.
pub struct Session {
    id: SessionId,
    sample_rate: f32,
    buffer_size: usize,
    started_at: Instant,
    chunks: u64,
    samples: u64,
    pipeline: SegmentPipeline,
}

impl Session {
    pub fn new(id: SessionId, sample_rate: f32, buffer_size: usize, pipeline: SegmentPipeline) -> Self {
        Self {
            id,
            sample_rate,
            buffer_size,
            started_at: Instant::now(),
            chunks: 0,
            samples: 0,
            pipeline,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Feed one chunk. A full fingerprint surfaces as `BufferOverflow`
    /// after the chunk has otherwise been processed.
    pub fn process_chunk(&mut self, samples: &[f32]) -> Result<FeedReport> {
        self.chunks += 1;
        self.samples += samples.len() as u64;
        let report = self.pipeline.feed(samples)?;
        if report.overflowed() {
            return Err(CallMatchError::BufferOverflow(self.id));
        }
        Ok(report)
    }

    pub fn feature_count(&self) -> usize {
        self.pipeline.frame_count()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        self.pipeline.fingerprint()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            sample_rate: self.sample_rate,
            analysis_rate: self.pipeline.analysis_rate(),
            chunks: self.chunks,
            samples_ingested: self.samples,
            feature_frames: self.pipeline.frame_count(),
            frame_capacity: self.pipeline.fingerprint().capacity(),
            elapsed_ms: self.elapsed().as_millis() as u64,
            vad: self.pipeline.vad_snapshot(),
        }
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// Concurrent table of live sessions.
pub struct SessionRegistry {
    next_id: AtomicU32,
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next id. Ids start at 1 and only grow.
    pub fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, session: Session) -> SessionId {
        let id = session.id();
        self.sessions.write().insert(id, Arc::new(Mutex::new(session)));
        id
    }

    pub fn get(&self, id: SessionId) -> Result<SessionHandle> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or(CallMatchError::InvalidSession(id))
    }

    pub fn remove(&self, id: SessionId) -> Result<SessionHandle> {
        self.sessions
            .write()
            .remove(&id)
            .ok_or(CallMatchError::InvalidSession(id))
    }

    /// Drop every session. Returns how many were live.
    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.write();
        let n = sessions.len();
        sessions.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
