use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Engine-wide counters shared by every session pipeline.
///
/// All updates are `Relaxed`; the numbers are for dashboards and tests,
/// never for synchronisation.
#[derive(Debug, Default)]
pub struct EngineDiagnostics {
    pub sessions_started: AtomicUsize,
    pub sessions_ended: AtomicUsize,
    pub chunks_in: AtomicUsize,
    pub samples_in: AtomicUsize,
    pub vad_windows: AtomicUsize,
    pub vad_voiced: AtomicUsize,
    pub segments_closed: AtomicUsize,
    pub frames_extracted: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub scores_computed: AtomicUsize,
    pub reference_loads: AtomicUsize,
    pub reference_failures: AtomicUsize,
}

impl EngineDiagnostics {
    pub fn reset(&self) {
        self.sessions_started.store(0, Ordering::Relaxed);
        self.sessions_ended.store(0, Ordering::Relaxed);
        self.chunks_in.store(0, Ordering::Relaxed);
        self.samples_in.store(0, Ordering::Relaxed);
        self.vad_windows.store(0, Ordering::Relaxed);
        self.vad_voiced.store(0, Ordering::Relaxed);
        self.segments_closed.store(0, Ordering::Relaxed);
        self.frames_extracted.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.scores_computed.store(0, Ordering::Relaxed);
        self.reference_loads.store(0, Ordering::Relaxed);
        self.reference_failures.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
            chunks_in: self.chunks_in.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            vad_windows: self.vad_windows.load(Ordering::Relaxed),
            vad_voiced: self.vad_voiced.load(Ordering::Relaxed),
            segments_closed: self.segments_closed.load(Ordering::Relaxed),
            frames_extracted: self.frames_extracted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            scores_computed: self.scores_computed.load(Ordering::Relaxed),
            reference_loads: self.reference_loads.load(Ordering::Relaxed),
            reference_failures: self.reference_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize, by: usize) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub sessions_started: usize,
    pub sessions_ended: usize,
    pub chunks_in: usize,
    pub samples_in: usize,
    pub vad_windows: usize,
    pub vad_voiced: usize,
    pub segments_closed: usize,
    pub frames_extracted: usize,
    pub frames_dropped: usize,
    pub scores_computed: usize,
    pub reference_loads: usize,
    pub reference_failures: usize,
}
