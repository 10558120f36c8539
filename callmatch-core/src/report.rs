//! Serializable results handed to the calling layer.

use serde::Serialize;

use crate::engine::session::SessionId;
use crate::vad::VadSnapshot;

/// Point-in-time view of one live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    /// Rate the host declared at session start.
    pub sample_rate: f32,
    /// Rate frames are extracted at.
    pub analysis_rate: u32,
    pub chunks: u64,
    pub samples_ingested: u64,
    pub feature_frames: usize,
    pub frame_capacity: usize,
    pub elapsed_ms: u64,
    pub vad: VadSnapshot,
}

/// A score plus the context needed to interpret it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub session_id: SessionId,
    pub master_call_id: String,
    /// Normalized DTW cost. Lower is closer; 0 is identical.
    pub score: f32,
    pub session_frames: usize,
    pub reference_frames: usize,
    /// Length of the optimal warping path, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_len: Option<usize>,
}
