//! # callmatch-core
//!
//! Streaming acoustic-matching engine: scores how closely live audio matches
//! a recorded master call.
//!
//! ## Architecture
//!
//! ```text
//! host chunk → RateConverter → VAD windows → voiced ring → MfccExtractor
//!                                                              │
//!                                                    session Fingerprint
//!                                                              │
//!              ReferenceStore (current master call) ──► DtwScorer ──► cost
//! ```
//!
//! Per-session buffers are sized when the session starts; chunk processing
//! does not allocate.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod features;
pub mod host;
pub mod reference;
pub mod report;
pub mod scoring;
pub mod vad;

// Convenience re-exports for downstream crates
pub use engine::{
    diagnostics::DiagnosticsSnapshot, pipeline::FeedReport, session::SessionId, CallMatchEngine,
    EngineConfig,
};
pub use error::{CallMatchError, StatusCode};
pub use features::{FeatureConfig, FeatureFrame, Fingerprint};
pub use host::HostBridge;
pub use reference::{ReferenceConfig, ReferenceFingerprint, ReferencePolicy};
pub use report::{ScoreReport, SessionSummary};
pub use scoring::{DtwConfig, DtwScorer};
pub use vad::{VadConfig, VadState};
