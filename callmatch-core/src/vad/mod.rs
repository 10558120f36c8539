//! Voice Activity Detection (VAD).
//!
//! The session pipeline cuts its input into fixed `window_duration_ms`
//! windows and feeds each one to a `VoiceActivityDetector`. The detector
//! reports whether the window was active and which state transition (if any)
//! it caused; the session decides what to do with the samples.
//!
//! ## Transition table
//!
//! ```text
//! onset   = max(1, ⌈min_sound_ms / window_ms⌉)                 windows
//! release = max(1, ⌈(min_silence_ms + hangover_ms) / window_ms⌉) windows
//!
//! Silence  --active-->           Onset     (Sound if onset == 1)
//! Onset    --active, n==onset--> Sound     tentative windows confirmed
//! Onset    --inactive-->         Silence   tentative windows discarded
//! Sound    --inactive-->         Hangover  (Silence if release == 1)
//! Hangover --active-->           Sound
//! Hangover --inactive, n==release--> Silence  span flushed
//! ```
//!
//! `min_silence_duration_ms` and `hangover_duration_ms` are additive: the span
//! only ends after both have elapsed, and every window in between still
//! belongs to the span.

pub mod energy;

pub use energy::EnergyVad;

use serde::{Deserialize, Serialize};

/// Whether a given analysis window contains sound or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// Window statistic above both thresholds.
    Speech,
    /// Window statistic below either threshold.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Logical detector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VadState {
    /// No sound span open.
    Silence,
    /// Active windows seen, not yet long enough to confirm a span.
    Onset,
    /// Inside a confirmed sound span.
    Sound,
    /// Inside a span, counting down the silence + hangover grace period.
    Hangover,
}

impl VadState {
    /// `true` when samples belong to a confirmed span.
    pub fn is_in_sound_segment(self) -> bool {
        matches!(self, VadState::Sound | VadState::Hangover)
    }
}

/// State change caused by one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    None,
    /// Silence → Onset.
    OnsetStarted,
    /// Onset → Silence; buffered onset samples are noise.
    OnsetAborted,
    /// Silence/Onset → Sound.
    SoundStarted,
    /// Sound → Hangover.
    HangoverStarted,
    /// Hangover → Sound.
    SoundResumed,
    /// Sound/Hangover → Silence; the span is complete.
    SoundEnded,
}

/// Result of classifying one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadStep {
    pub decision: VadDecision,
    pub transition: VadTransition,
    /// State after this window.
    pub state: VadState,
}

impl VadStep {
    /// Whether this window's samples belong in the voiced-segment buffer
    /// (tentatively during onset).
    pub fn keeps_samples(&self) -> bool {
        self.state != VadState::Silence || self.transition == VadTransition::SoundEnded
    }

    /// Whether the feature extractor should run after this window.
    pub fn extracts(&self) -> bool {
        self.state.is_in_sound_segment() || self.transition == VadTransition::SoundEnded
    }
}

/// Point-in-time view of detector counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VadSnapshot {
    pub state: VadState,
    pub is_in_sound_segment: bool,
    /// Consecutive active windows.
    pub consecutive_sound_frames: u32,
    /// Consecutive inactive windows.
    pub consecutive_silence_frames: u32,
}

/// VAD thresholds and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VadConfig {
    /// Peak amplitude gate. A window is only active if `max|x|` exceeds this.
    /// `0` disables the gate.
    pub silence_threshold: f32,
    /// Mean-square power threshold.
    pub energy_threshold: f32,
    /// Analysis window length.
    pub window_duration_ms: f32,
    /// Sustained activity needed to open a span.
    pub min_sound_duration_ms: f32,
    /// Sustained silence needed (before hangover) to close a span.
    pub min_silence_duration_ms: f32,
    /// Extra grace after `min_silence_duration_ms` for trailing tails.
    pub hangover_duration_ms: f32,
    /// Minimum fraction of `frame_size` of fresh samples at span end for the
    /// tail to be zero-padded into a final frame.
    pub tail_pad_fraction: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.02,
            energy_threshold: 0.01,
            window_duration_ms: 20.0,
            min_sound_duration_ms: 100.0,
            min_silence_duration_ms: 50.0,
            hangover_duration_ms: 100.0,
            tail_pad_fraction: 0.5,
        }
    }
}

impl VadConfig {
    /// Clamp every field into range. Durations become non-negative and the
    /// window length at least 1 ms.
    pub fn normalize(&mut self) {
        fn non_negative(v: f32) -> f32 {
            if v.is_finite() {
                v.max(0.0)
            } else {
                0.0
            }
        }
        self.silence_threshold = non_negative(self.silence_threshold);
        self.energy_threshold = non_negative(self.energy_threshold);
        self.window_duration_ms = non_negative(self.window_duration_ms).max(1.0);
        self.min_sound_duration_ms = non_negative(self.min_sound_duration_ms);
        self.min_silence_duration_ms = non_negative(self.min_silence_duration_ms);
        self.hangover_duration_ms = non_negative(self.hangover_duration_ms);
        self.tail_pad_fraction = non_negative(self.tail_pad_fraction).min(1.0);
    }

    /// Samples per analysis window at `sample_rate`.
    pub fn window_samples(&self, sample_rate: u32) -> usize {
        ((self.window_duration_ms.max(1.0) * sample_rate as f32 / 1000.0).round() as usize).max(1)
    }

    /// Consecutive active windows required to confirm a span.
    pub fn onset_windows(&self) -> u32 {
        duration_to_windows(self.min_sound_duration_ms, self.window_duration_ms)
    }

    /// Consecutive inactive windows required to close a span.
    pub fn release_windows(&self) -> u32 {
        duration_to_windows(
            self.min_silence_duration_ms + self.hangover_duration_ms,
            self.window_duration_ms,
        )
    }
}

fn duration_to_windows(duration_ms: f32, window_ms: f32) -> u32 {
    let windows = (duration_ms.max(0.0) / window_ms.max(1.0)).ceil();
    (windows as u32).max(1)
}

/// Trait for all window classifiers.
///
/// Implementors are stateful (onset and hangover counters).
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify one analysis window and advance the state machine.
    fn classify(&mut self, window: &[f32]) -> VadStep;

    /// Current counters.
    fn snapshot(&self) -> VadSnapshot;

    /// Return to `Silence` with cleared counters.
    fn reset(&mut self);
}
