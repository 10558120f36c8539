//! Energy-based VAD using a mean-square threshold, a peak gate and
//! onset/release window counters.
//!
//! ## Algorithm
//!
//! 1. Compute mean-square power and peak amplitude of the window.
//! 2. The window is active iff power > `energy_threshold` and
//!    peak > `silence_threshold`.
//! 3. Active windows count toward onset; inactive windows count toward
//!    release. Either count resets the other.
//! 4. The state advances per the table in [`super`].

use tracing::debug;

use super::{VadConfig, VadDecision, VadSnapshot, VadState, VadStep, VadTransition, VoiceActivityDetector};

/// A simple energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// Mean-square power threshold.
    energy_threshold: f32,
    /// Peak amplitude gate.
    peak_threshold: f32,
    /// Active windows required to confirm a span.
    onset_windows: u32,
    /// Inactive windows required to close a span.
    release_windows: u32,
    state: VadState,
    consecutive_sound: u32,
    consecutive_silence: u32,
}

impl EnergyVad {
    /// Create a detector from a (normalized) config.
    pub fn new(config: &VadConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            peak_threshold: config.silence_threshold,
            onset_windows: config.onset_windows(),
            release_windows: config.release_windows(),
            state: VadState::Silence,
            consecutive_sound: 0,
            consecutive_silence: 0,
        }
    }

    /// Mean of squared samples.
    pub fn mean_square(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        sum_sq / samples.len() as f32
    }

    /// Largest absolute sample.
    pub fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    fn is_active(&self, window: &[f32]) -> bool {
        !window.is_empty()
            && Self::mean_square(window) > self.energy_threshold
            && Self::peak(window) > self.peak_threshold
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(&VadConfig::default())
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, window: &[f32]) -> VadStep {
        let active = self.is_active(window);

        if active {
            self.consecutive_sound = self.consecutive_sound.saturating_add(1);
            self.consecutive_silence = 0;
        } else {
            self.consecutive_silence = self.consecutive_silence.saturating_add(1);
            self.consecutive_sound = 0;
        }

        let confirmed = self.consecutive_sound >= self.onset_windows;
        let released = self.consecutive_silence >= self.release_windows;

        let (next, transition) = match (self.state, active) {
            (VadState::Silence, false) => (VadState::Silence, VadTransition::None),
            (VadState::Silence, true) if confirmed => (VadState::Sound, VadTransition::SoundStarted),
            (VadState::Silence, true) => (VadState::Onset, VadTransition::OnsetStarted),
            (VadState::Onset, true) if confirmed => (VadState::Sound, VadTransition::SoundStarted),
            (VadState::Onset, true) => (VadState::Onset, VadTransition::None),
            (VadState::Onset, false) => (VadState::Silence, VadTransition::OnsetAborted),
            (VadState::Sound, true) => (VadState::Sound, VadTransition::None),
            (VadState::Sound, false) if released => (VadState::Silence, VadTransition::SoundEnded),
            (VadState::Sound, false) => (VadState::Hangover, VadTransition::HangoverStarted),
            (VadState::Hangover, true) => (VadState::Sound, VadTransition::SoundResumed),
            (VadState::Hangover, false) if released => {
                (VadState::Silence, VadTransition::SoundEnded)
            }
            (VadState::Hangover, false) => (VadState::Hangover, VadTransition::None),
        };

        if transition != VadTransition::None {
            debug!(from = ?self.state, to = ?next, ?transition, "vad transition");
        }
        self.state = next;

        VadStep {
            decision: if active {
                VadDecision::Speech
            } else {
                VadDecision::Silence
            },
            transition,
            state: next,
        }
    }

    fn snapshot(&self) -> VadSnapshot {
        VadSnapshot {
            state: self.state,
            is_in_sound_segment: self.state.is_in_sound_segment(),
            consecutive_sound_frames: self.consecutive_sound,
            consecutive_silence_frames: self.consecutive_silence,
        }
    }

    fn reset(&mut self) {
        self.state = VadState::Silence;
        self.consecutive_sound = 0;
        self.consecutive_silence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: usize = 320;

    fn silent() -> Vec<f32> {
        vec![0.0f32; WINDOW]
    }

    fn loud(amplitude: f32) -> Vec<f32> {
        (0..WINDOW)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    fn vad() -> EnergyVad {
        // onset 5 windows, release 8 windows
        EnergyVad::new(&VadConfig::default())
    }

    #[test]
    fn silence_stays_silent() {
        let mut vad = vad();
        for _ in 0..50 {
            let step = vad.classify(&silent());
            assert_eq!(step.state, VadState::Silence);
            assert_eq!(step.decision, VadDecision::Silence);
        }
    }

    #[test]
    fn onset_requires_min_sound_windows() {
        let mut vad = vad();
        for i in 0..4 {
            let step = vad.classify(&loud(0.5));
            assert_eq!(step.state, VadState::Onset, "window {i}");
        }
        let step = vad.classify(&loud(0.5));
        assert_eq!(step.state, VadState::Sound);
        assert_eq!(step.transition, VadTransition::SoundStarted);
    }

    #[test]
    fn short_burst_aborts_onset() {
        let mut vad = vad();
        for _ in 0..4 {
            vad.classify(&loud(0.5));
        }
        let step = vad.classify(&silent());
        assert_eq!(step.transition, VadTransition::OnsetAborted);
        assert_eq!(step.state, VadState::Silence);
    }

    #[test]
    fn gap_shorter_than_release_keeps_span_open() {
        let mut vad = vad();
        for _ in 0..5 {
            vad.classify(&loud(0.5));
        }
        assert_eq!(vad.classify(&silent()).transition, VadTransition::HangoverStarted);
        for _ in 0..6 {
            assert_eq!(vad.classify(&silent()).state, VadState::Hangover);
        }
        let step = vad.classify(&loud(0.5));
        assert_eq!(step.transition, VadTransition::SoundResumed);
        assert_eq!(step.state, VadState::Sound);
    }

    #[test]
    fn release_after_silence_plus_hangover() {
        let mut vad = vad();
        for _ in 0..5 {
            vad.classify(&loud(0.5));
        }
        for _ in 0..7 {
            assert!(vad.classify(&silent()).state.is_in_sound_segment());
        }
        let step = vad.classify(&silent());
        assert_eq!(step.transition, VadTransition::SoundEnded);
        assert_eq!(step.state, VadState::Silence);
    }

    #[test]
    fn peak_gate_blocks_low_amplitude_energy() {
        // Power above the energy threshold but peak below the gate.
        let mut vad = EnergyVad::new(&VadConfig {
            energy_threshold: 0.0001,
            silence_threshold: 0.5,
            min_sound_duration_ms: 0.0,
            ..VadConfig::default()
        });
        assert_eq!(vad.classify(&loud(0.1)).decision, VadDecision::Silence);
        assert_eq!(vad.classify(&loud(0.6)).decision, VadDecision::Speech);
    }

    #[test]
    fn reset_returns_to_silence() {
        let mut vad = vad();
        for _ in 0..6 {
            vad.classify(&loud(0.5));
        }
        vad.reset();
        let snap = vad.snapshot();
        assert_eq!(snap.state, VadState::Silence);
        assert_eq!(snap.consecutive_sound_frames, 0);
        assert!(!snap.is_in_sound_segment);
    }

    #[test]
    fn empty_window_is_silence() {
        let mut vad = EnergyVad::default();
        assert_eq!(vad.classify(&[]).decision, VadDecision::Silence);
    }

    #[test]
    fn mean_square_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let ms = EnergyVad::mean_square(&samples);
        assert!((ms - 0.25).abs() < 1e-6, "ms={ms}");
        assert_eq!(EnergyVad::peak(&samples), 0.5);
    }
}
