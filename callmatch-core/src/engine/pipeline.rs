//! Per-session segmenting pipeline.
//!
//! ## Stages (per `feed` call)
//!
//! ```text
//! 1. Resample the chunk to the analysis rate (passthrough when equal)
//! 2. Cut into fixed VAD windows through the ingest ring
//! 3. Classify each window → VadStep
//! 4. Keep windows that belong to a span in the voiced ring
//!    (tentatively while the detector is in Onset)
//! 5. While the voiced ring holds ≥ frame_size samples, extract a frame and
//!    advance by hop_size
//! 6. On SoundEnded, zero-pad the uncovered tail into one last frame if it is
//!    long enough, then clear the voiced ring
//! ```
//!
//! Every buffer is allocated in `new`. `feed` only copies between them.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{copy_front, discard_all, sample_ring, Consumer, Observer, Producer, SampleRing},
    engine::diagnostics::EngineDiagnostics,
    error::Result,
    features::{default_extractor, FeatureConfig, FeatureExtractor, Fingerprint},
    vad::{EnergyVad, VadConfig, VadSnapshot, VadTransition, VoiceActivityDetector},
};

/// Input samples per rubato call when a session needs resampling.
const RESAMPLER_CHUNK: usize = 1024;

/// What one `feed` or `finish` call produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedReport {
    pub frames_emitted: usize,
    /// Frames computed (or due) after the fingerprint reached capacity.
    pub frames_dropped: usize,
    pub segments_closed: usize,
}

impl FeedReport {
    pub fn overflowed(&self) -> bool {
        self.frames_dropped > 0
    }
}

pub struct SegmentPipeline {
    converter: RateConverter,
    max_chunk: usize,
    resampled: Vec<f32>,

    ingest: SampleRing,
    window: Vec<f32>,
    voiced: SampleRing,
    frame: Vec<f32>,
    coeffs: Vec<f32>,

    frame_size: usize,
    hop_size: usize,
    /// Samples at the front of `voiced` already inside an emitted frame.
    covered: usize,
    /// Fresh tail samples needed at span end to emit a padded frame.
    tail_min: usize,

    vad: Box<dyn VoiceActivityDetector>,
    extractor: Box<dyn FeatureExtractor>,
    fingerprint: Fingerprint,
    diagnostics: Arc<EngineDiagnostics>,
}

impl SegmentPipeline {
    /// Build a pipeline for audio arriving at `input_rate` in chunks of up
    /// to `max_chunk` samples. The fingerprint holds at most `max_frames`.
    pub fn new(
        features: &FeatureConfig,
        vad: &VadConfig,
        input_rate: u32,
        max_chunk: usize,
        max_frames: usize,
        diagnostics: Arc<EngineDiagnostics>,
    ) -> Result<Self> {
        let extractor = default_extractor(features);
        let features = extractor.config().clone();
        let mut vad_cfg = vad.clone();
        vad_cfg.normalize();

        let max_chunk = max_chunk.max(1);
        let mut converter = RateConverter::new(input_rate, features.sample_rate, RESAMPLER_CHUNK)?;
        converter.reserve_input(max_chunk);
        let resampled = Vec::with_capacity(converter.max_output_len(max_chunk));

        let window_samples = vad_cfg.window_samples(features.sample_rate);
        let onset = vad_cfg.onset_windows() as usize;
        let voiced_capacity = features.frame_size + window_samples * (onset + 1);
        let tail_min = (vad_cfg.tail_pad_fraction * features.frame_size as f32).ceil() as usize;

        debug!(
            input_rate,
            analysis_rate = features.sample_rate,
            window_samples,
            voiced_capacity,
            max_frames,
            "segment pipeline created"
        );

        Ok(Self {
            converter,
            max_chunk,
            resampled,
            ingest: sample_ring(window_samples),
            window: vec![0.0; window_samples],
            voiced: sample_ring(voiced_capacity),
            frame: vec![0.0; features.frame_size],
            coeffs: vec![0.0; features.num_coeffs],
            frame_size: features.frame_size,
            hop_size: features.hop_size,
            covered: 0,
            tail_min,
            vad: Box::new(EnergyVad::new(&vad_cfg)),
            extractor,
            fingerprint: Fingerprint::with_capacity(features.num_coeffs, max_frames),
            diagnostics,
        })
    }

    /// Push one chunk of input-rate samples through every stage.
    pub fn feed(&mut self, chunk: &[f32]) -> Result<FeedReport> {
        let mut report = FeedReport::default();
        if self.converter.is_passthrough() {
            self.ingest_samples(chunk, &mut report)?;
            return Ok(report);
        }

        let mut resampled = std::mem::take(&mut self.resampled);
        let mut result = Ok(());
        for piece in chunk.chunks(self.max_chunk) {
            resampled.clear();
            result = self
                .converter
                .process_into(piece, &mut resampled)
                .and_then(|()| self.ingest_samples(&resampled, &mut report));
            if result.is_err() {
                break;
            }
        }
        self.resampled = resampled;
        result.map(|()| report)
    }

    /// Close an open span as if silence followed. Used when a finite
    /// recording is featurized through the pipeline.
    pub fn finish(&mut self) -> Result<FeedReport> {
        let mut report = FeedReport::default();
        self.flush_converter(&mut report)?;
        if self.vad.snapshot().is_in_sound_segment {
            self.extract_ready(&mut report)?;
            self.flush_tail(&mut report)?;
        }
        discard_all(&mut self.voiced);
        self.covered = 0;
        self.vad.reset();
        Ok(report)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn into_fingerprint(self) -> Fingerprint {
        self.fingerprint
    }

    pub fn frame_count(&self) -> usize {
        self.fingerprint.len()
    }

    pub fn vad_snapshot(&self) -> VadSnapshot {
        self.vad.snapshot()
    }

    pub fn analysis_rate(&self) -> u32 {
        self.extractor.config().sample_rate
    }

    /// Drain the resampler's partial block, padded with silence.
    fn flush_converter(&mut self, report: &mut FeedReport) -> Result<()> {
        if self.converter.is_passthrough() {
            return Ok(());
        }
        let mut resampled = std::mem::take(&mut self.resampled);
        resampled.clear();
        let result = self
            .converter
            .flush_into(&mut resampled)
            .and_then(|_| self.ingest_samples(&resampled, report));
        self.resampled = resampled;
        result
    }

    fn ingest_samples(&mut self, samples: &[f32], report: &mut FeedReport) -> Result<()> {
        let mut rest = samples;
        while !rest.is_empty() {
            let taken = self.ingest.push_slice(rest);
            rest = &rest[taken..];
            if self.ingest.is_full() {
                self.ingest.pop_slice(&mut self.window);
                self.on_window(report)?;
            }
        }
        Ok(())
    }

    fn on_window(&mut self, report: &mut FeedReport) -> Result<()> {
        let step = self.vad.classify(&self.window);
        EngineDiagnostics::bump(&self.diagnostics.vad_windows, 1);
        if step.decision.is_speech() {
            EngineDiagnostics::bump(&self.diagnostics.vad_voiced, 1);
        }

        if step.transition == VadTransition::OnsetAborted {
            discard_all(&mut self.voiced);
        }

        if step.keeps_samples() {
            let kept = self.voiced.push_slice(&self.window);
            if kept < self.window.len() {
                warn!(
                    dropped = self.window.len() - kept,
                    "voiced ring full, samples dropped"
                );
            }
        }

        if step.extracts() {
            self.extract_ready(report)?;
        }

        if step.transition == VadTransition::SoundEnded {
            self.flush_tail(report)?;
        }
        Ok(())
    }

    fn extract_ready(&mut self, report: &mut FeedReport) -> Result<()> {
        while self.voiced.occupied_len() >= self.frame_size {
            copy_front(&self.voiced, &mut self.frame);
            self.emit_frame(report)?;
            self.voiced.skip(self.hop_size);
            self.covered = self.frame_size - self.hop_size;
        }
        Ok(())
    }

    fn flush_tail(&mut self, report: &mut FeedReport) -> Result<()> {
        let occupied = self.voiced.occupied_len();
        let fresh = occupied.saturating_sub(self.covered);
        let padded = fresh > 0 && fresh >= self.tail_min;
        if padded {
            let n = copy_front(&self.voiced, &mut self.frame);
            self.frame[n..].fill(0.0);
            self.emit_frame(report)?;
        }

        debug!(fresh, padded, frames = self.fingerprint.len(), "segment closed");
        discard_all(&mut self.voiced);
        self.covered = 0;
        report.segments_closed += 1;
        EngineDiagnostics::bump(&self.diagnostics.segments_closed, 1);
        Ok(())
    }

    fn emit_frame(&mut self, report: &mut FeedReport) -> Result<()> {
        if self.fingerprint.is_full() {
            report.frames_dropped += 1;
            EngineDiagnostics::bump(&self.diagnostics.frames_dropped, 1);
            return Ok(());
        }
        let energy = self.extractor.process_frame_into(&self.frame, &mut self.coeffs)?;
        self.fingerprint.push(&self.coeffs, energy);
        report.frames_emitted += 1;
        EngineDiagnostics::bump(&self.diagnostics.frames_extracted, 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;
    /// 20 ms at 16 kHz.
    const WINDOW: usize = 320;

    fn features(hop_size: usize) -> FeatureConfig {
        FeatureConfig {
            sample_rate: RATE,
            frame_size: 256,
            hop_size,
            ..FeatureConfig::default()
        }
    }

    fn pipeline_with(features: &FeatureConfig, vad: &VadConfig, max_frames: usize) -> SegmentPipeline {
        SegmentPipeline::new(
            features,
            vad,
            RATE,
            WINDOW,
            max_frames,
            Arc::new(EngineDiagnostics::default()),
        )
        .unwrap()
    }

    fn pipeline(hop_size: usize) -> SegmentPipeline {
        pipeline_with(&features(hop_size), &VadConfig::default(), 10_000)
    }

    fn tone_window(start: usize) -> Vec<f32> {
        (start..start + WINDOW)
            .map(|n| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * n as f32 / RATE as f32).sin())
            .collect()
    }

    fn feed_tone(p: &mut SegmentPipeline, windows: usize) -> FeedReport {
        let mut total = FeedReport::default();
        for w in 0..windows {
            let r = p.feed(&tone_window(w * WINDOW)).unwrap();
            total.frames_emitted += r.frames_emitted;
            total.frames_dropped += r.frames_dropped;
            total.segments_closed += r.segments_closed;
        }
        total
    }

    fn feed_silence(p: &mut SegmentPipeline, windows: usize) -> FeedReport {
        let mut total = FeedReport::default();
        for _ in 0..windows {
            let r = p.feed(&[0.0; WINDOW]).unwrap();
            total.frames_emitted += r.frames_emitted;
            total.segments_closed += r.segments_closed;
        }
        total
    }

    #[test]
    fn silence_produces_no_frames() {
        let mut p = pipeline(128);
        feed_silence(&mut p, 200);
        assert_eq!(p.frame_count(), 0);
        assert!(!p.vad_snapshot().is_in_sound_segment);
    }

    #[test]
    fn burst_shorter_than_onset_is_discarded() {
        let mut p = pipeline(128);
        feed_tone(&mut p, 4);
        assert_eq!(p.frame_count(), 0);
        feed_silence(&mut p, 20);
        assert_eq!(p.frame_count(), 0);
        assert_eq!(p.voiced.occupied_len(), 0);
    }

    #[test]
    fn confirmed_onset_keeps_tentative_windows() {
        let mut p = pipeline(128);
        let report = feed_tone(&mut p, 5);
        // All five windows (1600 samples) are framed once the span confirms.
        let expected = features(128).frame_count(5 * WINDOW);
        assert_eq!(report.frames_emitted, expected);
        assert_eq!(p.frame_count(), expected);
    }

    #[test]
    fn span_includes_release_windows() {
        let mut p = pipeline(128);
        feed_tone(&mut p, 20);
        let closing = feed_silence(&mut p, 10);
        assert_eq!(closing.segments_closed, 1);

        // 20 tone windows + 8 release windows, no uncovered tail.
        let span = 28 * WINDOW;
        assert_eq!(p.frame_count(), features(128).frame_count(span));
    }

    #[test]
    fn tail_padding_follows_fraction() {
        // 19 tone + 8 release windows = 8640 samples = 33 frames + 192 left.
        let vad_long_tail = VadConfig {
            tail_pad_fraction: 0.5,
            ..VadConfig::default()
        };
        let mut p = pipeline_with(&features(256), &vad_long_tail, 10_000);
        feed_tone(&mut p, 19);
        feed_silence(&mut p, 10);
        assert_eq!(p.frame_count(), 34);

        let vad_strict = VadConfig {
            tail_pad_fraction: 0.8,
            ..VadConfig::default()
        };
        let mut p = pipeline_with(&features(256), &vad_strict, 10_000);
        feed_tone(&mut p, 19);
        feed_silence(&mut p, 10);
        assert_eq!(p.frame_count(), 33);
    }

    #[test]
    fn short_gap_does_not_split_the_span() {
        let mut p = pipeline(128);
        feed_tone(&mut p, 10);
        let gap = feed_silence(&mut p, 5);
        assert_eq!(gap.segments_closed, 0);
        assert!(p.vad_snapshot().is_in_sound_segment);
        feed_tone(&mut p, 10);
        let end = feed_silence(&mut p, 10);
        assert_eq!(end.segments_closed, 1);

        let span = (10 + 5 + 10 + 8) * WINDOW;
        assert_eq!(p.frame_count(), features(128).frame_count(span));
    }

    #[test]
    fn full_fingerprint_drops_and_reports() {
        let mut p = pipeline_with(&features(128), &VadConfig::default(), 3);
        let report = feed_tone(&mut p, 10);
        assert_eq!(p.frame_count(), 3);
        assert!(report.overflowed());
        assert_eq!(report.frames_emitted, 3);
    }

    #[test]
    fn odd_chunk_sizes_match_window_aligned_feed() {
        let mut aligned = pipeline(128);
        feed_tone(&mut aligned, 20);
        feed_silence(&mut aligned, 10);

        let mut signal: Vec<f32> = (0..20).flat_map(|w| tone_window(w * WINDOW)).collect();
        signal.extend(std::iter::repeat(0.0).take(10 * WINDOW));
        let mut ragged = pipeline_with(&features(128), &VadConfig::default(), 10_000);
        for chunk in signal.chunks(173) {
            ragged.feed(chunk).unwrap();
        }

        assert_eq!(ragged.fingerprint(), aligned.fingerprint());
    }

    #[test]
    fn finish_flushes_an_open_span() {
        let mut p = pipeline(128);
        feed_tone(&mut p, 12);
        let before = p.frame_count();
        let report = p.finish().unwrap();
        assert_eq!(report.segments_closed, 1);
        assert!(p.frame_count() >= before);
        assert!(!p.vad_snapshot().is_in_sound_segment);
    }

    #[test]
    fn resampled_session_still_segments() {
        let cfg = features(128);
        let mut p = SegmentPipeline::new(
            &cfg,
            &VadConfig::default(),
            48_000,
            960,
            10_000,
            Arc::new(EngineDiagnostics::default()),
        )
        .unwrap();
        assert_eq!(p.analysis_rate(), RATE);

        let tone: Vec<f32> = (0..48_000)
            .map(|n| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 48_000.0).sin())
            .collect();
        for chunk in tone.chunks(960) {
            p.feed(chunk).unwrap();
        }
        for _ in 0..50 {
            p.feed(&[0.0; 960]).unwrap();
        }

        assert!(p.frame_count() > 50, "frames={}", p.frame_count());
        assert!(!p.vad_snapshot().is_in_sound_segment);
    }

    #[test]
    fn finish_drains_pending_resampler_input() {
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let mut p = SegmentPipeline::new(
            &features(128),
            &VadConfig::default(),
            48_000,
            960,
            10_000,
            Arc::clone(&diagnostics),
        )
        .unwrap();

        // 23 full resampler blocks plus 448 pending samples.
        let tone: Vec<f32> = (0..24_000)
            .map(|n| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * n as f32 / 48_000.0).sin())
            .collect();
        for chunk in tone.chunks(960) {
            p.feed(chunk).unwrap();
        }
        let windows = diagnostics.snapshot().vad_windows;

        p.finish().unwrap();
        assert!(diagnostics.snapshot().vad_windows > windows);
        assert!(!p.vad_snapshot().is_in_sound_segment);
    }
}
