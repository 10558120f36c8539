use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use callmatch_core::{CallMatchEngine, EngineConfig, FeatureConfig, Fingerprint, ReferenceConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};

const RATE: f32 = 16_000.0;
const CHUNK: usize = 256;

fn config() -> EngineConfig {
    EngineConfig {
        features: FeatureConfig {
            sample_rate: 16_000,
            frame_size: 512,
            hop_size: 128,
            ..FeatureConfig::default()
        },
        reference: ReferenceConfig {
            cache_features: false,
            ..ReferenceConfig::default()
        },
        ..EngineConfig::default()
    }
}

/// Tone bursts over a low seeded noise floor.
fn signal(freq: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..(RATE * 1.5) as usize)
        .map(|n| {
            let noise = rng.gen_range(-0.002f32..0.002);
            let t = n as f32 / RATE;
            if (0.2..0.9).contains(&t) {
                0.5 * (2.0 * std::f32::consts::PI * freq * t).sin() + noise
            } else {
                noise
            }
        })
        .collect()
}

fn run_alone(engine: &CallMatchEngine, samples: &[f32]) -> Fingerprint {
    let id = engine.start_realtime_session(RATE, CHUNK).unwrap();
    for chunk in samples.chunks(CHUNK) {
        engine.process_audio_chunk(id, chunk).unwrap();
    }
    let fp = engine.session_fingerprint(id).unwrap();
    engine.end_realtime_session(id).unwrap();
    fp
}

#[test]
fn interleaved_sessions_match_isolated_runs() {
    let inputs: Vec<Vec<f32>> = [(330.0, 1), (880.0, 2), (1_500.0, 3), (2_200.0, 4)]
        .iter()
        .map(|&(f, seed)| signal(f, seed))
        .collect();

    let reference_engine = CallMatchEngine::new(config());
    let expected: Vec<Fingerprint> = inputs
        .iter()
        .map(|s| run_alone(&reference_engine, s))
        .collect();
    assert!(expected.iter().all(|fp| !fp.is_empty()));

    let engine = Arc::new(CallMatchEngine::new(config()));
    let barrier = Arc::new(Barrier::new(inputs.len()));
    let handles: Vec<_> = inputs
        .into_iter()
        .map(|samples| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let id = engine.start_realtime_session(RATE, CHUNK).unwrap();
                barrier.wait();
                for chunk in samples.chunks(CHUNK) {
                    engine.process_audio_chunk(id, chunk).unwrap();
                    thread::yield_now();
                }
                let fp = engine.session_fingerprint(id).unwrap();
                engine.end_realtime_session(id).unwrap();
                (id, fp)
            })
        })
        .collect();

    let mut ids = Vec::new();
    for (handle, want) in handles.into_iter().zip(&expected) {
        let (id, got) = handle.join().expect("session thread panicked");
        assert_eq!(&got, want, "session {id} diverged from its isolated run");
        ids.push(id);
    }

    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4, "session ids must be unique");
    assert!(engine.active_sessions().is_empty());
}

#[test]
fn scoring_while_reference_swaps() {
    let engine = Arc::new(CallMatchEngine::new(config()));
    let id = engine.start_realtime_session(RATE, CHUNK).unwrap();
    for chunk in signal(440.0, 9).chunks(CHUNK) {
        engine.process_audio_chunk(id, chunk).unwrap();
    }
    let live = engine.session_fingerprint(id).unwrap();
    engine.publish_master_call("self", live).unwrap();

    let swapper = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for k in 0..200 {
                let frames = 4 + k % 7;
                let fp = Fingerprint::from_flat(13, vec![k as f32 * 0.01; frames * 13], true).unwrap();
                engine.publish_master_call("swap", fp).unwrap();
            }
        })
    };

    for _ in 0..200 {
        let score = engine.get_similarity_score(id).unwrap();
        assert!(score.is_finite() && score >= 0.0);
    }
    swapper.join().expect("swapper panicked");
    assert_eq!(engine.current_master_call().unwrap().id, "swap");
}

#[test]
fn chunk_is_not_blocked_by_score_on_same_session() {
    let engine = Arc::new(CallMatchEngine::new(config()));
    engine.set_window_ratio(1.0);
    let id = engine.start_realtime_session(RATE, CHUNK).unwrap();

    // One minute of continuous voicing: thousands of frames, so a full-band
    // alignment against itself takes far longer than a chunk budget.
    let mut rng = StdRng::seed_from_u64(21);
    let take: Vec<f32> = (0..(RATE * 60.0) as usize)
        .map(|n| {
            let t = n as f32 / RATE;
            0.4 * (2.0 * std::f32::consts::PI * (300.0 + 40.0 * (t * 0.7).sin()) * t).sin()
                + rng.gen_range(-0.01f32..0.01)
        })
        .collect();
    for chunk in take.chunks(CHUNK) {
        engine.process_audio_chunk(id, chunk).unwrap();
    }
    let live = engine.session_fingerprint(id).unwrap();
    assert!(live.len() > 5_000, "frames={}", live.len());
    engine.publish_master_call("self", live).unwrap();

    let started = Arc::new(Barrier::new(2));
    let scorer = {
        let engine = Arc::clone(&engine);
        let started = Arc::clone(&started);
        thread::spawn(move || {
            started.wait();
            let t = Instant::now();
            let score = engine.get_similarity_score(id).unwrap();
            (score, t.elapsed())
        })
    };

    started.wait();
    thread::sleep(Duration::from_millis(5));
    let tail: Vec<f32> = take[..CHUNK].to_vec();
    let t = Instant::now();
    engine.process_audio_chunk(id, &tail).unwrap();
    let chunk_time = t.elapsed();
    let still_scoring = !scorer.is_finished();

    let (score, score_time) = scorer.join().expect("score thread panicked");
    assert!(score.is_finite());
    assert!(
        chunk_time < Duration::from_millis(10),
        "chunk took {chunk_time:?} while a {score_time:?} score ran (overlapping: {still_scoring})"
    );
}
