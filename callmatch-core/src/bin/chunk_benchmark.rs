//! Per-chunk latency under concurrent sessions.
//!
//! Each worker thread owns one session and streams synthetic audio through
//! it (tone bursts separated by noise floor). Every `process_audio_chunk`
//! latency is sent to the collector over a crossbeam channel; the summary is
//! printed as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use callmatch_core::{CallMatchEngine, CallMatchError, EngineConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Args {
    sessions: usize,
    seconds: f32,
    sample_rate: f32,
    buffer_size: usize,
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    sessions: usize,
    seconds_per_session: f32,
    sample_rate: f32,
    buffer_size: usize,
    chunk_budget_ms: f64,
    chunks: usize,
    p50_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    max_ms: f64,
    over_budget: usize,
    frames_extracted: usize,
}

struct Sample {
    session: usize,
    latency_ms: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("callmatch=warn")),
        )
        .init();

    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        sessions: 4,
        seconds: 10.0,
        sample_rate: 48_000.0,
        buffer_size: 512,
        output: None,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| it.next().ok_or_else(|| format!("missing value for {name}"));
        match arg.as_str() {
            "--sessions" => {
                args.sessions = value("--sessions")?
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --sessions".to_string())?
                    .clamp(1, 64);
            }
            "--seconds" => {
                args.seconds = value("--seconds")?
                    .parse::<f32>()
                    .map_err(|_| "invalid value for --seconds".to_string())?
                    .clamp(0.1, 600.0);
            }
            "--rate" => {
                args.sample_rate = value("--rate")?
                    .parse::<f32>()
                    .map_err(|_| "invalid value for --rate".to_string())?;
            }
            "--buffer" => {
                args.buffer_size = value("--buffer")?
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --buffer".to_string())?
                    .max(1);
            }
            "--output" => {
                args.output = Some(PathBuf::from(value("--output")?));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p callmatch-core --release --bin chunk_benchmark -- \\
  [--sessions <n>] [--seconds <s>] [--rate <hz>] [--buffer <samples>] [--output <file.json>]"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

/// Alternating 400 ms tone bursts and 300 ms of low noise.
fn synth_signal(rate: f32, seconds: f32, seed: usize) -> Vec<f32> {
    let total = (rate * seconds) as usize;
    let burst = (rate * 0.4) as usize;
    let gap = (rate * 0.3) as usize;
    let freq = 300.0 + 150.0 * seed as f32;
    let mut rng = StdRng::seed_from_u64(seed as u64);

    (0..total)
        .map(|n| {
            let noise = rng.gen_range(-0.001f32..0.001);
            if n % (burst + gap) < burst {
                0.4 * (2.0 * std::f32::consts::PI * freq * n as f32 / rate).sin() + noise
            } else {
                noise
            }
        })
        .collect()
}

fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let engine = Arc::new(CallMatchEngine::new(EngineConfig::default()));
    let (tx, rx) = crossbeam_channel::unbounded::<Sample>();

    println!(
        "Running chunk benchmark: {} sessions × {:.1}s at {} Hz, {} samples/chunk",
        args.sessions, args.seconds, args.sample_rate, args.buffer_size
    );

    let mut workers = Vec::with_capacity(args.sessions);
    for seed in 0..args.sessions {
        let engine = Arc::clone(&engine);
        let tx = tx.clone();
        let (rate, seconds, buffer) = (args.sample_rate, args.seconds, args.buffer_size);
        workers.push(thread::spawn(move || -> Result<(), CallMatchError> {
            let signal = synth_signal(rate, seconds, seed);
            let id = engine.start_realtime_session(rate, buffer)?;
            for chunk in signal.chunks(buffer) {
                let started = Instant::now();
                engine.process_audio_chunk(id, chunk)?;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                if tx.send(Sample { session: seed, latency_ms }).is_err() {
                    break;
                }
            }
            engine.end_realtime_session(id)?;
            Ok(())
        }));
    }
    drop(tx);

    let mut latencies = Vec::new();
    let mut per_session = vec![0usize; args.sessions];
    for sample in rx.iter() {
        per_session[sample.session] += 1;
        latencies.push(sample.latency_ms);
    }

    for worker in workers {
        worker
            .join()
            .map_err(|_| "worker thread panicked".to_string())?
            .map_err(|e| e.to_string())?;
    }

    let chunk_budget_ms = args.buffer_size as f64 / f64::from(args.sample_rate) * 1000.0;
    let summary = Summary {
        sessions: args.sessions,
        seconds_per_session: args.seconds,
        sample_rate: args.sample_rate,
        buffer_size: args.buffer_size,
        chunk_budget_ms,
        chunks: latencies.len(),
        p50_ms: percentile(&latencies, 0.50),
        p95_ms: percentile(&latencies, 0.95),
        p99_ms: percentile(&latencies, 0.99),
        max_ms: latencies.iter().copied().fold(0.0, f64::max),
        over_budget: latencies.iter().filter(|&&ms| ms > chunk_budget_ms).count(),
        frames_extracted: engine.diagnostics_snapshot().frames_extracted,
    };
    tracing::debug!(?per_session, "chunks per session");

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("{json}");
    if let Some(path) = args.output {
        std::fs::write(&path, json).map_err(|e| format!("{}: {e}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synth_signal_is_seeded_and_bounded() {
        let a = synth_signal(16_000.0, 1.0, 3);
        assert_eq!(a, synth_signal(16_000.0, 1.0, 3));
        assert_ne!(a, synth_signal(16_000.0, 1.0, 4));
        assert_eq!(a.len(), 16_000);

        // Gap samples carry only the noise floor.
        let gap = &a[6_400..11_200];
        assert!(gap.iter().all(|s| s.abs() <= 0.001));
        assert!(gap.iter().any(|&s| s != 0.0));
        assert!(a.iter().all(|s| s.abs() <= 0.401));
    }

    #[test]
    fn percentile_picks_nearest_rank() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.5), 51.0);
        assert_eq!(percentile(&values, 1.0), 100.0);
        assert_eq!(percentile(&[], 0.95), 0.0);
    }
}
