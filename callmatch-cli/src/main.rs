//! `callmatch` — drives the engine from WAV files.
//!
//! ```text
//! callmatch score     --master <id> --input <take.wav> [--path] [--settings <file>]
//! callmatch featurize --master <id> [--settings <file>]
//! callmatch config    [--write] [--settings <file>]
//! ```
//!
//! Reports are printed as JSON on stdout; logs go to stderr (`RUST_LOG`,
//! default `callmatch=info`).

mod settings;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use callmatch_core::{
    audio::read_wav_mono, CallMatchEngine, ReferencePolicy, ScoreReport, SessionSummary,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use settings::{apply_env_overrides, default_settings_path, load_settings, save_settings, AppSettings};

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Score {
        master: String,
        input: PathBuf,
        with_path: bool,
    },
    Featurize {
        master: String,
    },
    Config {
        write: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Args {
    command: Command,
    settings: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreOutput {
    generated_at: DateTime<Utc>,
    input: String,
    input_seconds: f64,
    processing_ms: f64,
    report: ScoreReport,
    session: SessionSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FeaturizeOutput {
    generated_at: DateTime<Utc>,
    master_call_id: String,
    policy: ReferencePolicy,
    frames: usize,
    num_coeffs: usize,
    feature_file: String,
}

const USAGE: &str = "Usage: callmatch <command> [options]

Commands:
  score      --master <id> --input <take.wav> [--path]
  featurize  --master <id>
  config     [--write]

Options:
  --settings <file>   settings JSON (default: user data directory)";

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("callmatch=info")),
        )
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("{USAGE}");
            return;
        }
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("callmatch failed: {e:#}");
        std::process::exit(1);
    }
}

/// `Ok(None)` means help was requested.
fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Option<Args>> {
    let mut it = raw.into_iter();
    let Some(command) = it.next() else {
        return Ok(None);
    };
    if matches!(command.as_str(), "--help" | "-h" | "help") {
        return Ok(None);
    }

    let mut master: Option<String> = None;
    let mut input: Option<PathBuf> = None;
    let mut settings: Option<PathBuf> = None;
    let mut with_path = false;
    let mut write = false;

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--master" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --master");
                };
                master = Some(v);
            }
            "--input" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --input");
                };
                input = Some(PathBuf::from(v));
            }
            "--settings" => {
                let Some(v) = it.next() else {
                    bail!("missing value for --settings");
                };
                settings = Some(PathBuf::from(v));
            }
            "--path" => with_path = true,
            "--write" => write = true,
            "--help" | "-h" => return Ok(None),
            other => bail!("unknown argument: {other}"),
        }
    }

    let command = match command.as_str() {
        "score" => Command::Score {
            master: master.context("score needs --master <id>")?,
            input: input.context("score needs --input <take.wav>")?,
            with_path,
        },
        "featurize" => Command::Featurize {
            master: master.context("featurize needs --master <id>")?,
        },
        "config" => Command::Config { write },
        other => bail!("unknown command: {other}"),
    };
    Ok(Some(Args { command, settings }))
}

fn run(args: Args) -> Result<()> {
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    apply_env_overrides(&mut settings);

    match args.command {
        Command::Score {
            master,
            input,
            with_path,
        } => score(&settings, &master, &input, with_path || settings.report_path),
        Command::Featurize { master } => featurize(&settings, &master),
        Command::Config { write } => {
            if write {
                save_settings(&settings_path, &settings)
                    .with_context(|| format!("writing {}", settings_path.display()))?;
                info!(path = %settings_path.display(), "settings written");
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn engine_for(settings: &AppSettings) -> Result<CallMatchEngine> {
    let engine = CallMatchEngine::new(settings.engine.clone());
    engine.initialize().context("initializing engine")?;
    Ok(engine)
}

fn score(settings: &AppSettings, master: &str, input: &Path, with_path: bool) -> Result<()> {
    let engine = engine_for(settings)?;
    engine
        .load_master_call(master)
        .with_context(|| format!("loading master call '{master}'"))?;

    let take = read_wav_mono(input).with_context(|| format!("reading {}", input.display()))?;
    let started = Instant::now();
    let id = engine.start_realtime_session(take.sample_rate as f32, settings.chunk_size)?;
    for chunk in take.samples.chunks(settings.chunk_size) {
        if let Err(e) = engine.process_audio_chunk(id, chunk) {
            warn!(session = %id, error = %e, "chunk rejected; scoring what was captured");
            break;
        }
    }

    let report = engine.score_report(id, with_path);
    let session = engine.end_realtime_session(id)?;
    let report = report.with_context(|| format!("scoring {}", input.display()))?;

    let output = ScoreOutput {
        generated_at: Utc::now(),
        input: input.display().to_string(),
        input_seconds: take.duration_secs(),
        processing_ms: started.elapsed().as_secs_f64() * 1000.0,
        report,
        session,
    };
    let json = serde_json::to_string_pretty(&output)?;
    println!("{json}");

    if let Some(dir) = &settings.report_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let file = dir.join(format!(
            "{}_{}.json",
            master,
            output.generated_at.format("%Y%m%dT%H%M%S")
        ));
        std::fs::write(&file, &json).with_context(|| format!("writing {}", file.display()))?;
        info!(path = %file.display(), "report written");
    }
    Ok(())
}

fn featurize(settings: &AppSettings, master: &str) -> Result<()> {
    let engine = engine_for(settings)?;
    let store = engine.reference_store();
    let reference = store
        .resolve(master)
        .with_context(|| format!("featurizing master call '{master}'"))?;

    let output = FeaturizeOutput {
        generated_at: Utc::now(),
        master_call_id: reference.id.clone(),
        policy: store.config().policy,
        frames: reference.len(),
        num_coeffs: reference.fingerprint.num_coeffs(),
        feature_file: store.feature_path(master).display().to_string(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
