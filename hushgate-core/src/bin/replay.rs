//! Replay a WAV file through the voice activity controller.
//!
//! Reads 16-bit integer or 32-bit float WAV, downmixes to mono, and feeds
//! fixed-size chunks through the same conditioning and gating the live
//! engine uses. Prints utterance boundaries and the pipeline counters;
//! `--output` also writes every emitted chunk to a WAV file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hushgate_core::{
    audio::{downmix, recorder::WavTap},
    buffering::chunk::AudioChunk,
    engine::diagnostics::PipelineDiagnostics,
    NoiseMode, PipelineConfig, VoiceActivityController,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Args {
    input: PathBuf,
    output: Option<PathBuf>,
    config: PipelineConfig,
    block_size: usize,
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Utterance {
    start_secs: f64,
    end_secs: f64,
    emitted_samples: usize,
    forced: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("replay failed: {e}");
        std::process::exit(1);
    }
}

fn parse_args() -> Result<Args, String> {
    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut config = PipelineConfig::default();
    let mut block_size: usize = 1_024;
    let mut json = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| it.next().ok_or_else(|| format!("missing value for {name}"));
        match arg.as_str() {
            "--output" => output = Some(PathBuf::from(value("--output")?)),
            "--config" => {
                let path = value("--config")?;
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read {path}: {e}"))?;
                config = serde_json::from_str(&text)
                    .map_err(|e| format!("invalid config {path}: {e}"))?;
            }
            "--threshold" => config.silence_threshold_rms = parse_num(&value("--threshold")?)?,
            "--hysteresis" => config.hysteresis_chunks = parse_num(&value("--hysteresis")?)?,
            "--pre-roll" => config.pre_roll_seconds = parse_num(&value("--pre-roll")?)?,
            "--target-rate" => config.target_rate = parse_num(&value("--target-rate")?)?,
            "--block" => block_size = parse_num(&value("--block")?)?,
            "--normalize" => config.normalize = true,
            "--no-suppression" => config.noise_suppression = false,
            "--stationary" => config.noise_mode = NoiseMode::Stationary,
            "--json" => json = true,
            "--help" | "-h" => {
                println!(
                    "Usage: replay <input.wav> [--output <out.wav>] [--config <pipeline.json>] \\
  [--threshold <rms>] [--hysteresis <chunks>] [--pre-roll <secs>] [--target-rate <hz>] \\
  [--block <samples>] [--normalize] [--no-suppression] [--stationary] [--json]"
                );
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {other}"));
            }
            other => {
                if input.replace(PathBuf::from(other)).is_some() {
                    return Err("more than one input file given".into());
                }
            }
        }
    }

    let input = input.ok_or_else(|| "no input file given (see --help)".to_string())?;
    Ok(Args {
        input,
        output,
        config,
        block_size,
        json,
    })
}

fn parse_num<T: std::str::FromStr>(v: &str) -> Result<T, String> {
    v.parse::<T>().map_err(|_| format!("invalid number: {v}"))
}

fn read_mono(path: &Path) -> Result<(Vec<i16>, u32), String> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            let interleaved = reader
                .samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            downmix(&interleaved, channels, |s| s as f32 / 32768.0).collect()
        }
        (hound::SampleFormat::Float, 32) => {
            let interleaved = reader
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?;
            downmix(&interleaved, channels, |s| s).collect()
        }
        (format, bits) => {
            return Err(format!("unsupported WAV format: {bits}-bit {format:?}"));
        }
    };
    Ok((samples, spec.sample_rate))
}

fn run() -> Result<(), String> {
    let Args {
        input,
        output,
        mut config,
        block_size,
        json,
    } = parse_args()?;
    if block_size == 0 {
        return Err("--block must be > 0".into());
    }

    let (samples, capture_rate) = read_mono(&input)?;
    config.capture_rate = capture_rate;

    let diagnostics = Arc::new(PipelineDiagnostics::default());
    let mut vac = VoiceActivityController::new(&config, block_size, Arc::clone(&diagnostics))
        .map_err(|e| e.to_string())?;
    if let Some(path) = &output {
        let tap = WavTap::create(path, config.target_rate).map_err(|e| e.to_string())?;
        vac = vac.with_tap(tap);
    }

    let chunk_secs = block_size as f64 / f64::from(capture_rate);
    let mut utterances: Vec<Utterance> = Vec::new();
    let mut current: Option<Utterance> = None;

    for (index, block) in samples.chunks(block_size).enumerate() {
        let at = index as f64 * chunk_secs;
        let emitted = vac.process(&AudioChunk::new(block.to_vec(), capture_rate));
        let emitted_samples: usize = emitted.iter().map(AudioChunk::len).sum();

        if emitted_samples > 0 || vac.in_speech() {
            current
                .get_or_insert_with(|| Utterance {
                    start_secs: at,
                    end_secs: at,
                    emitted_samples: 0,
                    forced: false,
                })
                .emitted_samples += emitted_samples;
        }
        if vac.take_speech_end() {
            if let Some(mut done) = current.take() {
                done.end_secs = at;
                utterances.push(done);
            }
        }
    }

    if let Some(tail) = vac.drain_tail() {
        if let Some(open) = current.as_mut() {
            open.emitted_samples += tail.len();
        }
    }
    if vac.force_end() {
        if let Some(mut done) = current.take() {
            done.end_secs = samples.len() as f64 / f64::from(capture_rate);
            done.forced = true;
            utterances.push(done);
        }
    }
    vac.finish().map_err(|e| e.to_string())?;

    let snapshot = diagnostics.snapshot();
    if json {
        let report = serde_json::json!({
            "input": input.display().to_string(),
            "captureRate": capture_rate,
            "targetRate": config.target_rate,
            "utterances": utterances,
            "diagnostics": snapshot,
        });
        let text = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{text}");
        return Ok(());
    }

    println!(
        "{}: {} Hz → {} Hz, {} utterance(s)",
        input.display(),
        capture_rate,
        config.target_rate,
        utterances.len()
    );
    for (n, u) in utterances.iter().enumerate() {
        println!(
            "  #{:<3} {:>8.2}s – {:>8.2}s  {:>8} samples{}",
            n + 1,
            u.start_secs,
            u.end_secs,
            u.emitted_samples,
            if u.forced { "  (cut at end of file)" } else { "" }
        );
    }
    println!(
        "chunks in {}, emitted {}, suppressor reverts {}, stage faults {}",
        snapshot.chunks_in, snapshot.chunks_emitted, snapshot.suppression_reverted, snapshot.stage_faults
    );
    if let Some(path) = output {
        println!("emitted audio written to {}", path.display());
    }
    Ok(())
}
