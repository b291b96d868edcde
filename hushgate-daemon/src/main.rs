//! hushgate daemon entry point.
//!
//! ```text
//! hushgate [settings.json] [--instance <name>] [--listen] [--list-devices]
//! ```
//!
//! Control is by signal: SIGUSR1 begins listening, SIGUSR2 stops, SIGINT or
//! SIGTERM shuts down after closing any open utterance. Final transcripts go
//! to stdout one per line; everything else is logged to stderr.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hushgate_core::{
    audio::device::list_input_devices, CpalBackend, ListeningEngine, RecognizerHandle,
    SegmentKind, StubRecognizer,
};
use settings::{default_settings_path, load_or_init_settings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// How long shutdown waits for the last transcripts to be published.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct Args {
    settings_path: Option<PathBuf>,
    instance: String,
    listen: bool,
    list_devices: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut settings_path: Option<PathBuf> = None;
    let mut instance = "default".to_string();
    let mut listen = false;
    let mut list_devices = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--instance" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --instance".into());
                };
                instance = v;
            }
            "--listen" => listen = true,
            "--list-devices" => list_devices = true,
            "--help" | "-h" => {
                println!(
                    "Usage: hushgate [settings.json] [--instance <name>] [--listen] [--list-devices]\n\
                     Signals: SIGUSR1 start listening, SIGUSR2 stop, SIGINT/SIGTERM quit"
                );
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {other}"));
            }
            other => settings_path = Some(PathBuf::from(other)),
        }
    }

    Ok(Args {
        settings_path,
        instance,
        listen,
        list_devices,
    })
}

#[tokio::main]
async fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hushgate=info,hushgate_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        error!("hushgate failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = parse_args().map_err(anyhow::Error::msg)?;

    if args.list_devices {
        for device in list_input_devices() {
            println!("{}", serde_json::to_string(&device)?);
        }
        return Ok(());
    }

    let settings_path = args
        .settings_path
        .unwrap_or_else(|| default_settings_path(&args.instance));
    let mut settings = load_or_init_settings(&settings_path);
    settings.apply_env_overrides();
    info!(
        instance = %args.instance,
        settings_path = %settings_path.display(),
        device = ?settings.preferred_input_device,
        threshold = settings.pipeline.silence_threshold_rms,
        record = ?settings.record_path,
        "settings loaded"
    );

    let engine = Arc::new(ListeningEngine::new(
        args.instance.clone(),
        settings.engine_config(),
        Arc::new(CpalBackend),
        RecognizerHandle::new(StubRecognizer::new()),
    )?);

    let printer = spawn_transcript_printer(&engine);
    spawn_status_logger(&engine);

    if args.listen || settings.listen_on_start {
        engine.start_listening();
    }

    wait_for_signals(&engine).await?;

    info!("shutting down");
    if !engine.shutdown(SHUTDOWN_GRACE).await {
        warn!("session did not finish cleanly");
    }
    let snapshot = engine.diagnostics_snapshot();
    info!(
        utterances = snapshot.utterances,
        queue_dropped = snapshot.queue_dropped,
        suppression_reverted = snapshot.suppression_reverted,
        "hushgate stopped"
    );

    // Closing the transcript channel lets the printer finish what is queued.
    drop(engine);
    if tokio::time::timeout(SHUTDOWN_GRACE, printer).await.is_err() {
        warn!("transcript printer did not finish");
    }
    Ok(())
}

fn spawn_transcript_printer(engine: &ListeningEngine) -> tokio::task::JoinHandle<()> {
    let mut rx = engine.subscribe_transcripts();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    for segment in event.segments {
                        if segment.kind == SegmentKind::Final && !segment.text.is_empty() {
                            println!("{}", segment.text);
                        }
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "transcript printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_status_logger(engine: &ListeningEngine) {
    let mut rx = engine.subscribe_status();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match event.detail {
                    Some(detail) => warn!(status = ?event.status, %detail, "status changed"),
                    None => info!(status = ?event.status, "status changed"),
                },
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_signals(engine: &ListeningEngine) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut begin = signal(SignalKind::user_defined1())?;
    let mut end = signal(SignalKind::user_defined2())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    info!(pid = std::process::id(), "ready: SIGUSR1 to listen, SIGUSR2 to stop");

    loop {
        tokio::select! {
            _ = begin.recv() => {
                if !engine.start_listening() {
                    info!(status = ?engine.status(), "already listening");
                }
            }
            _ = end.recv() => {
                if !engine.stop_listening() {
                    info!("not listening");
                }
            }
            _ = interrupt.recv() => return Ok(()),
            _ = terminate.recv() => return Ok(()),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(engine: &ListeningEngine) -> anyhow::Result<()> {
    // No user signals here: listen until Ctrl+C.
    engine.start_listening();
    tokio::signal::ctrl_c().await?;
    Ok(())
}
