//! Stream lifecycle: opening and closing the capture stream off the control path.
//!
//! ## Per session
//!
//! ```text
//! start_listening()          (returns immediately, status = Starting)
//!     ├─► spawn_blocking: run_session    opens the stream, owns it, drops it
//!     ├─► spawn_blocking: consumer::run  drains the session's delivery queue
//!     └─► spawn: supervise_start         waits ≤ start_timeout for the open result
//!                                        → Listening, or back to Idle with a reason
//! stop_listening()           (returns immediately, status = Idle)
//!     └─► signals run_session, which drops the stream and, if an utterance
//!         was open, enqueues a forced end-of-utterance; the session moves to
//!         the draining list until its workers finish
//! ```
//!
//! Every session carries a generation number. Results from a session that is
//! no longer current (stopped, timed out, superseded) are ignored, so a
//! stream that opens late is closed as soon as its worker notices.
//!
//! Each session gets its own [`PipelineDiagnostics`], so a stopped session
//! that is still draining never shares its in-speech flag or counters with
//! the session that replaced it. Consumers run one at a time: a new
//! session's consumer waits for the previous one to exit before it touches
//! the recognizer.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{
    recorder::WavTap, CaptureBackend, CaptureRequest, CaptureStream, ChunkSink,
};
use crate::buffering::{
    chunk::AudioChunk,
    queue::{DeliveryItem, DeliveryProducer},
};
use crate::engine::{
    controller::VoiceActivityController, diagnostics::PipelineDiagnostics, EngineConfig,
};
use crate::error::{GateError, Result};
use crate::ipc::events::{ListeningStatus, ListeningStatusEvent};

/// How often the session worker checks its stream for reported errors.
const HEALTH_POLL: Duration = Duration::from_millis(100);

/// How long teardown may wait for room in the queue for the forced marker.
const FORCED_EOU_TIMEOUT: Duration = Duration::from_millis(500);

// ── Shared state ─────────────────────────────────────────────────────────────

/// Control half of a running session, held by the engine.
pub(crate) struct SessionControl {
    pub generation: u64,
    /// Read by the capture callback; false means drop chunks on the floor.
    pub active: Arc<AtomicBool>,
    pub stop_tx: crossbeam_channel::Sender<()>,
    pub worker: JoinHandle<()>,
    pub consumer: JoinHandle<()>,
}

impl SessionControl {
    /// Ask the worker to close the stream. Does not wait.
    pub fn signal_stop(&self) {
        self.active.store(false, Ordering::Release);
        let _ = self.stop_tx.try_send(());
    }

    fn is_finished(&self) -> bool {
        self.worker.is_finished() && self.consumer.is_finished()
    }

    /// Wait for both workers of the session.
    pub async fn join(self) {
        let _ = self.worker.await;
        let _ = self.consumer.await;
    }
}

pub(crate) struct EngineState {
    pub status: ListeningStatus,
    pub generation: u64,
    pub session: Option<SessionControl>,
    /// Stopped sessions whose workers may still be publishing.
    pub draining: Vec<SessionControl>,
    /// Disconnects when the most recent consumer exits.
    pub consumer_done: Option<Receiver<()>>,
    /// Counters of the current (or last) session.
    pub diagnostics: Arc<PipelineDiagnostics>,
    pub last_error: Option<String>,
}

impl EngineState {
    /// Signal a stopped session and keep it until its workers finish.
    pub fn retire(&mut self, session: SessionControl) {
        session.signal_stop();
        self.draining.retain(|s| !s.is_finished());
        self.draining.push(session);
    }
}

/// State shared by the engine, its supervisors and its session workers.
///
/// Status events are sent while the state lock is held so subscribers see
/// transitions in the order they happened.
pub(crate) struct Shared {
    pub state: Mutex<EngineState>,
    pub status_tx: broadcast::Sender<ListeningStatusEvent>,
}

impl Shared {
    pub fn new(status_tx: broadcast::Sender<ListeningStatusEvent>) -> Self {
        Self {
            state: Mutex::new(EngineState {
                status: ListeningStatus::Idle,
                generation: 0,
                session: None,
                draining: Vec::new(),
                consumer_done: None,
                diagnostics: Arc::new(PipelineDiagnostics::default()),
                last_error: None,
            }),
            status_tx,
        }
    }

    pub fn announce(&self, status: ListeningStatus, detail: Option<String>) {
        let _ = self.status_tx.send(ListeningStatusEvent { status, detail });
    }

    /// Starting → Listening, if `generation` is still the current session.
    fn mark_listening(&self, generation: u64, sample_rate: u32) {
        let mut state = self.state.lock();
        let current = state.session.as_ref().map(|s| s.generation) == Some(generation);
        if !current || state.status != ListeningStatus::Starting {
            debug!(generation, "stream opened for a session that is no longer current");
            return;
        }
        state.status = ListeningStatus::Listening;
        self.announce(ListeningStatus::Listening, None);
        info!(generation, sample_rate, "listening");
    }

    /// Back to Idle because the current session could not start or lost its stream.
    fn session_failed(&self, generation: u64, error: &GateError) {
        let mut state = self.state.lock();
        let current = state.session.as_ref().map(|s| s.generation) == Some(generation);
        if !current {
            debug!(generation, "ignoring failure of a stale session: {error}");
            return;
        }
        state.status = ListeningStatus::Idle;
        state.last_error = Some(error.to_string());
        self.announce(ListeningStatus::Idle, Some(error.to_string()));
        if let Some(session) = state.session.take() {
            state.retire(session);
        }
        drop(state);
        warn!(
            generation,
            recoverable = error.is_recoverable(),
            "listening session failed: {error}"
        );
    }
}

// ── Supervisor ───────────────────────────────────────────────────────────────

/// Wait for the session worker to report the stream open, bounded by `timeout`.
pub(crate) async fn supervise_start(
    shared: Arc<Shared>,
    generation: u64,
    open_rx: oneshot::Receiver<Result<u32>>,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, open_rx).await {
        Ok(Ok(Ok(sample_rate))) => shared.mark_listening(generation, sample_rate),
        Ok(Ok(Err(e))) => shared.session_failed(generation, &e),
        Ok(Err(_)) => shared.session_failed(
            generation,
            &GateError::Other(anyhow::anyhow!("stream worker exited before reporting")),
        ),
        Err(_) => shared.session_failed(generation, &GateError::StreamStartTimeout { timeout }),
    }
}

// ── Session worker ───────────────────────────────────────────────────────────

/// All context a session worker needs, passed as one struct so the closure stays tidy.
pub(crate) struct SessionContext {
    pub generation: u64,
    pub config: EngineConfig,
    pub backend: Arc<dyn CaptureBackend>,
    pub diagnostics: Arc<PipelineDiagnostics>,
    pub producer: DeliveryProducer,
    pub active: Arc<AtomicBool>,
    pub stop_rx: Receiver<()>,
    pub open_tx: oneshot::Sender<Result<u32>>,
    pub shared: Arc<Shared>,
}

/// Blocking body of a session: open, hold, tear down.
///
/// The stream is created and dropped on this thread (`cpal::Stream` is `!Send`).
pub(crate) fn run_session(ctx: SessionContext) {
    let SessionContext {
        generation,
        config,
        backend,
        diagnostics,
        producer,
        active,
        stop_rx,
        open_tx,
        shared,
    } = ctx;

    let stream = match open_capture(&config, backend.as_ref(), &diagnostics, &producer, &active) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    if open_tx.send(Ok(stream.sample_rate())).is_err() {
        info!(generation, "start was abandoned before the stream opened; closing it");
        close(stream, &active, &producer, &diagnostics);
        return;
    }
    info!(
        generation,
        device = stream.device_name(),
        sample_rate = stream.sample_rate(),
        "capture stream open"
    );

    let failure = loop {
        match stop_rx.recv_timeout(HEALTH_POLL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break None,
            Err(RecvTimeoutError::Timeout) => {
                if let Some(e) = stream.take_error() {
                    break Some(e);
                }
            }
        }
    };

    close(stream, &active, &producer, &diagnostics);
    if let Some(e) = failure {
        shared.session_failed(generation, &e);
    }
    info!(generation, "capture stream closed");
}

fn open_capture(
    config: &EngineConfig,
    backend: &dyn CaptureBackend,
    diagnostics: &Arc<PipelineDiagnostics>,
    producer: &DeliveryProducer,
    active: &Arc<AtomicBool>,
) -> Result<Box<dyn CaptureStream>> {
    let device = config.preferred_input_device.as_deref();
    let mut pipeline = config.pipeline.clone();
    if config.use_device_rate {
        pipeline.capture_rate = backend.default_sample_rate(device)?;
    }

    let mut vac = VoiceActivityController::new(&pipeline, config.block_size, Arc::clone(diagnostics))?;
    if let Some(path) = &config.record_path {
        vac = vac.with_tap(WavTap::create(path, pipeline.target_rate)?);
    }

    let request = CaptureRequest {
        device: config.preferred_input_device.clone(),
        sample_rate: pipeline.capture_rate,
        block_size: config.block_size,
    };
    backend.open(&request, capture_sink(vac, producer.clone(), Arc::clone(active)))
}

/// The capture callback body: run the controller, try to enqueue, return.
pub fn capture_sink(
    mut vac: VoiceActivityController,
    producer: DeliveryProducer,
    active: Arc<AtomicBool>,
) -> ChunkSink {
    Box::new(move |raw: AudioChunk| {
        if !active.load(Ordering::Acquire) {
            return;
        }
        for chunk in vac.process(&raw) {
            producer.try_enqueue(DeliveryItem::Chunk(chunk));
        }
        if vac.take_speech_end() {
            producer.try_enqueue(DeliveryItem::EndOfUtterance);
        }
    })
}

/// Drop the stream, then close any utterance it left open.
///
/// Once the stream is gone no callback can run, so the controller's
/// `in_speech` flag is final and the marker lands after its last chunk.
/// `diagnostics` belongs to this session alone; a session started since
/// has its own.
fn close(
    stream: Box<dyn CaptureStream>,
    active: &AtomicBool,
    producer: &DeliveryProducer,
    diagnostics: &PipelineDiagnostics,
) {
    active.store(false, Ordering::Release);
    drop(stream);

    if diagnostics.in_speech.swap(false, Ordering::AcqRel) {
        diagnostics.utterances.fetch_add(1, Ordering::Relaxed);
        if producer.enqueue_timeout(DeliveryItem::EndOfUtterance, FORCED_EOU_TIMEOUT) {
            info!("forced end of utterance on stop");
        } else {
            warn!("could not deliver forced end of utterance");
        }
    }
}
