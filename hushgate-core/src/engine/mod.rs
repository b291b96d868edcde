//! `ListeningEngine`: the listening state machine for one named instance.
//!
//! ## Lifecycle
//!
//! ```text
//! ListeningEngine::new()
//!     └─► start_listening()   → Idle → Starting; stream opens in the background
//!         │                     → Listening, or → Idle with a reason on failure/timeout
//!         └─► stop_listening() → Idle; stream dropped, open utterance force-ended
//! ```
//!
//! Both toggles are idempotent and never block: calling one in a state where
//! it has nothing to do returns `false`. Stream setup and teardown happen on
//! blocking workers (see [`lifecycle`]), so a stop that arrives while a start
//! is still opening the device is honoured as soon as the open completes.
//!
//! ## Threading
//!
//! Each session owns its own voice activity controller, delivery queue and
//! diagnostics. The controller lives inside the capture callback; the queue
//! is the only thing shared between the callback and the consumer. Nothing
//! is reused across sessions, so a new session starts with empty pre-roll
//! even while the previous one is still draining. The recognizer is the one
//! exception; consumers take turns with it (see [`lifecycle`]).

pub mod consumer;
pub mod controller;
pub mod diagnostics;
pub mod lifecycle;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64},
    Arc,
};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use crate::{
    audio::CaptureBackend,
    buffering::queue::{delivery_queue, DEFAULT_QUEUE_CAPACITY},
    config::PipelineConfig,
    error::{GateError, Result},
    ipc::events::{ListeningStatus, ListeningStatusEvent, TranscriptEvent},
    recognizer::RecognizerHandle,
};

use self::{
    consumer::ConsumerContext,
    diagnostics::{DiagnosticsSnapshot, PipelineDiagnostics},
    lifecycle::{EngineState, SessionContext, SessionControl, Shared},
};

/// Broadcast channel capacity: 256 events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `ListeningEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub pipeline: PipelineConfig,
    /// Samples per captured chunk. Default: 1024.
    pub block_size: usize,
    /// Delivery queue capacity in items. Default: 100.
    pub queue_capacity: usize,
    /// Longest a stream open may take before the start is abandoned. Default: 5 s.
    pub start_timeout: Duration,
    /// Consumer poll interval on an empty queue. Default: 100 ms.
    pub poll_timeout: Duration,
    /// Index or name fragment of the input device. `None` for the default input.
    pub preferred_input_device: Option<String>,
    /// Write every emitted chunk of a session to this WAV file.
    pub record_path: Option<PathBuf>,
    /// Capture at the device's native rate instead of `pipeline.capture_rate`.
    /// Default: true.
    pub use_device_rate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            block_size: 1_024,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            start_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(100),
            preferred_input_device: None,
            record_path: None,
            use_device_rate: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        if self.block_size == 0 {
            return Err(GateError::Config("block_size must be > 0".into()));
        }
        if self.queue_capacity == 0 {
            return Err(GateError::Config("queue_capacity must be > 0".into()));
        }
        if self.start_timeout.is_zero() {
            return Err(GateError::Config("start_timeout must be > 0".into()));
        }
        Ok(())
    }
}

/// Listening state machine and stream lifecycle for one instance.
///
/// `ListeningEngine` is `Send + Sync`; wrap it in an `Arc` to drive it from
/// signal handlers and event-forwarding tasks at the same time.
pub struct ListeningEngine {
    instance: String,
    config: EngineConfig,
    backend: Arc<dyn CaptureBackend>,
    recognizer: RecognizerHandle,
    runtime: tokio::runtime::Handle,
    shared: Arc<Shared>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    /// Monotonically increasing transcript sequence counter, kept across sessions.
    seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for ListeningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListeningEngine")
            .field("instance", &self.instance)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ListeningEngine {
    /// Create an idle engine. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `GateError::Config` if `config` does not validate.
    /// - `GateError::Other` outside a Tokio runtime.
    pub fn new(
        instance: impl Into<String>,
        config: EngineConfig,
        backend: Arc<dyn CaptureBackend>,
        recognizer: RecognizerHandle,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| GateError::Other(anyhow::anyhow!("no tokio runtime: {e}")))?;
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            instance: instance.into(),
            config,
            backend,
            recognizer,
            runtime,
            shared: Arc::new(Shared::new(status_tx)),
            transcript_tx,
            seq: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Begin listening. Returns `false` (and does nothing) unless Idle.
    ///
    /// Returns as soon as the session is scheduled; watch `subscribe_status`
    /// for the outcome.
    pub fn start_listening(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.status != ListeningStatus::Idle {
            info!(instance = %self.instance, status = ?state.status, "start ignored");
            return false;
        }

        state.generation += 1;
        let generation = state.generation;
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        state.diagnostics = Arc::clone(&diagnostics);

        let (producer, queue) = delivery_queue(self.config.queue_capacity, Arc::clone(&diagnostics));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (open_tx, open_rx) = oneshot::channel();
        let active = Arc::new(AtomicBool::new(true));

        let consumer_ctx = ConsumerContext {
            queue,
            recognizer: self.recognizer.clone(),
            transcript_tx: self.transcript_tx.clone(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&diagnostics),
            poll_timeout: self.config.poll_timeout,
        };
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let previous = state.consumer_done.replace(done_rx);
        let consumer = self.runtime.spawn_blocking(move || {
            if let Some(previous) = previous {
                // Disconnects once the previous session's consumer has exited.
                let _ = previous.recv();
            }
            consumer::run(consumer_ctx);
            drop(done_tx);
        });

        let session_ctx = SessionContext {
            generation,
            config: self.config.clone(),
            backend: Arc::clone(&self.backend),
            diagnostics,
            producer,
            active: Arc::clone(&active),
            stop_rx,
            open_tx,
            shared: Arc::clone(&self.shared),
        };
        let worker = self
            .runtime
            .spawn_blocking(move || lifecycle::run_session(session_ctx));

        self.runtime.spawn(lifecycle::supervise_start(
            Arc::clone(&self.shared),
            generation,
            open_rx,
            self.config.start_timeout,
        ));

        state.session = Some(SessionControl {
            generation,
            active,
            stop_tx,
            worker,
            consumer,
        });
        state.status = ListeningStatus::Starting;
        state.last_error = None;
        self.shared.announce(ListeningStatus::Starting, None);
        info!(instance = %self.instance, generation, "listening session starting");
        true
    }

    /// Stop listening. Returns `false` (and does nothing) when already Idle.
    ///
    /// Safe while a start is in flight: the late stream is closed by its worker.
    /// The stopped session keeps draining in the background; `shutdown` waits for it.
    pub fn stop_listening(&self) -> bool {
        let mut state = self.shared.state.lock();
        match self.end_session(&mut state) {
            Some(session) => {
                state.retire(session);
                true
            }
            None => false,
        }
    }

    /// Stop listening and wait up to `timeout` for every session's workers to finish,
    /// including sessions stopped earlier that are still draining.
    ///
    /// Once this returns `true` every transcript of every session has been published.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let sessions = {
            let mut state = self.shared.state.lock();
            if let Some(session) = self.end_session(&mut state) {
                state.retire(session);
            }
            std::mem::take(&mut state.draining)
        };
        if sessions.is_empty() {
            return true;
        }

        let joined = tokio::time::timeout(timeout, async {
            for session in sessions {
                session.join().await;
            }
        })
        .await;
        if joined.is_err() {
            warn!(instance = %self.instance, ?timeout, "session workers did not finish in time");
        }
        joined.is_ok()
    }

    pub fn status(&self) -> ListeningStatus {
        self.shared.state.lock().status
    }

    /// Reason the last session failed, cleared when a new one starts.
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().last_error.clone()
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ListeningStatusEvent> {
        self.shared.status_tx.subscribe()
    }

    /// Snapshot of pipeline counters for the current (or last) session.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.shared.state.lock().diagnostics.snapshot()
    }

    fn end_session(&self, state: &mut EngineState) -> Option<SessionControl> {
        if state.status == ListeningStatus::Idle {
            return None;
        }
        state.status = ListeningStatus::Idle;
        self.shared.announce(ListeningStatus::Idle, None);
        info!(instance = %self.instance, generation = state.generation, "listening stopped");
        state.session.take()
    }
}

impl Drop for ListeningEngine {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
