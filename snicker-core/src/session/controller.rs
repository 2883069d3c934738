//! Session controller.
//!
//! Owns the lifecycle state, the event stream and the running capture
//! task. Every state change happens under one lock together with its
//! status event, so events are emitted in transition order and exactly
//! once per transition.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::frame::compositor::DEFAULT_FULLSCREEN;
use crate::frame::types::CompositeOutput;
use crate::frame::{FrameCompositor, FrameDecoder};
use crate::protocol::AdapterFactory;
use crate::session::capture::CaptureTask;
use crate::session::events::{EventReceiver, EventSender, SessionEvent, event_channel};
use crate::session::pairing::{DEFAULT_PAIR_TIMEOUT, FramePairer};
use crate::session::screenshot::{ScreenshotReceipt, ScreenshotSink};
use crate::session::state::{SessionFailure, SessionState};
use crate::session::stats::{SessionStats, StatsTracker};

// ── EngineOptions ────────────────────────────────────────────────

/// Tuning for the capture pipeline.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Longest a screen image waits for its peer.
    pub pair_timeout: Duration,
    /// Surface size for the fullscreen layouts.
    pub fullscreen: (u32, u32),
    /// Per-screen scale for the other layouts.
    pub scale: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pair_timeout: DEFAULT_PAIR_TIMEOUT,
            fullscreen: DEFAULT_FULLSCREEN,
            scale: 1.0,
        }
    }
}

// ── Shared state ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Inner {
    state: SessionState,
    latest: Option<Arc<CompositeOutput>>,
    task: Option<Running>,
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// State shared between the controller and its capture task.
#[derive(Debug)]
pub(crate) struct Shared {
    inner: Mutex<Inner>,
    events: EventSender,
    state_tx: watch::Sender<SessionState>,
    pub(crate) stats_tx: Arc<watch::Sender<SessionStats>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the state; on success mirror it and emit one status event.
    fn transition_locked(
        &self,
        inner: &mut Inner,
        f: impl FnOnce(&mut SessionState) -> Result<(), SessionError>,
    ) -> Result<(), SessionError> {
        f(&mut inner.state)?;
        if !inner.state.is_streaming() {
            inner.latest = None;
            self.events.clear_frame();
        }
        info!("session {}", inner.state);
        self.state_tx.send_replace(inner.state.clone());
        self.events.send(SessionEvent::Status(inner.state.clone()));
        Ok(())
    }

    fn transition(
        &self,
        f: impl FnOnce(&mut SessionState) -> Result<(), SessionError>,
    ) -> Result<(), SessionError> {
        let mut inner = self.lock();
        self.transition_locked(&mut inner, f)
    }

    pub(crate) fn mark_streaming(&self) -> bool {
        self.transition(SessionState::connected).is_ok()
    }

    pub(crate) fn mark_failed(&self, failure: SessionFailure) {
        if let Err(e) = self.transition(|s| s.fail(failure)) {
            debug!("failure not recorded: {e}");
        }
    }

    /// The device ended the stream: `Streaming → Stopping`.
    pub(crate) fn mark_ending(&self) -> bool {
        let mut inner = self.lock();
        if !inner.state.is_streaming() {
            return false;
        }
        self.transition_locked(&mut inner, SessionState::begin_stop)
            .is_ok()
    }

    /// `Stopping → Idle`, if still stopping.
    pub(crate) fn mark_stopped(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Stopping {
            let _ = self.transition_locked(&mut inner, SessionState::finish_stop);
        }
    }

    /// The capture task was cancelled. Finishes a `stop()` in progress;
    /// when the controller went away mid-session, stops outright.
    pub(crate) fn mark_cancelled(&self) {
        let mut inner = self.lock();
        if matches!(
            inner.state,
            SessionState::Connecting | SessionState::Streaming
        ) {
            let _ = self.transition_locked(&mut inner, SessionState::begin_stop);
        }
        if inner.state == SessionState::Stopping {
            let _ = self.transition_locked(&mut inner, SessionState::finish_stop);
        }
    }

    /// Publish a composite; ignored unless streaming.
    pub(crate) fn publish(&self, output: CompositeOutput) -> bool {
        let mut inner = self.lock();
        if !inner.state.is_streaming() {
            return false;
        }
        let output = Arc::new(output);
        inner.latest = Some(output.clone());
        self.events.send(SessionEvent::Frame(output));
        true
    }

    /// Emit a non-status event; ignored unless streaming.
    pub(crate) fn emit(&self, event: SessionEvent) -> bool {
        let inner = self.lock();
        if !inner.state.is_streaming() {
            return false;
        }
        self.events.send(event);
        true
    }
}

// ── SessionController ────────────────────────────────────────────

/// Runs at most one streaming session at a time.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use snicker_core::{DefaultAdapters, EngineOptions, PngDirectorySink, SessionConfig, SessionController};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let controller = SessionController::new(
///     Arc::new(DefaultAdapters::default()),
///     Arc::new(PngDirectorySink::default()),
///     EngineOptions::default(),
/// );
/// let mut events = controller.subscribe()?;
/// controller.start(&SessionConfig::default())?;
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionController {
    shared: Arc<Shared>,
    receiver: Mutex<Option<EventReceiver>>,
    factory: Arc<dyn AdapterFactory>,
    sink: Arc<dyn ScreenshotSink>,
    options: EngineOptions,
    state_rx: watch::Receiver<SessionState>,
    stats_rx: watch::Receiver<SessionStats>,
    /// Parent of every session's cancellation token.
    shutdown: CancellationToken,
}

impl SessionController {
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        sink: Arc<dyn ScreenshotSink>,
        options: EngineOptions,
    ) -> Self {
        let (events, receiver) = event_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (stats_tx, stats_rx) = watch::channel(SessionStats::default());
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                events,
                state_tx,
                stats_tx: Arc::new(stats_tx),
            }),
            receiver: Mutex::new(Some(receiver)),
            factory,
            sink,
            options,
            state_rx,
            stats_rx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Validate `config` and start a session.
    ///
    /// Returns once the capture task is spawned; `Streaming` or `Error`
    /// follows on the event stream. Must be called inside a tokio runtime.
    pub fn start(&self, config: &SessionConfig) -> Result<(), SessionError> {
        let config = config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let mut inner = self.shared.lock();
        self.shared
            .transition_locked(&mut inner, SessionState::begin_connect)?;

        let mut stats = StatsTracker::new(self.shared.stats_tx.clone());
        stats.reset();

        let cancel = self.shutdown.child_token();
        let task = CaptureTask {
            adapter: self.factory.create(&config),
            decoder: FrameDecoder::new(),
            compositor: FrameCompositor::new(self.options.fullscreen.0, self.options.fullscreen.1)
                .with_scale(self.options.scale),
            pairer: FramePairer::new(config.layout, self.options.pair_timeout),
            config,
            shared: self.shared.clone(),
            stats,
            cancel: cancel.clone(),
        };
        info!("starting session: {}", task.config);

        // A previous task that ended in Error has already released its adapter.
        if let Some(previous) = inner.task.take() {
            previous.cancel.cancel();
        }
        inner.task = Some(Running {
            cancel,
            handle: runtime.spawn(task.run()),
        });
        Ok(())
    }

    /// Stop the session and wait until the connection is released.
    ///
    /// No-op when idle. A call that finds the session already stopping
    /// waits for it to reach `Idle`.
    pub async fn stop(&self) {
        let running = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Idle => return,
                SessionState::Stopping => None,
                _ => {
                    if let Err(e) = self
                        .shared
                        .transition_locked(&mut inner, SessionState::begin_stop)
                    {
                        warn!("stop rejected: {e}");
                        return;
                    }
                    inner.task.take()
                }
            }
        };

        match running {
            Some(Running { cancel, handle }) => {
                cancel.cancel();
                if let Err(e) = handle.await {
                    warn!("capture task ended abnormally: {e}");
                }
                self.shared.mark_stopped();
            }
            None => {
                let mut rx = self.state_rx.clone();
                let _ = rx.wait_for(|s| *s != SessionState::Stopping).await;
            }
        }
    }

    /// Hand the latest composite to the screenshot sink.
    pub fn screenshot(&self) -> Result<ScreenshotReceipt, SessionError> {
        let latest = {
            let inner = self.shared.lock();
            if !inner.state.is_streaming() {
                return Err(SessionError::NotStreaming);
            }
            inner.latest.clone().ok_or(SessionError::NoFrameAvailable)?
        };
        Ok(self.sink.save(&latest)?)
    }

    /// Take the event receiver. Only the first call succeeds.
    pub fn subscribe(&self) -> Result<EventReceiver, SessionError> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SessionError::AlreadySubscribed)
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> watch::Receiver<SessionStats> {
        self.stats_rx.clone()
    }

    /// The most recent composite while streaming.
    pub fn latest_frame(&self) -> Option<Arc<CompositeOutput>> {
        self.shared.lock().latest.clone()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ── Tests ────────────────────────────────────────────────────────
