//! Integration tests: session lifecycle, pairing, drops and screenshots
//! driven through a scripted adapter.

use std::future::pending;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::Rgba;
use snicker_core::{
    AdapterError, AdapterFactory, CaptureMethod, CompositeError, CompositeOutput, DropReason,
    EVENT_CAPACITY, EngineOptions, EventReceiver, Interpolation, Layout, PayloadFormat, ProtocolAdapter, RawFrame,
    Screen, ScreenshotError, ScreenshotReceipt, ScreenshotSink, SessionConfig, SessionController,
    SessionError, SessionEvent, SessionFailure, SessionState, SessionStats, ValidatedConfig,
};
use tokio::sync::mpsc;

type FrameResult = Result<RawFrame, AdapterError>;

// ── Scripted adapter ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectBehaviour {
    Succeed,
    Fail,
    Hang,
}

#[derive(Debug, Default)]
struct Tracker {
    created: AtomicUsize,
    closed: AtomicUsize,
    discarded: AtomicU64,
    last_target: Mutex<Option<(String, u16)>>,
}

struct ScriptedAdapter {
    method: CaptureMethod,
    connect: ConnectBehaviour,
    frames: Option<mpsc::UnboundedReceiver<FrameResult>>,
    tracker: Arc<Tracker>,
    closed: bool,
}

#[async_trait]
impl ProtocolAdapter for ScriptedAdapter {
    fn method(&self) -> CaptureMethod {
        self.method
    }

    async fn connect(&mut self, address: &str, port: u16) -> Result<(), AdapterError> {
        *self.tracker.last_target.lock().unwrap() = Some((address.to_string(), port));
        match self.connect {
            ConnectBehaviour::Succeed => Ok(()),
            ConnectBehaviour::Fail => Err(AdapterError::Connect {
                addr: format!("{address}:{port}"),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
            ConnectBehaviour::Hang => pending().await,
        }
    }

    async fn next_frame(&mut self) -> Result<RawFrame, AdapterError> {
        match self.frames.as_mut() {
            Some(rx) => match rx.recv().await {
                Some(result) => result,
                None => pending().await,
            },
            None => pending().await,
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tracker.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn discarded_frames(&self) -> u64 {
        self.tracker.discarded.load(Ordering::SeqCst)
    }
}

struct ScriptedFactory {
    tracker: Arc<Tracker>,
    connect: ConnectBehaviour,
    frames: Mutex<Option<mpsc::UnboundedReceiver<FrameResult>>>,
}

impl AdapterFactory for ScriptedFactory {
    fn create(&self, config: &ValidatedConfig) -> Box<dyn ProtocolAdapter> {
        self.tracker.created.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedAdapter {
            method: config.method,
            connect: self.connect,
            frames: self.frames.lock().unwrap().take(),
            tracker: self.tracker.clone(),
            closed: false,
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    saved: Mutex<Vec<u64>>,
}

impl ScreenshotSink for RecordingSink {
    fn save(&self, output: &CompositeOutput) -> Result<ScreenshotReceipt, ScreenshotError> {
        self.saved.lock().unwrap().push(output.sequence());
        Ok(ScreenshotReceipt {
            sequence: output.sequence(),
            paths: Vec::new(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────

struct Harness {
    controller: Arc<SessionController>,
    events: EventReceiver,
    frames: mpsc::UnboundedSender<FrameResult>,
    tracker: Arc<Tracker>,
    sink: Arc<RecordingSink>,
}

fn harness(connect: ConnectBehaviour, options: EngineOptions) -> Harness {
    let (tx, rx) = mpsc::unbounded_channel();
    let tracker = Arc::new(Tracker::default());
    let factory = Arc::new(ScriptedFactory {
        tracker: tracker.clone(),
        connect,
        frames: Mutex::new(Some(rx)),
    });
    let sink = Arc::new(RecordingSink::default());
    let controller = Arc::new(SessionController::new(factory, sink.clone(), options));
    let events = controller.subscribe().unwrap();
    Harness {
        controller,
        events,
        frames: tx,
        tracker,
        sink,
    }
}

fn config(layout: Layout) -> SessionConfig {
    SessionConfig {
        address: "10.0.0.5".into(),
        port: 8000,
        method: CaptureMethod::Ntr,
        quality: 90,
        layout,
        interpolation: Interpolation::Linear,
        auto_connect: false,
    }
}

/// A solid-colour landscape frame at the screen's native size.
fn solid(screen: Screen, sequence: u64, rgb: [u8; 3]) -> RawFrame {
    let (width, height) = screen.native_size();
    RawFrame {
        screen,
        sequence,
        format: PayloadFormat::Rgb8 { width, height },
        portrait: false,
        payload: rgb.repeat((width * height) as usize),
    }
}

/// A JPEG that ends right after its start marker.
fn truncated_jpeg(screen: Screen, sequence: u64) -> RawFrame {
    RawFrame {
        screen,
        sequence,
        format: PayloadFormat::Jpeg,
        portrait: true,
        payload: vec![0xFF, 0xD8, 0x00],
    }
}

async fn next_event(events: &mut EventReceiver) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

/// Collect events up to and including the first status matching `done`.
async fn until_status(
    events: &mut EventReceiver,
    done: impl Fn(&SessionState) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let finished = matches!(&event, SessionEvent::Status(s) if done(s));
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

async fn until_state(events: &mut EventReceiver, target: SessionState) -> Vec<SessionEvent> {
    until_status(events, |s| *s == target).await
}

async fn next_frame_event(events: &mut EventReceiver) -> Arc<CompositeOutput> {
    loop {
        if let SessionEvent::Frame(out) = next_event(events).await {
            return out;
        }
    }
}

/// Wait until the published stats satisfy `done`.
async fn stats_when(
    controller: &SessionController,
    done: impl FnMut(&SessionStats) -> bool,
) -> SessionStats {
    let mut rx = controller.stats();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(done))
        .await
        .expect("timed out waiting for stats")
        .expect("stats channel closed")
        .clone()
}

fn drain(events: &mut EventReceiver) -> Vec<SessionEvent> {
    std::iter::from_fn(|| events.try_recv()).collect()
}

fn count_status(events: &[SessionEvent], target: &SessionState) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Status(s) if s == target))
        .count()
}

fn count_frames(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Frame(_)))
        .count()
}

fn drops(events: &[SessionEvent]) -> Vec<(u64, DropReason)> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::FrameDropped(d) => Some((d.sequence, d.reason.clone())),
            _ => None,
        })
        .collect()
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn start_then_stop_returns_to_idle_and_releases_adapter() {
    for connect in [ConnectBehaviour::Succeed, ConnectBehaviour::Hang] {
        for layout in Layout::ALL {
            let mut h = harness(connect, EngineOptions::default());
            h.controller.start(&config(layout)).unwrap();
            h.controller.stop().await;

            assert_eq!(h.controller.state(), SessionState::Idle);
            assert_eq!(h.tracker.created.load(Ordering::SeqCst), 1);
            assert_eq!(h.tracker.closed.load(Ordering::SeqCst), 1, "{connect:?} {layout}");

            let events = drain(&mut h.events);
            assert_eq!(count_status(&events, &SessionState::Idle), 1);
            assert!(matches!(
                events.last(),
                Some(SessionEvent::Status(SessionState::Idle))
            ));
        }
    }
}

#[tokio::test]
async fn stop_after_streaming_waits_for_release() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::TopOnly)).unwrap();
    until_state(&mut h.events, SessionState::Streaming).await;

    h.controller.stop().await;
    assert_eq!(h.tracker.closed.load(Ordering::SeqCst), 1);
    let events = drain(&mut h.events);
    assert_eq!(count_status(&events, &SessionState::Stopping), 1);
    assert_eq!(count_status(&events, &SessionState::Idle), 1);

    // Stopping again is a no-op.
    h.controller.stop().await;
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn out_of_range_ports_are_rejected_without_io() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    for port in [0, 70_000] {
        let bad = SessionConfig {
            port,
            ..config(Layout::Vertical)
        };
        let err = h.controller.start(&bad).unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)), "{err}");
    }
    assert_eq!(h.tracker.created.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.state(), SessionState::Idle);
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_admit_exactly_one() {
    let h = harness(ConnectBehaviour::Hang, EngineOptions::default());
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let controller = h.controller.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                controller.start(&config(Layout::Vertical))
            })
        })
        .collect();

    let mut ok = 0;
    let mut busy = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(()) => ok += 1,
            Err(SessionError::SessionBusy) => busy += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, busy), (1, 1));
    assert_eq!(h.tracker.created.load(Ordering::SeqCst), 1);

    h.controller.stop().await;
    assert_eq!(h.controller.state(), SessionState::Idle);
}

#[tokio::test]
async fn start_while_streaming_is_busy() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::Vertical)).unwrap();
    until_state(&mut h.events, SessionState::Streaming).await;

    assert!(matches!(
        h.controller.start(&config(Layout::Vertical)),
        Err(SessionError::SessionBusy)
    ));
    assert_eq!(h.controller.state(), SessionState::Streaming);
    h.controller.stop().await;
}

#[tokio::test]
async fn concurrent_stops_both_wait_for_idle() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::TopOnly)).unwrap();
    until_state(&mut h.events, SessionState::Streaming).await;

    tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(h.controller.stop(), h.controller.stop()) },
    )
    .await
    .expect("both stops return");

    assert_eq!(h.controller.state(), SessionState::Idle);
    assert_eq!(h.tracker.closed.load(Ordering::SeqCst), 1);
    let events = drain(&mut h.events);
    assert_eq!(count_status(&events, &SessionState::Stopping), 1);
    assert_eq!(count_status(&events, &SessionState::Idle), 1);
}

#[tokio::test]
async fn dropping_the_controller_ends_the_session() {
    let Harness {
        controller,
        mut events,
        frames: _frames,
        tracker,
        ..
    } = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    controller.start(&config(Layout::Vertical)).unwrap();
    until_state(&mut events, SessionState::Streaming).await;

    drop(controller);

    let tail = until_state(&mut events, SessionState::Idle).await;
    assert!(matches!(
        tail.as_slice(),
        [
            SessionEvent::Status(SessionState::Stopping),
            SessionEvent::Status(SessionState::Idle),
        ]
    ));
    assert_eq!(tracker.closed.load(Ordering::SeqCst), 1);

    // The task is gone, and with it the last sender.
    let end = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event stream closes");
    assert!(end.is_none());
}

// ── Scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn vertical_session_composes_one_stacked_frame() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::Vertical)).unwrap();

    h.frames.send(Ok(solid(Screen::Top, 1, [255, 0, 0]))).unwrap();
    h.frames.send(Ok(solid(Screen::Bottom, 1, [0, 0, 255]))).unwrap();

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut h.events).await;
        let is_frame = matches!(event, SessionEvent::Frame(_));
        seen.push(event);
        if is_frame {
            break;
        }
    }
    assert!(matches!(
        seen.as_slice(),
        [
            SessionEvent::Status(SessionState::Connecting),
            SessionEvent::Status(SessionState::Streaming),
            SessionEvent::Frame(_),
        ]
    ));

    let SessionEvent::Frame(output) = &seen[2] else {
        unreachable!()
    };
    let CompositeOutput::Single(frame) = output.as_ref() else {
        panic!("expected a single surface");
    };
    assert_eq!((frame.width(), frame.height()), (400, 480));
    assert_eq!(frame.sequence, 1);
    assert_eq!(*frame.surface.get_pixel(200, 100), Rgba([255, 0, 0, 255]));
    assert_eq!(*frame.surface.get_pixel(200, 360), Rgba([0, 0, 255, 255]));
    // Narrower bottom screen is centred on black.
    assert_eq!(*frame.surface.get_pixel(10, 360), Rgba([0, 0, 0, 255]));
    assert_eq!(*frame.surface.get_pixel(390, 360), Rgba([0, 0, 0, 255]));

    assert_eq!(
        *h.tracker.last_target.lock().unwrap(),
        Some(("10.0.0.5".to_string(), 8000))
    );

    h.controller.stop().await;
    let after = drain(&mut h.events);
    assert_eq!(count_status(&after, &SessionState::Idle), 1);
    assert_eq!(count_frames(&after), 0);
    assert_eq!(count_status(&seen, &SessionState::Streaming), 1);

    // Nothing is published once stopped.
    let _ = h.frames.send(Ok(solid(Screen::Top, 2, [0, 255, 0])));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(drain(&mut h.events).is_empty());
    assert!(h.controller.latest_frame().is_none());
}

#[tokio::test]
async fn connect_failure_reports_error_and_allows_restart() {
    let mut h = harness(ConnectBehaviour::Fail, EngineOptions::default());
    h.controller.start(&config(Layout::Vertical)).unwrap();

    let events = until_status(&mut h.events, |s| s.failure().is_some()).await;
    assert!(matches!(
        events.as_slice(),
        [
            SessionEvent::Status(SessionState::Connecting),
            SessionEvent::Status(SessionState::Error(SessionFailure::Connection(_))),
        ]
    ));
    assert!(matches!(
        h.controller.screenshot(),
        Err(SessionError::NotStreaming)
    ));
    assert_eq!(h.tracker.closed.load(Ordering::SeqCst), 1);

    // No automatic retry; a new start is accepted.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.tracker.created.load(Ordering::SeqCst), 1);
    h.controller.start(&config(Layout::Vertical)).unwrap();
    until_status(&mut h.events, |s| s.failure().is_some()).await;
    assert_eq!(h.tracker.created.load(Ordering::SeqCst), 2);

    // Stopping from Error goes through Stopping to Idle.
    h.controller.stop().await;
    let events = drain(&mut h.events);
    assert_eq!(count_status(&events, &SessionState::Stopping), 1);
    assert_eq!(count_status(&events, &SessionState::Idle), 1);
    assert_eq!(count_frames(&events), 0);
}

#[tokio::test]
async fn device_ending_the_stream_returns_to_idle() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::TopOnly)).unwrap();
    until_state(&mut h.events, SessionState::Streaming).await;

    h.frames.send(Err(AdapterError::StreamEnded)).unwrap();
    let events = until_state(&mut h.events, SessionState::Idle).await;
    assert!(matches!(
        events.as_slice(),
        [
            SessionEvent::Status(SessionState::Stopping),
            SessionEvent::Status(SessionState::Idle),
        ]
    ));
    assert_eq!(h.tracker.closed.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.state(), SessionState::Idle);

    h.controller.stop().await;
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn transport_failure_moves_to_error() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::TopOnly)).unwrap();
    until_state(&mut h.events, SessionState::Streaming).await;

    h.frames
        .send(Err(AdapterError::IdleTimeout(Duration::from_secs(10))))
        .unwrap();
    let events = until_status(&mut h.events, |s| s.failure().is_some()).await;
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Status(SessionState::Error(SessionFailure::Transport(_))))
    ));
    assert_eq!(h.tracker.closed.load(Ordering::SeqCst), 1);
}

// ── Frame handling ───────────────────────────────────────────────

#[tokio::test]
async fn undecodable_frame_is_dropped_and_streaming_continues() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::TopOnly)).unwrap();

    h.frames.send(Ok(truncated_jpeg(Screen::Top, 1))).unwrap();
    h.frames.send(Ok(solid(Screen::Top, 2, [9, 9, 9]))).unwrap();

    let mut dropped = None;
    let frame = loop {
        match next_event(&mut h.events).await {
            SessionEvent::FrameDropped(d) => dropped = Some(d),
            SessionEvent::Frame(out) => break out,
            SessionEvent::Status(_) => {}
        }
    };
    let dropped = dropped.expect("a FrameDropped event");
    assert_eq!((dropped.screen, dropped.sequence), (Screen::Top, 1));
    assert!(matches!(dropped.reason, DropReason::Decode(_)));
    assert_eq!(frame.sequence(), 2);
    assert_eq!(h.controller.state(), SessionState::Streaming);

    let stats = stats_when(&h.controller, |s| s.frames_composited == 1).await;
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.frames_composited, 1);

    h.controller.stop().await;
}

#[tokio::test]
async fn unpaired_screen_is_reported_missing() {
    let options = EngineOptions {
        pair_timeout: Duration::from_millis(20),
        ..EngineOptions::default()
    };
    let mut h = harness(ConnectBehaviour::Succeed, options);
    h.controller.start(&config(Layout::Vertical)).unwrap();
    h.frames.send(Ok(solid(Screen::Top, 1, [1, 1, 1]))).unwrap();

    let dropped = loop {
        if let SessionEvent::FrameDropped(d) = next_event(&mut h.events).await {
            break d;
        }
    };
    assert_eq!((dropped.screen, dropped.sequence), (Screen::Top, 1));
    assert_eq!(
        dropped.reason,
        DropReason::Composite(CompositeError::MissingScreen(Screen::Bottom))
    );
    h.controller.stop().await;
}

#[tokio::test]
async fn separate_windows_reuse_last_known_peer() {
    let options = EngineOptions {
        pair_timeout: Duration::from_millis(20),
        ..EngineOptions::default()
    };
    let mut h = harness(ConnectBehaviour::Succeed, options);
    h.controller.start(&config(Layout::SeparateWindows)).unwrap();

    h.frames.send(Ok(solid(Screen::Top, 1, [1, 0, 0]))).unwrap();
    h.frames.send(Ok(solid(Screen::Bottom, 1, [0, 1, 0]))).unwrap();
    let first = next_frame_event(&mut h.events).await;

    // Only the top screen has new data.
    h.frames.send(Ok(solid(Screen::Top, 2, [2, 0, 0]))).unwrap();
    let second = next_frame_event(&mut h.events).await;

    for (output, top_seq) in [(&first, 1), (&second, 2)] {
        let CompositeOutput::Separate { top, bottom } = output.as_ref() else {
            panic!("separate windows must yield two surfaces");
        };
        assert_eq!(top.sequence, top_seq);
        assert_eq!(bottom.sequence, 1);
        assert_eq!((top.width(), top.height()), (400, 240));
        assert_eq!((bottom.width(), bottom.height()), (320, 240));
        assert_eq!(output.frames().len(), 2);
    }
    h.controller.stop().await;
}

#[tokio::test]
async fn stale_and_hidden_screens_are_not_composited() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::BottomOnly)).unwrap();

    h.frames.send(Ok(solid(Screen::Bottom, 5, [3, 3, 3]))).unwrap();
    h.frames.send(Ok(solid(Screen::Top, 6, [4, 4, 4]))).unwrap();
    h.frames.send(Ok(solid(Screen::Bottom, 4, [5, 5, 5]))).unwrap();
    h.frames.send(Ok(solid(Screen::Bottom, 7, [6, 6, 6]))).unwrap();

    let mut seen = Vec::new();
    loop {
        let event = next_event(&mut h.events).await;
        let done = matches!(&event, SessionEvent::Frame(out) if out.sequence() == 7);
        seen.push(event);
        if done {
            break;
        }
    }
    for event in &seen {
        if let SessionEvent::Frame(out) = event {
            assert!(matches!(out.sequence(), 5 | 7));
        }
    }

    let stats = stats_when(&h.controller, |s| s.frames_composited == 2).await;
    assert_eq!(stats.frames_received, 4);
    assert_eq!(stats.frames_dropped, 1);

    // The stale bottom frame is reported, the hidden top one is not.
    assert_eq!(drops(&seen), vec![(4, DropReason::Stale)]);
    h.controller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_bottom_screen_does_not_throttle_top() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::Vertical)).unwrap();
    h.frames.send(Ok(solid(Screen::Top, 1, [1, 1, 1]))).unwrap();
    h.frames.send(Ok(solid(Screen::Bottom, 1, [2, 2, 2]))).unwrap();
    next_frame_event(&mut h.events).await;

    // 50 top frames at 100 fps while the bottom screen stays silent.
    for seq in 2..=51 {
        h.frames.send(Ok(solid(Screen::Top, seq, [3, 3, 3]))).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Every frame is either composited or reported as superseded.
    let stats = stats_when(&h.controller, |s| {
        s.frames_composited + s.frames_dropped == 51
    })
    .await;
    assert!(
        stats.frames_composited >= 35,
        "only {} composites",
        stats.frames_composited
    );

    let latest = h.controller.latest_frame().expect("a composite");
    assert_eq!(latest.sequence(), 51);

    let events = drain(&mut h.events);
    let dropped = drops(&events);
    assert_eq!(dropped.len() as u64, stats.frames_dropped);
    assert!(dropped.iter().all(|(_, r)| *r == DropReason::Superseded));
    h.controller.stop().await;
}

#[tokio::test]
async fn undrained_event_queue_stays_bounded() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::TopOnly)).unwrap();

    for seq in 1..=500 {
        h.frames.send(Ok(truncated_jpeg(Screen::Top, seq))).unwrap();
    }
    stats_when(&h.controller, |s| s.frames_dropped == 500).await;
    assert!(h.events.len() <= EVENT_CAPACITY, "{} queued", h.events.len());

    // Status changes still get through the backlog.
    h.controller.stop().await;
    let events = drain(&mut h.events);
    assert!(events.len() <= EVENT_CAPACITY);
    assert_eq!(count_status(&events, &SessionState::Stopping), 1);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Status(SessionState::Idle))
    ));
}

#[tokio::test]
async fn adapter_discards_show_up_in_stats() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::TopOnly)).unwrap();
    until_state(&mut h.events, SessionState::Streaming).await;

    h.tracker.discarded.store(3, Ordering::SeqCst);
    h.frames.send(Ok(solid(Screen::Top, 1, [5, 5, 5]))).unwrap();
    let stats = stats_when(&h.controller, |s| s.frames_composited == 1).await;
    assert_eq!(stats.frames_discarded, 3);
    assert_eq!(stats.frames_dropped, 0);
    h.controller.stop().await;
}

// ── Screenshots ──────────────────────────────────────────────────

#[tokio::test]
async fn screenshot_hands_latest_frame_to_sink_once() {
    let mut h = harness(ConnectBehaviour::Succeed, EngineOptions::default());
    h.controller.start(&config(Layout::TopOnly)).unwrap();
    until_state(&mut h.events, SessionState::Streaming).await;

    assert!(matches!(
        h.controller.screenshot(),
        Err(SessionError::NoFrameAvailable)
    ));

    h.frames.send(Ok(solid(Screen::Top, 3, [7, 7, 7]))).unwrap();
    next_frame_event(&mut h.events).await;

    let receipt = h.controller.screenshot().unwrap();
    assert_eq!(receipt.sequence, 3);
    assert_eq!(*h.sink.saved.lock().unwrap(), vec![3]);

    h.controller.stop().await;
    assert!(matches!(
        h.controller.screenshot(),
        Err(SessionError::NotStreaming)
    ));
    assert_eq!(h.sink.saved.lock().unwrap().len(), 1);
}
