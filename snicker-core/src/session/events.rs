//! Session event stream.
//!
//! Single-consumer stream from the session to the presentation layer,
//! built from two channels:
//!
//! - the latest composite sits in a `watch`, so a slow consumer always
//!   sees the freshest frame and never a backlog of old ones;
//! - status and drop notices go through a bounded `mpsc` of
//!   [`EVENT_CAPACITY`] entries.
//!
//! Drop notices never take the last [`STATUS_RESERVE`] slots. While the
//! queue is that full, drops are folded into a counter and reported on
//! the next drop notice that fits (`FrameDrop::folded`). The queue
//! therefore stays bounded however far the consumer falls behind, and
//! status changes still get through.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{trace, warn};

use crate::error::CompositeError;
use crate::frame::types::{CompositeOutput, Screen};
use crate::session::state::SessionState;

/// Most status and drop notices queued for the consumer.
pub const EVENT_CAPACITY: usize = 64;

/// Queue slots drop notices leave free for status events.
pub const STATUS_RESERVE: usize = 16;

// ── SessionEvent ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session entered a new state.
    Status(SessionState),
    /// A new composite is ready.
    Frame(Arc<CompositeOutput>),
    /// A screen frame was discarded; streaming continues.
    FrameDropped(FrameDrop),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameDrop {
    pub screen: Screen,
    pub sequence: u64,
    pub reason: DropReason,
    /// Earlier drops folded into this notice while the queue was full.
    pub folded: u64,
}

impl FrameDrop {
    pub fn new(screen: Screen, sequence: u64, reason: DropReason) -> Self {
        Self {
            screen,
            sequence,
            reason,
            folded: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Not newer than a frame already accepted for the same screen.
    Stale,
    /// A newer frame of the same screen replaced it while it waited for
    /// its peer.
    Superseded,
    /// The payload could not be decoded.
    Decode(String),
    /// The compositor rejected the pairing.
    Composite(CompositeError),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale => write!(f, "stale sequence"),
            Self::Superseded => write!(f, "superseded while waiting for its peer"),
            Self::Decode(reason) => write!(f, "decode failed: {reason}"),
            Self::Composite(e) => write!(f, "{e}"),
        }
    }
}

// ── Channel ──────────────────────────────────────────────────────

type FrameSlot = Option<Arc<CompositeOutput>>;

/// Create a connected sender/receiver pair.
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (notices_tx, notices_rx) = mpsc::channel(EVENT_CAPACITY);
    let (frames_tx, frames_rx) = watch::channel(None);
    (
        EventSender {
            notices: notices_tx,
            frames: Arc::new(frames_tx),
            folded: Arc::new(AtomicU64::new(0)),
        },
        EventReceiver {
            notices: notices_rx,
            frames: frames_rx,
        },
    )
}

/// Producer half. Clones share the stream; it closes when the last drops.
/// Never blocks, so it is safe to use under a lock.
#[derive(Debug, Clone)]
pub struct EventSender {
    notices: mpsc::Sender<SessionEvent>,
    frames: Arc<watch::Sender<FrameSlot>>,
    folded: Arc<AtomicU64>,
}

impl EventSender {
    /// Publish an event. Returns `false` when it was not queued as an
    /// entry of its own: a drop folded into a later notice, a status lost
    /// to a full queue, or a receiver that is gone.
    pub fn send(&self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Frame(output) => {
                self.frames.send_replace(Some(output));
                !self.frames.is_closed()
            }
            SessionEvent::Status(_) => match self.notices.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(event)) => {
                    warn!("event queue full; lost {event:?}");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            },
            SessionEvent::FrameDropped(dropped) => self.send_drop(dropped),
        }
    }

    fn send_drop(&self, mut dropped: FrameDrop) -> bool {
        if self.notices.capacity() <= STATUS_RESERVE {
            self.fold(&dropped);
            return false;
        }
        dropped.folded += self.folded.swap(0, Ordering::Relaxed);
        match self.notices.try_send(SessionEvent::FrameDropped(dropped)) {
            Ok(()) => true,
            Err(TrySendError::Full(SessionEvent::FrameDropped(dropped))) => {
                self.fold(&dropped);
                false
            }
            Err(_) => false,
        }
    }

    fn fold(&self, dropped: &FrameDrop) {
        trace!(screen = %dropped.screen, sequence = dropped.sequence, "folding drop notice");
        self.folded.fetch_add(1 + dropped.folded, Ordering::Relaxed);
    }

    /// Withdraw a composite the consumer has not picked up yet.
    pub fn clear_frame(&self) {
        self.frames.send_if_modified(|slot| slot.take().is_some());
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct EventReceiver {
    notices: mpsc::Receiver<SessionEvent>,
    frames: watch::Receiver<FrameSlot>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every sender is gone and the
    /// queue is drained. Queued notices come before the latest frame.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            tokio::select! {
                biased;
                notice = self.notices.recv() => return notice,
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        return self.notices.recv().await;
                    }
                    if let Some(frame) = self.frames.borrow_and_update().clone() {
                        return Some(SessionEvent::Frame(frame));
                    }
                }
            }
        }
    }

    /// Take the next event without waiting.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        if let Ok(event) = self.notices.try_recv() {
            return Some(event);
        }
        if self.frames.has_changed().unwrap_or(false) {
            return self
                .frames
                .borrow_and_update()
                .clone()
                .map(SessionEvent::Frame);
        }
        None
    }

    /// Events currently waiting.
    pub fn len(&self) -> usize {
        let frame_pending =
            self.frames.has_changed().unwrap_or(false) && self.frames.borrow().is_some();
        self.notices.len() + usize::from(frame_pending)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ────────────────────────────────────────────────────────
