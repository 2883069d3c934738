//! Top/bottom frame pairing.
//!
//! Layouts that show both screens compose once a fresh image of each is
//! available. A frame whose peer has not produced anything new waits at
//! most `timeout`; after that it is composed with the last known peer,
//! or with no peer at all so the compositor reports the missing screen.
//! Once a wait has expired the peer counts as stalled: later frames of
//! the live screen compose immediately until the peer sends again.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Layout;
use crate::frame::types::{DecodedImage, Screen};

pub const DEFAULT_PAIR_TIMEOUT: Duration = Duration::from_millis(100);

/// Whether an incoming frame should be decoded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// The layout never shows this screen.
    Unneeded,
    /// Not newer than the last frame of the same screen.
    Stale,
}

/// Images to hand to the compositor.
#[derive(Debug, Clone)]
pub struct Paired {
    pub top: Option<Arc<DecodedImage>>,
    pub bottom: Option<Arc<DecodedImage>>,
    /// The frame that triggered this composition.
    pub screen: Screen,
    pub sequence: u64,
}

#[derive(Debug)]
struct Slot {
    image: Arc<DecodedImage>,
    /// Not yet part of any composition.
    fresh: bool,
}

#[derive(Debug)]
pub struct FramePairer {
    layout: Layout,
    timeout: Duration,
    slots: [Option<Slot>; 2],
    last_sequence: [Option<u64>; 2],
    deadline: Option<Instant>,
    /// The screen whose peer gave up waiting for it.
    stalled: Option<Screen>,
    /// Sequence of a waiting frame replaced before it was composed.
    superseded: Option<u64>,
}

impl FramePairer {
    pub fn new(layout: Layout, timeout: Duration) -> Self {
        Self {
            layout,
            timeout,
            slots: [None, None],
            last_sequence: [None, None],
            deadline: None,
            stalled: None,
            superseded: None,
        }
    }

    pub fn admit(&self, screen: Screen, sequence: u64) -> Admission {
        if !self.layout.needs(screen) {
            return Admission::Unneeded;
        }
        match self.last_sequence[screen.index()] {
            Some(last) if sequence <= last => Admission::Stale,
            _ => Admission::Accept,
        }
    }

    /// When a waiting frame must be released, if one is waiting.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Store a decoded image; returns a pairing when one is complete.
    pub fn push(&mut self, image: DecodedImage, now: Instant) -> Option<Paired> {
        let screen = image.screen;
        let sequence = image.sequence;
        if self.stalled == Some(screen) {
            self.stalled = None;
        }
        let previous = self.slots[screen.index()].replace(Slot {
            image: Arc::new(image),
            fresh: true,
        });
        self.superseded = previous
            .filter(|slot| slot.fresh)
            .map(|slot| slot.image.sequence);
        self.last_sequence[screen.index()] = Some(sequence);

        let peer = screen.other();
        let peer_fresh = self.slots[peer.index()]
            .as_ref()
            .is_some_and(|slot| slot.fresh);
        if !self.layout.needs_both() || peer_fresh || self.stalled == Some(peer) {
            return Some(self.take(screen, sequence));
        }
        // A newer frame of the same screen keeps the first deadline.
        if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
        }
        None
    }

    /// Sequence of the waiting frame the last `push` replaced, if any.
    pub fn take_superseded(&mut self) -> Option<u64> {
        self.superseded.take()
    }

    /// Release the waiting frame once its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Option<Paired> {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return None,
        }
        let waiting = [Screen::Top, Screen::Bottom].into_iter().find(|s| {
            self.slots[s.index()]
                .as_ref()
                .is_some_and(|slot| slot.fresh)
        });
        match waiting {
            Some(screen) => {
                let sequence = self.last_sequence[screen.index()].unwrap_or_default();
                self.stalled = Some(screen.other());
                Some(self.take(screen, sequence))
            }
            None => {
                self.deadline = None;
                None
            }
        }
    }

    fn take(&mut self, screen: Screen, sequence: u64) -> Paired {
        self.deadline = None;
        for slot in self.slots.iter_mut().flatten() {
            slot.fresh = false;
        }
        let image = |s: Screen| {
            if self.layout.needs(s) {
                self.slots[s.index()].as_ref().map(|slot| slot.image.clone())
            } else {
                None
            }
        };
        Paired {
            top: image(Screen::Top),
            bottom: image(Screen::Bottom),
            screen,
            sequence,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
