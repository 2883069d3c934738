//! Session statistics.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Frame intervals kept for the FPS average.
const FPS_WINDOW: usize = 60;

/// Snapshot published on the stats watch channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    /// Composites per second, averaged over the last intervals.
    pub fps: f64,
    /// Screen frames delivered by the adapter.
    pub frames_received: u64,
    /// Composites published to the event stream.
    pub frames_composited: u64,
    /// Delivered screen frames that never made it into a composite
    /// (stale, superseded, undecodable, unpaired).
    pub frames_dropped: u64,
    /// Device frames the adapter lost in transit before delivery.
    pub frames_discarded: u64,
    /// Payload bytes delivered by the adapter.
    pub bytes_received: u64,
}

/// Capture-task side of the stats channel.
#[derive(Debug)]
pub(crate) struct StatsTracker {
    tx: Arc<watch::Sender<SessionStats>>,
    intervals: VecDeque<Duration>,
    last_composite: Option<Instant>,
}

impl StatsTracker {
    pub(crate) fn new(tx: Arc<watch::Sender<SessionStats>>) -> Self {
        Self {
            tx,
            intervals: VecDeque::with_capacity(FPS_WINDOW),
            last_composite: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.intervals.clear();
        self.last_composite = None;
        self.tx.send_replace(SessionStats::default());
    }

    pub(crate) fn received(&self, bytes: usize) {
        self.tx.send_modify(|s| {
            s.frames_received += 1;
            s.bytes_received += bytes as u64;
        });
    }

    pub(crate) fn dropped(&self) {
        self.tx.send_modify(|s| s.frames_dropped += 1);
    }

    /// Mirror the adapter's running discard count.
    pub(crate) fn discarded(&self, total: u64) {
        self.tx.send_if_modified(|s| {
            let changed = s.frames_discarded != total;
            s.frames_discarded = total;
            changed
        });
    }

    pub(crate) fn composited(&mut self, now: Instant) {
        if let Some(last) = self.last_composite.replace(now) {
            if self.intervals.len() == FPS_WINDOW {
                self.intervals.pop_front();
            }
            self.intervals.push_back(now.duration_since(last));
        }
        let total: f64 = self.intervals.iter().map(Duration::as_secs_f64).sum();
        let fps = if total > 0.0 {
            self.intervals.len() as f64 / total
        } else {
            0.0
        };
        self.tx.send_modify(|s| {
            s.frames_composited += 1;
            s.fps = fps;
        });
    }
}
