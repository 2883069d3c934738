//! Capture task.
//!
//! One per session: connect, then `next_frame → decode → pair → compose
//! → publish` until the device ends the stream, the transport fails or
//! the session is cancelled. The adapter is closed on every exit path.
//!
//! Every delivered frame that does not end up in a composite is counted
//! in `frames_dropped` and reported as a `FrameDropped` event. Frames
//! the adapter lost before delivery only show up as `frames_discarded`.

use std::future::pending;
use std::sync::Arc;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ValidatedConfig;
use crate::error::AdapterError;
use crate::frame::types::RawFrame;
use crate::frame::{FrameCompositor, FrameDecoder};
use crate::protocol::ProtocolAdapter;
use crate::session::controller::Shared;
use crate::session::events::{DropReason, FrameDrop, SessionEvent};
use crate::session::pairing::{Admission, FramePairer, Paired};
use crate::session::state::SessionFailure;
use crate::session::stats::StatsTracker;

enum Step {
    Cancelled,
    PairDeadline,
    Frame(Result<RawFrame, AdapterError>),
}

pub(crate) struct CaptureTask {
    pub(crate) config: ValidatedConfig,
    pub(crate) adapter: Box<dyn ProtocolAdapter>,
    pub(crate) decoder: FrameDecoder,
    pub(crate) compositor: FrameCompositor,
    pub(crate) pairer: FramePairer,
    pub(crate) shared: Arc<Shared>,
    pub(crate) stats: StatsTracker,
    pub(crate) cancel: CancellationToken,
}

impl CaptureTask {
    pub(crate) async fn run(mut self) {
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.adapter.connect(&self.config.address, self.config.port) => Some(result),
        };

        match connected {
            None => {
                debug!("cancelled while connecting");
                self.adapter.close().await;
                self.shared.mark_cancelled();
                return;
            }
            Some(Err(e)) => {
                warn!("connection to {}:{} failed: {e}", self.config.address, self.config.port);
                self.adapter.close().await;
                self.shared.mark_failed(SessionFailure::Connection(e.to_string()));
                return;
            }
            Some(Ok(())) => {}
        }

        if !self.shared.mark_streaming() {
            // stop() won the race.
            self.adapter.close().await;
            self.shared.mark_stopped();
            return;
        }

        loop {
            let deadline = self.pairer.deadline();
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                _ = wait_until(deadline) => Step::PairDeadline,
                result = self.adapter.next_frame() => Step::Frame(result),
            };

            match step {
                Step::Cancelled => {
                    debug!("capture cancelled");
                    self.adapter.close().await;
                    self.shared.mark_cancelled();
                    return;
                }
                Step::PairDeadline => {
                    if let Some(pair) = self.pairer.expire(Instant::now()) {
                        self.compose(pair);
                    }
                }
                Step::Frame(Ok(raw)) => {
                    self.stats.discarded(self.adapter.discarded_frames());
                    self.handle_frame(raw);
                }
                Step::Frame(Err(e)) if e.is_stream_end() => {
                    info!("device ended the stream");
                    let ending = self.shared.mark_ending();
                    self.adapter.close().await;
                    if ending {
                        self.shared.mark_stopped();
                    }
                    return;
                }
                Step::Frame(Err(e)) => {
                    warn!("stream broke: {e}");
                    self.adapter.close().await;
                    self.shared.mark_failed(SessionFailure::Transport(e.to_string()));
                    return;
                }
            }
        }
    }

    fn handle_frame(&mut self, raw: RawFrame) {
        self.stats.received(raw.payload.len());
        let (screen, sequence) = (raw.screen, raw.sequence);

        match self.pairer.admit(screen, sequence) {
            Admission::Accept => {}
            Admission::Unneeded => {
                trace!(%screen, sequence, "screen not shown in this layout");
                return;
            }
            Admission::Stale => {
                debug!(%screen, sequence, "dropping stale frame");
                self.drop_frame(FrameDrop::new(screen, sequence, DropReason::Stale));
                return;
            }
        }

        let image = match self.decoder.decode(raw, self.config.quality) {
            Ok(image) => image,
            Err(e) => {
                debug!(%screen, sequence, "dropping frame: {e}");
                self.drop_frame(FrameDrop::new(
                    screen,
                    sequence,
                    DropReason::Decode(e.to_string()),
                ));
                return;
            }
        };

        let paired = self.pairer.push(image, Instant::now());
        if let Some(replaced) = self.pairer.take_superseded() {
            trace!(%screen, sequence = replaced, "waiting frame superseded");
            self.drop_frame(FrameDrop::new(screen, replaced, DropReason::Superseded));
        }
        if let Some(pair) = paired {
            self.compose(pair);
        }
    }

    fn compose(&mut self, pair: Paired) {
        let result = self.compositor.compose(
            pair.top.as_deref(),
            pair.bottom.as_deref(),
            self.config.layout,
            self.config.interpolation,
        );
        match result {
            Ok(output) => {
                if self.shared.publish(output) {
                    self.stats.composited(Instant::now());
                }
            }
            Err(e) => {
                debug!(screen = %pair.screen, sequence = pair.sequence, "dropping frame: {e}");
                self.drop_frame(FrameDrop::new(
                    pair.screen,
                    pair.sequence,
                    DropReason::Composite(e),
                ));
            }
        }
    }

    fn drop_frame(&mut self, dropped: FrameDrop) {
        self.stats.dropped();
        self.shared.emit(SessionEvent::FrameDropped(dropped));
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
