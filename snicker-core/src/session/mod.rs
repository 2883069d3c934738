//! # Streaming session engine
//!
//! ```text
//!  start(config) ──► SessionController ──spawn──► CaptureTask
//!                          │    ▲                      │
//!                   events │    │ state / latest frame │ adapter → decoder → pairer → compositor
//!                          ▼    └──────────────────────┘
//!                   EventReceiver (presentation layer)
//! ```
//!
//! | Module       | Purpose                                            |
//! |--------------|----------------------------------------------------|
//! | `state`      | Lifecycle state machine with validated transitions |
//! | `events`     | Bounded single-consumer event stream               |
//! | `pairing`    | Bounded top/bottom frame pairing                   |
//! | `stats`      | Counters and FPS published on a watch channel      |
//! | `screenshot` | Screenshot sink trait and the PNG directory sink   |
//! | `capture`    | The per-session capture task                       |
//! | `controller` | `SessionController` command surface                |

mod capture;
pub mod controller;
pub mod events;
pub mod pairing;
pub mod screenshot;
pub mod state;
pub mod stats;

pub use controller::{EngineOptions, SessionController};
pub use events::{
    DropReason, EVENT_CAPACITY, EventReceiver, EventSender, FrameDrop, STATUS_RESERVE, SessionEvent,
    event_channel,
};
pub use pairing::{DEFAULT_PAIR_TIMEOUT, FramePairer};
pub use screenshot::{PngDirectorySink, ScreenshotReceipt, ScreenshotSink};
pub use state::{SessionFailure, SessionState};
pub use stats::SessionStats;
