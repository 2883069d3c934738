//! # snicker-core
//!
//! Streaming session engine for a Nintendo 3DS screen-streaming client.
//!
//! This crate contains:
//! - **Config**: `SessionConfig` validation and the JSON/TOML `ConfigStore`
//! - **Protocol**: `ProtocolAdapter` with the NTR CFW and HzMod variants
//! - **Frame**: `FrameDecoder` (JPEG / TGA / raw RGB) and `FrameCompositor` (layouts, interpolation)
//! - **Session**: `SessionController`, its state machine, event stream, stats and screenshots
//! - **Error**: typed, `thiserror`-based error hierarchy

pub mod config;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod session;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::{
    CaptureMethod, ConfigStore, DocumentFormat, FileConfigStore, Interpolation, Layout,
    SessionConfig, ValidatedConfig,
};
pub use error::{
    AdapterError, CompositeError, ConfigError, DecodeError, ScreenshotError, SessionError,
};
pub use frame::{
    CompositeFrame, CompositeOutput, DecodedImage, FrameCompositor, FrameDecoder, PayloadFormat,
    RawFrame, Screen,
};
pub use protocol::{
    AdapterFactory, AdapterOptions, DefaultAdapters, HzModAdapter, HzModOptions, NtrAdapter,
    NtrOptions, ProtocolAdapter,
};
pub use session::{
    DropReason, EVENT_CAPACITY, EngineOptions, EventReceiver, FrameDrop, PngDirectorySink,
    ScreenshotReceipt, ScreenshotSink, SessionController, SessionEvent, SessionFailure,
    SessionState, SessionStats,
};
