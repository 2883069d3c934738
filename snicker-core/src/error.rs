//! Domain-specific error types for the streaming engine.
//!
//! Every fallible operation returns one of the typed enums below.
//! Invalid input never panics; it surfaces as one of these values.

use std::time::Duration;

use thiserror::Error;

use crate::frame::types::Screen;

// ── ConfigError ──────────────────────────────────────────────────

/// Pre-flight validation and persistence failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The device address is empty or whitespace only.
    #[error("device address must not be empty")]
    EmptyAddress,

    /// The port is outside `1..=65535`.
    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u32),

    /// The quality is outside `10..=100`.
    #[error("quality must be between 10 and 100, got {0}")]
    InvalidQuality(u32),

    /// A textual enum value (method, layout, interpolation) is unknown.
    #[error("unknown {kind} {value:?}")]
    UnknownValue { kind: &'static str, value: String },

    /// The configuration document could not be read or written.
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration document is not a flat key-value map.
    #[error("malformed config document: {0}")]
    Malformed(String),
}

// ── AdapterError ─────────────────────────────────────────────────

/// Failures raised by a capture-protocol adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    // ── Connection Errors ────────────────────────────────────────
    /// The device address did not resolve to any socket address.
    #[error("cannot resolve {0}")]
    Resolve(String),

    /// TCP/UDP setup towards the device failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection attempt exceeded its deadline.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    // ── Transport Errors ─────────────────────────────────────────
    /// The established connection reported an I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// No data arrived from the device within the idle window.
    #[error("no data from device for {0:?}")]
    IdleTimeout(Duration),

    /// The device sent bytes that violate the capture protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// `next_frame` was called before a successful `connect`.
    #[error("adapter is not connected")]
    NotConnected,

    // ── Termination ──────────────────────────────────────────────
    /// The device closed the stream. Not an error state for the session.
    #[error("stream ended by device")]
    StreamEnded,
}

impl AdapterError {
    /// `true` for the normal end-of-stream signal.
    pub fn is_stream_end(&self) -> bool {
        matches!(self, AdapterError::StreamEnded)
    }
}

// ── DecodeError ──────────────────────────────────────────────────

/// A single frame payload could not be turned into an image.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The image codec rejected the payload.
    #[error("malformed {format} payload: {reason}")]
    Malformed { format: &'static str, reason: String },

    /// A raw buffer does not match its declared geometry.
    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The decoded geometry is zero or unreasonably large.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

// ── CompositeError ───────────────────────────────────────────────

/// Compositing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositeError {
    /// The layout needs a screen whose image has not arrived yet.
    #[error("missing {0} screen image")]
    MissingScreen(Screen),
}

// ── ScreenshotError ──────────────────────────────────────────────

/// Failures reported by a [`ScreenshotSink`](crate::session::ScreenshotSink).
#[derive(Debug, Error)]
pub enum ScreenshotError {
    /// The destination could not be written.
    #[error("screenshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image encoder failed.
    #[error("screenshot encoding failed: {0}")]
    Encode(String),
}

impl From<image::ImageError> for ScreenshotError {
    fn from(e: image::ImageError) -> Self {
        ScreenshotError::Encode(e.to_string())
    }
}

// ── SessionError ─────────────────────────────────────────────────

/// Errors returned synchronously by the session command surface.
///
/// Connection-level failures are never returned here: they arrive
/// asynchronously as an `Error` status on the event stream.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configuration failed validation; nothing was started.
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// A session is already connecting, streaming or stopping.
    #[error("a session is already active")]
    SessionBusy,

    /// The command requires a streaming session.
    #[error("not streaming")]
    NotStreaming,

    /// Streaming, but no composite frame has been produced yet.
    #[error("no frame available yet")]
    NoFrameAvailable,

    /// The single event receiver has already been handed out.
    #[error("event stream already subscribed")]
    AlreadySubscribed,

    /// `start` was called outside a Tokio runtime.
    #[error("no tokio runtime available to run the capture task")]
    NoRuntime,

    /// The screenshot sink failed.
    #[error(transparent)]
    Screenshot(#[from] ScreenshotError),

    /// A state transition was attempted from the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = ConfigError::InvalidPort(70000);
        assert!(e.to_string().contains("70000"));

        let e = DecodeError::LengthMismatch {
            expected: 1000,
            actual: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = CompositeError::MissingScreen(Screen::Bottom);
        assert_eq!(e.to_string(), "missing bottom screen image");
    }

    #[test]
    fn config_error_converts_into_session_error() {
        let e: SessionError = ConfigError::EmptyAddress.into();
        assert!(matches!(e, SessionError::InvalidConfig(ConfigError::EmptyAddress)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: AdapterError = io_err.into();
        assert!(matches!(e, AdapterError::Transport(_)));
        assert!(!e.is_stream_end());
        assert!(AdapterError::StreamEnded.is_stream_end());
    }
}
