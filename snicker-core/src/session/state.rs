//! Session lifecycle state machine.
//!
//! Transitions are validated and return `Result` instead of panicking;
//! the controller applies them under its lock and emits one status
//! event per successful transition.

use std::fmt;

use crate::error::SessionError;

/// Why a session ended up in [`SessionState::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// The device could not be reached or refused the stream.
    Connection(String),
    /// The stream broke after it was established.
    Transport(String),
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

// ── SessionState ─────────────────────────────────────────────────

/// ```text
///   Idle ──► Connecting ──► Streaming ──► Stopping ──► Idle
///    ▲            │              │            ▲
///    │            └──► Error ◄───┘            │
///    └─── start ────────┘  └──── stop ────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Error(SessionFailure),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Error(failure) => write!(f, "Error ({failure})"),
        }
    }
}

impl SessionState {
    /// A capture pipeline may be running.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming | Self::Stopping)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            Self::Error(failure) => Some(failure),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`, `Error`.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        match self {
            Self::Idle | Self::Error(_) => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(SessionError::SessionBusy),
        }
    }

    /// Valid from: `Connecting`.
    pub fn connected(&mut self) -> Result<(), SessionError> {
        match self {
            Self::Connecting => {
                *self = Self::Streaming;
                Ok(())
            }
            _ => Err(SessionError::InvalidTransition(
                "cannot stream: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`, `Streaming`.
    pub fn fail(&mut self, failure: SessionFailure) -> Result<(), SessionError> {
        match self {
            Self::Connecting | Self::Streaming => {
                *self = Self::Error(failure);
                Ok(())
            }
            _ => Err(SessionError::InvalidTransition(
                "cannot fail: no connection in progress",
            )),
        }
    }

    /// Valid from: `Connecting`, `Streaming`, `Error`.
    pub fn begin_stop(&mut self) -> Result<(), SessionError> {
        match self {
            Self::Connecting | Self::Streaming | Self::Error(_) => {
                *self = Self::Stopping;
                Ok(())
            }
            _ => Err(SessionError::InvalidTransition(
                "cannot stop: nothing to stop",
            )),
        }
    }

    /// Valid from: `Stopping`.
    pub fn finish_stop(&mut self) -> Result<(), SessionError> {
        match self {
            Self::Stopping => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(SessionError::InvalidTransition(
                "cannot finish stop: not in Stopping state",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
