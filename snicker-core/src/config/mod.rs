//! Session configuration contract.
//!
//! [`SessionConfig`] is the loose, user-facing form: it is what the
//! presentation layer edits and what [`store`] persists, so out-of-range
//! values survive until [`SessionConfig::validate`] rejects them.
//! [`ValidatedConfig`] is the only form the engine accepts.

pub mod store;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::frame::types::Screen;

pub use store::{ConfigStore, DocumentFormat, FileConfigStore};

// ── Defaults & limits ────────────────────────────────────────────

pub const DEFAULT_ADDRESS: &str = "192.168.1.100";
pub const DEFAULT_PORT: u32 = 8000;
pub const DEFAULT_QUALITY: u32 = 90;
pub const QUALITY_MIN: u32 = 10;
pub const QUALITY_MAX: u32 = 100;

/// Lower-cases and strips everything but ASCII alphanumerics, so
/// `"NTR CFW"`, `"ntr-cfw"` and `"NtrCfw"` compare equal.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ── CaptureMethod ────────────────────────────────────────────────

/// Device-side capture mechanism. Exclusive per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CaptureMethod {
    /// NTR CFW remote play (TCP command, UDP frames).
    #[default]
    Ntr,
    /// HzMod sysmodule (single TCP stream).
    HzMod,
}

impl CaptureMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            CaptureMethod::Ntr => "NTR",
            CaptureMethod::HzMod => "HzMod",
        }
    }
}

impl FromStr for CaptureMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "ntr" | "ntrcfw" => Ok(CaptureMethod::Ntr),
            "hzmod" => Ok(CaptureMethod::HzMod),
            _ => Err(ConfigError::UnknownValue {
                kind: "capture method",
                value: s.to_string(),
            }),
        }
    }
}

// ── Layout ───────────────────────────────────────────────────────

/// Arrangement of the two console screens on the output surface(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Layout {
    #[default]
    Vertical,
    Horizontal,
    TopOnly,
    BottomOnly,
    FullscreenTop,
    FullscreenBottom,
    SeparateWindows,
}

impl Layout {
    pub const ALL: [Layout; 7] = [
        Layout::Vertical,
        Layout::Horizontal,
        Layout::TopOnly,
        Layout::BottomOnly,
        Layout::FullscreenTop,
        Layout::FullscreenBottom,
        Layout::SeparateWindows,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Layout::Vertical => "Vertical",
            Layout::Horizontal => "Horizontal",
            Layout::TopOnly => "TopOnly",
            Layout::BottomOnly => "BottomOnly",
            Layout::FullscreenTop => "FullscreenTop",
            Layout::FullscreenBottom => "FullscreenBottom",
            Layout::SeparateWindows => "SeparateWindows",
        }
    }

    /// Whether composites in this layout need an image of `screen`.
    pub const fn needs(self, screen: Screen) -> bool {
        match self {
            Layout::Vertical | Layout::Horizontal | Layout::SeparateWindows => true,
            Layout::TopOnly | Layout::FullscreenTop => matches!(screen, Screen::Top),
            Layout::BottomOnly | Layout::FullscreenBottom => matches!(screen, Screen::Bottom),
        }
    }

    /// Layouts that need both screens pair them before compositing.
    pub const fn needs_both(self) -> bool {
        self.needs(Screen::Top) && self.needs(Screen::Bottom)
    }

    /// The screen a device should prioritise when it can only favour one.
    pub const fn priority_screen(self) -> Screen {
        match self {
            Layout::BottomOnly | Layout::FullscreenBottom => Screen::Bottom,
            _ => Screen::Top,
        }
    }
}

impl FromStr for Layout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        Layout::ALL
            .into_iter()
            .find(|l| normalize(l.as_str()) == key)
            .or(match key.as_str() {
                "separate" => Some(Layout::SeparateWindows),
                _ => None,
            })
            .ok_or_else(|| ConfigError::UnknownValue {
                kind: "layout",
                value: s.to_string(),
            })
    }
}

// ── Interpolation ────────────────────────────────────────────────

/// Resampling method used whenever a screen image is scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
    Cubic,
    Lanczos,
}

impl Interpolation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Interpolation::Nearest => "Nearest",
            Interpolation::Linear => "Linear",
            Interpolation::Cubic => "Cubic",
            Interpolation::Lanczos => "Lanczos",
        }
    }
}

impl FromStr for Interpolation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "nearest" => Ok(Interpolation::Nearest),
            "linear" | "bilinear" => Ok(Interpolation::Linear),
            "cubic" | "bicubic" => Ok(Interpolation::Cubic),
            "lanczos" => Ok(Interpolation::Lanczos),
            _ => Err(ConfigError::UnknownValue {
                kind: "interpolation",
                value: s.to_string(),
            }),
        }
    }
}

// ── String conversions for serde ─────────────────────────────────

macro_rules! string_enum {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $ty {
            type Error = ConfigError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$ty> for String {
            fn from(v: $ty) -> String {
                v.as_str().to_string()
            }
        }
    )*};
}

string_enum!(CaptureMethod, Layout, Interpolation);

// ── SessionConfig ────────────────────────────────────────────────

/// User-editable session settings, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Console IP address or host name.
    pub address: String,
    /// Device port. Wide on purpose so out-of-range values reach validation.
    pub port: u32,
    pub method: CaptureMethod,
    /// Lossy quality level, `10..=100`.
    pub quality: u32,
    pub layout: Layout,
    pub interpolation: Interpolation,
    /// Start streaming as soon as the client launches.
    pub auto_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            port: DEFAULT_PORT,
            method: CaptureMethod::Ntr,
            quality: DEFAULT_QUALITY,
            layout: Layout::Vertical,
            interpolation: Interpolation::Linear,
            auto_connect: false,
        }
    }
}

impl SessionConfig {
    /// Range-check every field. Either the whole config is accepted or
    /// nothing is: the returned value is a fresh copy.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }

        let port = u16::try_from(self.port)
            .ok()
            .filter(|&p| p != 0)
            .ok_or(ConfigError::InvalidPort(self.port))?;

        if !(QUALITY_MIN..=QUALITY_MAX).contains(&self.quality) {
            return Err(ConfigError::InvalidQuality(self.quality));
        }
        let quality =
            u8::try_from(self.quality).map_err(|_| ConfigError::InvalidQuality(self.quality))?;

        Ok(ValidatedConfig {
            address: address.to_string(),
            port,
            method: self.method,
            quality,
            layout: self.layout,
            interpolation: self.interpolation,
        })
    }
}

// ── ValidatedConfig ──────────────────────────────────────────────

/// A range-checked configuration, held read-only for a session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub address: String,
    pub port: u16,
    pub method: CaptureMethod,
    pub quality: u8,
    pub layout: Layout,
    pub interpolation: Interpolation,
}

impl fmt::Display for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} q={} {} {}",
            self.method, self.address, self.port, self.quality, self.layout, self.interpolation
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
