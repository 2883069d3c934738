//! Shared types for the capture/decode/composite pipeline.
//!
//! A [`RawFrame`] comes out of a protocol adapter, becomes a
//! [`DecodedImage`] in the decoder, and one or two decoded images become
//! a [`CompositeOutput`] in the compositor.

use std::fmt;
use std::time::SystemTime;

use image::RgbaImage;

// ── Screen ───────────────────────────────────────────────────────

/// One of the console's two displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    Top,
    Bottom,
}

impl Screen {
    /// Native landscape resolution of this screen.
    pub const fn native_size(self) -> (u32, u32) {
        match self {
            Screen::Top => (400, 240),
            Screen::Bottom => (320, 240),
        }
    }

    pub const fn other(self) -> Screen {
        match self {
            Screen::Top => Screen::Bottom,
            Screen::Bottom => Screen::Top,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Screen::Top => 0,
            Screen::Bottom => 1,
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Screen::Top => f.write_str("top"),
            Screen::Bottom => f.write_str("bottom"),
        }
    }
}

// ── PayloadFormat ────────────────────────────────────────────────

/// Encoding of a [`RawFrame`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadFormat {
    /// Baseline JPEG, as sent by NTR and HzMod's JPEG mode.
    Jpeg,
    /// Truevision TGA, as sent by HzMod's lossless mode.
    Tga,
    /// Tightly packed 3-byte RGB pixels of the given geometry.
    Rgb8 { width: u32, height: u32 },
}

impl PayloadFormat {
    /// Whether the payload went through lossy compression on the device.
    pub const fn is_compressed(self) -> bool {
        matches!(self, PayloadFormat::Jpeg)
    }

    pub const fn name(self) -> &'static str {
        match self {
            PayloadFormat::Jpeg => "jpeg",
            PayloadFormat::Tga => "tga",
            PayloadFormat::Rgb8 { .. } => "rgb8",
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// One complete screen capture as delivered by an adapter.
///
/// Consumed by value by the decoder.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub screen: Screen,
    /// Monotonic per-screen sequence number.
    pub sequence: u64,
    pub format: PayloadFormat,
    /// The console stores its framebuffers rotated; `true` means the
    /// payload is in that native portrait orientation.
    pub portrait: bool,
    pub payload: Vec<u8>,
}

// ── DecodedImage ─────────────────────────────────────────────────

/// A decoded, landscape-oriented RGBA8 screen image.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub screen: Screen,
    pub sequence: u64,
    pub pixels: RgbaImage,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

// ── CompositeFrame ───────────────────────────────────────────────

/// A renderable surface handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct CompositeFrame {
    pub surface: RgbaImage,
    /// Newest sequence number among the contributing screen images.
    pub sequence: u64,
    pub generated_at: SystemTime,
}

impl CompositeFrame {
    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }
}

/// What one compositing step produces.
#[derive(Debug, Clone)]
pub enum CompositeOutput {
    /// All required screens on one surface.
    Single(CompositeFrame),
    /// Separate-windows layout: top and bottom as independent surfaces.
    Separate {
        top: CompositeFrame,
        bottom: CompositeFrame,
    },
}

impl CompositeOutput {
    /// The surfaces in presentation order (top first).
    pub fn frames(&self) -> Vec<&CompositeFrame> {
        match self {
            CompositeOutput::Single(f) => vec![f],
            CompositeOutput::Separate { top, bottom } => vec![top, bottom],
        }
    }

    pub fn sequence(&self) -> u64 {
        match self {
            CompositeOutput::Single(f) => f.sequence,
            CompositeOutput::Separate { top, bottom } => top.sequence.max(bottom.sequence),
        }
    }
}
