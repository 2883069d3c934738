//! Frame compositor.
//!
//! Arranges the decoded top/bottom screen images into the surface(s)
//! the presentation layer displays. The interpolation method only
//! matters when an image is scaled; surfaces are always RGBA8.

use std::time::SystemTime;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::config::{Interpolation, Layout};
use crate::error::CompositeError;
use crate::frame::types::{CompositeFrame, CompositeOutput, DecodedImage, Screen};

/// Fill colour for letterboxing and the gaps around a narrower screen.
const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Default fullscreen surface: four times the top screen.
pub const DEFAULT_FULLSCREEN: (u32, u32) = (1600, 960);

/// Largest fullscreen surface side.
pub const MAX_SURFACE: u32 = 8192;

/// Accepted range for the per-screen scale factor.
pub const MIN_SCALE: f32 = 0.25;
pub const MAX_SCALE: f32 = 8.0;

impl Interpolation {
    fn filter(self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Linear => FilterType::Triangle,
            Interpolation::Cubic => FilterType::CatmullRom,
            Interpolation::Lanczos => FilterType::Lanczos3,
        }
    }
}

// ── FrameCompositor ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FrameCompositor {
    /// Output surface size for the fullscreen layouts.
    fullscreen: (u32, u32),
    /// Per-screen scale factor for every non-fullscreen layout.
    scale: f32,
}

impl Default for FrameCompositor {
    fn default() -> Self {
        Self {
            fullscreen: DEFAULT_FULLSCREEN,
            scale: 1.0,
        }
    }
}

impl FrameCompositor {
    /// Each side is clamped to `1..=MAX_SURFACE`.
    pub fn new(fullscreen_width: u32, fullscreen_height: u32) -> Self {
        Self {
            fullscreen: (
                fullscreen_width.clamp(1, MAX_SURFACE),
                fullscreen_height.clamp(1, MAX_SURFACE),
            ),
            scale: 1.0,
        }
    }

    /// Set the scale factor, clamped to `MIN_SCALE..=MAX_SCALE`.
    /// Non-finite or non-positive values reset it to 1.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = if scale.is_finite() && scale > 0.0 {
            scale.clamp(MIN_SCALE, MAX_SCALE)
        } else {
            1.0
        };
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn fullscreen_size(&self) -> (u32, u32) {
        self.fullscreen
    }

    /// Compose the available screen images according to `layout`.
    pub fn compose(
        &self,
        top: Option<&DecodedImage>,
        bottom: Option<&DecodedImage>,
        layout: Layout,
        interpolation: Interpolation,
    ) -> Result<CompositeOutput, CompositeError> {
        let filter = interpolation.filter();
        let now = SystemTime::now();

        let output = match layout {
            Layout::Vertical | Layout::Horizontal => {
                let (top, bottom) = (require(top, Screen::Top)?, require(bottom, Screen::Bottom)?);
                let a = self.scaled(top, filter);
                let b = self.scaled(bottom, filter);
                let surface = if layout == Layout::Vertical {
                    stack_vertical(&a, &b)
                } else {
                    stack_horizontal(&a, &b)
                };
                CompositeOutput::Single(frame(surface, top.sequence.max(bottom.sequence), now))
            }
            Layout::TopOnly | Layout::BottomOnly => {
                let screen = if layout == Layout::TopOnly { Screen::Top } else { Screen::Bottom };
                let img = require(pick(top, bottom, screen), screen)?;
                CompositeOutput::Single(frame(self.scaled(img, filter), img.sequence, now))
            }
            Layout::FullscreenTop | Layout::FullscreenBottom => {
                let screen =
                    if layout == Layout::FullscreenTop { Screen::Top } else { Screen::Bottom };
                let img = require(pick(top, bottom, screen), screen)?;
                let (w, h) = self.fullscreen;
                CompositeOutput::Single(frame(fit(&img.pixels, w, h, filter), img.sequence, now))
            }
            Layout::SeparateWindows => {
                let (top, bottom) = (require(top, Screen::Top)?, require(bottom, Screen::Bottom)?);
                CompositeOutput::Separate {
                    top: frame(self.scaled(top, filter), top.sequence, now),
                    bottom: frame(self.scaled(bottom, filter), bottom.sequence, now),
                }
            }
        };
        Ok(output)
    }

    fn scaled(&self, img: &DecodedImage, filter: FilterType) -> RgbaImage {
        if self.scale == 1.0 {
            return img.pixels.clone();
        }
        let w = ((img.width() as f32 * self.scale).round() as u32).max(1);
        let h = ((img.height() as f32 * self.scale).round() as u32).max(1);
        resize(&img.pixels, w, h, filter)
    }
}

// ── Internal ─────────────────────────────────────────────────────

fn require(img: Option<&DecodedImage>, screen: Screen) -> Result<&DecodedImage, CompositeError> {
    img.ok_or(CompositeError::MissingScreen(screen))
}

fn pick<'a>(
    top: Option<&'a DecodedImage>,
    bottom: Option<&'a DecodedImage>,
    screen: Screen,
) -> Option<&'a DecodedImage> {
    match screen {
        Screen::Top => top,
        Screen::Bottom => bottom,
    }
}

fn frame(surface: RgbaImage, sequence: u64, generated_at: SystemTime) -> CompositeFrame {
    CompositeFrame {
        surface,
        sequence,
        generated_at,
    }
}

fn resize(img: &RgbaImage, w: u32, h: u32, filter: FilterType) -> RgbaImage {
    if img.dimensions() == (w, h) {
        img.clone()
    } else {
        imageops::resize(img, w, h, filter)
    }
}

/// `a` above `b`, each horizontally centred.
fn stack_vertical(a: &RgbaImage, b: &RgbaImage) -> RgbaImage {
    let width = a.width().max(b.width());
    let mut surface = RgbaImage::from_pixel(width, a.height() + b.height(), BACKGROUND);
    imageops::replace(&mut surface, a, i64::from((width - a.width()) / 2), 0);
    imageops::replace(
        &mut surface,
        b,
        i64::from((width - b.width()) / 2),
        i64::from(a.height()),
    );
    surface
}

/// `a` left of `b`, each vertically centred.
fn stack_horizontal(a: &RgbaImage, b: &RgbaImage) -> RgbaImage {
    let height = a.height().max(b.height());
    let mut surface = RgbaImage::from_pixel(a.width() + b.width(), height, BACKGROUND);
    imageops::replace(&mut surface, a, 0, i64::from((height - a.height()) / 2));
    imageops::replace(
        &mut surface,
        b,
        i64::from(a.width()),
        i64::from((height - b.height()) / 2),
    );
    surface
}

/// Aspect-preserving fit into a `w × h` surface, centred and letterboxed.
fn fit(img: &RgbaImage, w: u32, h: u32, filter: FilterType) -> RgbaImage {
    let ratio = (w as f64 / img.width() as f64).min(h as f64 / img.height() as f64);
    let nw = ((img.width() as f64 * ratio).round() as u32).clamp(1, w);
    let nh = ((img.height() as f64 * ratio).round() as u32).clamp(1, h);
    let scaled = resize(img, nw, nh, filter);

    let mut surface = RgbaImage::from_pixel(w, h, BACKGROUND);
    imageops::replace(
        &mut surface,
        &scaled,
        i64::from((w - nw) / 2),
        i64::from((h - nh) / 2),
    );
    surface
}

// ── Tests ────────────────────────────────────────────────────────
