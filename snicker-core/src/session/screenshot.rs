//! Screenshot persistence.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use image::ImageFormat;
use tracing::info;

use crate::error::ScreenshotError;
use crate::frame::types::{CompositeFrame, CompositeOutput};

const FILE_PREFIX: &str = "snickerstream";

/// What a sink reports back for one screenshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenshotReceipt {
    /// Sequence number of the captured composite.
    pub sequence: u64,
    /// Files written, if the sink writes files.
    pub paths: Vec<PathBuf>,
}

/// Receives the latest composite once per screenshot request.
pub trait ScreenshotSink: Send + Sync {
    fn save(&self, output: &CompositeOutput) -> Result<ScreenshotReceipt, ScreenshotError>;
}

// ── PngDirectorySink ─────────────────────────────────────────────

/// Writes `snickerstream-<unix_ms>.png` files into a directory.
///
/// Separate-window composites produce a `-top` and a `-bottom` file.
#[derive(Debug, Clone)]
pub struct PngDirectorySink {
    dir: PathBuf,
}

impl PngDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The user's pictures directory, falling back to the working directory.
    pub fn default_location() -> PathBuf {
        dirs::picture_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write(&self, frame: &CompositeFrame, suffix: &str) -> Result<PathBuf, ScreenshotError> {
        let millis = frame
            .generated_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let stem = format!("{FILE_PREFIX}-{millis}{suffix}");

        let mut path = self.dir.join(format!("{stem}.png"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}-{n}.png"));
            n += 1;
        }

        frame.surface.save_with_format(&path, ImageFormat::Png)?;
        info!("screenshot saved to {}", path.display());
        Ok(path)
    }
}

impl Default for PngDirectorySink {
    fn default() -> Self {
        Self::new(Self::default_location())
    }
}

impl ScreenshotSink for PngDirectorySink {
    fn save(&self, output: &CompositeOutput) -> Result<ScreenshotReceipt, ScreenshotError> {
        std::fs::create_dir_all(&self.dir)?;
        let paths = match output {
            CompositeOutput::Single(frame) => vec![self.write(frame, "")?],
            CompositeOutput::Separate { top, bottom } => {
                vec![self.write(top, "-top")?, self.write(bottom, "-bottom")?]
            }
        };
        Ok(ScreenshotReceipt {
            sequence: output.sequence(),
            paths,
        })
    }
}
