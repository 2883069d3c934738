//! Configuration persistence.
//!
//! The persisted form is a flat key-value document (JSON by default,
//! TOML when the file name ends in `.toml`). Loading is tolerant:
//! unknown keys are ignored, and a missing key (or one whose value has
//! the wrong type) falls back to its default.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::SessionConfig;
use crate::error::ConfigError;

/// File name used in the user's home directory.
pub const DEFAULT_FILE_NAME: &str = ".snickerstream_config.json";

// ── ConfigStore ──────────────────────────────────────────────────

/// Load/save contract for [`SessionConfig`].
pub trait ConfigStore: Send + Sync {
    /// Read the persisted config. An absent document yields defaults.
    fn load(&self) -> Result<SessionConfig, ConfigError>;

    /// Persist `config`, replacing any previous document.
    fn save(&self, config: &SessionConfig) -> Result<(), ConfigError>;

    /// Like [`load`](Self::load), but any failure degrades to defaults.
    fn load_or_default(&self) -> SessionConfig {
        self.load().unwrap_or_else(|e| {
            warn!("failed to load config: {e}; using defaults");
            SessionConfig::default()
        })
    }

    /// Overwrite the persisted document with defaults and return them.
    fn reset(&self) -> Result<SessionConfig, ConfigError> {
        let config = SessionConfig::default();
        self.save(&config)?;
        Ok(config)
    }
}

// ── DocumentFormat ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// Pick the format from a file extension; anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Json,
        }
    }

    /// Parse a document into a config.
    pub fn parse(self, text: &str) -> Result<SessionConfig, ConfigError> {
        let map = match self {
            DocumentFormat::Json => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(ConfigError::Malformed("expected a JSON object".into())),
                Err(e) => return Err(ConfigError::Malformed(e.to_string())),
            },
            DocumentFormat::Toml => {
                let table: toml::Table =
                    toml::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))?;
                match serde_json::to_value(table) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) => return Err(ConfigError::Malformed("expected a TOML table".into())),
                    Err(e) => return Err(ConfigError::Malformed(e.to_string())),
                }
            }
        };
        Ok(from_map(&map))
    }

    /// Render a config as a document.
    pub fn render(self, config: &SessionConfig) -> Result<String, ConfigError> {
        match self {
            DocumentFormat::Json => serde_json::to_string_pretty(config)
                .map_err(|e| ConfigError::Malformed(e.to_string())),
            DocumentFormat::Toml => {
                toml::to_string_pretty(config).map_err(|e| ConfigError::Malformed(e.to_string()))
            }
        }
    }
}

/// Build a config key by key. `keys` lists the canonical name first,
/// followed by the legacy names older clients wrote.
fn field<T: DeserializeOwned>(map: &Map<String, Value>, keys: &[&str]) -> Option<T> {
    let (key, value) = keys
        .iter()
        .find_map(|k| map.get(*k).map(|v| (*k, v)))?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("ignoring config key {key:?}: {e}");
            None
        }
    }
}

fn from_map(map: &Map<String, Value>) -> SessionConfig {
    let mut config = SessionConfig::default();
    if let Some(v) = field(map, &["address", "ip"]) {
        config.address = v;
    }
    if let Some(v) = field(map, &["port"]) {
        config.port = v;
    }
    if let Some(v) = field(map, &["method", "streaming_app"]) {
        config.method = v;
    }
    if let Some(v) = field(map, &["quality"]) {
        config.quality = v;
    }
    if let Some(v) = field(map, &["layout"]) {
        config.layout = v;
    }
    if let Some(v) = field(map, &["interpolation"]) {
        config.interpolation = v;
    }
    if let Some(v) = field(map, &["autoConnect", "auto_connect"]) {
        config.auto_connect = v;
    }
    config
}

// ── FileConfigStore ──────────────────────────────────────────────

/// A [`ConfigStore`] backed by a single file.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
    format: DocumentFormat,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = DocumentFormat::from_path(&path);
        Self { path, format }
    }

    /// `~/.snickerstream_config.json`, or the working directory when no
    /// home directory is known.
    pub fn default_location() -> Self {
        let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(dir.join(DEFAULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<SessionConfig, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => self.format.parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no config at {}; using defaults", self.path.display());
                Ok(SessionConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, config: &SessionConfig) -> Result<(), ConfigError> {
        let text = self.format.render(config)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, text)?;
        info!("saved config to {}", self.path.display());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
