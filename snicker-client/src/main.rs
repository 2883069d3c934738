//! Snickerstream headless client: entry point.
//!
//! ```text
//! snicker-client --connect                      Stream with the saved config
//! snicker-client -a 192.168.1.20 -m hzmod -c    Override address and method
//! snicker-client --config <path> --gen-config   Dump the default config and exit
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use snicker_core::frame::compositor::{MAX_SCALE, MIN_SCALE};
use snicker_core::{
    AdapterOptions, CaptureMethod, ConfigStore, DefaultAdapters, EngineOptions, FileConfigStore,
    Interpolation, Layout, PngDirectorySink, SessionConfig, SessionController, SessionEvent,
    SessionState,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "snicker-client", about = "Stream the screens of a 3DS running NTR CFW or HzMod")]
struct Cli {
    /// Config file (JSON or TOML, by extension). Defaults to ~/.snickerstream_config.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device address (overrides config).
    #[arg(short, long)]
    address: Option<String>,

    /// Device port (overrides config).
    #[arg(short, long)]
    port: Option<u32>,

    /// Capture method: ntr or hzmod.
    #[arg(short, long)]
    method: Option<CaptureMethod>,

    /// Quality, 10..=100.
    #[arg(short, long)]
    quality: Option<u32>,

    /// Layout: vertical, horizontal, top-only, bottom-only, fullscreen-top,
    /// fullscreen-bottom or separate-windows.
    #[arg(short, long)]
    layout: Option<Layout>,

    /// Interpolation: nearest, linear, cubic or lanczos.
    #[arg(short, long)]
    interpolation: Option<Interpolation>,

    /// Per-screen scale for the windowed layouts, 0.25..=8.
    #[arg(long, default_value_t = 1.0, value_parser = parse_scale)]
    scale: f32,

    /// Connect even if the config has auto-connect off.
    #[arg(short, long)]
    connect: bool,

    /// Directory for screenshots.
    #[arg(long)]
    screenshot_dir: Option<PathBuf>,

    /// Take a screenshot every N composited frames.
    #[arg(long)]
    screenshot_every: Option<u64>,

    /// Stop after N composited frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Seconds between stats lines.
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,

    /// Write the effective config back to the config file.
    #[arg(long)]
    save_config: bool,

    /// Print the default configuration and exit.
    #[arg(long)]
    gen_config: bool,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_scale(s: &str) -> Result<f32, String> {
    let scale: f32 = s.parse().map_err(|e| format!("{e}"))?;
    if (MIN_SCALE..=MAX_SCALE).contains(&scale) {
        Ok(scale)
    } else {
        Err(format!("scale must be between {MIN_SCALE} and {MAX_SCALE}"))
    }
}

impl Cli {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if let Some(interpolation) = self.interpolation {
            config.interpolation = interpolation;
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let store = match &cli.config {
        Some(path) => FileConfigStore::new(path),
        None => FileConfigStore::default_location(),
    };

    if cli.gen_config {
        let text = store.format().render(&SessionConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Init tracing.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("snicker-client v{}", env!("CARGO_PKG_VERSION"));

    let mut config = store.load_or_default();
    cli.apply(&mut config);

    if cli.save_config {
        store.save(&config)?;
    }

    if !(config.auto_connect || cli.connect) {
        info!("auto-connect is off; pass --connect to start streaming");
        return Ok(());
    }

    // ── 1. Build the controller ─────────────────────────────────

    let screenshot_dir = cli
        .screenshot_dir
        .clone()
        .unwrap_or_else(PngDirectorySink::default_location);
    let controller = SessionController::new(
        Arc::new(DefaultAdapters::new(AdapterOptions::default())),
        Arc::new(PngDirectorySink::new(screenshot_dir)),
        EngineOptions {
            scale: cli.scale,
            ..EngineOptions::default()
        },
    );
    let mut events = controller.subscribe()?;
    let stats = controller.stats();

    // ── 2. Start streaming ──────────────────────────────────────

    controller.start(&config)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.stats_interval.max(1)));
    let mut composited: u64 = 0;
    let mut failure = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = ticker.tick() => {
                let s = stats.borrow().clone();
                if s.frames_received > 0 {
                    info!(
                        "{:.1} fps, {} received, {} composited, {} dropped, {} lost in transit, {} KiB",
                        s.fps,
                        s.frames_received,
                        s.frames_composited,
                        s.frames_dropped,
                        s.frames_discarded,
                        s.bytes_received / 1024
                    );
                }
            }
            event = events.recv() => match event {
                Some(SessionEvent::Status(SessionState::Idle)) => break,
                Some(SessionEvent::Status(SessionState::Error(f))) => {
                    failure = Some(f);
                    break;
                }
                Some(SessionEvent::Status(_)) => {}
                Some(SessionEvent::Frame(output)) => {
                    composited += 1;
                    debug!("frame {} ({} surface(s))", output.sequence(), output.frames().len());
                    if cli.screenshot_every.is_some_and(|n| n > 0 && composited % n == 0) {
                        match controller.screenshot() {
                            Ok(receipt) => debug!("screenshot of frame {}", receipt.sequence),
                            Err(e) => warn!("screenshot failed: {e}"),
                        }
                    }
                    if cli.frames.is_some_and(|n| composited >= n) {
                        info!("frame limit reached");
                        break;
                    }
                }
                Some(SessionEvent::FrameDropped(d)) => {
                    debug!(
                        "dropped {} frame {}: {} ({} more folded)",
                        d.screen, d.sequence, d.reason, d.folded
                    );
                }
                None => break,
            },
        }
    }

    // ── 3. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    controller.stop().await;

    match failure {
        Some(f) => {
            error!("session failed: {f}");
            Err(f.to_string().into())
        }
        None => Ok(()),
    }
}
