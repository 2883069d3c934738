//! Capture-protocol adapters.
//!
//! A [`ProtocolAdapter`] owns the network connection to the console and
//! turns whatever the device-side capture runtime sends into a sequence
//! of [`RawFrame`]s. The session engine selects one adapter per session
//! through an [`AdapterFactory`] and never looks past this trait.
//!
//! | Module  | Runtime  | Transport                                   |
//! |---------|----------|---------------------------------------------|
//! | `ntr`   | NTR CFW  | TCP remote-play command, UDP JPEG fragments |
//! | `hzmod` | HzMod    | One TCP stream of length-prefixed packets   |

pub mod hzmod;
pub mod ntr;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, lookup_host};

use crate::config::{CaptureMethod, ValidatedConfig};
use crate::error::AdapterError;
use crate::frame::types::RawFrame;

pub use hzmod::{HzModAdapter, HzModCodec, HzModOptions, HzPacket};
pub use ntr::{NtrAdapter, NtrOptions};

// ── ProtocolAdapter ──────────────────────────────────────────────

/// Capability set shared by every capture method.
///
/// `next_frame` may block for as long as the device stays silent (up to
/// the adapter's idle timeout); callers abort it by dropping the future,
/// so implementations keep all partial state in `self`.
#[async_trait]
pub trait ProtocolAdapter: Send {
    /// The capture method this adapter speaks.
    fn method(&self) -> CaptureMethod;

    /// Open the connection and ask the device to start streaming.
    async fn connect(&mut self, address: &str, port: u16) -> Result<(), AdapterError>;

    /// Wait for the next complete screen frame.
    async fn next_frame(&mut self) -> Result<RawFrame, AdapterError>;

    /// Release the connection. Idempotent; never fails.
    async fn close(&mut self);

    /// Device frames lost in transit since `connect`, before they could
    /// be delivered by `next_frame`.
    fn discarded_frames(&self) -> u64 {
        0
    }
}

// ── AdapterFactory ───────────────────────────────────────────────

/// Builds the adapter for a session from its validated config.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &ValidatedConfig) -> Box<dyn ProtocolAdapter>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&ValidatedConfig) -> Box<dyn ProtocolAdapter> + Send + Sync,
{
    fn create(&self, config: &ValidatedConfig) -> Box<dyn ProtocolAdapter> {
        self(config)
    }
}

/// Timeouts and per-protocol tuning for the real adapters.
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    /// Deadline for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Longest silence tolerated while waiting for frame data.
    pub idle_timeout: Duration,
    pub ntr: NtrOptions,
    pub hzmod: HzModOptions,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10),
            ntr: NtrOptions::default(),
            hzmod: HzModOptions::default(),
        }
    }
}

/// Factory for the production NTR and HzMod adapters.
#[derive(Debug, Clone, Default)]
pub struct DefaultAdapters {
    options: AdapterOptions,
}

impl DefaultAdapters {
    pub fn new(options: AdapterOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }
}

impl AdapterFactory for DefaultAdapters {
    fn create(&self, config: &ValidatedConfig) -> Box<dyn ProtocolAdapter> {
        match config.method {
            CaptureMethod::Ntr => Box::new(NtrAdapter::new(config, &self.options)),
            CaptureMethod::HzMod => Box::new(HzModAdapter::new(config, &self.options)),
        }
    }
}

// ── Shared connection helpers ────────────────────────────────────

/// Resolve `address:port` to its first socket address.
pub(crate) async fn resolve(address: &str, port: u16) -> Result<SocketAddr, AdapterError> {
    let target = format!("{address}:{port}");
    let mut addrs = lookup_host((address, port))
        .await
        .map_err(|source| AdapterError::Connect {
            addr: target.clone(),
            source,
        })?;
    addrs.next().ok_or(AdapterError::Resolve(target))
}

/// Open a TCP connection with a deadline.
pub(crate) async fn connect_tcp(
    addr: SocketAddr,
    timeout: Duration,
) -> Result<TcpStream, AdapterError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| AdapterError::ConnectTimeout(timeout))?
        .map_err(|source| AdapterError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
