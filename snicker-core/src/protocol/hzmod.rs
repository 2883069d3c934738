//! HzMod adapter.
//!
//! One TCP stream carries every packet in both directions:
//!
//! ```text
//! ┌──────────┬──────────────────┬─────────────────┐
//! │ kind: u8 │ length: u24 (LE) │ payload: [u8]   │
//! └──────────┴──────────────────┴─────────────────┘
//! ```
//!
//! | Kind   | Direction       | Payload                          |
//! |--------|-----------------|----------------------------------|
//! | `0x01` | both            | empty (goodbye)                  |
//! | `0x03` | device → client | `[screen u8][TGA image]`         |
//! | `0x04` | device → client | `[screen u8][JPEG image]`        |
//! | `0x7E` | client → device | `[key u8][value u32 LE]` setting |

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, info, trace};

use super::{AdapterOptions, ProtocolAdapter, connect_tcp, resolve};
use crate::config::{CaptureMethod, Layout, ValidatedConfig};
use crate::error::AdapterError;
use crate::frame::types::{PayloadFormat, RawFrame, Screen};

pub const DEFAULT_PORT: u16 = 6464;

/// Packet header size in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload a u24 length can describe.
pub const MAX_PAYLOAD: usize = 0x00FF_FFFF;

const GOODBYE_TIMEOUT: Duration = Duration::from_millis(250);

/// Known packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Goodbye = 0x01,
    Targa = 0x03,
    Jpeg = 0x04,
    Settings = 0x7E,
}

impl PacketKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Goodbye),
            0x03 => Some(Self::Targa),
            0x04 => Some(Self::Jpeg),
            0x7E => Some(Self::Settings),
            _ => None,
        }
    }
}

/// Setting keys carried by a `Settings` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SettingKey {
    Quality = 1,
    CpuCap = 2,
    /// Bit 0 = top screen, bit 1 = bottom screen.
    Screens = 3,
}

// ── HzPacket ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HzPacket {
    pub kind: u8,
    pub payload: Bytes,
}

impl HzPacket {
    pub fn new(kind: PacketKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: kind as u8,
            payload: payload.into(),
        }
    }

    pub fn setting(key: SettingKey, value: u32) -> Self {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(key as u8);
        buf.put_u32_le(value);
        Self::new(PacketKind::Settings, buf.freeze())
    }

    pub fn goodbye() -> Self {
        Self::new(PacketKind::Goodbye, Bytes::new())
    }

    /// Frame packet as the device sends it.
    pub fn frame(kind: PacketKind, screen: Screen, image: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(1 + image.len());
        buf.put_u8(screen_byte(screen));
        buf.extend_from_slice(image);
        Self::new(kind, buf.freeze())
    }

    pub fn kind(&self) -> Option<PacketKind> {
        PacketKind::from_u8(self.kind)
    }
}

fn screen_byte(screen: Screen) -> u8 {
    match screen {
        Screen::Top => 0,
        Screen::Bottom => 1,
    }
}

fn screen_from_byte(b: u8) -> Option<Screen> {
    match b {
        0 => Some(Screen::Top),
        1 => Some(Screen::Bottom),
        _ => None,
    }
}

/// Requested-screen mask for a layout.
pub fn screen_mask(layout: Layout) -> u32 {
    let mut mask = 0;
    if layout.needs(Screen::Top) {
        mask |= 0b01;
    }
    if layout.needs(Screen::Bottom) {
        mask |= 0b10;
    }
    mask
}

// ── HzModCodec ───────────────────────────────────────────────────

/// `tokio_util` codec for the HzMod packet stream.
#[derive(Debug, Default)]
pub struct HzModCodec;

impl Decoder for HzModCodec {
    type Item = HzPacket;
    type Error = AdapterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = usize::from(src[1]) | usize::from(src[2]) << 8 | usize::from(src[3]) << 16;
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let kind = src.get_u8();
        src.advance(HEADER_LEN - 1);
        let payload = src.split_to(len).freeze();
        Ok(Some(HzPacket { kind, payload }))
    }
}

impl Encoder<HzPacket> for HzModCodec {
    type Error = AdapterError;

    fn encode(&mut self, item: HzPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len();
        if len > MAX_PAYLOAD {
            return Err(AdapterError::Protocol(format!(
                "payload of {len} bytes exceeds the 24-bit length field"
            )));
        }
        dst.reserve(HEADER_LEN + len);
        dst.put_u8(item.kind);
        dst.put_uint_le(len as u64, 3);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

// ── HzModOptions ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HzModOptions {
    /// Share of the console CPU the capture runtime may use, in percent.
    pub cpu_cap: u32,
}

impl Default for HzModOptions {
    fn default() -> Self {
        Self { cpu_cap: 50 }
    }
}

// ── HzModAdapter ─────────────────────────────────────────────────

pub struct HzModAdapter {
    options: HzModOptions,
    connect_timeout: Duration,
    idle_timeout: Duration,
    quality: u8,
    layout: Layout,
    framed: Option<Framed<TcpStream, HzModCodec>>,
    sequences: [u64; 2],
}

impl HzModAdapter {
    pub fn new(config: &ValidatedConfig, options: &AdapterOptions) -> Self {
        Self {
            options: options.hzmod.clone(),
            connect_timeout: options.connect_timeout,
            idle_timeout: options.idle_timeout,
            quality: config.quality,
            layout: config.layout,
            framed: None,
            sequences: [0; 2],
        }
    }

    fn frame_from_packet(&mut self, packet: HzPacket) -> Option<RawFrame> {
        let format = match packet.kind() {
            Some(PacketKind::Jpeg) => PayloadFormat::Jpeg,
            Some(PacketKind::Targa) => PayloadFormat::Tga,
            _ => {
                trace!(kind = packet.kind, "skipping non-frame packet");
                return None;
            }
        };
        let Some((&first, image)) = packet.payload.split_first() else {
            debug!("dropping empty {} packet", format.name());
            return None;
        };
        let Some(screen) = screen_from_byte(first) else {
            debug!("dropping {} packet for unknown screen {first}", format.name());
            return None;
        };

        let slot = &mut self.sequences[screen.index()];
        *slot += 1;
        Some(RawFrame {
            screen,
            sequence: *slot,
            format,
            portrait: true,
            payload: image.to_vec(),
        })
    }
}

#[async_trait]
impl ProtocolAdapter for HzModAdapter {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::HzMod
    }

    async fn connect(&mut self, address: &str, port: u16) -> Result<(), AdapterError> {
        self.close().await;

        let remote = resolve(address, port).await?;
        let stream = connect_tcp(remote, self.connect_timeout).await?;
        let mut framed = Framed::new(stream, HzModCodec);

        framed
            .feed(HzPacket::setting(SettingKey::Quality, u32::from(self.quality)))
            .await?;
        framed
            .feed(HzPacket::setting(SettingKey::CpuCap, self.options.cpu_cap))
            .await?;
        framed
            .feed(HzPacket::setting(SettingKey::Screens, screen_mask(self.layout)))
            .await?;
        framed.flush().await?;

        info!("HzMod stream opened to {remote} (quality {})", self.quality);
        self.framed = Some(framed);
        self.sequences = [0; 2];
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<RawFrame, AdapterError> {
        let idle = self.idle_timeout;
        loop {
            let framed = self.framed.as_mut().ok_or(AdapterError::NotConnected)?;
            let packet = match tokio::time::timeout(idle, framed.next()).await {
                Err(_) => return Err(AdapterError::IdleTimeout(idle)),
                Ok(None) => return Err(AdapterError::StreamEnded),
                Ok(Some(result)) => result?,
            };

            if packet.kind() == Some(PacketKind::Goodbye) {
                info!("HzMod device said goodbye");
                return Err(AdapterError::StreamEnded);
            }
            if let Some(frame) = self.frame_from_packet(packet) {
                return Ok(frame);
            }
        }
    }

    async fn close(&mut self) {
        let Some(mut framed) = self.framed.take() else {
            return;
        };
        match tokio::time::timeout(GOODBYE_TIMEOUT, framed.send(HzPacket::goodbye())).await {
            Ok(Ok(())) => debug!("HzMod goodbye sent"),
            Ok(Err(e)) => debug!("HzMod goodbye failed: {e}"),
            Err(_) => debug!("HzMod goodbye timed out"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
