//! NTR CFW remote-play adapter.
//!
//! ## Wire format
//!
//! **Remote-play command** (TCP, 84 bytes, little-endian):
//! ```text
//! magic:     u32  0x12345678
//! sequence:  u32
//! type:      u32  0
//! command:   u32  901
//! args:      [u32; 16]   args[0] = priority_mode << 8 | priority_factor
//!                        args[1] = JPEG quality
//!                        args[2] = QoS in bytes/s
//! data_len:  u32  0
//! ```
//!
//! **Frame fragment** (UDP datagram sent by the console to port 8001):
//! ```text
//! frame_id:  u8
//! flags:     u8   0x01 = top screen, 0x10 = last fragment
//! format:    u8   source framebuffer format (informational)
//! index:     u8   fragment number within the frame
//! data:      [u8] JPEG bytes
//! ```
//!
//! Fragments of one frame are concatenated in index order; a gap in the
//! index sequence discards the whole frame. Discarded frames never reach
//! `next_frame`; they are counted in `discarded_frames` and show up as
//! `SessionStats::frames_discarded`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use bitflags::bitflags;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use super::{AdapterOptions, ProtocolAdapter, connect_tcp, resolve};
use crate::config::{CaptureMethod, ValidatedConfig};
use crate::error::AdapterError;
use crate::frame::types::{PayloadFormat, RawFrame, Screen};

// ── Constants ────────────────────────────────────────────────────

pub const NTR_MAGIC: u32 = 0x1234_5678;
pub const REMOTE_PLAY_COMMAND: u32 = 901;
pub const DEFAULT_UDP_PORT: u16 = 8001;

/// Large enough for any fragment the console emits.
const MAX_DATAGRAM: usize = 2048;

bitflags! {
    /// Second header byte of a frame fragment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FragmentFlags: u8 {
        const TOP_SCREEN = 0x01;
        const LAST_FRAGMENT = 0x10;
    }
}

// ── NtrOptions ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NtrOptions {
    /// Local UDP port the console streams to.
    pub udp_port: u16,
    /// How strongly the priority screen is favoured (frames per other-screen frame).
    pub priority_factor: u8,
    /// Bandwidth cap requested from the console, in Mbit/s.
    pub qos_mbps: u32,
}

impl Default for NtrOptions {
    fn default() -> Self {
        Self {
            udp_port: DEFAULT_UDP_PORT,
            priority_factor: 5,
            qos_mbps: 105,
        }
    }
}

// ── CommandPacket ────────────────────────────────────────────────

/// NTR control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub sequence: u32,
    pub kind: u32,
    pub command: u32,
    pub args: [u32; 16],
    pub data_len: u32,
}

impl CommandPacket {
    /// Encoded size on the wire.
    pub const SIZE: usize = 84;

    /// Build the command that starts remote play.
    pub fn remote_play(priority: Screen, factor: u8, quality: u8, qos_mbps: u32) -> Self {
        let mode: u32 = match priority {
            Screen::Top => 1,
            Screen::Bottom => 0,
        };
        let mut args = [0u32; 16];
        args[0] = (mode << 8) | u32::from(factor);
        args[1] = u32::from(quality);
        args[2] = qos_mbps.saturating_mul(1024 * 1024 / 8);
        Self {
            sequence: 1,
            kind: 0,
            command: REMOTE_PLAY_COMMAND,
            args,
            data_len: 0,
        }
    }

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&NTR_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8..12].copy_from_slice(&self.kind.to_le_bytes());
        buf[12..16].copy_from_slice(&self.command.to_le_bytes());
        for (i, arg) in self.args.iter().enumerate() {
            let at = 16 + i * 4;
            buf[at..at + 4].copy_from_slice(&arg.to_le_bytes());
        }
        buf[80..84].copy_from_slice(&self.data_len.to_le_bytes());
        buf
    }

    /// Deserialize from bytes, checking the magic.
    pub fn decode(data: &[u8]) -> Result<Self, AdapterError> {
        if data.len() < Self::SIZE {
            return Err(AdapterError::Protocol(format!(
                "command packet too short: {} < {}",
                data.len(),
                Self::SIZE
            )));
        }
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        if word(0) != NTR_MAGIC {
            return Err(AdapterError::Protocol(format!("bad magic {:#010x}", word(0))));
        }
        let mut args = [0u32; 16];
        for (i, arg) in args.iter_mut().enumerate() {
            *arg = word(16 + i * 4);
        }
        Ok(Self {
            sequence: word(4),
            kind: word(8),
            command: word(12),
            args,
            data_len: word(80),
        })
    }
}

// ── FragmentHeader ───────────────────────────────────────────────

/// Header prepended to every UDP frame fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_id: u8,
    pub flags: FragmentFlags,
    pub format: u8,
    pub index: u8,
}

impl FragmentHeader {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        [self.frame_id, self.flags.bits(), self.format, self.index]
    }

    pub fn decode(data: &[u8]) -> Result<Self, AdapterError> {
        if data.len() < Self::SIZE {
            return Err(AdapterError::Protocol(format!(
                "fragment too short: {} < {}",
                data.len(),
                Self::SIZE
            )));
        }
        Ok(Self {
            frame_id: data[0],
            flags: FragmentFlags::from_bits_truncate(data[1]),
            format: data[2],
            index: data[3],
        })
    }

    pub fn screen(&self) -> Screen {
        if self.flags.contains(FragmentFlags::TOP_SCREEN) {
            Screen::Top
        } else {
            Screen::Bottom
        }
    }

    pub fn is_last(&self) -> bool {
        self.flags.contains(FragmentFlags::LAST_FRAGMENT)
    }
}

// ── FrameAssembler ───────────────────────────────────────────────

/// Reassembles the fragments of one screen's frames.
#[derive(Debug, Default)]
struct FrameAssembler {
    /// Frame currently being collected.
    frame_id: Option<u8>,
    next_index: u8,
    buffer: Vec<u8>,
    /// A fragment went missing; ignore the rest of this frame.
    broken: bool,
    discarded: u64,
}

impl FrameAssembler {
    /// Feed one fragment; returns the payload once the last one arrives.
    fn push(&mut self, header: &FragmentHeader, data: &[u8]) -> Option<Vec<u8>> {
        if self.frame_id != Some(header.frame_id) {
            if self.frame_id.is_some() && !self.broken {
                // Previous frame never saw its last fragment.
                self.discarded += 1;
            }
            self.frame_id = Some(header.frame_id);
            self.next_index = 0;
            self.buffer.clear();
            self.broken = false;
        }

        if self.broken {
            return None;
        }
        if header.index != self.next_index {
            trace!(
                frame = header.frame_id,
                expected = self.next_index,
                got = header.index,
                "fragment gap"
            );
            self.broken = true;
            self.discarded += 1;
            return None;
        }

        self.buffer.extend_from_slice(data);
        self.next_index = self.next_index.wrapping_add(1);

        if header.is_last() {
            self.frame_id = None;
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    fn reset(&mut self) {
        self.frame_id = None;
        self.next_index = 0;
        self.buffer.clear();
        self.broken = false;
    }
}

// ── SequenceCounter ──────────────────────────────────────────────

/// Widens the 8-bit frame id into a monotonic sequence number.
#[derive(Debug, Default)]
struct SequenceCounter {
    last: Option<u8>,
    sequence: u64,
}

impl SequenceCounter {
    fn advance(&mut self, frame_id: u8) -> u64 {
        let step = match self.last {
            None => 1,
            Some(prev) => match frame_id.wrapping_sub(prev) {
                0 => 256,
                d => u64::from(d),
            },
        };
        self.last = Some(frame_id);
        self.sequence += step;
        self.sequence
    }
}

// ── NtrAdapter ───────────────────────────────────────────────────

pub struct NtrAdapter {
    options: NtrOptions,
    connect_timeout: std::time::Duration,
    idle_timeout: std::time::Duration,
    quality: u8,
    priority: Screen,
    socket: Option<UdpSocket>,
    device: Option<IpAddr>,
    assemblers: [FrameAssembler; 2],
    sequences: [SequenceCounter; 2],
    buf: Vec<u8>,
}

impl NtrAdapter {
    pub fn new(config: &ValidatedConfig, options: &AdapterOptions) -> Self {
        Self {
            options: options.ntr.clone(),
            connect_timeout: options.connect_timeout,
            idle_timeout: options.idle_timeout,
            quality: config.quality,
            priority: config.layout.priority_screen(),
            socket: None,
            device: None,
            assemblers: Default::default(),
            sequences: Default::default(),
            buf: vec![0u8; MAX_DATAGRAM],
        }
    }

    /// Address of the bound UDP socket while connected.
    pub fn local_udp_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[async_trait]
impl ProtocolAdapter for NtrAdapter {
    fn method(&self) -> CaptureMethod {
        CaptureMethod::Ntr
    }

    /// Frames lost to missing or out-of-order fragments.
    fn discarded_frames(&self) -> u64 {
        self.assemblers.iter().map(|a| a.discarded).sum()
    }

    async fn connect(&mut self, address: &str, port: u16) -> Result<(), AdapterError> {
        self.close().await;

        let remote = resolve(address, port).await?;
        let bind_ip: IpAddr = if remote.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        // Bind before asking for frames so none are lost.
        let socket = UdpSocket::bind((bind_ip, self.options.udp_port))
            .await
            .map_err(|source| AdapterError::Connect {
                addr: format!("udp/{}", self.options.udp_port),
                source,
            })?;

        let mut control = connect_tcp(remote, self.connect_timeout).await?;
        let command = CommandPacket::remote_play(
            self.priority,
            self.options.priority_factor,
            self.quality,
            self.options.qos_mbps,
        );
        control
            .write_all(&command.encode())
            .await
            .map_err(|source| AdapterError::Connect {
                addr: remote.to_string(),
                source,
            })?;
        // The console tears the control link down once remote play starts.
        let _ = control.shutdown().await;

        info!(
            "NTR remote play requested from {remote} (quality {}, priority {})",
            self.quality, self.priority
        );
        self.socket = Some(socket);
        self.device = Some(remote.ip());
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<RawFrame, AdapterError> {
        let idle = self.idle_timeout;
        let socket = self.socket.as_ref().ok_or(AdapterError::NotConnected)?;

        loop {
            let (len, from) = tokio::time::timeout(idle, socket.recv_from(&mut self.buf))
                .await
                .map_err(|_| AdapterError::IdleTimeout(idle))??;

            if Some(from.ip()) != self.device {
                trace!("ignoring datagram from {from}");
                continue;
            }
            let header = match FragmentHeader::decode(&self.buf[..len]) {
                Ok(h) => h,
                Err(e) => {
                    debug!("dropping datagram: {e}");
                    continue;
                }
            };

            let screen = header.screen();
            let data = &self.buf[FragmentHeader::SIZE..len];
            if let Some(payload) = self.assemblers[screen.index()].push(&header, data) {
                let sequence = self.sequences[screen.index()].advance(header.frame_id);
                return Ok(RawFrame {
                    screen,
                    sequence,
                    format: PayloadFormat::Jpeg,
                    portrait: true,
                    payload,
                });
            }
        }
    }

    async fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("NTR adapter closed");
        }
        self.device = None;
        for a in &mut self.assemblers {
            a.reset();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
