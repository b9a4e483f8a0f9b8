//! Receiver command frame encoding.
//!
//! The receiver accepts a fixed-width frame carrying a bitmap of device
//! power states addressed by grid position. Building a frame is pure: no
//! I/O and no shared state, so it can be tested without a transport.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::devices::registry::{Device, DeviceId, GridPosition};
use crate::error::{BroadcastError, BroadcastResult};
use crate::protocol_constants::{
    BITMAP_OFFSET, BITMAP_ROW_STRIDE, CHECKSUM_OFFSET, FRAME_COMMAND, FRAME_FOOTER, FRAME_HEADER,
    FRAME_SIZE, MAX_COLUMNS, MAX_ROWS,
};

/// Power command for a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerCommand {
    PowerOn,
    PowerOff,
}

impl fmt::Display for PowerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerOn => f.write_str("PowerOn"),
            Self::PowerOff => f.write_str("PowerOff"),
        }
    }
}

/// Byte layout of the receiver frame.
///
/// Supplied by the hardware vendor; the defaults match frames captured from
/// the installed receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketLayout {
    pub frame_size: usize,
    pub header: Vec<u8>,
    pub command: Vec<u8>,
    pub footer: Vec<u8>,
    /// Offset of the bitmap byte for row 0, columns 0..8.
    pub bitmap_offset: usize,
    /// Byte distance between consecutive rows' bitmap bytes.
    pub row_stride: usize,
    /// Checksum byte; holds the XOR of every preceding byte.
    pub checksum_offset: usize,
    pub max_rows: usize,
    pub max_columns: usize,
}

impl Default for PacketLayout {
    fn default() -> Self {
        Self {
            frame_size: FRAME_SIZE,
            header: FRAME_HEADER.to_vec(),
            command: FRAME_COMMAND.to_vec(),
            footer: FRAME_FOOTER.to_vec(),
            bitmap_offset: BITMAP_OFFSET,
            row_stride: BITMAP_ROW_STRIDE,
            checksum_offset: CHECKSUM_OFFSET,
            max_rows: MAX_ROWS,
            max_columns: MAX_COLUMNS,
        }
    }
}

impl PacketLayout {
    /// Checks that every region fits in the frame without overlapping.
    pub fn validate(&self) -> Result<(), String> {
        let prefix = self.header.len() + self.command.len();
        if self.max_columns == 0 || self.max_columns % 8 != 0 {
            return Err("max_columns must be a positive multiple of 8".into());
        }
        let bytes_per_row = self.max_columns / 8;
        if self.row_stride < bytes_per_row {
            return Err(format!(
                "row_stride {} cannot hold {} columns",
                self.row_stride, self.max_columns
            ));
        }
        if self.bitmap_offset < prefix {
            return Err("bitmap overlaps header/command".into());
        }
        let bitmap_end = self.bitmap_offset + self.row_stride * self.max_rows.saturating_sub(1)
            + bytes_per_row;
        if bitmap_end > self.checksum_offset {
            return Err("bitmap overlaps checksum".into());
        }
        if self.checksum_offset + 1 + self.footer.len() > self.frame_size {
            return Err("checksum/footer exceed frame size".into());
        }
        Ok(())
    }

    fn bit_for(&self, position: GridPosition) -> Option<(usize, u8)> {
        if position.row >= self.max_rows || position.column >= self.max_columns {
            return None;
        }
        let byte = self.bitmap_offset + self.row_stride * position.row + position.column / 8;
        Some((byte, 1 << (position.column % 8)))
    }

    fn footer_offset(&self) -> usize {
        self.frame_size - self.footer.len()
    }
}

/// What a packet addresses, for logging and inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketTarget {
    /// A single device command applied to the current on-set.
    Device {
        id: DeviceId,
        command: PowerCommand,
    },
    /// An absolute frame listing every device that should be on.
    Frame { powered_on: usize },
}

impl fmt::Display for PacketTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device { id, command } => write!(f, "{} {}", command, id),
            Self::Frame { powered_on } => write!(f, "frame ({} on)", powered_on),
        }
    }
}

/// A fully built frame and where to send it.
#[derive(Debug, Clone)]
pub struct CommandPacket {
    pub bytes: Bytes,
    pub destination: SocketAddr,
    pub target: PacketTarget,
}

impl CommandPacket {
    /// Lowercase hex dump of the frame.
    pub fn hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Builds receiver frames for a fixed controller destination.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    layout: PacketLayout,
    destination: SocketAddr,
}

impl PacketBuilder {
    /// # Errors
    ///
    /// Returns [`BroadcastError::Configuration`] if the layout is inconsistent.
    pub fn new(layout: PacketLayout, destination: SocketAddr) -> BroadcastResult<Self> {
        layout
            .validate()
            .map_err(|e| BroadcastError::Configuration(format!("packet layout: {}", e)))?;
        Ok(Self {
            layout,
            destination,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Returns `true` if the protocol can address `position`.
    pub fn supports(&self, position: GridPosition) -> bool {
        self.layout.bit_for(position).is_some()
    }

    /// Builds the frame commanding one device on or off.
    ///
    /// The receiver treats every frame as the full on-set, so `current_on`
    /// carries the positions that are already on; the result is that set with
    /// the device's bit set or cleared.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::UnsupportedDevice`] if the device's position
    /// (or any of `current_on`) is outside the addressable range.
    pub fn build(
        &self,
        device: &Device,
        command: PowerCommand,
        current_on: &[GridPosition],
    ) -> BroadcastResult<CommandPacket> {
        let (byte, mask) = self.layout.bit_for(device.position).ok_or_else(|| {
            BroadcastError::UnsupportedDevice(format!(
                "{} at row {}, column {} (receiver addresses {}x{})",
                device.id,
                device.position.row + 1,
                device.position.column + 1,
                self.layout.max_rows,
                self.layout.max_columns
            ))
        })?;

        let mut frame = self.base_frame();
        self.set_bits(&mut frame, current_on)?;
        match command {
            PowerCommand::PowerOn => frame[byte] |= mask,
            PowerCommand::PowerOff => frame[byte] &= !mask,
        }
        Ok(self.finish(
            frame,
            PacketTarget::Device {
                id: device.id.clone(),
                command,
            },
        ))
    }

    /// Builds an absolute frame in which exactly `powered_on` are on.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::UnsupportedDevice`] for any unaddressable position.
    pub fn build_frame(&self, powered_on: &[GridPosition]) -> BroadcastResult<CommandPacket> {
        let mut frame = self.base_frame();
        self.set_bits(&mut frame, powered_on)?;
        Ok(self.finish(
            frame,
            PacketTarget::Frame {
                powered_on: powered_on.len(),
            },
        ))
    }

    /// Validates a frame and returns the positions whose bits are set.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::InvalidRequest`] describing the first
    /// mismatch (length, header, checksum, footer).
    pub fn decode_frame(&self, bytes: &[u8]) -> BroadcastResult<Vec<GridPosition>> {
        let layout = &self.layout;
        if bytes.len() != layout.frame_size {
            return Err(BroadcastError::InvalidRequest(format!(
                "frame length {} (expected {})",
                bytes.len(),
                layout.frame_size
            )));
        }
        if !bytes.starts_with(&layout.header) {
            return Err(BroadcastError::InvalidRequest("frame header mismatch".into()));
        }
        let expected = checksum(&bytes[..layout.checksum_offset]);
        if bytes[layout.checksum_offset] != expected {
            return Err(BroadcastError::InvalidRequest(format!(
                "checksum {:02x} (expected {:02x})",
                bytes[layout.checksum_offset], expected
            )));
        }
        if bytes[layout.footer_offset()..] != layout.footer[..] {
            return Err(BroadcastError::InvalidRequest("frame footer mismatch".into()));
        }

        let mut positions = Vec::new();
        for row in 0..layout.max_rows {
            for column in 0..layout.max_columns {
                let position = GridPosition::new(row, column);
                if let Some((byte, mask)) = layout.bit_for(position) {
                    if bytes[byte] & mask != 0 {
                        positions.push(position);
                    }
                }
            }
        }
        Ok(positions)
    }

    fn base_frame(&self) -> Vec<u8> {
        let layout = &self.layout;
        let mut frame = vec![0u8; layout.frame_size];
        frame[..layout.header.len()].copy_from_slice(&layout.header);
        let command_end = layout.header.len() + layout.command.len();
        frame[layout.header.len()..command_end].copy_from_slice(&layout.command);
        frame
    }

    fn set_bits(&self, frame: &mut [u8], positions: &[GridPosition]) -> BroadcastResult<()> {
        for &position in positions {
            let (byte, mask) = self.layout.bit_for(position).ok_or_else(|| {
                BroadcastError::UnsupportedDevice(format!(
                    "row {}, column {}",
                    position.row + 1,
                    position.column + 1
                ))
            })?;
            frame[byte] |= mask;
        }
        Ok(())
    }

    fn finish(&self, mut frame: Vec<u8>, target: PacketTarget) -> CommandPacket {
        let layout = &self.layout;
        frame[layout.checksum_offset] = checksum(&frame[..layout.checksum_offset]);
        let footer_offset = layout.footer_offset();
        frame[footer_offset..].copy_from_slice(&layout.footer);
        CommandPacket {
            bytes: Bytes::from(frame),
            destination: self.destination,
            target,
        }
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}
