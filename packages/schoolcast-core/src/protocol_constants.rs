//! Fixed protocol and service constants.
//!
//! The receiver frame constants describe the captured hardware protocol and
//! are the defaults for [`PacketLayout`](crate::devices::PacketLayout).

use std::net::Ipv4Addr;

// ─────────────────────────────────────────────────────────────────────────────
// Receiver Frame
// ─────────────────────────────────────────────────────────────────────────────

/// Total length of one receiver command frame (bytes).
pub const FRAME_SIZE: usize = 46;

/// Frame header.
pub const FRAME_HEADER: [u8; 3] = [0x02, 0x2d, 0x00];

/// Command block following the header.
pub const FRAME_COMMAND: [u8; 7] = [0x43, 0x42, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Frame footer.
pub const FRAME_FOOTER: [u8; 2] = [0x03, 0x00];

/// Offset of the first device bitmap byte (row 0, columns 0..8).
pub const BITMAP_OFFSET: usize = 10;

/// Distance in bytes between the bitmap bytes of consecutive rows.
pub const BITMAP_ROW_STRIDE: usize = 4;

/// Byte holding the checksum (XOR of every byte before it).
pub const CHECKSUM_OFFSET: usize = 43;

/// Number of grid rows the receiver can address.
pub const MAX_ROWS: usize = 4;

/// Number of grid columns the receiver can address.
pub const MAX_COLUMNS: usize = 16;

/// Default controller address.
pub const DEFAULT_CONTROLLER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 200);

/// Default controller UDP port.
pub const DEFAULT_CONTROLLER_PORT: u16 = 22000;

// ─────────────────────────────────────────────────────────────────────────────
// Broadcast Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Name of the synthetic group containing every device.
pub const ALL_GROUP: &str = "all";

/// Prefix of generated preview identifiers.
pub const PREVIEW_ID_PREFIX: &str = "preview";

/// Prefix of generated job identifiers.
pub const JOB_ID_PREFIX: &str = "job";

/// Prefix of generated upload identifiers.
pub const UPLOAD_ID_PREFIX: &str = "upload";

/// Default hard playback timeout as a multiple of the estimated duration.
pub const DEFAULT_PLAYBACK_TIMEOUT_FACTOR: f64 = 2.0;

/// Number of resolved preview ids remembered for double-submission detection.
pub const RESOLVED_PREVIEW_MEMORY: usize = 256;

/// Fallback duration estimate for uploaded audio that cannot be probed (seconds).
pub const DEFAULT_AUDIO_DURATION_SECS: f64 = 30.0;

/// Duration assumed for a start or end signal that cannot be probed (seconds).
pub const DEFAULT_SIGNAL_DURATION_SECS: f64 = 3.0;

/// Longest broadcast a preview may carry (seconds).
pub const MAX_BROADCAST_DURATION_SECS: f64 = 3600.0;

/// Minimum duration estimate for synthesized speech (seconds).
pub const MIN_TEXT_DURATION_SECS: f64 = 3.0;

/// Estimated speech time per character of text (seconds).
pub const TEXT_SECS_PER_CHAR: f64 = 0.3;

// ─────────────────────────────────────────────────────────────────────────────
// Service Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "schoolcast";

/// Capacity of the event broadcast channel for SSE clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Port range scanned when no HTTP port is configured.
pub const HTTP_PORT_RANGE: (u16, u16) = (8000, 8010);

/// Maximum accepted audio upload body (bytes).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Speech language used when a text broadcast names none.
pub const DEFAULT_TEXT_LANGUAGE: &str = "ko";
