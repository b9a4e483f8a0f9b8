//! Core configuration.
//!
//! [`Config`] holds everything the composition root needs: network endpoints,
//! restore policy, the receiver frame layout, the device grid and the audio
//! tool settings. All fields have sensible defaults.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::devices::{GridConfig, PacketLayout};
use crate::protocol_constants::{
    DEFAULT_CONTROLLER_IP, DEFAULT_CONTROLLER_PORT, DEFAULT_HTTP_PORT,
    DEFAULT_PLAYBACK_TIMEOUT_FACTOR, EVENT_CHANNEL_CAPACITY,
};

/// Configuration for the Schoolcast engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Server
    /// Port for the HTTP server (0 = auto-allocate).
    pub preferred_port: u16,

    /// Client IPs admitted to the API. Empty admits everyone.
    pub allowed_ips: Vec<IpAddr>,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,

    // Hardware
    /// UDP address of the speaker power controller.
    pub controller_addr: SocketAddr,

    /// Receiver frame layout.
    pub packet_layout: PacketLayout,

    /// Device grid and named groups.
    pub grid: GridConfig,

    // Broadcasts
    /// Restore pre-broadcast power state instead of powering off.
    pub restore_enabled: bool,

    /// Hard playback timeout as a multiple of the estimated duration.
    pub playback_timeout_factor: f64,

    /// External audio tools.
    pub audio: AudioConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: DEFAULT_HTTP_PORT,
            allowed_ips: Vec::new(),
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
            controller_addr: SocketAddr::new(
                IpAddr::V4(DEFAULT_CONTROLLER_IP),
                DEFAULT_CONTROLLER_PORT,
            ),
            packet_layout: PacketLayout::default(),
            grid: GridConfig::default(),
            restore_enabled: true,
            playback_timeout_factor: DEFAULT_PLAYBACK_TIMEOUT_FACTOR,
            audio: AudioConfig::default(),
        }
    }
}

impl Config {
    /// Validates scalar settings. Grid and layout consistency is checked when
    /// the registry and packet builder are constructed.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.playback_timeout_factor.is_finite() && self.playback_timeout_factor >= 1.0) {
            return Err(format!(
                "playback_timeout_factor must be >= 1.0 (got {})",
                self.playback_timeout_factor
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }
}
