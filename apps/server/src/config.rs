//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use schoolcast_core::{AudioConfig, GridConfig, PacketLayout};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 = first free port in 8000-8010).
    /// Override: `SCHOOLCAST_BIND_PORT`
    pub bind_port: u16,

    /// IP address of the speaker power controller.
    /// Override: `SCHOOLCAST_CONTROLLER_IP`
    pub controller_ip: IpAddr,

    /// UDP port of the speaker power controller.
    /// Override: `SCHOOLCAST_CONTROLLER_PORT`
    pub controller_port: u16,

    /// Restore pre-broadcast power state instead of powering targets off.
    /// Override: `SCHOOLCAST_RESTORE_ENABLED`
    pub restore_enabled: bool,

    /// Hard playback timeout as a multiple of the estimated duration.
    pub playback_timeout_factor: f64,

    /// Client IPs admitted to the API. Empty admits everyone.
    pub allowed_ips: Vec<IpAddr>,

    /// Directory for generated audio and uploads.
    /// Override: `SCHOOLCAST_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Device grid. Defaults to the built-in school layout.
    pub grid: Option<GridConfig>,

    /// Receiver frame layout. Defaults to the captured receiver frame.
    pub packet_layout: Option<PacketLayout>,

    /// External audio tool commands.
    pub audio: Option<AudioConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = schoolcast_core::Config::default();
        Self {
            bind_port: core.preferred_port,
            controller_ip: core.controller_addr.ip(),
            controller_port: core.controller_addr.port(),
            restore_enabled: core.restore_enabled,
            playback_timeout_factor: core.playback_timeout_factor,
            allowed_ips: core.allowed_ips,
            data_dir: None,
            grid: None,
            packet_layout: None,
            audio: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("SCHOOLCAST_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }

        if let Some(ip) = lookup("SCHOOLCAST_CONTROLLER_IP").and_then(|v| v.parse().ok()) {
            self.controller_ip = ip;
        }

        if let Some(port) = lookup("SCHOOLCAST_CONTROLLER_PORT").and_then(|v| v.parse().ok()) {
            self.controller_port = port;
        }

        if let Some(enabled) = lookup("SCHOOLCAST_RESTORE_ENABLED").and_then(|v| parse_flag(&v)) {
            self.restore_enabled = enabled;
        }

        // Note: SCHOOLCAST_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to schoolcast-core's Config type.
    pub fn to_core_config(&self) -> schoolcast_core::Config {
        let mut audio = self.audio.clone().unwrap_or_default();
        if let Some(ref data_dir) = self.data_dir {
            audio.artifact_dir = data_dir.clone();
        }

        schoolcast_core::Config {
            preferred_port: self.bind_port,
            allowed_ips: self.allowed_ips.clone(),
            controller_addr: SocketAddr::new(self.controller_ip, self.controller_port),
            packet_layout: self.packet_layout.clone().unwrap_or_default(),
            grid: self.grid.clone().unwrap_or_default(),
            restore_enabled: self.restore_enabled,
            playback_timeout_factor: self.playback_timeout_factor,
            audio,
            ..Default::default()
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
