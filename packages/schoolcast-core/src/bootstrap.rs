//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. Startup configuration is
//! validated here once; an inconsistent grid or frame layout fails fast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::audio::{CommandAudioBackend, CommandPlayer};
use crate::devices::{CommandTransport, DeviceRegistry, PacketBuilder, UdpTransport};
use crate::error::{BroadcastError, BroadcastResult};
use crate::events::{BroadcastEventBridge, EventEmitter};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::services::{Collaborators, Orchestrator};
use crate::state::Config;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Broadcast engine façade.
    pub orchestrator: Arc<Orchestrator>,
    /// Immutable device grid and groups.
    pub registry: Arc<DeviceRegistry>,
    /// Event bridge feeding SSE subscribers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// Cancelled once the queue consumer has exited.
    consumer_stopped: CancellationToken,
    consumer_started: Arc<AtomicBool>,
}

impl BootstrappedServices {
    /// Spawns the broadcast queue consumer. Subsequent calls are no-ops.
    pub fn start_background_tasks(&self) {
        if self.consumer_started.swap(true, Ordering::SeqCst) {
            log::debug!("[Bootstrap] Background tasks already started");
            return;
        }
        let orchestrator = Arc::clone(&self.orchestrator);
        let cancel = self.cancel_token.clone();
        let stopped = self.consumer_stopped.clone();
        self.spawner.spawn(async move {
            orchestrator.run_queue(cancel).await;
            stopped.cancel();
        });
        log::info!("[Bootstrap] Broadcast queue consumer spawned");
    }

    /// Initiates graceful shutdown of all services.
    ///
    /// A job that is already playing finishes (or times out) and runs its
    /// device cleanup before this returns.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();

        let pending = self.orchestrator.queue_status().pending.len();
        if pending > 0 {
            log::warn!("[Bootstrap] {} queued job(s) will not be played", pending);
        }
        let previews = self.orchestrator.list_previews().len();
        if previews > 0 {
            log::info!("[Bootstrap] Dropping {} pending preview(s)", previews);
        }
        if self.consumer_started.load(Ordering::SeqCst) {
            if self.orchestrator.queue_status().is_playing {
                log::info!("[Bootstrap] Waiting for the playing job to finish...");
            }
            self.consumer_stopped.cancelled().await;
        }
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Builds the registry and packet builder and checks they agree.
fn build_device_layer(config: &Config) -> BroadcastResult<(Arc<DeviceRegistry>, PacketBuilder)> {
    config.validate().map_err(BroadcastError::Configuration)?;

    let registry = DeviceRegistry::from_grid(&config.grid)?;
    let packets = PacketBuilder::new(config.packet_layout.clone(), config.controller_addr)?;

    if let Some(device) = registry
        .devices()
        .iter()
        .find(|d| !packets.supports(d.position))
    {
        return Err(BroadcastError::Configuration(format!(
            "device {} at row {}, column {} is outside the receiver's addressable range",
            device.id,
            device.position.row + 1,
            device.position.column + 1
        )));
    }

    log::info!(
        "[Bootstrap] Registry loaded: {} devices, {} groups, controller {}",
        registry.devices().len(),
        registry.groups().count(),
        packets.destination()
    );
    Ok((Arc::new(registry), packets))
}

/// Bootstraps all services with externally supplied collaborators.
///
/// Wiring order:
///
/// 1. Device layer (registry, packet builder), validated against each other
/// 2. Event bridge and cancellation token
/// 3. Orchestrator (owns the stores and the queue)
///
/// # Errors
///
/// Returns [`BroadcastError::Configuration`] if the configuration is
/// inconsistent.
pub fn bootstrap_with_collaborators(
    config: &Config,
    collaborators: Collaborators,
) -> BroadcastResult<BootstrappedServices> {
    let (registry, packets) = build_device_layer(config)?;

    let spawner = TokioSpawner::current();
    let event_bridge = Arc::new(BroadcastEventBridge::new(config.event_channel_capacity));
    let cancel_token = CancellationToken::new();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        packets,
        collaborators,
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        config.restore_enabled,
        config.playback_timeout_factor,
    ));

    Ok(BootstrappedServices {
        orchestrator,
        registry,
        event_bridge,
        spawner,
        cancel_token,
        consumer_stopped: CancellationToken::new(),
        consumer_started: Arc::new(AtomicBool::new(false)),
    })
}

/// Bootstraps all services with the UDP transport and external audio tools.
///
/// # Errors
///
/// Returns an error if the configuration is inconsistent or the UDP socket
/// cannot be bound.
pub async fn bootstrap_services(config: &Config) -> BroadcastResult<BootstrappedServices> {
    let transport = UdpTransport::bind()
        .await
        .map_err(|e| BroadcastError::Internal(format!("Failed to bind UDP socket: {}", e)))?;

    let collaborators = Collaborators {
        transport: Arc::new(transport) as Arc<dyn CommandTransport>,
        synthesizer: Arc::new(CommandAudioBackend::new(config.audio.clone())),
        playback: Arc::new(CommandPlayer::new(&config.audio)),
    };
    bootstrap_with_collaborators(config, collaborators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::PacketLayout;

    #[tokio::test]
    async fn default_config_bootstraps() {
        let services = bootstrap_services(&Config::default()).await.unwrap();
        assert_eq!(services.registry.devices().len(), 42);
        assert_eq!(services.orchestrator.device_states().len(), 42);

        services.start_background_tasks();
        services.shutdown().await;
        assert!(services.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn grid_wider_than_receiver_is_rejected() {
        let config = Config {
            packet_layout: PacketLayout {
                max_columns: 8,
                ..PacketLayout::default()
            },
            ..Config::default()
        };
        let err = bootstrap_services(&config).await.err().unwrap();
        assert!(matches!(err, BroadcastError::Configuration(_)));
    }

    #[tokio::test]
    async fn invalid_timeout_factor_is_rejected() {
        let config = Config {
            playback_timeout_factor: f64::NAN,
            ..Config::default()
        };
        assert!(matches!(
            bootstrap_services(&config).await,
            Err(BroadcastError::Configuration(_))
        ));
    }
}
