//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to the orchestrator.
//! It provides the router construction and server startup functionality.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::bootstrap::BootstrappedServices;
use crate::events::BroadcastEventBridge;
use crate::protocol_constants::HTTP_PORT_RANGE;
use crate::services::Orchestrator;
use crate::state::Config;

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the orchestrator.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast engine façade.
    pub orchestrator: Arc<Orchestrator>,
    /// Event bridge feeding server-sent event streams.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Application configuration (port, client allow-list).
    pub config: Arc<RwLock<Config>>,
}

impl AppState {
    /// Creates API state from bootstrapped services.
    pub fn new(services: &BootstrappedServices, config: Config) -> Self {
        Self {
            orchestrator: Arc::clone(&services.orchestrator),
            event_bridge: Arc::clone(&services.event_bridge),
            config: Arc::new(RwLock::new(config)),
        }
    }
}

async fn find_available_port(start: u16, end: u16) -> Result<(u16, TcpListener), ServerError> {
    for port in start..=end {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds the configured port, or the first free port in the default range
/// when none is configured.
pub async fn bind(state: &AppState) -> Result<(u16, TcpListener), ServerError> {
    let preferred_port = state.config.read().preferred_port;
    if preferred_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], preferred_port));
        Ok((preferred_port, TcpListener::bind(&addr).await?))
    } else {
        find_available_port(HTTP_PORT_RANGE.0, HTTP_PORT_RANGE.1).await
    }
}

/// Serves the API on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = http::create_router(state);

    // ConnectInfo<SocketAddr> is required by the client allow-list
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (port, listener) = bind(&state).await?;
    log::info!("Server listening on http://0.0.0.0:{}", port);
    serve(listener, state, shutdown).await
}
