//! Schoolcast Core - broadcast orchestration for classroom speakers.
//!
//! This crate turns an operator's request ("play this announcement in grade 1")
//! into a reviewed, queued and executed broadcast: speakers are powered on
//! through the receiver's UDP frame protocol, the audio is played, and the
//! speakers are powered off or restored afterwards.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`devices`]: Device grid registry, receiver frames, power state cache and transport
//! - [`audio`]: Speech synthesis, upload conversion and playback collaborators
//! - [`services`]: Preview store, broadcast queue and the orchestrator
//! - [`events`]: Event system for server-sent event clients
//! - [`api`]: HTTP surface
//! - [`state`]: Configuration
//! - [`runtime`]: Task spawning abstraction
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple the engine from its
//! collaborators:
//!
//! - [`CommandTransport`](devices::CommandTransport): Delivering command frames
//! - [`AudioSynthesizer`](audio::AudioSynthesizer): Producing preview audio
//! - [`AudioPlayback`](audio::AudioPlayback): Playing an artifact to completion
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//!
//! Each trait has a default implementation used by the standalone server.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod devices;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{BroadcastError, BroadcastResult, ErrorCode};
pub use events::{BroadcastEvent, BroadcastEventBridge, EventEmitter};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::Config;
pub use utils::now_millis;

// Re-export device and audio types
pub use audio::{AudioConfig, AudioPlayback, AudioSynthesizer};
pub use devices::{
    CommandTransport, DeviceId, DeviceRegistry, GridConfig, PacketBuilder, PacketLayout,
    PowerCommand,
};

// Re-export service types
pub use services::{BroadcastRequest, Collaborators, Orchestrator};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_with_collaborators, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, ServerError};
