//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative transport implementations.

use super::{DeviceEvent, JobEvent, PreviewEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to clients (SSE, logs, tests).
pub trait EventEmitter: Send + Sync {
    /// Emits a preview lifecycle event.
    fn emit_preview(&self, event: PreviewEvent);

    /// Emits a job lifecycle event.
    fn emit_job(&self, event: JobEvent);

    /// Emits a device state event.
    fn emit_device(&self, event: DeviceEvent);
}

/// No-op emitter for tests and embedding without clients.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_preview(&self, _event: PreviewEvent) {}

    fn emit_job(&self, _event: JobEvent) {}

    fn emit_device(&self, _event: DeviceEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_preview(&self, event: PreviewEvent) {
        tracing::debug!(?event, "preview_event");
    }

    fn emit_job(&self, event: JobEvent) {
        tracing::debug!(?event, "job_event");
    }

    fn emit_device(&self, event: DeviceEvent) {
        tracing::debug!(?event, "device_event");
    }
}
