//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! and transport concerns, mapping typed domain events to the channel that
//! server-sent event streams subscribe to.

use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, DeviceEvent, JobEvent, PreviewEvent};

/// Bridges domain events to the SSE broadcast channel.
///
/// Sending with no subscribers is not an error; the event is dropped.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_preview, PreviewEvent, Preview);
    impl_emit!(emit_job, JobEvent, Job);
    impl_emit!(emit_device, DeviceEvent, Device);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bridge = BroadcastEventBridge::new(8);
        let mut rx = bridge.subscribe();

        bridge.emit_device(DeviceEvent::RestoreToggled {
            enabled: false,
            timestamp: 1,
        });

        match rx.recv().await.unwrap() {
            BroadcastEvent::Device(DeviceEvent::RestoreToggled { enabled, .. }) => {
                assert!(!enabled)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.emit_job(JobEvent::Removed {
            job_id: "job".into(),
            timestamp: 0,
        });
    }
}
