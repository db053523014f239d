//! Upload lifecycle notifications.

use hopper_core::{HookEvent, UploadInfo};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A lifecycle transition and the record it applies to.
#[derive(Clone, Debug, Serialize)]
pub struct UploadEvent {
    #[serde(rename = "type")]
    pub kind: HookEvent,
    pub upload: UploadInfo,
}

/// Non-blocking fan-out of lifecycle events.
///
/// Publishing never waits and never fails the operation that triggered it:
/// with no subscribers the event is dropped, and slow subscribers observe a
/// lag instead of back-pressuring the engine.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, kind: HookEvent, upload: &UploadInfo) {
        let event = UploadEvent {
            kind,
            upload: upload.clone(),
        };
        if self.tx.send(event).is_err() {
            tracing::trace!(event = %kind, "No lifecycle subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
