//! Connected-viewer registry with best-effort broadcast.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use vigil_core::message::ViewerMessage;

const VIEWER_CHANNEL_CAPACITY: usize = 256;

/// Viewers keyed by connection id. Delivery is best-effort: a viewer
/// whose channel is full misses messages, a closed channel removes the
/// viewer on the next broadcast.
#[derive(Debug, Default)]
pub struct ViewerRegistry {
    viewers: DashMap<Uuid, mpsc::Sender<ViewerMessage>>,
}

impl ViewerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new viewer connection; the receiver side belongs to the
    /// connection handler.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<ViewerMessage>) {
        let (tx, rx) = mpsc::channel(VIEWER_CHANNEL_CAPACITY);
        let id = Uuid::new_v4();
        self.viewers.insert(id, tx);
        (id, rx)
    }

    pub fn remove(&self, id: Uuid) {
        self.viewers.remove(&id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.viewers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.viewers.is_empty()
    }

    pub fn broadcast(&self, message: &ViewerMessage) {
        let mut closed = Vec::new();
        for entry in &self.viewers {
            match entry.value().try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(viewer = %entry.key(), "viewer channel full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        for id in closed {
            self.viewers.remove(&id);
        }
    }
}
