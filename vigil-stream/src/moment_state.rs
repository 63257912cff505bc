//! Externally-mutated moment recording state, one handle per stream.
//!
//! Control messages write through the registry; the ingestion loop takes
//! one snapshot per decoded video frame. The lock keeps the three fields
//! coherent — a loop never observes a moment id from one command paired
//! with the discard flag of another.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MomentState {
    pub should_write_moment: bool,
    pub current_moment_id: Option<String>,
    pub discard_previous_maybe_moment: bool,
}

/// Synchronized handle to one stream's moment state.
#[derive(Debug, Clone, Default)]
pub struct MomentStateHandle {
    inner: Arc<RwLock<MomentState>>,
}

impl MomentStateHandle {
    #[must_use]
    pub fn new(initial: MomentState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MomentState {
        self.inner.read().clone()
    }

    pub fn set(&self, state: MomentState) {
        *self.inner.write() = state;
    }
}

/// Moment state keyed by stream id.
#[derive(Debug, Default)]
pub struct MomentStateRegistry {
    streams: DashMap<String, MomentStateHandle>,
}

impl MomentStateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream's state, replacing any previous handle.
    pub fn insert(&self, stream_id: &str, initial: MomentState) -> MomentStateHandle {
        let handle = MomentStateHandle::new(initial);
        self.streams.insert(stream_id.to_string(), handle.clone());
        handle
    }

    #[must_use]
    pub fn handle(&self, stream_id: &str) -> Option<MomentStateHandle> {
        self.streams.get(stream_id).map(|entry| entry.clone())
    }

    /// Write-through update, creating the handle when the stream is not
    /// yet registered (a moment command can race a stream start).
    pub fn set(&self, stream_id: &str, state: MomentState) {
        self.streams
            .entry(stream_id.to_string())
            .or_default()
            .set(state);
    }

    pub fn remove(&self, stream_id: &str) {
        self.streams.remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_sees_latest_write() {
        let registry = MomentStateRegistry::new();
        let handle = registry.insert(
            "cam-1",
            MomentState {
                should_write_moment: true,
                ..Default::default()
            },
        );

        registry.set(
            "cam-1",
            MomentState {
                should_write_moment: true,
                current_moment_id: Some("m1".to_string()),
                discard_previous_maybe_moment: false,
            },
        );

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.current_moment_id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_set_creates_missing_handle() {
        let registry = MomentStateRegistry::new();
        registry.set(
            "cam-2",
            MomentState {
                should_write_moment: false,
                current_moment_id: None,
                discard_previous_maybe_moment: true,
            },
        );

        let handle = registry.handle("cam-2").expect("created");
        assert!(handle.snapshot().discard_previous_maybe_moment);
    }

    #[test]
    fn test_remove_drops_handle() {
        let registry = MomentStateRegistry::new();
        registry.insert("cam-3", MomentState::default());
        registry.remove("cam-3");
        assert!(registry.handle("cam-3").is_none());
    }
}
