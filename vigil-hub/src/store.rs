//! Record persistence contract. Actual storage is an external
//! collaborator; the router only depends on this seam.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

/// A derived moment record persisted from a multi-moment summary.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentRecord {
    pub id: String,
    pub media_id: String,
    pub from_time: f64,
    pub to_time: f64,
    pub what_old: String,
    pub what_new: String,
    pub importance_score: f64,
    pub labels: Vec<String>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn update_frame_description(
        &self,
        frame_id: &str,
        description: &str,
    ) -> anyhow::Result<()>;

    /// Embedding vectors are stored as raw little-endian f32 bytes.
    async fn update_frame_embedding(&self, frame_id: &str, embedding: Vec<u8>)
        -> anyhow::Result<()>;

    async fn insert_moment(&self, record: MomentRecord) -> anyhow::Result<()>;

    async fn update_moment_clip(&self, moment_id: &str, clip_path: PathBuf)
        -> anyhow::Result<()>;
}

/// In-memory store for tests and hosts running without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    descriptions: Mutex<HashMap<String, String>>,
    embeddings: Mutex<HashMap<String, Vec<u8>>>,
    moments: Mutex<Vec<MomentRecord>>,
    clip_paths: Mutex<HashMap<String, PathBuf>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn description(&self, frame_id: &str) -> Option<String> {
        self.descriptions.lock().get(frame_id).cloned()
    }

    #[must_use]
    pub fn embedding(&self, frame_id: &str) -> Option<Vec<u8>> {
        self.embeddings.lock().get(frame_id).cloned()
    }

    #[must_use]
    pub fn moments(&self) -> Vec<MomentRecord> {
        self.moments.lock().clone()
    }

    #[must_use]
    pub fn clip_path(&self, moment_id: &str) -> Option<PathBuf> {
        self.clip_paths.lock().get(moment_id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn update_frame_description(
        &self,
        frame_id: &str,
        description: &str,
    ) -> anyhow::Result<()> {
        self.descriptions
            .lock()
            .insert(frame_id.to_string(), description.to_string());
        Ok(())
    }

    async fn update_frame_embedding(
        &self,
        frame_id: &str,
        embedding: Vec<u8>,
    ) -> anyhow::Result<()> {
        self.embeddings.lock().insert(frame_id.to_string(), embedding);
        Ok(())
    }

    async fn insert_moment(&self, record: MomentRecord) -> anyhow::Result<()> {
        self.moments.lock().push(record);
        Ok(())
    }

    async fn update_moment_clip(
        &self,
        moment_id: &str,
        clip_path: PathBuf,
    ) -> anyhow::Result<()> {
        self.clip_paths
            .lock()
            .insert(moment_id.to_string(), clip_path);
        Ok(())
    }
}
