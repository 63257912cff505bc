//! Moment clip recording: the on-disk lifecycle of bounded event clips.
//!
//! A segment is opened under `{dir}/{media_id}/{media_id}_from_{ms}_ms.mkv`
//! with its container header written immediately. Finalizing writes the
//! trailer and renames the file to carry the close timestamp; discarding
//! (a false alarm) aborts without a trailer and deletes the file. At most
//! one segment is open per session.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

use vigil_core::error::Result;
use vigil_core::media::{ClipSink, CodecParameters, MediaEngine};

use crate::moment_state::MomentState;

const CLIP_EXTENSION: &str = "mkv";

/// One open moment clip.
pub struct MomentSegment {
    media_id: String,
    output_id: String,
    opened_at: DateTime<Utc>,
    file_path: PathBuf,
    stream_index: usize,
    sink: Box<dyn ClipSink>,
    /// Wall-clock origin for frame timestamps, latched on the first write.
    first_write: Option<Instant>,
}

impl MomentSegment {
    /// Open a new clip and write its container header.
    pub async fn open(
        engine: &dyn MediaEngine,
        media_id: &str,
        output_id: &str,
        params: &CodecParameters,
        base_dir: &Path,
    ) -> Result<Self> {
        let opened_at = Utc::now();
        let dir = base_dir.join(media_id);
        tokio::fs::create_dir_all(&dir).await?;

        let file_path = dir.join(format!(
            "{media_id}_from_{}_ms.{CLIP_EXTENSION}",
            opened_at.timestamp_millis()
        ));

        let sink = engine.clip_sink(&file_path, params).await?;
        let stream_index = sink.video_stream_index();

        Ok(Self {
            media_id: media_id.to_string(),
            output_id: output_id.to_string(),
            opened_at,
            file_path,
            stream_index,
            sink,
            first_write: None,
        })
    }

    #[must_use]
    pub fn output_id(&self) -> &str {
        &self.output_id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    #[must_use]
    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Write one encoded packet, stamped with elapsed wall-clock
    /// milliseconds since this segment's own first write. Source PTS is
    /// deliberately not used: wall-clock stamps stay monotonic even when
    /// the source frame rate is irregular.
    pub async fn write(&mut self, data: &Bytes) -> Result<()> {
        let now = Instant::now();
        let origin = *self.first_write.get_or_insert(now);
        let pts_ms = now.duration_since(origin).as_millis() as i64;
        self.sink.write(pts_ms, data).await
    }

    /// Write the trailer, rename to the closed filename and return the
    /// final path.
    pub async fn finalize(self) -> Result<PathBuf> {
        self.sink.finalize().await?;

        let closed_at = Utc::now();
        let closed_name = format!(
            "{}_from_{}_ms_to_{}_ms.{CLIP_EXTENSION}",
            self.media_id,
            self.opened_at.timestamp_millis(),
            closed_at.timestamp_millis()
        );
        let closed_path = self.file_path.with_file_name(closed_name);
        tokio::fs::rename(&self.file_path, &closed_path).await?;

        info!(
            from = %self.file_path.display(),
            to = %closed_path.display(),
            "closed moment clip"
        );
        Ok(closed_path)
    }

    /// Abort without a trailer and delete the file.
    pub async fn discard(self) -> Result<()> {
        self.sink.abort().await?;
        if let Err(e) = tokio::fs::remove_file(&self.file_path).await {
            error!(
                error = %e,
                path = %self.file_path.display(),
                "failed to delete false-alarm moment clip"
            );
        }
        Ok(())
    }
}

/// Emitted when a clip has been finalized and renamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSaved {
    pub moment_id: String,
    pub clip_path: PathBuf,
}

/// Per-session segment state machine, evaluated once per decoded video
/// frame against a moment-state snapshot.
pub struct SegmentWriter {
    media_id: String,
    base_dir: PathBuf,
    open: Option<MomentSegment>,
}

impl SegmentWriter {
    #[must_use]
    pub fn new(media_id: &str, base_dir: PathBuf) -> Self {
        Self {
            media_id: media_id.to_string(),
            base_dir,
            open: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Drive the segment lifecycle from the current moment-state snapshot.
    /// Returns a [`SegmentSaved`] when an open segment was finalized.
    pub async fn evaluate(
        &mut self,
        state: &MomentState,
        engine: &dyn MediaEngine,
        params: &CodecParameters,
    ) -> Result<Option<SegmentSaved>> {
        if state.should_write_moment {
            let rotate = match &self.open {
                None => true,
                Some(segment) => {
                    state.current_moment_id.as_deref() != Some(segment.output_id())
                }
            };
            if !rotate {
                return Ok(None);
            }

            let mut saved = None;
            if let Some(segment) = self.open.take() {
                info!(
                    media_id = %self.media_id,
                    output_id = %segment.output_id(),
                    "closing previous moment clip"
                );
                saved = Some(Self::finalize_segment(segment).await?);
            }

            if let Some(moment_id) = &state.current_moment_id {
                self.open = Some(
                    MomentSegment::open(engine, &self.media_id, moment_id, params, &self.base_dir)
                        .await?,
                );
            }
            return Ok(saved);
        }

        // Recording switched off while a segment is open: discard a false
        // alarm, otherwise finalize normally.
        if let Some(segment) = self.open.take() {
            if state.discard_previous_maybe_moment {
                info!(
                    media_id = %self.media_id,
                    output_id = %segment.output_id(),
                    "moment was a false alarm, deleting clip"
                );
                segment.discard().await?;
                return Ok(None);
            }
            return Ok(Some(Self::finalize_segment(segment).await?));
        }

        Ok(None)
    }

    /// Mirror one encoded packet into the open segment, if any.
    pub async fn write(&mut self, data: &Bytes) -> Result<()> {
        if let Some(segment) = &mut self.open {
            segment.write(data).await?;
        }
        Ok(())
    }

    /// Finalize any still-open segment. Called on every pipeline exit path
    /// so a clip is never left dangling with an open-state filename.
    pub async fn finish(&mut self) -> Result<Option<PathBuf>> {
        match self.open.take() {
            Some(segment) => Ok(Some(segment.finalize().await?)),
            None => Ok(None),
        }
    }

    async fn finalize_segment(segment: MomentSegment) -> Result<SegmentSaved> {
        let moment_id = segment.output_id().to_string();
        let clip_path = segment.finalize().await?;
        Ok(SegmentSaved {
            moment_id,
            clip_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockEngine;

    fn params() -> CodecParameters {
        CodecParameters {
            codec: "mjpeg".to_string(),
            width: 720,
            height: 405,
        }
    }

    fn writing_state(moment_id: &str) -> MomentState {
        MomentState {
            should_write_moment: true,
            current_moment_id: Some(moment_id.to_string()),
            discard_previous_maybe_moment: false,
        }
    }

    #[tokio::test]
    async fn test_open_writes_header_and_uses_open_naming() {
        let engine = MockEngine::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = SegmentWriter::new("cam-1", dir.path().to_path_buf());

        let saved = writer
            .evaluate(&writing_state("m1"), &engine, &params())
            .await
            .expect("evaluate");
        assert!(saved.is_none());
        assert!(writer.is_open());

        let clip_dir = dir.path().join("cam-1");
        let entries: Vec<_> = std::fs::read_dir(&clip_dir)
            .expect("clip dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with("cam-1_from_"));
        assert!(entries[0].ends_with("_ms.mkv"));
        assert!(!entries[0].contains("_to_"));
    }

    #[tokio::test]
    async fn test_finalize_renames_with_close_timestamp() {
        let engine = MockEngine::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = SegmentWriter::new("cam-1", dir.path().to_path_buf());

        writer
            .evaluate(&writing_state("m1"), &engine, &params())
            .await
            .expect("open");

        let saved = writer
            .evaluate(&MomentState::default(), &engine, &params())
            .await
            .expect("finalize")
            .expect("saved event");

        assert_eq!(saved.moment_id, "m1");
        let name = saved
            .clip_path
            .file_name()
            .expect("file name")
            .to_string_lossy()
            .to_string();
        assert!(name.contains("_to_"));
        assert!(saved.clip_path.exists());
        assert_eq!(engine.finalized_clips(), 1);

        // closed filename orders from <= to
        let parts: Vec<&str> = name
            .trim_end_matches("_ms.mkv")
            .split("_from_")
            .collect();
        let times: Vec<&str> = parts[1].split("_ms_to_").collect();
        let from: i64 = times[0].parse().expect("from ms");
        let to: i64 = times[1].parse().expect("to ms");
        assert!(to >= from);
    }

    #[tokio::test]
    async fn test_new_moment_id_rotates_segment() {
        let engine = MockEngine::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = SegmentWriter::new("cam-1", dir.path().to_path_buf());

        writer
            .evaluate(&writing_state("m1"), &engine, &params())
            .await
            .expect("open m1");
        let saved = writer
            .evaluate(&writing_state("m2"), &engine, &params())
            .await
            .expect("rotate")
            .expect("m1 saved");

        assert_eq!(saved.moment_id, "m1");
        assert!(writer.is_open());
        assert_eq!(engine.finalized_clips(), 1);
    }

    #[tokio::test]
    async fn test_same_moment_id_keeps_segment_open() {
        let engine = MockEngine::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = SegmentWriter::new("cam-1", dir.path().to_path_buf());

        writer
            .evaluate(&writing_state("m1"), &engine, &params())
            .await
            .expect("open");
        let saved = writer
            .evaluate(&writing_state("m1"), &engine, &params())
            .await
            .expect("re-evaluate");
        assert!(saved.is_none());
        assert_eq!(engine.opened_clips(), 1);
    }

    #[tokio::test]
    async fn test_discard_deletes_file_without_trailer() {
        let engine = MockEngine::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = SegmentWriter::new("cam-1", dir.path().to_path_buf());

        writer
            .evaluate(&writing_state("m1"), &engine, &params())
            .await
            .expect("open");

        let discard_state = MomentState {
            should_write_moment: false,
            current_moment_id: None,
            discard_previous_maybe_moment: true,
        };
        let saved = writer
            .evaluate(&discard_state, &engine, &params())
            .await
            .expect("discard");
        assert!(saved.is_none());
        assert_eq!(engine.finalized_clips(), 0);
        assert_eq!(engine.aborted_clips(), 1);

        let clip_dir = dir.path().join("cam-1");
        let remaining = std::fs::read_dir(&clip_dir)
            .expect("clip dir")
            .count();
        assert_eq!(remaining, 0, "discard must leave no file on disk");
    }

    #[tokio::test]
    async fn test_segment_timestamps_are_monotonic() {
        let engine = MockEngine::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = SegmentWriter::new("cam-1", dir.path().to_path_buf());

        writer
            .evaluate(&writing_state("m1"), &engine, &params())
            .await
            .expect("open");

        for _ in 0..5 {
            writer
                .write(&Bytes::from_static(b"frame"))
                .await
                .expect("write");
        }

        let stamps = engine.written_timestamps();
        assert_eq!(stamps.len(), 5);
        assert_eq!(stamps[0], 0, "first frame is stamped at the segment origin");
        for pair in stamps.windows(2) {
            assert!(pair[0] <= pair[1], "timestamps must not go backwards");
        }
    }

    #[tokio::test]
    async fn test_finish_closes_open_segment() {
        let engine = MockEngine::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = SegmentWriter::new("cam-1", dir.path().to_path_buf());

        writer
            .evaluate(&writing_state("m1"), &engine, &params())
            .await
            .expect("open");
        let path = writer.finish().await.expect("finish").expect("path");
        assert!(path.to_string_lossy().contains("_to_"));
        assert!(!writer.is_open());
        assert!(writer.finish().await.expect("idempotent").is_none());
    }
}
