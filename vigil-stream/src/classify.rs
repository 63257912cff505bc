//! Classifies a media source as file-based or live.

use tracing::{debug, info};
use vigil_core::media::MediaSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Bounded source with a known duration; frames are paced by PTS.
    File,
    /// Continuous source; frames are throttled, never paced.
    Live,
}

/// Detects whether a media source is a live stream or a file-based source.
///
/// Local paths are always `File`. Remote sources classify by the
/// container-reported duration: present and positive means a finished
/// recording served remotely (`File`); absent or non-positive means a
/// continuous transport (`Live`). There is no failure mode — an
/// unresolvable duration defaults to `Live`.
pub async fn detect_stream_type(uri: &str, source: &dyn MediaSource) -> StreamType {
    if tokio::fs::metadata(uri).await.is_ok() {
        debug!(uri = %uri, "detected local file");
        return StreamType::File;
    }

    let duration_us = source.duration_us();
    let stream_type = match duration_us {
        Some(d) if d > 0 => StreamType::File,
        _ => StreamType::Live,
    };

    info!(
        uri = %uri,
        duration_us = ?duration_us,
        stream_type = ?stream_type,
        "stream type detected"
    );

    stream_type
}
