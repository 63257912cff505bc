//! Message model: inbound control, worker output, engine results, viewer
//! fan-out and webhook payloads.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inbound control messages, keyed by stream/media id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    StartStream {
        id: String,
        uri: String,
        save_location: Option<PathBuf>,
        /// Defaults to recording moments when unset.
        should_record_moments: Option<bool>,
        /// Bounded replay of a previously recorded clip.
        #[serde(default)]
        is_ephemeral: bool,
        /// Starting offset for ephemeral replays, in seconds.
        init_seek_secs: Option<f64>,
    },
    StopStream {
        id: String,
    },
    SetMomentState {
        media_id: String,
        should_write_moment: bool,
        current_moment_id: Option<String>,
        discard_previous_maybe_moment: Option<bool>,
    },
}

/// Codec description emitted once per ingestion attempt, before any frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub mime_type: String,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub codec_string: String,
    /// `{mime_type}; codecs="{codec_string}"`, ready for a media source probe.
    pub full_codec: String,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// Messages produced by the ingestion loop, consumed by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Codec {
        #[serde(flatten)]
        info: CodecInfo,
    },
    Frame {
        data: Bytes,
        /// Media-relative milliseconds, stamped for ephemeral replays only.
        timestamp: Option<f64>,
    },
    /// An encoded still extracted for the detection service.
    FrameFile {
        frame_id: String,
        data: Bytes,
    },
    MomentClipSaved {
        moment_id: String,
        clip_path: PathBuf,
    },
    Ended,
}

/// One worker message with its session passthrough fields attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub stream_id: String,
    pub is_ephemeral: bool,
    #[serde(flatten)]
    pub message: StreamMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32,
    /// Normalized `[x, y, w, h]`.
    pub bbox: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMoment {
    pub from_time: f64,
    pub to_time: f64,
    pub what_old: String,
    pub what_new: String,
    pub importance_score: f64,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSummary {
    pub moments: Vec<SummaryMoment>,
}

/// Results arriving from the detection/inference engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    FrameDescription {
        stream_id: String,
        frame_id: String,
        description: String,
    },
    FrameEmbedding {
        stream_id: String,
        frame_id: String,
        embedding: Vec<f32>,
    },
    FrameObjectDetection {
        stream_id: String,
        frame_id: String,
        objects: Vec<DetectedObject>,
    },
    FrameMotionEnergy {
        stream_id: String,
        frame_id: String,
        motion_energy: f64,
    },
    MediaSummary {
        media_id: String,
        summary: MediaSummary,
    },
}

/// Messages fanned out to connected viewers. Best-effort; a slow viewer
/// drops messages rather than stalling the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    Codec {
        stream_id: String,
        is_ephemeral: bool,
        #[serde(flatten)]
        info: CodecInfo,
    },
    Frame {
        stream_id: String,
        is_ephemeral: bool,
        data: Bytes,
        timestamp: Option<f64>,
    },
    /// A frame description enriched into a card for the UI.
    AgentCard {
        stream_id: String,
        frame_id: String,
        description: String,
    },
    FrameObjectDetection {
        stream_id: String,
        frame_id: String,
        objects: Vec<DetectedObject>,
    },
    FrameMotionEnergy {
        stream_id: String,
        frame_id: String,
        motion_energy: f64,
        total_avg: f64,
        sma10: f64,
    },
}

/// Events relayed to the external webhook sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WebhookEvent {
    Description {
        created_at: DateTime<Utc>,
        stream_id: String,
        frame_id: String,
        description: String,
    },
    ObjectDetection {
        created_at: DateTime<Utc>,
        stream_id: String,
        frame_id: String,
        objects: Vec<DetectedObject>,
    },
}

/// Raw encoded still forwarded on the detection channel.
#[derive(Debug, Clone)]
pub struct DetectionFrame {
    pub stream_id: String,
    pub frame_id: String,
    pub data: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_round_trip() {
        let json = r#"{
            "type": "start_stream",
            "id": "cam-1",
            "uri": "rtsp://example.com/stream",
            "save_location": null,
            "should_record_moments": true,
            "init_seek_secs": null
        }"#;
        let msg: ControlMessage = serde_json::from_str(json).expect("parse");
        match msg {
            ControlMessage::StartStream {
                id, is_ephemeral, ..
            } => {
                assert_eq!(id, "cam-1");
                assert!(!is_ephemeral);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_stream_message_tags() {
        let msg = StreamMessage::Ended;
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "ended");

        let msg = StreamMessage::MomentClipSaved {
            moment_id: "m1".to_string(),
            clip_path: PathBuf::from("/tmp/m1.mkv"),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "moment_clip_saved");
        assert_eq!(json["moment_id"], "m1");
    }

    #[test]
    fn test_worker_message_flattens_payload() {
        let msg = WorkerMessage {
            stream_id: "cam-1".to_string(),
            is_ephemeral: false,
            message: StreamMessage::Frame {
                data: Bytes::from_static(b"\xff\xd8"),
                timestamp: Some(1500.0),
            },
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["type"], "frame");
        assert_eq!(json["stream_id"], "cam-1");
        assert_eq!(json["timestamp"], 1500.0);
    }

    #[test]
    fn test_webhook_event_shape() {
        let event = WebhookEvent::Description {
            created_at: Utc::now(),
            stream_id: "cam-1".to_string(),
            frame_id: "f1".to_string(),
            description: "a parked van".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "description");
        assert_eq!(json["data"]["frame_id"], "f1");
    }
}
