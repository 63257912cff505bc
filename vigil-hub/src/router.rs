//! Message fan-out: worker output to viewers and the detection service,
//! engine results to viewers, the record store and the webhook sink.
//!
//! Every delivery is best-effort. Nothing here applies backpressure to
//! the ingestion loops; under sustained overload the detection channel
//! and slow viewers drop messages, which is the accepted tradeoff.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_core::message::{
    DetectionFrame, EngineMessage, StreamMessage, ViewerMessage, WebhookEvent, WorkerMessage,
};
use vigil_core::stats::StatsRegistry;

use crate::ephemeral::{EphemeralState, MotionSample};
use crate::store::{MomentRecord, RecordStore};
use crate::viewer::ViewerRegistry;
use crate::webhook::WebhookSink;

pub struct Router {
    viewers: Arc<ViewerRegistry>,
    detection_tx: mpsc::Sender<DetectionFrame>,
    store: Arc<dyn RecordStore>,
    stats: Arc<StatsRegistry>,
    ephemeral: Arc<EphemeralState>,
    webhook: Option<WebhookSink>,
}

impl Router {
    pub fn new(
        viewers: Arc<ViewerRegistry>,
        detection_tx: mpsc::Sender<DetectionFrame>,
        store: Arc<dyn RecordStore>,
        stats: Arc<StatsRegistry>,
        ephemeral: Arc<EphemeralState>,
        webhook: Option<WebhookSink>,
    ) -> Self {
        Self {
            viewers,
            detection_tx,
            store,
            stats,
            ephemeral,
            webhook,
        }
    }

    /// Consume both inbound channels until they close.
    pub async fn run(
        &self,
        mut worker_rx: mpsc::Receiver<WorkerMessage>,
        mut engine_rx: mpsc::Receiver<EngineMessage>,
    ) {
        loop {
            tokio::select! {
                Some(msg) = worker_rx.recv() => self.handle_worker(msg).await,
                Some(msg) = engine_rx.recv() => self.handle_engine(msg).await,
                else => break,
            }
        }
        info!("router channels closed, shutting down");
    }

    pub async fn handle_worker(&self, msg: WorkerMessage) {
        let WorkerMessage {
            stream_id,
            is_ephemeral,
            message,
        } = msg;

        match message {
            StreamMessage::Codec { info } => {
                self.viewers.broadcast(&ViewerMessage::Codec {
                    stream_id,
                    is_ephemeral,
                    info,
                });
            }
            StreamMessage::Frame { data, timestamp } => {
                self.viewers.broadcast(&ViewerMessage::Frame {
                    stream_id,
                    is_ephemeral,
                    data,
                    timestamp,
                });
            }
            StreamMessage::FrameFile { frame_id, data } => {
                // Fire-and-forget: detection cadence is decoupled from
                // streaming cadence, a full channel just drops the still.
                let frame = DetectionFrame {
                    stream_id,
                    frame_id,
                    data,
                };
                if self.detection_tx.try_send(frame).is_err() {
                    debug!("detection channel unavailable, dropping still");
                }
            }
            StreamMessage::MomentClipSaved {
                moment_id,
                clip_path,
            } => {
                info!(
                    stream_id = %stream_id,
                    moment_id = %moment_id,
                    clip_path = %clip_path.display(),
                    "moment clip saved"
                );
                if let Err(e) = self.store.update_moment_clip(&moment_id, clip_path).await {
                    warn!(moment_id = %moment_id, error = %e, "failed to record clip path");
                }
            }
            StreamMessage::Ended => {
                // Viewers learn of the end through the absence of frames.
                debug!(stream_id = %stream_id, "stream ended");
            }
        }
    }

    pub async fn handle_engine(&self, msg: EngineMessage) {
        match msg {
            EngineMessage::FrameDescription {
                stream_id,
                frame_id,
                description,
            } => {
                if let Err(e) = self
                    .store
                    .update_frame_description(&frame_id, &description)
                    .await
                {
                    warn!(frame_id = %frame_id, error = %e, "failed to store description");
                }

                self.viewers.broadcast(&ViewerMessage::AgentCard {
                    stream_id: stream_id.clone(),
                    frame_id: frame_id.clone(),
                    description: description.clone(),
                });

                if let Some(webhook) = &self.webhook {
                    webhook.deliver(WebhookEvent::Description {
                        created_at: Utc::now(),
                        stream_id,
                        frame_id,
                        description,
                    });
                }
            }
            EngineMessage::FrameEmbedding {
                frame_id,
                embedding,
                ..
            } => {
                let bytes: Vec<u8> = embedding
                    .iter()
                    .flat_map(|value| value.to_le_bytes())
                    .collect();
                if let Err(e) = self.store.update_frame_embedding(&frame_id, bytes).await {
                    warn!(frame_id = %frame_id, error = %e, "failed to store embedding");
                }
            }
            EngineMessage::FrameObjectDetection {
                stream_id,
                frame_id,
                objects,
            } => {
                self.viewers.broadcast(&ViewerMessage::FrameObjectDetection {
                    stream_id: stream_id.clone(),
                    frame_id: frame_id.clone(),
                    objects: objects.clone(),
                });

                if let Some(webhook) = &self.webhook {
                    webhook.deliver(WebhookEvent::ObjectDetection {
                        created_at: Utc::now(),
                        stream_id,
                        frame_id,
                        objects,
                    });
                }
            }
            EngineMessage::FrameMotionEnergy {
                stream_id,
                frame_id,
                motion_energy,
            } => {
                let stats = self.stats.record(&stream_id, motion_energy);

                self.viewers.broadcast(&ViewerMessage::FrameMotionEnergy {
                    stream_id: stream_id.clone(),
                    frame_id: frame_id.clone(),
                    motion_energy,
                    total_avg: stats.total_avg,
                    sma10: stats.sma10,
                });

                self.ephemeral.push_motion(MotionSample {
                    stream_id,
                    frame_id,
                    motion_energy,
                    total_avg: stats.total_avg,
                    sma10: stats.sma10,
                });
            }
            EngineMessage::MediaSummary { media_id, summary } => {
                let count = summary.moments.len();
                for moment in summary.moments {
                    let record = MomentRecord {
                        id: Uuid::new_v4().to_string(),
                        media_id: media_id.clone(),
                        from_time: moment.from_time,
                        to_time: moment.to_time,
                        what_old: moment.what_old,
                        what_new: moment.what_new,
                        importance_score: moment.importance_score,
                        labels: moment.labels,
                    };
                    if let Err(e) = self.store.insert_moment(record).await {
                        warn!(media_id = %media_id, error = %e, "failed to store moment");
                    }
                }
                info!(media_id = %media_id, count, "stored summarized moments");
            }
        }
    }
}
