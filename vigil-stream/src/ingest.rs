//! One ingestion-loop attempt: open, probe, pace, transcode and emit.
//!
//! The loop owns all attempt-local state (timing, the open segment) and
//! releases it on every exit path. Per-packet faults are logged and the
//! loop moves on; only open/read/decode-level faults end the attempt and
//! surface to the supervisor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vigil_core::config::Config;
use vigil_core::error::{Result, StreamError};
use vigil_core::media::{
    output_dimensions, should_skip_transcode, AudioStreamInfo, MediaEngine, MediaPacket,
    MediaSource, VideoDecoder, VideoEncoder, VideoFilter, VideoFrame, VideoStreamInfo,
};
use vigil_core::message::{CodecInfo, StreamMessage, WorkerMessage};

use crate::classify::{detect_stream_type, StreamType};
use crate::moment_state::MomentStateHandle;
use crate::read::{next_packet, ReadOutcome};
use crate::segment::SegmentWriter;
use crate::supervisor::SessionDriver;
use crate::timing::{TimingAction, TimingPhase, TimingState};

/// One active source, owned exclusively by its supervisor task.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub id: String,
    pub source_uri: String,
    pub is_ephemeral: bool,
    pub save_location: Option<PathBuf>,
    pub init_seek_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub read_timeout: Duration,
    pub live_max_fps: u32,
    pub max_dimension: u32,
    pub moments_dir: PathBuf,
}

impl IngestSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_timeout: config.ingest.read_timeout(),
            live_max_fps: config.ingest.live_max_fps,
            max_dimension: config.ingest.max_dimension,
            moments_dir: config.recording.moments_dir.clone(),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything one attempt needs; recreated state (timing, segments) lives
/// inside [`run_attempt`] and dies with it.
pub struct IngestContext {
    pub session: StreamSession,
    pub engine: Arc<dyn MediaEngine>,
    pub moment_state: MomentStateHandle,
    pub output: mpsc::Sender<WorkerMessage>,
    pub cancel: CancellationToken,
    pub settings: IngestSettings,
}

#[async_trait::async_trait]
impl SessionDriver for IngestContext {
    async fn run_once(&mut self) -> Result<()> {
        run_attempt(self).await
    }
}

struct Stages<'a> {
    source: &'a mut dyn MediaSource,
    decoder: &'a mut dyn VideoDecoder,
    filter: &'a mut dyn VideoFilter,
    encoder: &'a mut dyn VideoEncoder,
}

/// Drive one attempt to completion. `Ok(())` means the source was
/// exhausted or the session was cancelled; anything else is retryable.
pub async fn run_attempt(ctx: &IngestContext) -> Result<()> {
    let uri = &ctx.session.source_uri;
    info!(stream_id = %ctx.session.id, uri = %uri, "opening media source");

    let options = vigil_core::media::OpenOptions {
        rtsp_tcp: uri.to_lowercase().starts_with("rtsp://"),
    };
    let mut source = ctx.engine.open(uri, options).await?;

    let video = source.video().cloned().ok_or(StreamError::NoVideoStream)?;
    let audio = source.audio().cloned();

    let mut decoder = ctx.engine.video_decoder(&video).await?;

    let (out_width, out_height) =
        output_dimensions(video.width, video.height, ctx.settings.max_dimension);
    info!(
        stream_id = %ctx.session.id,
        width = out_width,
        height = out_height,
        "scaling video output"
    );

    let passthrough = should_skip_transcode(&video);
    debug!(
        stream_id = %ctx.session.id,
        passthrough,
        codec = %video.codec,
        "transcode decision"
    );

    let mut filter = ctx.engine.video_filter(&video, out_width, out_height).await?;

    let codec_info = build_codec_info(out_width, out_height, &video, audio.as_ref());
    info!(stream_id = %ctx.session.id, full_codec = %codec_info.full_codec, "initialized stream codecs");
    emit(ctx, StreamMessage::Codec { info: codec_info }).await;

    let mut encoder = ctx
        .engine
        .video_encoder(&video, video.avg_frame_rate)
        .await?;

    if let Some(seconds) = ctx.session.init_seek_secs {
        source.seek(seconds).await?;
    }

    // Ephemeral replays have a bounded duration by construction.
    let stream_type = if ctx.session.is_ephemeral {
        StreamType::File
    } else {
        detect_stream_type(uri, source.as_ref()).await
    };
    info!(
        stream_id = %ctx.session.id,
        stream_type = ?stream_type,
        is_ephemeral = ctx.session.is_ephemeral,
        frame_rate = ?video.avg_frame_rate,
        "stream timing configuration"
    );

    let mut timing = TimingState::new(video.avg_frame_rate, ctx.settings.live_max_fps);

    let base_dir = ctx
        .session
        .save_location
        .clone()
        .unwrap_or_else(|| ctx.settings.moments_dir.clone());
    let mut segments = SegmentWriter::new(&ctx.session.id, base_dir);

    info!(stream_id = %ctx.session.id, "entering main streaming loop");

    let mut stages = Stages {
        source: source.as_mut(),
        decoder: decoder.as_mut(),
        filter: filter.as_mut(),
        encoder: encoder.as_mut(),
    };

    let loop_result = drive_loop(
        ctx,
        &mut stages,
        &video,
        stream_type,
        passthrough,
        &mut timing,
        &mut segments,
    )
    .await;

    // A still-open segment is finalized on every exit path, including
    // failures and cancellation.
    match segments.finish().await {
        Ok(Some(path)) => {
            info!(stream_id = %ctx.session.id, path = %path.display(), "closed moment clip at stream end");
        }
        Ok(None) => {}
        Err(e) => {
            warn!(stream_id = %ctx.session.id, error = %e, "failed to finalize moment clip at stream end");
        }
    }

    loop_result?;

    info!(stream_id = %ctx.session.id, "streaming loop ended");
    emit(ctx, StreamMessage::Ended).await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn drive_loop(
    ctx: &IngestContext,
    stages: &mut Stages<'_>,
    video: &VideoStreamInfo,
    stream_type: StreamType,
    passthrough: bool,
    timing: &mut TimingState,
    segments: &mut SegmentWriter,
) -> Result<()> {
    loop {
        let packet =
            match next_packet(stages.source, &ctx.cancel, ctx.settings.read_timeout).await? {
                ReadOutcome::Packet(packet) => packet,
                ReadOutcome::Ended => {
                    info!(stream_id = %ctx.session.id, "source exhausted");
                    return Ok(());
                }
                ReadOutcome::Cancelled => {
                    info!(stream_id = %ctx.session.id, "session cancelled, ending loop");
                    return Ok(());
                }
                ReadOutcome::TimedOut => {
                    warn!(stream_id = %ctx.session.id, "timed out waiting for source packet");
                    return Err(StreamError::ReadTimeout);
                }
            };

        if packet.stream_index != video.index {
            continue;
        }

        // Moment recording reacts to external state once per video frame.
        if !ctx.session.is_ephemeral {
            let snapshot = ctx.moment_state.snapshot();
            let params = stages.encoder.codec_parameters();
            if let Some(saved) = segments
                .evaluate(&snapshot, ctx.engine.as_ref(), &params)
                .await?
            {
                info!(
                    stream_id = %ctx.session.id,
                    moment_id = %saved.moment_id,
                    clip_path = %saved.clip_path.display(),
                    "moment ended, notifying with final clip path"
                );
                emit(
                    ctx,
                    StreamMessage::MomentClipSaved {
                        moment_id: saved.moment_id,
                        clip_path: saved.clip_path,
                    },
                )
                .await;
            }
        }

        let Some(frame) = stages.decoder.decode(&packet).await? else {
            continue;
        };

        let action = timing
            .apply(stream_type, TimingPhase::PreProcess, packet.pts, video.time_base)
            .await;
        if action == TimingAction::Skip {
            continue;
        }

        // Media-relative timestamps drive UI progress for clip replays.
        let timestamp = if ctx.session.is_ephemeral {
            timing.pts_elapsed_ms(packet.pts, video.time_base).map(|ms| {
                ctx.session.init_seek_secs.unwrap_or(0.0) * 1000.0 + ms
            })
        } else {
            None
        };

        // A fault in one frame never ends the attempt.
        if let Err(e) =
            process_packet(ctx, stages, segments, &packet, &frame, passthrough, timestamp).await
        {
            error!(stream_id = %ctx.session.id, error = %e, "error processing packet");
        }

        timing
            .apply(stream_type, TimingPhase::PostProcess, packet.pts, video.time_base)
            .await;
    }
}

async fn process_packet(
    ctx: &IngestContext,
    stages: &mut Stages<'_>,
    segments: &mut SegmentWriter,
    packet: &MediaPacket,
    frame: &VideoFrame,
    passthrough: bool,
    timestamp: Option<f64>,
) -> Result<()> {
    let Some(filtered) = stages.filter.process(frame).await? else {
        return Ok(());
    };

    if passthrough {
        // Source payload is already streamable; encode only for the
        // detection still and the open moment clip.
        emit(
            ctx,
            StreamMessage::Frame {
                data: packet.data.clone(),
                timestamp,
            },
        )
        .await;

        if let Some(encoded) = stages.encoder.encode(&filtered).await? {
            emit_detection_still(ctx, &encoded).await;
            segments.write(&encoded.data).await?;
        }
    } else if let Some(encoded) = stages.encoder.encode(&filtered).await? {
        emit(
            ctx,
            StreamMessage::Frame {
                data: encoded.data.clone(),
                timestamp,
            },
        )
        .await;
        emit_detection_still(ctx, &encoded).await;
        segments.write(&encoded.data).await?;
    }

    Ok(())
}

async fn emit_detection_still(ctx: &IngestContext, encoded: &MediaPacket) {
    emit(
        ctx,
        StreamMessage::FrameFile {
            frame_id: Uuid::new_v4().to_string(),
            data: encoded.data.clone(),
        },
    )
    .await;
}

async fn emit(ctx: &IngestContext, message: StreamMessage) {
    let msg = WorkerMessage {
        stream_id: ctx.session.id.clone(),
        is_ephemeral: ctx.session.is_ephemeral,
        message,
    };
    if ctx.output.send(msg).await.is_err() {
        debug!(stream_id = %ctx.session.id, "output channel closed, dropping message");
    }
}

fn build_codec_info(
    width: u32,
    height: u32,
    video: &VideoStreamInfo,
    audio: Option<&AudioStreamInfo>,
) -> CodecInfo {
    let codec_string = match audio {
        Some(a) => format!("{},{}", video.codec_string, a.codec_string),
        None => video.codec_string.clone(),
    };
    let mime_type = video.mime_type.clone();
    let full_codec = format!("{mime_type}; codecs=\"{codec_string}\"");

    CodecInfo {
        mime_type,
        video_codec: video.codec_string.clone(),
        audio_codec: audio.map(|a| a.codec_string.clone()),
        codec_string,
        full_codec,
        width,
        height,
        has_audio: audio.is_some(),
    }
}
