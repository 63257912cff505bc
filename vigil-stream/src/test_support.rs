//! Shared test doubles for the ingestion pipeline: a scripted media
//! source and a mock engine whose decode/filter/encode stages pass data
//! through unchanged while recording clip activity.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use vigil_core::error::{Result, StreamError};
use vigil_core::media::{
    AudioStreamInfo, ClipSink, CodecParameters, MediaEngine, MediaPacket, MediaSource,
    OpenOptions, PixelFormat, Rational, VideoDecoder, VideoEncoder, VideoFilter, VideoFrame,
    VideoStreamInfo,
};

pub fn test_video_stream() -> VideoStreamInfo {
    VideoStreamInfo {
        index: 0,
        width: 1920,
        height: 1080,
        codec: "mjpeg".to_string(),
        pixel_format: PixelFormat::Yuvj420p,
        avg_frame_rate: Rational::new(25, 1),
        time_base: Rational::new(1, 90_000),
        codec_string: "mjpg".to_string(),
        mime_type: "video/mp4".to_string(),
    }
}

pub fn test_audio_stream() -> AudioStreamInfo {
    AudioStreamInfo {
        index: 1,
        codec: "aac".to_string(),
        sample_rate: 48_000,
        channels: 2,
        time_base: Rational::new(1, 48_000),
        codec_string: "mp4a.40.2".to_string(),
    }
}

pub fn video_packet(pts: i64, stream_index: usize) -> MediaPacket {
    MediaPacket {
        stream_index,
        pts,
        data: Bytes::from(format!("pkt-{pts}")),
        key_frame: true,
    }
}

/// A source that replays a fixed packet script, then reports exhaustion.
pub struct ScriptedSource {
    video: Option<VideoStreamInfo>,
    audio: Option<AudioStreamInfo>,
    duration_us: Option<i64>,
    packets: VecDeque<MediaPacket>,
    seeks: Arc<Mutex<Vec<f64>>>,
}

impl ScriptedSource {
    pub fn empty() -> Self {
        Self::with_packets(Vec::new())
    }

    pub fn with_packets(packets: Vec<MediaPacket>) -> Self {
        Self {
            video: Some(test_video_stream()),
            audio: None,
            duration_us: None,
            packets: packets.into(),
            seeks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn with_audio(mut self) -> Self {
        self.audio = Some(test_audio_stream());
        self
    }

    pub fn seek_log(&self) -> Arc<Mutex<Vec<f64>>> {
        Arc::clone(&self.seeks)
    }
}

#[async_trait]
impl MediaSource for ScriptedSource {
    fn video(&self) -> Option<&VideoStreamInfo> {
        self.video.as_ref()
    }

    fn audio(&self) -> Option<&AudioStreamInfo> {
        self.audio.as_ref()
    }

    fn duration_us(&self) -> Option<i64> {
        self.duration_us
    }

    async fn read(&mut self) -> Result<Option<MediaPacket>> {
        Ok(self.packets.pop_front())
    }

    async fn seek(&mut self, seconds: f64) -> Result<()> {
        self.seeks.lock().push(seconds);
        Ok(())
    }
}

/// A source whose reads never complete, for timeout and cancellation tests.
pub struct PendingSource {
    video: Option<VideoStreamInfo>,
}

impl Default for PendingSource {
    fn default() -> Self {
        Self {
            video: Some(test_video_stream()),
        }
    }
}

#[async_trait]
impl MediaSource for PendingSource {
    fn video(&self) -> Option<&VideoStreamInfo> {
        self.video.as_ref()
    }

    fn audio(&self) -> Option<&AudioStreamInfo> {
        None
    }

    fn duration_us(&self) -> Option<i64> {
        None
    }

    async fn read(&mut self) -> Result<Option<MediaPacket>> {
        std::future::pending().await
    }

    async fn seek(&mut self, _seconds: f64) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct EngineState {
    opened_clips: AtomicUsize,
    finalized_clips: AtomicUsize,
    aborted_clips: AtomicUsize,
    written_timestamps: Mutex<Vec<i64>>,
}

/// Mock engine: decode/filter/encode pass payloads through unchanged,
/// clip sinks write real placeholder files so filesystem assertions work.
pub struct MockEngine {
    state: Arc<EngineState>,
    sources: Mutex<VecDeque<Box<dyn MediaSource>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EngineState::default()),
            sources: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a source for the next `open` call. An `open` with no queued
    /// source fails, which doubles as an open-failure script.
    pub fn push_source(&self, source: Box<dyn MediaSource>) {
        self.sources.lock().push_back(source);
    }

    pub fn opened_clips(&self) -> usize {
        self.state.opened_clips.load(Ordering::SeqCst)
    }

    pub fn finalized_clips(&self) -> usize {
        self.state.finalized_clips.load(Ordering::SeqCst)
    }

    pub fn aborted_clips(&self) -> usize {
        self.state.aborted_clips.load(Ordering::SeqCst)
    }

    pub fn written_timestamps(&self) -> Vec<i64> {
        self.state.written_timestamps.lock().clone()
    }
}

struct PassthroughDecoder;

#[async_trait]
impl VideoDecoder for PassthroughDecoder {
    async fn decode(&mut self, packet: &MediaPacket) -> Result<Option<VideoFrame>> {
        Ok(Some(VideoFrame {
            width: 1920,
            height: 1080,
            pts: packet.pts,
            data: packet.data.clone(),
        }))
    }
}

struct IdentityFilter;

#[async_trait]
impl VideoFilter for IdentityFilter {
    async fn process(&mut self, frame: &VideoFrame) -> Result<Option<VideoFrame>> {
        Ok(Some(frame.clone()))
    }
}

struct PassthroughEncoder {
    params: CodecParameters,
}

#[async_trait]
impl VideoEncoder for PassthroughEncoder {
    async fn encode(&mut self, frame: &VideoFrame) -> Result<Option<MediaPacket>> {
        Ok(Some(MediaPacket {
            stream_index: 0,
            pts: frame.pts,
            data: frame.data.clone(),
            key_frame: true,
        }))
    }

    fn codec_parameters(&self) -> CodecParameters {
        self.params.clone()
    }
}

struct MockClipSink {
    state: Arc<EngineState>,
}

#[async_trait]
impl ClipSink for MockClipSink {
    fn video_stream_index(&self) -> usize {
        0
    }

    async fn write(&mut self, pts_ms: i64, _data: &Bytes) -> Result<()> {
        self.state.written_timestamps.lock().push(pts_ms);
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> Result<()> {
        self.state.finalized_clips.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        self.state.aborted_clips.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn open(&self, uri: &str, _options: OpenOptions) -> Result<Box<dyn MediaSource>> {
        self.sources
            .lock()
            .pop_front()
            .ok_or_else(|| StreamError::SourceOpen(format!("no scripted source for {uri}")))
    }

    async fn video_decoder(&self, _stream: &VideoStreamInfo) -> Result<Box<dyn VideoDecoder>> {
        Ok(Box::new(PassthroughDecoder))
    }

    async fn video_filter(
        &self,
        _stream: &VideoStreamInfo,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn VideoFilter>> {
        Ok(Box::new(IdentityFilter))
    }

    async fn video_encoder(
        &self,
        stream: &VideoStreamInfo,
        _frame_rate: Rational,
    ) -> Result<Box<dyn VideoEncoder>> {
        Ok(Box::new(PassthroughEncoder {
            params: CodecParameters {
                codec: stream.codec.clone(),
                width: stream.width,
                height: stream.height,
            },
        }))
    }

    async fn clip_sink(
        &self,
        path: &Path,
        _params: &CodecParameters,
    ) -> Result<Box<dyn ClipSink>> {
        // Write a placeholder header so the file exists on disk.
        tokio::fs::write(path, b"mkv-header").await?;
        self.state.opened_clips.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockClipSink {
            state: Arc::clone(&self.state),
        }))
    }
}
