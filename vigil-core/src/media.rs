//! The codec-engine capability contract.
//!
//! Decode, filter, encode and container muxing are external capabilities;
//! the pipeline only depends on the trait seams here. Implementations wrap
//! whatever engine the host embeds; every stage may legitimately return
//! `None` ("no output yet") without that being an error.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

use crate::error::Result;

/// A time base or frame rate as an exact fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    #[must_use]
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    #[must_use]
    pub fn as_f64(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

/// A demuxed packet as read from the source container.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    pub stream_index: usize,
    pub pts: i64,
    pub data: Bytes,
    pub key_frame: bool,
}

/// A decoded (or filtered) video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pts: i64,
    pub data: Bytes,
}

/// Pixel formats the streaming path can pass through without re-encoding.
/// Anything the engine reports outside this set maps to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420p,
    Yuyv422,
    Rgb24,
    Bgr24,
    Yuv422p,
    Yuv444p,
    Yuv410p,
    Yuv411p,
    Gray8,
    Monowhite,
    Monoblack,
    Pal8,
    Yuvj420p,
    Yuvj422p,
    Yuvj444p,
    Uyvy422,
    Uyyvyy411,
    Bgr8,
    Bgr4,
    Bgr4Byte,
    Rgb8,
    Rgb4,
    Rgb4Byte,
    Other,
}

impl PixelFormat {
    /// Formats known to render directly in consumers without conversion.
    #[must_use]
    pub fn is_streamable(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Probed video stream parameters.
#[derive(Debug, Clone)]
pub struct VideoStreamInfo {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Engine codec name, lowercase (e.g. "mjpeg", "h264").
    pub codec: String,
    pub pixel_format: PixelFormat,
    pub avg_frame_rate: Rational,
    pub time_base: Rational,
    /// RFC 6381 codec string as the engine reports it.
    pub codec_string: String,
    /// Container mime type for this stream (e.g. "video/mp4").
    pub mime_type: String,
}

/// Probed audio stream parameters. Audio is carried as metadata only; the
/// ingestion loop does not process audio packets.
#[derive(Debug, Clone)]
pub struct AudioStreamInfo {
    pub index: usize,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub time_base: Rational,
    pub codec_string: String,
}

/// Options applied when opening a source.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Force TCP transport for RTSP sources.
    pub rtsp_tcp: bool,
}

/// Codec parameters handed to a clip container so its stream matches the
/// live encoder.
#[derive(Debug, Clone)]
pub struct CodecParameters {
    pub codec: String,
    pub width: u32,
    pub height: u32,
}

/// An opened, probed media source.
#[async_trait]
pub trait MediaSource: Send {
    fn video(&self) -> Option<&VideoStreamInfo>;
    fn audio(&self) -> Option<&AudioStreamInfo>;

    /// Container-reported duration in microseconds, when the container
    /// knows it. Live transports report `None`.
    fn duration_us(&self) -> Option<i64>;

    /// Read the next packet. `Ok(None)` means the source is exhausted.
    async fn read(&mut self) -> Result<Option<MediaPacket>>;

    async fn seek(&mut self, seconds: f64) -> Result<()>;
}

#[async_trait]
pub trait VideoDecoder: Send {
    async fn decode(&mut self, packet: &MediaPacket) -> Result<Option<VideoFrame>>;
}

#[async_trait]
pub trait VideoFilter: Send {
    async fn process(&mut self, frame: &VideoFrame) -> Result<Option<VideoFrame>>;
}

#[async_trait]
pub trait VideoEncoder: Send {
    async fn encode(&mut self, frame: &VideoFrame) -> Result<Option<MediaPacket>>;

    /// Parameters for deriving clip container streams from this encoder.
    fn codec_parameters(&self) -> CodecParameters;
}

/// A single-video-stream clip container. The implementation writes the
/// container header before the sink is returned from
/// [`MediaEngine::clip_sink`].
#[async_trait]
pub trait ClipSink: Send {
    /// Index of the video stream inside the clip container.
    fn video_stream_index(&self) -> usize;

    /// Write one encoded packet stamped at `pts_ms` (1/1000 timebase).
    async fn write(&mut self, pts_ms: i64, data: &Bytes) -> Result<()>;

    /// Write the container trailer and close.
    async fn finalize(self: Box<Self>) -> Result<()>;

    /// Close without writing a trailer. The caller is about to delete
    /// the file.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Factory for all engine capabilities the pipeline consumes.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn open(&self, uri: &str, options: OpenOptions) -> Result<Box<dyn MediaSource>>;

    async fn video_decoder(&self, stream: &VideoStreamInfo) -> Result<Box<dyn VideoDecoder>>;

    /// Scale/pixel-format conversion to the given output dimensions.
    async fn video_filter(
        &self,
        stream: &VideoStreamInfo,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn VideoFilter>>;

    async fn video_encoder(
        &self,
        stream: &VideoStreamInfo,
        frame_rate: Rational,
    ) -> Result<Box<dyn VideoEncoder>>;

    /// Open a clip container at `path` with one video stream derived from
    /// `params`, header written.
    async fn clip_sink(&self, path: &Path, params: &CodecParameters)
        -> Result<Box<dyn ClipSink>>;
}

/// Whether the streaming path can skip re-encoding entirely: the source is
/// already in the directly-streamable still format and its pixel format is
/// in the compatible set.
#[must_use]
pub fn should_skip_transcode(stream: &VideoStreamInfo) -> bool {
    stream.codec == "mjpeg" && stream.pixel_format.is_streamable()
}

/// Scale `(width, height)` so the longer side fits `max`, preserving aspect
/// ratio and rounding to nearest. Dimensions already within `max` are
/// returned unchanged.
#[must_use]
pub fn output_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max {
        return (width, height);
    }
    let scale = f64::from(max) / f64::from(longer);
    let new_width = (f64::from(width) * scale).round() as u32;
    let new_height = (f64::from(height) * scale).round() as u32;
    (new_width, new_height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(codec: &str, pixel_format: PixelFormat) -> VideoStreamInfo {
        VideoStreamInfo {
            index: 0,
            width: 1920,
            height: 1080,
            codec: codec.to_string(),
            pixel_format,
            avg_frame_rate: Rational::new(30, 1),
            time_base: Rational::new(1, 90_000),
            codec_string: "mjpg".to_string(),
            mime_type: "video/mp4".to_string(),
        }
    }

    #[test]
    fn test_output_dimensions_landscape() {
        assert_eq!(output_dimensions(1920, 1080, 720), (720, 405));
    }

    #[test]
    fn test_output_dimensions_portrait() {
        assert_eq!(output_dimensions(1080, 1920, 720), (405, 720));
    }

    #[test]
    fn test_output_dimensions_rounds_to_nearest() {
        // 1280x853 scaled by 720/1280 gives 479.8125 -> 480
        assert_eq!(output_dimensions(1280, 853, 720), (720, 480));
    }

    #[test]
    fn test_output_dimensions_small_input_unchanged() {
        assert_eq!(output_dimensions(640, 480, 720), (640, 480));
        assert_eq!(output_dimensions(720, 720, 720), (720, 720));
    }

    #[test]
    fn test_skip_transcode_requires_streamable_codec_and_format() {
        assert!(should_skip_transcode(&stream("mjpeg", PixelFormat::Yuvj420p)));
        assert!(should_skip_transcode(&stream("mjpeg", PixelFormat::Gray8)));
        assert!(!should_skip_transcode(&stream("mjpeg", PixelFormat::Other)));
        assert!(!should_skip_transcode(&stream("h264", PixelFormat::Yuv420p)));
    }
}
