//! Consumer-side playback buffer: chunk reassembly, lossy backpressure
//! and the live-edge seek policy.
//!
//! The buffer sits between the fan-out channel and a playback sink (the
//! viewer's media source). Chunks append immediately while the sink is
//! idle and nothing is backlogged; otherwise they queue FIFO. The backlog
//! favors recency over completeness: past the byte budget the oldest
//! chunks are dropped first, and the newest chunk is never dropped to
//! enforce the cap.

use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, warn};

use vigil_core::config::PlaybackConfig;

/// Media-span removal below this is not worth a sink round-trip.
const MIN_TRIM_SPAN_SECS: f64 = 1.0;

/// The viewer's playback sink. Appends are asynchronous on real sinks;
/// `busy` reflects an append still being processed, and the sink is
/// expected to raise an idle notification (forwarded to
/// [`PlaybackBuffer::on_sink_idle`]) each time one completes.
pub trait PlaybackSink {
    fn busy(&self) -> bool;

    /// Append one chunk; `false` when the sink rejected it.
    fn append(&mut self, chunk: &Bytes) -> bool;

    /// Buffered media range `(start, end)` in seconds, when any.
    fn buffered(&self) -> Option<(f64, f64)>;

    /// Current playback position in seconds.
    fn position(&self) -> f64;

    fn seek(&mut self, position: f64);

    /// Discard buffered media in `[from, to)`.
    fn remove(&mut self, from: f64, to: f64);

    /// Enough media buffered to begin playback.
    fn can_start(&self) -> bool;

    /// Begin playback; `true` on success.
    fn start(&mut self) -> bool;
}

/// Per-viewer reassembly state. Reset wholesale on codec change.
pub struct PlaybackBuffer<S> {
    sink: Option<S>,
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    live_edge_threshold: f64,
    seek_hysteresis: f64,
    has_played: bool,
    config: PlaybackConfig,
}

impl<S: PlaybackSink> PlaybackBuffer<S> {
    #[must_use]
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            sink: None,
            queue: VecDeque::new(),
            queued_bytes: 0,
            live_edge_threshold: config.initial_live_edge_threshold_secs,
            seek_hysteresis: config.initial_seek_hysteresis_secs,
            has_played: false,
            config,
        }
    }

    /// A codec change tears down the previous sink and resets all buffer
    /// state; the thresholds tighten back to their pre-playback values.
    pub fn handle_codec(&mut self, sink: S) {
        debug!("codec changed, reinitializing playback buffer");
        *self = Self {
            sink: Some(sink),
            ..Self::new(self.config.clone())
        };
    }

    /// Ingest one chunk: append immediately when the sink is idle and
    /// nothing is backlogged, otherwise enqueue.
    pub fn push_chunk(&mut self, chunk: Bytes) {
        if let Some(sink) = &mut self.sink {
            if !sink.busy() && self.queued_bytes == 0 && sink.append(&chunk) {
                return;
            }
        }

        self.queued_bytes += chunk.len();
        self.queue.push_back(chunk);

        // Lossy backpressure: drop oldest first. The newest chunk survives
        // even when it alone exceeds the budget.
        while self.queued_bytes > self.config.max_queued_bytes && self.queue.len() > 1 {
            if let Some(dropped) = self.queue.pop_front() {
                self.queued_bytes -= dropped.len();
                warn!(
                    queued_kb = self.queued_bytes / 1024,
                    "backlog over budget, dropped oldest chunk"
                );
            }
        }
    }

    /// Sink idle notification: chase the live edge, trim stale media,
    /// flush one queued chunk, and start playback once the sink is ready.
    pub fn on_sink_idle(&mut self) {
        let Some(sink) = &mut self.sink else { return };

        seek_to_live_edge(sink, self.live_edge_threshold, self.seek_hysteresis);
        trim_buffered(sink, self.config.retention_secs);

        if !sink.busy() {
            if let Some(chunk) = self.queue.pop_front() {
                self.queued_bytes -= chunk.len();
                if !sink.append(&chunk) {
                    // Failed appends retry on the next idle notification.
                    self.queued_bytes += chunk.len();
                    self.queue.push_front(chunk);
                }
            }
        }

        if !self.has_played && sink.can_start() && sink.start() {
            self.has_played = true;
            self.live_edge_threshold = self.config.relaxed_live_edge_threshold_secs;
            self.seek_hysteresis = self.config.relaxed_seek_hysteresis_secs;
        }
    }

    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn has_played(&self) -> bool {
        self.has_played
    }

    #[must_use]
    pub fn live_edge_threshold(&self) -> f64 {
        self.live_edge_threshold
    }

    #[must_use]
    pub fn seek_hysteresis(&self) -> f64 {
        self.seek_hysteresis
    }
}

/// Jump to the live edge once buffered-ahead duration exceeds
/// `threshold + hysteresis`; the hysteresis keeps the player from seeking
/// on every notification.
fn seek_to_live_edge<S: PlaybackSink>(sink: &mut S, threshold: f64, hysteresis: f64) {
    if sink.busy() {
        return;
    }
    let Some((_, buffered_end)) = sink.buffered() else {
        return;
    };
    let ahead = buffered_end - sink.position();
    if ahead > threshold + hysteresis {
        let live_edge = buffered_end - threshold;
        debug!(ahead, live_edge, "seeking to live edge");
        sink.seek(live_edge);
    }
}

/// Discard buffered media older than the retention window behind the
/// playhead, bounding memory on long-lived connections.
fn trim_buffered<S: PlaybackSink>(sink: &mut S, retention_secs: f64) {
    if sink.busy() {
        return;
    }
    let Some((buffered_start, _)) = sink.buffered() else {
        return;
    };
    let remove_end = sink.position() - retention_secs;
    if remove_end > buffered_start + MIN_TRIM_SPAN_SECS {
        sink.remove(buffered_start, remove_end);
    }
}
