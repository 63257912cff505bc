//! Per-frame emission pacing.
//!
//! Live sources get a plain wall-clock throttle; file sources get a
//! dual-delay scheme: a pre-processing delay that enforces minimum frame
//! spacing (prevents bursts when decoding outruns real time) and a
//! post-processing delay that sleeps until the PTS-derived target
//! wall-clock time. Falling behind schedule is logged, never corrected
//! by dropping frames.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::classify::StreamType;
use vigil_core::media::Rational;

/// Pacing delays are capped so a wild PTS jump cannot stall the loop.
const MAX_PACING_DELAY: Duration = Duration::from_secs(5);
/// Lag beyond this is reported as running behind schedule.
const BEHIND_SCHEDULE_THRESHOLD: Duration = Duration::from_millis(100);
const DEFAULT_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingPhase {
    /// Before decode output is filtered/encoded.
    PreProcess,
    /// After the frame message has been emitted.
    PostProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingAction {
    Proceed,
    /// Drop the frame entirely (live throttling).
    Skip,
}

/// Pacing state for one ingestion-loop attempt. Not persisted across
/// restarts — a fresh attempt re-latches its own playback origin.
#[derive(Debug)]
pub struct TimingState {
    first_pts: Option<i64>,
    playback_start: Option<Instant>,
    last_frame_sent: Option<Instant>,
    last_live_sent: Option<Instant>,
    target_frame_interval: Duration,
    live_frame_interval: Duration,
}

impl TimingState {
    /// Computes the target frame interval once, from the source's average
    /// frame rate. A non-finite or non-positive rate falls back to 30 FPS.
    #[must_use]
    pub fn new(avg_frame_rate: Rational, live_max_fps: u32) -> Self {
        let interval_ms =
            f64::from(avg_frame_rate.den) * 1000.0 / f64::from(avg_frame_rate.num);
        let interval_ms = if interval_ms.is_finite() && interval_ms > 0.0 {
            interval_ms
        } else {
            warn!(
                frame_rate = ?avg_frame_rate,
                "invalid source frame rate, defaulting to {DEFAULT_FPS} FPS"
            );
            1000.0 / DEFAULT_FPS
        };

        let live_fps = if live_max_fps > 0 {
            f64::from(live_max_fps)
        } else {
            DEFAULT_FPS
        };

        Self {
            first_pts: None,
            playback_start: None,
            last_frame_sent: None,
            last_live_sent: None,
            target_frame_interval: Duration::from_secs_f64(interval_ms / 1000.0),
            live_frame_interval: Duration::from_secs_f64(1.0 / live_fps),
        }
    }

    #[must_use]
    pub fn target_frame_interval(&self) -> Duration {
        self.target_frame_interval
    }

    /// Media-relative elapsed milliseconds for `pts`, once the playback
    /// origin has been latched.
    #[must_use]
    pub fn pts_elapsed_ms(&self, pts: i64, time_base: Rational) -> Option<f64> {
        let first = self.first_pts?;
        let diff = pts.saturating_sub(first) as f64;
        Some(diff * f64::from(time_base.num) * 1000.0 / f64::from(time_base.den))
    }

    /// Apply the pacing strategy for one frame. Returns [`TimingAction::Skip`]
    /// when a live frame falls inside the throttle window; the caller drops
    /// it without further processing.
    pub async fn apply(
        &mut self,
        stream_type: StreamType,
        phase: TimingPhase,
        pts: i64,
        time_base: Rational,
    ) -> TimingAction {
        // First frame of a file source latches the playback origin and is
        // emitted without delay.
        if stream_type == StreamType::File && self.first_pts.is_none() {
            self.first_pts = Some(pts);
            self.playback_start = Some(Instant::now());
            debug!(pts, "starting timed playback");
            return TimingAction::Proceed;
        }

        match stream_type {
            StreamType::Live => {
                if phase == TimingPhase::PreProcess {
                    let now = Instant::now();
                    if let Some(last) = self.last_live_sent {
                        if now.duration_since(last) < self.live_frame_interval {
                            return TimingAction::Skip;
                        }
                    }
                    self.last_live_sent = Some(now);
                }
                TimingAction::Proceed
            }
            StreamType::File => {
                match phase {
                    TimingPhase::PreProcess => {
                        if let Some(last) = self.last_frame_sent {
                            if let Some(delay) = pre_process_delay(
                                Instant::now(),
                                last,
                                self.target_frame_interval,
                            ) {
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                    TimingPhase::PostProcess => {
                        if let (Some(elapsed_ms), Some(start)) =
                            (self.pts_elapsed_ms(pts, time_base), self.playback_start)
                        {
                            let target =
                                start + Duration::from_secs_f64(elapsed_ms.max(0.0) / 1000.0);
                            match post_process_delay(Instant::now(), target) {
                                PostDelay::Wait(delay) => tokio::time::sleep(delay).await,
                                PostDelay::Behind(lag) => {
                                    debug!(
                                        lag_ms = lag.as_millis() as u64,
                                        pts, "file playback running behind schedule"
                                    );
                                }
                                PostDelay::OnTime => {}
                            }
                        }
                        self.last_frame_sent = Some(Instant::now());
                    }
                }
                TimingAction::Proceed
            }
        }
    }
}

/// Minimum-spacing delay before processing, `None` when the previous
/// emission is already far enough in the past.
fn pre_process_delay(now: Instant, last_sent: Instant, target_interval: Duration) -> Option<Duration> {
    let since_last = now.duration_since(last_sent);
    if since_last >= target_interval {
        return None;
    }
    Some((target_interval - since_last).min(MAX_PACING_DELAY))
}

#[derive(Debug, PartialEq, Eq)]
enum PostDelay {
    Wait(Duration),
    Behind(Duration),
    OnTime,
}

fn post_process_delay(now: Instant, target: Instant) -> PostDelay {
    if target > now {
        return PostDelay::Wait(target.duration_since(now).min(MAX_PACING_DELAY));
    }
    let lag = now.duration_since(target);
    if lag > BEHIND_SCHEDULE_THRESHOLD {
        PostDelay::Behind(lag)
    } else {
        PostDelay::OnTime
    }
}
