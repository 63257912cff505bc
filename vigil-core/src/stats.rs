//! Running per-stream statistics: all-time average plus a 10-sample
//! simple moving average, O(1) per insertion.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

const SMA_WINDOW: usize = 10;

/// Snapshot returned for each recorded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub motion_energy: f64,
    pub total_avg: f64,
    pub sma10: f64,
}

#[derive(Debug, Default)]
struct RunningStats {
    sum: f64,
    count: u64,
    last10: VecDeque<f64>,
}

impl RunningStats {
    fn record(&mut self, sample: f64) -> FrameStats {
        self.sum += sample;
        self.count += 1;
        if self.last10.len() == SMA_WINDOW {
            self.last10.pop_front();
        }
        self.last10.push_back(sample);

        FrameStats {
            motion_energy: sample,
            total_avg: self.sum / self.count as f64,
            sma10: self.last10.iter().sum::<f64>() / self.last10.len() as f64,
        }
    }
}

/// Stats keyed by stream id. Entries persist until the stream is
/// explicitly restarted.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    streams: DashMap<String, Mutex<RunningStats>>,
}

impl StatsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stream_id: &str, sample: f64) -> FrameStats {
        let entry = self
            .streams
            .entry(stream_id.to_string())
            .or_insert_with(|| Mutex::new(RunningStats::default()));
        let mut stats = entry.lock();
        stats.record(sample)
    }

    /// Drop stats for a stream (used when the stream restarts).
    pub fn clear(&self, stream_id: &str) {
        self.streams.remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_averages_over_twelve_samples() {
        let registry = StatsRegistry::new();
        let mut last = None;
        for sample in 1..=12 {
            last = Some(registry.record("cam-1", f64::from(sample)));
        }
        let stats = last.expect("recorded");
        // 1..=12 sums to 78; all-time average is 6.5
        assert!((stats.total_avg - 6.5).abs() < f64::EPSILON);
        // window holds 3..=12; moving average is 7.5
        assert!((stats.sma10 - 7.5).abs() < f64::EPSILON);
        assert!((stats.motion_energy - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_window_averages_over_present_samples() {
        let registry = StatsRegistry::new();
        registry.record("cam-1", 2.0);
        let stats = registry.record("cam-1", 4.0);
        assert!((stats.total_avg - 3.0).abs() < f64::EPSILON);
        assert!((stats.sma10 - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_streams_are_independent() {
        let registry = StatsRegistry::new();
        registry.record("a", 10.0);
        let stats = registry.record("b", 2.0);
        assert!((stats.total_avg - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_resets_stream() {
        let registry = StatsRegistry::new();
        registry.record("cam-1", 100.0);
        registry.clear("cam-1");
        let stats = registry.record("cam-1", 2.0);
        assert!((stats.total_avg - 2.0).abs() < f64::EPSILON);
    }
}
