//! Bounded shared ephemeral state: recent motion-energy results kept so
//! late-joining viewers can recover the last few seconds of activity.

use parking_lot::Mutex;
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct MotionSample {
    pub stream_id: String,
    pub frame_id: String,
    pub motion_energy: f64,
    pub total_avg: f64,
    pub sma10: f64,
}

#[derive(Debug)]
pub struct EphemeralState {
    capacity: usize,
    motion: Mutex<VecDeque<MotionSample>>,
}

impl EphemeralState {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            motion: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_motion(&self, sample: MotionSample) {
        let mut motion = self.motion.lock();
        if motion.len() == self.capacity {
            motion.pop_front();
        }
        motion.push_back(sample);
    }

    /// Oldest-first snapshot of the retained samples.
    #[must_use]
    pub fn recent_motion(&self) -> Vec<MotionSample> {
        self.motion.lock().iter().cloned().collect()
    }
}

impl Default for EphemeralState {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> MotionSample {
        MotionSample {
            stream_id: "cam-1".to_string(),
            frame_id: format!("f{n}"),
            motion_energy: n as f64,
            total_avg: 0.0,
            sma10: 0.0,
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let state = EphemeralState::new(3);
        for n in 0..5 {
            state.push_motion(sample(n));
        }
        let recent = state.recent_motion();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].frame_id, "f2");
        assert_eq!(recent[2].frame_id, "f4");
    }
}
