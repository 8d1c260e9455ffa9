//! Upload throughput over a sliding time window.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Parts finished longer ago than this no longer count towards the rate.
const WINDOW: Duration = Duration::from_secs(30);

/// Rolling upload rate, shared by every worker of a pool.
#[derive(Default)]
pub struct SpeedCalculator {
    completions: Mutex<VecDeque<(Instant, u64)>>,
}

impl SpeedCalculator {
    /// Records a finished part of `bytes` bytes.
    pub fn add_sample(&self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&self, at: Instant, bytes: u64) {
        let Ok(mut completions) = self.completions.lock() else {
            return;
        };
        completions.push_back((at, bytes));
        while completions
            .front()
            .is_some_and(|(t, _)| at.saturating_duration_since(*t) > WINDOW)
        {
            completions.pop_front();
        }
    }

    /// Bytes per second between the oldest and newest completion in the
    /// window. Zero until two parts have finished.
    pub fn bytes_per_second(&self) -> f64 {
        let Ok(completions) = self.completions.lock() else {
            return 0.0;
        };
        let (Some((start, _)), Some((end, _))) = (completions.front(), completions.back()) else {
            return 0.0;
        };
        let elapsed = end.saturating_duration_since(*start).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        // The oldest completion only marks where the window starts.
        let bytes: u64 = completions.iter().skip(1).map(|(_, b)| b).sum();
        bytes as f64 / elapsed
    }

    /// Time left for `remaining_bytes` at the current rate.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }
}
