use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

/// Last computed `(frame_index, frame_count, percent)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub frame_index: u64,
    /// 0 when the source does not report a length
    pub frame_count: u64,
    /// Only known when `frame_count > 0`; always within `[0, 100]`
    pub percent: Option<f64>,
}

impl ProgressSnapshot {
    pub fn new(frame_index: u64, frame_count: u64) -> Self {
        let percent = if frame_count > 0 {
            Some((frame_index as f64 / frame_count as f64 * 100.0).clamp(0.0, 100.0))
        } else {
            None
        };
        Self { frame_index, frame_count, percent }
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.percent {
            Some(pct) => write!(f, "progress: {}/{} ({:.1}%)", self.frame_index, self.frame_count, pct),
            None => write!(f, "progress: {}/?", self.frame_index),
        }
    }
}

/// Rate-limited progress publisher for one session.
///
/// Snapshots go out on a `watch` channel at most once per `interval`, so a
/// poller never sees anything staler than roughly one interval. `finish`
/// always publishes.
pub struct ProgressTracker {
    frame_count: u64,
    interval: Duration,
    last_report: Instant,
    sender: watch::Sender<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(frame_count: u64, interval: Duration, sender: watch::Sender<ProgressSnapshot>) -> Self {
        sender.send_replace(ProgressSnapshot::new(0, frame_count));
        Self {
            frame_count,
            interval,
            last_report: Instant::now(),
            sender,
        }
    }

    /// Record that `frame_index` frames are done; returns true if a snapshot went out
    pub fn record(&mut self, frame_index: u64) -> bool {
        if self.last_report.elapsed() < self.interval {
            return false;
        }
        self.publish(frame_index);
        true
    }

    /// Publish the final count regardless of the interval
    pub fn finish(&mut self, frame_index: u64) -> ProgressSnapshot {
        self.publish(frame_index)
    }

    fn publish(&mut self, frame_index: u64) -> ProgressSnapshot {
        let snapshot = ProgressSnapshot::new(frame_index, self.frame_count);
        info!("{}", snapshot);
        self.sender.send_replace(snapshot);
        self.last_report = Instant::now();
        snapshot
    }
}
