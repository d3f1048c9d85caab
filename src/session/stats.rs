use std::time::{Duration, Instant};

use log::info;
use serde::Serialize;

/// Counts frames over fixed wall-clock windows and logs the achieved rate.
#[derive(Debug, Clone)]
pub struct FrameRateMeter {
    window: Duration,
    window_start: Option<Instant>,
    frames_in_window: usize,
    last_rate: Option<f64>,
}

impl FrameRateMeter {
    pub fn new(window: Duration) -> Self {
        FrameRateMeter {
            window,
            window_start: None,
            frames_in_window: 0,
            last_rate: None,
        }
    }

    /// Records one frame now.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Records one frame at `now`. Returns the rate in frames per second when
    /// a window has just been closed.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        let start = *self.window_start.get_or_insert(now);
        self.frames_in_window += 1;

        let elapsed = now.saturating_duration_since(start);
        if self.window.is_zero() || elapsed < self.window {
            return None;
        }

        let rate = self.frames_in_window as f64 / elapsed.as_secs_f64();
        info!(
            "tracking at {:.1} fps ({} frames in {:.2} s)",
            rate,
            self.frames_in_window,
            elapsed.as_secs_f64()
        );
        self.window_start = Some(now);
        self.frames_in_window = 0;
        self.last_rate = Some(rate);
        Some(rate)
    }

    /// Rate measured over the last completed window.
    pub fn last_rate(&self) -> Option<f64> {
        self.last_rate
    }
}

/// Per-session tracking counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackingSummary {
    pub frames: usize,
    pub published: usize,
    pub marker_not_found: usize,
    pub geometry_failures: usize,
    pub alignment_failures: usize,
}

impl TrackingSummary {
    pub fn skipped(&self) -> usize {
        self.marker_not_found + self.geometry_failures + self.alignment_failures
    }
}
