//! Buffering detection from the player's cache and playback percentages.

use std::time::{Duration, Instant};

/// One poll of the player properties.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BufferSample {
    pub cache_percent: f64,
    pub playback_percent: f64,
    /// Bytes per second.
    pub network_speed: Option<f64>,
    pub read_speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferNotice {
    pub stalled_for: Duration,
    pub network_speed: Option<f64>,
    pub read_speed: Option<f64>,
}

impl BufferNotice {
    pub fn message(&self) -> String {
        format!(
            "Network {} | Cache {}",
            speed(self.network_speed),
            speed(self.read_speed)
        )
    }
}

fn speed(bytes: Option<f64>) -> String {
    match bytes {
        Some(b) if b >= 1_048_576.0 => format!("{:.1} MB/s", b / 1_048_576.0),
        Some(b) => format!("{:.0} KB/s", b / 1024.0),
        None => "unknown".to_string(),
    }
}

pub struct BufferMonitor {
    /// Stall length before a notice is due.
    grace: Duration,
    /// Minimum time between two notices.
    interval: Duration,
    last: Option<BufferSample>,
    stalled_since: Option<Instant>,
    last_notice: Option<Instant>,
}

impl BufferMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            grace: Duration::from_secs(3),
            interval,
            last: None,
            stalled_since: None,
            last_notice: None,
        }
    }

    pub fn is_buffering(&self) -> bool {
        self.stalled_since.is_some()
    }

    /// Feed a sample taken at `now`. Returns a notice when the player has been
    /// stalled past the grace period and no notice went out recently.
    pub fn observe(&mut self, sample: BufferSample, now: Instant) -> Option<BufferNotice> {
        let stalled = match self.last {
            Some(prev) => {
                sample.cache_percent < 100.0
                    && sample.cache_percent <= prev.cache_percent
                    && sample.playback_percent <= prev.playback_percent
            }
            None => false,
        };
        self.last = Some(sample);
        if !stalled {
            self.stalled_since = None;
            return None;
        }
        let since = *self.stalled_since.get_or_insert(now);
        let stalled_for = now.duration_since(since);
        if stalled_for < self.grace {
            return None;
        }
        if self.last_notice.is_some_and(|at| now.duration_since(at) < self.interval) {
            return None;
        }
        self.last_notice = Some(now);
        Some(BufferNotice {
            stalled_for,
            network_speed: sample.network_speed,
            read_speed: sample.read_speed,
        })
    }
}
