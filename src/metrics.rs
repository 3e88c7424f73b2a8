//! Periodic metrics logging (ambient stack): counters for traffic and
//! errors flowing through the router, flushed to the log on a fixed
//! cadence rather than on every message.

use std::time::{Duration, Instant};

use tracing::info;

/// Router-wide traffic and error counters.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    pub can_frames: u64,
    pub nmea2000_messages: u64,
    pub nmea0183_sentences: u64,
    pub fast_packet_errors: u64,
    pub iso_tp_errors: u64,
    pub can_errors: u64,
    pub messages_dropped: u64,
    pub sinks_quarantined: u64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn log(&self) {
        info!(
            can_frames = self.can_frames,
            nmea2000_messages = self.nmea2000_messages,
            nmea0183_sentences = self.nmea0183_sentences,
            fast_packet_errors = self.fast_packet_errors,
            iso_tp_errors = self.iso_tp_errors,
            can_errors = self.can_errors,
            messages_dropped = self.messages_dropped,
            sinks_quarantined = self.sinks_quarantined,
            "router metrics"
        );
    }
}

/// Drives periodic flushing of [`RouterMetrics`] to the log.
pub struct MetricsLogger {
    last_log: Instant,
    interval: Duration,
}

impl MetricsLogger {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_log: Instant::now(),
            interval,
        }
    }

    /// Logs and resets `metrics` if the interval has elapsed. Returns
    /// whether it did so.
    pub fn check_and_log(&mut self, metrics: &mut RouterMetrics) -> bool {
        if self.last_log.elapsed() >= self.interval {
            metrics.log();
            metrics.reset();
            self.last_log = Instant::now();
            true
        } else {
            false
        }
    }
}
