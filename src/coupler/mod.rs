//! Coupler Framework (C9): the lifecycle state machine and buffered
//! read helper shared by every concrete coupler, plus the `{open,
//! close, read, write, stop}` interface they all implement.

pub mod can;
pub mod file;
pub mod serial;
pub mod tcp;
pub mod udp;

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::Result;
use crate::generic_msg::GenericMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouplerState {
    NotReady,
    Open,
    Connected,
    Active,
    Suspended,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ReadOnly,
    WriteOnly,
    Bidirectional,
}

const SOFT_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 5;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Tracks the lifecycle state, idle-timeout counting and reconnect
/// backoff shared by every coupler implementation. A coupler embeds
/// this and delegates its `open`/`close`/`read` bookkeeping to it.
pub struct CouplerLifecycle {
    name: String,
    direction: Direction,
    state: CouplerState,
    consecutive_timeouts: u32,
    backoff: Duration,
    messages_received: AtomicU32,
    window_start: Instant,
}

impl CouplerLifecycle {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction,
            state: CouplerState::NotReady,
            consecutive_timeouts: 0,
            backoff: Duration::from_millis(500),
            messages_received: AtomicU32::new(0),
            window_start: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CouplerState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mark_open(&mut self) {
        self.state = CouplerState::Open;
    }

    pub fn mark_connected(&mut self) {
        self.state = CouplerState::Connected;
    }

    pub fn mark_active(&mut self) {
        self.state = CouplerState::Active;
        self.consecutive_timeouts = 0;
        self.backoff = Duration::from_millis(500);
    }

    pub fn mark_suspended(&mut self) {
        self.state = CouplerState::Suspended;
    }

    pub fn mark_not_ready(&mut self) {
        self.state = CouplerState::NotReady;
    }

    pub fn mark_stopped(&mut self) {
        self.state = CouplerState::Stopped;
    }

    /// Record a successful read: resets the idle counter and updates the
    /// 10s EWMA rate window.
    pub fn record_message(&mut self) {
        self.consecutive_timeouts = 0;
        if self.state == CouplerState::Connected {
            self.mark_active();
        }
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        if self.window_start.elapsed() >= Duration::from_secs(10) {
            self.messages_received.store(1, Ordering::Relaxed);
            self.window_start = Instant::now();
        }
    }

    /// Approximate messages/second over the current 10s window.
    pub fn rate(&self) -> f64 {
        let elapsed = self.window_start.elapsed().as_secs_f64().max(1.0);
        self.messages_received.load(Ordering::Relaxed) as f64 / elapsed
    }

    /// Record a soft-timeout read. Returns `true` once `MAX_CONSECUTIVE_TIMEOUTS`
    /// have been hit for a bidirectional coupler and a reconnect should be
    /// attempted.
    pub fn record_timeout(&mut self) -> bool {
        self.consecutive_timeouts += 1;
        self.consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS && self.direction == Direction::Bidirectional
    }

    /// Sleep for the current backoff duration, doubling it (capped) for
    /// next time.
    pub fn backoff_sleep(&mut self) {
        warn!(coupler = self.name.as_str(), backoff_ms = self.backoff.as_millis() as u64, "reconnect backoff");
        std::thread::sleep(self.backoff);
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
    }

    pub fn soft_timeout(&self) -> Duration {
        SOFT_TIMEOUT
    }
}

/// Buffers bytes from any `Read` source and yields complete `\r\n`- or
/// `\n`-terminated lines, one soft-timeout-bounded read at a time. Shared
/// by the TCP, serial and file-replay couplers instead of each
/// reimplementing line splitting.
pub struct BufferedLineReader {
    buffer: Vec<u8>,
}

impl BufferedLineReader {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed freshly read bytes in and drain every complete line now
    /// available, in order. Partial trailing data is kept for next time.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop(); // '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

impl Default for BufferedLineReader {
    fn default() -> Self {
        Self::new()
    }
}

/// `{open, close, read, write, stop}`, implemented once per transport and
/// composed with [`CouplerLifecycle`] rather than via inheritance.
pub trait Coupler: Send {
    fn name(&self) -> &str;
    fn state(&self) -> CouplerState;

    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;

    /// Block for the next message, up to the coupler's soft timeout.
    /// Returns `Ok(None)` on a timeout (not an error).
    fn read(&mut self) -> Result<Option<GenericMessage>>;

    fn write(&mut self, msg: &GenericMessage) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions_track_state() {
        let mut lifecycle = CouplerLifecycle::new("test", Direction::Bidirectional);
        assert_eq!(lifecycle.state(), CouplerState::NotReady);
        lifecycle.mark_open();
        lifecycle.mark_connected();
        lifecycle.record_message();
        assert_eq!(lifecycle.state(), CouplerState::Active);
    }

    #[test]
    fn timeouts_trigger_reconnect_after_threshold() {
        let mut lifecycle = CouplerLifecycle::new("test", Direction::Bidirectional);
        for _ in 0..4 {
            assert!(!lifecycle.record_timeout());
        }
        assert!(lifecycle.record_timeout());
    }

    #[test]
    fn read_only_coupler_never_triggers_reconnect_via_timeout() {
        let mut lifecycle = CouplerLifecycle::new("test", Direction::ReadOnly);
        for _ in 0..10 {
            assert!(!lifecycle.record_timeout());
        }
    }

    #[test]
    fn buffered_line_reader_splits_on_crlf_and_keeps_partial_tail() {
        let mut reader = BufferedLineReader::new();
        let lines = reader.feed(b"$GPGGA,1*00\r\n$GPRMC,2*");
        assert_eq!(lines, vec!["$GPGGA,1*00".to_string()]);
        let lines = reader.feed(b"11\r\n");
        assert_eq!(lines, vec!["$GPRMC,2*11".to_string()]);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut lifecycle = CouplerLifecycle::new("test", Direction::Bidirectional);
        assert_eq!(lifecycle.backoff, Duration::from_millis(500));
        lifecycle.backoff = Duration::from_secs(20);
        lifecycle.backoff = (lifecycle.backoff * 2).min(MAX_BACKOFF);
        assert_eq!(lifecycle.backoff, MAX_BACKOFF);
    }
}
