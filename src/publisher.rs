//! Publisher / Router (C11): one bounded inbound queue per publisher,
//! non-blocking `push` from coupler threads, and an ordered fan-out to
//! sinks with per-sink quarantine on repeated failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{error, info, warn};

use crate::config::{DropPolicy, PublisherConfig};
use crate::error::Result;
use crate::filter::FilterSet;
use crate::generic_msg::GenericMessage;
use crate::trace::{Direction, MessageTrace};

/// A destination for routed messages: a socket, a file, another coupler.
pub trait Sink: Send {
    fn name(&self) -> &str;
    fn write(&mut self, msg: &GenericMessage) -> Result<()>;
}

const QUARANTINE_DURATION: Duration = Duration::from_secs(2);

struct SinkSlot {
    sink: Box<dyn Sink>,
    consecutive_failures: u32,
    quarantined_until: Option<Instant>,
    dropped: bool,
}

/// Running counters a publisher exposes for monitoring, per §7.
#[derive(Debug, Default)]
pub struct PublisherStats {
    pub messages_delivered: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub sinks_quarantined: AtomicU64,
    pub sinks_permanently_dropped: AtomicU64,
}

/// Bounded inbound queue plus ordered fan-out to sinks, per the design in
/// §4.11.
pub struct Publisher {
    name: String,
    sender: Sender<GenericMessage>,
    receiver: Receiver<GenericMessage>,
    drop_policy: DropPolicy,
    filters: Mutex<FilterSet>,
    sinks: Mutex<Vec<SinkSlot>>,
    stats: Arc<PublisherStats>,
    trace: Option<Arc<MessageTrace>>,
    quarantine_duration: Duration,
    quarantine_failures_before_drop: u32,
}

impl Publisher {
    pub fn new(name: impl Into<String>, config: &PublisherConfig, filters: FilterSet) -> Self {
        let (sender, receiver) = bounded(config.queue_depth);
        Self {
            name: name.into(),
            sender,
            receiver,
            drop_policy: config.drop_policy,
            filters: Mutex::new(filters),
            sinks: Mutex::new(Vec::new()),
            stats: Arc::new(PublisherStats::default()),
            trace: None,
            quarantine_duration: QUARANTINE_DURATION,
            quarantine_failures_before_drop: config.sink_quarantine_threshold,
        }
    }

    pub fn with_trace(mut self, trace: Arc<MessageTrace>) -> Self {
        self.trace = Some(trace);
        self
    }

    #[cfg(test)]
    fn with_quarantine_duration(mut self, duration: Duration) -> Self {
        self.quarantine_duration = duration;
        self
    }

    pub fn add_sink(&self, sink: Box<dyn Sink>) {
        self.sinks.lock().unwrap().push(SinkSlot {
            sink,
            consecutive_failures: 0,
            quarantined_until: None,
            dropped: false,
        });
    }

    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }

    /// Non-blocking try-put from a coupler thread. On a full queue, applies
    /// the configured drop policy.
    pub fn push(&self, msg: GenericMessage) {
        match self.sender.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => self.handle_full_queue(msg),
            Err(TrySendError::Disconnected(_)) => {
                warn!(publisher = self.name.as_str(), "push to disconnected publisher queue");
            }
        }
    }

    fn handle_full_queue(&self, msg: GenericMessage) {
        self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
        match self.drop_policy {
            DropPolicy::DropNewest => {
                warn!(publisher = self.name.as_str(), "queue full, dropping newest message");
            }
            DropPolicy::DropOldest => {
                if self.receiver.try_recv().is_ok() {
                    let _ = self.sender.try_send(msg);
                }
                warn!(publisher = self.name.as_str(), "queue full, dropped oldest message");
            }
            DropPolicy::BlockBriefly => {
                if self.sender.send_timeout(msg, Duration::from_millis(50)).is_err() {
                    warn!(publisher = self.name.as_str(), "queue still full after brief block, message dropped");
                }
            }
        }
    }

    /// Pop and dispatch one message: apply filters, then fan out to sinks
    /// in order. Returns `false` if the queue was empty. Intended to run
    /// in a dedicated publisher thread.
    pub fn pump_one(&self) -> bool {
        let msg = match self.receiver.recv_timeout(Duration::from_millis(200)) {
            Ok(msg) => msg,
            Err(_) => return false,
        };

        if let Some(trace) = &self.trace {
            let _ = trace.trace_message(Direction::In, &msg);
        }

        let accepted = self.filters.lock().unwrap().accept(&msg);
        if !accepted {
            return true;
        }

        let mut sinks = self.sinks.lock().unwrap();
        let now = Instant::now();
        for slot in sinks.iter_mut() {
            if slot.dropped {
                continue;
            }
            if let Some(until) = slot.quarantined_until {
                if now < until {
                    continue;
                }
            }
            match slot.sink.write(&msg) {
                Ok(()) => {
                    slot.consecutive_failures = 0;
                    slot.quarantined_until = None;
                    self.stats.messages_delivered.fetch_add(1, Ordering::Relaxed);
                    if let Some(trace) = &self.trace {
                        let _ = trace.trace_message(Direction::Out, &msg);
                    }
                }
                Err(e) => {
                    slot.consecutive_failures += 1;
                    error!(sink = slot.sink.name(), error = %e, failures = slot.consecutive_failures, "sink write failed");
                    if slot.consecutive_failures >= self.quarantine_failures_before_drop {
                        slot.dropped = true;
                        self.stats.sinks_permanently_dropped.fetch_add(1, Ordering::Relaxed);
                        if let Some(trace) = &self.trace {
                            let _ = trace.add_event(&format!("sink {} permanently dropped", slot.sink.name()));
                        }
                        warn!(sink = slot.sink.name(), "sink permanently dropped after repeated failures");
                    } else {
                        slot.quarantined_until = Some(now + self.quarantine_duration);
                        self.stats.sinks_quarantined.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        true
    }

    /// Run the publisher's pump loop until `stop` is set.
    pub fn run(&self, stop: &std::sync::atomic::AtomicBool) {
        info!(publisher = self.name.as_str(), "publisher starting");
        while !stop.load(Ordering::Relaxed) {
            self.pump_one();
        }
        info!(publisher = self.name.as_str(), "publisher stopped");
    }
}
