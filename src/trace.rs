//! Trace file format (§6): an append-only, human-readable log of every
//! message a coupler sees, plus raw bytes and free-form events. One
//! `MessageTrace` instance owns one file and a monotonic per-trace
//! record counter; all writes go through a mutex so couplers on
//! different threads can share a trace file safely.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;

use crate::error::Result;
use crate::generic_msg::GenericMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn marker(self) -> char {
        match self {
            Direction::In => '>',
            Direction::Out => '<',
        }
    }
}

struct Inner {
    file: File,
    count: u64,
}

/// Append-only trace file, format version `V1.4`.
///
/// Record framing:
/// - `M<n>#<ts>` + printable message + `\n`
/// - `R<n>#<ts>` + raw bytes (decoded as UTF-8 where possible) + `\n`
/// - `N<n>#` + `<pgn>|<pgn in hex>|<sa>|<priority>|<hex data>` + `\n`
/// - `Event<n>#` + free text + `\n`
pub struct MessageTrace {
    name: String,
    inner: Mutex<Inner>,
}

impl MessageTrace {
    pub fn open(trace_dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let dir = trace_dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%y%m%d-%H%M%S");
        let path = dir.join(format!("TRACE-{name}-{stamp}.log"));
        let mut file = File::create(&path)?;
        writeln!(file, "H0|{name}|V1.4")?;
        Ok(Self {
            name: name.to_string(),
            inner: Mutex::new(Inner { file, count: 0 }),
        })
    }

    fn next_count(inner: &mut Inner) -> u64 {
        let n = inner.count;
        inner.count += 1;
        n
    }

    pub fn trace_message(&self, direction: Direction, msg: &GenericMessage) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let n = Self::next_count(&mut inner);
        let ts = msg.timestamp.format("%Y-%m-%d %H:%M:%S%.6f");
        writeln!(inner.file, "M{n}#{ts}{}{}", direction.marker(), msg.printable())?;
        Ok(())
    }

    pub fn trace_raw(&self, direction: Direction, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let n = Self::next_count(&mut inner);
        let ts = Utc::now().format("%Y-%m-%d %H:%M:%S%.6f");
        let text = String::from_utf8_lossy(data);
        writeln!(inner.file, "R{n}#{ts}{}{}", direction.marker(), text)?;
        Ok(())
    }

    pub fn trace_n2k_raw(&self, pgn: u32, sa: u8, priority: u8, data: &[u8], direction: Direction) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let n = Self::next_count(&mut inner);
        let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
        let marker = direction.marker();
        writeln!(inner.file, "N{n}#{marker}{pgn:06}|{pgn:05X}|{sa:3}|{priority}|{hex}")?;
        Ok(())
    }

    pub fn add_event(&self, message: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let n = Self::next_count(&mut inner);
        writeln!(inner.file, "Event{n}#{message}")?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generic_msg::Payload;
    use tempfile::tempdir;

    #[test]
    fn header_and_records_are_written() {
        let dir = tempdir().unwrap();
        let trace = MessageTrace::open(dir.path(), "can0").unwrap();
        let msg = GenericMessage::null("can0");
        trace.trace_message(Direction::In, &msg).unwrap();
        trace.trace_raw(Direction::Out, b"$GPGGA*00").unwrap();
        trace.trace_n2k_raw(129025, 10, 3, &[1, 2, 3, 4], Direction::In).unwrap();
        trace.add_event("coupler started").unwrap();

        let contents = std::fs::read_to_string(
            std::fs::read_dir(dir.path())
                .unwrap()
                .next()
                .unwrap()
                .unwrap()
                .path(),
        )
        .unwrap();
        assert!(contents.starts_with("H0|can0|V1.4\n"));
        assert!(contents.contains("M0#"));
        assert!(contents.contains("R1#"));
        assert!(contents.contains("N2#"));
        assert!(contents.contains("Event3#coupler started"));
    }

    #[test]
    fn counter_is_monotonic_across_record_kinds() {
        let dir = tempdir().unwrap();
        let trace = MessageTrace::open(dir.path(), "test").unwrap();
        let msg = GenericMessage::new(Payload::Null, "test");
        for _ in 0..3 {
            trace.trace_message(Direction::In, &msg).unwrap();
        }
        assert_eq!(trace.inner.lock().unwrap().count, 3);
    }
}
