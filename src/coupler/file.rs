//! File-replay coupler: reads back the trace format of §6 for offline
//! replay and testing, reproducing the original message pacing from the
//! recorded timestamps.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::coupler::{Coupler, CouplerLifecycle, CouplerState, Direction};
use crate::error::{Error, Result};
use crate::generic_msg::{GenericMessage, Payload};
use crate::nmea0183::Nmea0183Sentence;

struct ScheduledLine {
    at: Option<DateTime<Utc>>,
    text: String,
}

/// Replays the `M#`/`N#` records of a trace file as if they were arriving
/// live, read-only. `R#`/`Event#` records and the `H0` header are skipped.
pub struct FileCoupler {
    lifecycle: CouplerLifecycle,
    path: String,
    lines: Option<std::vec::IntoIter<ScheduledLine>>,
    first_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
}

impl FileCoupler {
    pub fn new(name: impl Into<String>, path: String) -> Self {
        Self {
            lifecycle: CouplerLifecycle::new(name, Direction::ReadOnly),
            path,
            lines: None,
            first_at: None,
            started: None,
        }
    }

    fn parse_line(raw: &str) -> Option<ScheduledLine> {
        let (_, rest) = raw.split_once('#')?;
        if raw.starts_with('M') {
            let at_end = rest.find(['>', '<'])?;
            let (ts, body) = rest.split_at(at_end);
            let body = &body[1..];
            let at = NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S%.6f")
                .ok()
                .map(|naive| naive.and_utc());
            Some(ScheduledLine { at, text: body.to_string() })
        } else {
            None
        }
    }
}

impl Coupler for FileCoupler {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> CouplerState {
        self.lifecycle.state()
    }

    fn open(&mut self) -> Result<()> {
        self.lifecycle.mark_open();
        let file = File::open(&self.path).map_err(|e| Error::CouplerIo {
            name: self.lifecycle.name().to_string(),
            source: e,
        })?;
        let reader = BufReader::new(file);
        let mut scheduled = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| Error::CouplerIo {
                name: self.lifecycle.name().to_string(),
                source: e,
            })?;
            if line.starts_with("H0|") {
                continue;
            }
            if let Some(entry) = Self::parse_line(&line) {
                scheduled.push(entry);
            }
        }
        self.first_at = scheduled.first().and_then(|l| l.at);
        self.lines = Some(scheduled.into_iter());
        self.started = Some(Instant::now());
        self.lifecycle.mark_connected();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lines = None;
        self.lifecycle.mark_not_ready();
        Ok(())
    }

    fn read(&mut self) -> Result<Option<GenericMessage>> {
        let iter = self.lines.as_mut().ok_or_else(|| Error::CouplerStopped {
            name: self.lifecycle.name().to_string(),
        })?;
        let Some(entry) = iter.next() else {
            return Err(Error::CouplerStopped {
                name: self.lifecycle.name().to_string(),
            });
        };

        if let (Some(at), Some(first), Some(started)) = (entry.at, self.first_at, self.started) {
            let target_offset = (at - first).to_std().unwrap_or(Duration::ZERO);
            let elapsed = started.elapsed();
            if target_offset > elapsed {
                std::thread::sleep(target_offset - elapsed);
            }
        }

        self.lifecycle.record_message();
        if entry.text.starts_with('$') || entry.text.starts_with('!') {
            let sentence = Nmea0183Sentence::parse(&entry.text)
                .map_err(|_| Error::InvalidNmea0183(entry.text.clone()))?;
            Ok(Some(GenericMessage::new(Payload::Nmea0183(sentence), self.lifecycle.name())))
        } else {
            Ok(Some(GenericMessage::new(Payload::Transparent(entry.text.into_bytes()), self.lifecycle.name())))
        }
    }

    fn write(&mut self, _msg: &GenericMessage) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let _ = self.close();
        self.lifecycle.mark_stopped();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn replays_message_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.log");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "H0|can0|V1.4").unwrap();
        writeln!(file, "M0#2026-01-01 00:00:00.000000>$GPGGA,1*4B").unwrap();
        writeln!(file, "M1#2026-01-01 00:00:00.001000>$GPRMC,2*55").unwrap();
        drop(file);

        let mut coupler = FileCoupler::new("replay", path.to_string_lossy().into_owned());
        coupler.open().unwrap();
        let first = coupler.read().unwrap().unwrap();
        let second = coupler.read().unwrap().unwrap();
        assert_eq!(first.printable(), "$GPGGA,1*4B");
        assert_eq!(second.printable(), "$GPRMC,2*55");
        assert!(coupler.read().is_err());
    }
}
