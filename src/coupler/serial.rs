//! Serial coupler: one NMEA 0183 sentence per line over an RS-422/USB
//! serial connection (e.g. a GPS receiver or autopilot bus).

use std::collections::VecDeque;
use std::io::{Read, Write};

use serialport::SerialPort;

use crate::coupler::{BufferedLineReader, Coupler, CouplerLifecycle, CouplerState, Direction};
use crate::error::{Error, Result};
use crate::generic_msg::{GenericMessage, Payload};
use crate::nmea0183::Nmea0183Sentence;

pub struct SerialCoupler {
    lifecycle: CouplerLifecycle,
    device: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
    reader: BufferedLineReader,
    pending_lines: VecDeque<String>,
    read_buf: [u8; 1024],
}

impl SerialCoupler {
    pub fn new(name: impl Into<String>, device: String, baud_rate: u32) -> Self {
        Self {
            lifecycle: CouplerLifecycle::new(name, Direction::Bidirectional),
            device,
            baud_rate,
            port: None,
            reader: BufferedLineReader::new(),
            pending_lines: VecDeque::new(),
            read_buf: [0u8; 1024],
        }
    }

    fn io_err(&self, e: std::io::Error) -> Error {
        Error::CouplerIo {
            name: self.lifecycle.name().to_string(),
            source: e,
        }
    }
}

impl Coupler for SerialCoupler {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> CouplerState {
        self.lifecycle.state()
    }

    fn open(&mut self) -> Result<()> {
        self.lifecycle.mark_open();
        let port = serialport::new(&self.device, self.baud_rate)
            .timeout(self.lifecycle.soft_timeout())
            .open()
            .map_err(|e| Error::CouplerIo {
                name: self.lifecycle.name().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
        self.port = Some(port);
        self.lifecycle.mark_connected();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.port = None;
        self.lifecycle.mark_not_ready();
        Ok(())
    }

    fn read(&mut self) -> Result<Option<GenericMessage>> {
        if let Some(line) = self.pending_lines.pop_front() {
            self.lifecycle.record_message();
            let sentence = Nmea0183Sentence::parse(&line).map_err(|_| Error::InvalidNmea0183(line.clone()))?;
            return Ok(Some(GenericMessage::new(Payload::Nmea0183(sentence), self.lifecycle.name())));
        }

        let port = self.port.as_mut().ok_or_else(|| Error::CouplerStopped {
            name: self.lifecycle.name().to_string(),
        })?;
        match port.read(&mut self.read_buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                self.pending_lines.extend(self.reader.feed(&self.read_buf[..n]));
                if let Some(line) = self.pending_lines.pop_front() {
                    self.lifecycle.record_message();
                    let sentence = Nmea0183Sentence::parse(&line)
                        .map_err(|_| Error::InvalidNmea0183(line.clone()))?;
                    Ok(Some(GenericMessage::new(Payload::Nmea0183(sentence), self.lifecycle.name())))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                if self.lifecycle.record_timeout() {
                    self.close()?;
                    self.lifecycle.backoff_sleep();
                    self.open()?;
                }
                Ok(None)
            }
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn write(&mut self, msg: &GenericMessage) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| Error::CouplerStopped {
            name: self.lifecycle.name().to_string(),
        })?;
        if let Payload::Nmea0183(sentence) = &msg.payload {
            port.write_all(format!("{sentence}\r\n").as_bytes())
                .map_err(|e| self.io_err(e))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let _ = self.close();
        self.lifecycle.mark_stopped();
        Ok(())
    }
}
