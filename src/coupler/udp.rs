//! UDP coupler: one NMEA 0183 sentence per datagram, matching the
//! broadcast idiom used for outbound NMEA2000 distribution elsewhere in
//! this router.

use std::net::UdpSocket;

use tracing::debug;

use crate::coupler::{Coupler, CouplerLifecycle, CouplerState, Direction};
use crate::error::{Error, Result};
use crate::generic_msg::{GenericMessage, Payload};
use crate::nmea0183::Nmea0183Sentence;

pub struct UdpCoupler {
    lifecycle: CouplerLifecycle,
    bind_address: String,
    destination: String,
    broadcast: bool,
    socket: Option<UdpSocket>,
    read_buf: [u8; 2048],
}

impl UdpCoupler {
    pub fn new(name: impl Into<String>, bind_address: String, destination: String) -> Self {
        let broadcast = destination.contains(".255");
        Self {
            lifecycle: CouplerLifecycle::new(name, Direction::Bidirectional),
            bind_address,
            destination,
            broadcast,
            socket: None,
            read_buf: [0u8; 2048],
        }
    }

    fn io_err(&self, e: std::io::Error) -> Error {
        Error::CouplerIo {
            name: self.lifecycle.name().to_string(),
            source: e,
        }
    }
}

impl Coupler for UdpCoupler {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> CouplerState {
        self.lifecycle.state()
    }

    fn open(&mut self) -> Result<()> {
        self.lifecycle.mark_open();
        let socket = UdpSocket::bind(&self.bind_address).map_err(|e| self.io_err(e))?;
        if self.broadcast {
            socket.set_broadcast(true).map_err(|e| self.io_err(e))?;
        }
        socket.set_read_timeout(Some(self.lifecycle.soft_timeout())).map_err(|e| self.io_err(e))?;
        self.socket = Some(socket);
        self.lifecycle.mark_connected();
        debug!(coupler = self.lifecycle.name(), destination = self.destination.as_str(), "UDP coupler open");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.socket = None;
        self.lifecycle.mark_not_ready();
        Ok(())
    }

    fn read(&mut self) -> Result<Option<GenericMessage>> {
        let socket = self.socket.as_ref().ok_or_else(|| Error::CouplerStopped {
            name: self.lifecycle.name().to_string(),
        })?;
        match socket.recv_from(&mut self.read_buf) {
            Ok((n, _)) => {
                let text = String::from_utf8_lossy(&self.read_buf[..n]);
                for line in text.lines() {
                    let line = line.trim_end_matches('\r');
                    if line.is_empty() {
                        continue;
                    }
                    self.lifecycle.record_message();
                    let sentence = Nmea0183Sentence::parse(line)
                        .map_err(|_| Error::InvalidNmea0183(line.to_string()))?;
                    return Ok(Some(GenericMessage::new(Payload::Nmea0183(sentence), self.lifecycle.name())));
                }
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                self.lifecycle.record_timeout();
                Ok(None)
            }
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn write(&mut self, msg: &GenericMessage) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(|| Error::CouplerStopped {
            name: self.lifecycle.name().to_string(),
        })?;
        if let Payload::Nmea0183(sentence) = &msg.payload {
            socket
                .send_to(format!("{sentence}\r\n").as_bytes(), &self.destination)
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
