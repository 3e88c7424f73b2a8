//! CAN Interface (C6): owns the SocketCAN device, reassembles Fast
//! Packet and ISO TP traffic into [`N2kMessage`]s, and exposes a
//! per-source-address outbound send queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket};
use tracing::{error, info, warn};

use nmea2k::can_id::CanId;
use nmea2k::fast_packet::FastPacketHandler;
use nmea2k::iso_tp::{IsoTpEvent, IsoTpHandler, PGN_TP_CM, PGN_TP_DT};
use nmea2k::message::N2kMessage;

use crate::error::{Error, Result};

const RETRY_DELAY: Duration = Duration::from_secs(10);

/// PGNs known to be carried over Fast Packet rather than a single frame.
/// Mirrors the catalogue's `fast_packet` flag for PGNs the catalogue
/// hasn't been consulted for yet (e.g. before the catalogue is wired in).
fn is_fast_packet_pgn(pgn: u32) -> bool {
    matches!(
        pgn,
        126996 | 126998 | 127233 | 127237 | 127489 | 127493 | 127505 | 128275 | 129029 | 129038
            | 129039 | 129540 | 129794 | 129809 | 129810 | 130306 | 130313 | 65240
    )
}

fn open_can_socket_with_retry(interface: &str, stop: &AtomicBool) -> Option<CanSocket> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match CanSocket::open(interface) {
            Ok(socket) => {
                info!(interface, "opened CAN interface");
                return Some(socket);
            }
            Err(e) => {
                error!(interface, error = %e, "failed to open CAN interface, retrying");
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }
}

/// Reads and writes one SocketCAN device, reassembling multi-frame PGNs
/// and stamping outbound frames with the addresses registered by CAs.
pub struct CanInterface {
    interface: String,
    socket: Mutex<Option<CanSocket>>,
    fast_packet: Mutex<FastPacketHandler>,
    iso_tp: Mutex<IsoTpHandler>,
    send_lock: Mutex<()>,
    registered_addresses: Mutex<Vec<u8>>,
}

impl CanInterface {
    pub fn open(interface: &str, stop: &AtomicBool) -> Result<Self> {
        let socket = open_can_socket_with_retry(interface, stop);
        Ok(Self {
            interface: interface.to_string(),
            socket: Mutex::new(socket),
            fast_packet: Mutex::new(FastPacketHandler::new()),
            iso_tp: Mutex::new(IsoTpHandler::new()),
            send_lock: Mutex::new(()),
            registered_addresses: Mutex::new(Vec::new()),
        })
    }

    pub fn add_address(&self, address: u8) {
        self.registered_addresses.lock().unwrap().push(address);
    }

    pub fn remove_address(&self, address: u8) {
        self.registered_addresses.lock().unwrap().retain(|a| *a != address);
    }

    /// Replace the whole registered-address set, e.g. after the
    /// controller's applications have claimed or re-claimed addresses.
    pub fn sync_addresses(&self, addresses: &[u8]) {
        *self.registered_addresses.lock().unwrap() = addresses.to_vec();
    }

    /// Block for the next reassembled message, reconnecting the socket on
    /// I/O error. Returns `None` once `stop` is set.
    pub fn read(&self, stop: &AtomicBool) -> Option<N2kMessage> {
        loop {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            let frame = {
                let mut guard = self.socket.lock().unwrap();
                match guard.as_ref() {
                    Some(socket) => socket.read_frame(),
                    None => {
                        *guard = open_can_socket_with_retry(&self.interface, stop).map(Some).unwrap_or(None);
                        continue;
                    }
                }
            };

            match frame {
                Ok(frame) => {
                    if let Some(msg) = self.process_frame(&frame) {
                        return Some(msg);
                    }
                }
                Err(e) => {
                    warn!(interface = self.interface.as_str(), error = %e, "CAN read error, reconnecting");
                    let mut guard = self.socket.lock().unwrap();
                    *guard = open_can_socket_with_retry(&self.interface, stop);
                }
            }
            self.expire_stale_sessions();
        }
    }

    fn expire_stale_sessions(&self) {
        let now = Instant::now();
        self.fast_packet.lock().unwrap().expire_stale(now);
        self.iso_tp.lock().unwrap().expire_stale(now);
    }

    fn process_frame(&self, frame: &socketcan::CanFrame) -> Option<N2kMessage> {
        let raw_id = frame.can_id().as_raw();
        let id = CanId::decode(raw_id);
        let data = frame.data();

        if id.pgn == PGN_TP_CM {
            return self.handle_tp_cm(&id, data);
        }
        if id.pgn == PGN_TP_DT {
            return self.handle_tp_dt(&id, data);
        }
        if is_fast_packet_pgn(id.pgn) {
            return self.handle_fast_packet(&id, data);
        }

        Some(N2kMessage::new(id.priority, id.pgn, id.sa, id.da, data.to_vec()))
    }

    fn handle_fast_packet(&self, id: &CanId, data: &[u8]) -> Option<N2kMessage> {
        match self.fast_packet.lock().unwrap().process_frame(id.pgn, id.sa, data) {
            Ok(Some(payload)) => Some(N2kMessage {
                priority: id.priority,
                pgn: id.pgn,
                sa: id.sa,
                da: id.da,
                payload,
                reassembled: true,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(pgn = id.pgn, sa = id.sa, error = %e, "fast packet reassembly error");
                None
            }
        }
    }

    fn handle_tp_cm(&self, id: &CanId, data: &[u8]) -> Option<N2kMessage> {
        match self.iso_tp.lock().unwrap().process_connection_management(id.sa, id.da, data) {
            Ok(IsoTpEvent::ClearToSend { .. } | IsoTpEvent::Pending) => None,
            Ok(IsoTpEvent::Complete { pgn, data }) => Some(N2kMessage {
                priority: id.priority,
                pgn,
                sa: id.sa,
                da: id.da,
                payload: data,
                reassembled: true,
            }),
            Err(e) => {
                warn!(sa = id.sa, error = %e, "ISO TP connection management error");
                None
            }
        }
    }

    fn handle_tp_dt(&self, id: &CanId, data: &[u8]) -> Option<N2kMessage> {
        match self.iso_tp.lock().unwrap().process_data_transfer(id.sa, id.da, data) {
            Ok(Some((pgn, payload))) => Some(N2kMessage {
                priority: id.priority,
                pgn,
                sa: id.sa,
                da: id.da,
                payload,
                reassembled: true,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(sa = id.sa, error = %e, "ISO TP data transfer error");
                None
            }
        }
    }

    /// Send a single-frame message. Fast Packet/ISO TP fragmentation of
    /// outbound messages is the caller's responsibility (see
    /// [`nmea2k::fast_packet::FastPacketHandler::fragment`]).
    pub fn send(&self, msg: &N2kMessage) -> Result<()> {
        let _guard = self.send_lock.lock().unwrap();
        if !self.registered_addresses.lock().unwrap().contains(&msg.sa) {
            return Err(Error::UnregisteredSourceAddress { sa: msg.sa });
        }
        let id = CanId::new(msg.priority, msg.pgn, msg.sa, msg.da);
        let extended = ExtendedId::new(id.encode()).ok_or_else(|| {
            Error::CanBus {
                interface: self.interface.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "CAN id out of range"),
            }
        })?;
        let frame = socketcan::CanFrame::new(extended, &msg.payload).ok_or_else(|| Error::CanBus {
            interface: self.interface.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload too long for a CAN frame"),
        })?;
        let guard = self.socket.lock().unwrap();
        match guard.as_ref() {
            Some(socket) => socket.write_frame(&frame).map_err(|e| Error::CanBus {
                interface: self.interface.clone(),
                source: e,
            }),
            None => Err(Error::CanBus {
                interface: self.interface.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "CAN socket not open"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_packet_pgn_classification_matches_catalogue_entries() {
        assert!(is_fast_packet_pgn(126996));
        assert!(is_fast_packet_pgn(130306));
        assert!(!is_fast_packet_pgn(129025));
    }

    fn unopened_interface() -> CanInterface {
        CanInterface {
            interface: "vcan0".to_string(),
            socket: Mutex::new(None),
            fast_packet: Mutex::new(FastPacketHandler::new()),
            iso_tp: Mutex::new(IsoTpHandler::new()),
            send_lock: Mutex::new(()),
            registered_addresses: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn send_rejects_unregistered_source_address() {
        let iface = unopened_interface();
        let msg = N2kMessage::new(3, 127250, 40, 255, vec![0; 8]);
        let err = iface.send(&msg).unwrap_err();
        assert!(matches!(err, Error::UnregisteredSourceAddress { sa: 40 }));
    }

    #[test]
    fn send_proceeds_past_registration_check_for_a_registered_address() {
        let iface = unopened_interface();
        iface.add_address(40);
        let msg = N2kMessage::new(3, 127250, 40, 255, vec![0; 8]);
        // No socket open, so this fails on the CAN-bus write, not the
        // registration check.
        let err = iface.send(&msg).unwrap_err();
        assert!(matches!(err, Error::CanBus { .. }));
    }
}
