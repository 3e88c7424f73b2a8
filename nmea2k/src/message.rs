//! The generic NMEA2000 message: a decoded CAN identifier plus its
//! payload, as handed between the Fast Packet/ISO TP handlers, the
//! controller and applications.

use crate::can_id::CanId;

/// The fixed set of PGNs belonging to the ISO 11783 / J1939 protocol
/// layer (address claim, requests, connection management, commanded
/// address). Nothing else is special-cased.
pub fn is_iso_protocol_pgn(pgn: u32) -> bool {
    matches!(
        pgn,
        59904   // ISO Request
        | 59392 // ISO Acknowledgement
        | 60928 // ISO Address Claim
        | 60416 // TP.CM
        | 65240 // Commanded Address
    )
}

/// A fully reassembled NMEA2000 message ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct N2kMessage {
    pub priority: u8,
    pub pgn: u32,
    pub sa: u8,
    pub da: u8,
    pub payload: Vec<u8>,
    /// True if this message was reassembled from multiple Fast Packet or
    /// ISO TP frames rather than delivered in a single CAN frame.
    pub reassembled: bool,
}

impl N2kMessage {
    pub fn new(priority: u8, pgn: u32, sa: u8, da: u8, payload: Vec<u8>) -> Self {
        Self {
            priority,
            pgn,
            sa,
            da,
            payload,
            reassembled: false,
        }
    }

    pub fn from_single_frame(id: CanId, payload: Vec<u8>) -> Self {
        Self {
            priority: id.priority,
            pgn: id.pgn,
            sa: id.sa,
            da: id.da,
            payload,
            reassembled: false,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.da == 255
    }

    pub fn is_iso_protocol(&self) -> bool {
        is_iso_protocol_pgn(self.pgn)
    }

    pub fn can_id(&self) -> CanId {
        CanId::new(self.priority, self.pgn, self.sa, self.da)
    }
}
