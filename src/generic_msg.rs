//! The generic message envelope (§3): every message moving through
//! couplers, filters and the publisher is wrapped in a [`GenericMessage`]
//! so the routing fabric can treat NMEA 0183, NMEA2000 and raw/transparent
//! traffic uniformly.

use chrono::{DateTime, Utc};

use crate::nmea0183::Nmea0183Sentence;
use nmea2k::N2kMessage;

/// Tags the payload variant carried by a [`GenericMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// An empty/keepalive message, carrying no data.
    Null,
    /// A parsed NMEA 0183 sentence.
    Nmea0183(Nmea0183Sentence),
    /// A reassembled NMEA2000 message.
    N2k(N2kMessage),
    /// Bytes that passed through unparsed (e.g. a coupler in raw mode).
    Transparent(Vec<u8>),
}

/// A message as it flows through couplers, filters and the publisher,
/// carrying the timestamp it was received (or synthesized) at and which
/// coupler produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericMessage {
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
    pub source_coupler: String,
}

impl GenericMessage {
    pub fn new(payload: Payload, source_coupler: impl Into<String>) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            source_coupler: source_coupler.into(),
        }
    }

    pub fn null(source_coupler: impl Into<String>) -> Self {
        Self::new(Payload::Null, source_coupler)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    /// A one-line printable form, used by the trace log and diagnostics.
    pub fn printable(&self) -> String {
        match &self.payload {
            Payload::Null => "<null>".to_string(),
            Payload::Nmea0183(s) => s.to_string(),
            Payload::N2k(m) => format!("N2K pgn={} sa={} da={} prio={}", m.pgn, m.sa, m.da, m.priority),
            Payload::Transparent(bytes) => format!("<{} raw bytes>", bytes.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_message_is_recognized() {
        let msg = GenericMessage::null("can0");
        assert!(msg.is_null());
        assert_eq!(msg.printable(), "<null>");
    }

    #[test]
    fn transparent_payload_prints_byte_count() {
        let msg = GenericMessage::new(Payload::Transparent(vec![1, 2, 3]), "serial0");
        assert_eq!(msg.printable(), "<3 raw bytes>");
    }
}
