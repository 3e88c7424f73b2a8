//! ISO Transport Protocol handler (C5): reassembly of J1939/ISO 11783
//! multi-packet transfers larger than Fast Packet's 223-byte ceiling,
//! carried as PGN 60416 (Connection Management, TP.CM) control frames
//! and PGN 60160 (Data Transfer, TP.DT) data frames.
//!
//! Two transfer modes are supported:
//! - **BAM** (Broadcast Announce Message): `TP.CM_BAM` (control byte
//!   0x20) announces the transfer, followed by `N` `TP.DT` frames with
//!   no flow control. Destination is always broadcast (255).
//! - **RTS/CTS**: `TP.CM_RTS` (0x10) proposes a transfer to a specific
//!   destination, which replies `TP.CM_CTS` (0x11) granting a window of
//!   packets; the sender streams that many `TP.DT` frames, and the
//!   cycle repeats until `TP.CM_EndOfMsgAck` (0x13). Either side may
//!   abort with `TP.Conn.Abort` (0xFF).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A session that receives no frame for this long is aborted (§4.5).
pub const ISO_TP_TIMEOUT: Duration = Duration::from_millis(1250);

const TP_CM_BAM: u8 = 0x20;
const TP_CM_RTS: u8 = 0x10;
const TP_CM_CTS: u8 = 0x11;
const TP_CM_END_OF_MSG_ACK: u8 = 0x13;
const TP_CONN_ABORT: u8 = 0xFF;

pub const PGN_TP_CM: u32 = 60416;
pub const PGN_TP_DT: u32 = 60160;

const DATA_FRAME_LEN: usize = 7;

type SessionKey = (u32, u8, u8); // (carried pgn, sa, da)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Bam,
    RtsCts,
}

struct Session {
    #[allow(dead_code)] // distinguishes BAM from RTS/CTS sessions for diagnostics
    mode: Mode,
    carried_pgn: u32,
    total_len: usize,
    total_packets: u8,
    packets: HashMap<u8, Vec<u8>>,
    last_seen: Instant,
}

impl Session {
    fn is_complete(&self) -> bool {
        self.packets.len() >= self.total_packets as usize
    }

    fn assemble(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.total_len);
        for seq in 1..=self.total_packets {
            if let Some(chunk) = self.packets.get(&seq) {
                data.extend_from_slice(chunk);
            }
        }
        data.truncate(self.total_len);
        data
    }
}

/// Outcome of feeding one frame into the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum IsoTpEvent {
    /// A reassembled message, and the PGN it carries.
    Complete { pgn: u32, data: Vec<u8> },
    /// An RTS was received and a CTS should be sent back to `sa` granting
    /// `packets` packets starting at sequence 1.
    ClearToSend { sa: u8, da: u8, packets: u8 },
    /// No event yet; more frames expected.
    Pending,
}

/// Stateful reassembler for ISO TP (BAM and RTS/CTS) transfers.
pub struct IsoTpHandler {
    sessions: HashMap<SessionKey, Session>,
}

impl IsoTpHandler {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn expire_stale(&mut self, now: Instant) {
        self.sessions
            .retain(|_, s| now.duration_since(s.last_seen) < ISO_TP_TIMEOUT);
    }

    /// Feed a `TP.CM` (connection management, PGN 60416) frame.
    pub fn process_connection_management(&mut self, sa: u8, da: u8, data: &[u8]) -> Result<IsoTpEvent> {
        if data.is_empty() {
            return Err(Error::IsoTpAbort("empty TP.CM frame".into()));
        }
        let control = data[0];
        let now = Instant::now();
        match control {
            TP_CM_BAM | TP_CM_RTS => {
                if data.len() < 8 {
                    return Err(Error::IsoTpAbort("TP.CM frame shorter than 8 bytes".into()));
                }
                let total_len = u16::from_le_bytes([data[1], data[2]]) as usize;
                let total_packets = data[3];
                let carried_pgn = u32::from_le_bytes([data[5], data[6], data[7], 0]);
                let key = (carried_pgn, sa, da);
                self.sessions.insert(
                    key,
                    Session {
                        mode: if control == TP_CM_BAM { Mode::Bam } else { Mode::RtsCts },
                        carried_pgn,
                        total_len,
                        total_packets,
                        packets: HashMap::new(),
                        last_seen: now,
                    },
                );
                if control == TP_CM_RTS {
                    Ok(IsoTpEvent::ClearToSend {
                        sa,
                        da,
                        packets: total_packets,
                    })
                } else {
                    Ok(IsoTpEvent::Pending)
                }
            }
            TP_CM_CTS => Ok(IsoTpEvent::Pending),
            TP_CM_END_OF_MSG_ACK => Ok(IsoTpEvent::Pending),
            TP_CONN_ABORT => {
                self.sessions.retain(|(_, s, d), _| *s != sa || *d != da);
                Err(Error::IsoTpAbort(format!("connection abort from sa {sa}")))
            }
            other => Err(Error::IsoTpAbort(format!("unknown TP.CM control byte {other:#04x}"))),
        }
    }

    /// Feed a `TP.DT` (data transfer, PGN 60160) frame. `sa`/`da` must match
    /// the session opened by the preceding `TP.CM` frame.
    pub fn process_data_transfer(&mut self, sa: u8, da: u8, data: &[u8]) -> Result<Option<(u32, Vec<u8>)>> {
        if data.len() < 2 {
            return Err(Error::IsoTpAbort("TP.DT frame shorter than 2 bytes".into()));
        }
        let seq = data[0];
        let end = (1 + DATA_FRAME_LEN).min(data.len());
        let chunk = data[1..end].to_vec();

        let key_candidates: Vec<SessionKey> = self
            .sessions
            .keys()
            .filter(|(_, s, d)| *s == sa && *d == da)
            .copied()
            .collect();
        let Some(key) = key_candidates.into_iter().next() else {
            return Ok(None);
        };

        let session = self.sessions.get_mut(&key).unwrap();
        session.packets.insert(seq, chunk);
        session.last_seen = Instant::now();

        if session.is_complete() {
            let session = self.sessions.remove(&key).unwrap();
            Ok(Some((session.carried_pgn, session.assemble())))
        } else {
            Ok(None)
        }
    }

    /// Split a payload into outbound BAM frames: one `TP.CM_BAM` control
    /// frame followed by `N` `TP.DT` data frames.
    pub fn fragment_bam(pgn: u32, payload: &[u8]) -> Result<(Vec<u8>, Vec<[u8; 8]>)> {
        if payload.len() > 1785 {
            return Err(Error::IsoTpAbort(format!(
                "payload of {} bytes exceeds ISO TP maximum of 1785",
                payload.len()
            )));
        }
        let total_packets = payload.len().div_ceil(DATA_FRAME_LEN).max(1) as u8;
        let mut cm = vec![TP_CM_BAM];
        cm.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        cm.push(total_packets);
        cm.push(0xFF); // reserved
        cm.extend_from_slice(&pgn.to_le_bytes()[..3]);

        let mut dt_frames = Vec::with_capacity(total_packets as usize);
        for seq in 1..=total_packets {
            let start = (seq as usize - 1) * DATA_FRAME_LEN;
            let end = (start + DATA_FRAME_LEN).min(payload.len());
            let mut frame = [0xFFu8; 8];
            frame[0] = seq;
            frame[1..1 + (end - start)].copy_from_slice(&payload[start..end]);
            dt_frames.push(frame);
        }
        Ok((cm, dt_frames))
    }
}

impl Default for IsoTpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bam_transfer_reassembles() {
        let mut h = IsoTpHandler::new();
        let payload: Vec<u8> = (0..30).collect();
        let (cm, dt_frames) = IsoTpHandler::fragment_bam(126996, &payload).unwrap();

        let event = h.process_connection_management(10, 255, &cm).unwrap();
        assert_eq!(event, IsoTpEvent::Pending);

        let mut result = None;
        for frame in &dt_frames {
            if let Some(r) = h.process_data_transfer(10, 255, frame).unwrap() {
                result = Some(r);
            }
        }
        let (pgn, data) = result.unwrap();
        assert_eq!(pgn, 126996);
        assert_eq!(data, payload);
    }

    #[test]
    fn rts_cts_grants_full_window() {
        let mut h = IsoTpHandler::new();
        let mut rts = vec![TP_CM_RTS];
        rts.extend_from_slice(&20u16.to_le_bytes());
        rts.push(3);
        rts.push(0xFF);
        rts.extend_from_slice(&126996u32.to_le_bytes()[..3]);

        let event = h.process_connection_management(10, 20, &rts).unwrap();
        assert_eq!(
            event,
            IsoTpEvent::ClearToSend {
                sa: 10,
                da: 20,
                packets: 3
            }
        );
    }

    #[test]
    fn conn_abort_drops_session_and_errors() {
        let mut h = IsoTpHandler::new();
        let payload: Vec<u8> = (0..30).collect();
        let (cm, _) = IsoTpHandler::fragment_bam(126996, &payload).unwrap();
        h.process_connection_management(10, 255, &cm).unwrap();

        let abort = [TP_CONN_ABORT, 0, 0, 0, 0, 0, 0, 0];
        let err = h.process_connection_management(10, 255, &abort).unwrap_err();
        assert!(matches!(err, Error::IsoTpAbort(_)));
        assert!(h.sessions.is_empty());
    }

    #[test]
    fn stale_session_expires() {
        let mut h = IsoTpHandler::new();
        let payload: Vec<u8> = (0..30).collect();
        let (cm, _) = IsoTpHandler::fragment_bam(126996, &payload).unwrap();
        h.process_connection_management(10, 255, &cm).unwrap();
        h.expire_stale(Instant::now() + ISO_TP_TIMEOUT + Duration::from_millis(1));
        assert!(h.sessions.is_empty());
    }
}
