//! Fast Packet Handler (C4): reassembly of NMEA2000 Fast Packet messages
//! (up to 223 bytes carried over a sequence of 8-byte CAN frames) and the
//! inverse fragmentation for outbound sends.
//!
//! Frame layout:
//! - first frame: byte 0 = `(group_counter << 5) | 0`, byte 1 = total
//!   message length, bytes 2..8 = first 6 data bytes.
//! - subsequent frames: byte 0 = `(group_counter << 5) | frame_index`,
//!   bytes 1..8 = next 7 data bytes.
//!
//! `frame_index` rolls 1..=31 (5 bits); `group_counter` (3 bits) changes
//! between independent transfers of the same (PGN, source) so a stale
//! tail frame from a previous transfer is never mistaken for the start
//! of a new one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Sessions older than this without a new frame are dropped as stale.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(750);

const FIRST_FRAME_DATA_LEN: usize = 6;
const SUBSEQUENT_FRAME_DATA_LEN: usize = 7;
const MAX_PAYLOAD_LEN: usize = 223;

type SessionKey = (u32, u8);

struct Session {
    group_counter: u8,
    total_len: usize,
    data: Vec<u8>,
    next_frame_index: u8,
    last_seen: Instant,
}

impl Session {
    fn expected_frames(total_len: usize) -> usize {
        if total_len <= FIRST_FRAME_DATA_LEN {
            1
        } else {
            1 + (total_len - FIRST_FRAME_DATA_LEN).div_ceil(SUBSEQUENT_FRAME_DATA_LEN)
        }
    }

    fn is_complete(&self) -> bool {
        self.data.len() >= self.total_len
    }
}

/// Stateful per-(PGN, source address) Fast Packet reassembler.
pub struct FastPacketHandler {
    sessions: HashMap<SessionKey, Session>,
}

impl FastPacketHandler {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Drop any reassembly session that has been idle longer than
    /// [`REASSEMBLY_TIMEOUT`]. Should be called periodically by the owner
    /// of the handler (e.g. once per CAN interface poll cycle).
    pub fn expire_stale(&mut self, now: Instant) {
        self.sessions
            .retain(|_, session| now.duration_since(session.last_seen) < REASSEMBLY_TIMEOUT);
    }

    /// Feed one CAN frame belonging to `pgn`/`sa` into the reassembler.
    /// Returns `Ok(Some(payload))` once the transfer completes, `Ok(None)`
    /// while more frames are expected.
    pub fn process_frame(&mut self, pgn: u32, sa: u8, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        if frame.is_empty() {
            return Err(Error::FastPacketError("empty CAN frame".into()));
        }
        let group_counter = frame[0] >> 5;
        let frame_index = frame[0] & 0x1F;
        let key = (pgn, sa);
        let now = Instant::now();

        if frame_index == 0 {
            if frame.len() < 2 {
                return Err(Error::FastPacketError("first frame missing length byte".into()));
            }
            let total_len = frame[1] as usize;
            if total_len > MAX_PAYLOAD_LEN {
                return Err(Error::FastPacketError(format!(
                    "fast packet length {total_len} exceeds maximum {MAX_PAYLOAD_LEN}"
                )));
            }
            let mut data = frame[2..].to_vec();
            data.truncate(total_len.min(data.len()));
            let mut session = Session {
                group_counter,
                total_len,
                data,
                next_frame_index: 1,
                last_seen: now,
            };
            if session.is_complete() {
                self.sessions.remove(&key);
                let mut data = session.data;
                data.truncate(session.total_len);
                return Ok(Some(data));
            }
            self.sessions.insert(key, session);
            return Ok(None);
        }

        let session = match self.sessions.get_mut(&key) {
            Some(s) => s,
            None => {
                // Stray continuation frame with no open session; ignore per
                // §4.3's edge-case handling rather than erroring the reader.
                return Ok(None);
            }
        };

        if group_counter != session.group_counter || frame_index != session.next_frame_index {
            // Out-of-sequence or from a different transfer: abandon this
            // session rather than splice frames from two overlapping sends.
            self.sessions.remove(&key);
            return Err(Error::FastPacketError(format!(
                "out of sequence fast packet frame for pgn {pgn} sa {sa}"
            )));
        }

        session.data.extend_from_slice(&frame[1..]);
        session.last_seen = now;
        session.next_frame_index = session.next_frame_index.wrapping_add(1);

        if session.is_complete() {
            let mut session = self.sessions.remove(&key).unwrap();
            session.data.truncate(session.total_len);
            Ok(Some(session.data))
        } else {
            Ok(None)
        }
    }

    /// Split a payload into outbound 8-byte Fast Packet frames, stamping
    /// `group_counter` into every frame's top 3 bits.
    pub fn fragment(payload: &[u8], group_counter: u8) -> Result<Vec<[u8; 8]>> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::FastPacketError(format!(
                "payload of {} bytes exceeds maximum {MAX_PAYLOAD_LEN}",
                payload.len()
            )));
        }
        let group_counter = group_counter & 0x7;
        let mut frames = Vec::with_capacity(Session::expected_frames(payload.len()));

        let mut frame = [0xFFu8; 8];
        frame[0] = group_counter << 5;
        frame[1] = payload.len() as u8;
        let first_chunk_len = payload.len().min(FIRST_FRAME_DATA_LEN);
        frame[2..2 + first_chunk_len].copy_from_slice(&payload[..first_chunk_len]);
        frames.push(frame);

        let mut offset = first_chunk_len;
        let mut frame_index: u8 = 1;
        while offset < payload.len() {
            let chunk_len = (payload.len() - offset).min(SUBSEQUENT_FRAME_DATA_LEN);
            let mut frame = [0xFFu8; 8];
            frame[0] = (group_counter << 5) | (frame_index & 0x1F);
            frame[1..1 + chunk_len].copy_from_slice(&payload[offset..offset + chunk_len]);
            frames.push(frame);
            offset += chunk_len;
            frame_index = frame_index.wrapping_add(1);
        }
        Ok(frames)
    }
}

impl Default for FastPacketHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_fast_packet_completes_immediately() {
        let mut h = FastPacketHandler::new();
        let payload = vec![1, 2, 3, 4];
        let frames = FastPacketHandler::fragment(&payload, 0).unwrap();
        assert_eq!(frames.len(), 1);
        let result = h.process_frame(126996, 10, &frames[0]).unwrap();
        assert_eq!(result, Some(payload));
    }

    #[test]
    fn multi_frame_reassembles_in_order() {
        let mut h = FastPacketHandler::new();
        let payload: Vec<u8> = (0..40).collect();
        let frames = FastPacketHandler::fragment(&payload, 2).unwrap();
        assert!(frames.len() > 1);

        let mut result = None;
        for frame in &frames {
            result = h.process_frame(126996, 10, frame).unwrap();
        }
        assert_eq!(result, Some(payload));
    }

    #[test]
    fn interleaved_sources_do_not_cross_contaminate() {
        let mut h = FastPacketHandler::new();
        let payload_a: Vec<u8> = (0..20).collect();
        let payload_b: Vec<u8> = (100..130).collect();
        let frames_a = FastPacketHandler::fragment(&payload_a, 0).unwrap();
        let frames_b = FastPacketHandler::fragment(&payload_b, 1).unwrap();

        let mut result_a = None;
        let mut result_b = None;
        for i in 0..frames_a.len().max(frames_b.len()) {
            if let Some(f) = frames_a.get(i) {
                if let Some(r) = h.process_frame(130312, 5, f).unwrap() {
                    result_a = Some(r);
                }
            }
            if let Some(f) = frames_b.get(i) {
                if let Some(r) = h.process_frame(130312, 9, f).unwrap() {
                    result_b = Some(r);
                }
            }
        }
        assert_eq!(result_a, Some(payload_a));
        assert_eq!(result_b, Some(payload_b));
    }

    #[test]
    fn out_of_sequence_frame_is_rejected() {
        let mut h = FastPacketHandler::new();
        let payload: Vec<u8> = (0..20).collect();
        let frames = FastPacketHandler::fragment(&payload, 0).unwrap();
        h.process_frame(129029, 3, &frames[0]).unwrap();
        // Skip frame index 1, feed frame index 2 directly.
        let err = h.process_frame(129029, 3, &frames[2]).unwrap_err();
        assert!(matches!(err, Error::FastPacketError(_)));
    }

    #[test]
    fn stale_session_is_expired() {
        let mut h = FastPacketHandler::new();
        let payload: Vec<u8> = (0..20).collect();
        let frames = FastPacketHandler::fragment(&payload, 0).unwrap();
        h.process_frame(129029, 3, &frames[0]).unwrap();
        assert_eq!(h.sessions.len(), 1);
        h.expire_stale(Instant::now() + REASSEMBLY_TIMEOUT + Duration::from_millis(1));
        assert!(h.sessions.is_empty());
    }

    #[test]
    fn fragment_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(FastPacketHandler::fragment(&payload, 0).is_err());
    }
}
