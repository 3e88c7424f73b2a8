//! CA / Application (C7): one Controller Application's address-claim
//! state machine, ISO protocol responder and data-PGN subscription table.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::message::N2kMessage;
use crate::name::Name;

/// Silence window after sending an Address Claim before it is considered won.
pub const CLAIM_SILENCE_WINDOW: Duration = Duration::from_millis(250);

const PGN_ISO_REQUEST: u32 = 59904;
const PGN_ISO_ACK: u32 = 59392;
const PGN_ADDRESS_CLAIM: u32 = 60928;
const PGN_COMMANDED_ADDRESS: u32 = 65240;
const PGN_PRODUCT_INFO: u32 = 126996;
const PGN_CONFIG_INFO: u32 = 126998;

const NULL_ADDRESS: u8 = 254;
const BROADCAST_ADDRESS: u8 = 255;
const ARBITRARY_ADDRESS_RANGE: std::ops::RangeInclusive<u8> = 128..=247;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaState {
    Init,
    Claiming,
    Claimed,
    CannotClaim,
}

type PgnHandler = Box<dyn FnMut(&N2kMessage) -> Vec<N2kMessage> + Send>;

/// One Controller Application: owns a NAME and, once claimed, a source
/// address, and answers ISO protocol traffic on its own behalf.
pub struct Application {
    pub name: Name,
    preferred_address: u8,
    address: u8,
    state: CaState,
    claim_deadline: Option<Instant>,
    outbound_queue: VecDeque<N2kMessage>,
    handlers: HashMap<u32, PgnHandler>,
    product_info: Vec<u8>,
    config_info: Vec<u8>,
}

impl Application {
    pub fn new(name: Name, preferred_address: u8) -> Self {
        Self {
            name,
            preferred_address,
            address: preferred_address,
            state: CaState::Init,
            claim_deadline: None,
            outbound_queue: VecDeque::new(),
            handlers: HashMap::new(),
            product_info: Vec::new(),
            config_info: Vec::new(),
        }
    }

    pub fn with_product_info(mut self, bytes: Vec<u8>) -> Self {
        self.product_info = bytes;
        self
    }

    pub fn with_config_info(mut self, bytes: Vec<u8>) -> Self {
        self.config_info = bytes;
        self
    }

    pub fn register_handler<F>(&mut self, pgn: u32, handler: F)
    where
        F: FnMut(&N2kMessage) -> Vec<N2kMessage> + Send + 'static,
    {
        self.handlers.insert(pgn, Box::new(handler));
    }

    pub fn state(&self) -> CaState {
        self.state
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    fn claim_message(&self) -> N2kMessage {
        N2kMessage::new(6, PGN_ADDRESS_CLAIM, self.address, BROADCAST_ADDRESS, self.name.to_le_bytes().to_vec())
    }

    /// Begin claiming `preferred_address`. Returns the Address Claim frame
    /// to broadcast.
    pub fn start(&mut self) -> N2kMessage {
        self.address = self.preferred_address;
        self.state = CaState::Claiming;
        self.claim_deadline = Some(Instant::now() + CLAIM_SILENCE_WINDOW);
        info!(address = self.address, "CA starting address claim");
        self.claim_message()
    }

    /// Advance the claim timer; returns `true` and transitions to Claimed
    /// once the silence window has elapsed with no conflicting claim.
    pub fn check_claim_window(&mut self, now: Instant) -> bool {
        if self.state == CaState::Claiming {
            if let Some(deadline) = self.claim_deadline {
                if now >= deadline {
                    self.state = CaState::Claimed;
                    self.claim_deadline = None;
                    info!(address = self.address, "CA claimed address");
                    return true;
                }
            }
        }
        false
    }

    /// Queue an outbound data message, stamping the CA's current source
    /// address. While the CA is still claiming, the message is held back
    /// and released once the address is claimed.
    pub fn send(&mut self, priority: u8, pgn: u32, da: u8, payload: Vec<u8>) -> Option<N2kMessage> {
        let msg = N2kMessage::new(priority, pgn, self.address, da, payload);
        match self.state {
            CaState::Claimed => Some(msg),
            _ => {
                self.outbound_queue.push_back(msg);
                None
            }
        }
    }

    fn release_queue(&mut self) -> Vec<N2kMessage> {
        self.outbound_queue
            .drain(..)
            .map(|mut m| {
                m.sa = self.address;
                m
            })
            .collect()
    }

    fn next_arbitrary_address(&self) -> Option<u8> {
        // Caller (Active Controller) knows which addresses are taken; here
        // we just advance within the arbitrary range as a default policy.
        let candidate = self.address.wrapping_add(1);
        if ARBITRARY_ADDRESS_RANGE.contains(&candidate) {
            Some(candidate)
        } else {
            Some(*ARBITRARY_ADDRESS_RANGE.start())
        }
    }

    /// Handle an ISO protocol message (request, address claim, commanded
    /// address). Returns any reply/claim frames to transmit.
    pub fn receive_iso_msg(&mut self, msg: &N2kMessage) -> Vec<N2kMessage> {
        match msg.pgn {
            PGN_ISO_REQUEST => self.handle_iso_request(msg),
            PGN_ADDRESS_CLAIM => self.handle_address_claim(msg),
            PGN_COMMANDED_ADDRESS => self.handle_commanded_address(msg),
            _ => Vec::new(),
        }
    }

    fn handle_iso_request(&mut self, msg: &N2kMessage) -> Vec<N2kMessage> {
        if msg.da != self.address && msg.da != BROADCAST_ADDRESS {
            return Vec::new();
        }
        if msg.payload.len() < 3 {
            return Vec::new();
        }
        let requested_pgn = u32::from_le_bytes([msg.payload[0], msg.payload[1], msg.payload[2], 0]);
        match requested_pgn {
            PGN_ADDRESS_CLAIM => vec![self.claim_message()],
            PGN_PRODUCT_INFO => vec![N2kMessage::new(
                6,
                PGN_PRODUCT_INFO,
                self.address,
                msg.sa,
                self.product_info.clone(),
            )],
            PGN_CONFIG_INFO => vec![N2kMessage::new(
                6,
                PGN_CONFIG_INFO,
                self.address,
                msg.sa,
                self.config_info.clone(),
            )],
            other => {
                let mut nack = vec![1u8, 0xFF, 0xFF]; // control=1 (NACK), group function, reserved
                nack.extend_from_slice(&other.to_le_bytes()[..3]);
                vec![N2kMessage::new(6, PGN_ISO_ACK, self.address, msg.sa, nack)]
            }
        }
    }

    fn handle_address_claim(&mut self, msg: &N2kMessage) -> Vec<N2kMessage> {
        if msg.sa != self.address || self.state != CaState::Claimed && self.state != CaState::Claiming {
            return Vec::new();
        }
        if msg.payload.len() < 8 {
            return Vec::new();
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&msg.payload[..8]);
        let competing = Name::from_le_bytes(bytes);

        if competing == self.name {
            return Vec::new();
        }

        if self.name.wins_over(competing) {
            // We win: re-assert our claim.
            vec![self.claim_message()]
        } else if self.name.arbitrary_address_capable {
            match self.next_arbitrary_address() {
                Some(addr) => {
                    warn!(old = self.address, new = addr, "CA lost address claim, re-claiming");
                    self.address = addr;
                    self.state = CaState::Claiming;
                    self.claim_deadline = Some(Instant::now() + CLAIM_SILENCE_WINDOW);
                    vec![self.claim_message()]
                }
                None => self.go_cannot_claim(),
            }
        } else {
            self.go_cannot_claim()
        }
    }

    fn go_cannot_claim(&mut self) -> Vec<N2kMessage> {
        self.state = CaState::CannotClaim;
        self.address = NULL_ADDRESS;
        warn!("CA cannot claim an address, falling back to null address 254");
        vec![self.claim_message()]
    }

    fn handle_commanded_address(&mut self, msg: &N2kMessage) -> Vec<N2kMessage> {
        if msg.payload.len() < 9 {
            return Vec::new();
        }
        let mut name_bytes = [0u8; 8];
        name_bytes.copy_from_slice(&msg.payload[..8]);
        if Name::from_le_bytes(name_bytes) != self.name {
            return Vec::new();
        }
        if self.state != CaState::CannotClaim {
            return Vec::new();
        }
        let commanded = msg.payload[8];
        debug!(commanded, "CA received commanded address, re-claiming");
        self.address = commanded;
        self.state = CaState::Claiming;
        self.claim_deadline = Some(Instant::now() + CLAIM_SILENCE_WINDOW);
        vec![self.claim_message()]
    }

    /// Dispatch a data message to its registered handler, if any, and
    /// release any queued outbound frames once the CA is claimed.
    pub fn receive_data_msg(&mut self, msg: &N2kMessage) -> Vec<N2kMessage> {
        let mut out = if self.state == CaState::Claimed {
            self.release_queue()
        } else {
            Vec::new()
        };
        if let Some(handler) = self.handlers.get_mut(&msg.pgn) {
            out.extend(handler(msg));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(unique_number: u32, arbitrary: bool) -> Name {
        Name {
            unique_number,
            manufacturer_code: 2046,
            device_instance: 0,
            device_function: 130,
            device_class: 25,
            system_instance: 0,
            industry_group: 4,
            arbitrary_address_capable: arbitrary,
        }
    }

    #[test]
    fn start_enters_claiming_and_silence_window_resolves_to_claimed() {
        let mut app = Application::new(test_name(1, true), 40);
        let claim = app.start();
        assert_eq!(app.state(), CaState::Claiming);
        assert_eq!(claim.pgn, PGN_ADDRESS_CLAIM);

        assert!(!app.check_claim_window(Instant::now()));
        assert!(app.check_claim_window(Instant::now() + CLAIM_SILENCE_WINDOW));
        assert_eq!(app.state(), CaState::Claimed);
    }

    #[test]
    fn losing_claim_with_arbitrary_capable_re_claims() {
        let mut app = Application::new(test_name(100, true), 40);
        app.start();
        app.check_claim_window(Instant::now() + CLAIM_SILENCE_WINDOW);

        let competitor = test_name(1, false); // lower NAME wins
        let conflict = N2kMessage::new(6, PGN_ADDRESS_CLAIM, 40, 255, competitor.to_le_bytes().to_vec());
        let replies = app.receive_iso_msg(&conflict);
        assert_eq!(app.state(), CaState::Claiming);
        assert!(!replies.is_empty());
        assert_ne!(app.address(), 40);
    }

    #[test]
    fn losing_claim_without_arbitrary_capable_goes_cannot_claim() {
        let mut app = Application::new(test_name(100, false), 40);
        app.start();
        app.check_claim_window(Instant::now() + CLAIM_SILENCE_WINDOW);

        let competitor = test_name(1, false);
        let conflict = N2kMessage::new(6, PGN_ADDRESS_CLAIM, 40, 255, competitor.to_le_bytes().to_vec());
        app.receive_iso_msg(&conflict);
        assert_eq!(app.state(), CaState::CannotClaim);
        assert_eq!(app.address(), NULL_ADDRESS);
    }

    #[test]
    fn iso_request_for_address_claim_replies_with_claim() {
        let mut app = Application::new(test_name(5, true), 40);
        app.start();
        app.check_claim_window(Instant::now() + CLAIM_SILENCE_WINDOW);

        let mut payload = PGN_ADDRESS_CLAIM.to_le_bytes()[..3].to_vec();
        payload.resize(3, 0);
        let request = N2kMessage::new(6, PGN_ISO_REQUEST, 10, 40, payload);
        let replies = app.receive_iso_msg(&request);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].pgn, PGN_ADDRESS_CLAIM);
    }

    #[test]
    fn iso_request_for_unsupported_pgn_replies_nack() {
        let mut app = Application::new(test_name(5, true), 40);
        app.start();
        app.check_claim_window(Instant::now() + CLAIM_SILENCE_WINDOW);

        let payload = 999999u32.to_le_bytes()[..3].to_vec();
        let request = N2kMessage::new(6, PGN_ISO_REQUEST, 10, 40, payload);
        let replies = app.receive_iso_msg(&request);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].pgn, PGN_ISO_ACK);
    }

    #[test]
    fn outbound_queued_while_claiming_and_released_once_claimed() {
        let mut app = Application::new(test_name(5, true), 40);
        app.start();
        let queued = app.send(3, 129025, 255, vec![1, 2, 3, 4]);
        assert!(queued.is_none());

        app.check_claim_window(Instant::now() + CLAIM_SILENCE_WINDOW);
        let data = N2kMessage::new(3, 129025, 0, 255, vec![]);
        let released = app.receive_data_msg(&data);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].sa, 40);
    }

    #[test]
    fn commanded_address_re_enters_claiming_from_cannot_claim() {
        let name = test_name(5, false);
        let mut app = Application::new(name, 40);
        app.start();

        // A higher-priority competing claim with no arbitrary-address
        // fallback drives the CA to CannotClaim.
        let competing = test_name(1, false);
        let claim = N2kMessage::new(6, PGN_ADDRESS_CLAIM, 40, 255, competing.to_le_bytes().to_vec());
        app.receive_iso_msg(&claim);
        assert_eq!(app.state(), CaState::CannotClaim);

        let mut payload = name.to_le_bytes().to_vec();
        payload.push(77);
        let cmd = N2kMessage::new(6, PGN_COMMANDED_ADDRESS, 0, 255, payload);
        app.receive_iso_msg(&cmd);
        assert_eq!(app.state(), CaState::Claiming);
        assert_eq!(app.address(), 77);
    }

    #[test]
    fn commanded_address_ignored_when_already_claimed() {
        let name = test_name(5, true);
        let mut app = Application::new(name, 40);
        app.start();
        app.check_claim_window(Instant::now() + CLAIM_SILENCE_WINDOW);
        assert_eq!(app.state(), CaState::Claimed);

        let mut payload = name.to_le_bytes().to_vec();
        payload.push(77);
        let cmd = N2kMessage::new(6, PGN_COMMANDED_ADDRESS, 0, 255, payload);
        app.receive_iso_msg(&cmd);
        assert_eq!(app.state(), CaState::Claimed);
        assert_eq!(app.address(), 40);
    }
}
