//! Active Controller (C8): owns a set of Controller Applications keyed by
//! source address and dispatches inbound messages to them, following the
//! destination-addressed-vs-broadcast split used throughout ISO 11783.

use std::collections::HashMap;

use tracing::error;

use crate::application::Application;
use crate::message::N2kMessage;

const BROADCAST_ADDRESS: u8 = 255;

/// Dispatches inbound NMEA2000 traffic across a pool of [`Application`]s.
///
/// A message addressed to a specific CA (`da != 255`) is routed only to
/// that CA; a broadcast message is fanned out to every CA, and an ISO
/// protocol broadcast additionally triggers any pending address change.
pub struct ActiveController {
    applications: HashMap<u8, Application>,
    address_change_request: Option<(u8, u8)>, // (old_address, new_address)
}

impl ActiveController {
    pub fn new() -> Self {
        Self {
            applications: HashMap::new(),
            address_change_request: None,
        }
    }

    pub fn add_application(&mut self, mut application: Application) -> N2kMessage {
        let claim = application.start();
        self.applications.insert(application.address(), application);
        claim
    }

    pub fn remove_application(&mut self, address: u8) -> Option<Application> {
        self.applications.remove(&address)
    }

    pub fn application(&self, address: u8) -> Option<&Application> {
        self.applications.get(&address)
    }

    pub fn application_mut(&mut self, address: u8) -> Option<&mut Application> {
        self.applications.get_mut(&address)
    }

    pub fn applications(&self) -> impl Iterator<Item = &Application> {
        self.applications.values()
    }

    /// Schedule moving `application` currently registered at `old_address`
    /// to the address it has already re-claimed. Applied only after the
    /// current broadcast dispatch completes, since applications are keyed
    /// by address and must not move mid-fan-out.
    pub fn request_address_change(&mut self, old_address: u8, new_address: u8) {
        self.address_change_request = Some((old_address, new_address));
    }

    fn apply_pending_address_change(&mut self) {
        if let Some((old_address, new_address)) = self.address_change_request.take() {
            if let Some(app) = self.applications.remove(&old_address) {
                self.applications.insert(new_address, app);
            }
        }
    }

    /// Advance every CA's address-claim silence timer. Should be polled at
    /// roughly the same cadence as the CAN interface's read loop.
    pub fn tick_claims(&mut self, now: std::time::Instant) {
        for app in self.applications.values_mut() {
            app.check_claim_window(now);
        }
    }

    /// Dispatch one inbound message to the relevant application(s),
    /// returning any reply/claim frames they produce.
    pub fn process_msg(&mut self, msg: &N2kMessage) -> Vec<N2kMessage> {
        let mut out = Vec::new();
        if msg.da != BROADCAST_ADDRESS {
            match self.applications.get_mut(&msg.da) {
                Some(app) => {
                    out.extend(if msg.is_iso_protocol() {
                        app.receive_iso_msg(msg)
                    } else {
                        app.receive_data_msg(msg)
                    });
                }
                None => error!(da = msg.da, pgn = msg.pgn, "message addressed to unknown application"),
            }
            return out;
        }

        for app in self.applications.values_mut() {
            out.extend(if msg.is_iso_protocol() {
                app.receive_iso_msg(msg)
            } else {
                app.receive_data_msg(msg)
            });
        }
        if msg.is_iso_protocol() {
            self.apply_pending_address_change();
        }
        out
    }
}

impl Default for ActiveController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;

    fn test_name(unique_number: u32) -> Name {
        Name {
            unique_number,
            manufacturer_code: 2046,
            device_instance: 0,
            device_function: 130,
            device_class: 25,
            system_instance: 0,
            industry_group: 4,
            arbitrary_address_capable: true,
        }
    }

    #[test]
    fn addressed_message_routes_to_single_application() {
        let mut controller = ActiveController::new();
        controller.add_application(Application::new(test_name(1), 40));
        controller.add_application(Application::new(test_name(2), 41));
        controller.tick_claims(std::time::Instant::now() + crate::application::CLAIM_SILENCE_WINDOW);

        let msg = N2kMessage::new(3, 127250, 10, 40, vec![0; 8]);
        controller.process_msg(&msg);
        // no panic and no broadcast to the other application is the key
        // assertion here; absence of routing errors is covered via tracing.
        assert!(controller.application(40).is_some());
        assert!(controller.application(41).is_some());
    }

    #[test]
    fn broadcast_message_reaches_every_application() {
        let mut controller = ActiveController::new();
        controller.add_application(Application::new(test_name(1), 40));
        controller.add_application(Application::new(test_name(2), 41));
        controller.tick_claims(std::time::Instant::now() + crate::application::CLAIM_SILENCE_WINDOW);

        let requested = 129025u32.to_le_bytes()[..3].to_vec();
        let msg = N2kMessage::new(6, 59904, 10, 255, requested);
        let replies = controller.process_msg(&msg);
        // Neither app supports PGN 129025 as an ISO-replyable PGN, so both
        // NACK: one reply per application.
        assert_eq!(replies.len(), 2);
    }

    #[test]
    fn address_change_is_deferred_until_after_broadcast_dispatch() {
        let mut controller = ActiveController::new();
        controller.add_application(Application::new(test_name(1), 40));
        controller.tick_claims(std::time::Instant::now() + crate::application::CLAIM_SILENCE_WINDOW);

        controller.request_address_change(40, 90);
        assert!(controller.application(40).is_some());

        let broadcast = N2kMessage::new(6, 59904, 10, 255, vec![0, 0, 0]);
        controller.process_msg(&broadcast);
        assert!(controller.application(40).is_none());
        assert!(controller.application(90).is_some());
    }
}
