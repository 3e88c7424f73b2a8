//! SocketCAN coupler: wraps a [`CanInterface`] (C6) as a `Coupler`,
//! producing and consuming NMEA2000 messages.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::can_interface::CanInterface;
use crate::coupler::{Coupler, CouplerLifecycle, CouplerState, Direction};
use crate::error::Result;
use crate::generic_msg::{GenericMessage, Payload};

pub struct CanCoupler {
    lifecycle: CouplerLifecycle,
    interface: Arc<CanInterface>,
    stop_flag: Arc<AtomicBool>,
}

impl CanCoupler {
    pub fn new(name: impl Into<String>, interface: Arc<CanInterface>, stop_flag: Arc<AtomicBool>) -> Self {
        Self {
            lifecycle: CouplerLifecycle::new(name, Direction::Bidirectional),
            interface,
            stop_flag,
        }
    }
}

impl Coupler for CanCoupler {
    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    fn state(&self) -> CouplerState {
        self.lifecycle.state()
    }

    fn open(&mut self) -> Result<()> {
        self.lifecycle.mark_open();
        self.lifecycle.mark_connected();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lifecycle.mark_not_ready();
        Ok(())
    }

    fn read(&mut self) -> Result<Option<GenericMessage>> {
        match self.interface.read(&self.stop_flag) {
            Some(msg) => {
                self.lifecycle.record_message();
                Ok(Some(GenericMessage::new(Payload::N2k(msg), self.lifecycle.name())))
            }
            None => Ok(None),
        }
    }

    fn write(&mut self, msg: &GenericMessage) -> Result<()> {
        if let Payload::N2k(n2k) = &msg.payload {
            self.interface.send(n2k)?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stop_flag.store(true, std::sync::atomic::Ordering::Relaxed);
        self.lifecycle.mark_stopped();
        Ok(())
    }
}
