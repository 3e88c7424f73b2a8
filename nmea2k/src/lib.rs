//! Message-plane core for NMEA2000 / ISO 11783 traffic: CAN identifier
//! codec, Fast Packet and ISO Transport Protocol reassembly, the PGN
//! catalogue and field codec, and the Controller Application stack
//! (address claim, ISO protocol responses, PGN dispatch).
//!
//! This crate has no I/O of its own; it is driven by the `nmea_router`
//! binary crate, which owns the SocketCAN interface, couplers and
//! publisher.

pub mod application;
pub mod builtin;
pub mod can_id;
pub mod catalogue;
pub mod controller;
pub mod error;
pub mod fast_packet;
pub mod field_codec;
pub mod iso_tp;
pub mod message;
pub mod name;

pub use application::Application;
pub use can_id::CanId;
pub use catalogue::{Catalogue, FieldDefinition, Manufacturer, PgnDefinition, Signedness};
pub use controller::ActiveController;
pub use error::{Error, Result};
pub use fast_packet::FastPacketHandler;
pub use field_codec::{DecodedMessage, FieldValue};
pub use iso_tp::{IsoTpEvent, IsoTpHandler};
pub use message::N2kMessage;
pub use name::Name;
