//! Error taxonomy for the routing fabric: couplers, filters, the
//! publisher and the CAN interface wrap the message-plane's own errors
//! and add their own failure modes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    N2k(#[from] nmea2k::Error),

    #[error("invalid NMEA 0183 frame: {0}")]
    InvalidNmea0183(String),

    #[error("CAN bus I/O error on {interface}: {source}")]
    CanBus {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to send from unregistered source address {sa}")]
    UnregisteredSourceAddress { sa: u8 },

    #[error("coupler '{name}' I/O error: {source}")]
    CouplerIo {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("coupler '{name}' timed out waiting for data")]
    CouplerTimeout { name: String },

    #[error("coupler '{name}' is stopped")]
    CouplerStopped { name: String },

    #[error("publisher queue full, message dropped")]
    QueueFull,

    #[error("trace file I/O error: {0}")]
    TraceIo(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
