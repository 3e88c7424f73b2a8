//! Error taxonomy for the NMEA2000 message plane.

use thiserror::Error;

/// Errors raised while decoding, encoding or reassembling NMEA2000 traffic.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("unknown PGN {pgn} (manufacturer {mfg_id})")]
    UnknownPgn { pgn: u32, mfg_id: u16 },

    #[error("unknown manufacturer code {0}")]
    UnknownManufacturer(u16),

    #[error("payload too short decoding field '{field}': need {needed} bytes, have {have}")]
    DecodeEol {
        field: String,
        needed: usize,
        have: usize,
    },

    #[error("no enum mapping for raw value {raw} in field '{field}'")]
    MissingEnumKey { field: String, raw: i64 },

    #[error("value {value} out of range for field '{field}' after scaling")]
    EncodeOutOfRange { field: String, value: f64 },

    #[error("fast packet error: {0}")]
    FastPacketError(String),

    #[error("ISO TP transfer aborted: {0}")]
    IsoTpAbort(String),

    #[error("address claim lost for NAME {0:#018x}")]
    AddressClaimLost(u64),

    #[error("invalid CAN frame: {0}")]
    InvalidFrame(String),
}

pub type Result<T> = std::result::Result<T, Error>;
