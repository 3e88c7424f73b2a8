//! A small, hand-curated set of PGN definitions for the ISO protocol
//! messages and the most common data PGNs, used by tests and as a
//! starting catalogue when no external XML descriptor has been parsed
//! yet. Scale factors and byte layouts are the same ones the legacy
//! per-PGN decoders hard-coded; here they are data, not code, so the
//! generic field codec (C2) can drive them.

use std::collections::HashMap;

use crate::catalogue::{Catalogue, FieldDefinition, Manufacturer, PgnDefinition, Signedness};

fn heading_reference_enum() -> HashMap<i64, String> {
    let mut m = HashMap::new();
    m.insert(0, "True".to_string());
    m.insert(1, "Magnetic".to_string());
    m.insert(2, "Error".to_string());
    m.insert(3, "Unavailable".to_string());
    m
}

fn wind_reference_enum() -> HashMap<i64, String> {
    let mut m = HashMap::new();
    m.insert(0, "True (ground referenced)".to_string());
    m.insert(1, "Magnetic (ground referenced)".to_string());
    m.insert(2, "Apparent".to_string());
    m.insert(3, "True (boat referenced)".to_string());
    m.insert(4, "True (water referenced)".to_string());
    m
}

/// Build a catalogue seeded with the ISO protocol PGNs and a handful of
/// common data PGNs. Applications typically merge this with definitions
/// parsed from the external XML descriptor.
pub fn builtin_catalogue() -> Catalogue {
    let pgns = vec![
        // ISO Request
        PgnDefinition {
            pgn: 59904,
            name: "ISO Request".into(),
            length: 3,
            fast_packet: false,
            proprietary: false,
            fields: vec![FieldDefinition::scalar("pgn", 0, 24, Signedness::Unsigned)],
        },
        // ISO Acknowledgement / NACK
        PgnDefinition {
            pgn: 59392,
            name: "ISO Acknowledgement".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("control", 0, 8, Signedness::Unsigned),
                FieldDefinition::scalar("group_function", 8, 8, Signedness::Unsigned),
                FieldDefinition::scalar("pgn", 40, 24, Signedness::Unsigned),
            ],
        },
        // ISO Address Claim
        PgnDefinition {
            pgn: 60928,
            name: "ISO Address Claim".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![FieldDefinition::scalar("name", 0, 64, Signedness::Unsigned)],
        },
        // ISO Commanded Address (Fast Packet)
        PgnDefinition {
            pgn: 65240,
            name: "ISO Commanded Address".into(),
            length: 9,
            fast_packet: true,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("name", 0, 64, Signedness::Unsigned),
                FieldDefinition::scalar("new_source_address", 64, 8, Signedness::Unsigned),
            ],
        },
        // ISO TP Connection Management wrapper, carried as its own pseudo-PGN
        // for the handful of control bytes we interpret directly (§4.5).
        PgnDefinition {
            pgn: 60416,
            name: "ISO Transport Protocol, Connection Management".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![FieldDefinition::scalar("control", 0, 8, Signedness::Unsigned)],
        },
        // Product Information (Fast Packet)
        PgnDefinition {
            pgn: 126996,
            name: "Product Information".into(),
            length: 134,
            fast_packet: true,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("nmea_2000_version", 0, 16, Signedness::Unsigned),
                FieldDefinition::scalar("product_code", 16, 16, Signedness::Unsigned),
            ],
        },
        // Configuration Information (Fast Packet)
        PgnDefinition {
            pgn: 126998,
            name: "Configuration Information".into(),
            length: 8,
            fast_packet: true,
            proprietary: false,
            fields: vec![],
        },
        // System Time
        PgnDefinition {
            pgn: 126992,
            name: "System Time".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("sid", 0, 8, Signedness::Unsigned),
                FieldDefinition::scalar("date", 16, 16, Signedness::Unsigned).with_unit("days"),
                FieldDefinition::scalar("time", 32, 32, Signedness::Unsigned)
                    .scaled(0.0001, 0.0)
                    .with_unit("s"),
            ],
        },
        // Vessel Heading
        PgnDefinition {
            pgn: 127250,
            name: "Vessel Heading".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("sid", 0, 8, Signedness::Unsigned),
                FieldDefinition::scalar("heading", 8, 16, Signedness::Unsigned)
                    .scaled(0.0001, 0.0)
                    .with_unit("rad"),
                FieldDefinition::scalar("deviation", 24, 16, Signedness::Signed).scaled(0.0001, 0.0),
                FieldDefinition::scalar("variation", 40, 16, Signedness::Signed).scaled(0.0001, 0.0),
                FieldDefinition::scalar("reference", 56, 2, Signedness::Unsigned).with_enum(heading_reference_enum()),
            ],
        },
        // Position, Rapid Update
        PgnDefinition {
            pgn: 129025,
            name: "Position, Rapid Update".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("latitude", 0, 32, Signedness::Signed).scaled(1e-7, 0.0),
                FieldDefinition::scalar("longitude", 32, 32, Signedness::Signed).scaled(1e-7, 0.0),
            ],
        },
        // COG & SOG, Rapid Update
        PgnDefinition {
            pgn: 129026,
            name: "COG & SOG, Rapid Update".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("sid", 0, 8, Signedness::Unsigned),
                FieldDefinition::scalar("cog_reference", 8, 2, Signedness::Unsigned).with_enum(heading_reference_enum()),
                FieldDefinition::scalar("cog", 16, 16, Signedness::Unsigned).scaled(0.0001, 0.0),
                FieldDefinition::scalar("sog", 32, 16, Signedness::Unsigned).scaled(0.01, 0.0),
            ],
        },
        // Wind Data (Fast Packet)
        PgnDefinition {
            pgn: 130306,
            name: "Wind Data".into(),
            length: 8,
            fast_packet: true,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("sid", 0, 8, Signedness::Unsigned),
                FieldDefinition::scalar("speed", 8, 16, Signedness::Unsigned).scaled(0.01, 0.0).with_unit("m/s"),
                FieldDefinition::scalar("angle", 24, 16, Signedness::Unsigned).scaled(0.0001, 0.0),
                FieldDefinition::scalar("reference", 40, 3, Signedness::Unsigned).with_enum(wind_reference_enum()),
            ],
        },
        // Temperature
        PgnDefinition {
            pgn: 130312,
            name: "Temperature".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("sid", 0, 8, Signedness::Unsigned),
                FieldDefinition::scalar("instance", 8, 8, Signedness::Unsigned),
                FieldDefinition::scalar("source", 16, 8, Signedness::Unsigned),
                FieldDefinition::scalar("temperature", 24, 16, Signedness::Unsigned).scaled(0.01, 0.0).with_unit("K"),
                FieldDefinition::scalar("set_temperature", 48, 16, Signedness::Unsigned).scaled(0.01, 0.0).with_unit("K"),
            ],
        },
        // Humidity (Fast Packet)
        PgnDefinition {
            pgn: 130313,
            name: "Humidity".into(),
            length: 8,
            fast_packet: true,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("sid", 0, 8, Signedness::Unsigned),
                FieldDefinition::scalar("instance", 8, 8, Signedness::Unsigned),
                FieldDefinition::scalar("source", 16, 8, Signedness::Unsigned),
                FieldDefinition::scalar("actual_humidity", 24, 16, Signedness::Unsigned).scaled(0.004, 0.0).with_unit("%"),
                FieldDefinition::scalar("set_humidity", 40, 16, Signedness::Unsigned).scaled(0.004, 0.0).with_unit("%"),
            ],
        },
        // Engine Parameters, Rapid Update (Fast Packet)
        PgnDefinition {
            pgn: 127488,
            name: "Engine Parameters, Rapid Update".into(),
            length: 8,
            fast_packet: true,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("engine_instance", 0, 8, Signedness::Unsigned),
                FieldDefinition::scalar("engine_speed", 8, 16, Signedness::Unsigned).scaled(0.25, 0.0).with_unit("rpm"),
                FieldDefinition::scalar("engine_boost_pressure", 24, 16, Signedness::Unsigned)
                    .scaled(100.0, 0.0)
                    .with_unit("Pa"),
                FieldDefinition::scalar("engine_tilt_trim", 40, 8, Signedness::Signed).with_unit("%"),
            ],
        },
    ];

    let manufacturers = vec![
        Manufacturer {
            code: 135,
            name: "Airmar Technology".into(),
            short_key: "Airmar".into(),
        },
        Manufacturer {
            code: 1851,
            name: "Raymarine".into(),
            short_key: "Raymarine".into(),
        },
        Manufacturer {
            code: 1857,
            name: "Simrad".into(),
            short_key: "Simrad".into(),
        },
    ];

    Catalogue::from_definitions(pgns, manufacturers)
}
