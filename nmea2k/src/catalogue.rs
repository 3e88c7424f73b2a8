//! PGN Catalogue (C1): in-memory registry of PGN and manufacturer
//! definitions, loaded once from a parsed catalogue descriptor and
//! thereafter read-only and safe for concurrent readers.
//!
//! Parsing the on-disk XML descriptor is out of scope for this core;
//! callers hand in already-parsed [`PgnDefinition`]/[`Manufacturer`]
//! values (see `Catalogue::from_definitions`).

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Signedness of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signedness {
    Unsigned,
    Signed,
}

/// Describes one field within a PGN's byte layout.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub bit_offset: usize,
    pub bit_length: usize,
    pub signedness: Signedness,
    pub scale: f64,
    pub offset: f64,
    pub unit: Option<String>,
    /// raw value -> symbolic name
    pub enum_values: Option<HashMap<i64, String>>,
    /// When set, this field is the "count" field of a repeating group whose
    /// sub-fields are listed here; the group starts immediately after it.
    pub repeat_group: Option<Vec<FieldDefinition>>,
}

impl FieldDefinition {
    pub fn scalar(name: &str, bit_offset: usize, bit_length: usize, signedness: Signedness) -> Self {
        Self {
            name: name.to_string(),
            bit_offset,
            bit_length,
            signedness,
            scale: 1.0,
            offset: 0.0,
            unit: None,
            enum_values: None,
            repeat_group: None,
        }
    }

    pub fn scaled(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_enum(mut self, values: HashMap<i64, String>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_repeat_group(mut self, fields: Vec<FieldDefinition>) -> Self {
        self.repeat_group = Some(fields);
        self
    }

    /// Bytes needed to hold one instance of this field (sub-byte fields
    /// round up to the byte their bit window ends in).
    fn byte_span(&self) -> usize {
        (self.bit_offset + self.bit_length).div_ceil(8)
    }
}

/// Full definition of one Parameter Group Number.
#[derive(Debug, Clone)]
pub struct PgnDefinition {
    pub pgn: u32,
    pub name: String,
    pub length: usize,
    pub fast_packet: bool,
    pub proprietary: bool,
    pub fields: Vec<FieldDefinition>,
}

impl PgnDefinition {
    /// Minimum number of payload bytes required to decode every field.
    pub fn min_payload_len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.byte_span())
            .max()
            .unwrap_or(0)
            .min(self.length)
    }
}

/// `(code, name, short_key)`; code 0 is reserved/invalid.
#[derive(Debug, Clone)]
pub struct Manufacturer {
    pub code: u16,
    pub name: String,
    pub short_key: String,
}

/// Proprietary PGN ranges, per §4.1.
fn is_proprietary_pgn(pgn: u32) -> bool {
    matches!(pgn, 61184..=65279) || pgn == 126720 || matches!(pgn, 130816..=131071)
}

/// Key for looking up a definition: a PGN is usually manufacturer-agnostic
/// (mfg_id 0), but proprietary PGNs are keyed by (pgn, mfg_id).
type CatalogueKey = (u32, u16);

/// Read-only, thread-shareable registry of PGN and manufacturer definitions.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    definitions: HashMap<CatalogueKey, PgnDefinition>,
    manufacturers: HashMap<u16, Manufacturer>,
}

impl Catalogue {
    /// Build a catalogue from already-parsed definitions (e.g. the result
    /// of parsing the external XML descriptor, which is out of scope here).
    pub fn from_definitions(pgns: Vec<PgnDefinition>, manufacturers: Vec<Manufacturer>) -> Self {
        let mut definitions = HashMap::new();
        for def in pgns {
            let mfg_id = if def.proprietary { 0 } else { 0 };
            definitions.insert((def.pgn, mfg_id), def);
        }
        let manufacturers = manufacturers
            .into_iter()
            .filter(|m| m.code != 0)
            .map(|m| (m.code, m))
            .collect();
        Self {
            definitions,
            manufacturers,
        }
    }

    /// Register or replace a single definition, keyed by (pgn, mfg_id).
    /// `mfg_id` is 0 for non-proprietary PGNs.
    pub fn insert(&mut self, mfg_id: u16, def: PgnDefinition) {
        self.definitions.insert((def.pgn, mfg_id), def);
    }

    pub fn insert_manufacturer(&mut self, m: Manufacturer) {
        if m.code != 0 {
            self.manufacturers.insert(m.code, m);
        }
    }

    pub fn lookup(&self, pgn: u32, mfg_id: u16) -> Result<&PgnDefinition> {
        self.definitions
            .get(&(pgn, mfg_id))
            .or_else(|| self.definitions.get(&(pgn, 0)))
            .ok_or(Error::UnknownPgn { pgn, mfg_id })
    }

    pub fn lookup_manufacturer(&self, code: u16) -> Result<&Manufacturer> {
        self.manufacturers
            .get(&code)
            .ok_or(Error::UnknownManufacturer(code))
    }

    pub fn is_proprietary(&self, pgn: u32) -> bool {
        is_proprietary_pgn(pgn)
    }

    pub fn is_fast_packet(&self, pgn: u32) -> bool {
        self.lookup(pgn, 0).map(|d| d.fast_packet).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proprietary_ranges() {
        assert!(is_proprietary_pgn(61184));
        assert!(is_proprietary_pgn(65279));
        assert!(is_proprietary_pgn(126720));
        assert!(is_proprietary_pgn(130816));
        assert!(is_proprietary_pgn(131071));
        assert!(!is_proprietary_pgn(129025));
        assert!(!is_proprietary_pgn(131072));
    }

    #[test]
    fn lookup_unknown_fails() {
        let cat = Catalogue::default();
        assert!(matches!(
            cat.lookup(129025, 0),
            Err(Error::UnknownPgn { pgn: 129025, .. })
        ));
    }

    #[test]
    fn lookup_manufacturer_unknown_fails() {
        let cat = Catalogue::default();
        assert!(matches!(
            cat.lookup_manufacturer(135),
            Err(Error::UnknownManufacturer(135))
        ));
    }

    #[test]
    fn insert_and_lookup() {
        let mut cat = Catalogue::default();
        cat.insert(
            0,
            PgnDefinition {
                pgn: 129025,
                name: "Position, Rapid Update".into(),
                length: 8,
                fast_packet: false,
                proprietary: false,
                fields: vec![],
            },
        );
        assert!(cat.lookup(129025, 0).is_ok());
        assert!(!cat.is_empty());
    }
}
