//! Field Codec (C2): encode/decode a PGN payload against its definition.

use std::collections::HashMap;

use crate::catalogue::{FieldDefinition, PgnDefinition, Signedness};
use crate::error::{Error, Result};

/// A single decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// The bit pattern was the all-ones "not available" sentinel.
    Unavailable,
    Integer(i64),
    Float(f64),
    /// Enum field whose raw value had a symbolic mapping.
    Enum(String),
    /// One iteration block of a repeating group.
    Repeat(Vec<DecodedMessage>),
}

/// An ordered `field_name -> value` mapping; order matches the PGN
/// definition's field order so re-encoding is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedMessage(pub Vec<(String, FieldValue)>);

impl DecodedMessage {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.0.push((name.into(), value));
    }
}

fn bits_mask(bit_length: usize) -> u64 {
    if bit_length >= 64 {
        u64::MAX
    } else {
        (1u64 << bit_length) - 1
    }
}

fn extract_bits(payload: &[u8], bit_offset: usize, bit_length: usize) -> u64 {
    let mut value: u64 = 0;
    for i in 0..bit_length {
        let bit_index = bit_offset + i;
        let byte_index = bit_index / 8;
        let bit_in_byte = bit_index % 8;
        if byte_index < payload.len() {
            let bit = (payload[byte_index] >> bit_in_byte) & 1;
            value |= (bit as u64) << i;
        }
    }
    value
}

fn set_bits(payload: &mut [u8], bit_offset: usize, bit_length: usize, value: u64) {
    for i in 0..bit_length {
        let bit_index = bit_offset + i;
        let byte_index = bit_index / 8;
        let bit_in_byte = bit_index % 8;
        if byte_index >= payload.len() {
            continue;
        }
        let bit = (value >> i) & 1;
        if bit == 1 {
            payload[byte_index] |= 1 << bit_in_byte;
        } else {
            payload[byte_index] &= !(1 << bit_in_byte);
        }
    }
}

fn sign_extend(raw: u64, bit_length: usize) -> i64 {
    let sign_bit = 1u64 << (bit_length - 1);
    if raw & sign_bit != 0 {
        (raw as i64) - (1i64 << bit_length)
    } else {
        raw as i64
    }
}

fn decode_scalar(field: &FieldDefinition, payload: &[u8], bit_base: usize, strict: bool) -> Result<FieldValue> {
    let abs_offset = bit_base + field.bit_offset;
    let need_bytes = (abs_offset + field.bit_length).div_ceil(8);
    if payload.len() < need_bytes {
        return Err(Error::DecodeEol {
            field: field.name.clone(),
            needed: need_bytes,
            have: payload.len(),
        });
    }

    let raw = extract_bits(payload, abs_offset, field.bit_length);
    if raw == bits_mask(field.bit_length) {
        return Ok(FieldValue::Unavailable);
    }

    let int_value = match field.signedness {
        Signedness::Signed => sign_extend(raw, field.bit_length),
        Signedness::Unsigned => raw as i64,
    };

    if let Some(enum_values) = &field.enum_values {
        return match enum_values.get(&int_value) {
            Some(name) => Ok(FieldValue::Enum(name.clone())),
            None if strict => Err(Error::MissingEnumKey {
                field: field.name.clone(),
                raw: int_value,
            }),
            None => Ok(FieldValue::Integer(int_value)),
        };
    }

    if field.scale != 1.0 || field.offset != 0.0 {
        Ok(FieldValue::Float(int_value as f64 * field.scale + field.offset))
    } else {
        Ok(FieldValue::Integer(int_value))
    }
}

fn encode_scalar(field: &FieldDefinition, value: &FieldValue, payload: &mut [u8], bit_base: usize) -> Result<()> {
    let abs_offset = bit_base + field.bit_offset;
    let mask = bits_mask(field.bit_length);

    let raw: u64 = match value {
        FieldValue::Unavailable => mask,
        FieldValue::Enum(name) => {
            let enum_values = field.enum_values.as_ref().ok_or_else(|| Error::EncodeOutOfRange {
                field: field.name.clone(),
                value: 0.0,
            })?;
            let key = enum_values
                .iter()
                .find(|(_, v)| *v == name)
                .map(|(k, _)| *k)
                .ok_or_else(|| Error::MissingEnumKey {
                    field: field.name.clone(),
                    raw: -1,
                })?;
            (key as u64) & mask
        }
        FieldValue::Integer(v) => (*v as u64) & mask,
        FieldValue::Float(v) => {
            let scaled = (*v - field.offset) / field.scale;
            let rounded = scaled.round();
            let int_val = rounded as i64;
            let (lo, hi): (i64, i64) = match field.signedness {
                Signedness::Signed => (-(1i64 << (field.bit_length - 1)), (1i64 << (field.bit_length - 1)) - 2),
                Signedness::Unsigned => (0, (mask as i64) - 1),
            };
            if int_val < lo || int_val > hi {
                return Err(Error::EncodeOutOfRange {
                    field: field.name.clone(),
                    value: *v,
                });
            }
            (int_val as u64) & mask
        }
        FieldValue::Repeat(_) => {
            return Err(Error::EncodeOutOfRange {
                field: field.name.clone(),
                value: 0.0,
            })
        }
    };

    set_bits(payload, abs_offset, field.bit_length, raw);
    Ok(())
}

fn group_bit_width(fields: &[FieldDefinition]) -> usize {
    fields
        .iter()
        .map(|f| f.bit_offset + f.bit_length)
        .max()
        .unwrap_or(0)
}

/// Decode a PGN payload against its definition, in permissive mode
/// (unmapped enum values pass through as integers).
pub fn decode(def: &PgnDefinition, payload: &[u8]) -> Result<DecodedMessage> {
    decode_with_mode(def, payload, false)
}

/// Decode a PGN payload, failing with `MissingEnumKey` on unmapped enum
/// raw values instead of passing them through.
pub fn decode_strict(def: &PgnDefinition, payload: &[u8]) -> Result<DecodedMessage> {
    decode_with_mode(def, payload, true)
}

fn decode_with_mode(def: &PgnDefinition, payload: &[u8], strict: bool) -> Result<DecodedMessage> {
    let mut out = DecodedMessage::default();
    let mut bit_cursor = 0usize;

    for field in &def.fields {
        if let Some(sub_fields) = &field.repeat_group {
            let count_value = decode_scalar(field, payload, 0, strict)?;
            let count = match &count_value {
                FieldValue::Integer(n) => *n as usize,
                FieldValue::Unavailable => 0,
                _ => 0,
            };
            out.push(field.name.clone(), count_value);

            let group_width = group_bit_width(sub_fields);
            let group_start = field.bit_offset + field.bit_length;
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                let iter_base = group_start + i * group_width;
                let needed_bytes = (iter_base + group_width).div_ceil(8);
                if payload.len() < needed_bytes {
                    return Err(Error::DecodeEol {
                        field: format!("{}[{}]", field.name, i),
                        needed: needed_bytes,
                        have: payload.len(),
                    });
                }
                let mut item = DecodedMessage::default();
                for sub in sub_fields {
                    let v = decode_scalar(sub, payload, iter_base, strict)?;
                    item.push(sub.name.clone(), v);
                }
                items.push(item);
            }
            out.push(format!("{}_items", field.name), FieldValue::Repeat(items));
            bit_cursor = group_start + count * group_width;
        } else {
            let v = decode_scalar(field, payload, 0, strict)?;
            out.push(field.name.clone(), v);
            bit_cursor = bit_cursor.max(field.bit_offset + field.bit_length);
        }
    }
    let _ = bit_cursor;
    Ok(out)
}

/// Encode a decoded message back into a PGN payload. Trailing bytes not
/// touched by any field are padded with `0xFF`, the NMEA2000 convention
/// for "not available".
pub fn encode(def: &PgnDefinition, values: &DecodedMessage) -> Result<Vec<u8>> {
    let mut payload = vec![0xFFu8; def.length];

    for field in &def.fields {
        if let Some(sub_fields) = &field.repeat_group {
            let items = match values.get(&format!("{}_items", field.name)) {
                Some(FieldValue::Repeat(items)) => items,
                _ => {
                    return Err(Error::EncodeOutOfRange {
                        field: field.name.clone(),
                        value: 0.0,
                    })
                }
            };
            encode_scalar(field, &FieldValue::Integer(items.len() as i64), &mut payload, 0)?;

            let group_width = group_bit_width(sub_fields);
            let group_start = field.bit_offset + field.bit_length;
            let needed = group_start + items.len() * group_width;
            if needed.div_ceil(8) > payload.len() {
                payload.resize(needed.div_ceil(8), 0xFF);
            }
            for (i, item) in items.iter().enumerate() {
                let iter_base = group_start + i * group_width;
                for sub in sub_fields {
                    let v = item.get(&sub.name).ok_or_else(|| Error::EncodeOutOfRange {
                        field: sub.name.clone(),
                        value: 0.0,
                    })?;
                    encode_scalar(sub, v, &mut payload, iter_base)?;
                }
            }
        } else {
            let v = values.get(&field.name).ok_or_else(|| Error::EncodeOutOfRange {
                field: field.name.clone(),
                value: 0.0,
            })?;
            encode_scalar(field, v, &mut payload, 0)?;
        }
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::FieldDefinition;

    fn position_rapid_update_def() -> PgnDefinition {
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
        }
    }

    #[test]
    fn decode_scaled_signed_scalar() {
        let def = position_rapid_update_def();
        let lat_raw = (48.123456f64 / 1e-7).round() as i32;
        let lon_raw = (-11.654321f64 / 1e-7).round() as i32;
        let mut payload = vec![0u8; 8];
        payload[0..4].copy_from_slice(&lat_raw.to_le_bytes());
        payload[4..8].copy_from_slice(&lon_raw.to_le_bytes());

        let decoded = decode(&def, &payload).unwrap();
        match decoded.get("latitude").unwrap() {
            FieldValue::Float(v) => assert!((v - 48.123456).abs() < 1e-5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn roundtrip_encode_decode() {
        let def = position_rapid_update_def();
        let mut payload = vec![0u8; 8];
        payload[0..4].copy_from_slice(&1234567i32.to_le_bytes());
        payload[4..8].copy_from_slice(&(-7654321i32).to_le_bytes());

        let decoded = decode(&def, &payload).unwrap();
        let encoded = encode(&def, &decoded).unwrap();
        assert_eq!(encoded, payload);
    }

    #[test]
    fn unavailable_sentinel_roundtrips() {
        let def = position_rapid_update_def();
        let payload = vec![0xFFu8; 8];
        let decoded = decode(&def, &payload).unwrap();
        assert_eq!(decoded.get("latitude").unwrap(), &FieldValue::Unavailable);
        let encoded = encode(&def, &decoded).unwrap();
        assert_eq!(encoded, payload);
    }

    #[test]
    fn decode_eol_on_short_payload() {
        let def = position_rapid_update_def();
        let payload = vec![0u8; 4];
        let err = decode(&def, &payload).unwrap_err();
        assert!(matches!(err, Error::DecodeEol { .. }));
    }

    #[test]
    fn enum_field_decodes_to_symbol_and_back() {
        let mut values = HashMap::new();
        values.insert(0i64, "True".to_string());
        values.insert(1i64, "Magnetic".to_string());
        let def = PgnDefinition {
            pgn: 127250,
            name: "Vessel Heading".into(),
            length: 8,
            fast_packet: false,
            proprietary: false,
            fields: vec![
                FieldDefinition::scalar("heading", 0, 16, Signedness::Unsigned)
                    .scaled(0.0001, 0.0)
                    .with_unit("rad"),
                FieldDefinition::scalar("reference", 16, 2, Signedness::Unsigned).with_enum(values),
            ],
        };
        let mut payload = vec![0xFFu8; 8];
        payload[0..2].copy_from_slice(&18000u16.to_le_bytes());
        payload[2] = 0b01; // reference = Magnetic, rest unavailable bits preserved

        let decoded = decode(&def, &payload).unwrap();
        assert_eq!(
            decoded.get("reference").unwrap(),
            &FieldValue::Enum("Magnetic".to_string())
        );
    }

    #[test]
    fn missing_enum_key_strict_vs_permissive() {
        let values = HashMap::new();
        let def = PgnDefinition {
            pgn: 1,
            name: "test".into(),
            length: 1,
            fast_packet: false,
            proprietary: false,
            fields: vec![FieldDefinition::scalar("e", 0, 2, Signedness::Unsigned).with_enum(values)],
        };
        let payload = vec![0b01u8];
        assert!(decode(&def, &payload).is_ok());
        assert!(decode_strict(&def, &payload).is_err());
    }

    #[test]
    fn repeat_group_roundtrip() {
        let sub_fields = vec![
            FieldDefinition::scalar("id", 0, 8, Signedness::Unsigned),
            FieldDefinition::scalar("lat", 8, 32, Signedness::Signed).scaled(1e-7, 0.0),
        ];
        let def = PgnDefinition {
            pgn: 129285,
            name: "Route/WP information".into(),
            length: 6 + 2 * 5,
            fast_packet: true,
            proprietary: false,
            fields: vec![FieldDefinition::scalar("count", 0, 8, Signedness::Unsigned).with_repeat_group(sub_fields)],
        };

        let mut payload = vec![0u8; def.length];
        payload[0] = 2;
        payload[1] = 10;
        payload[2..6].copy_from_slice(&1000000i32.to_le_bytes());
        payload[6] = 20;
        payload[7..11].copy_from_slice(&(-2000000i32).to_le_bytes());

        let decoded = decode(&def, &payload).unwrap();
        match decoded.get("count_items").unwrap() {
            FieldValue::Repeat(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].get("id").unwrap(), &FieldValue::Integer(10));
            }
            other => panic!("unexpected {:?}", other),
        }

        let encoded = encode(&def, &decoded).unwrap();
        assert_eq!(&encoded[0..11], &payload[0..11]);
    }
}
