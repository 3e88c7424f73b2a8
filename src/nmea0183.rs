//! NMEA 0183 sentence parsing and construction: talker/formatter
//! addressing, comma-separated fields and the XOR checksum.

use crate::error::{Error, Result};

/// A parsed NMEA 0183 sentence, e.g. `$GPGGA,...,*5B`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nmea0183Sentence {
    raw: String,
    address: String,
    proprietary: bool,
    fields_start: usize,
    fields_end: usize,
}

/// XOR of every byte between `$`/`!` and `*`, per the NMEA 0183 checksum rule.
pub fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Maximum sentence length, including delimiters and checksum. Encapsulated
/// (`!`-prefixed) sentences are exempt.
const MAX_SENTENCE_LEN: usize = 82;

impl Nmea0183Sentence {
    /// Parse a complete sentence, including its leading `$`/`!` and
    /// trailing `*HH` checksum. Does not require a trailing CRLF.
    pub fn parse(raw: &str) -> Result<Self> {
        let bytes = raw.as_bytes();
        if bytes.is_empty() || (bytes[0] != b'$' && bytes[0] != b'!') {
            return Err(Error::InvalidNmea0183(format!("missing sentence start delimiter: {raw:?}")));
        }
        if bytes[0] != b'!' && bytes.len() > MAX_SENTENCE_LEN {
            return Err(Error::InvalidNmea0183(format!(
                "sentence exceeds {MAX_SENTENCE_LEN} bytes: {} bytes",
                bytes.len()
            )));
        }
        if bytes.len() < 4 || bytes[bytes.len() - 3] != b'*' {
            return Err(Error::InvalidNmea0183(format!("missing checksum delimiter: {raw:?}")));
        }
        let checksum_hex = &raw[raw.len() - 2..];
        let expected = u8::from_str_radix(checksum_hex, 16)
            .map_err(|_| Error::InvalidNmea0183(format!("invalid checksum digits: {checksum_hex}")))?;
        let body = &bytes[1..bytes.len() - 3];
        let actual = checksum(body);
        if actual != expected {
            return Err(Error::InvalidNmea0183(format!(
                "checksum mismatch: computed {actual:02X}, frame says {expected:02X}"
            )));
        }

        let comma = raw.find(',').ok_or_else(|| Error::InvalidNmea0183(format!("no field separator: {raw:?}")))?;
        let address = raw[1..comma].to_string();
        let proprietary = address.starts_with('P');

        Ok(Self {
            raw: raw.to_string(),
            address,
            proprietary,
            fields_start: comma + 1,
            fields_end: raw.len() - 3,
        })
    }

    /// Build and checksum a sentence from an address (e.g. `"GPGGA"`) and
    /// comma-joined fields.
    pub fn build(address: &str, fields: &[&str]) -> Self {
        let body = format!("{address},{}", fields.join(","));
        let sum = checksum(body.as_bytes());
        let raw = format!("${body}*{sum:02X}");
        if raw.len() > MAX_SENTENCE_LEN {
            tracing::warn!(address, len = raw.len(), "built sentence exceeds {MAX_SENTENCE_LEN} bytes");
        }
        let proprietary = address.starts_with('P');
        Self {
            fields_start: address.len() + 2,
            fields_end: raw.len() - 3,
            address: address.to_string(),
            proprietary,
            raw,
        }
    }

    pub fn talker(&self) -> Option<&str> {
        if self.proprietary {
            None
        } else {
            self.address.get(0..2)
        }
    }

    pub fn formatter(&self) -> Option<&str> {
        if self.proprietary {
            None
        } else {
            self.address.get(2..)
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_proprietary(&self) -> bool {
        self.proprietary
    }

    pub fn fields(&self) -> std::str::Split<'_, char> {
        self.raw[self.fields_start..self.fields_end].split(',')
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Replace the talker ID in place (e.g. when a coupler re-addresses a
    /// sentence before forwarding it), recomputing the checksum.
    pub fn replace_talker(&self, new_talker: &str) -> Result<Self> {
        if self.proprietary {
            return Err(Error::InvalidNmea0183("cannot replace talker of a proprietary sentence".into()));
        }
        let formatter = self.formatter().unwrap_or("").to_string();
        let new_address = format!("{new_talker}{formatter}");
        let mut fields: Vec<&str> = self.fields().collect();
        if fields.len() == 1 && fields[0].is_empty() {
            fields.clear();
        }
        Ok(Self::build(&new_address, &fields))
    }
}

impl std::fmt::Display for Nmea0183Sentence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_sentence() {
        let s = Nmea0183Sentence::parse("$GPGGA,123519,4807.038,N,01131.000,E*76").unwrap();
        assert_eq!(s.talker(), Some("GP"));
        assert_eq!(s.formatter(), Some("GGA"));
        assert_eq!(s.fields().next(), Some("123519"));
    }

    #[test]
    fn rejects_bad_checksum() {
        let err = Nmea0183Sentence::parse("$GPGGA,123519*00").unwrap_err();
        assert!(matches!(err, Error::InvalidNmea0183(_)));
    }

    #[test]
    fn rejects_missing_delimiter() {
        assert!(Nmea0183Sentence::parse("GPGGA,123519*76").is_err());
    }

    #[test]
    fn rejects_oversized_non_encapsulated_sentence() {
        let body = "GPGGA,".to_string() + &"1".repeat(90);
        let sum = checksum(body.as_bytes());
        let raw = format!("${body}*{sum:02X}");
        assert!(raw.len() > MAX_SENTENCE_LEN);
        assert!(Nmea0183Sentence::parse(&raw).is_err());
    }

    #[test]
    fn accepts_oversized_encapsulated_sentence() {
        let body = "ALVDM,1,1,,B,".to_string() + &"1".repeat(90);
        let sum = checksum(body.as_bytes());
        let raw = format!("!{body}*{sum:02X}");
        assert!(raw.len() > MAX_SENTENCE_LEN);
        assert!(Nmea0183Sentence::parse(&raw).is_ok());
    }

    #[test]
    fn proprietary_sentence_has_no_talker() {
        let s = Nmea0183Sentence::build("PGRME", &["15.0", "M", "45.0", "M", "25.0", "M"]);
        assert!(s.is_proprietary());
        assert_eq!(s.talker(), None);
    }

    #[test]
    fn build_then_parse_round_trips() {
        let built = Nmea0183Sentence::build("GPZDA", &["160012", "11", "03", "2004", "00", "00"]);
        let parsed = Nmea0183Sentence::parse(built.as_str()).unwrap();
        assert_eq!(parsed.address(), "GPZDA");
        assert_eq!(parsed.fields().collect::<Vec<_>>(), vec!["160012", "11", "03", "2004", "00", "00"]);
    }

    #[test]
    fn replace_talker_recomputes_checksum() {
        let s = Nmea0183Sentence::parse("$GPGGA,123519,4807.038,N,01131.000,E*76").unwrap();
        let replaced = s.replace_talker("II").unwrap();
        assert_eq!(replaced.talker(), Some("II"));
        let reparsed = Nmea0183Sentence::parse(replaced.as_str()).unwrap();
        assert_eq!(reparsed.formatter(), Some("GGA"));
    }
}
