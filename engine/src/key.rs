//! Composite identity keys.
//!
//! A property record is identified by its stock number plus, when the item is
//! serialized, its serial number. Unserialized stock degrades to the stock
//! number alone, so several records may legitimately share one key.

use crate::{error::Result, Error, Nsn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between stock number and serial number in the text form.
const SERIAL_SEPARATOR: char = ':';
/// Separator before a non-zero occurrence in a conflict key's text form.
const OCCURRENCE_SEPARATOR: char = '~';

/// Identity of a physical item: `(nsn, serial_number | none)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeKey {
    /// National stock number
    pub nsn: Nsn,
    /// Serial number, absent for bulk stock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl CompositeKey {
    /// Build a key, treating a blank serial number as absent.
    pub fn new(nsn: impl Into<Nsn>, serial_number: Option<String>) -> Self {
        let serial_number = serial_number
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            nsn: nsn.into().trim().to_string(),
            serial_number,
        }
    }

    /// Key for a serialized item.
    pub fn serialized(nsn: impl Into<Nsn>, serial_number: impl Into<String>) -> Self {
        Self::new(nsn, Some(serial_number.into()))
    }

    /// Key for bulk (unserialized) stock.
    pub fn bulk(nsn: impl Into<Nsn>) -> Self {
        Self::new(nsn, None)
    }

    /// Whether the key carries a serial number.
    pub fn is_serialized(&self) -> bool {
        self.serial_number.is_some()
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.serial_number {
            Some(serial) => write!(f, "{}{}{}", self.nsn, SERIAL_SEPARATOR, serial),
            None => write!(f, "{}", self.nsn),
        }
    }
}

impl FromStr for CompositeKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (nsn, serial) = match s.split_once(SERIAL_SEPARATOR) {
            Some((nsn, serial)) => (nsn, Some(serial.to_string())),
            None => (s, None),
        };
        if nsn.trim().is_empty() {
            return Err(Error::InvalidKey(format!("missing stock number in '{}'", s)));
        }
        Ok(Self::new(nsn, serial))
    }
}

/// Address of one conflict within a session.
///
/// Pairs that share an unserialized key are told apart by `occurrence`, their
/// position in the pairing order. Serialized pairs always have occurrence 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ConflictKey {
    pub key: CompositeKey,
    pub occurrence: usize,
}

impl ConflictKey {
    pub fn new(key: CompositeKey, occurrence: usize) -> Self {
        Self { key, occurrence }
    }
}

impl From<CompositeKey> for ConflictKey {
    fn from(key: CompositeKey) -> Self {
        Self::new(key, 0)
    }
}

/// Split a trailing `~N` occurrence suffix off `s`.
fn split_occurrence(s: &str) -> Option<(&str, usize)> {
    let (key, occurrence) = s.rsplit_once(OCCURRENCE_SEPARATOR)?;
    Some((key, occurrence.parse().ok()?))
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.key.to_string();
        // The suffix may only be omitted when the key can't be read as one
        if self.occurrence == 0 && split_occurrence(&key).is_none() {
            write!(f, "{}", key)
        } else {
            write!(f, "{}{}{}", key, OCCURRENCE_SEPARATOR, self.occurrence)
        }
    }
}

impl FromStr for ConflictKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match split_occurrence(s) {
            Some((key, occurrence)) => Ok(Self::new(key.parse()?, occurrence)),
            None => Ok(Self::new(s.parse()?, 0)),
        }
    }
}

impl From<ConflictKey> for String {
    fn from(key: ConflictKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ConflictKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_serial_degrades_to_bulk() {
        let key = CompositeKey::new("1005-01-123-4567", Some("  ".into()));
        assert_eq!(key, CompositeKey::bulk("1005-01-123-4567"));
        assert!(!key.is_serialized());
    }

    #[test]
    fn display_and_parse() {
        let key = CompositeKey::serialized("1005-01-123-4567", "W123");
        assert_eq!(key.to_string(), "1005-01-123-4567:W123");
        assert_eq!("1005-01-123-4567:W123".parse::<CompositeKey>().unwrap(), key);

        let bulk: CompositeKey = "8465-01-525-0585".parse().unwrap();
        assert_eq!(bulk.serial_number, None);
    }

    #[test]
    fn parse_rejects_missing_nsn() {
        assert!(matches!(
            ":W123".parse::<CompositeKey>(),
            Err(Error::InvalidKey(_))
        ));
        assert!("".parse::<CompositeKey>().is_err());
    }

    #[test]
    fn conflict_key_occurrence() {
        let first = ConflictKey::new(CompositeKey::bulk("8465"), 0);
        let third = ConflictKey::new(CompositeKey::bulk("8465"), 2);

        assert_eq!(first.to_string(), "8465");
        assert_eq!(third.to_string(), "8465~2");
        assert_eq!("8465~2".parse::<ConflictKey>().unwrap(), third);
        assert_eq!("8465".parse::<ConflictKey>().unwrap(), first);
    }

    #[test]
    fn serial_ending_like_an_occurrence_round_trips() {
        let key = ConflictKey::new(CompositeKey::serialized("A", "X~2"), 0);
        assert_eq!(key.to_string(), "A:X~2~0");
        assert_eq!(key.to_string().parse::<ConflictKey>().unwrap(), key);

        let later = ConflictKey::new(CompositeKey::serialized("A", "X~2"), 3);
        assert_eq!(later.to_string().parse::<ConflictKey>().unwrap(), later);

        // A tilde without digits after it is part of the key
        let plain = ConflictKey::new(CompositeKey::serialized("A", "X~B"), 0);
        assert_eq!(plain.to_string(), "A:X~B");
        assert_eq!(plain.to_string().parse::<ConflictKey>().unwrap(), plain);
    }

    #[test]
    fn conflict_key_serializes_as_string() {
        let key = ConflictKey::new(CompositeKey::serialized("A", "1"), 1);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"A:1~1\"");
        let parsed: ConflictKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }
}
