//! Gaiji substitution table
//!
//! Maps exact 2-byte CP932 sequences to Unicode scalars, typically code points
//! in the Private Use Area. The table is built once and never mutated, so a
//! single instance can be shared by every concurrent conversion.
//!
//! Table files are JSON objects keyed by the hex byte pair:
//!
//! ```json
//! { "F040": "U+E000", "F041": "\uE001" }
//! ```

use std::collections::HashMap;
use std::path::Path;

use crate::{Error, Result};

/// Immutable `[u8; 2] -> char` mapping
#[derive(Debug, Clone, Default)]
pub struct SubstitutionTable {
    entries: HashMap<[u8; 2], char>,
}

impl SubstitutionTable {
    /// Create an empty table; every undecodable sequence then degrades to U+FFFD
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(bytes, char)` pairs, rejecting duplicate keys
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = ([u8; 2], char)>,
    {
        let mut map = HashMap::new();
        for (key, ch) in entries {
            if map.insert(key, ch).is_some() {
                return Err(Error::Table(format!(
                    "duplicate key {:02X}{:02X}",
                    key[0], key[1]
                )));
            }
        }
        Ok(Self { entries: map })
    }

    /// Parse a JSON table document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: HashMap<String, String> = serde_json::from_str(json)
            .map_err(|e| Error::Table(format!("expected a JSON object of strings: {}", e)))?;

        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in &raw {
            entries.push((parse_key(key)?, parse_value(key, value)?));
        }
        Self::from_entries(entries)
    }

    /// Read and parse a JSON table file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let table = Self::from_json_str(&json)?;
        log::info!(
            "loaded {} gaiji substitutions from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    /// Look up an exact 2-byte sequence
    #[inline]
    pub fn lookup(&self, seq: [u8; 2]) -> Option<char> {
        self.entries.get(&seq).copied()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by key
    pub fn iter(&self) -> impl Iterator<Item = ([u8; 2], char)> {
        let mut sorted: Vec<_> = self.entries.iter().map(|(k, v)| (*k, *v)).collect();
        sorted.sort_unstable_by_key(|(k, _)| *k);
        sorted.into_iter()
    }
}

fn parse_key(key: &str) -> Result<[u8; 2]> {
    let digits = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);

    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Table(format!(
            "key {:?} is not a 2-byte hex sequence",
            key
        )));
    }

    // All four digits are ASCII hex, so both halves parse
    let hi = u8::from_str_radix(&digits[..2], 16).map_err(|e| Error::Table(e.to_string()))?;
    let lo = u8::from_str_radix(&digits[2..], 16).map_err(|e| Error::Table(e.to_string()))?;
    Ok([hi, lo])
}

fn parse_value(key: &str, value: &str) -> Result<char> {
    if let Some(hex) = value
        .strip_prefix("U+")
        .or_else(|| value.strip_prefix("u+"))
    {
        return u32::from_str_radix(hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| {
                Error::Table(format!("value {:?} for {} is not a scalar value", value, key))
            });
    }

    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(ch),
        _ => Err(Error::Table(format!(
            "value {:?} for {} must be a single character or U+XXXX",
            value, key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table() {
        let table = SubstitutionTable::new();
        assert!(table.is_empty());
        assert_eq!(table.lookup([0xF0, 0x40]), None);
    }

    #[test]
    fn test_exact_match_only() {
        let table = SubstitutionTable::from_entries([([0xF0, 0x40], '\u{E000}')]).unwrap();
        assert_eq!(table.lookup([0xF0, 0x40]), Some('\u{E000}'));
        assert_eq!(table.lookup([0xF0, 0x41]), None);
        assert_eq!(table.lookup([0x40, 0xF0]), None);
    }

    #[test]
    fn test_duplicate_entries_rejected() {
        let result =
            SubstitutionTable::from_entries([([0xF0, 0x40], 'a'), ([0xF0, 0x40], 'b')]);
        assert!(matches!(result, Err(Error::Table(_))));
    }

    #[test]
    fn test_json_table() {
        let json = r#"{ "F040": "U+E000", "0xf041": "\uE001", "F9FC": "𠀋" }"#;
        let table = SubstitutionTable::from_json_str(json).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup([0xF0, 0x40]), Some('\u{E000}'));
        assert_eq!(table.lookup([0xF0, 0x41]), Some('\u{E001}'));
        assert_eq!(table.lookup([0xF9, 0xFC]), Some('𠀋'));
    }

    #[test]
    fn test_json_case_insensitive_duplicate() {
        let json = r#"{ "F040": "U+E000", "f040": "U+E001" }"#;
        assert!(matches!(
            SubstitutionTable::from_json_str(json),
            Err(Error::Table(_))
        ));
    }

    #[test]
    fn test_json_invalid_entries() {
        for json in [
            r#"{ "F04": "U+E000" }"#,
            r#"{ "F0G0": "U+E000" }"#,
            r#"{ "F040": "ab" }"#,
            r#"{ "F040": "" }"#,
            r#"{ "F040": "U+D800" }"#,
            r#"[1, 2]"#,
        ] {
            assert!(
                matches!(SubstitutionTable::from_json_str(json), Err(Error::Table(_))),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_iter_sorted() {
        let table = SubstitutionTable::from_entries([
            ([0xF1, 0x40], 'b'),
            ([0xF0, 0x40], 'a'),
        ])
        .unwrap();
        let keys: Vec<_> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![[0xF0, 0x40], [0xF1, 0x40]]);
    }
}
