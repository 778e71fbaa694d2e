//! Metadata side-car (`keys.json`): the character table plus the ordered
//! file records that slice the blob.
//!
//! The JSON field names (`keys`, `bin`, `files`) are shared with other
//! readers of the format and must not change.  `index_width`, `archive_id`
//! and `created` are optional on input so metadata without them still loads.

use std::fmt;
use std::marker::PhantomData;

use chrono::Utc;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::classify::Classification;
use crate::table::{CharTable, IndexWidth};

// ── FileRecord ───────────────────────────────────────────────────────────────

/// One file's slice of the blob.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Relative, forward-slash path from the archive root.
    pub path:   String,
    pub offset: u64,
    pub length: u64,
    pub binary: bool,
}

impl FileRecord {
    #[inline]
    pub fn end(&self) -> u64 { self.offset + self.length }

    pub fn classification(&self) -> Classification {
        if self.binary { Classification::Binary } else { Classification::Text }
    }
}

// ── Layout validation ────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Record {position} ({path}) starts at {offset}, leaving a gap after {expected}")]
    Gap { position: usize, path: String, offset: u64, expected: u64 },
    #[error("Record {position} ({path}) starts at {offset}, overlapping data up to {expected}")]
    Overlap { position: usize, path: String, offset: u64, expected: u64 },
    #[error("Records cover {records_end} bytes but the blob holds {blob_len}")]
    LengthMismatch { records_end: u64, blob_len: u64 },
}

// ── Manifest ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub table:      CharTable,
    pub files:      Vec<FileRecord>,
    pub archive_id: Option<String>,
    /// Unix seconds.
    pub created:    Option<i64>,
}

impl Manifest {
    /// Fresh metadata for a completed packing run.
    pub fn new(table: CharTable, files: Vec<FileRecord>) -> Self {
        Self {
            table,
            files,
            archive_id: Some(Uuid::new_v4().to_string()),
            created:    Some(Utc::now().timestamp()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn find(&self, path: &str) -> Option<&FileRecord> {
        self.files.iter().find(|r| r.path == path)
    }

    /// Sum of all record lengths; equals the blob size for a well-formed
    /// archive.
    pub fn payload_len(&self) -> u64 {
        self.files.iter().map(|r| r.length).sum()
    }

    /// Check that records tile `[0, blob_len)` in order with no gaps or
    /// overlaps.
    pub fn validate_layout(&self, blob_len: u64) -> Result<(), LayoutError> {
        let mut expected = 0u64;
        for (position, r) in self.files.iter().enumerate() {
            if r.offset > expected {
                return Err(LayoutError::Gap {
                    position, path: r.path.clone(), offset: r.offset, expected,
                });
            }
            if r.offset < expected {
                return Err(LayoutError::Overlap {
                    position, path: r.path.clone(), offset: r.offset, expected,
                });
            }
            expected = r.end();
        }
        if expected != blob_len {
            return Err(LayoutError::LengthMismatch { records_end: expected, blob_len });
        }
        Ok(())
    }
}

// ── Serialization ────────────────────────────────────────────────────────────

struct LabelMap<'a>(&'a CharTable);

impl Serialize for LabelMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.labels())
    }
}

struct BinMap<'a>(&'a CharTable);

impl Serialize for BinMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.indices())
    }
}

impl Serialize for Manifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut len = 4;
        if self.archive_id.is_some() { len += 1; }
        if self.created.is_some() { len += 1; }

        let mut s = serializer.serialize_struct("Manifest", len)?;
        s.serialize_field("keys", &LabelMap(&self.table))?;
        s.serialize_field("bin", &BinMap(&self.table))?;
        s.serialize_field("files", &self.files)?;
        s.serialize_field("index_width", &self.table.width())?;
        if let Some(id) = &self.archive_id {
            s.serialize_field("archive_id", id)?;
        }
        if let Some(created) = &self.created {
            s.serialize_field("created", created)?;
        }
        s.end()
    }
}

/// JSON object read as an ordered list of pairs; duplicates are kept so the
/// table can reject them.
struct Pairs<K, V>(Vec<(K, V)>);

impl<'de, K: Deserialize<'de>, V: Deserialize<'de>> Deserialize<'de> for Pairs<K, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor<K, V>(PhantomData<(K, V)>);

        impl<'de, K: Deserialize<'de>, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<K, V> {
            type Value = Pairs<K, V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    out.push(entry);
                }
                Ok(Pairs(out))
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}

// Helper used only during deserialization; the table is validated afterwards.
#[derive(Deserialize)]
struct ManifestRaw {
    keys:        Pairs<char, String>,
    bin:         Pairs<String, u32>,
    files:       Vec<FileRecord>,
    #[serde(default)]
    index_width: IndexWidth,
    #[serde(default)]
    archive_id:  Option<String>,
    #[serde(default)]
    created:     Option<i64>,
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = ManifestRaw::deserialize(deserializer)?;
        let table = CharTable::from_parts(raw.index_width, raw.keys.0, raw.bin.0)
            .map_err(serde::de::Error::custom)?;
        Ok(Manifest {
            table,
            files:      raw.files,
            archive_id: raw.archive_id,
            created:    raw.created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{LabelGenerator, LabelPolicy};

    fn record(path: &str, offset: u64, length: u64, binary: bool) -> FileRecord {
        FileRecord { path: path.into(), offset, length, binary }
    }

    fn sample() -> Manifest {
        let mut table = CharTable::new(IndexWidth::U16);
        let mut gen = LabelGenerator::with_seed(LabelPolicy::default(), 3).unwrap();
        for ch in "hi\"\\\n€".chars() {
            table.ensure_entry(ch, &mut gen).unwrap();
        }
        Manifest::new(table, vec![
            record("a.txt", 0, 4, false),
            record("b.png", 4, 2, true),
        ])
    }

    #[test]
    fn record_classification_follows_binary_flag() {
        let m = sample();
        assert_eq!(m.files[0].classification(), Classification::Text);
        assert_eq!(m.files[1].classification(), Classification::Binary);
        assert_eq!(m.files[1].end(), 6);
    }

    #[test]
    fn json_keeps_first_seen_order() {
        let m = sample();
        let back = Manifest::from_bytes(&m.to_bytes().unwrap()).unwrap();
        assert_eq!(back, m);
        let order: Vec<char> = back.table.labels().map(|(c, _)| c).collect();
        assert_eq!(order, vec!['h', 'i', '"', '\\', '\n', '€']);
    }

    #[test]
    fn metadata_without_optional_fields_loads() {
        let json = br#"{
            "keys": { "h": "AbCdEfG", "i": "HiJkLmNo" },
            "bin":  { "AbCdEfG": 0, "HiJkLmNo": 1 },
            "files": [ { "path": "a.txt", "offset": 0, "length": 4, "binary": false } ]
        }"#;
        let m = Manifest::from_bytes(json).unwrap();
        assert_eq!(m.table.width(), IndexWidth::U16);
        assert_eq!(m.table.lookup_index('i'), Some(1));
        assert_eq!(m.archive_id, None);
        assert_eq!(m.created, None);
        assert_eq!(m.find("a.txt").unwrap().length, 4);
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let json = br#"{
            "keys": { "a": "L1", "b": "L2" },
            "bin":  { "L1": 0, "L2": 0 },
            "files": []
        }"#;
        let err = Manifest::from_bytes(json).unwrap_err();
        assert!(err.to_string().contains("Index 0"), "{err}");
    }

    #[test]
    fn unsupported_width_is_rejected() {
        let json = br#"{ "keys": {}, "bin": {}, "files": [], "index_width": 3 }"#;
        assert!(Manifest::from_bytes(json).is_err());
    }

    #[test]
    fn contiguous_layout_validates() {
        let m = sample();
        assert_eq!(m.payload_len(), 6);
        assert!(m.validate_layout(6).is_ok());
        assert_eq!(
            m.validate_layout(7),
            Err(LayoutError::LengthMismatch { records_end: 6, blob_len: 7 }),
        );
    }

    #[test]
    fn gaps_and_overlaps_are_reported() {
        let mut m = sample();
        m.files[1].offset = 5;
        assert!(matches!(m.validate_layout(7), Err(LayoutError::Gap { position: 1, .. })));
        m.files[1].offset = 3;
        assert!(matches!(m.validate_layout(5), Err(LayoutError::Overlap { position: 1, .. })));
    }
}
