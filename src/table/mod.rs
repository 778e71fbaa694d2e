//! Character table: the run-wide substitution state shared by every text file.
//!
//! Each distinct character gets a random alphanumeric *label*, and each label
//! gets a dense *index* assigned in first-seen order starting at 0.  Entries
//! are never removed or reassigned.
//!
//! The table itself is plain data so it can be persisted into the metadata
//! side-car and shared read-only by the reader and the exporter.  Randomness
//! lives in [`LabelGenerator`], which only the writer owns.
//!
//! # Capacity
//! Indices are written with a fixed [`IndexWidth`].  Allocating past the
//! width's capacity fails with [`TableError::IndexSpaceExhausted`]; it never
//! wraps.

use std::collections::HashMap;
use std::fmt;

use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

// ── IndexWidth ───────────────────────────────────────────────────────────────

/// Byte width of one index in an encoded text payload (big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexWidth {
    U8,
    #[default]
    U16,
    U32,
}

impl IndexWidth {
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            IndexWidth::U8  => 1,
            IndexWidth::U16 => 2,
            IndexWidth::U32 => 4,
        }
    }

    /// Number of distinct indices this width can address.
    #[inline]
    pub fn capacity(self) -> u64 {
        1u64 << (8 * self.bytes())
    }

    pub fn from_bytes(n: usize) -> Option<Self> {
        match n {
            1 => Some(IndexWidth::U8),
            2 => Some(IndexWidth::U16),
            4 => Some(IndexWidth::U32),
            _ => None,
        }
    }

    pub fn from_bits(n: u32) -> Option<Self> {
        match n {
            8  => Some(IndexWidth::U8),
            16 => Some(IndexWidth::U16),
            32 => Some(IndexWidth::U32),
            _  => None,
        }
    }
}

impl fmt::Display for IndexWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bytes() * 8)
    }
}

// Persisted as the byte count (`"index_width": 2`).
impl Serialize for IndexWidth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bytes() as u8)
    }
}

impl<'de> Deserialize<'de> for IndexWidth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = u8::deserialize(deserializer)?;
        IndexWidth::from_bytes(n as usize).ok_or_else(|| {
            serde::de::Error::custom(format!("unsupported index width: {n} bytes"))
        })
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Index space exhausted: a {width} index holds at most {capacity} distinct characters")]
    IndexSpaceExhausted { width: IndexWidth, capacity: u64 },
    #[error("No unused label found after {attempts} attempts")]
    LabelSpaceExhausted { attempts: u32 },
    #[error("Character {0:?} appears more than once in the label table")]
    DuplicateCharacter(char),
    #[error("Label {0:?} is assigned to more than one character")]
    DuplicateLabel(String),
    #[error("Label {0:?} appears more than once in the index table")]
    DuplicateIndexLabel(String),
    #[error("Index {0} is assigned to more than one label")]
    DuplicateIndex(u32),
    #[error("Index {index} does not fit in a {width} index")]
    IndexOutOfRange { index: u32, width: IndexWidth },
    #[error("Invalid label policy: {0}")]
    InvalidPolicy(String),
}

// ── Label generation ─────────────────────────────────────────────────────────

/// Shape of generated labels and the retry ceiling for collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelPolicy {
    pub min_len:      usize,
    pub max_len:      usize,
    pub max_attempts: u32,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self { min_len: 7, max_len: 9, max_attempts: 4096 }
    }
}

impl LabelPolicy {
    pub fn validate(&self) -> Result<(), TableError> {
        if self.min_len == 0 {
            return Err(TableError::InvalidPolicy("labels must be at least 1 symbol".into()));
        }
        if self.min_len > self.max_len {
            return Err(TableError::InvalidPolicy(format!(
                "min_len {} exceeds max_len {}", self.min_len, self.max_len
            )));
        }
        if self.max_attempts == 0 {
            return Err(TableError::InvalidPolicy("max_attempts must be non-zero".into()));
        }
        Ok(())
    }
}

/// Source of random labels over `[A-Za-z0-9]`.
pub struct LabelGenerator {
    rng:    StdRng,
    policy: LabelPolicy,
}

impl LabelGenerator {
    /// OS-seeded generator: every run produces different labels.
    pub fn new(policy: LabelPolicy) -> Result<Self, TableError> {
        policy.validate()?;
        Ok(Self { rng: StdRng::from_os_rng(), policy })
    }

    /// Deterministic generator for reproducible archives.
    pub fn with_seed(policy: LabelPolicy, seed: u64) -> Result<Self, TableError> {
        policy.validate()?;
        Ok(Self { rng: StdRng::seed_from_u64(seed), policy })
    }

    fn generate(&mut self) -> String {
        let len = self.rng.random_range(self.policy.min_len..=self.policy.max_len);
        (0..len).map(|_| char::from(self.rng.sample(Alphanumeric))).collect()
    }

    /// Draw labels until `taken` rejects none, giving up after
    /// `policy.max_attempts` draws.
    pub fn fresh<F: Fn(&str) -> bool>(&mut self, taken: F) -> Result<String, TableError> {
        for _ in 0..self.policy.max_attempts {
            let candidate = self.generate();
            if !taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(TableError::LabelSpaceExhausted { attempts: self.policy.max_attempts })
    }
}

impl fmt::Debug for LabelGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelGenerator").field("policy", &self.policy).finish()
    }
}

// ── CharTable ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CharTable {
    width:      IndexWidth,
    /// char → label, first-seen order.
    keys:       Vec<(char, String)>,
    /// label → index, first-seen order.
    bin:        Vec<(String, u32)>,
    label_of:   HashMap<char, String>,
    char_of:    HashMap<String, char>,
    index_of:   HashMap<String, u32>,
    label_at:   HashMap<u32, String>,
    next_index: u64,
}

impl CharTable {
    pub fn new(width: IndexWidth) -> Self {
        Self { width, ..Self::default() }
    }

    /// Rebuild a table from persisted maps.
    ///
    /// Duplicate characters, labels or indices and out-of-range indices are
    /// rejected.  Dangling entries are kept; they only fail when a payload
    /// actually references them.
    pub fn from_parts(
        width: IndexWidth,
        keys:  Vec<(char, String)>,
        bin:   Vec<(String, u32)>,
    ) -> Result<Self, TableError> {
        let mut table = Self::new(width);

        for (ch, label) in keys {
            if table.label_of.contains_key(&ch) {
                return Err(TableError::DuplicateCharacter(ch));
            }
            if table.char_of.contains_key(&label) {
                return Err(TableError::DuplicateLabel(label));
            }
            table.label_of.insert(ch, label.clone());
            table.char_of.insert(label.clone(), ch);
            table.keys.push((ch, label));
        }

        for (label, index) in bin {
            if u64::from(index) >= width.capacity() {
                return Err(TableError::IndexOutOfRange { index, width });
            }
            if table.index_of.contains_key(&label) {
                return Err(TableError::DuplicateIndexLabel(label));
            }
            if table.label_at.contains_key(&index) {
                return Err(TableError::DuplicateIndex(index));
            }
            table.next_index = table.next_index.max(u64::from(index) + 1);
            table.index_of.insert(label.clone(), index);
            table.label_at.insert(index, label.clone());
            table.bin.push((label, index));
        }

        Ok(table)
    }

    /// Return the index for `ch`, allocating a label and the next index on
    /// first sight.  Idempotent: a known character never draws new randomness.
    ///
    /// On error the table is unchanged.
    pub fn ensure_entry(&mut self, ch: char, labels: &mut LabelGenerator) -> Result<u32, TableError> {
        if let Some(index) = self.lookup_index(ch) {
            return Ok(index);
        }
        if self.next_index >= self.width.capacity() {
            return Err(TableError::IndexSpaceExhausted {
                width:    self.width,
                capacity: self.width.capacity(),
            });
        }

        let label = match self.label_of.get(&ch) {
            Some(existing) => existing.clone(),
            None => labels.fresh(|candidate| self.is_label_taken(candidate))?,
        };

        let index = self.next_index as u32;
        self.next_index += 1;

        if !self.label_of.contains_key(&ch) {
            self.label_of.insert(ch, label.clone());
            self.char_of.insert(label.clone(), ch);
            self.keys.push((ch, label.clone()));
        }
        self.index_of.insert(label.clone(), index);
        self.label_at.insert(index, label.clone());
        debug!(character = ?ch, %label, index, "new table entry");
        self.bin.push((label, index));

        Ok(index)
    }

    fn is_label_taken(&self, label: &str) -> bool {
        self.index_of.contains_key(label) || self.char_of.contains_key(label)
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn width(&self) -> IndexWidth { self.width }

    /// Number of allocated indices.
    pub fn len(&self) -> usize { self.bin.len() }

    pub fn is_empty(&self) -> bool { self.bin.is_empty() }

    pub fn label_of(&self, ch: char) -> Option<&str> {
        self.label_of.get(&ch).map(String::as_str)
    }

    pub fn char_of(&self, label: &str) -> Option<char> {
        self.char_of.get(label).copied()
    }

    pub fn index_of(&self, label: &str) -> Option<u32> {
        self.index_of.get(label).copied()
    }

    pub fn label_at(&self, index: u32) -> Option<&str> {
        self.label_at.get(&index).map(String::as_str)
    }

    /// char → label → index, without allocating.
    pub fn lookup_index(&self, ch: char) -> Option<u32> {
        self.label_of.get(&ch).and_then(|label| self.index_of.get(label)).copied()
    }

    /// char → label pairs in first-seen order.
    pub fn labels(&self) -> impl Iterator<Item = (char, &str)> + '_ {
        self.keys.iter().map(|(ch, label)| (*ch, label.as_str()))
    }

    /// label → index pairs in first-seen order.
    pub fn indices(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.bin.iter().map(|(label, index)| (label.as_str(), *index))
    }
}

impl PartialEq for CharTable {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width && self.keys == other.keys && self.bin == other.bin
    }
}

impl Eq for CharTable {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seeded() -> LabelGenerator {
        LabelGenerator::with_seed(LabelPolicy::default(), 7).unwrap()
    }

    #[test]
    fn indices_follow_first_seen_order() {
        let mut table = CharTable::new(IndexWidth::U16);
        let mut gen = seeded();
        for (expected, ch) in "hi!".chars().enumerate() {
            assert_eq!(table.ensure_entry(ch, &mut gen).unwrap(), expected as u32);
        }
        let order: Vec<char> = table.labels().map(|(c, _)| c).collect();
        assert_eq!(order, vec!['h', 'i', '!']);
    }

    #[test]
    fn ensure_entry_is_idempotent() {
        let mut table = CharTable::new(IndexWidth::U16);
        let mut gen = seeded();
        let first = table.ensure_entry('x', &mut gen).unwrap();
        let label = table.label_of('x').unwrap().to_owned();
        for _ in 0..10 {
            assert_eq!(table.ensure_entry('x', &mut gen).unwrap(), first);
        }
        assert_eq!(table.label_of('x'), Some(label.as_str()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn labels_respect_policy_shape() {
        let mut table = CharTable::new(IndexWidth::U16);
        let mut gen = seeded();
        for ch in "abcdefghijklmnopqrstuvwxyz".chars() {
            table.ensure_entry(ch, &mut gen).unwrap();
        }
        for (_, label) in table.labels() {
            assert!((7..=9).contains(&label.len()), "bad label length: {label}");
            assert!(label.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn maps_stay_injective_and_equal_sized() {
        let mut table = CharTable::new(IndexWidth::U16);
        let mut gen = seeded();
        for cp in 0x20u32..0x2000 {
            if let Some(ch) = char::from_u32(cp) {
                table.ensure_entry(ch, &mut gen).unwrap();
            }
        }
        let labels: HashSet<&str> = table.labels().map(|(_, l)| l).collect();
        let indices: HashSet<u32> = table.indices().map(|(_, i)| i).collect();
        assert_eq!(labels.len(), table.labels().count());
        assert_eq!(indices.len(), table.len());
        assert_eq!(table.labels().count(), table.indices().count());
        for (ch, label) in table.labels() {
            assert_eq!(table.char_of(label), Some(ch));
            assert!(table.index_of(label).is_some());
        }
    }

    #[test]
    fn same_seed_same_labels() {
        let build = || {
            let mut table = CharTable::new(IndexWidth::U16);
            let mut gen = seeded();
            for ch in "hello world".chars() {
                table.ensure_entry(ch, &mut gen).unwrap();
            }
            table
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn narrow_width_fails_instead_of_wrapping() {
        let mut table = CharTable::new(IndexWidth::U8);
        let mut gen = seeded();
        for cp in 0u32..256 {
            table.ensure_entry(char::from_u32(0x100 + cp).unwrap(), &mut gen).unwrap();
        }
        let err = table.ensure_entry('z', &mut gen).unwrap_err();
        assert_eq!(err, TableError::IndexSpaceExhausted { width: IndexWidth::U8, capacity: 256 });
        assert_eq!(table.len(), 256);
        assert!(table.label_of('z').is_none());
    }

    #[test]
    fn exhausted_label_space_is_reported() {
        let policy = LabelPolicy { min_len: 1, max_len: 1, max_attempts: 10_000 };
        let mut gen = LabelGenerator::with_seed(policy, 1).unwrap();
        let mut table = CharTable::new(IndexWidth::U16);
        // 62 one-symbol labels exist.
        for cp in 0u32..62 {
            table.ensure_entry(char::from_u32(0x400 + cp).unwrap(), &mut gen).unwrap();
        }
        let err = table.ensure_entry('!', &mut gen).unwrap_err();
        assert_eq!(err, TableError::LabelSpaceExhausted { attempts: 10_000 });
        assert_eq!(table.len(), 62);
    }

    #[test]
    fn invalid_policy_rejected() {
        let policy = LabelPolicy { min_len: 5, max_len: 3, max_attempts: 1 };
        assert!(matches!(LabelGenerator::new(policy), Err(TableError::InvalidPolicy(_))));
    }

    #[test]
    fn from_parts_rejects_duplicates() {
        let keys = vec![('a', "L1".to_string()), ('b', "L1".to_string())];
        assert_eq!(
            CharTable::from_parts(IndexWidth::U16, keys, vec![]).unwrap_err(),
            TableError::DuplicateLabel("L1".into()),
        );

        let bin = vec![("L1".to_string(), 0), ("L2".to_string(), 0)];
        assert_eq!(
            CharTable::from_parts(IndexWidth::U16, vec![], bin).unwrap_err(),
            TableError::DuplicateIndex(0),
        );

        let bin = vec![("L1".to_string(), 300)];
        assert_eq!(
            CharTable::from_parts(IndexWidth::U8, vec![], bin).unwrap_err(),
            TableError::IndexOutOfRange { index: 300, width: IndexWidth::U8 },
        );
    }

    #[test]
    fn loaded_table_continues_after_highest_index() {
        let keys = vec![('a', "La".to_string()), ('b', "Lb".to_string())];
        let bin  = vec![("La".to_string(), 0), ("Lb".to_string(), 5)];
        let mut table = CharTable::from_parts(IndexWidth::U16, keys, bin).unwrap();
        assert_eq!(table.ensure_entry('b', &mut seeded()).unwrap(), 5);
        assert_eq!(table.ensure_entry('c', &mut seeded()).unwrap(), 6);
    }
}
