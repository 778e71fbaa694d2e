//! Text codec: a character stream becomes a stream of fixed-width table
//! indices.
//!
//! # Layout
//! One index per character, big-endian, `width.bytes()` bytes each, no
//! header and no padding.  A payload for `n` characters is exactly
//! `n * width.bytes()` bytes long, so the empty text encodes to an empty
//! payload.
//!
//! # Decoding
//! index → label → character, through the table's inverted maps.  A
//! missing link means the payload and the metadata do not belong together;
//! decoding stops with an error instead of substituting anything.

use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::table::{CharTable, IndexWidth, LabelGenerator, TableError};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Index {0} has no label in the character table")]
    UnknownIndex(u32),
    #[error("Label {0:?} has no character in the character table")]
    UnknownLabel(String),
    #[error("Character {0:?} is not in the frozen character table")]
    UnmappedCharacter(char),
    #[error("Payload of {len} bytes is not a whole number of {width} indices")]
    TruncatedPayload { len: usize, width: IndexWidth },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Index I/O ────────────────────────────────────────────────────────────────

fn write_index(out: &mut Vec<u8>, width: IndexWidth, index: u32) -> io::Result<()> {
    match width {
        IndexWidth::U8  => out.write_u8(index as u8),
        IndexWidth::U16 => out.write_u16::<BigEndian>(index as u16),
        IndexWidth::U32 => out.write_u32::<BigEndian>(index),
    }
}

fn read_index(cur: &mut Cursor<&[u8]>, width: IndexWidth) -> io::Result<u32> {
    match width {
        IndexWidth::U8  => cur.read_u8().map(u32::from),
        IndexWidth::U16 => cur.read_u16::<BigEndian>().map(u32::from),
        IndexWidth::U32 => cur.read_u32::<BigEndian>(),
    }
}

/// Encoded size of `text` under `width`.
#[inline]
pub fn encoded_len(text: &str, width: IndexWidth) -> usize {
    text.chars().count() * width.bytes()
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Encode `text`, growing `table` for characters seen for the first time.
///
/// On error the characters before the failing one have already been added to
/// the table; callers treat table errors as fatal for the whole run.
pub fn encode_text(
    text:   &str,
    table:  &mut CharTable,
    labels: &mut LabelGenerator,
) -> Result<Vec<u8>, CodecError> {
    let width = table.width();
    let mut out = Vec::with_capacity(encoded_len(text, width));
    for ch in text.chars() {
        let index = table.ensure_entry(ch, labels)?;
        write_index(&mut out, width, index)?;
    }
    Ok(out)
}

/// Encode `text` against a table that must already hold every character.
pub fn encode_frozen(text: &str, table: &CharTable) -> Result<Vec<u8>, CodecError> {
    let width = table.width();
    let mut out = Vec::with_capacity(encoded_len(text, width));
    for ch in text.chars() {
        let index = table.lookup_index(ch).ok_or(CodecError::UnmappedCharacter(ch))?;
        write_index(&mut out, width, index)?;
    }
    Ok(out)
}

// ── Decode ───────────────────────────────────────────────────────────────────

pub fn decode_text(payload: &[u8], table: &CharTable) -> Result<String, CodecError> {
    let width = table.width();
    if payload.len() % width.bytes() != 0 {
        return Err(CodecError::TruncatedPayload { len: payload.len(), width });
    }

    let mut text = String::with_capacity(payload.len() / width.bytes());
    let mut cur = Cursor::new(payload);
    while (cur.position() as usize) < payload.len() {
        let index = read_index(&mut cur, width)?;
        let label = table.label_at(index).ok_or(CodecError::UnknownIndex(index))?;
        let ch = table
            .char_of(label)
            .ok_or_else(|| CodecError::UnknownLabel(label.to_owned()))?;
        text.push(ch);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::LabelPolicy;
    use proptest::prelude::*;

    fn fresh(width: IndexWidth) -> (CharTable, LabelGenerator) {
        (
            CharTable::new(width),
            LabelGenerator::with_seed(LabelPolicy::default(), 42).unwrap(),
        )
    }

    #[test]
    fn hi_encodes_to_first_two_indices() {
        let (mut table, mut gen) = fresh(IndexWidth::U16);
        let payload = encode_text("hi", &mut table, &mut gen).unwrap();
        assert_eq!(payload, vec![0x00, 0x00, 0x00, 0x01]);
        assert_eq!(decode_text(&payload, &table).unwrap(), "hi");
    }

    #[test]
    fn empty_text_is_empty_payload() {
        let (mut table, mut gen) = fresh(IndexWidth::U16);
        let payload = encode_text("", &mut table, &mut gen).unwrap();
        assert!(payload.is_empty());
        assert!(table.is_empty());
        assert_eq!(decode_text(&payload, &table).unwrap(), "");
    }

    #[test]
    fn repeated_characters_reuse_their_index() {
        let (mut table, mut gen) = fresh(IndexWidth::U16);
        let a = encode_text("abab", &mut table, &mut gen).unwrap();
        let b = encode_text("ba", &mut table, &mut gen).unwrap();
        assert_eq!(a, vec![0, 0, 0, 1, 0, 0, 0, 1]);
        assert_eq!(b, vec![0, 1, 0, 0]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn payload_length_tracks_width() {
        for width in [IndexWidth::U8, IndexWidth::U16, IndexWidth::U32] {
            let (mut table, mut gen) = fresh(width);
            let text = "żółw 🐢\n";
            let payload = encode_text(text, &mut table, &mut gen).unwrap();
            assert_eq!(payload.len(), text.chars().count() * width.bytes());
            assert_eq!(decode_text(&payload, &table).unwrap(), text);
        }
    }

    #[test]
    fn frozen_encoding_matches_growing_encoding() {
        let (mut table, mut gen) = fresh(IndexWidth::U16);
        let grown = encode_text("frozen table", &mut table, &mut gen).unwrap();
        assert_eq!(encode_frozen("frozen table", &table).unwrap(), grown);
        assert!(matches!(
            encode_frozen("frozen!", &table),
            Err(CodecError::UnmappedCharacter('!'))
        ));
    }

    #[test]
    fn unknown_index_is_an_error() {
        let (mut table, mut gen) = fresh(IndexWidth::U16);
        encode_text("a", &mut table, &mut gen).unwrap();
        assert!(matches!(
            decode_text(&[0x00, 0x07], &table),
            Err(CodecError::UnknownIndex(7))
        ));
    }

    #[test]
    fn dangling_label_is_an_error() {
        let table = CharTable::from_parts(
            IndexWidth::U16,
            vec![],
            vec![("orphan".to_string(), 0)],
        ).unwrap();
        assert!(matches!(
            decode_text(&[0x00, 0x00], &table),
            Err(CodecError::UnknownLabel(ref l)) if l == "orphan"
        ));
    }

    #[test]
    fn odd_payload_is_truncated() {
        let (table, _) = fresh(IndexWidth::U16);
        assert!(matches!(
            decode_text(&[0x00, 0x00, 0x01], &table),
            Err(CodecError::TruncatedPayload { len: 3, .. })
        ));
    }

    proptest! {
        #[test]
        fn any_text_survives_a_round_trip(text in "\\PC{0,64}") {
            let (mut table, mut gen) = fresh(IndexWidth::U16);
            let payload = encode_text(&text, &mut table, &mut gen).unwrap();
            prop_assert_eq!(payload.len(), 2 * text.chars().count());
            prop_assert_eq!(decode_text(&payload, &table).unwrap(), text);
        }
    }
}
