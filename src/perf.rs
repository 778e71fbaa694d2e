//! Batch text encoding with an optional parallel encode pass.
//!
//! The character table is the only shared mutable state in the writer, so a
//! batch is encoded in two passes:
//!
//! 1. **Discovery** (always serial): walk every text in order and call
//!    `ensure_entry` for each character.  This allocates labels and indices
//!    in exactly the order a one-file-at-a-time writer would, so a batch and
//!    a sequence of single adds produce the same table for the same seed.
//! 2. **Encode**: the table is now frozen; each text is encoded against it
//!    independently.  With the `parallel` feature this pass runs on Rayon's
//!    global pool; without it the pass is a plain loop.

use thiserror::Error;

use crate::codec::{encode_frozen, CodecError};
use crate::table::{CharTable, LabelGenerator};

/// A batch failure, tagged with the position of the offending text.
#[derive(Error, Debug)]
#[error("text #{position}: {source}")]
pub struct BatchError {
    pub position: usize,
    #[source]
    pub source:   CodecError,
}

/// Register every character of `texts` in first-seen order.
pub fn discover(
    texts:  &[&str],
    table:  &mut CharTable,
    labels: &mut LabelGenerator,
) -> Result<(), BatchError> {
    for (position, text) in texts.iter().enumerate() {
        for ch in text.chars() {
            table
                .ensure_entry(ch, labels)
                .map_err(|e| BatchError { position, source: e.into() })?;
        }
    }
    Ok(())
}

/// Encode `texts`, growing `table` as needed.  Returns one payload per text
/// in input order.
pub fn encode_batch(
    texts:  &[&str],
    table:  &mut CharTable,
    labels: &mut LabelGenerator,
) -> Result<Vec<Vec<u8>>, BatchError> {
    discover(texts, table, labels)?;
    let frozen: &CharTable = table;

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        texts
            .par_iter()
            .enumerate()
            .map(|(position, text)| {
                encode_frozen(text, frozen).map_err(|source| BatchError { position, source })
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        texts
            .iter()
            .enumerate()
            .map(|(position, text)| {
                encode_frozen(text, frozen).map_err(|source| BatchError { position, source })
            })
            .collect()
    }
}
