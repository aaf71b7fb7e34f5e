//! Value splitting.
//!
//! A [`Splitter`] is the pure bijection between a record's stitched value and
//! its per-column byte strings: `stitch(split(v)) == v` for every `v` and
//! `split(stitch(parts)) == parts` for every `parts`. The table builder
//! splits on the write path; the reader stitches the projected columns back
//! together on the read path.

use crate::error::Result;
use crate::errinput;

/// Escape byte used by [`PipeSplitter`] to stuff delimiter literals.
const ESCAPE: u8 = b'\\';
/// Column delimiter used by [`PipeSplitter`].
const DELIMITER: u8 = b'|';

pub trait Splitter: Send + Sync {
    /// Wire-stable name, recorded in the properties block.
    fn name(&self) -> &'static str;

    /// Splits a stitched value into column byte strings. An empty input
    /// splits into no columns at all.
    fn split(&self, value: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Reassembles column byte strings into a stitched value. Exact inverse
    /// of [`Splitter::split`].
    fn stitch(&self, parts: &[Vec<u8>]) -> Vec<u8>;
}

/// Splits on `|`, byte-stuffing literal `|` and `\` with a leading `\`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipeSplitter;

impl Splitter for PipeSplitter {
    fn name(&self) -> &'static str {
        "vidardb.PipeSplitter"
    }

    fn split(&self, value: &[u8]) -> Result<Vec<Vec<u8>>> {
        if value.is_empty() {
            return Ok(Vec::new());
        }
        let mut parts = vec![Vec::new()];
        let mut bytes = value.iter().copied();
        while let Some(byte) = bytes.next() {
            match byte {
                ESCAPE => match bytes.next() {
                    Some(escaped @ (ESCAPE | DELIMITER)) => {
                        parts.last_mut().unwrap().push(escaped)
                    }
                    Some(other) => {
                        return Err(errinput!("bad escape sequence \\{}", other as char))
                    }
                    None => return Err(errinput!("dangling escape at end of value")),
                },
                DELIMITER => parts.push(Vec::new()),
                byte => parts.last_mut().unwrap().push(byte),
            }
        }
        Ok(parts)
    }

    fn stitch(&self, parts: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.push(DELIMITER);
            }
            for &byte in part {
                if byte == ESCAPE || byte == DELIMITER {
                    out.push(ESCAPE);
                }
                out.push(byte);
            }
        }
        out
    }
}
