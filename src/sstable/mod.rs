//! Column-oriented Sorted String Tables, the on-disk format of the LSM
//! tree. Tables are immutable: a builder writes each one exactly once, and
//! readers share it until versioning retires the file.
//!
//! A logical table whose values split into N columns is materialized as one
//! *main* file plus N *subcolumn* files. The main file maps internal keys
//! to row positions; subcolumn `i` maps row positions to that column's
//! bytes. The i-th record lands at the same row position in every file, so
//! a read that projects two of ten columns touches three files and skips
//! the rest.
//!
//! ## File layout (main and subcolumn files alike)
//!
//! ```text
//! +--------------------------+
//! | Data Block 1             |
//! +--------------------------+
//! | Data Block 2             |
//! +--------------------------+
//! | ...                      |
//! +--------------------------+
//! | Meta Block: column meta  |
//! +--------------------------+
//! | Meta Block: properties   |
//! +--------------------------+
//! | Meta Block: dict (opt.)  |
//! +--------------------------+
//! | Metaindex Block          |
//! +--------------------------+
//! | Index Block              |
//! +--------------------------+
//! | Footer (53 bytes)        |
//! +--------------------------+
//! ```
//!
//! Every block is framed by a compression-type byte and a masked CRC32C;
//! the footer locates the metaindex and index blocks and ends in the
//! column-table magic number.

pub mod block;
pub mod builder;
pub mod compression;
pub mod flush;
pub mod format;
pub mod index;
pub mod meta;
pub mod reader;
pub mod two_level;

use crate::error::Result;

/// The positioned-iterator protocol shared by block iterators, two-level
/// iterators, and table iterators.
///
/// An iterator is either positioned at an entry (`valid()`) or exhausted.
/// `key`/`value`/`next` may only be called while valid. Errors surface
/// through `status()`; an iterator that hits one becomes invalid and stays
/// so.
pub trait InternalIterator {
    fn valid(&self) -> bool;

    /// Positions at the first entry.
    fn seek_to_first(&mut self);

    /// Positions at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    /// Advances to the next entry. Requires `valid()`.
    fn next(&mut self);

    /// Key of the current entry. Requires `valid()`.
    fn key(&self) -> &[u8];

    /// Value of the current entry. Requires `valid()`.
    fn value(&self) -> &[u8];

    /// First error this iterator encountered, if any.
    fn status(&self) -> Result<()>;
}
