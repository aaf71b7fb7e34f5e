//! Level-wise file iteration.
//!
//! A [`FileIter`] walks the table files of one level in key order, exposing
//! the current table's projection hooks so query planners can prune whole
//! files by per-block column bounds before materializing anything.

use std::sync::Arc;

use crate::config::ReadOptions;
use crate::error::{Error, Result};
use crate::sstable::reader::{ColumnTableReader, MinMax};

pub struct FileIter {
    children: Vec<Arc<ColumnTableReader>>,
    cur: usize,
}

impl FileIter {
    /// `children` are the level's table readers, ordered by key range.
    pub fn new(children: Vec<Arc<ColumnTableReader>>) -> Self {
        Self { children, cur: 0 }
    }

    pub fn valid(&self) -> bool {
        self.cur < self.children.len()
    }

    pub fn seek_to_first(&mut self) {
        self.cur = 0;
    }

    /// Advances to the next file. Safe to call on an exhausted iterator;
    /// `valid()` simply stays false.
    pub fn next(&mut self) {
        self.cur = self.cur.saturating_add(1);
    }

    /// Per-block column bounds of the current file.
    pub fn get_min_max(
        &self,
        read_options: &ReadOptions,
        out: &mut Vec<Vec<MinMax>>,
    ) -> Result<()> {
        self.current()?.get_min_max(read_options, out)
    }

    /// Range query against the current file; `read_options.block_bits`
    /// selects the blocks to materialize.
    pub fn range_query(
        &self,
        read_options: &ReadOptions,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        out: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        self.current()?.range_query(read_options, begin, end, out)
    }

    fn current(&self) -> Result<&ColumnTableReader> {
        self.children
            .get(self.cur)
            .map(|reader| reader.as_ref())
            .ok_or_else(|| Error::NotFound("file iterator is exhausted".to_string()))
    }
}
