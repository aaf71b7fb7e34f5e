//! Index block construction.
//!
//! One index entry is emitted per sealed data block, mapping a separator
//! key to the block's handle. Instead of honestly storing the block's last
//! key, the separator is the shortest key the comparator can produce that
//! still sits between adjacent blocks (`last <= separator < next_first`),
//! which keeps index blocks small. The inner block defaults to a restart
//! interval of 1 so index lookups are pure binary search with no linear
//! scan.

use std::sync::Arc;

use crate::comparator::Comparator;
use crate::sstable::block::BlockBuilder;
use crate::sstable::format::BlockHandle;

pub struct ShortenedIndexBuilder {
    comparator: Arc<dyn Comparator>,
    block: BlockBuilder,
}

impl ShortenedIndexBuilder {
    pub fn new(comparator: Arc<dyn Comparator>, restart_interval: usize) -> Self {
        Self {
            comparator,
            block: BlockBuilder::new(restart_interval),
        }
    }

    /// Adds the index entry for a sealed block. `last_key` is the block's
    /// last key and is shortened in place; `first_key_in_next_block` is
    /// `None` only for the final block of the table, where the shortest
    /// successor is used instead of a separator.
    pub fn add_index_entry(
        &mut self,
        last_key: &mut Vec<u8>,
        first_key_in_next_block: Option<&[u8]>,
        handle: &BlockHandle,
    ) {
        match first_key_in_next_block {
            Some(next) => self.comparator.find_shortest_separator(last_key, next),
            None => self.comparator.find_short_successor(last_key),
        }
        self.block.add(last_key, &handle.encode());
    }

    pub fn finish(&mut self) -> &[u8] {
        self.block.finish()
    }

    pub fn estimated_size(&self) -> usize {
        self.block.current_size_estimate()
    }
}
