//! Two-level iteration: an index iterator whose values are block handles,
//! composed with a loader that turns a handle into a data-block iterator.
//! The composition yields the concatenation of all data blocks in index
//! order and transparently hops block boundaries in both `seek` and `next`.

use crate::error::Result;
use crate::sstable::block::BlockIterator;
use crate::sstable::InternalIterator;

/// Turns an encoded block handle (an index-block value) into an iterator
/// over that data block.
pub trait BlockLoader {
    type Iter: InternalIterator;

    fn new_data_iterator(&self, encoded_handle: &[u8]) -> Result<Self::Iter>;
}

pub struct TwoLevelIterator<L: BlockLoader> {
    loader: L,
    index_iter: BlockIterator,
    data_iter: Option<L::Iter>,
    /// Handle bytes backing `data_iter`, to skip pointless reloads when a
    /// seek lands in the block already open.
    data_handle: Vec<u8>,
    status: Result<()>,
}

impl<L: BlockLoader> TwoLevelIterator<L> {
    pub fn new(index_iter: BlockIterator, loader: L) -> Self {
        Self {
            loader,
            index_iter,
            data_iter: None,
            data_handle: Vec::new(),
            status: Ok(()),
        }
    }

    /// (Re)opens the data block the index iterator points at, or clears the
    /// data iterator when the index is exhausted.
    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            self.data_handle.clear();
            return;
        }
        let handle = self.index_iter.value();
        if self.data_iter.is_some() && self.data_handle == handle {
            return;
        }
        self.data_handle = handle.to_vec();
        match self.loader.new_data_iterator(handle) {
            Ok(iter) => self.data_iter = Some(iter),
            Err(e) => {
                self.status = Err(e);
                self.data_iter = None;
            }
        }
    }

    /// Steps over exhausted data blocks (an empty block cannot occur, but a
    /// seek near a block boundary lands past the block's last entry) until
    /// the data iterator is valid or the table ends.
    fn skip_empty_data_blocks_forward(&mut self) {
        while self.status.is_ok() {
            match &self.data_iter {
                Some(iter) if iter.valid() => return,
                Some(iter) => {
                    if let Err(e) = iter.status() {
                        self.status = Err(e);
                        return;
                    }
                }
                None => return,
            }
            if !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(iter) = &mut self.data_iter {
                iter.seek_to_first();
            }
        }
    }
}

impl<L: BlockLoader> InternalIterator for TwoLevelIterator<L> {
    fn valid(&self) -> bool {
        self.status.is_ok() && self.data_iter.as_ref().is_some_and(|iter| iter.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(iter) = &mut self.data_iter {
            iter.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek(&mut self, target: &[u8]) {
        // The index entry's separator key is >= every key in its block, so
        // the first index entry at or past the target names the only block
        // that can contain it.
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(iter) = &mut self.data_iter {
            iter.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(iter) = &mut self.data_iter {
            iter.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.data_iter.as_ref().unwrap().value()
    }

    fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.index_iter.status()?;
        match &self.data_iter {
            Some(iter) => iter.status(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::comparator::{BytewiseComparator, Comparator};
    use crate::sstable::block::{Block, BlockBuilder};
    use crate::sstable::format::BlockHandle;
    use crate::sstable::index::ShortenedIndexBuilder;

    /// Serves data blocks from memory, keyed by encoded handle.
    struct MemoryLoader {
        blocks: HashMap<Vec<u8>, Arc<Block>>,
        cmp: Arc<dyn Comparator>,
    }

    impl BlockLoader for MemoryLoader {
        type Iter = crate::sstable::block::BlockIterator;

        fn new_data_iterator(&self, encoded_handle: &[u8]) -> Result<Self::Iter> {
            let block = self
                .blocks
                .get(encoded_handle)
                .expect("handle must resolve");
            Ok(block.clone().iter(self.cmp.clone()))
        }
    }

    /// Builds a three-level fixture: `per_block` keys per data block.
    fn fixture(keys: &[&[u8]], per_block: usize) -> (TwoLevelIterator<MemoryLoader>, usize) {
        let cmp: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let mut blocks = HashMap::new();
        let mut index = ShortenedIndexBuilder::new(cmp.clone(), 1);
        let mut block_count = 0;

        for (i, chunk) in keys.chunks(per_block).enumerate() {
            let mut builder = BlockBuilder::new(4);
            for key in chunk {
                builder.add(key, format!("value_of_{}", String::from_utf8_lossy(key)).as_bytes());
            }
            let handle = BlockHandle::new(i as u64, 0);
            blocks.insert(
                handle.encode(),
                Arc::new(Block::new(builder.finish().to_vec()).unwrap()),
            );
            let mut last = chunk.last().unwrap().to_vec();
            let next_chunk_first = keys.get((i + 1) * per_block).map(|k| k.to_vec());
            index.add_index_entry(&mut last, next_chunk_first.as_deref(), &handle);
            block_count += 1;
        }

        let index_block = Arc::new(Block::new(index.finish().to_vec()).unwrap());
        let iter = TwoLevelIterator::new(
            index_block.iter(cmp.clone()),
            MemoryLoader { blocks, cmp },
        );
        (iter, block_count)
    }

    const KEYS: &[&[u8]] = &[
        b"aardvark", b"badger", b"coyote", b"dingo", b"elk", b"ferret", b"gopher", b"heron",
        b"ibis", b"jackal",
    ];

    #[test]
    fn test_full_scan_crosses_block_boundaries() {
        let (mut iter, block_count) = fixture(KEYS, 3);
        assert_eq!(block_count, 4);
        iter.seek_to_first();
        for key in KEYS {
            assert!(iter.valid());
            assert_eq!(iter.key(), *key);
            iter.next();
        }
        assert!(!iter.valid());
        iter.status().unwrap();
    }

    #[test]
    fn test_seek_positions_at_first_key_geq_target() {
        let (mut iter, _) = fixture(KEYS, 3);

        iter.seek(b"coyote");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"coyote");

        // Between two keys, across a block boundary.
        iter.seek(b"dinosaur");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"elk");

        iter.seek(b"a");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"aardvark");

        iter.seek(b"zzz");
        assert!(!iter.valid());
        iter.status().unwrap();
    }

    #[test]
    fn test_seek_then_scan_to_end() {
        let (mut iter, _) = fixture(KEYS, 4);
        iter.seek(b"ferret");
        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(seen, KEYS[5..].iter().map(|k| k.to_vec()).collect::<Vec<_>>());
    }
}
