//! Table configuration.

use std::sync::Arc;

use crate::cache::BlockCache;
use crate::comparator::{BytewiseComparator, Comparator};
use crate::splitter::{PipeSplitter, Splitter};
use crate::sstable::compression::CompressionType;
use crate::sstable::flush::{FlushBlockBySizePolicyFactory, FlushBlockPolicyFactory};

/// Configuration for building and reading column tables.
#[derive(Clone)]
pub struct TableOptions {
    /// Number of value columns each record splits into (default: 1).
    pub column_count: u32,

    /// Target uncompressed size of a data block (default: 4KB).
    pub block_size: usize,

    /// Entries between restart points in data blocks (default: 16).
    pub block_restart_interval: usize,

    /// Entries between restart points in the index block (default: 1, so
    /// index lookups binary-search without a linear scan).
    pub index_block_restart_interval: usize,

    /// Codec requested for data and index blocks (default: none). Blocks
    /// that do not compress well are stored raw regardless.
    pub compression: CompressionType,

    /// Preset dictionary persisted alongside the table for codecs that can
    /// use one (default: none).
    pub compression_dict: Option<Vec<u8>>,

    /// Order of user keys (default: bytewise).
    pub comparator: Arc<dyn Comparator>,

    /// Bijection between record values and column tuples (default: pipe).
    pub splitter: Arc<dyn Splitter>,

    /// Per-file data-block sealing policy (default: by size).
    pub flush_policy_factory: Arc<dyn FlushBlockPolicyFactory>,

    /// Shared cache of decompressed blocks (default: none).
    pub block_cache: Option<Arc<BlockCache>>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            column_count: 1,
            block_size: 4 * 1024,
            block_restart_interval: 16,
            index_block_restart_interval: 1,
            compression: CompressionType::None,
            compression_dict: None,
            comparator: Arc::new(BytewiseComparator),
            splitter: Arc::new(PipeSplitter),
            flush_policy_factory: Arc::new(FlushBlockBySizePolicyFactory),
            block_cache: None,
        }
    }
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of value columns.
    pub fn column_count(mut self, count: u32) -> Self {
        self.column_count = count;
        self
    }

    /// Set the target data-block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the data-block restart interval.
    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.block_restart_interval = interval;
        self
    }

    /// Set the index-block restart interval.
    pub fn index_block_restart_interval(mut self, interval: usize) -> Self {
        self.index_block_restart_interval = interval;
        self
    }

    /// Set the requested block codec.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Set the user-key comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Set the value splitter.
    pub fn splitter(mut self, splitter: Arc<dyn Splitter>) -> Self {
        self.splitter = splitter;
        self
    }

    /// Set the shared block cache.
    pub fn block_cache(mut self, cache: Arc<BlockCache>) -> Self {
        self.block_cache = Some(cache);
        self
    }
}

/// Per-read settings.
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// 1-based ids of the subcolumns to materialize. Empty means main-file
    /// only: reads report key presence with an empty value.
    pub columns: Vec<u32>,

    /// For range queries: selects which main data blocks to materialize,
    /// indexed by block ordinal. Empty selects every block.
    pub block_bits: Vec<bool>,

    /// Upper bound on visible sequence numbers. `None` reads the newest
    /// version of everything.
    pub snapshot: Option<u64>,

    /// Verify block trailer checksums on every read (default: true).
    pub verify_checksums: bool,

    /// Insert blocks loaded on a miss into the block cache (default: true).
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            block_bits: Vec::new(),
            snapshot: None,
            verify_checksums: true,
            fill_cache: true,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the subcolumns to materialize (1-based).
    pub fn columns(mut self, columns: Vec<u32>) -> Self {
        self.columns = columns;
        self
    }

    /// Select the data blocks a range query materializes.
    pub fn block_bits(mut self, bits: Vec<bool>) -> Self {
        self.block_bits = bits;
        self
    }

    /// Bound visibility at the given sequence number.
    pub fn snapshot(mut self, seq: u64) -> Self {
        self.snapshot = Some(seq);
        self
    }
}
