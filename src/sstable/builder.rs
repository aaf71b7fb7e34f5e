//! Column-table construction.
//!
//! One [`ColumnTableBuilder`] owns the main file plus one child builder per
//! value column. Records arrive through [`ColumnTableBuilder::add`] in
//! strictly increasing internal-key order; the builder assigns each record
//! the next row position, stores `key -> position` in the main file, splits
//! the value, and hands `position -> column bytes` to every child. Each
//! file seals data blocks on its own flush policy, so block boundaries
//! drift apart across files while row positions stay aligned.
//!
//! On `finish`, the children are finalized, synced, and closed first; the
//! main file then records their exact sizes in its column-meta block before
//! writing its own metaindex, index, and footer. The main file is flushed
//! but deliberately not synced or closed: the flush job that owns it
//! sequences `fsync` against the directory sync itself.
//!
//! A failed operation latches its error; every later mutating call returns
//! the latched status without touching the files.

use std::cmp::Ordering;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::comparator::{ColumnKeyComparator, Comparator, InternalKeyComparator};
use crate::config::TableOptions;
use crate::errinput;
use crate::error::{Error, Result};
use crate::filename::table_sub_file_name;
use crate::key::encode_row_position;
use crate::sstable::block::{BlockBuilder, ColumnBlockBuilder};
use crate::sstable::compression::{compress_block, CompressionType};
use crate::sstable::flush::FlushBlockPolicy;
use crate::sstable::format::{frame_block, BlockHandle, Footer, BLOCK_TRAILER_SIZE};
use crate::sstable::index::ShortenedIndexBuilder;
use crate::sstable::meta::{
    ColumnMeta, MetaIndexBuilder, TableProperties, COLUMN_META_BLOCK_NAME,
    COMPRESSION_DICT_BLOCK_NAME, PROPERTIES_BLOCK_NAME,
};

/// The data-block builder of one column file: full keys in the main file,
/// restart-only keys in subcolumns.
enum DataBlock {
    Main(BlockBuilder),
    Column(ColumnBlockBuilder),
}

impl DataBlock {
    fn add(&mut self, key: &[u8], value: &[u8]) {
        match self {
            DataBlock::Main(b) => b.add(key, value),
            DataBlock::Column(b) => b.add(key, value),
        }
    }

    fn finish(&mut self) -> &[u8] {
        match self {
            DataBlock::Main(b) => b.finish(),
            DataBlock::Column(b) => b.finish(),
        }
    }

    fn reset(&mut self) {
        match self {
            DataBlock::Main(b) => b.reset(),
            DataBlock::Column(b) => b.reset(),
        }
    }

    fn current_size_estimate(&self) -> usize {
        match self {
            DataBlock::Main(b) => b.current_size_estimate(),
            DataBlock::Column(b) => b.current_size_estimate(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            DataBlock::Main(b) => b.is_empty(),
            DataBlock::Column(b) => b.is_empty(),
        }
    }

    fn is_key_stored(&self) -> bool {
        match self {
            DataBlock::Main(b) => b.is_key_stored(),
            DataBlock::Column(b) => b.is_key_stored(),
        }
    }
}

/// Builds one column table: a main file and its subcolumn files.
pub struct ColumnTableBuilder {
    options: TableOptions,
    comparator: Arc<dyn Comparator>,
    main_column: bool,
    path: PathBuf,
    /// `None` once the file has been closed (subcolumns after finish).
    file: Option<File>,
    offset: u64,
    status: Result<()>,
    closed: bool,
    data_block: DataBlock,
    index_builder: ShortenedIndexBuilder,
    flush_policy: Box<dyn FlushBlockPolicy>,
    last_key: Vec<u8>,
    /// Handle of the most recently written data block, waiting for its
    /// index entry.
    pending_handle: BlockHandle,
    /// True while `pending_handle` still needs its index entry. The entry
    /// is deferred until the next key is known so the separator can be
    /// shortened against it.
    pending_index_entry: bool,
    props: TableProperties,
    /// Subcolumn builders, created lazily on the first add. Always empty
    /// for subcolumn builders themselves.
    builders: Vec<ColumnTableBuilder>,
}

impl ColumnTableBuilder {
    /// Creates a builder writing the main table file at `path`. Subcolumn
    /// files are derived from it and created on the first `add`.
    pub fn new(options: TableOptions, path: impl Into<PathBuf>) -> Result<Self> {
        Self::new_column(options, path.into(), true)
    }

    fn new_column(options: TableOptions, path: PathBuf, main_column: bool) -> Result<Self> {
        let file = File::create(&path)
            .map_err(|e| Error::IoError(format!("{}: {e}", path.display())))?;
        let comparator: Arc<dyn Comparator> = if main_column {
            Arc::new(InternalKeyComparator::new(options.comparator.clone()))
        } else {
            Arc::new(ColumnKeyComparator)
        };
        let data_block = if main_column {
            DataBlock::Main(BlockBuilder::new(options.block_restart_interval))
        } else {
            DataBlock::Column(ColumnBlockBuilder::new(options.block_restart_interval))
        };
        let props = TableProperties {
            column_count: if main_column { options.column_count } else { 0 },
            comparator_name: comparator.name().to_string(),
            compression_name: options.compression.name().to_string(),
            splitter_name: options.splitter.name().to_string(),
            ..TableProperties::default()
        };
        Ok(Self {
            comparator: comparator.clone(),
            index_builder: ShortenedIndexBuilder::new(
                comparator,
                options.index_block_restart_interval,
            ),
            flush_policy: options
                .flush_policy_factory
                .new_flush_block_policy(options.block_size),
            main_column,
            path,
            file: Some(file),
            offset: 0,
            status: Ok(()),
            closed: false,
            data_block,
            last_key: Vec::new(),
            pending_handle: BlockHandle::default(),
            pending_index_entry: false,
            props,
            builders: Vec::new(),
            options,
        })
    }

    /// Appends one record. `key` is an internal key; `value` is the
    /// stitched tuple the configured splitter distributes across columns.
    /// Keys must arrive in strictly increasing internal-key order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_open()?;
        let result = self.add_record(key, value);
        self.latch(result)
    }

    fn add_record(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.main_column && self.builders.is_empty() && self.options.column_count > 0 {
            self.create_subcolumn_builders()?;
        }
        let parts = self.options.splitter.split(value)?;
        if !parts.is_empty() && parts.len() != self.options.column_count as usize {
            return Err(errinput!(
                "value splits into {} parts but the table has {} columns",
                parts.len(),
                self.options.column_count
            ));
        }

        let pos = encode_row_position(self.props.num_entries);
        self.append_entry(key, &pos)?;

        for (i, sub) in self.builders.iter_mut().enumerate() {
            let part = parts.get(i).map(|p| p.as_slice()).unwrap_or(b"");
            let result = sub.append_entry(&pos, part);
            if let Err(e) = &result {
                sub.status = Err(e.clone());
            }
            result?;
        }
        Ok(())
    }

    /// The shared per-file append path: consult the flush policy, seal the
    /// block if asked, then buffer the entry.
    fn append_entry(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.props.num_entries > 0
            && self.comparator.compare(key, &self.last_key) != Ordering::Greater
        {
            return Err(errinput!(
                "keys must be added in strictly increasing order"
            ));
        }

        let should_flush = !self.data_block.is_empty()
            && self
                .flush_policy
                .update(key, value, self.data_block.current_size_estimate());
        if should_flush {
            self.write_data_block()?;
        }
        if self.pending_index_entry {
            // The incoming key is the separator hint: the index key only has
            // to sort below the *next* block's first key, which lets the
            // comparator shorten it.
            let mut last = std::mem::take(&mut self.last_key);
            self.index_builder
                .add_index_entry(&mut last, Some(key), &self.pending_handle);
            self.pending_index_entry = false;
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.data_block.add(key, value);
        self.props.num_entries += 1;
        if self.data_block.is_key_stored() {
            self.props.raw_key_size += key.len() as u64;
        }
        self.props.raw_value_size += value.len() as u64;
        Ok(())
    }

    fn create_subcolumn_builders(&mut self) -> Result<()> {
        debug_assert!(self.main_column);
        let mut builders = Vec::with_capacity(self.options.column_count as usize);
        for i in 0..self.options.column_count {
            let sub_path = table_sub_file_name(&self.path, i + 1);
            builders.push(Self::new_column(self.options.clone(), sub_path, false)?);
        }
        self.builders = builders;
        Ok(())
    }

    /// Seals the current data block.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        if self.data_block.is_empty() {
            return Ok(());
        }
        let result = self.write_data_block();
        self.latch(result)
    }

    fn write_data_block(&mut self) -> Result<()> {
        debug_assert!(!self.data_block.is_empty());
        let raw = self.data_block.finish().to_vec();
        self.data_block.reset();
        self.pending_handle = self.write_block(&raw)?;
        self.pending_index_entry = true;
        self.props.data_size = self.offset;
        self.props.num_data_blocks += 1;
        Ok(())
    }

    fn write_block(&mut self, raw: &[u8]) -> Result<BlockHandle> {
        let (contents, ctype) = compress_block(raw, self.options.compression);
        self.write_raw_block(&contents, ctype)
    }

    fn write_raw_block(&mut self, contents: &[u8], ctype: CompressionType) -> Result<BlockHandle> {
        let mut framed = Vec::with_capacity(contents.len() + BLOCK_TRAILER_SIZE);
        let handle = frame_block(&mut framed, self.offset, contents, ctype);
        self.append_to_file(&framed)?;
        Ok(handle)
    }

    fn append_to_file(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::IoError("table file already closed".to_string()))?;
        file.write_all(bytes)
            .map_err(|e| Error::IoError(format!("{}: {e}", self.path.display())))?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Finalizes the table. Subcolumn files are finished, synced, and
    /// closed; the main file gets its meta blocks, metaindex, index, and
    /// footer but is left open and unsynced for the caller to fsync in its
    /// own order.
    pub fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Err(errinput!("finish on closed table builder"));
        }
        let result = self.finish_impl();
        self.closed = true;
        self.latch(result)
    }

    fn finish_impl(&mut self) -> Result<()> {
        if self.main_column {
            for sub in &mut self.builders {
                sub.finish()?;
            }
            self.props.column_count = self.builders.len() as u32;
        }
        self.status.clone()?;

        if !self.data_block.is_empty() {
            self.write_data_block()?;
        }
        if self.pending_index_entry {
            let mut last = std::mem::take(&mut self.last_key);
            self.index_builder
                .add_index_entry(&mut last, None, &self.pending_handle);
            self.pending_index_entry = false;
        }
        self.props.index_size = (self.index_builder.estimated_size() + BLOCK_TRAILER_SIZE) as u64;

        let mut metaindex = MetaIndexBuilder::new();

        let column_meta = ColumnMeta {
            is_main: self.main_column,
            columns: self
                .builders
                .iter()
                .enumerate()
                .map(|(i, sub)| (i as u32 + 1, sub.offset))
                .collect(),
        };
        let handle = self.write_raw_block(&column_meta.encode(), CompressionType::None)?;
        metaindex.add(COLUMN_META_BLOCK_NAME, handle);

        let props_block = self.props.encode();
        let handle = self.write_raw_block(&props_block, CompressionType::None)?;
        metaindex.add(PROPERTIES_BLOCK_NAME, handle);

        if let Some(dict) = self.options.compression_dict.clone() {
            if !dict.is_empty() {
                let handle = self.write_raw_block(&dict, CompressionType::None)?;
                metaindex.add(COMPRESSION_DICT_BLOCK_NAME, handle);
            }
        }

        let metaindex_handle = self.write_raw_block(&metaindex.finish(), CompressionType::None)?;
        let index_contents = self.index_builder.finish().to_vec();
        let index_handle = self.write_block(&index_contents)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        self.append_to_file(&footer.encode())?;

        if self.main_column {
            for sub in &mut self.builders {
                if sub.status.is_ok() {
                    if let Some(file) = sub.file.take() {
                        let result = file
                            .sync_all()
                            .map_err(|e| Error::IoError(format!("{}: {e}", sub.path.display())));
                        if let Err(e) = &result {
                            sub.status = Err(e.clone());
                        }
                        result?;
                    }
                }
            }
            tracing::debug!(
                path = %self.path.display(),
                entries = self.props.num_entries,
                columns = self.props.column_count,
                total_bytes = self.offset
                    + self.builders.iter().map(|b| b.offset).sum::<u64>(),
                "finished column table"
            );
        }
        Ok(())
    }

    /// Marks every builder closed without producing valid files and drops
    /// pending buffers. Infallible; the half-written files are the version
    /// layer's to delete.
    pub fn abandon(&mut self) {
        for sub in &mut self.builders {
            sub.abandon();
        }
        self.data_block.reset();
        self.file = None;
        self.closed = true;
    }

    /// First non-OK status across the main builder and every subcolumn.
    pub fn status(&self) -> Result<()> {
        for sub in &self.builders {
            sub.status.clone()?;
        }
        self.status.clone()
    }

    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    /// Bytes written to the main file so far.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Bytes written across the main file and every subcolumn file.
    pub fn file_size_total(&self) -> u64 {
        self.offset + self.builders.iter().map(|sub| sub.offset).sum::<u64>()
    }

    /// Whether the written table already warrants compaction. Property
    /// collectors live outside this crate, so the answer here is static.
    pub fn need_compact(&self) -> bool {
        false
    }

    pub fn get_table_properties(&self) -> TableProperties {
        self.props.clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(errinput!("write to closed table builder"));
        }
        self.status.clone()
    }

    fn latch(&mut self, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            self.status = Err(e.clone());
        }
        result
    }
}
