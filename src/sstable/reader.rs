//! Column-table reading.
//!
//! A [`ColumnTableReader`] opens the main file, walks footer -> metaindex
//! -> column meta -> properties -> index, then opens every subcolumn file
//! recorded in the column-meta block, validating each against its recorded
//! size. Subcolumn readers are plain instances of the same type sorted by
//! row position instead of internal key.
//!
//! All read operations take `&self` and are safe under arbitrary
//! concurrency once `open` returns: file access is positional, the index
//! block is immutable, and the optional block cache does its own locking.
//! Two threads missing on the same block may both read it from disk; the
//! duplicate work is benign and cheaper than holding a lock across I/O.

use std::cmp::Ordering;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::CacheKey;
use crate::comparator::{ColumnKeyComparator, Comparator, InternalKeyComparator};
use crate::config::{ReadOptions, TableOptions};
use crate::corruption;
use crate::errinput;
use crate::error::{Error, Result};
use crate::filename::table_sub_file_name;
use crate::key::{
    decode_row_position, extract_user_key, lookup_key, parse_internal_key, ValueType,
    MAX_SEQUENCE_NUMBER,
};
use crate::splitter::Splitter;
use crate::sstable::block::{Block, BlockIterator, ColumnBlockIterator};
use crate::sstable::format::{read_block, BlockHandle, Footer};
use crate::sstable::meta::{
    find_meta_block, ColumnMeta, TableProperties, COLUMN_META_BLOCK_NAME,
    COMPRESSION_DICT_BLOCK_NAME, PROPERTIES_BLOCK_NAME,
};
use crate::sstable::two_level::{BlockLoader, TwoLevelIterator};
use crate::sstable::InternalIterator;

/// Per-block value bounds of one projected column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MinMax {
    pub min: Vec<u8>,
    pub max: Vec<u8>,
}

/// A reader over one immutable column table.
pub struct ColumnTableReader {
    options: TableOptions,
    comparator: Arc<dyn Comparator>,
    path: PathBuf,
    file: File,
    file_number: u64,
    /// 0 for the main file, the 1-based id for subcolumn files.
    column_id: u32,
    index_block: Arc<Block>,
    properties: TableProperties,
    column_meta: ColumnMeta,
    compression_dict: Option<Vec<u8>>,
    subcolumns: Vec<ColumnTableReader>,
}

impl std::fmt::Debug for ColumnTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnTableReader")
            .field("path", &self.path)
            .field("file_number", &self.file_number)
            .field("column_id", &self.column_id)
            .finish_non_exhaustive()
    }
}

impl ColumnTableReader {
    /// Opens the main table file at `path` and all of its subcolumn files.
    /// `file_number` keys block-cache entries for this table.
    pub fn open(
        options: TableOptions,
        path: impl Into<PathBuf>,
        file_size: u64,
        file_number: u64,
    ) -> Result<Self> {
        Self::open_column(options, path.into(), file_size, file_number, 0)
    }

    fn open_column(
        options: TableOptions,
        path: PathBuf,
        file_size: u64,
        file_number: u64,
        column_id: u32,
    ) -> Result<Self> {
        let file =
            File::open(&path).map_err(|e| Error::IoError(format!("{}: {e}", path.display())))?;
        let footer = Footer::read_from(&file, &path, file_size)?;

        let metaindex = Arc::new(Block::new(read_block(
            &file,
            &path,
            &footer.metaindex_handle,
            true,
        )?)?);

        let column_handle = find_meta_block(&metaindex, COLUMN_META_BLOCK_NAME)?
            .ok_or_else(|| corruption!("{}: missing column meta block", path.display()))?;
        let column_meta = ColumnMeta::decode(&read_block(&file, &path, &column_handle, true)?)?;
        if column_meta.is_main != (column_id == 0) {
            return Err(corruption!(
                "{}: column meta flag does not match the file's role",
                path.display()
            ));
        }

        let props_handle = find_meta_block(&metaindex, PROPERTIES_BLOCK_NAME)?
            .ok_or_else(|| corruption!("{}: missing properties block", path.display()))?;
        let properties = TableProperties::decode(read_block(&file, &path, &props_handle, true)?)?;

        let compression_dict = match find_meta_block(&metaindex, COMPRESSION_DICT_BLOCK_NAME)? {
            Some(handle) => Some(read_block(&file, &path, &handle, true)?),
            None => None,
        };

        let index_block = Arc::new(Block::new(read_block(
            &file,
            &path,
            &footer.index_handle,
            true,
        )?)?);

        let comparator: Arc<dyn Comparator> = if column_id == 0 {
            Arc::new(InternalKeyComparator::new(options.comparator.clone()))
        } else {
            Arc::new(ColumnKeyComparator)
        };

        let mut reader = Self {
            comparator,
            path,
            file,
            file_number,
            column_id,
            index_block,
            properties,
            column_meta,
            compression_dict,
            subcolumns: Vec::new(),
            options,
        };

        if column_id == 0 {
            for (id, recorded_size) in reader.column_meta.columns.clone() {
                let sub_path = table_sub_file_name(&reader.path, id);
                let actual_size = std::fs::metadata(&sub_path)
                    .map_err(|e| Error::IoError(format!("{}: {e}", sub_path.display())))?
                    .len();
                if actual_size != recorded_size {
                    return Err(corruption!(
                        "{}: size {actual_size} does not match recorded size {recorded_size}",
                        sub_path.display()
                    ));
                }
                reader.subcolumns.push(Self::open_column(
                    reader.options.clone(),
                    sub_path,
                    recorded_size,
                    file_number,
                    id,
                )?);
            }
            tracing::debug!(
                path = %reader.path.display(),
                entries = reader.properties.num_entries,
                columns = reader.subcolumns.len(),
                "opened column table"
            );
        }
        Ok(reader)
    }

    /// Looks up `internal_key` and returns the value stitched from the
    /// requested columns, `None` when the key is absent or deleted as of
    /// the key's sequence number. With no columns requested, presence is
    /// reported with an empty value.
    pub fn get(&self, read_options: &ReadOptions, internal_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut index_iter = self.index_block.clone().iter(self.comparator.clone());
        index_iter.seek(internal_key);
        index_iter.status()?;
        if !index_iter.valid() {
            return Ok(None);
        }
        let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
        let block = self.block(&handle, read_options)?;
        let mut iter = block.iter(self.comparator.clone());
        iter.seek(internal_key);
        iter.status()?;
        if !iter.valid() {
            return Ok(None);
        }

        let (user_key, _seq, vtype) = parse_internal_key(iter.key())?;
        if self
            .options
            .comparator
            .compare(user_key, extract_user_key(internal_key))
            != Ordering::Equal
        {
            return Ok(None);
        }
        match vtype {
            ValueType::Deletion | ValueType::SingleDeletion => Ok(None),
            ValueType::Merge => Err(Error::MergeInProgress(
                "merge operands require the merging iterator".to_string(),
            )),
            ValueType::Value => {
                let pos = iter.value().to_vec();
                self.stitch_columns(read_options, &pos).map(Some)
            }
        }
    }

    /// Returns a projecting iterator over the whole table in internal-key
    /// order. Every version of every key is surfaced, deletions included;
    /// MVCC resolution is the caller's.
    pub fn new_iterator(&self, read_options: &ReadOptions) -> Result<ColumnTableIterator<'_>> {
        let mut columns = Vec::with_capacity(read_options.columns.len());
        for &col in &read_options.columns {
            let sub = self.subcolumn(col)?;
            columns.push((
                col,
                TwoLevelIterator::new(
                    sub.index_block.clone().iter(sub.comparator.clone()),
                    ColumnBlockLoader {
                        reader: sub,
                        read_options: read_options.clone(),
                    },
                ),
            ));
        }
        Ok(ColumnTableIterator {
            splitter: self.options.splitter.clone(),
            main: TwoLevelIterator::new(
                self.index_block.clone().iter(self.comparator.clone()),
                DataBlockLoader {
                    reader: self,
                    read_options: read_options.clone(),
                },
            ),
            columns,
            value: Vec::new(),
            status: Ok(()),
        })
    }

    /// Streams the newest visible version of every live user key in
    /// `[begin, end)` into `out` as `(user_key, stitched_value)` pairs.
    /// `read_options.block_bits` selects which main data blocks are
    /// materialized; `read_options.snapshot` bounds visibility.
    pub fn range_query(
        &self,
        read_options: &ReadOptions,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        out: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        let snapshot = read_options.snapshot.unwrap_or(MAX_SEQUENCE_NUMBER);
        let begin_key = begin.map(|user| lookup_key(user, snapshot));

        let mut index_iter = self.index_block.clone().iter(self.comparator.clone());
        index_iter.seek_to_first();
        let mut block_ordinal = 0usize;
        let mut last_emitted_user: Option<Vec<u8>> = None;

        while index_iter.valid() {
            // A block whose separator sorts below the range start holds
            // only keys below it.
            let before_begin = begin_key
                .as_deref()
                .is_some_and(|bk| self.comparator.compare(index_iter.key(), bk) == Ordering::Less);
            let selected = read_options.block_bits.is_empty()
                || *read_options.block_bits.get(block_ordinal).unwrap_or(&false);

            if selected && !before_begin {
                let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
                let block = self.block(&handle, read_options)?;
                let mut iter = block.iter(self.comparator.clone());
                match &begin_key {
                    Some(bk) => iter.seek(bk),
                    None => iter.seek_to_first(),
                }
                while iter.valid() {
                    let (user_key, seq, vtype) = parse_internal_key(iter.key())?;
                    if let Some(end) = end {
                        if self.options.comparator.compare(user_key, end) != Ordering::Less {
                            iter.status()?;
                            return Ok(());
                        }
                    }
                    if seq > snapshot {
                        iter.next();
                        continue;
                    }
                    if last_emitted_user.as_deref() == Some(user_key) {
                        // An older version of a user key we already resolved.
                        iter.next();
                        continue;
                    }
                    last_emitted_user = Some(user_key.to_vec());
                    match vtype {
                        ValueType::Deletion | ValueType::SingleDeletion => {}
                        ValueType::Merge => {
                            return Err(Error::MergeInProgress(
                                "merge operands require the merging iterator".to_string(),
                            ))
                        }
                        ValueType::Value => {
                            let user_key = user_key.to_vec();
                            let pos = iter.value().to_vec();
                            let stitched = self.stitch_columns(read_options, &pos)?;
                            out.push((user_key, stitched));
                        }
                    }
                    iter.next();
                }
                iter.status()?;
            }
            index_iter.next();
            block_ordinal += 1;
        }
        index_iter.status()?;
        Ok(())
    }

    /// Computes the per-block minimum and maximum value of every projected
    /// column by scanning the subcolumn blocks. `out` gets one inner vector
    /// per requested column, in request order.
    pub fn get_min_max(
        &self,
        read_options: &ReadOptions,
        out: &mut Vec<Vec<MinMax>>,
    ) -> Result<()> {
        for &col in &read_options.columns {
            let sub = self.subcolumn(col)?;
            let mut per_block = Vec::new();
            let mut index_iter = sub.index_block.clone().iter(sub.comparator.clone());
            index_iter.seek_to_first();
            while index_iter.valid() {
                let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
                let block = sub.block(&handle, read_options)?;
                let mut iter = block.column_iter();
                iter.seek_to_first();
                let mut bounds: Option<MinMax> = None;
                while iter.valid() {
                    let value = iter.value();
                    match &mut bounds {
                        None => {
                            bounds = Some(MinMax {
                                min: value.to_vec(),
                                max: value.to_vec(),
                            })
                        }
                        Some(bounds) => {
                            if value < bounds.min.as_slice() {
                                bounds.min = value.to_vec();
                            }
                            if value > bounds.max.as_slice() {
                                bounds.max = value.to_vec();
                            }
                        }
                    }
                    iter.next();
                }
                iter.status()?;
                if let Some(bounds) = bounds {
                    per_block.push(bounds);
                }
                index_iter.next();
            }
            index_iter.status()?;
            out.push(per_block);
        }
        Ok(())
    }

    pub fn properties(&self) -> &TableProperties {
        &self.properties
    }

    /// Number of value columns this table carries.
    pub fn column_count(&self) -> u32 {
        self.subcolumns.len() as u32
    }

    pub fn compression_dict(&self) -> Option<&[u8]> {
        self.compression_dict.as_deref()
    }

    fn subcolumn(&self, col: u32) -> Result<&ColumnTableReader> {
        if col == 0 {
            return Err(errinput!("column ids are 1-based"));
        }
        self.subcolumns.get(col as usize - 1).ok_or_else(|| {
            errinput!(
                "column {col} out of range, table has {} columns",
                self.subcolumns.len()
            )
        })
    }

    /// Reads the column value at `pos` from this subcolumn file. A missing
    /// position is corruption: the main file said it exists.
    fn column_value_at(&self, read_options: &ReadOptions, pos: &[u8]) -> Result<Vec<u8>> {
        debug_assert!(self.column_id != 0);
        let mut index_iter = self.index_block.clone().iter(self.comparator.clone());
        index_iter.seek(pos);
        index_iter.status()?;
        if !index_iter.valid() {
            return Err(self.missing_position(pos));
        }
        let (handle, _) = BlockHandle::decode_from(index_iter.value())?;
        let block = self.block(&handle, read_options)?;
        let mut iter = block.column_iter();
        iter.seek(pos);
        iter.status()?;
        if !iter.valid() || iter.key() != pos {
            return Err(self.missing_position(pos));
        }
        Ok(iter.value().to_vec())
    }

    fn missing_position(&self, pos: &[u8]) -> Error {
        let position = decode_row_position(pos).unwrap_or(u64::MAX);
        corruption!(
            "{}: row position {position} missing from subcolumn",
            self.path.display()
        )
    }

    fn stitch_columns(&self, read_options: &ReadOptions, pos: &[u8]) -> Result<Vec<u8>> {
        let mut parts = Vec::with_capacity(read_options.columns.len());
        for &col in &read_options.columns {
            let sub = self.subcolumn(col)?;
            parts.push(sub.column_value_at(read_options, pos)?);
        }
        Ok(self.options.splitter.stitch(&parts))
    }

    /// Fetches a data block, consulting the shared cache first. On a miss
    /// the block is read positionally, verified, decompressed, and
    /// inserted for the next reader.
    fn block(&self, handle: &BlockHandle, read_options: &ReadOptions) -> Result<Arc<Block>> {
        let key = CacheKey {
            file_number: self.file_number,
            column: self.column_id,
            offset: handle.offset,
        };
        if let Some(cache) = &self.options.block_cache {
            if let Some(block) = cache.get(&key) {
                return Ok(block);
            }
        }
        let contents = read_block(&self.file, &self.path, handle, read_options.verify_checksums)?;
        let block = Arc::new(Block::new(contents)?);
        if read_options.fill_cache {
            if let Some(cache) = &self.options.block_cache {
                cache.insert(key, Arc::clone(&block));
            }
        }
        Ok(block)
    }
}

/// Loads main-file data blocks for the two-level iterator.
pub struct DataBlockLoader<'r> {
    reader: &'r ColumnTableReader,
    read_options: ReadOptions,
}

impl BlockLoader for DataBlockLoader<'_> {
    type Iter = BlockIterator;

    fn new_data_iterator(&self, encoded_handle: &[u8]) -> Result<BlockIterator> {
        let (handle, _) = BlockHandle::decode_from(encoded_handle)?;
        let block = self.reader.block(&handle, &self.read_options)?;
        Ok(block.iter(self.reader.comparator.clone()))
    }
}

/// Loads subcolumn data blocks for the two-level iterator.
pub struct ColumnBlockLoader<'r> {
    reader: &'r ColumnTableReader,
    read_options: ReadOptions,
}

impl BlockLoader for ColumnBlockLoader<'_> {
    type Iter = ColumnBlockIterator;

    fn new_data_iterator(&self, encoded_handle: &[u8]) -> Result<ColumnBlockIterator> {
        let (handle, _) = BlockHandle::decode_from(encoded_handle)?;
        let block = self.reader.block(&handle, &self.read_options)?;
        Ok(block.column_iter())
    }
}

/// Iterates the main file while stitching the projected columns of each
/// row. Keys are internal keys; values are the stitched projections.
pub struct ColumnTableIterator<'r> {
    splitter: Arc<dyn Splitter>,
    main: TwoLevelIterator<DataBlockLoader<'r>>,
    columns: Vec<(u32, TwoLevelIterator<ColumnBlockLoader<'r>>)>,
    value: Vec<u8>,
    status: Result<()>,
}

impl ColumnTableIterator<'_> {
    /// Re-stitches the projected value for the row the main iterator is
    /// positioned on. Row positions ascend with internal keys, so the
    /// per-column seeks only ever move forward.
    fn materialize(&mut self) {
        self.value.clear();
        if !self.main.valid() {
            return;
        }
        let pos = self.main.value().to_vec();
        let mut parts = Vec::with_capacity(self.columns.len());
        for (col, iter) in &mut self.columns {
            iter.seek(&pos);
            if let Err(e) = iter.status() {
                self.status = Err(e);
                return;
            }
            if !iter.valid() || iter.key() != pos {
                self.status = Err(corruption!(
                    "row position missing from subcolumn {col}"
                ));
                return;
            }
            parts.push(iter.value().to_vec());
        }
        self.value = self.splitter.stitch(&parts);
    }
}

impl InternalIterator for ColumnTableIterator<'_> {
    fn valid(&self) -> bool {
        self.status.is_ok() && self.main.valid()
    }

    fn seek_to_first(&mut self) {
        self.main.seek_to_first();
        self.materialize();
    }

    fn seek(&mut self, target: &[u8]) {
        self.main.seek(target);
        self.materialize();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.main.next();
        self.materialize();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.main.key()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.value
    }

    fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.main.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BlockCache;
    use crate::key::internal_key;
    use crate::sstable::builder::ColumnTableBuilder;
    use crate::sstable::compression::CompressionType;
    use crate::tmpfs::TempDir;
    use std::path::Path;

    fn ikey(user: &str, seq: u64) -> Vec<u8> {
        internal_key(user.as_bytes(), seq, ValueType::Value)
    }

    fn dkey(user: &str, seq: u64) -> Vec<u8> {
        internal_key(user.as_bytes(), seq, ValueType::Deletion)
    }

    /// Builds a table from pre-sorted `(internal_key, value)` rows and
    /// opens a reader over it.
    fn build_and_open(
        dir: &TempDir,
        options: TableOptions,
        rows: &[(Vec<u8>, Vec<u8>)],
    ) -> ColumnTableReader {
        let path = dir.table_path(1);
        build(&path, options.clone(), rows);
        open(&path, options)
    }

    fn build(path: &Path, options: TableOptions, rows: &[(Vec<u8>, Vec<u8>)]) {
        let mut builder = ColumnTableBuilder::new(options, path).unwrap();
        for (key, value) in rows {
            builder.add(key, value).unwrap();
        }
        builder.finish().unwrap();
    }

    fn open(path: &Path, options: TableOptions) -> ColumnTableReader {
        let size = std::fs::metadata(path).unwrap().len();
        ColumnTableReader::open(options, path, size, 1).unwrap()
    }

    fn get(reader: &ColumnTableReader, columns: Vec<u32>, user: &str) -> Option<Vec<u8>> {
        let ro = ReadOptions::new().columns(columns);
        reader
            .get(&ro, &lookup_key(user.as_bytes(), MAX_SEQUENCE_NUMBER))
            .unwrap()
    }

    #[test]
    fn test_get_projects_single_column() {
        let dir = TempDir::new().unwrap();
        let reader = build_and_open(
            &dir,
            TableOptions::new().column_count(2),
            &[(ikey("key1", 1), b"val11|val12".to_vec())],
        );
        assert_eq!(reader.column_count(), 2);
        assert_eq!(get(&reader, vec![1], "key1").unwrap(), b"val11");
        assert_eq!(get(&reader, vec![2], "key1").unwrap(), b"val12");
        assert_eq!(get(&reader, vec![1, 2], "key1").unwrap(), b"val11|val12");
        // No columns projected: presence only.
        assert_eq!(get(&reader, vec![], "key1").unwrap(), b"");
        assert_eq!(get(&reader, vec![1], "missing"), None);
    }

    #[test]
    fn test_deletion_shadows_older_put() {
        let dir = TempDir::new().unwrap();
        // Internal-key order: key1 versions newest first, then key2.
        let rows = vec![
            (dkey("key1", 2), b"".to_vec()),
            (ikey("key1", 1), b"val11|val12".to_vec()),
            (ikey("key2", 3), b"val21|val22".to_vec()),
        ];
        let reader = build_and_open(&dir, TableOptions::new().column_count(2), &rows);
        assert_eq!(get(&reader, vec![1], "key1"), None);
        assert_eq!(get(&reader, vec![1], "key2").unwrap(), b"val21");
    }

    #[test]
    fn test_snapshot_sees_older_version() {
        let dir = TempDir::new().unwrap();
        let rows = vec![
            (dkey("key1", 5), b"".to_vec()),
            (ikey("key1", 2), b"old|x".to_vec()),
        ];
        let reader = build_and_open(&dir, TableOptions::new().column_count(2), &rows);
        // As of seq 4 the deletion at 5 is invisible.
        let ro = ReadOptions::new().columns(vec![1]);
        let value = reader.get(&ro, &lookup_key(b"key1", 4)).unwrap();
        assert_eq!(value.unwrap(), b"old");
        // The newest view sees the deletion.
        assert_eq!(get(&reader, vec![1], "key1"), None);
    }

    #[test]
    fn test_three_column_projection_stitches_in_request_order() {
        let dir = TempDir::new().unwrap();
        let reader = build_and_open(
            &dir,
            TableOptions::new().column_count(3),
            &[(ikey("key1", 1), b"a|b|c".to_vec())],
        );
        assert_eq!(get(&reader, vec![2, 3], "key1").unwrap(), b"b|c");
        assert_eq!(get(&reader, vec![3, 1], "key1").unwrap(), b"c|a");
    }

    #[test]
    fn test_unknown_column_is_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let reader = build_and_open(
            &dir,
            TableOptions::new().column_count(2),
            &[(ikey("key1", 1), b"a|b".to_vec())],
        );
        let ro = ReadOptions::new().columns(vec![7]);
        let err = reader
            .get(&ro, &lookup_key(b"key1", MAX_SEQUENCE_NUMBER))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    fn sequential_rows(count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..count)
            .map(|i| {
                (
                    ikey(&format!("{i:06}"), i as u64 + 1),
                    format!("left_{i:06}|right_{i:06}").into_bytes(),
                )
            })
            .collect()
    }

    #[test]
    fn test_full_scan_is_ordered_and_complete() {
        let dir = TempDir::new().unwrap();
        let rows = sequential_rows(10_000);
        let options = TableOptions::new().column_count(2).block_size(1024);
        let reader = build_and_open(&dir, options, &rows);
        assert!(reader.properties().num_data_blocks > 10);
        assert_eq!(reader.properties().num_entries, 10_000);

        let ro = ReadOptions::new().columns(vec![1, 2]);
        let mut iter = reader.new_iterator(&ro).unwrap();
        iter.seek_to_first();
        for (key, value) in &rows {
            assert!(iter.valid());
            assert_eq!(iter.key(), key);
            assert_eq!(iter.value(), value);
            iter.next();
        }
        assert!(!iter.valid());
        iter.status().unwrap();
    }

    #[test]
    fn test_iterator_seek_lands_on_first_key_geq() {
        let dir = TempDir::new().unwrap();
        let rows = sequential_rows(1000);
        let options = TableOptions::new().column_count(2).block_size(512);
        let reader = build_and_open(&dir, options, &rows);
        let ro = ReadOptions::new().columns(vec![1]);
        let mut iter = reader.new_iterator(&ro).unwrap();

        iter.seek(&lookup_key(b"000500", MAX_SEQUENCE_NUMBER));
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"000500");
        assert_eq!(iter.value(), b"left_000500");

        // Between user keys.
        iter.seek(&lookup_key(b"000500x", MAX_SEQUENCE_NUMBER));
        assert!(iter.valid());
        assert_eq!(extract_user_key(iter.key()), b"000501");

        iter.seek(&lookup_key(b"zzzzzz", MAX_SEQUENCE_NUMBER));
        assert!(!iter.valid());
        iter.status().unwrap();
    }

    #[test]
    fn test_scan_is_independent_of_block_boundaries() {
        let collect = |block_size: usize| -> Vec<(Vec<u8>, Vec<u8>)> {
            let dir = TempDir::new().unwrap();
            let rows = sequential_rows(500);
            let options = TableOptions::new().column_count(2).block_size(block_size);
            let reader = build_and_open(&dir, options, &rows);
            let ro = ReadOptions::new().columns(vec![1, 2]);
            let mut iter = reader.new_iterator(&ro).unwrap();
            iter.seek_to_first();
            let mut seen = Vec::new();
            while iter.valid() {
                seen.push((iter.key().to_vec(), iter.value().to_vec()));
                iter.next();
            }
            iter.status().unwrap();
            seen
        };
        let tiny_blocks = collect(256);
        let big_blocks = collect(64 * 1024);
        assert_eq!(tiny_blocks.len(), 500);
        assert_eq!(tiny_blocks, big_blocks);
    }

    #[test]
    fn test_every_row_position_aligns_across_columns() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<(Vec<u8>, Vec<u8>)> = (0..300)
            .map(|i| {
                (
                    ikey(&format!("key{i:04}"), i as u64 + 1),
                    format!("a{i}|b{i}|c{i}").into_bytes(),
                )
            })
            .collect();
        let options = TableOptions::new().column_count(3).block_size(256);
        let reader = build_and_open(&dir, options, &rows);
        for i in 0..300 {
            let user = format!("key{i:04}");
            assert_eq!(
                get(&reader, vec![1, 2, 3], &user).unwrap(),
                format!("a{i}|b{i}|c{i}").as_bytes()
            );
        }
    }

    #[test]
    fn test_range_query_streams_interval() {
        let dir = TempDir::new().unwrap();
        let rows = sequential_rows(100);
        let options = TableOptions::new().column_count(2).block_size(512);
        let reader = build_and_open(&dir, options, &rows);

        let ro = ReadOptions::new().columns(vec![1]);
        let mut out = Vec::new();
        reader
            .range_query(&ro, Some(b"000010"), Some(b"000020"), &mut out)
            .unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out[0].0, b"000010");
        assert_eq!(out[0].1, b"left_000010");
        assert_eq!(out[9].0, b"000019");

        // Unbounded scan sees everything.
        let mut all = Vec::new();
        reader.range_query(&ro, None, None, &mut all).unwrap();
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn test_range_query_hides_deleted_and_old_versions() {
        let dir = TempDir::new().unwrap();
        let rows = vec![
            (dkey("a", 10), b"".to_vec()),
            (ikey("a", 5), b"olda|x".to_vec()),
            (ikey("b", 7), b"newb|x".to_vec()),
            (ikey("b", 3), b"oldb|x".to_vec()),
            (ikey("c", 1), b"valc|x".to_vec()),
        ];
        let reader = build_and_open(&dir, TableOptions::new().column_count(2), &rows);
        let ro = ReadOptions::new().columns(vec![1]);
        let mut out = Vec::new();
        reader.range_query(&ro, None, None, &mut out).unwrap();
        assert_eq!(
            out,
            vec![
                (b"b".to_vec(), b"newb".to_vec()),
                (b"c".to_vec(), b"valc".to_vec()),
            ]
        );

        // As of seq 4, "a" is still alive and "b" shows its old version.
        let ro = ReadOptions::new().columns(vec![1]).snapshot(4);
        let mut out = Vec::new();
        reader.range_query(&ro, None, None, &mut out).unwrap();
        assert_eq!(
            out,
            vec![
                (b"a".to_vec(), b"olda".to_vec()),
                (b"b".to_vec(), b"oldb".to_vec()),
                (b"c".to_vec(), b"valc".to_vec()),
            ]
        );
    }

    #[test]
    fn test_range_query_block_bits_skip_blocks() {
        let dir = TempDir::new().unwrap();
        let rows = sequential_rows(200);
        let options = TableOptions::new().column_count(2).block_size(512);
        let reader = build_and_open(&dir, options, &rows);
        let blocks = reader.properties().num_data_blocks as usize;
        assert!(blocks >= 4);

        // Materialize only the first and third blocks.
        let mut bits = vec![false; blocks];
        bits[0] = true;
        bits[2] = true;
        let ro = ReadOptions::new().columns(vec![1]).block_bits(bits);
        let mut partial = Vec::new();
        reader.range_query(&ro, None, None, &mut partial).unwrap();

        let ro_all = ReadOptions::new().columns(vec![1]);
        let mut all = Vec::new();
        reader.range_query(&ro_all, None, None, &mut all).unwrap();
        assert_eq!(all.len(), 200);
        assert!(!partial.is_empty());
        assert!(partial.len() < all.len());
        // Whatever was materialized matches the full scan.
        for pair in &partial {
            assert!(all.contains(pair));
        }
    }

    #[test]
    fn test_get_min_max_per_block_bounds() {
        let dir = TempDir::new().unwrap();
        let rows = sequential_rows(200);
        let options = TableOptions::new().column_count(2).block_size(512);
        let reader = build_and_open(&dir, options, &rows);

        let ro = ReadOptions::new().columns(vec![1, 2]);
        let mut out = Vec::new();
        reader.get_min_max(&ro, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        for per_block in &out {
            assert!(!per_block.is_empty());
            for bounds in per_block {
                assert!(bounds.min <= bounds.max);
            }
        }
        // Values ascend with keys here, so the global bounds are exact.
        assert_eq!(out[0].first().unwrap().min, b"left_000000");
        assert_eq!(out[0].last().unwrap().max, b"left_000199");
        assert_eq!(out[1].first().unwrap().min, b"right_000000");
        assert_eq!(out[1].last().unwrap().max, b"right_000199");
    }

    #[test]
    fn test_truncated_file_fails_open_with_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.table_path(1);
        let options = TableOptions::new().column_count(2);
        build(&path, options.clone(), &sequential_rows(100));

        let size = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap();
        file.set_len(size - 1).unwrap();

        let err = ColumnTableReader::open(options, &path, size - 1, 1).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_subcolumn_size_mismatch_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.table_path(1);
        let options = TableOptions::new().column_count(2);
        build(&path, options.clone(), &sequential_rows(100));

        let sub_path = dir.sub_table_path(1, 1);
        let sub_size = std::fs::metadata(&sub_path).unwrap().len();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&sub_path)
            .unwrap();
        file.set_len(sub_size - 1).unwrap();

        let size = std::fs::metadata(&path).unwrap().len();
        let err = ColumnTableReader::open(options, &path, size, 1).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_snappy_table_roundtrip() {
        let dir = TempDir::new().unwrap();
        let compressible = "x".repeat(512);
        let rows: Vec<(Vec<u8>, Vec<u8>)> = (0..200)
            .map(|i| {
                (
                    ikey(&format!("key{i:04}"), i as u64 + 1),
                    format!("{compressible}|{compressible}").into_bytes(),
                )
            })
            .collect();
        let options = TableOptions::new()
            .column_count(2)
            .compression(CompressionType::Snappy);
        let path = dir.table_path(1);
        build(&path, options.clone(), &rows);

        // The repeated runs must actually compress on disk.
        let raw_column_bytes: u64 = rows.iter().map(|_| compressible.len() as u64).sum();
        let sub_size = std::fs::metadata(dir.sub_table_path(1, 1)).unwrap().len();
        assert!(sub_size < raw_column_bytes / 4);

        let reader = open(&path, options);
        assert_eq!(reader.properties().compression_name, "Snappy");
        assert_eq!(
            get(&reader, vec![1], "key0042").unwrap(),
            compressible.as_bytes()
        );
    }

    #[test]
    fn test_block_cache_serves_repeat_reads() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BlockCache::new(64));
        let options = TableOptions::new()
            .column_count(2)
            .block_cache(Arc::clone(&cache));
        let reader = build_and_open(&dir, options, &sequential_rows(100));

        for _ in 0..3 {
            assert_eq!(get(&reader, vec![1], "000050").unwrap(), b"left_000050");
        }
        let (hits, misses) = cache.stats();
        assert!(misses > 0);
        assert!(hits > misses);
    }

    #[test]
    fn test_open_validates_role_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.table_path(1);
        let options = TableOptions::new().column_count(2);
        build(&path, options.clone(), &sequential_rows(10));

        // A subcolumn file opened as a main table reports corruption.
        let sub_path = dir.sub_table_path(1, 1);
        let sub_size = std::fs::metadata(&sub_path).unwrap().len();
        let err = ColumnTableReader::open(options, &sub_path, sub_size, 1).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[tokio::test]
    async fn test_concurrent_gets_and_scans() {
        let dir = TempDir::new().unwrap();
        let rows = sequential_rows(1000);
        let options = TableOptions::new()
            .column_count(2)
            .block_size(1024)
            .block_cache(Arc::new(BlockCache::new(256)));
        let reader = Arc::new(build_and_open(&dir, options, &rows));

        let mut tasks = Vec::new();
        for task_id in 0..16usize {
            let reader = Arc::clone(&reader);
            tasks.push(tokio::spawn(async move {
                if task_id % 2 == 0 {
                    // Point reads.
                    for i in (task_id..1000).step_by(16) {
                        let user = format!("{i:06}");
                        let ro = ReadOptions::new().columns(vec![1, 2]);
                        let value = reader
                            .get(&ro, &lookup_key(user.as_bytes(), MAX_SEQUENCE_NUMBER))
                            .expect("get failed")
                            .expect("key missing");
                        assert_eq!(value, format!("left_{i:06}|right_{i:06}").into_bytes());
                        if i % 100 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                    0usize
                } else {
                    // Range scans over a moving window.
                    let begin = format!("{:06}", task_id * 50);
                    let end = format!("{:06}", task_id * 50 + 100);
                    let ro = ReadOptions::new().columns(vec![1]);
                    let mut out = Vec::new();
                    reader
                        .range_query(&ro, Some(begin.as_bytes()), Some(end.as_bytes()), &mut out)
                        .expect("range query failed");
                    assert_eq!(out.len(), 100);
                    out.len()
                }
            }));
        }
        for task in tasks {
            task.await.expect("task panicked");
        }
    }
}
