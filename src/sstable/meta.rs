//! Meta blocks: table properties, the column-meta block, and the metaindex.
//!
//! Meta blocks reuse the ordinary block framing (so they get trailer
//! checksums for free) and are located through the metaindex block, a
//! restart-interval-1 block mapping well-known names to handles. The names
//! and interior property keys are wire-format constants of the column-table
//! format, like the footer magic.

use std::sync::Arc;

use integer_encoding::VarInt;

use crate::comparator::{BytewiseComparator, Comparator};
use crate::corruption;
use crate::error::Result;
use crate::sstable::block::{Block, BlockBuilder};
use crate::sstable::format::BlockHandle;
use crate::sstable::InternalIterator;

/// Metaindex name of the column-meta block.
pub const COLUMN_META_BLOCK_NAME: &str = "vidardb.column";
/// Metaindex name of the properties block.
pub const PROPERTIES_BLOCK_NAME: &str = "vidardb.properties";
/// Metaindex name of the optional compression dictionary block.
pub const COMPRESSION_DICT_BLOCK_NAME: &str = "vidardb.compression_dict";

mod property_keys {
    pub const COLUMN_COUNT: &[u8] = b"vidardb.column.count";
    pub const COMPARATOR: &[u8] = b"vidardb.comparator";
    pub const COMPRESSION: &[u8] = b"vidardb.compression";
    pub const DATA_SIZE: &[u8] = b"vidardb.data.size";
    pub const INDEX_SIZE: &[u8] = b"vidardb.index.size";
    pub const NUM_DATA_BLOCKS: &[u8] = b"vidardb.num.data.blocks";
    pub const NUM_ENTRIES: &[u8] = b"vidardb.num.entries";
    pub const RAW_KEY_SIZE: &[u8] = b"vidardb.raw.key.size";
    pub const RAW_VALUE_SIZE: &[u8] = b"vidardb.raw.value.size";
    pub const SPLITTER: &[u8] = b"vidardb.splitter";
}

/// Statistics describing one column file, persisted in its properties
/// block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableProperties {
    pub num_entries: u64,
    pub num_data_blocks: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    /// Bytes of data blocks, trailers included.
    pub data_size: u64,
    /// Estimated size of the index block, trailer included.
    pub index_size: u64,
    pub column_count: u32,
    pub comparator_name: String,
    pub compression_name: String,
    pub splitter_name: String,
}

impl TableProperties {
    /// Encodes the properties as a sorted key-value block.
    pub fn encode(&self) -> Vec<u8> {
        fn varint(v: u64) -> Vec<u8> {
            let mut buf = [0u8; 10];
            let n = v.encode_var(&mut buf);
            buf[..n].to_vec()
        }
        // Entries must stay sorted; the keys below are listed in bytewise
        // order.
        let entries: Vec<(&[u8], Vec<u8>)> = vec![
            (property_keys::COLUMN_COUNT, varint(self.column_count as u64)),
            (property_keys::COMPARATOR, self.comparator_name.clone().into_bytes()),
            (property_keys::COMPRESSION, self.compression_name.clone().into_bytes()),
            (property_keys::DATA_SIZE, varint(self.data_size)),
            (property_keys::INDEX_SIZE, varint(self.index_size)),
            (property_keys::NUM_DATA_BLOCKS, varint(self.num_data_blocks)),
            (property_keys::NUM_ENTRIES, varint(self.num_entries)),
            (property_keys::RAW_KEY_SIZE, varint(self.raw_key_size)),
            (property_keys::RAW_VALUE_SIZE, varint(self.raw_value_size)),
            (property_keys::SPLITTER, self.splitter_name.clone().into_bytes()),
        ];
        debug_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        let mut block = BlockBuilder::new(1);
        for (key, value) in &entries {
            block.add(key, value);
        }
        block.finish().to_vec()
    }

    pub fn decode(contents: Vec<u8>) -> Result<TableProperties> {
        fn varint(value: &[u8]) -> Result<u64> {
            u64::decode_var(value)
                .map(|(v, _)| v)
                .ok_or_else(|| corruption!("bad varint in properties block"))
        }
        let block = Arc::new(Block::new(contents)?);
        let cmp: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
        let mut iter = block.iter(cmp);
        let mut props = TableProperties::default();
        iter.seek_to_first();
        while iter.valid() {
            let value = iter.value();
            match iter.key() {
                property_keys::COLUMN_COUNT => props.column_count = varint(value)? as u32,
                property_keys::COMPARATOR => {
                    props.comparator_name = String::from_utf8_lossy(value).into_owned()
                }
                property_keys::COMPRESSION => {
                    props.compression_name = String::from_utf8_lossy(value).into_owned()
                }
                property_keys::DATA_SIZE => props.data_size = varint(value)?,
                property_keys::INDEX_SIZE => props.index_size = varint(value)?,
                property_keys::NUM_DATA_BLOCKS => props.num_data_blocks = varint(value)?,
                property_keys::NUM_ENTRIES => props.num_entries = varint(value)?,
                property_keys::RAW_KEY_SIZE => props.raw_key_size = varint(value)?,
                property_keys::RAW_VALUE_SIZE => props.raw_value_size = varint(value)?,
                property_keys::SPLITTER => {
                    props.splitter_name = String::from_utf8_lossy(value).into_owned()
                }
                // Properties written by newer versions are skipped.
                _ => {}
            }
            iter.next();
        }
        iter.status()?;
        Ok(props)
    }
}

/// Body of the column-meta block: whether this file is the main column,
/// and the exact size of every subcolumn file at finish time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnMeta {
    pub is_main: bool,
    /// `(column id, file size)` pairs, ids counted from 1. Empty for
    /// subcolumn files.
    pub columns: Vec<(u32, u64)>,
}

impl ColumnMeta {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.is_main as u8];
        let mut buf = [0u8; 10];
        let n = (self.columns.len() as u32).encode_var(&mut buf);
        out.extend_from_slice(&buf[..n]);
        for (id, size) in &self.columns {
            let n = id.encode_var(&mut buf);
            out.extend_from_slice(&buf[..n]);
            let n = size.encode_var(&mut buf);
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    pub fn decode(contents: &[u8]) -> Result<ColumnMeta> {
        if contents.is_empty() {
            return Err(corruption!("empty column meta block"));
        }
        let is_main = match contents[0] {
            0 => false,
            1 => true,
            other => return Err(corruption!("bad column meta flag {other}")),
        };
        let mut at = 1;
        let (count, n) = u32::decode_var(&contents[at..])
            .ok_or_else(|| corruption!("bad column count in column meta block"))?;
        at += n;
        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (id, n) = u32::decode_var(&contents[at..])
                .ok_or_else(|| corruption!("bad column id in column meta block"))?;
            at += n;
            let (size, n) = u64::decode_var(&contents[at..])
                .ok_or_else(|| corruption!("bad column file size in column meta block"))?;
            at += n;
            columns.push((id, size));
        }
        Ok(ColumnMeta { is_main, columns })
    }
}

/// Accumulates `name -> handle` mappings and emits the metaindex block.
pub struct MetaIndexBuilder {
    entries: Vec<(String, BlockHandle)>,
}

impl MetaIndexBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn add(&mut self, name: &str, handle: BlockHandle) {
        self.entries.push((name.to_string(), handle));
    }

    pub fn finish(&mut self) -> Vec<u8> {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut block = BlockBuilder::new(1);
        for (name, handle) in &self.entries {
            block.add(name.as_bytes(), &handle.encode());
        }
        block.finish().to_vec()
    }
}

impl Default for MetaIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Looks up a meta block handle by name in a decoded metaindex block.
pub fn find_meta_block(metaindex: &Arc<Block>, name: &str) -> Result<Option<BlockHandle>> {
    let cmp: Arc<dyn Comparator> = Arc::new(BytewiseComparator);
    let mut iter = Arc::clone(metaindex).iter(cmp);
    iter.seek(name.as_bytes());
    if iter.valid() && iter.key() == name.as_bytes() {
        let (handle, _) = BlockHandle::decode_from(iter.value())?;
        return Ok(Some(handle));
    }
    iter.status()?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_roundtrip() {
        let props = TableProperties {
            num_entries: 10_000,
            num_data_blocks: 57,
            raw_key_size: 140_000,
            raw_value_size: 80_000,
            data_size: 230_000,
            index_size: 1_200,
            column_count: 3,
            comparator_name: "leveldb.BytewiseComparator".into(),
            compression_name: "Snappy".into(),
            splitter_name: "vidardb.PipeSplitter".into(),
        };
        let decoded = TableProperties::decode(props.encode()).unwrap();
        assert_eq!(decoded, props);
    }

    #[test]
    fn test_column_meta_roundtrip() {
        let meta = ColumnMeta {
            is_main: true,
            columns: vec![(1, 4096), (2, 81920), (3, 1 << 40)],
        };
        assert_eq!(ColumnMeta::decode(&meta.encode()).unwrap(), meta);

        let sub = ColumnMeta {
            is_main: false,
            columns: Vec::new(),
        };
        assert_eq!(ColumnMeta::decode(&sub.encode()).unwrap(), sub);
    }

    #[test]
    fn test_column_meta_rejects_garbage() {
        assert!(ColumnMeta::decode(&[]).is_err());
        assert!(ColumnMeta::decode(&[7]).is_err());
        // Claims one column but carries no entry bytes.
        assert!(ColumnMeta::decode(&[1, 1]).is_err());
    }

    #[test]
    fn test_metaindex_lookup() {
        let mut builder = MetaIndexBuilder::new();
        // Added out of order; the block must come out sorted.
        builder.add(PROPERTIES_BLOCK_NAME, BlockHandle::new(300, 30));
        builder.add(COLUMN_META_BLOCK_NAME, BlockHandle::new(100, 10));
        builder.add(COMPRESSION_DICT_BLOCK_NAME, BlockHandle::new(200, 20));
        let block = Arc::new(Block::new(builder.finish()).unwrap());

        assert_eq!(
            find_meta_block(&block, COLUMN_META_BLOCK_NAME).unwrap(),
            Some(BlockHandle::new(100, 10))
        );
        assert_eq!(
            find_meta_block(&block, PROPERTIES_BLOCK_NAME).unwrap(),
            Some(BlockHandle::new(300, 30))
        );
        assert_eq!(find_meta_block(&block, "vidardb.missing").unwrap(), None);
    }
}
