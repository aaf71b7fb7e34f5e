//! Prefix-compressed blocks and their iterators.
//!
//! A block is a sorted run of entries followed by a restart array:
//!
//! ```text
//! entry:   varint32 shared_len | varint32 non_shared_len | varint32 value_len
//!          | key[shared_len..] | value
//! trailer: fixed32 restart_offset * n | fixed32 n
//! ```
//!
//! Keys share prefixes with their predecessor except at restart points,
//! where `shared_len` is forced to zero; the restart array makes those
//! points binary-searchable. The column variant goes one step further: its
//! keys are contiguous 8-byte row positions, so between restarts the key
//! bytes are omitted entirely (`shared_len = 8, non_shared_len = 0`) and
//! the reader recomputes each position from the restart base.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use integer_encoding::VarInt;

use crate::comparator::Comparator;
use crate::corruption;
use crate::error::Result;
use crate::key::{decode_row_position, encode_row_position, ROW_POSITION_SIZE};
use crate::sstable::InternalIterator;

fn put_varint32(dst: &mut Vec<u8>, v: u32) {
    let mut buf = [0u8; 5];
    let n = v.encode_var(&mut buf);
    dst.extend_from_slice(&buf[..n]);
}

/// Builds a prefix-compressed block from a sorted entry stream.
///
/// Ordering is the caller's contract; the table builder rejects out-of-order
/// keys before they reach a block.
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    counter: usize,
    last_key: Vec<u8>,
    finished: bool,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1);
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            restart_interval,
            counter: 0,
            last_key: Vec::new(),
            finished: false,
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        if self.counter >= self.restart_interval {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            self.last_key.clear();
        }
        let shared = shared_prefix_length(&self.last_key, key);
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Appends the restart trailer and exposes the finished block. The
    /// buffer stays intact until [`BlockBuilder::reset`].
    pub fn finish(&mut self) -> &[u8] {
        debug_assert!(!self.finished);
        for restart in &self.restarts {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, *restart);
            self.buffer.extend_from_slice(&buf);
        }
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, self.restarts.len() as u32);
        self.buffer.extend_from_slice(&buf);
        self.finished = true;
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.last_key.clear();
        self.finished = false;
    }

    /// Size of the block if it were finished now.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether the most recent entry carried its key bytes. Always true
    /// here; the column variant omits keys between restarts.
    pub fn is_key_stored(&self) -> bool {
        true
    }
}

/// Block builder for subcolumn data: keys are contiguous 8-byte row
/// positions, stored only at restart points.
pub struct ColumnBlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    counter: usize,
    key_stored: bool,
    finished: bool,
}

impl ColumnBlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1);
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            restart_interval,
            counter: 0,
            key_stored: false,
            finished: false,
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert_eq!(key.len(), ROW_POSITION_SIZE);
        if self.counter >= self.restart_interval {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let restart = self.counter == 0;
        if restart {
            put_varint32(&mut self.buffer, 0);
            put_varint32(&mut self.buffer, ROW_POSITION_SIZE as u32);
            put_varint32(&mut self.buffer, value.len() as u32);
            self.buffer.extend_from_slice(key);
        } else {
            // The position is implied by its distance from the restart base.
            put_varint32(&mut self.buffer, ROW_POSITION_SIZE as u32);
            put_varint32(&mut self.buffer, 0);
            put_varint32(&mut self.buffer, value.len() as u32);
        }
        self.buffer.extend_from_slice(value);

        self.key_stored = restart;
        self.counter += 1;
    }

    pub fn finish(&mut self) -> &[u8] {
        debug_assert!(!self.finished);
        for restart in &self.restarts {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, *restart);
            self.buffer.extend_from_slice(&buf);
        }
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, self.restarts.len() as u32);
        self.buffer.extend_from_slice(&buf);
        self.finished = true;
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.key_stored = false;
        self.finished = false;
    }

    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether the most recent entry carried its key bytes (true only at
    /// restart points). Drives the raw-key-size accounting.
    pub fn is_key_stored(&self) -> bool {
        self.key_stored
    }
}

fn shared_prefix_length(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A decoded, immutable block. Shared between iterators and the block
/// cache via `Arc`.
pub struct Block {
    contents: Vec<u8>,
    restart_offset: usize,
    restarts: Vec<u32>,
}

impl Block {
    pub fn new(contents: Vec<u8>) -> Result<Block> {
        if contents.len() < 4 {
            return Err(corruption!("block too short: {} bytes", contents.len()));
        }
        let num_restarts = LittleEndian::read_u32(&contents[contents.len() - 4..]) as usize;
        let trailer_len = num_restarts
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .ok_or_else(|| corruption!("bad restart count {num_restarts}"))?;
        if trailer_len > contents.len() {
            return Err(corruption!(
                "block too short for {num_restarts} restart points"
            ));
        }
        let restart_offset = contents.len() - trailer_len;
        let mut restarts = Vec::with_capacity(num_restarts);
        for i in 0..num_restarts {
            let at = restart_offset + i * 4;
            let restart = LittleEndian::read_u32(&contents[at..at + 4]);
            if restart as usize > restart_offset {
                return Err(corruption!("restart point {restart} past block data"));
            }
            restarts.push(restart);
        }
        Ok(Block {
            contents,
            restart_offset,
            restarts,
        })
    }

    fn data(&self) -> &[u8] {
        &self.contents[..self.restart_offset]
    }

    pub fn iter(self: Arc<Self>, cmp: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator::new(self, cmp)
    }

    pub fn column_iter(self: Arc<Self>) -> ColumnBlockIterator {
        ColumnBlockIterator::new(self)
    }
}

struct EntryHeader {
    shared: usize,
    non_shared: usize,
    value_len: usize,
    /// Offset of the key bytes, right after the three varints.
    key_offset: usize,
}

fn decode_entry_header(data: &[u8], offset: usize) -> Result<EntryHeader> {
    let mut at = offset;
    let (shared, n) = u32::decode_var(&data[at..])
        .ok_or_else(|| corruption!("bad entry header at offset {offset}"))?;
    at += n;
    let (non_shared, n) = u32::decode_var(&data[at..])
        .ok_or_else(|| corruption!("bad entry header at offset {offset}"))?;
    at += n;
    let (value_len, n) = u32::decode_var(&data[at..])
        .ok_or_else(|| corruption!("bad entry header at offset {offset}"))?;
    at += n;
    let header = EntryHeader {
        shared: shared as usize,
        non_shared: non_shared as usize,
        value_len: value_len as usize,
        key_offset: at,
    };
    if header.key_offset + header.non_shared + header.value_len > data.len() {
        return Err(corruption!("entry at offset {offset} overruns block"));
    }
    Ok(header)
}

/// Reads the full key stored at a restart point.
fn restart_key(data: &[u8], offset: usize) -> Result<&[u8]> {
    let header = decode_entry_header(data, offset)?;
    if header.shared != 0 {
        return Err(corruption!(
            "restart point at offset {offset} has shared prefix"
        ));
    }
    Ok(&data[header.key_offset..header.key_offset + header.non_shared])
}

/// Iterates a block of full `(key, value)` entries in comparator order.
pub struct BlockIterator {
    block: Arc<Block>,
    cmp: Arc<dyn Comparator>,
    /// Offset of the current entry; `data().len()` when exhausted.
    current: usize,
    next_offset: usize,
    key: Vec<u8>,
    value_start: usize,
    value_len: usize,
    status: Result<()>,
}

impl BlockIterator {
    fn new(block: Arc<Block>, cmp: Arc<dyn Comparator>) -> Self {
        let end = block.data().len();
        Self {
            block,
            cmp,
            current: end,
            next_offset: end,
            key: Vec::new(),
            value_start: 0,
            value_len: 0,
            status: Ok(()),
        }
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.next_offset = self.block.restarts[index] as usize;
        self.current = self.next_offset;
        self.value_start = 0;
        self.value_len = 0;
    }

    fn mark_exhausted(&mut self) {
        let end = self.block.data().len();
        self.current = end;
        self.next_offset = end;
    }

    /// Decodes the entry at `next_offset` into the iterator state. Returns
    /// false at the end of the block or on corruption.
    fn parse_next_entry(&mut self) -> bool {
        let data_len = self.block.data().len();
        if self.next_offset >= data_len {
            self.mark_exhausted();
            return false;
        }
        let header = match decode_entry_header(self.block.data(), self.next_offset) {
            Ok(header) => header,
            Err(e) => {
                self.status = Err(e);
                self.mark_exhausted();
                return false;
            }
        };
        if header.shared > self.key.len() {
            self.status = Err(corruption!(
                "entry at offset {} shares {} bytes but predecessor key has {}",
                self.next_offset,
                header.shared,
                self.key.len()
            ));
            self.mark_exhausted();
            return false;
        }
        self.current = self.next_offset;
        self.key.truncate(header.shared);
        let key_end = header.key_offset + header.non_shared;
        self.key
            .extend_from_slice(&self.block.data()[header.key_offset..key_end]);
        self.value_start = key_end;
        self.value_len = header.value_len;
        self.next_offset = key_end + header.value_len;
        true
    }
}

impl InternalIterator for BlockIterator {
    fn valid(&self) -> bool {
        self.status.is_ok() && self.current < self.block.data().len()
    }

    fn seek_to_first(&mut self) {
        if self.block.restarts.is_empty() {
            self.mark_exhausted();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.restarts.is_empty() {
            self.mark_exhausted();
            return;
        }
        // Binary search for the last restart point whose key is < target.
        let mut left = 0usize;
        let mut right = self.block.restarts.len() - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let key = match restart_key(self.block.data(), self.block.restarts[mid] as usize) {
                Ok(key) => key,
                Err(e) => {
                    self.status = Err(e);
                    self.mark_exhausted();
                    return;
                }
            };
            if self.cmp.compare(key, target) == std::cmp::Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }
        self.seek_to_restart_point(left);
        while self.parse_next_entry() {
            if self.cmp.compare(&self.key, target) != std::cmp::Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_entry();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data()[self.value_start..self.value_start + self.value_len]
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

/// Iterates a subcolumn block, reconstructing the omitted row positions
/// from the restart base.
pub struct ColumnBlockIterator {
    block: Arc<Block>,
    current: usize,
    next_offset: usize,
    position: u64,
    key: [u8; ROW_POSITION_SIZE],
    has_entry: bool,
    value_start: usize,
    value_len: usize,
    status: Result<()>,
}

impl ColumnBlockIterator {
    fn new(block: Arc<Block>) -> Self {
        let end = block.data().len();
        Self {
            block,
            current: end,
            next_offset: end,
            position: 0,
            key: [0u8; ROW_POSITION_SIZE],
            has_entry: false,
            value_start: 0,
            value_len: 0,
            status: Ok(()),
        }
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.next_offset = self.block.restarts[index] as usize;
        self.current = self.next_offset;
        self.has_entry = false;
    }

    fn mark_exhausted(&mut self) {
        let end = self.block.data().len();
        self.current = end;
        self.next_offset = end;
    }

    fn parse_next_entry(&mut self) -> bool {
        let data_len = self.block.data().len();
        if self.next_offset >= data_len {
            self.mark_exhausted();
            return false;
        }
        let header = match decode_entry_header(self.block.data(), self.next_offset) {
            Ok(header) => header,
            Err(e) => {
                self.status = Err(e);
                self.mark_exhausted();
                return false;
            }
        };
        let position = if header.shared == 0 && header.non_shared == ROW_POSITION_SIZE {
            // Restart entry: the position is stored.
            let key_end = header.key_offset + ROW_POSITION_SIZE;
            match decode_row_position(&self.block.data()[header.key_offset..key_end]) {
                Ok(position) => position,
                Err(e) => {
                    self.status = Err(e);
                    self.mark_exhausted();
                    return false;
                }
            }
        } else if header.shared == ROW_POSITION_SIZE && header.non_shared == 0 && self.has_entry {
            self.position + 1
        } else {
            self.status = Err(corruption!(
                "bad column entry framing at offset {}",
                self.next_offset
            ));
            self.mark_exhausted();
            return false;
        };

        self.current = self.next_offset;
        self.position = position;
        self.key = encode_row_position(position);
        self.has_entry = true;
        self.value_start = header.key_offset + header.non_shared;
        self.value_len = header.value_len;
        self.next_offset = self.value_start + header.value_len;
        true
    }

    /// Numeric row position of the current entry.
    pub fn position(&self) -> u64 {
        debug_assert!(self.valid());
        self.position
    }
}

impl InternalIterator for ColumnBlockIterator {
    fn valid(&self) -> bool {
        self.status.is_ok() && self.current < self.block.data().len()
    }

    fn seek_to_first(&mut self) {
        if self.block.restarts.is_empty() {
            self.mark_exhausted();
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_entry();
    }

    fn seek(&mut self, target: &[u8]) {
        if self.block.restarts.is_empty() {
            self.mark_exhausted();
            return;
        }
        let mut left = 0usize;
        let mut right = self.block.restarts.len() - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let key = match restart_key(self.block.data(), self.block.restarts[mid] as usize) {
                Ok(key) => key,
                Err(e) => {
                    self.status = Err(e);
                    self.mark_exhausted();
                    return;
                }
            };
            if key < target {
                left = mid;
            } else {
                right = mid - 1;
            }
        }
        self.seek_to_restart_point(left);
        while self.parse_next_entry() {
            if self.key.as_slice() >= target {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_entry();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.block.data()[self.value_start..self.value_start + self.value_len]
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}
