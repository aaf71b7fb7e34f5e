//! On-disk framing: block handles, block trailers, and the table footer.
//!
//! Every block is followed by a five-byte trailer:
//!
//! ```text
//! +-------------------+------------+----------------------+
//! | block body        | type: u8   | masked crc32c: u32 LE|
//! +-------------------+------------+----------------------+
//! ```
//!
//! The checksum covers the body plus the type byte and is stored masked so
//! that files containing CRCs of other data never look self-consistent by
//! accident. The footer is a fixed 53-byte tail locating the metaindex and
//! index blocks and ending in the column-table magic number.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISCSI};
use integer_encoding::VarInt;

use crate::corruption;
use crate::error::Result;
use crate::sstable::compression::{decompress_block, CompressionType};

/// CRC32C (Castagnoli), the checksum of every block trailer.
const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282_ead8;

/// 1-byte compression type + 4-byte masked checksum.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Identifies a column-table file; fixed64 little-endian at the very end.
pub const COLUMN_TABLE_MAGIC_NUMBER: u64 = 0x88e2_41b7_85f4_cfff;

/// Fixed footer length: two zero-padded varint handles, five reserved
/// bytes, and the magic number.
pub const FOOTER_ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 5 + 8;

/// Masks a CRC so stored checksums are not themselves valid CRC inputs.
pub fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

/// Checksum of a block body and its type byte, unmasked.
pub fn block_crc(body: &[u8], type_byte: u8) -> u32 {
    let mut digest = CRC32C.digest();
    digest.update(body);
    digest.update(&[type_byte]);
    digest.finalize()
}

/// Locates a block within a file. `size` excludes the trailer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    /// Two varint64s of up to ten bytes each.
    pub const MAX_ENCODED_LENGTH: usize = 20;

    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let mut buf = [0u8; 10];
        let n = self.offset.encode_var(&mut buf);
        dst.extend_from_slice(&buf[..n]);
        let n = self.size.encode_var(&mut buf);
        dst.extend_from_slice(&buf[..n]);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MAX_ENCODED_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    /// Decodes a handle from the front of `src`, returning it and the number
    /// of bytes consumed.
    pub fn decode_from(src: &[u8]) -> Result<(BlockHandle, usize)> {
        let (offset, n1) =
            u64::decode_var(src).ok_or_else(|| corruption!("bad block handle offset"))?;
        let (size, n2) = u64::decode_var(&src[n1..])
            .ok_or_else(|| corruption!("bad block handle size"))?;
        Ok((BlockHandle { offset, size }, n1 + n2))
    }
}

/// The fixed-size tail of every table file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(FOOTER_ENCODED_LENGTH);
        self.metaindex_handle.encode_to(&mut dst);
        self.index_handle.encode_to(&mut dst);
        // Zero-pad the handle area and the reserved bytes.
        dst.resize(FOOTER_ENCODED_LENGTH - 8, 0);
        let mut magic = [0u8; 8];
        LittleEndian::write_u64(&mut magic, COLUMN_TABLE_MAGIC_NUMBER);
        dst.extend_from_slice(&magic);
        debug_assert_eq!(dst.len(), FOOTER_ENCODED_LENGTH);
        dst
    }

    pub fn decode(buf: &[u8]) -> Result<Footer> {
        if buf.len() != FOOTER_ENCODED_LENGTH {
            return Err(corruption!(
                "footer must be {FOOTER_ENCODED_LENGTH} bytes, got {}",
                buf.len()
            ));
        }
        let magic = LittleEndian::read_u64(&buf[FOOTER_ENCODED_LENGTH - 8..]);
        if magic != COLUMN_TABLE_MAGIC_NUMBER {
            return Err(corruption!(
                "bad table magic number 0x{magic:016x}"
            ));
        }
        let (metaindex_handle, n) = BlockHandle::decode_from(buf)?;
        let (index_handle, _) = BlockHandle::decode_from(&buf[n..])?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }

    /// Reads and decodes the footer from the tail of `file`.
    pub fn read_from(file: &File, path: &Path, file_size: u64) -> Result<Footer> {
        if (file_size as usize) < FOOTER_ENCODED_LENGTH {
            return Err(corruption!(
                "{}: file too short ({file_size} bytes) to be a column table",
                path.display()
            ));
        }
        let mut buf = [0u8; FOOTER_ENCODED_LENGTH];
        let offset = file_size - FOOTER_ENCODED_LENGTH as u64;
        file.read_exact_at(&mut buf, offset).map_err(|e| {
            corruption!("{}: short footer read at {offset}: {e}", path.display())
        })?;
        Footer::decode(&buf).map_err(|e| match e {
            crate::error::Error::Corruption(msg) => corruption!("{}: {msg}", path.display()),
            other => other,
        })
    }
}

/// Appends `body`, its type byte, and the masked checksum to `dst`,
/// returning the handle of the written block.
pub fn frame_block(dst: &mut Vec<u8>, offset: u64, body: &[u8], ctype: CompressionType) -> BlockHandle {
    let handle = BlockHandle::new(offset, body.len() as u64);
    dst.extend_from_slice(body);
    dst.push(ctype as u8);
    let mut crc = [0u8; 4];
    LittleEndian::write_u32(&mut crc, mask_crc(block_crc(body, ctype as u8)));
    dst.extend_from_slice(&crc);
    handle
}

/// Reads a block body at `handle`, verifies its trailer, and returns the
/// decompressed contents.
pub fn read_block(
    file: &File,
    path: &Path,
    handle: &BlockHandle,
    verify_checksum: bool,
) -> Result<Vec<u8>> {
    let framed_len = handle.size as usize + BLOCK_TRAILER_SIZE;
    let mut buf = vec![0u8; framed_len];
    file.read_exact_at(&mut buf, handle.offset).map_err(|e| {
        corruption!(
            "{}: truncated block read at offset {}: {e}",
            path.display(),
            handle.offset
        )
    })?;

    let (body, trailer) = buf.split_at(handle.size as usize);
    let type_byte = trailer[0];
    if verify_checksum {
        let stored = unmask_crc(LittleEndian::read_u32(&trailer[1..]));
        let actual = block_crc(body, type_byte);
        if stored != actual {
            tracing::warn!(
                path = %path.display(),
                offset = handle.offset,
                "block checksum mismatch"
            );
            return Err(corruption!(
                "{}: block checksum mismatch at offset {}",
                path.display(),
                handle.offset
            ));
        }
    }

    let ctype = CompressionType::from_u8(type_byte).map_err(|_| {
        corruption!(
            "{}: unknown compression type {type_byte} at offset {}",
            path.display(),
            handle.offset
        )
    })?;
    decompress_block(body, ctype)
}
