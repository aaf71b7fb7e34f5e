//! Block compression.
//!
//! Every block body may be compressed before framing; the trailer's type
//! byte records which codec was used so readers stay self-describing. A
//! codec is only honored when it actually pays for itself: the compressed
//! form must save at least one eighth of the raw size, otherwise the block
//! is stored raw with a `None` type byte. Oversized blocks skip compression
//! entirely.

use crate::error::{Error, Result};
use crate::corruption;

/// Blocks at or above this size are always stored uncompressed.
pub const COMPRESSION_SIZE_LIMIT: usize = 128 * 1024;

/// Wire values of the block-trailer type byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionType {
    None = 0,
    Snappy = 1,
    Zlib = 2,
    BZip2 = 3,
    Lz4 = 4,
    Lz4hc = 5,
    Xpress = 6,
    ZstdNotFinal = 7,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Result<CompressionType> {
        match byte {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Snappy),
            2 => Ok(CompressionType::Zlib),
            3 => Ok(CompressionType::BZip2),
            4 => Ok(CompressionType::Lz4),
            5 => Ok(CompressionType::Lz4hc),
            6 => Ok(CompressionType::Xpress),
            7 => Ok(CompressionType::ZstdNotFinal),
            other => Err(corruption!("unknown compression type byte {other}")),
        }
    }

    /// Name recorded in the properties block.
    pub fn name(&self) -> &'static str {
        match self {
            CompressionType::None => "NoCompression",
            CompressionType::Snappy => "Snappy",
            CompressionType::Zlib => "Zlib",
            CompressionType::BZip2 => "BZip2",
            CompressionType::Lz4 => "LZ4",
            CompressionType::Lz4hc => "LZ4HC",
            CompressionType::Xpress => "Xpress",
            CompressionType::ZstdNotFinal => "ZSTDNotFinal",
        }
    }

    /// Whether this build can encode blocks with the codec. Every wire value
    /// decodes as a type byte, but only Snappy is linked in.
    pub fn supported(&self) -> bool {
        matches!(self, CompressionType::None | CompressionType::Snappy)
    }
}

/// Compressed output must be smaller than `raw - raw/8` (at least 12.5%
/// savings) to be worth the decompression on every read.
fn good_compression_ratio(compressed: usize, raw: usize) -> bool {
    compressed < raw - raw / 8
}

/// Compresses `raw` with the requested codec, falling back to storing it
/// uncompressed when the codec is unavailable, the block is oversized, or
/// the ratio is not worth it. Returns the bytes to frame and the type byte
/// that describes them.
pub fn compress_block(raw: &[u8], requested: CompressionType) -> (Vec<u8>, CompressionType) {
    if requested == CompressionType::None || raw.len() >= COMPRESSION_SIZE_LIMIT {
        return (raw.to_vec(), CompressionType::None);
    }
    match requested {
        CompressionType::Snappy => {
            let compressed = snap::raw::Encoder::new().compress_vec(raw);
            match compressed {
                Ok(compressed) if good_compression_ratio(compressed.len(), raw.len()) => {
                    (compressed, CompressionType::Snappy)
                }
                _ => (raw.to_vec(), CompressionType::None),
            }
        }
        // Codec not linked into this build.
        _ => (raw.to_vec(), CompressionType::None),
    }
}

/// Exact inverse of [`compress_block`] for the supported codecs.
pub fn decompress_block(contents: &[u8], ctype: CompressionType) -> Result<Vec<u8>> {
    match ctype {
        CompressionType::None => Ok(contents.to_vec()),
        CompressionType::Snappy => snap::raw::Decoder::new()
            .decompress_vec(contents)
            .map_err(|e| Error::Corruption(format!("snappy decompression failed: {e}"))),
        other => Err(corruption!(
            "block compressed with unsupported codec {}",
            other.name()
        )),
    }
}
