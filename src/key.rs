//! Internal key and row-position codecs.
//!
//! An internal key is the user key followed by a packed 8-byte trailer
//! holding a 56-bit sequence number and an 8-bit value type:
//!
//! ```text
//! +----------------------+--------------------------------+
//! | user key (n bytes)   | (seq << 8) | type  (fixed64 LE)|
//! +----------------------+--------------------------------+
//! ```
//!
//! A row position is a monotonically increasing u64 written big-endian so
//! that lexicographic byte order matches numeric order; it keys every
//! subcolumn entry and is the value of every main-file entry.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::Result;
use crate::corruption;

/// Sequence numbers occupy 56 bits of the packed trailer.
pub const MAX_SEQUENCE_NUMBER: u64 = (1 << 56) - 1;

/// Length of the packed `(sequence, type)` trailer.
pub const INTERNAL_KEY_TRAILER_SIZE: usize = 8;

/// Length of an encoded row position.
pub const ROW_POSITION_SIZE: usize = 8;

/// The kind of a logical record, stored in the low byte of the internal key
/// trailer. Discriminants are wire-stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Deletion = 0x0,
    Value = 0x1,
    Merge = 0x2,
    SingleDeletion = 0x7,
}

/// The type used when building seek keys: the largest discriminant, so a
/// seek key sorts before every real entry with the same user key and
/// sequence number (types compare descending).
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::SingleDeletion;

impl ValueType {
    pub fn from_u8(byte: u8) -> Result<ValueType> {
        match byte {
            0x0 => Ok(ValueType::Deletion),
            0x1 => Ok(ValueType::Value),
            0x2 => Ok(ValueType::Merge),
            0x7 => Ok(ValueType::SingleDeletion),
            other => Err(corruption!("unknown value type 0x{other:x}")),
        }
    }
}

/// Packs a sequence number and a value type into the trailer word.
pub fn pack_sequence_and_type(seq: u64, vtype: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | vtype as u64
}

/// Appends `user_key` plus the packed trailer to `dst`.
pub fn append_internal_key(dst: &mut Vec<u8>, user_key: &[u8], seq: u64, vtype: ValueType) {
    dst.extend_from_slice(user_key);
    let mut trailer = [0u8; INTERNAL_KEY_TRAILER_SIZE];
    LittleEndian::write_u64(&mut trailer, pack_sequence_and_type(seq, vtype));
    dst.extend_from_slice(&trailer);
}

/// Builds an internal key from its parts.
pub fn internal_key(user_key: &[u8], seq: u64, vtype: ValueType) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER_SIZE);
    append_internal_key(&mut key, user_key, seq, vtype);
    key
}

/// Builds the key to seek with when reading `user_key` as of `snapshot_seq`:
/// the first entry at or after it is the newest visible version.
pub fn lookup_key(user_key: &[u8], snapshot_seq: u64) -> Vec<u8> {
    internal_key(user_key, snapshot_seq, VALUE_TYPE_FOR_SEEK)
}

/// The user-key prefix of an internal key.
///
/// Callers must only pass well-formed internal keys; this is checked in
/// debug builds.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= INTERNAL_KEY_TRAILER_SIZE);
    &internal_key[..internal_key.len() - INTERNAL_KEY_TRAILER_SIZE]
}

/// Splits an internal key into `(user_key, sequence, type)`.
pub fn parse_internal_key(key: &[u8]) -> Result<(&[u8], u64, ValueType)> {
    if key.len() < INTERNAL_KEY_TRAILER_SIZE {
        return Err(corruption!(
            "internal key too short: {} bytes",
            key.len()
        ));
    }
    let (user_key, trailer) = key.split_at(key.len() - INTERNAL_KEY_TRAILER_SIZE);
    let packed = LittleEndian::read_u64(trailer);
    let vtype = ValueType::from_u8((packed & 0xff) as u8)?;
    Ok((user_key, packed >> 8, vtype))
}

/// Encodes a row position as 8 bytes big-endian.
pub fn encode_row_position(pos: u64) -> [u8; ROW_POSITION_SIZE] {
    let mut buf = [0u8; ROW_POSITION_SIZE];
    BigEndian::write_u64(&mut buf, pos);
    buf
}

/// Decodes an 8-byte big-endian row position.
pub fn decode_row_position(buf: &[u8]) -> Result<u64> {
    if buf.len() != ROW_POSITION_SIZE {
        return Err(corruption!(
            "row position must be {ROW_POSITION_SIZE} bytes, got {}",
            buf.len()
        ));
    }
    Ok(BigEndian::read_u64(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_key_roundtrip() {
        let key = internal_key(b"user_key", 12345, ValueType::Value);
        let (user, seq, vtype) = parse_internal_key(&key).unwrap();
        assert_eq!(user, b"user_key");
        assert_eq!(seq, 12345);
        assert_eq!(vtype, ValueType::Value);
        assert_eq!(extract_user_key(&key), b"user_key");
    }

    #[test]
    fn test_max_sequence_roundtrip() {
        let key = internal_key(b"k", MAX_SEQUENCE_NUMBER, ValueType::SingleDeletion);
        let (_, seq, vtype) = parse_internal_key(&key).unwrap();
        assert_eq!(seq, MAX_SEQUENCE_NUMBER);
        assert_eq!(vtype, ValueType::SingleDeletion);
    }

    #[test]
    fn test_parse_rejects_short_and_unknown() {
        assert!(parse_internal_key(b"short").is_err());
        let mut key = internal_key(b"k", 1, ValueType::Value);
        let n = key.len();
        key[n - INTERNAL_KEY_TRAILER_SIZE] = 0x5; // no such type
        assert!(parse_internal_key(&key).is_err());
    }

    #[test]
    fn test_row_position_byte_order_matches_numeric_order() {
        let positions: Vec<u64> = vec![0, 1, 255, 256, 1 << 40, u64::MAX];
        let encoded: Vec<_> = positions.iter().map(|p| encode_row_position(*p)).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
        for (pos, enc) in positions.iter().zip(&encoded) {
            assert_eq!(decode_row_position(enc).unwrap(), *pos);
        }
    }

    #[test]
    fn test_decode_row_position_rejects_bad_length() {
        assert!(decode_row_position(b"1234567").is_err());
        assert!(decode_row_position(b"123456789").is_err());
    }
}
