//! Key ordering.
//!
//! A [`Comparator`] defines the total order a table is sorted by, plus the
//! two key-shortening hooks the index builder uses to shrink its separator
//! keys. Three orders exist in practice: raw bytewise order over user keys,
//! the composed internal-key order `(user_key ↑, sequence ↓, type ↓)`, and
//! bytewise order over 8-byte row positions inside subcolumn files.

use std::cmp::Ordering;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::key::{
    extract_user_key, pack_sequence_and_type, INTERNAL_KEY_TRAILER_SIZE, MAX_SEQUENCE_NUMBER,
    VALUE_TYPE_FOR_SEEK,
};

/// A total order over byte-string keys.
pub trait Comparator: Send + Sync {
    /// Wire-stable name, recorded in the properties block. A reader may
    /// refuse a table whose comparator name it does not recognize.
    fn name(&self) -> &'static str;

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Shortens `start` in place to the smallest key `s` it can find with
    /// `start <= s < limit`. May leave `start` unchanged; must never grow it.
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);

    /// Shortens `key` in place to a short key `>=` it. May leave it unchanged.
    fn find_short_successor(&self, key: &mut Vec<u8>);
}

/// Plain byte-string order.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &'static str {
        "leveldb.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let min_len = start.len().min(limit.len());
        let mut diff = 0;
        while diff < min_len && start[diff] == limit[diff] {
            diff += 1;
        }
        if diff >= min_len {
            // One key is a prefix of the other; no shortening is possible.
            return;
        }
        let byte = start[diff];
        if byte < 0xff && byte + 1 < limit[diff] {
            start[diff] = byte + 1;
            start.truncate(diff + 1);
            debug_assert!(start.as_slice() < limit);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        for i in 0..key.len() {
            if key[i] != 0xff {
                key[i] += 1;
                key.truncate(i + 1);
                return;
            }
        }
        // All 0xff: the key is its own successor.
    }
}

/// Bytewise order over 8-byte big-endian row positions, the sort order of
/// every subcolumn file. Positions compare correctly as raw bytes, so this
/// delegates to [`BytewiseComparator`] under a distinct wire name.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnKeyComparator;

impl Comparator for ColumnKeyComparator {
    fn name(&self) -> &'static str {
        "vidardb.ColumnKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        BytewiseComparator.compare(a, b)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        BytewiseComparator.find_shortest_separator(start, limit);
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        BytewiseComparator.find_short_successor(key);
    }
}

/// Orders internal keys: user key ascending per the wrapped user comparator,
/// then sequence number descending, then value type descending (the packed
/// trailer word compares descending).
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    fn trailer(key: &[u8]) -> u64 {
        LittleEndian::read_u64(&key[key.len() - INTERNAL_KEY_TRAILER_SIZE..])
    }
}

impl Comparator for InternalKeyComparator {
    fn name(&self) -> &'static str {
        "rocksdb.InternalKeyComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        debug_assert!(a.len() >= INTERNAL_KEY_TRAILER_SIZE);
        debug_assert!(b.len() >= INTERNAL_KEY_TRAILER_SIZE);
        match self.user.compare(extract_user_key(a), extract_user_key(b)) {
            Ordering::Equal => {
                // Newer entries (larger packed trailer) sort first.
                Self::trailer(b).cmp(&Self::trailer(a))
            }
            ord => ord,
        }
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut shortened = user_start.to_vec();
        self.user.find_shortest_separator(&mut shortened, user_limit);
        if shortened.len() < user_start.len()
            && self.user.compare(user_start, &shortened) == Ordering::Less
        {
            // The user part shrank; give the separator the largest possible
            // trailer so it still sorts at or before every real entry that
            // shares its user key.
            let mut trailer = [0u8; INTERNAL_KEY_TRAILER_SIZE];
            LittleEndian::write_u64(
                &mut trailer,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            shortened.extend_from_slice(&trailer);
            debug_assert_eq!(self.compare(start, &shortened), Ordering::Less);
            debug_assert_eq!(self.compare(&shortened, limit), Ordering::Less);
            *start = shortened;
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut shortened = user_key.to_vec();
        self.user.find_short_successor(&mut shortened);
        if shortened.len() < user_key.len()
            && self.user.compare(user_key, &shortened) == Ordering::Less
        {
            let mut trailer = [0u8; INTERNAL_KEY_TRAILER_SIZE];
            LittleEndian::write_u64(
                &mut trailer,
                pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK),
            );
            shortened.extend_from_slice(&trailer);
            debug_assert!(self.compare(key, &shortened) == Ordering::Less);
            *key = shortened;
        }
    }
}
