//! Data-block sealing policy.
//!
//! Each builder (main and every subcolumn) consults its own policy before
//! appending an entry; a `true` verdict seals the current block first. The
//! policies of sibling builders see the same entry sequence but decide
//! independently, so block boundaries need not line up across column files.

use integer_encoding::VarInt;

/// Decides when a data block is full.
pub trait FlushBlockPolicy: Send {
    /// Returns true when the block currently measuring
    /// `current_block_size` bytes should be sealed before `(key, value)` is
    /// appended. Never consulted while the block is empty.
    fn update(&mut self, key: &[u8], value: &[u8], current_block_size: usize) -> bool;
}

/// Creates one policy per column file of a table.
pub trait FlushBlockPolicyFactory: Send + Sync {
    fn name(&self) -> &'static str;
    fn new_flush_block_policy(&self, block_size: usize) -> Box<dyn FlushBlockPolicy>;
}

/// Seals a block as soon as appending the next entry would push it past the
/// configured target size.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlushBlockBySizePolicyFactory;

impl FlushBlockPolicyFactory for FlushBlockBySizePolicyFactory {
    fn name(&self) -> &'static str {
        "FlushBlockBySizePolicyFactory"
    }

    fn new_flush_block_policy(&self, block_size: usize) -> Box<dyn FlushBlockPolicy> {
        Box::new(FlushBlockBySizePolicy { block_size })
    }
}

struct FlushBlockBySizePolicy {
    block_size: usize,
}

/// Worst-case encoded footprint of one entry: three varint32 headers, the
/// full key (no shared prefix), the value, and an amortized restart slot.
fn entry_overhead(key: &[u8], value: &[u8]) -> usize {
    (key.len() as u32).required_space()
        + (value.len() as u32).required_space()
        + 1 // shared_len varint, zero at worst case
        + key.len()
        + value.len()
        + 4
}

impl FlushBlockPolicy for FlushBlockBySizePolicy {
    fn update(&mut self, key: &[u8], value: &[u8], current_block_size: usize) -> bool {
        current_block_size + entry_overhead(key, value) > self.block_size
    }
}
