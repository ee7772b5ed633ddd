//! Selective acknowledgment bookkeeping, as described in
//! [RFC 2018](https://www.rfc-editor.org/rfc/rfc2018).
//!
//! This is new relative to the connection-state machine this module was
//! grown from, which never parsed TCP options at all. The FEC synthesizer
//! needs to see the receiver's current SACK blocks to avoid resynthesizing
//! bytes the sender already knows arrived out of order.

use super::modular_cmp::{mod_le, mod_leq};

/// The most SACK blocks a receiver reports at once, per RFC 2018 (limited by
/// TCP option space alongside the timestamp option, conventionally 3-4).
pub const MAX_SACK_BLOCKS: usize = 4;

/// The set of out-of-order byte ranges the receiver currently holds and is
/// reporting to the sender.
#[derive(Debug, Clone, Default)]
pub struct SackBlocks {
    /// Ordered newest-first, as RFC 2018 recommends reporting the most
    /// recently received block first.
    blocks: Vec<(u32, u32)>,
}

impl SackBlocks {
    /// Records that `[seq, seq + len)` has been received out of order.
    /// Merges with an overlapping or adjacent block if one exists.
    pub fn insert(&mut self, seq: u32, len: u32) {
        if len == 0 {
            return;
        }
        let mut left = seq;
        let mut right = seq.wrapping_add(len);
        self.blocks.retain(|&(block_left, block_right)| {
            let overlaps = mod_le(left, block_right) && mod_le(block_left, right);
            if overlaps {
                if mod_le(block_left, left) {
                    left = block_left;
                }
                if mod_le(right, block_right) {
                    right = block_right;
                }
                false
            } else {
                true
            }
        });
        self.blocks.insert(0, (left, right));
        self.blocks.truncate(MAX_SACK_BLOCKS);
    }

    /// Removes any reported range that is now within the in-order stream
    /// (i.e. at or before `rcv_nxt`), since it no longer needs reporting.
    pub fn prune_below(&mut self, rcv_nxt: u32) {
        self.blocks.retain(|&(_, right)| mod_le(rcv_nxt, right));
    }

    /// The blocks as `(left, right)` sequence pairs, newest first.
    pub fn blocks(&self) -> &[(u32, u32)] {
        &self.blocks
    }

    /// If a SACK block covers the tail of `[seq, seq + len)`, returns the
    /// number of bytes at the end of that range already covered.
    pub fn covered_tail_len(&self, seq: u32, len: u32) -> u32 {
        let end = seq.wrapping_add(len);
        self.blocks
            .iter()
            .filter_map(|&(block_left, block_right)| {
                if mod_leq(block_left, end) && mod_le(seq, block_left) && mod_leq(end, block_right)
                {
                    Some(end.wrapping_sub(block_left))
                } else {
                    None
                }
            })
            .max()
            .unwrap_or(0)
    }
}
