//! The bounded reference window: a FIFO of retained clones of recently
//! delivered in-order segments, kept solely so the decode engine can XOR
//! them back out of a parity packet. See SPEC_FULL.md §4.2.

use crate::protocols::tcp::tcb::{modular_cmp::mod_le, Segment};
use std::collections::VecDeque;

/// The default soft limit on retained bytes (invariant I2), matching the
/// `FEC_RCV_QUEUE_LIMIT` tunable named in SPEC_FULL.md §3.
pub const FEC_RCV_QUEUE_LIMIT: usize = 16 * 1024;

/// A bounded, sequence-ordered FIFO of retained segment clones.
#[derive(Debug, Clone)]
pub struct ReferenceWindow {
    segments: VecDeque<Segment>,
    bytes: usize,
    limit: usize,
}

impl Default for ReferenceWindow {
    fn default() -> Self {
        Self::new(FEC_RCV_QUEUE_LIMIT)
    }
}

impl ReferenceWindow {
    pub fn new(limit: usize) -> Self {
        Self {
            segments: VecDeque::new(),
            bytes: 0,
            limit,
        }
    }

    /// The number of payload bytes currently retained (invariant I2/P2).
    pub fn bytes_retained(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Retains a clone of a just-delivered in-order segment (invariant I1).
    /// A no-op for segments carrying no payload. Evicts from the head,
    /// without ever splitting a retained entry, until back under the limit
    /// (invariant I2).
    pub fn retain(&mut self, segment: Segment) {
        let len = segment.text.len();
        if len == 0 {
            return;
        }
        self.segments.push_back(segment);
        self.bytes += len;
        while self.bytes.saturating_sub(self.head_len()) >= self.limit {
            let Some(evicted) = self.segments.pop_front() else {
                break;
            };
            let evicted_len = evicted.text.len();
            self.bytes -= evicted_len;
            crate::logging::window_evicted(evicted.header.seq, evicted_len, self.bytes);
        }
    }

    fn head_len(&self) -> usize {
        self.segments.front().map(|s| s.text.len()).unwrap_or(0)
    }

    /// Drops every retained reference (used on disable/teardown/memory
    /// pressure, SPEC_FULL.md §4.6).
    pub fn purge(&mut self) {
        self.segments.clear();
        self.bytes = 0;
    }

    /// Reads up to `max_bytes` contiguous payload bytes starting at sequence
    /// number `seq`, scanning the window and then, if provided, a
    /// supplementary out-of-order source. Stops at the first gap. Returns
    /// the bytes actually read; a short read (fewer than `max_bytes`, with
    /// bytes still wanted) signals a gap at `seq + bytes_read.len()`.
    pub fn read_from(&self, seq: u32, max_bytes: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(max_bytes);
        let mut want = seq;
        for segment in &self.segments {
            if out.len() >= max_bytes {
                break;
            }
            if segment.header.ctl.rst() || segment.header.ctl.syn() {
                if segment.header.seq == want {
                    break;
                }
                continue;
            }
            let seg_seq = segment.header.seq;
            let seg_len = segment.text.len() as u32;
            let seg_end = seg_seq.wrapping_add(seg_len);
            if mod_le(seg_end, want.wrapping_add(1)) && seg_end != want {
                // Entirely before what we want.
                continue;
            }
            if seg_seq != want {
                // Either ahead of `want` (gap) or straddling from before
                // without covering `want` exactly; either way we can't use
                // it to extend a contiguous read starting at `want`.
                if mod_le(want, seg_seq) {
                    break;
                }
                continue;
            }
            let take = (max_bytes - out.len()).min(seg_len as usize);
            out.extend_from_slice(&segment.text.to_vec()[..take]);
            want = want.wrapping_add(take as u32);
        }
        out
    }
}
