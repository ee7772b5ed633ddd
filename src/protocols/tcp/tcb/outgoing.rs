use super::Segment;
use crate::{protocols::tcp::header::TcpHeader, Message};
use std::collections::VecDeque;

/// A collection of queues used for outgoing segments in TCP.
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    /// Data bytes queued for transmission but not yet segmentized
    pub text: VecDeque<Message>,
    /// The retransmission queue. Contains segments that may need to be
    /// retransmitted.
    pub retransmit: VecDeque<Transmit>,
    /// Contains segments that should not be retransmitted, such as pure-ACK
    /// segments.
    pub oneshot: Vec<TcpHeader>,
    /// The earliest queued segment FEC loss-signaling has marked lost but
    /// that has not yet been retransmitted.
    pub retransmit_hint: Option<u32>,
    /// The highest sequence number FEC loss-signaling has asserted lost, so
    /// that a later, narrower RECOVERY_FAILED range doesn't regress it.
    pub retransmit_high: Option<u32>,
}

impl Outgoing {
    /// The number of bytes of data currently queued for delivery in the
    /// retransmission queue
    pub fn queued_bytes(&self) -> usize {
        self.retransmit
            .iter()
            .map(|transmit| transmit.segment.text.len())
            .sum()
    }

    /// Marks every unacked, not-already-lost-or-sacked segment whose range
    /// lies entirely within `[seq, seq + len)` as lost, per SPEC_FULL.md
    /// §4.5's RECOVERY_FAILED handling. Returns whether anything changed.
    pub fn mark_lost(&mut self, seq: u32, len: u32) -> bool {
        use super::modular_cmp::{mod_le, mod_leq};
        let end = seq.wrapping_add(len);
        let mut changed = false;
        let mut earliest: Option<u32> = None;
        for transmit in self.retransmit.iter_mut() {
            if transmit.lost || transmit.sacked {
                continue;
            }
            let seg_seq = transmit.segment.header.seq;
            let seg_end = transmit.segment.end_seq();
            if mod_leq(seq, seg_seq) && mod_leq(seg_end, end) {
                transmit.lost = true;
                changed = true;
                earliest = Some(match earliest {
                    Some(current) if mod_le(current, seg_seq) => current,
                    _ => seg_seq,
                });
            }
        }
        if let Some(earliest) = earliest {
            self.retransmit_hint = Some(match self.retransmit_hint {
                Some(current) if mod_le(current, earliest) => current,
                _ => earliest,
            });
        }
        self.retransmit_high = Some(match self.retransmit_high {
            Some(current) if mod_le(end, current) => current,
            _ => end,
        });
        changed
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.retransmit.clear();
        self.oneshot.clear();
        self.retransmit_hint = None;
        self.retransmit_high = None;
    }
}

/// A segment on the retransmission queue. Records whether the segment is due
/// for retransmission.
#[derive(Debug, Clone)]
pub struct Transmit {
    /// The segment
    pub segment: Segment,
    /// Whether the segment should be retransmitted. Reset whenever the
    /// retransmit timer runs out.
    pub needs_transmit: bool,
    /// Set by FEC loss-signaling (RECOVERY_FAILED) when this segment's range
    /// was asserted lost ahead of the normal retransmission timeout.
    pub lost: bool,
    /// Set when a peer SACK block already covers this segment's range, so it
    /// is not a candidate for loss marking.
    pub sacked: bool,
}

impl Transmit {
    /// Create a new Transmit
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            needs_transmit: true,
            lost: false,
            sacked: false,
        }
    }
}
