//! A receiver-side Forward Error Correction engine layered on top of the
//! TCP receive path: when a segment arrives carrying XOR parity over a
//! recent byte range, and exactly one covered block is missing, this engine
//! reconstructs it from the connection's own reference window (and, for the
//! 1-skip interleaved scheme, the out-of-order reassembly queue) without
//! asking the sender to retransmit.
//!
//! The engine is organized as a handful of narrow pieces, each named after
//! the step of processing it performs: [`option`] decodes the wire option,
//! [`window`] retains the byte history the decoder reads from, [`decode`]
//! runs the XOR recovery kernel, [`synth`] turns a recovered range into a
//! segment the host can feed back through its ordinary receive path,
//! [`ack`] reacts to a peer's FEC flags and raises this connection's own
//! loss signal, and [`lifecycle`] governs when FEC state exists at all.
//! [`transport`] is the trait seam a host TCB implements to expose exactly
//! the state this engine needs and nothing more.

pub mod ack;
pub mod decode;
pub mod errors;
pub mod lifecycle;
pub mod option;
pub mod synth;
pub mod transport;
pub mod window;

#[cfg(test)]
mod tests;

pub use errors::FecError;
pub use option::{parse_fec_option, ParsedFecOption};
pub use transport::{CongestionControl, TcpFecHost};
pub use window::ReferenceWindow;

use crate::protocols::tcp::header::TcpHeader;
use crate::protocols::tcp::tcb::Segment;

/// The coding scheme in effect on a connection. `None` disables FEC
/// entirely (SPEC_FULL.md §3, invariant I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingType {
    None,
    XorAll,
    XorSkip1,
}

/// Per-connection FEC state (SPEC_FULL.md §3's "Connection FEC state").
#[derive(Debug)]
pub struct ConnectionFec {
    pub coding: CodingType,
    /// Outbound-pending bookkeeping flags: RECOVERY_SUCCESSFUL and
    /// RECOVERY_CWR, echoed on the next outgoing segment.
    pub flags: u8,
    pub window: ReferenceWindow,
    /// Number of bytes after `rcv_nxt` considered lost, set when emitting
    /// RECOVERY_FAILED.
    pub lost_len: u32,
    /// Gates further cwnd reductions to one per recovery episode.
    pub high_seq: u32,
    consecutive_allocation_failures: u8,
}

/// Disable FEC after this many consecutive allocation/linearization
/// failures on one connection, per DESIGN.md's open-question decision.
const ALLOCATION_FAILURE_DISABLE_THRESHOLD: u8 = 3;

impl ConnectionFec {
    pub fn new(coding: CodingType, initial_high_seq: u32) -> Self {
        Self {
            coding,
            flags: 0,
            window: ReferenceWindow::default(),
            lost_len: 0,
            high_seq: initial_high_seq,
            consecutive_allocation_failures: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.coding != CodingType::None
    }

    /// Called once per in-order data segment at the moment it is delivered,
    /// as invariant P1 requires (retain iff non-empty and FEC enabled).
    pub fn retain_delivered(&mut self, segment: Segment) {
        if self.is_enabled() {
            self.window.retain(segment);
        }
    }

    fn note_allocation_trouble(&mut self) {
        self.consecutive_allocation_failures =
            self.consecutive_allocation_failures.saturating_add(1);
        if self.consecutive_allocation_failures >= ALLOCATION_FAILURE_DISABLE_THRESHOLD {
            crate::logging::disabled("repeated allocation failure");
            lifecycle::disable(self);
        }
    }

    fn note_decode_success(&mut self) {
        self.consecutive_allocation_failures = 0;
    }
}

/// The result of processing one incoming segment through the decode engine
/// and synthesizer, for the caller (the host `Tcb`) to act on.
pub enum SegmentOutcome {
    /// Not an FEC segment, or FEC is disabled: route normally.
    NotFec,
    /// Every encoded byte was already in-order.
    NoLoss,
    /// One or more ranges were reconstructed; hand each synthetic segment to
    /// the host's established-state receive entry point.
    Recovered(Vec<Segment>),
    /// Recovery failed; the caller should set RECOVERY_FAILED on its next
    /// outgoing segment with the given `lost_len` and request an immediate
    /// ACK (SPEC_FULL.md §4.5).
    Unrecovered { lost_len: u32 },
    /// The segment claimed ENCODED but carried no parseable FEC option, or
    /// named an unsupported coding type; drop it.
    Dropped(FecError),
}

/// The single entry point the host calls for every incoming segment while
/// FEC is enabled on the connection: parses the option, and if the segment
/// is a parity packet, runs the decode engine and synthesizer.
///
/// `mss` is the block size to decode against (the parity payload's own
/// length, per SPEC_FULL.md §4.3). `ooo_queue` is the connection's
/// out-of-order reassembly queue, read-only.
pub fn handle_incoming(
    state: &mut ConnectionFec,
    header: &TcpHeader,
    payload: &[u8],
    rcv_nxt: u32,
    sack: &crate::protocols::tcp::tcb::sack::SackBlocks,
    ooo_queue: &[Segment],
) -> SegmentOutcome {
    if !state.is_enabled() {
        return SegmentOutcome::NotFec;
    }

    let option = parse_fec_option(header);
    if !option.saw_fec {
        return SegmentOutcome::NotFec;
    }
    if !option.encoded() {
        // Carries FEC bookkeeping flags only (e.g. RECOVERY_CWR/_SUCCESSFUL
        // on what is otherwise an ordinary segment); ACK reaction handles
        // those separately. Nothing to decode here.
        return SegmentOutcome::NotFec;
    }
    if matches!(header.fec_option(), Some(data) if data.range.is_none()) {
        return SegmentOutcome::Dropped(FecError::MissingOptionOnEncodedClaim);
    }

    let mss = payload.len().max(1);
    if let Err(allocation_error) = try_allocate_working_buffer(payload.len()) {
        state.note_allocation_trouble();
        return SegmentOutcome::Dropped(allocation_error);
    }

    match decode::decode(
        state.coding,
        &option,
        payload,
        rcv_nxt,
        mss,
        &state.window,
        ooo_queue,
    ) {
        decode::DecodeStatus::NoLoss => {
            state.note_decode_success();
            SegmentOutcome::NoLoss
        }
        decode::DecodeStatus::Recovered(ranges) => {
            state.note_decode_success();
            let recovered_len = ranges.iter().map(|r| r.bytes.len()).sum();
            let segments = synth::synthesize_all(header, &ranges, sack);
            if !segments.is_empty() {
                state.flags |= crate::protocols::tcp::header::fec_flag_bits::RECOVERY_SUCCESSFUL;
                crate::logging::recovery_succeeded(option.enc_seq, option.enc_len, recovered_len);
            }
            SegmentOutcome::Recovered(segments)
        }
        decode::DecodeStatus::Unrecovered => {
            let lost_len = option.enc_seq.wrapping_add(option.enc_len).wrapping_sub(rcv_nxt);
            crate::logging::recovery_failed(option.enc_seq, option.enc_len, rcv_nxt, lost_len);
            SegmentOutcome::Unrecovered { lost_len }
        }
    }
}

/// Reserves the transient working buffer the decode engine needs up front,
/// so an allocation failure is surfaced as an [`FecError`] the caller can
/// count toward the per-connection disable threshold (SPEC_FULL.md §7)
/// rather than as a panic from deep inside the XOR kernel.
fn try_allocate_working_buffer(payload_len: usize) -> Result<(), FecError> {
    let mut probe: Vec<u8> = Vec::new();
    probe
        .try_reserve_exact(payload_len)
        .map_err(|_| FecError::AllocationFailure)
}
