//! The capability-set seam between the FEC engine and its host transport.
//!
//! SPEC_FULL.md §9 recommends an explicit trait rather than ambient globals
//! as the interface the decode engine, synthesizer, and ACK reaction use to
//! reach into connection state. [`Tcb`](super::super::tcb::Tcb) implements
//! both traits below; a different host transport could implement them
//! without this crate needing to know anything about it.

use crate::protocols::tcp::tcb::{sack::SackBlocks, Segment};

/// The pieces of congestion control the FEC engine needs to couple into,
/// without assuming any particular algorithm (Reno, Cubic, or otherwise).
pub trait CongestionControl {
    /// Computes the slow-start threshold to apply in response to an FEC
    /// recovery episode.
    fn ssthresh(&self) -> u32;

    /// The current congestion window.
    fn cwnd(&self) -> u32;

    /// Sets the congestion window, typically to `min(cwnd, ssthresh())`.
    fn set_cwnd(&mut self, cwnd: u32);

    /// Disables congestion-window "undo" so a reduction made during this
    /// recovery episode sticks even if the episode later resolves cleanly.
    fn disable_undo(&mut self);
}

/// The slice of connection state the FEC engine reads from and writes back
/// into the host transport, per SPEC_FULL.md §6's flow contract. Kept narrow
/// deliberately: the engine never reaches into `Tcb` fields directly, so a
/// host transport with a differently shaped TCB can still host this engine.
pub trait TcpFecHost {
    /// `RCV.NXT`: the next in-order sequence number the host expects.
    fn rcv_nxt(&self) -> u32;

    /// The receiver's current selective-ack blocks, consulted by the
    /// synthesizer to avoid re-emitting bytes the sender already has.
    fn sack_blocks(&self) -> &SackBlocks;

    /// Delivers a segment the decode engine reconstructed (or that arrived
    /// undamaged) to the host's normal in-order/out-of-order processing path,
    /// exactly as if it had arrived over the wire.
    fn submit_recovered(&mut self, segment: Segment);

    /// Marks the byte range `[seq, seq + len)` lost ahead of the normal
    /// retransmission timeout, per a peer's RECOVERY_FAILED signal.
    fn mark_lost(&mut self, seq: u32, len: u32) -> bool;

    /// Access to congestion control, for the ACK-reaction step's
    /// congestion-window coupling (SPEC_FULL.md §4.5, property P5).
    fn congestion_control(&mut self) -> &mut dyn CongestionControl;
}
