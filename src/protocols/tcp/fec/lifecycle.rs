//! Enable/disable/inherit transitions for a connection's FEC state. See
//! SPEC_FULL.md §4.6.

use super::{CodingType, ConnectionFec};

/// Administrative policy consulted when a listener accepts a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptPolicy {
    /// Inherit whatever coding type the listener negotiated.
    Inherit,
    /// Refuse FEC regardless of what the listener negotiated.
    AlwaysDisable,
}

/// Builds the FEC state for a freshly established connection, during the
/// handshake, given the coding type negotiated for it and the sequence
/// number the connection will next send (`snd_nxt` at establishment).
pub fn enable(coding: CodingType, snd_nxt: u32) -> ConnectionFec {
    ConnectionFec::new(coding, snd_nxt)
}

/// Computes the coding type a child connection should start with, given the
/// parent listener's negotiated type and the accept policy in effect.
///
/// `high_seq` on the returned state is initialized to the child's own
/// `snd_nxt` so the first RECOVERY_SUCCESSFUL on the new connection triggers
/// exactly one window reduction instead of being mistaken for a duplicate
/// of whatever episode, if any, was in flight on the parent.
pub fn inherit_on_accept(
    parent_coding: CodingType,
    policy: AcceptPolicy,
    child_snd_nxt: u32,
) -> ConnectionFec {
    let coding = match policy {
        AcceptPolicy::Inherit => parent_coding,
        AcceptPolicy::AlwaysDisable => CodingType::None,
    };
    enable(coding, child_snd_nxt)
}

/// Tears down FEC on a connection: disables it and releases every retained
/// reference. Safe to call unconditionally, including implicitly when the
/// host prunes its receive buffers under memory pressure.
pub fn disable(state: &mut ConnectionFec) {
    state.coding = CodingType::None;
    state.window.purge();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_starts_with_empty_window() {
        let state = enable(CodingType::XorAll, 1000);
        assert_eq!(state.coding, CodingType::XorAll);
        assert_eq!(state.window.bytes_retained(), 0);
        assert_eq!(state.high_seq, 1000);
    }

    #[test]
    fn disable_purges_retained_references() {
        use crate::protocols::tcp::header::{Control, TcpHeader};
        use crate::protocols::tcp::tcb::Segment;

        let mut state = enable(CodingType::XorAll, 0);
        state.window.retain(Segment::new(
            TcpHeader {
                src_port: 0,
                dst_port: 0,
                seq: 0,
                ack: 0,
                ctl: Control::new(false, true, false, false, false, false),
                wnd: 0,
                checksum: 0,
                urg: 0,
                options: Vec::new(),
            },
            b"abcd".as_slice().into(),
        ));
        assert!(state.window.bytes_retained() > 0);
        disable(&mut state);
        assert_eq!(state.coding, CodingType::None);
        assert_eq!(state.window.bytes_retained(), 0);
    }

    #[test]
    fn accept_policy_can_refuse_inherited_fec() {
        let state = inherit_on_accept(CodingType::XorSkip1, AcceptPolicy::AlwaysDisable, 42);
        assert_eq!(state.coding, CodingType::None);
        assert_eq!(state.high_seq, 42);
    }

    #[test]
    fn accept_policy_inherits_by_default() {
        let state = inherit_on_accept(CodingType::XorSkip1, AcceptPolicy::Inherit, 42);
        assert_eq!(state.coding, CodingType::XorSkip1);
    }
}
