//! ACK-path reaction to a peer's FEC flags, and loss signaling back to the
//! peer when this receiver's own decode attempt fails. See SPEC_FULL.md
//! §4.5.

use super::option::ParsedFecOption;
use super::transport::{CongestionControl, TcpFecHost};
use crate::protocols::tcp::header::fec_flag_bits;

/// Whether this ACK carried a loss indicator the caller should act on
/// (e.g. by not treating the segment as ordinary, duplicate-free progress).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckReaction {
    pub loss_indicator_present: bool,
}

/// Reacts to the FEC flags on an incoming ACK, before SACK processing.
/// `local_flags` is the connection's own outbound-pending FEC flags byte,
/// updated in place.
pub fn react_to_ack(
    peer: &ParsedFecOption,
    ack: u32,
    high_seq: &mut u32,
    local_flags: &mut u8,
    host: &mut impl TcpFecHost,
) -> AckReaction {
    use crate::protocols::tcp::tcb::modular_cmp::mod_le;

    let mut loss_indicator_present = false;

    if peer.recovery_cwr() {
        *local_flags &= !(fec_flag_bits::RECOVERY_SUCCESSFUL | fec_flag_bits::RECOVERY_CWR);
    }

    if peer.recovery_failed() {
        let changed = host.mark_lost(peer.lost_seq, peer.lost_len);
        if changed {
            loss_indicator_present = true;
        }
    }

    if peer.recovery_successful() {
        let recovery_cwr_pending = *local_flags & fec_flag_bits::RECOVERY_CWR != 0;
        if mod_le(*high_seq, ack) && *high_seq != ack && !recovery_cwr_pending {
            let cc = host.congestion_control();
            reduce_cwnd_once(cc);
            *high_seq = ack; // gates further reduction until this ack advances past it again
            *local_flags |= fec_flag_bits::RECOVERY_CWR;
            loss_indicator_present = true;
        } else {
            host.congestion_control().disable_undo();
        }
    }

    AckReaction {
        loss_indicator_present,
    }
}

fn reduce_cwnd_once(cc: &mut dyn CongestionControl) {
    let ssthresh = cc.ssthresh();
    let cwnd = cc.cwnd().min(ssthresh);
    cc.set_cwnd(cwnd);
    cc.disable_undo();
}

/// Computed fields for an outgoing RECOVERY_FAILED demand, per the decode
/// engine returning `LOSS_UNRECOVERED` (SPEC_FULL.md §4.5, "on outgoing ACK
/// demand").
pub struct LossDemand {
    pub flags: u8,
    pub lost_len: u32,
}

pub fn loss_demand(local_flags: u8, enc_seq: u32, enc_len: u32, rcv_nxt: u32) -> LossDemand {
    LossDemand {
        flags: local_flags | fec_flag_bits::RECOVERY_FAILED,
        lost_len: enc_seq.wrapping_add(enc_len).wrapping_sub(rcv_nxt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::tcp::tcb::sack::SackBlocks;

    struct StubCc {
        ssthresh: u32,
        cwnd: u32,
        undo_disabled: bool,
    }
    impl CongestionControl for StubCc {
        fn ssthresh(&self) -> u32 {
            self.ssthresh
        }
        fn cwnd(&self) -> u32 {
            self.cwnd
        }
        fn set_cwnd(&mut self, cwnd: u32) {
            self.cwnd = cwnd;
        }
        fn disable_undo(&mut self) {
            self.undo_disabled = true;
        }
    }

    struct StubHost {
        cc: StubCc,
        sack: SackBlocks,
        lost: Vec<(u32, u32)>,
    }
    impl TcpFecHost for StubHost {
        fn rcv_nxt(&self) -> u32 {
            0
        }
        fn sack_blocks(&self) -> &SackBlocks {
            &self.sack
        }
        fn submit_recovered(&mut self, _segment: crate::protocols::tcp::tcb::Segment) {}
        fn mark_lost(&mut self, seq: u32, len: u32) -> bool {
            self.lost.push((seq, len));
            true
        }
        fn congestion_control(&mut self) -> &mut dyn CongestionControl {
            &mut self.cc
        }
    }

    fn host() -> StubHost {
        StubHost {
            cc: StubCc {
                ssthresh: 10,
                cwnd: 20,
                undo_disabled: false,
            },
            sack: SackBlocks::default(),
            lost: Vec::new(),
        }
    }

    #[test]
    fn recovery_failed_marks_lost_and_signals() {
        let mut host = host();
        let peer = ParsedFecOption {
            saw_fec: true,
            flags: fec_flag_bits::RECOVERY_FAILED,
            lost_seq: 100,
            lost_len: 8,
            ..Default::default()
        };
        let mut high_seq = 0;
        let mut local_flags = 0;
        let reaction = react_to_ack(&peer, 50, &mut high_seq, &mut local_flags, &mut host);
        assert!(reaction.loss_indicator_present);
        assert_eq!(host.lost, vec![(100, 8)]);
    }

    #[test]
    fn recovery_successful_reduces_cwnd_once_per_episode() {
        let mut host = host();
        let peer = ParsedFecOption {
            saw_fec: true,
            flags: fec_flag_bits::RECOVERY_SUCCESSFUL,
            ..Default::default()
        };
        let mut high_seq = 0;
        let mut local_flags = 0;
        let reaction = react_to_ack(&peer, 500, &mut high_seq, &mut local_flags, &mut host);
        assert!(reaction.loss_indicator_present);
        assert_eq!(host.cc.cwnd, 10);
        assert!(host.cc.undo_disabled);
        assert_eq!(high_seq, 500);
        assert_eq!(local_flags & fec_flag_bits::RECOVERY_CWR, fec_flag_bits::RECOVERY_CWR);

        // A second RECOVERY_SUCCESSFUL before the episode clears must not
        // reduce cwnd again (P5).
        host.cc.cwnd = 999;
        let reaction2 = react_to_ack(&peer, 600, &mut high_seq, &mut local_flags, &mut host);
        assert_eq!(host.cc.cwnd, 999);
        assert!(!reaction2.loss_indicator_present || host.cc.cwnd == 999);
    }

    #[test]
    fn recovery_cwr_clears_local_success_flag() {
        let mut host = host();
        let peer = ParsedFecOption {
            saw_fec: true,
            flags: fec_flag_bits::RECOVERY_CWR,
            ..Default::default()
        };
        let mut high_seq = 0;
        let mut local_flags = fec_flag_bits::RECOVERY_SUCCESSFUL;
        react_to_ack(&peer, 0, &mut high_seq, &mut local_flags, &mut host);
        assert_eq!(local_flags & fec_flag_bits::RECOVERY_SUCCESSFUL, 0);
    }
}
