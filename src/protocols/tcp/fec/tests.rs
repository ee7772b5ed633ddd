//! End-to-end scenarios over the assembled FEC engine, matching the
//! numbered walkthroughs in SPEC_FULL.md §8 (MSS = 4 throughout).

use super::*;
use crate::protocols::ipv4::Ipv4Address;
use crate::protocols::tcp::header::{fec_flag_bits, Control, FecOptionData, TcpHeader, TcpHeaderBuilder, TcpOption};
use crate::protocols::tcp::tcb::sack::SackBlocks;

fn data_segment(seq: u32, payload: &[u8]) -> Segment {
    Segment::new(
        TcpHeader {
            src_port: 1000,
            dst_port: 2000,
            seq,
            ack: 0,
            ctl: Control::new(false, true, false, false, false, false),
            wnd: 0,
            checksum: 0,
            urg: 0,
            options: Vec::new(),
        },
        payload.into(),
    )
}

fn parity_segment(enc_seq: u32, enc_len: u32, payload: &[u8]) -> TcpHeader {
    TcpHeaderBuilder::new(1000, 2000, enc_seq)
        .ack(0)
        .option(TcpOption::Fec(FecOptionData {
            flags: fec_flag_bits::ENCODED,
            range: Some((enc_seq, enc_len)),
        }))
        .build(Ipv4Address::LOCALHOST, Ipv4Address::SUBNET, payload.iter().cloned(), payload.len())
        .unwrap()
}

fn xor_bytes(chunks: &[&[u8]]) -> Vec<u8> {
    let len = chunks[0].len();
    let mut out = vec![0u8; len];
    for chunk in chunks {
        for (o, b) in out.iter_mut().zip(*chunk) {
            *o ^= b;
        }
    }
    out
}

#[test]
fn scenario_1_two_segments_no_loss() {
    let mut state = ConnectionFec::new(CodingType::XorAll, 0);
    state.retain_delivered(data_segment(0, b"abcd"));
    state.retain_delivered(data_segment(4, b"efgh"));

    let parity_payload = xor_bytes(&[b"abcd", b"efgh"]);
    let parity_header = parity_segment(0, 8, &parity_payload);
    let sack = SackBlocks::default();

    let outcome = handle_incoming(&mut state, &parity_header, &parity_payload, 8, &sack, &[]);
    assert!(matches!(outcome, SegmentOutcome::NoLoss));
}

#[test]
fn scenario_2_one_segment_missing_contiguous() {
    let mut state = ConnectionFec::new(CodingType::XorAll, 0);
    state.retain_delivered(data_segment(0, b"abcd"));
    // S2 = [4..8) is lost; rcv_nxt stays at 4.

    let parity_payload = xor_bytes(&[b"abcd", b"efgh"]);
    let parity_header = parity_segment(0, 8, &parity_payload);
    let sack = SackBlocks::default();

    let outcome = handle_incoming(&mut state, &parity_header, &parity_payload, 4, &sack, &[]);
    match outcome {
        SegmentOutcome::Recovered(segments) => {
            assert_eq!(segments.len(), 1);
            assert_eq!(segments[0].header.seq, 4);
            assert_eq!(segments[0].text.to_vec(), b"efgh");
            assert_eq!(
                segments[0].header.fec_option().unwrap().flags & fec_flag_bits::ENCODED,
                0
            );
            assert_ne!(state.flags & fec_flag_bits::RECOVERY_SUCCESSFUL, 0);
        }
        _ => panic!("expected recovery"),
    }
}

#[test]
fn scenario_3_one_segment_missing_skip_coding() {
    let mut state = ConnectionFec::new(CodingType::XorSkip1, 0);
    state.retain_delivered(data_segment(0, b"abcd"));
    // S2 = [4..8) is the skipped, unencoded block; it never enters the
    // accumulator, whether delivered or not.
    let ooo = vec![data_segment(4, b"efgh")];
    // S3 = [8..12) is lost.

    let parity_payload = xor_bytes(&[b"abcd", b"ijkl"]);
    let parity_header = parity_segment(0, 12, &parity_payload);
    let sack = SackBlocks::default();

    let outcome = handle_incoming(&mut state, &parity_header, &parity_payload, 4, &sack, &ooo);
    match outcome {
        SegmentOutcome::Recovered(segments) => {
            assert_eq!(segments.len(), 1);
            assert_eq!(segments[0].header.seq, 8);
            assert_eq!(segments[0].text.to_vec(), b"ijkl");
        }
        _ => panic!("expected recovery of S3"),
    }
}

#[test]
fn scenario_4_two_missing_segments_unrecovered() {
    let mut state = ConnectionFec::new(CodingType::XorAll, 0);
    // Neither S2 nor S3 has arrived or been retained.
    let parity_payload = vec![0u8; 4];
    let parity_header = parity_segment(0, 12, &parity_payload);
    let sack = SackBlocks::default();

    let outcome = handle_incoming(&mut state, &parity_header, &parity_payload, 0, &sack, &[]);
    match outcome {
        SegmentOutcome::Unrecovered { lost_len } => assert_eq!(lost_len, 12),
        _ => panic!("expected LOSS_UNRECOVERED"),
    }
}

#[test]
fn scenario_5_recovered_tail_already_sacked() {
    let mut state = ConnectionFec::new(CodingType::XorAll, 0);
    // S1 = [0..4) is lost; S2 = [4..8) arrived out of order and is SACKed.
    let ooo = vec![data_segment(4, b"efgh")];
    let mut sack = SackBlocks::default();
    sack.insert(4, 4);

    let parity_payload = xor_bytes(&[b"abcd", b"efgh"]);
    let parity_header = parity_segment(0, 8, &parity_payload);

    let outcome = handle_incoming(&mut state, &parity_header, &parity_payload, 0, &sack, &ooo);
    match outcome {
        SegmentOutcome::Recovered(segments) => {
            assert_eq!(segments.len(), 1);
            assert_eq!(segments[0].header.seq, 0);
            assert_eq!(segments[0].text.to_vec(), b"abcd");
        }
        _ => panic!("expected recovery of S1"),
    }
}

#[test]
fn scenario_6_window_eviction_under_limit() {
    let mut state = ConnectionFec::new(CodingType::XorAll, 0);
    state.window = ReferenceWindow::new(8);
    state.retain_delivered(data_segment(0, b"abcd"));
    state.retain_delivered(data_segment(4, b"efgh"));
    assert_eq!(state.window.bytes_retained(), 8);
    state.retain_delivered(data_segment(8, b"ijkl"));
    assert!(state.window.bytes_retained() <= 8 + 4);
    assert_eq!(state.window.read_from(4, 8), b"efghijkl");
}

#[test]
fn scenario_7_ack_echo_clears_local_recovery_successful() {
    let mut local_flags = fec_flag_bits::RECOVERY_SUCCESSFUL;
    let peer = ParsedFecOption {
        saw_fec: true,
        flags: fec_flag_bits::RECOVERY_CWR,
        ..Default::default()
    };

    struct NoopCc;
    impl CongestionControl for NoopCc {
        fn ssthresh(&self) -> u32 {
            0
        }
        fn cwnd(&self) -> u32 {
            0
        }
        fn set_cwnd(&mut self, _cwnd: u32) {}
        fn disable_undo(&mut self) {}
    }
    struct NoopHost {
        cc: NoopCc,
        sack: SackBlocks,
    }
    impl TcpFecHost for NoopHost {
        fn rcv_nxt(&self) -> u32 {
            0
        }
        fn sack_blocks(&self) -> &SackBlocks {
            &self.sack
        }
        fn submit_recovered(&mut self, _segment: Segment) {}
        fn mark_lost(&mut self, _seq: u32, _len: u32) -> bool {
            false
        }
        fn congestion_control(&mut self) -> &mut dyn CongestionControl {
            &mut self.cc
        }
    }

    let mut host = NoopHost {
        cc: NoopCc,
        sack: SackBlocks::default(),
    };
    let mut high_seq = 0;
    ack::react_to_ack(&peer, 0, &mut high_seq, &mut local_flags, &mut host);
    assert_eq!(local_flags & fec_flag_bits::RECOVERY_SUCCESSFUL, 0);
}

#[test]
fn repeated_allocation_trouble_disables_fec() {
    let mut state = ConnectionFec::new(CodingType::XorAll, 0);
    for _ in 0..3 {
        state.note_allocation_trouble();
    }
    assert!(!state.is_enabled());
    assert_eq!(state.window.bytes_retained(), 0);
}
