//! Turns a reconstructed byte range into a synthetic segment the host
//! transport can feed back through its normal receive path, as if it had
//! arrived over the wire. See SPEC_FULL.md §4.4.

use super::decode::Recovered;
use crate::protocols::tcp::header::{rewrite_fec_long_to_short, Control, TcpHeader};
use crate::protocols::tcp::tcb::{sack::SackBlocks, Segment};

/// Builds the synthetic segment for one recovered range, after trimming its
/// tail against any SACK block the peer already reported. Returns `None` if
/// the whole range turns out to already be SACKed (property P4, step 1).
pub fn synthesize(parity_header: &TcpHeader, recovered: &Recovered, sack: &SackBlocks) -> Option<Segment> {
    let covered = sack.covered_tail_len(recovered.seq, recovered.bytes.len() as u32);
    let trimmed_len = (recovered.bytes.len() as u32).saturating_sub(covered);
    if trimmed_len == 0 {
        return None;
    }
    let trimmed_len = trimmed_len as usize;

    let mut options = parity_header.options.clone();
    // The parity segment's option may be missing if it arrived via a header
    // this crate built internally for a test; in production every ENCODED
    // segment carries the long form, so this should always succeed.
    let _ = rewrite_fec_long_to_short(&mut options);

    let header = TcpHeader {
        src_port: parity_header.src_port,
        dst_port: parity_header.dst_port,
        seq: recovered.seq,
        ack: parity_header.ack,
        ctl: Control::new(
            false,
            parity_header.ctl.ack(),
            false,
            false,
            false,
            false,
        ),
        wnd: parity_header.wnd,
        // The recovered bytes are derived entirely from already-validated
        // segments; there's nothing left to check.
        checksum: 0,
        urg: 0,
        options,
    };

    Some(Segment::new(
        header,
        recovered.bytes[..trimmed_len].into(),
    ))
}

/// Synthesizes every recovered range from a decode episode, dropping any
/// that SACK has already made redundant.
pub fn synthesize_all(
    parity_header: &TcpHeader,
    recovered: &[Recovered],
    sack: &SackBlocks,
) -> Vec<Segment> {
    recovered
        .iter()
        .filter_map(|r| synthesize(parity_header, r, sack))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::ipv4::Ipv4Address;
    use crate::protocols::tcp::header::{fec_flag_bits, FecOptionData, TcpHeaderBuilder, TcpOption};

    fn parity_header() -> TcpHeader {
        TcpHeaderBuilder::new(1000, 2000, 0)
            .ack(100)
            .option(TcpOption::Fec(FecOptionData {
                flags: fec_flag_bits::ENCODED,
                range: Some((0, 8)),
            }))
            .build(Ipv4Address::LOCALHOST, Ipv4Address::SUBNET, [].into_iter(), 0)
            .unwrap()
    }

    #[test]
    fn synthesizes_full_range_without_sack() {
        let header = parity_header();
        let recovered = Recovered {
            seq: 4,
            bytes: b"efgh".to_vec(),
        };
        let sack = SackBlocks::default();
        let segment = synthesize(&header, &recovered, &sack).unwrap();
        assert_eq!(segment.header.seq, 4);
        assert_eq!(segment.text.to_vec(), b"efgh");
        assert_eq!(segment.header.fec_option().unwrap().range, None);
        assert_eq!(
            segment.header.fec_option().unwrap().flags & fec_flag_bits::ENCODED,
            0
        );
    }

    #[test]
    fn trims_tail_already_covered_by_sack() {
        let header = parity_header();
        let recovered = Recovered {
            seq: 0,
            bytes: b"abcd".to_vec(),
        };
        let mut sack = SackBlocks::default();
        sack.insert(2, 2);
        let segment = synthesize(&header, &recovered, &sack).unwrap();
        assert_eq!(segment.text.to_vec(), b"ab");
    }

    #[test]
    fn fully_sacked_range_yields_nothing() {
        let header = parity_header();
        let recovered = Recovered {
            seq: 0,
            bytes: b"abcd".to_vec(),
        };
        let mut sack = SackBlocks::default();
        sack.insert(0, 4);
        assert!(synthesize(&header, &recovered, &sack).is_none());
    }
}
