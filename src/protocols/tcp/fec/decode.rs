//! The XOR recovery kernel: walks the reference window and the out-of-order
//! reassembly queue, XORing bytes into an accumulator, to reconstruct a
//! missing segment from a parity packet. See SPEC_FULL.md §4.3.

use super::option::ParsedFecOption;
use super::window::ReferenceWindow;
use super::CodingType;
use crate::protocols::tcp::tcb::{modular_cmp::mod_le, Segment};

/// The outcome of a decode episode.
#[derive(Debug, Clone)]
pub enum DecodeStatus {
    /// Every encoded byte was already in-order; nothing to do.
    NoLoss,
    /// Exactly one block was missing and is now fully reconstructed. The
    /// vector always carries one entry; it stays a vector because the
    /// synthesizer (and its caller) are written against a range list.
    Recovered(Vec<Recovered>),
    /// More than one MSS block was missing, or the encoding was malformed;
    /// nothing could be reconstructed.
    Unrecovered,
}

/// One reconstructed contiguous byte range.
#[derive(Debug, Clone)]
pub struct Recovered {
    pub seq: u32,
    pub bytes: Vec<u8>,
}

/// Reads up to `len` bytes starting at `seq`, first from the reference
/// window then, if the window falls short, from the out-of-order queue.
/// Returns `None` on a short read (a gap, end of both sources, or an
/// RST/SYN segment encountered).
fn read_block(
    window: &ReferenceWindow,
    ooo: &[Segment],
    seq: u32,
    len: usize,
) -> Option<Vec<u8>> {
    let mut out = window.read_from(seq, len);
    if out.len() == len {
        return Some(out);
    }

    let mut want = seq.wrapping_add(out.len() as u32);
    loop {
        let Some(segment) = ooo.iter().find(|s| s.header.seq == want) else {
            return None;
        };
        if segment.header.ctl.rst() || segment.header.ctl.syn() {
            return None;
        }
        let payload = segment.text.to_vec();
        let take = (len - out.len()).min(payload.len());
        out.extend_from_slice(&payload[..take]);
        want = want.wrapping_add(take as u32);
        if out.len() == len {
            return Some(out);
        }
        if payload.len() < take || take == 0 {
            return None;
        }
    }
}

fn xor_into(acc: &mut [u8], block: &[u8], offset: usize) {
    for (a, b) in acc[offset..offset + block.len()].iter_mut().zip(block) {
        *a ^= *b;
    }
}

/// Runs one decode episode over a parity segment's payload.
///
/// `rcv_nxt` is the connection's current in-order sequence counter, `mss` is
/// the block size the parity packet was encoded with (the parity payload's
/// own length). Exactly one missing MSS block within the encoded range can
/// be recovered; a second missing block, or a block wider than the parity
/// payload, ends the episode as [`DecodeStatus::Unrecovered`].
pub fn decode(
    coding: CodingType,
    option: &ParsedFecOption,
    parity_payload: &[u8],
    rcv_nxt: u32,
    mss: usize,
    window: &ReferenceWindow,
    ooo: &[Segment],
) -> DecodeStatus {
    let enc_seq = option.enc_seq;
    let enc_len = option.enc_len;
    let enc_end = enc_seq.wrapping_add(enc_len);

    if mod_le(enc_end, rcv_nxt) || enc_end == rcv_nxt {
        return DecodeStatus::NoLoss;
    }

    let skip = match coding {
        CodingType::XorAll => 0usize,
        CodingType::XorSkip1 => 1usize,
        CodingType::None => return DecodeStatus::Unrecovered,
    };

    // `acc` is one MSS block wide, not the whole encoded range: every
    // present block XORs into acc[0..block_len] at offset 0, the same way
    // the sender built the parity payload one block-position at a time.
    let mut acc = parity_payload.to_vec();
    let mut next = enc_seq;
    let mut missing: Option<(u32, usize)> = None; // (seq, len)

    while mod_le(next, enc_end) && next != enc_end {
        let remaining = enc_end.wrapping_sub(next) as usize;
        let block_len = remaining.min(mss);
        if block_len > acc.len() {
            // A block can never be wider than the parity payload itself;
            // enc_len disagrees with mss.
            return DecodeStatus::Unrecovered;
        }

        match read_block(window, ooo, next, block_len) {
            Some(block) => xor_into(&mut acc, &block, 0),
            None => {
                if missing.is_some() {
                    return DecodeStatus::Unrecovered;
                }
                missing = Some((next, block_len));
            }
        }

        next = next.wrapping_add(block_len as u32);
        if skip > 0 && next != enc_end {
            // Skip the unencoded block that follows in the stream; it
            // contributed nothing to the parity payload.
            next = next.wrapping_add((mss * skip) as u32);
        }
    }

    let Some((miss_seq, miss_len)) = missing else {
        return DecodeStatus::NoLoss;
    };

    DecodeStatus::Recovered(vec![Recovered {
        seq: miss_seq,
        bytes: acc[..miss_len].to_vec(),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::tcp::header::{Control, TcpHeader};

    fn segment_at(seq: u32, payload: &[u8]) -> Segment {
        Segment::new(
            TcpHeader {
                src_port: 0,
                dst_port: 0,
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

    fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
        a.iter().zip(b).map(|(x, y)| x ^ y).collect()
    }

    #[test]
    fn no_loss_when_all_blocks_present() {
        let mut window = ReferenceWindow::default();
        window.retain(segment_at(0, b"abcd"));
        window.retain(segment_at(4, b"efgh"));
        let option = ParsedFecOption {
            saw_fec: true,
            flags: crate::protocols::tcp::header::fec_flag_bits::ENCODED,
            enc_seq: 0,
            enc_len: 8,
            ..Default::default()
        };
        let parity = xor_bytes(b"abcd", b"efgh");
        let status = decode(CodingType::XorAll, &option, &parity, 8, 4, &window, &[]);
        assert!(matches!(status, DecodeStatus::NoLoss));
    }

    #[test]
    fn recovers_missing_second_block() {
        let mut window = ReferenceWindow::default();
        window.retain(segment_at(0, b"abcd"));
        let option = ParsedFecOption {
            saw_fec: true,
            flags: crate::protocols::tcp::header::fec_flag_bits::ENCODED,
            enc_seq: 0,
            enc_len: 8,
            ..Default::default()
        };
        let parity = xor_bytes(b"abcd", b"efgh");
        let status = decode(CodingType::XorAll, &option, &parity, 4, 4, &window, &[]);
        match status {
            DecodeStatus::Recovered(ranges) => {
                assert_eq!(ranges.len(), 1);
                assert_eq!(ranges[0].seq, 4);
                assert_eq!(ranges[0].bytes, b"efgh");
            }
            other => panic!("expected recovery, got {other:?}"),
        }
    }

    #[test]
    fn two_missing_blocks_are_unrecoverable() {
        let window = ReferenceWindow::default();
        let option = ParsedFecOption {
            saw_fec: true,
            flags: crate::protocols::tcp::header::fec_flag_bits::ENCODED,
            enc_seq: 0,
            enc_len: 12,
            ..Default::default()
        };
        let parity = vec![0u8; 4];
        let status = decode(CodingType::XorAll, &option, &parity, 0, 4, &window, &[]);
        assert!(matches!(status, DecodeStatus::Unrecovered));
    }

    #[test]
    fn skip_coding_recovers_odd_block_over_ooo_queue() {
        let mut window = ReferenceWindow::default();
        window.retain(segment_at(0, b"abcd"));
        let skipped_unencoded = segment_at(4, b"ZZZZ");
        let option = ParsedFecOption {
            saw_fec: true,
            flags: crate::protocols::tcp::header::fec_flag_bits::ENCODED,
            enc_seq: 0,
            enc_len: 12,
            ..Default::default()
        };
        let parity = xor_bytes(b"abcd", b"ijkl");
        let status = decode(
            CodingType::XorSkip1,
            &option,
            &parity,
            4,
            4,
            &window,
            &[skipped_unencoded],
        );
        match status {
            DecodeStatus::Recovered(ranges) => {
                assert_eq!(ranges[0].seq, 8);
                assert_eq!(ranges[0].bytes, b"ijkl");
            }
            other => panic!("expected recovery, got {other:?}"),
        }
    }

    #[test]
    fn oversized_block_against_short_parity_is_unrecovered() {
        let window = ReferenceWindow::default();
        // enc_len claims a 6-byte block but the parity payload is only 4
        // bytes wide, so the block can never be XORed into acc.
        let option = ParsedFecOption {
            saw_fec: true,
            flags: crate::protocols::tcp::header::fec_flag_bits::ENCODED,
            enc_seq: 0,
            enc_len: 6,
            ..Default::default()
        };
        let parity = vec![0u8; 4];
        let status = decode(CodingType::XorAll, &option, &parity, 0, 6, &window, &[]);
        assert!(matches!(status, DecodeStatus::Unrecovered));
    }
}
