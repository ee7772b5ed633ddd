//! Parses the FEC option carried on an incoming segment into a transient,
//! per-segment view of its flags and ranges. See SPEC_FULL.md §4.1.

use crate::protocols::tcp::header::{fec_flag_bits, FecOptionData, TcpHeader};

/// The parsed FEC option state for one incoming segment. Exists only for the
/// duration of processing that segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedFecOption {
    /// Whether an FEC option was present at all.
    pub saw_fec: bool,
    pub flags: u8,
    /// Base sequence number of the encoded range, when `ENCODED` is set.
    pub enc_seq: u32,
    /// Length in bytes of the encoded range, when `ENCODED` is set.
    pub enc_len: u32,
    /// Sender-asserted loss range, when `RECOVERY_FAILED` is set.
    pub lost_seq: u32,
    pub lost_len: u32,
}

impl ParsedFecOption {
    pub fn encoded(&self) -> bool {
        self.saw_fec && self.flags & fec_flag_bits::ENCODED != 0
    }

    pub fn recovery_successful(&self) -> bool {
        self.saw_fec && self.flags & fec_flag_bits::RECOVERY_SUCCESSFUL != 0
    }

    pub fn recovery_cwr(&self) -> bool {
        self.saw_fec && self.flags & fec_flag_bits::RECOVERY_CWR != 0
    }

    pub fn recovery_failed(&self) -> bool {
        self.saw_fec && self.flags & fec_flag_bits::RECOVERY_FAILED != 0
    }
}

/// Reads the FEC option, if any, off a parsed TCP header.
///
/// The long form carries `(seq, len)` meaning `enc_seq`/`enc_len` ordinarily,
/// or `lost_seq`/`lost_len` when `RECOVERY_FAILED` is set instead of
/// `ENCODED` — both share the same wire layout (see SPEC_FULL.md §6), so the
/// flag byte alone disambiguates which the range field means.
pub fn parse_fec_option(header: &TcpHeader) -> ParsedFecOption {
    let Some(&FecOptionData { flags, range }) = header.fec_option() else {
        return ParsedFecOption::default();
    };

    let mut parsed = ParsedFecOption {
        saw_fec: true,
        flags,
        ..Default::default()
    };

    match range {
        Some((seq, len)) if flags & fec_flag_bits::RECOVERY_FAILED != 0 => {
            parsed.lost_seq = seq;
            parsed.lost_len = len;
        }
        Some((seq, len)) => {
            parsed.enc_seq = seq;
            parsed.enc_len = len;
        }
        None => {}
    }

    parsed
}
