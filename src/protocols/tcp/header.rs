//! TCP header parsing and construction, including the small set of options
//! this crate understands: MSS, NOP, end-of-list, SACK-permitted, SACK block,
//! and the experimental FEC option this crate adds to the wire.
//!
//! The upstream header parser this was grown from rejected any segment whose
//! `data_offset` implied options (`data_offset != 20` was a hard error). A
//! host that wants to speak an FEC option at all needs somewhere to put it,
//! so this module adds a minimal options parser/serializer alongside the
//! fixed fields.

use crate::protocols::{ipv4::Ipv4Address, utility::Checksum};
use thiserror::Error;

/// The maximum transmission unit of the network carrying this connection.
pub type Mtu = u32;

/// The 16-bit experimental-option identifier (RFC 6994 "ExID") this crate
/// uses to mark its FEC option among other experimental options.
pub const TCPOPT_FEC_MAGIC: u16 = 0xFEC1;

/// TCP option kinds this crate recognizes.
const KIND_END_OF_LIST: u8 = 0;
const KIND_NOP: u8 = 1;
const KIND_MSS: u8 = 2;
const KIND_SACK_PERMITTED: u8 = 4;
const KIND_SACK: u8 = 5;
const KIND_EXPERIMENTAL: u8 = 253;

/// Bits of the FEC option's flags byte. See [`FecFlags`] for a friendlier
/// bitset wrapper.
pub mod fec_flag_bits {
    pub const ENCODED: u8 = 0b0001;
    pub const RECOVERY_SUCCESSFUL: u8 = 0b0010;
    pub const RECOVERY_CWR: u8 = 0b0100;
    pub const RECOVERY_FAILED: u8 = 0b1000;
}

/// A parsed TCP header, including any options carried on the segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub ctl: Control,
    pub wnd: u16,
    pub checksum: u16,
    pub urg: u16,
    pub options: Vec<TcpOption>,
}

impl TcpHeader {
    /// Parses a TCP header, including any options, validating the checksum
    /// against the IP pseudo-header.
    pub fn from_bytes(
        mut bytes: impl Iterator<Item = u8>,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
    ) -> Result<Self, TcpError> {
        let mut next = || -> Result<u8, TcpError> { bytes.next().ok_or(TcpError::HeaderTooShort) };
        let mut checksum = Checksum::new();

        let src_port = u16::from_be_bytes([next()?, next()?]);
        checksum.add_u16(src_port);

        let dst_port = u16::from_be_bytes([next()?, next()?]);
        checksum.add_u16(dst_port);

        let sequence_bytes = [next()?, next()?, next()?, next()?];
        let seq = u32::from_be_bytes(sequence_bytes);
        checksum.add_u32(sequence_bytes);

        let acknowledgement_bytes = [next()?, next()?, next()?, next()?];
        let ack = u32::from_be_bytes(acknowledgement_bytes);
        checksum.add_u32(acknowledgement_bytes);

        let offset_reserved_control = [next()?, next()?];
        checksum.add_u16(u16::from_be_bytes(offset_reserved_control));
        let data_offset = offset_reserved_control[0] >> 4;
        let ctl = Control::from(offset_reserved_control[1] & 0b11_1111);

        if data_offset < 5 {
            return Err(TcpError::InvalidDataOffset(data_offset));
        }
        let option_bytes_len = (data_offset as usize - 5) * 4;

        let wnd = u16::from_be_bytes([next()?, next()?]);
        checksum.add_u16(wnd);

        let expected_checksum = u16::from_be_bytes([next()?, next()?]);

        let urg = u16::from_be_bytes([next()?, next()?]);
        checksum.add_u16(urg);

        let mut option_bytes = Vec::with_capacity(option_bytes_len);
        for _ in 0..option_bytes_len {
            option_bytes.push(next()?);
        }
        {
            let mut iter = option_bytes.iter().copied();
            checksum.accumulate_remainder(&mut iter);
        }
        let options = parse_options(&option_bytes)?;

        let text_length = checksum.accumulate_remainder(&mut bytes);

        // Pseudo header stuff
        checksum.add_u32(src_address.into());
        checksum.add_u32(dst_address.into());
        // zero, TCP protocol number
        checksum.add_u8(0, super::super::ipv4::TCP_PROTOCOL_NUMBER);
        checksum.add_u16(20 + option_bytes_len as u16 + text_length);

        let checksum = checksum.as_u16();
        if expected_checksum == checksum {
            Ok(TcpHeader {
                src_port,
                dst_port,
                seq,
                ack,
                ctl,
                wnd,
                checksum,
                urg,
                options,
            })
        } else {
            Err(TcpError::InvalidChecksum {
                actual: checksum,
                expected: expected_checksum,
            })
        }
    }

    /// The FEC option carried on this segment, if any.
    pub fn fec_option(&self) -> Option<&FecOptionData> {
        self.options.iter().find_map(|option| match option {
            TcpOption::Fec(data) => Some(data),
            _ => None,
        })
    }

    /// The SACK blocks carried on this segment, if any.
    pub fn sack_blocks(&self) -> Option<&[(u32, u32)]> {
        self.options.iter().find_map(|option| match option {
            TcpOption::Sack(blocks) => Some(blocks.as_slice()),
            _ => None,
        })
    }

    /// Serializes the options to bytes, padding with NOPs to a multiple of 4.
    fn serialize_options(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for option in &self.options {
            option.serialize(&mut out);
        }
        while out.len() % 4 != 0 {
            out.push(KIND_NOP);
        }
        out
    }

    /// Serializes the full header and payload, recomputing the checksum.
    pub fn serialize(
        &self,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
        text: impl Iterator<Item = u8> + Clone,
        text_len: usize,
    ) -> Result<Vec<u8>, TcpError> {
        let option_bytes = self.serialize_options();
        let data_offset = 5 + option_bytes.len() / 4;
        if data_offset > 0xf {
            return Err(TcpError::OptionsTooLong);
        }

        let mut checksum = Checksum::new();
        checksum.add_u16(self.src_port);
        checksum.add_u16(self.dst_port);
        checksum.add_u32(self.seq.to_be_bytes());
        checksum.add_u32(self.ack.to_be_bytes());
        let offset_reserved_control = [(data_offset as u8) << 4, u8::from(self.ctl.clone())];
        checksum.add_u16(u16::from_be_bytes(offset_reserved_control));
        checksum.add_u16(self.wnd);
        checksum.add_u16(self.urg);
        {
            let mut iter = option_bytes.iter().copied();
            checksum.accumulate_remainder(&mut iter);
        }
        let mut text_iter = text.clone();
        let accumulated = checksum.accumulate_remainder(&mut text_iter);

        checksum.add_u32(src_address.into());
        checksum.add_u32(dst_address.into());
        checksum.add_u8(0, super::super::ipv4::TCP_PROTOCOL_NUMBER);
        checksum.add_u16(20 + option_bytes.len() as u16 + accumulated);
        let checksum = checksum.as_u16();

        let mut out = Vec::with_capacity(20 + option_bytes.len() + text_len);
        out.extend(self.src_port.to_be_bytes());
        out.extend(self.dst_port.to_be_bytes());
        out.extend(self.seq.to_be_bytes());
        out.extend(self.ack.to_be_bytes());
        out.extend(offset_reserved_control);
        out.extend(self.wnd.to_be_bytes());
        out.extend(checksum.to_be_bytes());
        out.extend(self.urg.to_be_bytes());
        out.extend(option_bytes);
        out.extend(text.take(text_len));
        Ok(out)
    }
}

/// A TCP option. Unrecognized option kinds are dropped during parsing rather
/// than rejected, since nothing in this crate needs to round-trip an option
/// it doesn't understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpOption {
    Nop,
    Mss(u16),
    SackPermitted,
    Sack(Vec<(u32, u32)>),
    Fec(FecOptionData),
}

impl TcpOption {
    fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            TcpOption::Nop => out.push(KIND_NOP),
            TcpOption::Mss(mss) => {
                out.push(KIND_MSS);
                out.push(4);
                out.extend(mss.to_be_bytes());
            }
            TcpOption::SackPermitted => {
                out.push(KIND_SACK_PERMITTED);
                out.push(2);
            }
            TcpOption::Sack(blocks) => {
                out.push(KIND_SACK);
                out.push((2 + 8 * blocks.len()) as u8);
                for (left, right) in blocks {
                    out.extend(left.to_be_bytes());
                    out.extend(right.to_be_bytes());
                }
            }
            TcpOption::Fec(data) => data.serialize(out),
        }
    }
}

/// The FEC option's payload: its flags byte, and, for the long form, the
/// encoded- or lost-range descriptor that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecOptionData {
    pub flags: u8,
    /// `Some((seq, len))` for the long form. `len` only ever uses the low 24
    /// bits on the wire.
    pub range: Option<(u32, u32)>,
}

impl FecOptionData {
    pub const SHORT_LEN: u8 = 5;
    pub const LONG_LEN: u8 = 12;

    fn serialize(&self, out: &mut Vec<u8>) {
        out.push(KIND_EXPERIMENTAL);
        match self.range {
            None => {
                out.push(Self::SHORT_LEN);
                out.extend(TCPOPT_FEC_MAGIC.to_be_bytes());
                out.push(self.flags);
            }
            Some((seq, len)) => {
                out.push(Self::LONG_LEN);
                out.extend(TCPOPT_FEC_MAGIC.to_be_bytes());
                out.push(self.flags);
                out.extend(seq.to_be_bytes());
                let len = len & 0x00ff_ffff;
                out.extend(&len.to_be_bytes()[1..4]);
            }
        }
    }
}

fn parse_options(mut bytes: &[u8]) -> Result<Vec<TcpOption>, TcpError> {
    let mut options = Vec::new();
    while !bytes.is_empty() {
        let kind = bytes[0];
        match kind {
            KIND_END_OF_LIST => break,
            KIND_NOP => {
                options.push(TcpOption::Nop);
                bytes = &bytes[1..];
            }
            _ => {
                let len = *bytes.get(1).ok_or(TcpError::MalformedOption)? as usize;
                if len < 2 || len > bytes.len() {
                    return Err(TcpError::MalformedOption);
                }
                let body = &bytes[2..len];
                match kind {
                    KIND_MSS if len == 4 => {
                        options.push(TcpOption::Mss(u16::from_be_bytes([body[0], body[1]])));
                    }
                    KIND_SACK_PERMITTED if len == 2 => {
                        options.push(TcpOption::SackPermitted);
                    }
                    KIND_SACK if len >= 2 && (len - 2) % 8 == 0 => {
                        let blocks = body
                            .chunks_exact(8)
                            .map(|chunk| {
                                let left = u32::from_be_bytes(chunk[0..4].try_into().unwrap());
                                let right = u32::from_be_bytes(chunk[4..8].try_into().unwrap());
                                (left, right)
                            })
                            .collect();
                        options.push(TcpOption::Sack(blocks));
                    }
                    KIND_EXPERIMENTAL
                        if len as u8 == FecOptionData::SHORT_LEN
                            && body.len() >= 3
                            && u16::from_be_bytes([body[0], body[1]]) == TCPOPT_FEC_MAGIC =>
                    {
                        options.push(TcpOption::Fec(FecOptionData {
                            flags: body[2],
                            range: None,
                        }));
                    }
                    KIND_EXPERIMENTAL
                        if len as u8 == FecOptionData::LONG_LEN
                            && body.len() >= 10
                            && u16::from_be_bytes([body[0], body[1]]) == TCPOPT_FEC_MAGIC =>
                    {
                        let flags = body[2];
                        let seq = u32::from_be_bytes(body[3..7].try_into().unwrap());
                        let len24 = u32::from_be_bytes([0, body[7], body[8], body[9]]);
                        options.push(TcpOption::Fec(FecOptionData {
                            flags,
                            range: Some((seq, len24)),
                        }));
                    }
                    // Unrecognized option kind (or malformed known kind):
                    // skip it, it was already validated to be well-formed
                    // enough to have a length byte.
                    _ => {}
                }
                bytes = &bytes[len..];
            }
        }
    }
    Ok(options)
}

/// Rewrites a long-form FEC option in place to the short form, clearing the
/// ENCODED flag while preserving the others, and pads with NOPs so the
/// header's data offset does not change.
///
/// Returns an error if no long-form FEC option is present.
pub fn rewrite_fec_long_to_short(options: &mut Vec<TcpOption>) -> Result<(), TcpError> {
    let index = options
        .iter()
        .position(|option| matches!(option, TcpOption::Fec(data) if data.range.is_some()))
        .ok_or(TcpError::MissingFecOption)?;

    let flags = match &options[index] {
        TcpOption::Fec(data) => data.flags & !fec_flag_bits::ENCODED,
        _ => unreachable!(),
    };

    let pad_bytes = (FecOptionData::LONG_LEN - FecOptionData::SHORT_LEN) as usize;
    options[index] = TcpOption::Fec(FecOptionData { flags, range: None });
    for _ in 0..pad_bytes {
        options.insert(index + 1, TcpOption::Nop);
    }
    Ok(())
}

/// The control bits of a TCP header (URG, ACK, PSH, RST, SYN, FIN).
#[derive(Debug, Default, Clone, Hash, PartialEq, Eq)]
pub struct Control(u8);

impl Control {
    pub fn new(urg: bool, ack: bool, psh: bool, rst: bool, syn: bool, fin: bool) -> Self {
        Self(
            urg as u8
                | (ack as u8) << 1
                | (psh as u8) << 2
                | (rst as u8) << 3
                | (syn as u8) << 4
                | (fin as u8) << 5,
        )
    }

    /// Urgent Pointer field significant
    pub fn urg(&self) -> bool {
        self.0 & 0b1 == 1
    }

    /// Acknowledgment field significant
    pub fn ack(&self) -> bool {
        (self.0 >> 1) & 0b1 == 1
    }

    /// Push Function
    pub fn psh(&self) -> bool {
        (self.0 >> 2) & 0b1 == 1
    }

    /// Reset the connection
    pub fn rst(&self) -> bool {
        (self.0 >> 3) & 0b1 == 1
    }

    /// Synchronize sequence numbers
    pub fn syn(&self) -> bool {
        (self.0 >> 4) & 0b1 == 1
    }

    /// No more data from sender
    pub fn fin(&self) -> bool {
        (self.0 >> 5) & 0b1 == 1
    }

    fn set_bit(&mut self, bit: u8, value: bool) {
        if value {
            self.0 |= 1 << bit;
        } else {
            self.0 &= !(1 << bit);
        }
    }

    pub fn set_syn(&mut self, value: bool) {
        self.set_bit(4, value);
    }

    pub fn set_ack(&mut self, value: bool) {
        self.set_bit(1, value);
    }
}

impl From<u8> for Control {
    fn from(n: u8) -> Self {
        Self(n)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

/// Builds up a [`TcpHeader`] for transmission.
#[derive(Debug, Clone)]
pub struct TcpHeaderBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: Option<u32>,
    ctl: Control,
    wnd: u16,
    options: Vec<TcpOption>,
}

impl TcpHeaderBuilder {
    pub fn new(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            ack: None,
            ctl: Control::default(),
            wnd: 0,
            options: Vec::new(),
        }
    }

    pub fn ack(mut self, ack: u32) -> Self {
        self.ack = Some(ack);
        self.ctl.set_bit(1, true);
        self
    }

    pub fn syn(mut self) -> Self {
        self.ctl.set_bit(4, true);
        self
    }

    pub fn fin(mut self) -> Self {
        self.ctl.set_bit(5, true);
        self
    }

    pub fn rst(mut self) -> Self {
        self.ctl.set_bit(3, true);
        self
    }

    pub fn psh(mut self) -> Self {
        self.ctl.set_bit(2, true);
        self
    }

    pub fn wnd(mut self, wnd: u16) -> Self {
        self.wnd = wnd;
        self
    }

    pub fn option(mut self, option: TcpOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn build(
        self,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
        text: impl Iterator<Item = u8> + Clone,
        text_len: usize,
    ) -> Result<TcpHeader, TcpError> {
        let header = TcpHeader {
            src_port: self.src_port,
            dst_port: self.dst_port,
            seq: self.seq,
            ack: self.ack.unwrap_or(0),
            ctl: self.ctl,
            wnd: self.wnd,
            checksum: 0,
            urg: 0,
            options: self.options,
        };
        // Recompute the checksum over the fully assembled header.
        let bytes = header.serialize(src_address, dst_address, text, text_len)?;
        let checksum = u16::from_be_bytes([bytes[16], bytes[17]]);
        Ok(TcpHeader { checksum, ..header })
    }
}

/// Errors that can occur while parsing or building a TCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TcpError {
    #[error("The header is too short")]
    HeaderTooShort,
    #[error("Invalid data offset: {0}")]
    InvalidDataOffset(u8),
    #[error("Checksum invalid. Actual: {actual}, expected: {expected}")]
    InvalidChecksum { actual: u16, expected: u16 },
    #[error("A TCP option was malformed")]
    MalformedOption,
    #[error("No long-form FEC option is present to rewrite")]
    MissingFecOption,
    #[error("Too many option bytes to fit in the header's data offset")]
    OptionsTooLong,
}
