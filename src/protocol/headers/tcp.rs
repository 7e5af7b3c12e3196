use std::io;

use super::{Protocol, checksum_accumulate, checksum_finish};
use crate::{Error, HeaderError, ParseError};

/// Maximum Segment Size (`MSS`): the largest payload carried by one outbound
/// segment.
///
/// 1500 (Ethernet MTU) - 20 (IPv4 header) - 20 (TCP header).
pub const MSS: usize = 1460;

/// TCP Segment Header.
///
/// RFC 793 (3.1)
///
/// ```text
///   0                   1                   2                   3
///     0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |          Source Port          |       Destination Port        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                        Sequence Number                        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Acknowledgment Number                      |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |  Data |           |U|A|P|R|S|F|                               |
///    | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
///    |       |           |G|K|H|T|N|N|                               |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |           Checksum            |         Urgent Pointer        |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                    Options                    |    Padding    |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///    |                             data                              |
///    +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TcpHeader {
    /// The source port number.
    src_port: u16,
    /// The destination port number.
    dst_port: u16,
    /// The sequence number of the first data octet in this segment (except
    /// when SYN is present, in which case it is the initial sequence number).
    seq_number: u32,
    /// If the ACK control bit is set, the next sequence number the sender of
    /// the segment is expecting to receive.
    ack_number: u32,
    /// Data offset (4 bits, header length in 32-bit words), reserved (6 bits),
    /// and the URG/ACK/PSH/RST/SYN/FIN control bits (6 bits).
    offset_and_control_bits: u16,
    /// Number of data octets the sender of this segment is willing to accept.
    window: u16,
    /// One's complement of the one's complement sum of the pseudo header, the
    /// TCP header, and the payload.
    ///
    /// ```text
    ///        +--------+--------+--------+--------+
    ///        |           Source Address          |
    ///        +--------+--------+--------+--------+
    ///        |         Destination Address       |
    ///        +--------+--------+--------+--------+
    ///        |  zero  |  PTCL  |    TCP Length   |
    ///        +--------+--------+--------+--------+
    /// ```
    checksum: u16,
    /// Positive offset from the sequence number of this segment to urgent data.
    urgent_pointer: u16,
    /// Options occupying the space between the fixed header and the data.
    options: TcpOptions,
}

impl TcpHeader {
    /// Minimum length of a TCP header in bytes.
    pub const MIN_HEADER_LEN: u16 = 20;

    /// Maximum length of a TCP header in bytes (data offset of 15 words).
    pub const MAX_HEADER_LEN: u16 = 60;

    /// Minimum data offset of a TCP header.
    pub const MIN_DATA_OFFSET: u16 = 5;

    /// Maximum data offset of a TCP header.
    pub const MAX_DATA_OFFSET: u16 = 15;

    /// Creates a new TCP header with the specified source and destination
    /// ports, sequence number, and window size, with no control bits set.
    pub fn new(src_port: u16, dst_port: u16, seq_number: u32, window: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_number,
            window,
            ..Default::default()
        }
    }

    /// Returns the `source port` field of the TCP header.
    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    /// Returns the `destination port` field of the TCP header.
    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    /// Returns the `sequence number` field of the TCP header.
    pub fn seq_number(&self) -> u32 {
        self.seq_number
    }

    /// Returns the `acknowledgment number` field of the TCP header.
    pub fn ack_number(&self) -> u32 {
        self.ack_number
    }

    /// Sets the `acknowledgment number` field of the TCP header.
    pub fn set_ack_number(&mut self, ack: u32) {
        self.ack_number = ack;
    }

    /// Returns the `data offset` field of the TCP header, in 32-bit words.
    ///
    /// To get the header length (including options) in bytes, use
    /// [TcpHeader::header_len].
    pub fn data_offset(&self) -> u8 {
        (self.offset_and_control_bits >> 12) as u8
    }

    /// Returns `true` if the URG (Urgent) control bit is set.
    pub fn urg(&self) -> bool {
        (self.offset_and_control_bits >> 5) & 1 == 1
    }

    /// Returns `true` if the ACK (Acknowledgment) control bit is set.
    pub fn ack(&self) -> bool {
        (self.offset_and_control_bits >> 4) & 1 == 1
    }

    /// Sets the ACK (Acknowledgment) control bit.
    pub fn set_ack(&mut self) {
        self.offset_and_control_bits |= 1 << 4;
    }

    /// Returns `true` if the PSH (Push) control bit is set.
    pub fn psh(&self) -> bool {
        (self.offset_and_control_bits >> 3) & 1 == 1
    }

    /// Sets the PSH (Push) control bit.
    pub fn set_psh(&mut self) {
        self.offset_and_control_bits |= 1 << 3;
    }

    /// Returns `true` if the RST (Reset) control bit is set.
    pub fn rst(&self) -> bool {
        (self.offset_and_control_bits >> 2) & 1 == 1
    }

    /// Returns `true` if the SYN (Synchronize) control bit is set.
    pub fn syn(&self) -> bool {
        (self.offset_and_control_bits >> 1) & 1 == 1
    }

    /// Sets the SYN (Synchronize) control bit.
    pub fn set_syn(&mut self) {
        self.offset_and_control_bits |= 1 << 1;
    }

    /// Returns `true` if the FIN (Finish) control bit is set.
    pub fn fin(&self) -> bool {
        self.offset_and_control_bits & 1 == 1
    }

    /// Sets the FIN (Finish) control bit.
    pub fn set_fin(&mut self) {
        self.offset_and_control_bits |= 1;
    }

    /// Returns the `window` field of the TCP header.
    pub fn window(&self) -> u16 {
        self.window
    }

    /// Returns the `checksum` field of the TCP header.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Computes and updates the `checksum` field for a segment carrying
    /// `payload` from `src` to `dst`.
    pub fn set_checksum(&mut self, src: [u8; 4], dst: [u8; 4], payload: &[u8]) {
        self.checksum = self.compute_checksum(src, dst, payload);
    }

    /// Returns `true` if the `checksum` field is valid for a segment carrying
    /// `payload` from `src` to `dst`.
    pub fn is_valid_checksum(&self, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> bool {
        self.checksum == self.compute_checksum(src, dst, payload)
    }

    /// Returns the `urgent pointer` field of the TCP header.
    pub fn urgent_pointer(&self) -> u16 {
        self.urgent_pointer
    }

    /// Returns the `options` field of the TCP header.
    pub fn options(&self) -> TcpOptions {
        self.options
    }

    /// Appends the `Maximum Segment Size` (MSS) option and grows the data
    /// offset accordingly.
    ///
    /// # Errors
    ///
    /// Returns an error if the options buffer lacks sufficient space to append
    /// the MSS, or if the provided MSS value is invalid.
    pub fn set_option_mss(&mut self, mss: u16) -> crate::Result<()> {
        let before = self.options.len();
        self.options.set_mss(mss)?;

        let added_words = ((self.options.len() - before) >> 2) as u16;
        let data_offset = self.data_offset() as u16 + added_words;

        // Keep the reserved and control bits, replace the data offset.
        self.offset_and_control_bits = (self.offset_and_control_bits & 0x0FFF) | (data_offset << 12);

        Ok(())
    }

    /// Returns the length of the TCP header in bytes, including options.
    ///
    /// This is the offset of the payload within a segment:
    /// `4 * data_offset`.
    pub fn header_len(&self) -> usize {
        Self::MIN_HEADER_LEN as usize + self.options.len()
    }

    /// Returns the computed checksum of the TCP header for a segment carrying
    /// `payload` from `src` to `dst`, treating the checksum field as zero.
    pub fn compute_checksum(&self, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> u16 {
        let (mut raw_header, nbytes) = self.to_be_bytes();

        raw_header[16] = 0x00;
        raw_header[17] = 0x00;

        let tcp_len = self.header_len() + payload.len();

        let mut sum = pseudo_header_sum(src, dst, tcp_len);
        sum = checksum_accumulate(sum, &raw_header[..nbytes]);
        sum = checksum_accumulate(sum, payload);

        checksum_finish(sum)
    }

    /// Returns the memory representation of the TCP header as a byte array in
    /// big-endian (network) byte order.
    ///
    /// A buffer of size `TcpHeader::MAX_HEADER_LEN` is used as the byte array,
    /// so the number of bytes written is also returned.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> ([u8; Self::MAX_HEADER_LEN as usize], usize) {
        let mut raw_header = [0u8; Self::MAX_HEADER_LEN as usize];
        let size = self.header_len();

        raw_header[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        raw_header[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        raw_header[4..8].copy_from_slice(&self.seq_number.to_be_bytes());
        raw_header[8..12].copy_from_slice(&self.ack_number.to_be_bytes());
        raw_header[12..14].copy_from_slice(&self.offset_and_control_bits.to_be_bytes());
        raw_header[14..16].copy_from_slice(&self.window.to_be_bytes());
        raw_header[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        raw_header[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());
        raw_header[20..size].copy_from_slice(self.options.as_slice());

        (raw_header, size)
    }

    /// Writes the TCP header to the given output stream.
    ///
    /// The caller must ensure the checksum is computed and updated before
    /// writing the header.
    pub fn write<T: io::Write>(&self, output: &mut T) -> crate::Result<()> {
        let (raw_header, nbytes) = self.to_be_bytes();
        output.write_all(&raw_header[..nbytes])?;

        Ok(())
    }
}

impl TryFrom<&[u8]> for TcpHeader {
    type Error = Error;

    /// Parses the header at the start of `segment`. Any bytes past the length
    /// indicated by the data offset are payload and are not inspected.
    fn try_from(segment: &[u8]) -> Result<Self, Self::Error> {
        if segment.len() < Self::MIN_HEADER_LEN as usize {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: segment.len(),
                min: Self::MIN_HEADER_LEN,
                max: Self::MAX_HEADER_LEN,
            }));
        }

        let offset_and_control_bits = u16::from_be_bytes([segment[12], segment[13]]);
        let data_offset = offset_and_control_bits >> 12;

        // A 4-bit field can never exceed MAX_DATA_OFFSET.
        if data_offset < Self::MIN_DATA_OFFSET {
            return Err(Error::Parse(ParseError::InvalidDataOffset {
                provided: data_offset,
                min: Self::MIN_DATA_OFFSET,
                max: Self::MAX_DATA_OFFSET,
            }));
        }

        let header_len = data_offset << 2;

        if header_len as usize > segment.len() {
            return Err(Error::Parse(ParseError::HeaderLengthMismatch {
                provided: segment.len(),
                expected: header_len,
            }));
        }

        Ok(Self {
            src_port: u16::from_be_bytes([segment[0], segment[1]]),
            dst_port: u16::from_be_bytes([segment[2], segment[3]]),
            seq_number: u32::from_be_bytes([segment[4], segment[5], segment[6], segment[7]]),
            ack_number: u32::from_be_bytes([segment[8], segment[9], segment[10], segment[11]]),
            offset_and_control_bits,
            window: u16::from_be_bytes([segment[14], segment[15]]),
            checksum: u16::from_be_bytes([segment[16], segment[17]]),
            urgent_pointer: u16::from_be_bytes([segment[18], segment[19]]),
            options: TcpOptions::from(&segment[Self::MIN_HEADER_LEN as usize..header_len as usize]),
        })
    }
}

impl Default for TcpHeader {
    fn default() -> Self {
        Self {
            src_port: 0,
            dst_port: 0,
            seq_number: 0,
            ack_number: 0,
            // Data offset = 5, reserved and control bits cleared.
            offset_and_control_bits: 0b0101_000000_000000,
            window: 0,
            checksum: 0,
            urgent_pointer: 0,
            options: Default::default(),
        }
    }
}

/// Returns the one's complement sum over the entirety of a wire `segment`
/// (header, options, payload, and the checksum field itself) together with the
/// pseudo header for `src` and `dst`.
///
/// A segment whose checksum field is correct yields `0`.
pub fn segment_checksum(segment: &[u8], src: [u8; 4], dst: [u8; 4]) -> u16 {
    let sum = pseudo_header_sum(src, dst, segment.len());
    checksum_finish(checksum_accumulate(sum, segment))
}

/// Sums the RFC 793 pseudo header conceptually prefixed to the TCP header.
fn pseudo_header_sum(src: [u8; 4], dst: [u8; 4], tcp_len: usize) -> u32 {
    let mut pseudo_header = [0u8; 12];

    pseudo_header[0..4].copy_from_slice(&src);
    pseudo_header[4..8].copy_from_slice(&dst);
    pseudo_header[9] = Protocol::TCP.into();
    pseudo_header[10..12].copy_from_slice(&(tcp_len as u16).to_be_bytes());

    checksum_accumulate(0, &pseudo_header)
}

/// Options within a TCP header.
#[derive(Debug, Clone, Copy)]
pub struct TcpOptions {
    /// Number of bytes occupying the buffer, always a multiple of 4.
    len: usize,
    /// Fixed-size array of raw options bytes.
    buf: [u8; Self::MAX_OPTIONS_LEN],
}

impl TcpOptions {
    /// Maximum length of TCP options in bytes.
    pub const MAX_OPTIONS_LEN: usize = 40;

    /// Length of MSS option in bytes.
    pub const MSS_LEN: usize = 4;

    /// Creates a new empty TCP options.
    pub fn new() -> Self {
        Self {
            len: 0,
            buf: [0u8; Self::MAX_OPTIONS_LEN],
        }
    }

    /// Returns the Maximum Segment Size (MSS) value from the TCP options, if
    /// present.
    pub fn mss(&self) -> Option<u16> {
        let opts = self.as_slice();
        let mut i = 0;

        while i < opts.len() {
            match OptionKind::from(opts[i]) {
                OptionKind::EOL => return None,
                OptionKind::NOP => i += 1,
                OptionKind::MSS => {
                    // Length for MSS option must be 0x04 (4 bytes).
                    if opts.get(i + 1) != Some(&0x04) || i + Self::MSS_LEN > opts.len() {
                        return None;
                    }

                    return Some(u16::from_be_bytes([opts[i + 2], opts[i + 3]]));
                }
                OptionKind::Unknown(_) => {
                    // Every other option carries its length in the second
                    // octet.
                    match opts.get(i + 1) {
                        Some(&len) if len >= 2 => i += len as usize,
                        _ => return None,
                    }
                }
            }
        }

        None
    }

    /// Appends the Maximum Segment Size (MSS) option, unless one is already
    /// present.
    ///
    /// # Errors
    ///
    /// Returns an error if the options buffer lacks sufficient space to append
    /// the MSS, or if the provided MSS value is 0.
    pub fn set_mss(&mut self, mss: u16) -> crate::Result<()> {
        if self.mss().is_some() {
            return Ok(());
        }

        if mss == 0 {
            return Err(Error::Header(HeaderError::InvalidMssOption));
        }

        let opts_len = self.len();

        if opts_len + Self::MSS_LEN > Self::MAX_OPTIONS_LEN {
            return Err(Error::Header(HeaderError::InsufficientOptionSpace {
                attempted_len: opts_len + Self::MSS_LEN,
                current_len: opts_len,
                max_len: Self::MAX_OPTIONS_LEN,
            }));
        }

        self.buf[opts_len] = u8::from(OptionKind::MSS);
        self.buf[opts_len + 1] = 0x04;
        self.buf[opts_len + 2..opts_len + Self::MSS_LEN].copy_from_slice(&mss.to_be_bytes());
        self.len += Self::MSS_LEN;

        Ok(())
    }

    /// Returns the length of the TCP options in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the TCP options contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns an immutable slice containing the TCP options.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl From<&[u8]> for TcpOptions {
    /// Copies raw option bytes. Callers slice by the data offset, so the
    /// length is a multiple of 4 and at most [TcpOptions::MAX_OPTIONS_LEN].
    fn from(opts: &[u8]) -> Self {
        let len = opts.len().min(Self::MAX_OPTIONS_LEN);
        let mut buf = [0u8; Self::MAX_OPTIONS_LEN];

        buf[..len].copy_from_slice(&opts[..len]);

        Self { len, buf }
    }
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Kinds of TCP options (RFC 793 3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum OptionKind {
    /// End of option list.
    EOL,
    /// No-Operation, used for alignment between options.
    NOP,
    /// Maximum Segment Size.
    ///
    /// ```text
    ///        +--------+--------+---------+--------+
    ///        |00000010|00000100|   max seg size   |
    ///        +--------+--------+---------+--------+
    ///         Kind=2   Length=4
    /// ```
    MSS,
    /// Any other option kind, skipped using its length octet.
    Unknown(u8),
}

impl From<u8> for OptionKind {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::EOL,
            1 => Self::NOP,
            2 => Self::MSS,
            _ => Self::Unknown(val),
        }
    }
}

impl From<OptionKind> for u8 {
    fn from(kind: OptionKind) -> u8 {
        match kind {
            OptionKind::EOL => 0,
            OptionKind::NOP => 1,
            OptionKind::MSS => 2,
            OptionKind::Unknown(val) => val,
        }
    }
}
