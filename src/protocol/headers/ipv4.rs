use std::io;

use super::{checksum_accumulate, checksum_finish};
use crate::{Error, HeaderError, ParseError};

/// IPv4 Datagram Header.
///
/// Only used by the TUN transport to unwrap inbound TCP segments and to wrap
/// outbound ones. IPv4 options are not supported.
///
/// RFC 791 (3.1)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |Type of Service|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Source Address                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Destination Address                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Version (high 4 bits) and IHL in 32-bit words (low 4 bits).
    version_ihl: u8,
    /// Type of service.
    tos: u8,
    /// Length of the datagram in octets, including header and payload.
    total_len: u16,
    /// Identifying value used when assembling fragments.
    id: u16,
    /// Reserved/DF/MF bits followed by a 13-bit fragment offset in units of
    /// 8 octets.
    flags_and_offset: u16,
    /// Maximum time the datagram may remain in the internet system.
    ttl: u8,
    /// Next level protocol carried in the payload.
    protocol: Protocol,
    /// Checksum over the header only.
    header_checksum: u16,
    /// The source address.
    src_addr: [u8; 4],
    /// The destination address.
    dst_addr: [u8; 4],
}

impl Ipv4Header {
    /// Length of an IPv4 header without options, in bytes.
    pub const MIN_HEADER_LEN: u16 = 20;

    /// Largest header length representable by the 4-bit IHL, in bytes.
    pub const MAX_HEADER_LEN: u16 = 60;

    /// Maximum payload length in bytes, accounting for the header length.
    pub const MAX_PAYLOAD_LEN: u16 = u16::MAX - Self::MIN_HEADER_LEN;

    /// Creates a new IPv4 header with the specified source and destination
    /// addresses, payload length, TTL, and protocol. The `DF` bit is set and the
    /// header checksum is left zeroed.
    ///
    /// # Errors
    ///
    /// Returns an error if the `payload_len` exceeds the maximum allowed
    /// payload length.
    pub fn new(
        src: [u8; 4],
        dst: [u8; 4],
        payload_len: usize,
        ttl: u8,
        protocol: Protocol,
    ) -> crate::Result<Self> {
        let mut header = Self {
            ttl,
            protocol,
            src_addr: src,
            dst_addr: dst,
            ..Default::default()
        };

        header.set_payload_len(payload_len)?;

        Ok(header)
    }

    /// Returns the `version` field of the IPv4 header.
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Returns the `IHL` field of the IPv4 header, in 32-bit words.
    pub fn ihl(&self) -> u8 {
        self.version_ihl & 0xF
    }

    /// Returns the `total length` field of the IPv4 header.
    pub fn total_len(&self) -> u16 {
        self.total_len
    }

    /// Sets the `total length` field of the IPv4 header given a payload length.
    ///
    /// # Errors
    ///
    /// Returns an error if the `payload_len` exceeds the maximum allowed
    /// payload length.
    pub fn set_payload_len(&mut self, payload_len: usize) -> crate::Result<()> {
        if payload_len > Self::MAX_PAYLOAD_LEN as usize {
            return Err(Error::Header(HeaderError::PayloadTooLarge {
                provided: payload_len,
                max: Self::MAX_PAYLOAD_LEN,
            }));
        }

        self.total_len = Self::MIN_HEADER_LEN + payload_len as u16;

        Ok(())
    }

    /// Returns `true` if the `DF` (Don't Fragment) bit is set.
    pub fn dont_fragment(&self) -> bool {
        (self.flags_and_offset >> 14) & 1 == 1
    }

    /// Returns `true` if the `MF` (More Fragments) bit is set.
    pub fn more_fragments(&self) -> bool {
        (self.flags_and_offset >> 13) & 1 == 1
    }

    /// Returns the `fragment offset` field of the IPv4 header.
    pub fn fragment_offset(&self) -> u16 {
        self.flags_and_offset & 0x1FFF
    }

    /// Returns `true` if this datagram is one piece of a fragmented datagram.
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset() != 0
    }

    /// Returns the `time to live` field of the IPv4 header.
    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    /// Returns the `protocol` field of the IPv4 header.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Returns the `header checksum` field of the IPv4 header.
    pub fn header_checksum(&self) -> u16 {
        self.header_checksum
    }

    /// Computes and updates the header checksum for the IPv4 header.
    pub fn set_header_checksum(&mut self) {
        self.header_checksum = self.compute_header_checksum();
    }

    /// Returns `true` if the IPv4 header checksum is valid.
    pub fn is_valid_checksum(&self) -> bool {
        self.header_checksum == self.compute_header_checksum()
    }

    /// Returns the `source address` field of the IPv4 header.
    pub fn src(&self) -> [u8; 4] {
        self.src_addr
    }

    /// Returns the `destination address` field of the IPv4 header.
    pub fn dst(&self) -> [u8; 4] {
        self.dst_addr
    }

    /// Returns the length of the IPv4 header in bytes, not including payload.
    pub fn header_len(&self) -> usize {
        Self::MIN_HEADER_LEN as usize
    }

    /// Returns the payload length of the IPv4 datagram.
    pub fn payload_len(&self) -> usize {
        // total_len >= IHL << 2 is checked when parsing.
        (self.total_len - Self::MIN_HEADER_LEN) as usize
    }

    /// Returns the computed checksum of the IPv4 header, treating the checksum
    /// field as zero.
    pub fn compute_header_checksum(&self) -> u16 {
        let mut header_bytes = self.to_be_bytes();

        header_bytes[10] = 0x00;
        header_bytes[11] = 0x00;

        checksum_finish(checksum_accumulate(0, &header_bytes))
    }

    /// Returns the memory representation of the IPv4 header as a byte array in
    /// big-endian (network) byte order.
    #[allow(clippy::wrong_self_convention)]
    pub fn to_be_bytes(&self) -> [u8; Self::MIN_HEADER_LEN as usize] {
        let mut raw_header = [0u8; Self::MIN_HEADER_LEN as usize];

        raw_header[0] = self.version_ihl;
        raw_header[1] = self.tos;
        raw_header[2..4].copy_from_slice(&self.total_len.to_be_bytes());
        raw_header[4..6].copy_from_slice(&self.id.to_be_bytes());
        raw_header[6..8].copy_from_slice(&self.flags_and_offset.to_be_bytes());
        raw_header[8] = self.ttl;
        raw_header[9] = self.protocol.into();
        raw_header[10..12].copy_from_slice(&self.header_checksum.to_be_bytes());
        raw_header[12..16].copy_from_slice(&self.src_addr);
        raw_header[16..20].copy_from_slice(&self.dst_addr);

        raw_header
    }

    /// Writes the IPv4 header to the given output stream.
    ///
    /// The caller must ensure the checksum is computed and updated before
    /// writing the header.
    pub fn write<T: io::Write>(&self, output: &mut T) -> crate::Result<()> {
        Ok(output.write_all(&self.to_be_bytes())?)
    }
}

impl TryFrom<&[u8]> for Ipv4Header {
    type Error = Error;

    /// Parses the header at the start of `packet`. The total length field must
    /// not exceed the length of `packet`.
    fn try_from(packet: &[u8]) -> Result<Self, Self::Error> {
        if packet.len() < Self::MIN_HEADER_LEN as usize {
            return Err(Error::Parse(ParseError::InvalidBufferLength {
                provided: packet.len(),
                min: Self::MIN_HEADER_LEN,
                max: Self::MAX_HEADER_LEN,
            }));
        }

        let version_ihl = packet[0];

        if (version_ihl >> 4) != 4 {
            return Err(Error::Parse(ParseError::InvalidVersion {
                provided: version_ihl >> 4,
                expected: 4,
            }));
        }

        if (version_ihl & 0xF) != 5 {
            return Err(Error::Parse(ParseError::InvalidIhl {
                provided: version_ihl & 0xF,
                expected: 5,
            }));
        }

        let total_len = u16::from_be_bytes([packet[2], packet[3]]);

        if total_len < Self::MIN_HEADER_LEN {
            return Err(Error::Parse(ParseError::InvalidTotalLength {
                provided: total_len,
                expected: Self::MIN_HEADER_LEN as usize,
            }));
        }

        if total_len as usize > packet.len() {
            return Err(Error::Parse(ParseError::InvalidTotalLength {
                provided: total_len,
                expected: packet.len(),
            }));
        }

        Ok(Self {
            version_ihl,
            tos: packet[1],
            total_len,
            id: u16::from_be_bytes([packet[4], packet[5]]),
            flags_and_offset: u16::from_be_bytes([packet[6], packet[7]]),
            ttl: packet[8],
            protocol: Protocol::from(packet[9]),
            header_checksum: u16::from_be_bytes([packet[10], packet[11]]),
            src_addr: [packet[12], packet[13], packet[14], packet[15]],
            dst_addr: [packet[16], packet[17], packet[18], packet[19]],
        })
    }
}

impl Default for Ipv4Header {
    fn default() -> Self {
        Self {
            // Version = 4, IHL = 5
            version_ihl: 0b0100_0101,
            tos: 0,
            total_len: Self::MIN_HEADER_LEN,
            id: 0,
            // DF set, fragment offset 0.
            flags_and_offset: 0b010_0000000000000,
            ttl: 0,
            protocol: Protocol::TCP,
            header_checksum: 0,
            src_addr: [0; 4],
            dst_addr: [0; 4],
        }
    }
}

/// Upper-layer protocols carried over IPv4 (RFC 1700), as far as the
/// transport needs to tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Protocol {
    /// Internet Control Message
    ICMP,
    /// Transmission Control
    TCP,
    /// User Datagram
    UDP,
    /// Any other protocol number.
    Other(u8),
}

impl From<Protocol> for u8 {
    fn from(proto: Protocol) -> u8 {
        match proto {
            Protocol::ICMP => 1,
            Protocol::TCP => 6,
            Protocol::UDP => 17,
            Protocol::Other(val) => val,
        }
    }
}

impl From<u8> for Protocol {
    fn from(val: u8) -> Self {
        match val {
            1 => Protocol::ICMP,
            6 => Protocol::TCP,
            17 => Protocol::UDP,
            _ => Protocol::Other(val),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HEADER_BYTES: [u8; 20] = [
        0x45, 0x00, 0x00, 0x3c, 0xbe, 0xfa, 0x40, 0x00, 0x40, 0x06, 0xfa, 0x43, 0xc0, 0xa8, 0x00,
        0x01, 0xc0, 0xa8, 0x00, 0x2c,
    ];

    /// Header followed by enough payload to satisfy the total length (60).
    fn packet() -> Vec<u8> {
        let mut packet = HEADER_BYTES.to_vec();
        packet.resize(60, 0);
        packet
    }

    proptest! {
        #[test]
        fn ipv4_header_parsing_no_panic(packet in prop::collection::vec(any::<u8>(), 0..128)) {
            if let Ok(header) = Ipv4Header::try_from(&packet[..]) {
                prop_assert!(header.total_len() as usize <= packet.len());
                prop_assert_eq!(header.header_len() + header.payload_len(), header.total_len() as usize);
            }
        }
    }

    #[test]
    fn ipv4_header_basic_valid() {
        let header = Ipv4Header::try_from(&packet()[..]).unwrap();

        assert_eq!(header.version(), 4);
        assert_eq!(header.ihl(), 5);
        assert_eq!(header.total_len(), 60);
        assert_eq!(header.payload_len(), 40);
        assert!(header.dont_fragment());
        assert!(!header.more_fragments());
        assert!(!header.is_fragment());
        assert_eq!(header.ttl(), 64);
        assert_eq!(header.protocol(), Protocol::TCP);
        assert_eq!(header.header_checksum(), 0xFA43);
        assert!(header.is_valid_checksum());
        assert_eq!(header.src(), [192, 168, 0, 1]);
        assert_eq!(header.dst(), [192, 168, 0, 44]);
    }

    #[test]
    fn ipv4_header_serialization_preserves_bytes_valid() {
        let header = Ipv4Header::try_from(&packet()[..]).unwrap();

        assert_eq!(header.to_be_bytes(), HEADER_BYTES);
    }

    #[test]
    fn ipv4_header_new_checksum_valid() {
        let mut header = Ipv4Header::new([10, 0, 0, 1], [10, 0, 0, 2], 20, 64, Protocol::TCP).unwrap();

        assert_eq!(header.total_len(), 40);
        assert!(header.dont_fragment());

        header.set_header_checksum();
        assert!(header.is_valid_checksum());

        // Invalidate checksum.
        header.set_payload_len(22).unwrap();
        assert!(!header.is_valid_checksum());
    }

    #[test]
    fn ipv4_header_payload_too_large_invalid() {
        let header = Ipv4Header::new(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            Ipv4Header::MAX_PAYLOAD_LEN as usize + 1,
            64,
            Protocol::TCP,
        );

        assert!(matches!(
            header,
            Err(Error::Header(HeaderError::PayloadTooLarge { .. }))
        ));
    }

    #[test]
    fn ipv4_header_fragment_offset_maximum_valid() {
        let mut packet = packet();
        packet[6] = 0x5F;
        packet[7] = 0xFF;

        let header = Ipv4Header::try_from(&packet[..]).unwrap();

        assert_eq!(header.fragment_offset(), 8191);
        assert!(header.is_fragment());
    }

    #[test]
    fn ipv4_header_unknown_protocol_valid() {
        let mut packet = packet();
        packet[9] = 89;

        let header = Ipv4Header::try_from(&packet[..]).unwrap();

        assert_eq!(header.protocol(), Protocol::Other(89));
        assert_eq!(u8::from(header.protocol()), 89);
    }

    #[test]
    fn ipv4_header_buffer_length_invalid() {
        assert!(Ipv4Header::try_from(&HEADER_BYTES[..14]).is_err());
    }

    #[test]
    fn ipv4_header_version_invalid() {
        let mut packet = packet();
        packet[0] = 0x65;

        assert!(Ipv4Header::try_from(&packet[..]).is_err());
    }

    #[test]
    fn ipv4_header_ihl_invalid() {
        let mut packet = packet();
        packet[0] = 0x43;

        assert!(Ipv4Header::try_from(&packet[..]).is_err());
    }

    #[test]
    fn ipv4_header_total_len_invalid() {
        let mut packet = packet();
        packet[3] = 0x00;

        assert!(Ipv4Header::try_from(&packet[..]).is_err());

        // Total length (60) exceeds the 20 bytes provided.
        assert!(Ipv4Header::try_from(&HEADER_BYTES[..]).is_err());
    }
}
