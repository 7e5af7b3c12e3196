//! Construction, serialization, and splitting of TCP segments.

use std::io::Write;

use crate::Result;
use crate::protocol::headers::TcpHeader;

/// Fully constructed TCP segment: header followed by payload.
///
/// The IPv4 header is not part of the segment; the transport adds it when the
/// segment is written to the wire.
#[derive(Debug)]
pub struct TcpSegment {
    /// TCP header of the segment.
    pub tcp: TcpHeader,
    /// Payload of the segment.
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Create a new TCP segment given the TCP header and payload.
    pub fn new(tcp: TcpHeader, payload: &[u8]) -> Self {
        Self {
            tcp,
            payload: payload.into(),
        }
    }

    /// Splits a raw segment into its header and payload.
    ///
    /// The payload begins at `4 * data_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the header could not be parsed.
    pub fn split(segment: &[u8]) -> Result<(TcpHeader, &[u8])> {
        let tcph = TcpHeader::try_from(segment)?;
        let payload = &segment[tcph.header_len()..];

        Ok((tcph, payload))
    }

    /// Returns the memory representation of the TCP segment as a vector of
    /// bytes in big-endian (network) byte order.
    pub fn to_be_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.tcp.header_len() + self.payload.len());

        self.tcp.write(&mut buf)?;
        buf.write_all(&self.payload)?;

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::headers::segment_checksum;

    #[test]
    fn segment_split_payload_valid() {
        let src = [10, 0, 0, 1];
        let dst = [10, 0, 0, 2];

        let mut tcph = TcpHeader::new(7000, 40000, 100, 4096);
        tcph.set_ack();
        tcph.set_ack_number(200);
        tcph.set_option_mss(1460).unwrap();
        tcph.set_checksum(src, dst, b"abc");

        let bytes = TcpSegment::new(tcph, b"abc").to_be_bytes().unwrap();

        assert_eq!(bytes.len(), 24 + 3);
        assert_eq!(segment_checksum(&bytes, src, dst), 0);

        let (parsed, payload) = TcpSegment::split(&bytes).unwrap();

        assert_eq!(parsed.seq_number(), 100);
        assert_eq!(parsed.ack_number(), 200);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn segment_split_truncated_invalid() {
        assert!(TcpSegment::split(&[0u8; 12]).is_err());
    }
}
