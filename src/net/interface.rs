//! [Transport] backed by a TUN device: TCP segments travel inside IPv4
//! packets that this module builds and strips.

use std::os::unix::io::{AsRawFd, RawFd};

use super::Transport;
use super::tun::{MTU_SIZE, Tun};
use crate::protocol::headers::{Ipv4Header, Protocol};
use crate::{Result, debug, warn};

/// Time-to-live of outbound IPv4 packets.
const DEFAULT_TTL: u8 = 64;

/// A TCP segment unwrapped from an inbound IPv4 packet.
#[derive(Debug, Clone, Copy)]
pub struct InboundSegment<'a> {
    /// Source IPv4 address (the peer).
    pub src: [u8; 4],
    /// Destination IPv4 address (this host).
    pub dst: [u8; 4],
    /// TCP header, options, and payload.
    pub segment: &'a [u8],
}

/// Raw transport over a TUN device.
#[derive(Debug)]
pub struct TunTransport {
    tun: Tun,
    addr: [u8; 4],
    ignore_checksum: bool,
}

impl TunTransport {
    /// Wraps `tun`, using `addr` as the source of every outbound packet.
    pub fn new(tun: Tun, addr: [u8; 4], ignore_checksum: bool) -> Self {
        Self {
            tun,
            addr,
            ignore_checksum,
        }
    }

    /// Returns the underlying TUN device.
    pub fn tun(&self) -> &Tun {
        &self.tun
    }

    /// Returns the local IPv4 address.
    pub fn addr(&self) -> [u8; 4] {
        self.addr
    }

    /// Reads one packet from the TUN device into `buf`.
    ///
    /// Returns `Ok(None)` for packets that carry no usable TCP segment; those
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be read.
    pub fn recv<'a>(&self, buf: &'a mut [u8; MTU_SIZE]) -> Result<Option<InboundSegment<'a>>> {
        let nbytes = self.tun.recv(&mut buf[..])?;

        Ok(unwrap_packet(&buf[..nbytes]))
    }
}

impl Transport for TunTransport {
    fn send(&self, segment: &[u8], dst: [u8; 4]) -> Result<()> {
        let packet = wrap_segment(self.addr, dst, segment)?;
        self.tun.send(&packet)?;

        Ok(())
    }

    fn ignore_checksum(&self) -> bool {
        self.ignore_checksum
    }
}

impl AsRawFd for TunTransport {
    fn as_raw_fd(&self) -> RawFd {
        self.tun.as_raw_fd()
    }
}

/// Prefixes `segment` with an IPv4 header from `src` to `dst`.
fn wrap_segment(src: [u8; 4], dst: [u8; 4], segment: &[u8]) -> Result<Vec<u8>> {
    let mut ip = Ipv4Header::new(src, dst, segment.len(), DEFAULT_TTL, Protocol::TCP)?;
    ip.set_header_checksum();

    let mut packet = Vec::with_capacity(ip.header_len() + segment.len());
    ip.write(&mut packet)?;
    packet.extend_from_slice(segment);

    Ok(packet)
}

/// Validates the IPv4 header of `packet` and returns the TCP segment it
/// carries.
fn unwrap_packet(packet: &[u8]) -> Option<InboundSegment<'_>> {
    let iph = match Ipv4Header::try_from(packet) {
        Ok(iph) => iph,
        Err(err) => {
            warn!("invalid IP packet received: {err}");
            return None;
        }
    };

    if iph.protocol() != Protocol::TCP {
        debug!("ignoring non-TCP ({:?}) packet", iph.protocol());
        return None;
    }

    if !iph.is_valid_checksum() {
        warn!("invalid IP packet received: invalid IPv4 header checksum");
        return None;
    }

    if iph.is_fragment() {
        warn!("ignoring fragmented IP packet: reassembly is not supported");
        return None;
    }

    // The buffer may extend past `total_len`; only the datagram counts.
    let end = iph.header_len() + iph.payload_len();

    Some(InboundSegment {
        src: iph.src(),
        dst: iph.dst(),
        segment: &packet[iph.header_len()..end],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: [u8; 4] = [10, 0, 0, 1];
    const DST: [u8; 4] = [10, 0, 0, 2];

    #[test]
    fn wrap_and_unwrap_segment_valid() {
        let segment = [0xABu8; 33];
        let packet = wrap_segment(SRC, DST, &segment).unwrap();

        assert_eq!(packet.len(), 20 + 33);

        let iph = Ipv4Header::try_from(&packet[..]).unwrap();

        assert!(iph.is_valid_checksum());
        assert!(iph.dont_fragment());
        assert_eq!(iph.ttl(), DEFAULT_TTL);
        assert_eq!(iph.protocol(), Protocol::TCP);

        let mut padded = packet.clone();
        padded.extend_from_slice(&[0u8; 7]);

        let inbound = unwrap_packet(&padded).unwrap();

        assert_eq!(inbound.src, SRC);
        assert_eq!(inbound.dst, DST);
        assert_eq!(inbound.segment, &segment[..]);
    }

    #[test]
    fn unwrap_non_tcp_invalid() {
        let mut ip = Ipv4Header::new(SRC, DST, 8, DEFAULT_TTL, Protocol::UDP).unwrap();
        ip.set_header_checksum();

        let mut packet = Vec::new();
        ip.write(&mut packet).unwrap();
        packet.extend_from_slice(&[0u8; 8]);

        assert!(unwrap_packet(&packet).is_none());
    }

    #[test]
    fn unwrap_bad_header_checksum_invalid() {
        let mut packet = wrap_segment(SRC, DST, &[0u8; 20]).unwrap();
        packet[10] ^= 0xFF;

        assert!(unwrap_packet(&packet).is_none());
    }

    #[test]
    fn unwrap_truncated_invalid() {
        assert!(unwrap_packet(&[0x45, 0x00, 0x00]).is_none());
    }
}
