//! The narrow interface between the protocol engine and the raw network layer.

use crate::Result;

/// Best-effort carrier of whole TCP segments.
///
/// Implementations add whatever network-layer framing they need (an IPv4
/// header for [super::TunTransport]) and give no delivery guarantee: a
/// successful `send` only means the segment was handed off.
pub trait Transport {
    /// Transmits a complete TCP segment (header, options, and payload, with
    /// the checksum already filled in) to the IPv4 address `dst`.
    fn send(&self, segment: &[u8], dst: [u8; 4]) -> Result<()>;

    /// Returns `true` if inbound TCP checksum validation should be bypassed.
    fn ignore_checksum(&self) -> bool {
        false
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, segment: &[u8], dst: [u8; 4]) -> Result<()> {
        (**self).send(segment, dst)
    }

    fn ignore_checksum(&self) -> bool {
        (**self).ignore_checksum()
    }
}
