//! Parsing, serialization, and construction of IPv4/TCP headers.

mod ipv4;
pub use ipv4::{Ipv4Header, Protocol};

mod tcp;
pub use tcp::{MSS, OptionKind, TcpHeader, TcpOptions, segment_checksum};

/// Adds the 16-bit big-endian words of `bytes` to a running one's complement
/// sum.
///
/// If `bytes` has an odd length, the last octet is padded on the right with
/// zeros to form a 16-bit word. Only the final slice of a checksummed region
/// may therefore have an odd length.
pub(crate) fn checksum_accumulate(mut sum: u32, bytes: &[u8]) -> u32 {
    let mut words = bytes.chunks_exact(2);

    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }

    if let [last] = words.remainder() {
        sum += u16::from_be_bytes([*last, 0x00]) as u32;
    }

    // Adds the higher 16-bits to the lower 16-bits.
    (sum & 0xFFFF) + (sum >> 16)
}

/// Folds any remaining carries into a running sum and returns its one's
/// complement.
pub(crate) fn checksum_finish(mut sum: u32) -> u16 {
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}
