//! Identifying TCP connections through their socket address pair.

use std::fmt;

/// An IPv4 address and a port number.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct SocketAddr {
    /// IPv4 address.
    pub addr: [u8; 4],
    /// Port number.
    pub port: u16,
}

impl SocketAddr {
    /// Creates a socket address from an IPv4 address and port.
    pub fn new(addr: [u8; 4], port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for SocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}:{}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3], self.port,
        )
    }
}

/// Connection 4-tuple, used as the key of the connection table.
///
/// Stored from the local perspective: `src` is the local (listening) address
/// and `dst` is the peer.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct Socket {
    /// The local socket address (local IP and listening port).
    pub src: SocketAddr,
    /// The peer socket address (remote IP and port).
    pub dst: SocketAddr,
}

impl Socket {
    /// Creates the 4-tuple for a segment that arrived from `peer` at `local`.
    pub fn new(local: SocketAddr, peer: SocketAddr) -> Self {
        Self {
            src: local,
            dst: peer,
        }
    }

    /// Returns the local socket address.
    pub fn local(&self) -> SocketAddr {
        self.src
    }

    /// Returns the peer socket address.
    pub fn peer(&self) -> SocketAddr {
        self.dst
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn socket_display_valid() {
        let sock = Socket::new(
            SocketAddr::new([10, 0, 0, 1], 7000),
            SocketAddr::new([10, 0, 0, 2], 40000),
        );

        assert_eq!(sock.to_string(), "10.0.0.1:7000 -> 10.0.0.2:40000");
    }

    #[test]
    fn socket_key_distinguishes_peer_port_valid() {
        let local = SocketAddr::new([10, 0, 0, 1], 7000);
        let mut table = HashSet::new();

        table.insert(Socket::new(local, SocketAddr::new([10, 0, 0, 2], 40000)));
        table.insert(Socket::new(local, SocketAddr::new([10, 0, 0, 2], 40001)));
        table.insert(Socket::new(local, SocketAddr::new([10, 0, 0, 2], 40000)));

        assert_eq!(table.len(), 2);
    }
}
