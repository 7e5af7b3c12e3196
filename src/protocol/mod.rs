//! Passive-open [TCP] over [IPv4].
//!
//! This module implements the protocol side of the engine: IPv4/TCP header
//! definitions, segment parsing/serialization, the per-connection state
//! machine, and the demultiplexer owning the connection table.
//!
//! [TCP]:  https://www.rfc-editor.org/rfc/rfc793
//! [IPv4]: https://www.rfc-editor.org/rfc/rfc791

pub mod headers;

pub mod connection;
pub use connection::{Connection, ConnectionState, ReceiveCallback, TCB};

pub mod server;
pub use server::{AcceptCallback, Server};

pub mod socket;
pub use socket::{Socket, SocketAddr};

pub mod segment;
pub use segment::TcpSegment;

#[cfg(test)]
pub(crate) mod testing;
