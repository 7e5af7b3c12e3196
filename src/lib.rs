//! Passive-open TCP engine in user-space, operating on raw IPv4 packets from a
//! TUN device.
//!
//! The engine accepts connections on a single port, delivers in-order data to
//! application callbacks, and runs the close handshake. It does not retransmit,
//! reorder, or enforce windows.
//!
//! Not suitable for production use.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

#[cfg(not(target_os = "linux"))]
compile_error!(
    "This crate is only compatible with Linux systems that support TUN/TAP devices and the epoll interface."
);

pub mod config;
pub mod error;
pub mod log;
pub mod net;
pub mod protocol;

pub use config::Config;
pub use error::{ConfigError, Error, HeaderError, ParseError, Result};
pub use protocol::{Connection, ConnectionState, Server, Socket, SocketAddr};
