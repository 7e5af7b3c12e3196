//! Error types for the TCP engine, covering header parsing/construction,
//! transport I/O, configuration, and connection lookup.

use std::{error, fmt, io, result};

use crate::protocol::Socket;

/// Creates a [`crate::Error::Io`] with a custom message prefixed to the current
/// `errno` value.
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);
        let msg = format!("{prefix}: {errno}");
        $crate::Error::Io(::std::io::Error::new(errno.kind(), msg))
    }};
}
pub(crate) use errno;

/// A convenience wrapper around `Result` for [crate::Error].
pub type Result<T> = result::Result<T, Error>;

/// Set of errors that can occur while running the TCP engine.
///
/// Wire-level anomalies (bad checksums, segments for unknown connections,
/// out-of-order data) are never reported through this type; they are logged
/// and dropped by the demultiplexer.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error while reading from or writing to the raw transport.
    Io(io::Error),
    /// Error parsing an IPv4 packet or TCP segment.
    Parse(ParseError),
    /// Error creating or manipulating an IPv4 or TCP header.
    Header(HeaderError),
    /// Invalid runtime configuration.
    Config(ConfigError),
    /// The connection is not (or no longer) present in the connection table.
    NotFound(Socket),
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Error {
        Error::Header(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Error {
        Error::Config(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref err) => fmt::Display::fmt(err, f),
            Error::Parse(ref err) => fmt::Display::fmt(err, f),
            Error::Header(ref err) => fmt::Display::fmt(err, f),
            Error::Config(ref err) => fmt::Display::fmt(err, f),
            Error::NotFound(sock) => write!(f, "[{sock}] no such connection"),
        }
    }
}

/// Error occurred while trying to parse an IPv4 packet or TCP segment.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ParseError {
    /// Input buffer not within the valid range for an IPv4/TCP header.
    InvalidBufferLength { provided: usize, min: u16, max: u16 },
    /// Invalid IPv4 version.
    InvalidVersion { provided: u8, expected: u8 },
    /// Invalid IPv4 IHL.
    InvalidIhl { provided: u8, expected: u8 },
    /// Invalid IPv4 total length.
    ///
    /// Value provided is less than `IHL << 2` or larger than the buffer.
    InvalidTotalLength { provided: u16, expected: usize },
    /// Invalid TCP data offset.
    InvalidDataOffset { provided: u16, min: u16, max: u16 },
    /// Mismatch between the provided and expected TCP header length.
    ///
    /// Value provided is less than `data_offset << 2`.
    HeaderLengthMismatch { provided: usize, expected: u16 },
}

impl error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::InvalidBufferLength { provided, min, max } => {
                write!(
                    f,
                    "invalid header length: {provided} bytes (not within the valid range: {min}..={max} bytes)"
                )
            }
            ParseError::InvalidVersion { provided, expected } => {
                write!(
                    f,
                    "invalid IP version: IPv{provided} (must be IPv{expected})"
                )
            }
            ParseError::InvalidIhl { provided, expected } => {
                write!(
                    f,
                    "invalid IPv4 IHL: {provided} (must be {expected}, IPv4 options are not supported)"
                )
            }
            ParseError::InvalidTotalLength { provided, expected } => {
                write!(
                    f,
                    "invalid IPv4 total length: {provided} bytes (inconsistent with header/buffer length: {expected} bytes)"
                )
            }
            ParseError::InvalidDataOffset { provided, min, max } => {
                write!(
                    f,
                    "invalid TCP data offset: {provided} (not within the valid range: {min}..={max})"
                )
            }
            ParseError::HeaderLengthMismatch { provided, expected } => {
                write!(
                    f,
                    "invalid TCP header length: {provided} bytes (less than indicated by data offset: {expected} bytes)"
                )
            }
        }
    }
}

/// Error occurred while trying to create or manipulate an IPv4 or TCP header.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum HeaderError {
    /// Invalid payload length for an IPv4 header.
    PayloadTooLarge { provided: usize, max: u16 },
    /// Insufficient space to append TCP option.
    InsufficientOptionSpace {
        attempted_len: usize,
        current_len: usize,
        max_len: usize,
    },
    /// Invalid TCP `MSS` option value.
    InvalidMssOption,
}

impl error::Error for HeaderError {}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HeaderError::PayloadTooLarge { provided, max } => {
                write!(
                    f,
                    "failed to set IPv4 payload length: {provided} bytes (exceeds maximum allowed {max} bytes)"
                )
            }
            HeaderError::InsufficientOptionSpace {
                attempted_len,
                current_len,
                max_len,
            } => {
                write!(
                    f,
                    "failed to append TCP option to header: appending would result in {attempted_len} bytes, but current length is {current_len} (exceeds maximum allowed {max_len} bytes)"
                )
            }
            HeaderError::InvalidMssOption => {
                write!(f, "invalid TCP MSS option: value must be greater than 0")
            }
        }
    }
}

/// Error occurred while validating the runtime configuration.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The listening port must be non-zero.
    InvalidPort(u16),
    /// The TUN interface name is empty or does not fit in `IFNAMSIZ`.
    InvalidInterface(String),
}

impl error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConfigError::InvalidPort(port) => {
                write!(f, "invalid listening port: {port} (must be non-zero)")
            }
            ConfigError::InvalidInterface(ref name) => {
                write!(
                    f,
                    "invalid interface name: {name:?} (must be 1..{} bytes)",
                    libc::IFNAMSIZ
                )
            }
        }
    }
}
