//! Command-line configuration of the echo server.

use std::net::Ipv4Addr;

use structopt::StructOpt;

use crate::{ConfigError, Result};

/// Runtime configuration.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "passive-tcp", about = "Passive-open TCP echo server over a TUN device.")]
pub struct Config {
    /// Name of the TUN device to attach to.
    #[structopt(long, default_value = "tun0")]
    pub interface: String,

    /// Local IPv4 address, used as the source of outbound packets.
    #[structopt(long, default_value = "10.0.0.1")]
    pub addr: Ipv4Addr,

    /// Port to accept connections on.
    #[structopt(short, long, default_value = "7000")]
    pub port: u16,

    /// Accept inbound segments regardless of their TCP checksum.
    #[structopt(long)]
    pub ignore_checksum: bool,

    /// Emit per-segment debug logs.
    #[structopt(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Parses the process arguments, exiting with usage on failure.
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }

    /// Checks the invariants the parser cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is 0 or the interface name cannot name a
    /// network device.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port).into());
        }

        if self.interface.is_empty()
            || self.interface.len() >= libc::IFNAMSIZ
            || self.interface.contains('\0')
        {
            return Err(ConfigError::InvalidInterface(self.interface.clone()).into());
        }

        Ok(())
    }

    /// Returns the local address as raw octets.
    pub fn local_addr(&self) -> [u8; 4] {
        self.addr.octets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn parse(args: &[&str]) -> Config {
        Config::from_iter_safe(std::iter::once("passive-tcp").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn config_defaults_valid() {
        let config = parse(&[]);

        assert_eq!(config.interface, "tun0");
        assert_eq!(config.local_addr(), [10, 0, 0, 1]);
        assert_eq!(config.port, 7000);
        assert!(!config.ignore_checksum);
        assert!(!config.verbose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_flags_valid() {
        let config = parse(&[
            "--interface",
            "tun7",
            "--addr",
            "192.168.0.1",
            "-p",
            "80",
            "--ignore-checksum",
            "-v",
        ]);

        assert_eq!(config.interface, "tun7");
        assert_eq!(config.local_addr(), [192, 168, 0, 1]);
        assert_eq!(config.port, 80);
        assert!(config.ignore_checksum);
        assert!(config.verbose);
    }

    #[test]
    fn config_port_zero_invalid() {
        let config = parse(&["--port", "0"]);

        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::InvalidPort(0)))
        ));
    }

    #[test]
    fn config_interface_invalid() {
        let config = parse(&["--interface", "an-interface-name-too-long"]);

        assert!(matches!(
            config.validate(),
            Err(Error::Config(ConfigError::InvalidInterface(_)))
        ));
    }

    #[test]
    fn config_malformed_addr_invalid() {
        let args = ["passive-tcp", "--addr", "10.0.0"];

        assert!(Config::from_iter_safe(args.iter()).is_err());
    }
}
