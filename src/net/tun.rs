//! Linux TUN virtual network device, exchanging raw IP packets between the
//! kernel and this process.

use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::{mem, ptr};

use crate::error::errno;
use crate::{ConfigError, Result};

/// Maximum Transmission Unit (`MTU`) of the TUN device.
pub const MTU_SIZE: usize = 1500;

/// TUN (network TUNnel) device opened without packet information, so every
/// read or write is exactly one IP packet.
#[derive(Debug)]
pub struct Tun {
    fd: File,
    name: String,
}

impl Tun {
    /// Opens (or creates) the TUN device named `dev`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or does not fit in `IFNAMSIZ`,
    /// if `/dev/net/tun` cannot be opened, or if the process lacks the
    /// `CAP_NET_ADMIN` privilege.
    pub fn open(dev: &str) -> Result<Self> {
        // Room must remain for the terminating null byte.
        if dev.is_empty() || dev.len() >= libc::IFNAMSIZ || dev.contains('\0') {
            return Err(ConfigError::InvalidInterface(dev.to_string()).into());
        }

        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")?;

        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };

        // IFF_TUN   - TUN device (no Ethernet headers)
        //
        // IFF_NO_PI - Do not provide packet information
        let flags = libc::IFF_TUN | libc::IFF_NO_PI;

        unsafe {
            // SAFETY: `dev.len()` is less than `IFNAMSIZ`.
            ptr::copy_nonoverlapping(
                dev.as_ptr(),
                ifr.ifr_name.as_mut_ptr() as *mut u8,
                dev.len(),
            );

            ifr.ifr_ifru.ifru_flags = flags as i16;
        }

        if unsafe { libc::ioctl(fd.as_raw_fd(), libc::TUNSETIFF, &ifr) } == -1 {
            return Err(errno!("failed to bind interface {dev} with TUN file handle"));
        }

        // SAFETY: `ifr_name` remains null-terminated after copying `dev`.
        let name = unsafe {
            CStr::from_ptr(ifr.ifr_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };

        Ok(Self { fd, name })
    }

    /// Returns the name the kernel assigned to the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receives one IP packet, returning its length.
    ///
    /// Blocks unless [Tun::set_non_blocking] was called. The buffer should be
    /// at least `MTU_SIZE` bytes.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        (&self.fd).read(buf).map_err(|err| err.into())
    }

    /// Sends one IP packet.
    ///
    /// The kernel silently drops malformed packets, so success only means the
    /// write was accepted.
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        (&self.fd).write(buf).map_err(|err| err.into())
    }

    /// Sets the TUN file handle to be non-blocking.
    pub fn set_non_blocking(&self) -> Result<()> {
        let fd = self.as_raw_fd();

        // Get current flags so they can be combined with `O_NONBLOCK`.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags == -1 {
            return Err(errno!("failed to get flags of TUN file handle"));
        }

        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
            return Err(errno!("failed to set TUN file handle to non-blocking"));
        }

        Ok(())
    }
}

impl AsRawFd for Tun {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn tun_name_invalid() {
        for name in ["", "an-interface-name-too-long", "tun\0"] {
            assert!(
                matches!(Tun::open(name), Err(Error::Config(ConfigError::InvalidInterface(_)))),
                "accepted {name:?}"
            );
        }
    }
}
