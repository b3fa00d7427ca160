use std::io;
use std::os::fd::{AsRawFd, FromRawFd as _, OwnedFd, RawFd};

use anyhow::{Context as _, Result};
use libc::{F_GETFL, F_SETFL, O_NONBLOCK, O_RDWR, fcntl, open};
use tokio::io::{Interest, unix::AsyncFd};

pub mod ioctl;
mod netlink;

pub use netlink::assign_device_address;

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

const TUN_FILE: &std::ffi::CStr = c"/dev/net/tun";

/// A layer-3 TUN device.
///
/// One read yields one IP datagram; one write submits one IP datagram. The
/// descriptor is closed when the device is dropped.
#[derive(Debug)]
pub struct Tun {
    name: String,
    fd: AsyncFd<OwnedFd>,
}

impl Tun {
    /// Creates a new TUN device from `name_pattern` (e.g. `ovp%d`).
    ///
    /// The kernel picks the first free name matching the pattern; [`Tun::name`]
    /// returns the actual name. Must be called within a tokio runtime so the
    /// descriptor can be registered with the reactor.
    pub fn create(name_pattern: &str) -> Result<Self> {
        let fd = match unsafe { open(TUN_FILE.as_ptr() as _, O_RDWR) } {
            -1 => {
                let file = TUN_FILE.to_string_lossy();

                return Err(anyhow::Error::new(io::Error::last_os_error()))
                    .with_context(|| format!("Failed to open '{file}'"));
            }
            fd => fd,
        };

        let mut request = ioctl::Request::<ioctl::SetTunFlagsPayload>::new(name_pattern);

        // Safety: The file descriptor was opened above.
        unsafe {
            ioctl::exec(fd, TUNSETIFF, &mut request).context("Failed to create TUN device")?;
        }

        let name = request.name().into_owned();

        set_non_blocking(fd).context("Failed to make TUN device non-blocking")?;

        // Safety: We are the sole owner of the descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let fd = AsyncFd::new(fd).context("Failed to register TUN device with the reactor")?;

        tracing::debug!(%name, "Created TUN device");

        Ok(Self { name, fd })
    }

    /// The kernel-assigned name of the device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads one IP datagram into `dst`, returning the number of bytes read.
    pub async fn read_some(&self, dst: &mut [u8]) -> io::Result<usize> {
        self.fd
            .async_io(Interest::READABLE, |fd| read(fd.as_raw_fd(), dst))
            .await
    }

    /// Writes the whole of `src` as one datagram, returning the number of bytes written.
    pub async fn write(&self, src: &[u8]) -> io::Result<usize> {
        self.fd
            .async_io(Interest::WRITABLE, |fd| write(fd.as_raw_fd(), src))
            .await
    }
}

fn set_non_blocking(fd: RawFd) -> io::Result<()> {
    match unsafe { fcntl(fd, F_GETFL) } {
        -1 => Err(io::Error::last_os_error()),
        flags => match unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } {
            -1 => Err(io::Error::last_os_error()),
            _ => Ok(()),
        },
    }
}

/// Read from the given file descriptor into the buffer.
fn read(fd: RawFd, dst: &mut [u8]) -> io::Result<usize> {
    // Safety: Within this module, the file descriptor is always valid.
    match unsafe { libc::read(fd, dst.as_mut_ptr() as _, dst.len()) } {
        -1 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}

/// Write the buffer to the given file descriptor.
fn write(fd: RawFd, src: &[u8]) -> io::Result<usize> {
    // Safety: Within this module, the file descriptor is always valid.
    match unsafe { libc::write(fd, src.as_ptr() as _, src.len() as _) } {
        -1 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}
