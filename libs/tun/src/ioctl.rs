use std::{io, os::fd::RawFd};

/// Executes the `ioctl` syscall on the given file descriptor with the provided request.
///
/// # Safety
///
/// The file descriptor must be open.
pub unsafe fn exec<P>(fd: RawFd, code: libc::c_ulong, req: &mut Request<P>) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd, code as _, req) };

    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Represents a control request to an IO device, addressed by the device's name.
///
/// The payload MUST also be `#[repr(C)]` and its layout depends on the particular request you are sending.
#[repr(C)]
pub struct Request<P> {
    name: [std::ffi::c_uchar; libc::IF_NAMESIZE],
    payload: P,
}

impl Request<SetTunFlagsPayload> {
    /// A request to turn the descriptor into a layer-3 TUN device.
    ///
    /// `name` may be a pattern such as `ovp%d`; the kernel substitutes `%d`
    /// with the first free number and writes the result back into the request.
    pub fn new(name: &str) -> Self {
        let name_as_bytes = name.as_bytes();
        debug_assert!(name_as_bytes.len() < libc::IF_NAMESIZE);

        let mut name = [0u8; libc::IF_NAMESIZE];
        name[..name_as_bytes.len()].copy_from_slice(name_as_bytes);

        Self {
            name,
            payload: SetTunFlagsPayload {
                // Layer-3 packets, without the extra per-packet info header.
                flags: (libc::IFF_TUN | libc::IFF_NO_PI) as _,
            },
        }
    }

    pub fn name(&self) -> std::borrow::Cow<'_, str> {
        // Safety: The memory of `self.name` is always initialized.
        let cstr = unsafe { std::ffi::CStr::from_ptr(self.name.as_ptr() as _) };

        cstr.to_string_lossy()
    }
}

#[repr(C)]
pub struct SetTunFlagsPayload {
    flags: std::ffi::c_short,
}
