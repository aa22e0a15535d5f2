// src/system/handle.rs

//! Owned native descriptors with exactly-once release.

use crate::system::sys::{self, AtomicRaw, HandleKind, INVALID, Raw};
use log::{trace, warn};
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::Ordering;

/// An owned OS descriptor: a file descriptor on POSIX, a `HANDLE` or `SOCKET` on Windows.
///
/// The descriptor is closed exactly once, on the first [`ResourceHandle::release`]
/// or on drop, whichever comes first. Later releases are no-ops, and every accessor
/// fails with `EBADF`-style errors once released.
pub struct ResourceHandle {
    raw: AtomicRaw,
    kind: HandleKind,
}

impl ResourceHandle {
    pub(crate) fn from_raw(raw: Raw, kind: HandleKind) -> Self {
        Self {
            raw: AtomicRaw::new(raw),
            kind,
        }
    }

    /// The raw value, for handing to the process spawner.
    pub(crate) fn raw(&self) -> io::Result<Raw> {
        match self.raw.load(Ordering::Acquire) {
            INVALID => Err(released()),
            raw => Ok(raw),
        }
    }

    /// The native value as a plain integer, for callers that pass it across an FFI boundary.
    pub fn handle_value(&self) -> io::Result<i64> {
        self.raw().map(|raw| raw as i64)
    }

    /// `true` once the descriptor has been closed.
    pub fn is_released(&self) -> bool {
        self.raw.load(Ordering::Acquire) == INVALID
    }

    /// Closes the descriptor. Idempotent and safe to call from several threads:
    /// only the first caller closes. A failing close is logged, not reported.
    pub fn release(&self) {
        let raw = self.raw.swap(INVALID, Ordering::AcqRel);
        if raw == INVALID {
            return;
        }
        match sys::close(raw, self.kind) {
            Ok(()) => trace!("Released {:?} descriptor {}", self.kind, raw),
            Err(e) => warn!("Failed to close {:?} descriptor {}: {}", self.kind, raw, e),
        }
    }

    /// Controls whether a spawned child could inherit this descriptor by default.
    ///
    /// The process controller only ever passes descriptors it is told about, so this
    /// flag matters for spawns done outside this crate.
    pub fn set_inheritable(&self, inheritable: bool) -> io::Result<()> {
        sys::set_inheritable(self.raw()?, self.kind, inheritable)
    }

    pub fn is_inheritable(&self) -> io::Result<bool> {
        sys::is_inheritable(self.raw()?, self.kind)
    }
}

fn released() -> io::Error {
    #[cfg(unix)]
    {
        io::Error::from_raw_os_error(libc::EBADF)
    }
    #[cfg(windows)]
    {
        // ERROR_INVALID_HANDLE
        io::Error::from_raw_os_error(6)
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.raw.load(Ordering::Acquire);
        let mut out = f.debug_struct("ResourceHandle");
        out.field("kind", &self.kind);
        if raw == INVALID {
            out.field("raw", &"released");
        } else {
            out.field("raw", &raw);
        }
        out.finish()
    }
}

impl Read for &ResourceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        sys::read(self.raw()?, self.kind, buf)
    }
}

impl Write for &ResourceHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        sys::write(self.raw()?, self.kind, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        sys::flush(self.raw()?, self.kind)
    }
}

impl Read for ResourceHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl Write for ResourceHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

#[cfg(unix)]
impl ResourceHandle {
    /// Converts into a std-owned descriptor, e.g. to build a `File` or `UnixStream`.
    #[allow(unsafe_code)]
    pub fn into_owned_fd(self) -> io::Result<std::os::fd::OwnedFd> {
        match self.raw.swap(INVALID, Ordering::AcqRel) {
            INVALID => Err(released()),
            // SAFETY: the swap transferred sole ownership of an open descriptor.
            raw => Ok(unsafe { sys::from_raw(raw) }),
        }
    }
}
