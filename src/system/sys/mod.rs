// src/system/sys/mod.rs

//! Thin per-OS primitives under the handle, pipe and process layers.
//!
//! Everything here works on raw descriptor values. Ownership is tracked one level
//! up, in [`crate::system::handle::ResourceHandle`].

use std::ffi::OsString;
use std::path::Path;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use self::unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use self::windows::*;

/// What a raw value refers to. Windows closes sockets and other handles differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleKind {
    File,
    Socket,
}

/// Everything the platform spawner needs, already validated and defaulted.
#[derive(Debug)]
pub(crate) struct SpawnPlan<'a> {
    pub executable: &'a Path,
    /// Full argument vector, `argv[0]` included. Never empty.
    pub args: &'a [OsString],
    pub working_dir: &'a Path,
    /// The child's complete environment.
    pub environment: &'a [(OsString, OsString)],
    /// stdin, stdout, stderr. `None` binds the null device.
    pub stdio: [Option<Raw>; 3],
    /// Descriptors the child may inherit besides its stdio.
    pub inherit: &'a [Raw],
}
