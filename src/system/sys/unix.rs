// src/system/sys/unix.rs

// Raw descriptor juggling and `pre_exec`.
#![allow(unsafe_code)]

use super::{HandleKind, SpawnPlan};
use log::trace;
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, OFlag, fcntl};
use nix::sys::signal::{self, Signal};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use nix::sys::wait::{Id, WaitPidFlag, WaitStatus, waitid};
use nix::unistd::{self, Pid};
use std::fs::File;
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

pub(crate) type Raw = RawFd;
pub(crate) type AtomicRaw = std::sync::atomic::AtomicI32;
pub(crate) const INVALID: Raw = -1;

/// Upper bound for the descriptor sweep when `close_range` is unavailable.
const FALLBACK_FD_LIMIT: libc::c_long = 65_536;

pub(crate) fn close(raw: Raw, _kind: HandleKind) -> io::Result<()> {
    unistd::close(raw).map_err(io::Error::from)
}

pub(crate) fn set_inheritable(raw: Raw, _kind: HandleKind, inheritable: bool) -> io::Result<()> {
    let current = FdFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFD)?);
    let updated = if inheritable {
        current - FdFlag::FD_CLOEXEC
    } else {
        current | FdFlag::FD_CLOEXEC
    };
    fcntl(raw, FcntlArg::F_SETFD(updated))?;
    Ok(())
}

pub(crate) fn is_inheritable(raw: Raw, _kind: HandleKind) -> io::Result<bool> {
    let flags = FdFlag::from_bits_truncate(fcntl(raw, FcntlArg::F_GETFD)?);
    Ok(!flags.contains(FdFlag::FD_CLOEXEC))
}

/// A unidirectional pipe, `(read end, write end)`, both close-on-exec.
pub(crate) fn create_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    Ok(unistd::pipe2(OFlag::O_CLOEXEC)?)
}

/// A connected pair of stream sockets, both close-on-exec.
pub(crate) fn create_socket_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    Ok(socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_CLOEXEC,
    )?)
}

/// Runs `f` on a `File` view of `raw` without taking ownership of it.
fn with_file<R>(raw: Raw, f: impl FnOnce(&mut File) -> R) -> R {
    // SAFETY: the caller keeps `raw` open for the duration of the call and the
    // `ManuallyDrop` wrapper guarantees this view never closes it.
    let mut file = ManuallyDrop::new(unsafe { File::from_raw_fd(raw) });
    f(&mut file)
}

pub(crate) fn read(raw: Raw, _kind: HandleKind, buf: &mut [u8]) -> io::Result<usize> {
    with_file(raw, |file| file.read(buf))
}

pub(crate) fn write(raw: Raw, _kind: HandleKind, buf: &[u8]) -> io::Result<usize> {
    with_file(raw, |file| file.write(buf))
}

pub(crate) fn flush(_raw: Raw, _kind: HandleKind) -> io::Result<()> {
    Ok(())
}

/// A spawned child. Waiting never reaps it; only [`NativeChild::reap`] does, so
/// the pid stays valid for signalling until the owner decides otherwise.
#[derive(Debug)]
pub(crate) struct NativeChild {
    pid: Pid,
    child: Mutex<Option<Child>>,
}

impl NativeChild {
    pub(crate) fn id(&self) -> u32 {
        self.pid.as_raw().unsigned_abs()
    }

    /// Blocks until the child has exited, leaving it waitable.
    pub(crate) fn wait_exit(&self) -> io::Result<()> {
        loop {
            match waitid(Id::Pid(self.pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Sends `SIGKILL` unless the child has already exited. Returns whether a signal was
    /// sent. Only valid while the child has not been reaped.
    pub(crate) fn terminate(&self) -> io::Result<bool> {
        let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
        match waitid(Id::Pid(self.pid), flags) {
            Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => {}
            Ok(_) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        match signal::kill(self.pid, Signal::SIGKILL) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Collects the exit status. Signal deaths map to `128 + signal`.
    pub(crate) fn reap(&self) -> io::Result<i32> {
        let taken = self
            .child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let mut child = taken.ok_or_else(|| io::Error::other("child already reaped"))?;
        let status = child.wait()?;
        Ok(status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
    }
}

fn stdio_for(raw: Option<Raw>) -> io::Result<Stdio> {
    match raw {
        Some(raw) => {
            // SAFETY: the handle layer keeps `raw` open until the spawn returns.
            let duplicate = unsafe { BorrowedFd::borrow_raw(raw) }.try_clone_to_owned()?;
            Ok(Stdio::from(duplicate))
        }
        None => Ok(Stdio::null()),
    }
}

/// Marks every descriptor from 3 upwards close-on-exec. Runs in the forked child.
fn cloexec_everything_above_stdio() {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        const CLOSE_RANGE_CLOEXEC: libc::c_uint = 1 << 2;
        // SAFETY: raw syscall with plain integer arguments.
        let done = unsafe {
            libc::syscall(
                libc::SYS_close_range,
                3 as libc::c_uint,
                libc::c_uint::MAX,
                CLOSE_RANGE_CLOEXEC,
            )
        };
        if done == 0 {
            return;
        }
    }

    // SAFETY: `sysconf` and `fcntl` are async-signal-safe.
    let limit = match unsafe { libc::sysconf(libc::_SC_OPEN_MAX) } {
        n if n > 0 => n.min(FALLBACK_FD_LIMIT),
        _ => FALLBACK_FD_LIMIT,
    };
    for fd in 3..limit as RawFd {
        // SAFETY: see above. Invalid descriptors just fail with EBADF.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags >= 0 && flags & libc::FD_CLOEXEC == 0 {
            unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
        }
    }
}

pub(crate) fn spawn(plan: &SpawnPlan<'_>) -> io::Result<NativeChild> {
    let [stdin, stdout, stderr] = plan.stdio;
    let mut command = Command::new(plan.executable);
    if let Some((argv0, rest)) = plan.args.split_first() {
        command.arg0(argv0).args(rest);
    }
    command
        .current_dir(plan.working_dir)
        .env_clear()
        .envs(plan.environment.iter().map(|(k, v)| (k, v)))
        .stdin(stdio_for(stdin)?)
        .stdout(stdio_for(stdout)?)
        .stderr(stdio_for(stderr)?);

    let inherit: Vec<RawFd> = plan.inherit.iter().copied().filter(|fd| *fd > 2).collect();
    // SAFETY: the hook only calls async-signal-safe functions and does not allocate.
    unsafe {
        command.pre_exec(move || {
            cloexec_everything_above_stdio();
            for &fd in &inherit {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let child = command.spawn()?;
    let pid = Pid::from_raw(child.id() as libc::pid_t);
    trace!("Spawned pid {} for '{}'", pid, plan.executable.display());

    Ok(NativeChild {
        pid,
        child: Mutex::new(Some(child)),
    })
}

/// Takes ownership of a descriptor value produced elsewhere.
pub(crate) fn into_raw(fd: OwnedFd) -> Raw {
    fd.into_raw_fd()
}

/// Re-owns a raw descriptor.
///
/// # Safety
/// `raw` must be open and owned by nobody else.
pub(crate) unsafe fn from_raw(raw: Raw) -> OwnedFd {
    // SAFETY: forwarded to the caller.
    unsafe { OwnedFd::from_raw_fd(raw) }
}
