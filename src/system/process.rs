// src/system/process.rs

use crate::system::completion::ExitFuture;
use crate::system::handle::ResourceHandle;
use crate::system::sys::{self, NativeChild, Raw, SpawnPlan};
use log::{debug, error, warn};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Exit code published when the waiter could not collect a real one.
const UNKNOWN_EXIT_CODE: i32 = -1;

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Could not resolve executable '{}': {source}", path.display())]
    ResolveExecutable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not spawn '{}': {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    /// The OS error code behind the failure, if there is one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::ResolveExecutable { source, .. } | Self::Spawn { source, .. } => {
                source.raw_os_error()
            }
        }
    }
}

/// Lifecycle of a spawned child as seen through its [`ProcessHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exited without being killed through this handle.
    Completed,
    /// Exited after [`ProcessHandle::kill`].
    Killed,
    /// Native bookkeeping reclaimed. Terminal.
    Released,
}

#[derive(Debug)]
struct Lifecycle {
    native: Option<Arc<NativeChild>>,
    exited: bool,
    killed: bool,
}

#[derive(Debug)]
struct Shared {
    lifecycle: Mutex<Lifecycle>,
    exit: ExitFuture,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Configures and starts a child process.
///
/// Only the descriptors handed to [`ProcessBuilder::stdin`], [`ProcessBuilder::stdout`],
/// [`ProcessBuilder::stderr`] and [`ProcessBuilder::extra_descriptor`] reach the child.
/// Every other descriptor of this process stays behind, whatever its inheritable flag.
#[derive(Debug)]
pub struct ProcessBuilder<'a> {
    executable: PathBuf,
    arguments: Vec<OsString>,
    working_dir: Option<PathBuf>,
    environment: Option<Vec<(OsString, OsString)>>,
    stdio: [Option<&'a ResourceHandle>; 3],
    extra: Vec<&'a ResourceHandle>,
}

impl<'a> ProcessBuilder<'a> {
    /// The executable is made absolute against the current directory. No `PATH` search happens.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            arguments: Vec::new(),
            working_dir: None,
            environment: None,
            stdio: [None; 3],
            extra: Vec::new(),
        }
    }

    /// The full argument vector, `argv[0]` included. Left empty, `argv[0]` is the executable path.
    pub fn arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Defaults to the current directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replaces the inherited environment entirely.
    pub fn environment<I, K, V>(mut self, environment: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.environment = Some(
            environment
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn stdin(mut self, handle: &'a ResourceHandle) -> Self {
        self.stdio[0] = Some(handle);
        self
    }

    pub fn stdout(mut self, handle: &'a ResourceHandle) -> Self {
        self.stdio[1] = Some(handle);
        self
    }

    pub fn stderr(mut self, handle: &'a ResourceHandle) -> Self {
        self.stdio[2] = Some(handle);
        self
    }

    /// Lets the child inherit `handle` under the same descriptor number (or handle value).
    pub fn extra_descriptor(mut self, handle: &'a ResourceHandle) -> Self {
        self.extra.push(handle);
        self
    }

    pub fn extra_descriptors(mut self, handles: impl IntoIterator<Item = &'a ResourceHandle>) -> Self {
        self.extra.extend(handles);
        self
    }

    /// Starts the child and its waiter. Returns as soon as the child exists.
    pub fn spawn(self) -> Result<ProcessHandle, SpawnError> {
        let executable = resolve_executable(&self.executable)?;
        let spawn_error = |source: io::Error| {
            error!("Spawning '{}' failed: {}", executable.display(), source);
            SpawnError::Spawn {
                executable: executable.clone(),
                source,
            }
        };

        let working_dir = match self.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(spawn_error)?,
        };
        let environment = self
            .environment
            .unwrap_or_else(|| std::env::vars_os().collect());
        let arguments = if self.arguments.is_empty() {
            vec![executable.clone().into_os_string()]
        } else {
            self.arguments
        };

        let [stdin, stdout, stderr] = self.stdio;
        let stdio = [
            optional_raw(stdin).map_err(spawn_error)?,
            optional_raw(stdout).map_err(spawn_error)?,
            optional_raw(stderr).map_err(spawn_error)?,
        ];
        let inherit = self
            .extra
            .iter()
            .map(|handle| handle.raw())
            .collect::<io::Result<Vec<Raw>>>()
            .map_err(spawn_error)?;

        let plan = SpawnPlan {
            executable: &executable,
            args: &arguments,
            working_dir: dunce::simplified(&working_dir),
            environment: &environment,
            stdio,
            inherit: &inherit,
        };
        debug!(
            "Spawning '{}' in '{}' with {} extra descriptor(s)",
            executable.display(),
            plan.working_dir.display(),
            inherit.len()
        );

        let native = Arc::new(sys::spawn(&plan).map_err(spawn_error)?);
        ProcessHandle::watch(native, executable.clone()).map_err(spawn_error)
    }
}

fn resolve_executable(path: &Path) -> Result<PathBuf, SpawnError> {
    std::path::absolute(path)
        .map(|absolute| dunce::simplified(&absolute).to_path_buf())
        .map_err(|source| SpawnError::ResolveExecutable {
            path: path.to_path_buf(),
            source,
        })
}

fn optional_raw(handle: Option<&ResourceHandle>) -> io::Result<Option<Raw>> {
    handle.map(ResourceHandle::raw).transpose()
}

/// A running (or finished) child.
///
/// Dropping the handle is the same as [`ProcessHandle::close`]: a child that is still
/// running gets killed.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    executable: PathBuf,
    shared: Arc<Shared>,
}

impl ProcessHandle {
    /// Starts the waiter thread. If that fails the child is killed and reaped.
    fn watch(native: Arc<NativeChild>, executable: PathBuf) -> io::Result<Self> {
        let pid = native.id();
        let shared = Arc::new(Shared {
            lifecycle: Mutex::new(Lifecycle {
                native: Some(native.clone()),
                exited: false,
                killed: false,
            }),
            exit: ExitFuture::new(),
        });

        let orphan = scopeguard::guard(native.clone(), |child| {
            let _ = child.terminate();
            let _ = child.reap();
        });
        std::thread::Builder::new()
            .name(format!("compat-wait-{}", pid))
            .spawn({
                let shared = shared.clone();
                move || wait_for_exit(&native, &shared)
            })?;
        scopeguard::ScopeGuard::into_inner(orphan);

        Ok(Self {
            pid,
            executable,
            shared,
        })
    }

    /// The OS process id.
    pub fn id(&self) -> u32 {
        self.pid
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The exit code, published once by the waiter. Clones may be awaited from any thread.
    pub fn result(&self) -> ExitFuture {
        self.shared.exit.clone()
    }

    pub fn state(&self) -> ProcessState {
        let lifecycle = self.shared.lock();
        if lifecycle.native.is_none() {
            ProcessState::Released
        } else if !lifecycle.exited {
            ProcessState::Running
        } else if lifecycle.killed {
            ProcessState::Killed
        } else {
            ProcessState::Completed
        }
    }

    /// Forcibly terminates the child. A no-op once it has exited or been released.
    pub fn kill(&self) -> io::Result<()> {
        let mut lifecycle = self.shared.lock();
        if lifecycle.exited {
            return Ok(());
        }
        let Some(native) = lifecycle.native.clone() else {
            return Ok(());
        };
        // A child that already exited on its own keeps its natural status.
        if native.terminate()? {
            lifecycle.killed = true;
            debug!("Killed pid {}", self.pid);
        }
        Ok(())
    }

    /// Kills the child if it is still running, then gives up this handle's claim on it.
    /// The waiter reaps the process, so nothing lingers in the process table. Idempotent.
    pub fn release(&self) -> io::Result<()> {
        let killed = self.kill();
        let mut lifecycle = self.shared.lock();
        if lifecycle.native.take().is_some() {
            debug!("Released pid {}", self.pid);
        }
        killed
    }

    /// [`ProcessHandle::release`] with failures logged instead of returned.
    pub fn close(&self) {
        if let Err(e) = self.release() {
            warn!("Failed to terminate pid {} during close: {}", self.pid, e);
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn wait_for_exit(native: &NativeChild, shared: &Shared) {
    if let Err(e) = native.wait_exit() {
        warn!("Waiting for pid {} failed: {}", native.id(), e);
    }
    let code = {
        let mut lifecycle = shared.lock();
        lifecycle.exited = true;
        native.reap().unwrap_or_else(|e| {
            warn!("Could not collect exit status of pid {}: {}", native.id(), e);
            UNKNOWN_EXIT_CODE
        })
    };
    debug!("pid {} exited with {}", native.id(), code);
    shared.exit.resolve(code);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::system::descriptor::create_pipe;
    use std::io::Read;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn sh(script: &str) -> ProcessBuilder<'static> {
        ProcessBuilder::new("/bin/sh").arguments(["sh", "-c", script])
    }

    fn read_all(handle: &ResourceHandle) -> String {
        let mut out = String::new();
        let mut reader = handle;
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_stdout_pipe_and_exit_code() {
        let pipe = create_pipe().unwrap();
        let child = sh("echo hello; echo world; exit 0")
            .stdout(&pipe.writer)
            .spawn()
            .unwrap();
        pipe.writer.release();

        assert_eq!(read_all(&pipe.reader), "hello\nworld\n");
        assert_eq!(child.result().wait_timeout(TIMEOUT), Some(0));
        assert_eq!(child.state(), ProcessState::Completed);
    }

    #[test]
    fn test_exit_code_is_reported() {
        let child = sh("exit 7").spawn().unwrap();
        assert_eq!(child.result().wait_timeout(TIMEOUT), Some(7));
    }

    #[test]
    fn test_only_listed_descriptors_reach_the_child() {
        let listed = create_pipe().unwrap();
        let unlisted = create_pipe().unwrap();
        unlisted.writer.set_inheritable(true).unwrap();
        listed.writer.set_inheritable(false).unwrap();

        let probe = |fd: i64| format!("test -e /proc/self/fd/{}", fd);

        let hidden = sh(&probe(unlisted.writer.handle_value().unwrap()))
            .extra_descriptor(&listed.writer)
            .spawn()
            .unwrap();
        assert_eq!(hidden.result().wait_timeout(TIMEOUT), Some(1));

        let visible = sh(&probe(listed.writer.handle_value().unwrap()))
            .extra_descriptor(&listed.writer)
            .spawn()
            .unwrap();
        assert_eq!(visible.result().wait_timeout(TIMEOUT), Some(0));

        // The caller's own flags are untouched.
        assert!(unlisted.writer.is_inheritable().unwrap());
        assert!(!listed.writer.is_inheritable().unwrap());
    }

    #[test]
    fn test_listed_descriptor_is_writable_in_child() {
        let pipe = create_pipe().unwrap();
        let fd = pipe.writer.handle_value().unwrap();
        let child = sh(&format!("echo through-extra >&{}", fd))
            .extra_descriptor(&pipe.writer)
            .spawn()
            .unwrap();
        pipe.writer.release();

        assert_eq!(read_all(&pipe.reader), "through-extra\n");
        assert_eq!(child.result().wait_timeout(TIMEOUT), Some(0));
    }

    #[test]
    fn test_release_terminates_running_child() {
        let child = sh("sleep 30").spawn().unwrap();
        let pid = nix::unistd::Pid::from_raw(child.id() as i32);
        assert_eq!(child.state(), ProcessState::Running);

        child.release().unwrap();
        assert_eq!(child.state(), ProcessState::Released);

        let code = child.result().wait_timeout(TIMEOUT);
        assert_eq!(code, Some(128 + 9));
        // Reaped: the pid no longer exists, not even as a zombie.
        assert_eq!(
            nix::sys::signal::kill(pid, None),
            Err(nix::errno::Errno::ESRCH)
        );
    }

    #[test]
    fn test_kill_and_release_are_idempotent() {
        let child = sh("sleep 30").spawn().unwrap();

        child.kill().unwrap();
        child.kill().unwrap();
        assert_eq!(child.result().wait_timeout(TIMEOUT), Some(128 + 9));
        assert_eq!(child.state(), ProcessState::Killed);

        child.kill().unwrap();
        child.release().unwrap();
        child.release().unwrap();
        child.close();
        assert_eq!(child.state(), ProcessState::Released);
    }

    #[test]
    fn test_kill_after_natural_exit_keeps_exit_status() {
        let args = [OsString::from("sh"), "-c".into(), "exit 0".into()];
        let cwd = std::env::current_dir().unwrap();
        let plan = SpawnPlan {
            executable: Path::new("/bin/sh"),
            args: &args,
            working_dir: &cwd,
            environment: &[],
            stdio: [None; 3],
            inherit: &[],
        };
        let child = sys::spawn(&plan).unwrap();

        // Exited but not yet reaped, as the waiter sees it before taking the lock.
        child.wait_exit().unwrap();
        assert!(!child.terminate().unwrap());
        assert_eq!(child.reap().unwrap(), 0);
    }

    #[test]
    fn test_kill_of_finished_child_reports_completed() {
        let child = sh("exit 0").spawn().unwrap();
        assert_eq!(child.result().wait_timeout(TIMEOUT), Some(0));

        child.kill().unwrap();
        assert_eq!(child.state(), ProcessState::Completed);
    }

    #[test]
    fn test_environment_is_replaced() {
        let pipe = create_pipe().unwrap();
        let child = sh("printf '%s|%s' \"$ONLY_VAR\" \"$HOME\"")
            .environment([("ONLY_VAR", "present")])
            .stdout(&pipe.writer)
            .spawn()
            .unwrap();
        pipe.writer.release();

        assert_eq!(read_all(&pipe.reader), "present|");
        assert_eq!(child.result().wait_timeout(TIMEOUT), Some(0));
    }

    #[test]
    fn test_working_dir_and_argv0() {
        let dir = tempfile::TempDir::new().unwrap();
        let pipe = create_pipe().unwrap();
        let child = ProcessBuilder::new("/bin/sh")
            .arguments(["custom-argv0", "-c", "pwd; echo $0"])
            .working_dir(dir.path())
            .stdout(&pipe.writer)
            .spawn()
            .unwrap();
        pipe.writer.release();

        let output = read_all(&pipe.reader);
        let mut lines = output.lines();
        let pwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(lines.next(), Some("custom-argv0"));
        assert_eq!(child.result().wait_timeout(TIMEOUT), Some(0));
    }

    #[test]
    fn test_missing_executable_fails_synchronously() {
        let err = ProcessBuilder::new("/definitely/not/here")
            .spawn()
            .unwrap_err();

        assert!(matches!(err, SpawnError::Spawn { .. }));
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_released_stdout_fails_spawn() {
        let pipe = create_pipe().unwrap();
        pipe.writer.release();

        let err = sh("true").stdout(&pipe.writer).spawn().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    #[ignore = "needs ping and loopback ICMP"]
    fn test_ping_loopback() {
        let pipe = create_pipe().unwrap();
        let child = ProcessBuilder::new("/bin/ping")
            .arguments(["ping", "-c", "4", "127.0.0.1"])
            .stdout(&pipe.writer)
            .spawn()
            .unwrap();
        pipe.writer.release();

        assert!(!read_all(&pipe.reader).is_empty());
        assert_eq!(child.result().wait_timeout(Duration::from_secs(30)), Some(0));
    }
}
