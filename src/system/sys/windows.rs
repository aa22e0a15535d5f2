// src/system/sys/windows.rs

// Win32 handle flags, process creation and handle-list attributes.
#![allow(unsafe_code)]

use super::{HandleKind, SpawnPlan};
use log::{trace, warn};
use std::ffi::{OsStr, OsString, c_void};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::mem::{ManuallyDrop, size_of};
use std::net::{TcpListener, TcpStream};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{
    AsRawHandle, FromRawHandle, FromRawSocket, IntoRawHandle, IntoRawSocket, OwnedHandle,
    OwnedSocket, RawHandle,
};
use windows::Win32::Foundation::{
    BOOL, CloseHandle, DUPLICATE_SAME_ACCESS, DuplicateHandle, GetHandleInformation, HANDLE,
    HANDLE_FLAG_INHERIT, HANDLE_FLAGS, SetHandleInformation, WAIT_FAILED, WAIT_OBJECT_0,
};
use windows::Win32::System::Threading::{
    CREATE_UNICODE_ENVIRONMENT, CreateProcessW, DeleteProcThreadAttributeList,
    EXTENDED_STARTUPINFO_PRESENT, GetCurrentProcess, GetExitCodeProcess, INFINITE, InitializeProcThreadAttributeList,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, STARTF_USESTDHANDLES, STARTUPINFOEXW,
    TerminateProcess, UpdateProcThreadAttribute, WaitForSingleObject,
};
use windows::core::{PCWSTR, PWSTR};

pub(crate) type Raw = u64;
pub(crate) type AtomicRaw = std::sync::atomic::AtomicU64;
pub(crate) const INVALID: Raw = u64::MAX;

const PROC_THREAD_ATTRIBUTE_HANDLE_LIST: usize = 0x0002_0002;
const KILLED_EXIT_CODE: u32 = crate::constants::KILLED_EXIT_CODE;

fn handle(raw: Raw) -> HANDLE {
    HANDLE(raw as usize as *mut c_void)
}

fn raw_of(handle: RawHandle) -> Raw {
    handle as usize as Raw
}

pub(crate) fn close(raw: Raw, kind: HandleKind) -> io::Result<()> {
    match kind {
        HandleKind::File => {
            // SAFETY: the handle layer closes each value exactly once.
            unsafe { CloseHandle(handle(raw)) }?;
        }
        // SAFETY: as above; dropping the socket runs `closesocket`.
        HandleKind::Socket => drop(unsafe { OwnedSocket::from_raw_socket(raw) }),
    }
    Ok(())
}

pub(crate) fn set_inheritable(raw: Raw, _kind: HandleKind, inheritable: bool) -> io::Result<()> {
    let flags = if inheritable {
        HANDLE_FLAG_INHERIT
    } else {
        HANDLE_FLAGS(0)
    };
    // SAFETY: plain flag update on a handle the caller owns.
    unsafe { SetHandleInformation(handle(raw), HANDLE_FLAG_INHERIT.0, flags) }?;
    Ok(())
}

pub(crate) fn is_inheritable(raw: Raw, _kind: HandleKind) -> io::Result<bool> {
    let mut flags = 0u32;
    // SAFETY: `flags` outlives the call.
    unsafe { GetHandleInformation(handle(raw), &mut flags) }?;
    Ok(flags & HANDLE_FLAG_INHERIT.0 != 0)
}

/// An anonymous pipe, `(read end, write end)`. Neither end is inheritable.
pub(crate) fn create_pipe() -> io::Result<(OwnedHandle, OwnedHandle)> {
    let (reader, writer) = io::pipe()?;
    Ok((OwnedHandle::from(reader), OwnedHandle::from(writer)))
}

/// A connected loopback TCP pair. Neither end is inheritable.
pub(crate) fn create_socket_pair() -> io::Result<(OwnedSocket, OwnedSocket)> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let address = listener.local_addr()?;
    let first = TcpStream::connect(address)?;
    let local = first.local_addr()?;
    loop {
        let (second, peer) = listener.accept()?;
        // Anything else that raced onto the port is dropped.
        if peer == local {
            first.set_nodelay(true)?;
            second.set_nodelay(true)?;
            return Ok((OwnedSocket::from(first), OwnedSocket::from(second)));
        }
        warn!("Dropping unexpected loopback connection from {}", peer);
    }
}

pub(crate) fn read(raw: Raw, kind: HandleKind, buf: &mut [u8]) -> io::Result<usize> {
    match kind {
        HandleKind::File => {
            // SAFETY: borrowed view; `ManuallyDrop` keeps it from closing the handle.
            let mut file = ManuallyDrop::new(unsafe { File::from_raw_handle(handle(raw).0) });
            file.read(buf)
        }
        HandleKind::Socket => {
            // SAFETY: as above.
            let mut stream = ManuallyDrop::new(unsafe { TcpStream::from_raw_socket(raw) });
            stream.read(buf)
        }
    }
}

pub(crate) fn write(raw: Raw, kind: HandleKind, buf: &[u8]) -> io::Result<usize> {
    match kind {
        HandleKind::File => {
            // SAFETY: borrowed view; `ManuallyDrop` keeps it from closing the handle.
            let mut file = ManuallyDrop::new(unsafe { File::from_raw_handle(handle(raw).0) });
            file.write(buf)
        }
        HandleKind::Socket => {
            // SAFETY: as above.
            let mut stream = ManuallyDrop::new(unsafe { TcpStream::from_raw_socket(raw) });
            stream.write(buf)
        }
    }
}

pub(crate) fn flush(_raw: Raw, _kind: HandleKind) -> io::Result<()> {
    Ok(())
}

/// A spawned child, identified by its process handle. The handle keeps the exit
/// code available until dropped.
#[derive(Debug)]
pub(crate) struct NativeChild {
    process: OwnedHandle,
    pid: u32,
}

impl NativeChild {
    pub(crate) fn id(&self) -> u32 {
        self.pid
    }

    fn process(&self) -> HANDLE {
        HANDLE(self.process.as_raw_handle())
    }

    pub(crate) fn wait_exit(&self) -> io::Result<()> {
        // SAFETY: the process handle is owned by `self`.
        match unsafe { WaitForSingleObject(self.process(), INFINITE) } {
            WAIT_FAILED => Err(io::Error::last_os_error()),
            _ => Ok(()),
        }
    }

    /// Returns whether the child was still running and has now been terminated.
    pub(crate) fn terminate(&self) -> io::Result<bool> {
        // SAFETY: the process handle is owned by `self`.
        if unsafe { WaitForSingleObject(self.process(), 0) } == WAIT_OBJECT_0 {
            return Ok(false);
        }
        // SAFETY: as above.
        unsafe { TerminateProcess(self.process(), KILLED_EXIT_CODE) }?;
        Ok(true)
    }

    pub(crate) fn reap(&self) -> io::Result<i32> {
        let mut code = 0u32;
        // SAFETY: `code` outlives the call.
        unsafe { GetExitCodeProcess(self.process(), &mut code) }?;
        Ok(code as i32)
    }
}

/// Quotes one argument following the MSVC runtime parsing rules.
fn append_quoted(arg: &OsStr, force_quotes: bool, out: &mut Vec<u16>) {
    let wide: Vec<u16> = arg.encode_wide().collect();
    let needs_quotes = force_quotes
        || wide.is_empty()
        || wide.iter().any(|&c| c == ' ' as u16 || c == '\t' as u16 || c == '"' as u16);
    if !needs_quotes {
        out.extend_from_slice(&wide);
        return;
    }

    out.push('"' as u16);
    let mut backslashes = 0usize;
    for &c in &wide {
        if c == '\\' as u16 {
            backslashes += 1;
            continue;
        }
        if c == '"' as u16 {
            out.extend(std::iter::repeat_n('\\' as u16, backslashes * 2 + 1));
        } else {
            out.extend(std::iter::repeat_n('\\' as u16, backslashes));
        }
        backslashes = 0;
        out.push(c);
    }
    out.extend(std::iter::repeat_n('\\' as u16, backslashes * 2));
    out.push('"' as u16);
}

fn command_line(args: &[OsString]) -> Vec<u16> {
    let mut line = Vec::new();
    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            line.push(' ' as u16);
        }
        append_quoted(arg, index == 0, &mut line);
    }
    line.push(0);
    line
}

fn environment_block(environment: &[(OsString, OsString)]) -> Vec<u16> {
    let mut block = Vec::new();
    for (key, value) in environment {
        block.extend(key.encode_wide());
        block.push('=' as u16);
        block.extend(value.encode_wide());
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    block
}

fn wide_path(path: &std::path::Path) -> Vec<u16> {
    path.as_os_str().encode_wide().chain(Some(0)).collect()
}

/// Owned `PROC_THREAD_ATTRIBUTE_LIST` storage.
struct AttributeList {
    buffer: Vec<u8>,
}

impl AttributeList {
    fn with_handle_list(handles: &[HANDLE]) -> io::Result<Self> {
        let mut size = 0usize;
        // SAFETY: size query; failure with ERROR_INSUFFICIENT_BUFFER is expected.
        let _ = unsafe {
            InitializeProcThreadAttributeList(LPPROC_THREAD_ATTRIBUTE_LIST::default(), 1, 0, &mut size)
        };
        let mut list = Self {
            buffer: vec![0u8; size],
        };
        // SAFETY: `buffer` has the size the query asked for.
        unsafe { InitializeProcThreadAttributeList(list.as_raw(), 1, 0, &mut size) }?;
        // SAFETY: `handles` outlives the `CreateProcessW` call that reads the list.
        let updated = unsafe {
            UpdateProcThreadAttribute(
                list.as_raw(),
                0,
                PROC_THREAD_ATTRIBUTE_HANDLE_LIST,
                Some(handles.as_ptr() as *const c_void),
                size_of::<HANDLE>() * handles.len(),
                None,
                None,
            )
        };
        if let Err(e) = updated {
            // SAFETY: the list was initialized above.
            unsafe { DeleteProcThreadAttributeList(list.as_raw()) };
            list.buffer.clear();
            return Err(e.into());
        }
        Ok(list)
    }

    fn as_raw(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.buffer.as_mut_ptr() as *mut c_void)
    }
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            // SAFETY: initialized in `with_handle_list`.
            unsafe { DeleteProcThreadAttributeList(self.as_raw()) };
        }
    }
}

/// Duplicates `raw` within this process with the inherit flag set. Closed on drop.
fn inheritable_copy(raw: Raw) -> io::Result<OwnedHandle> {
    let mut copy = HANDLE::default();
    // SAFETY: `raw` is a live handle owned by the handle layer; `copy` receives a new one.
    unsafe {
        let current = GetCurrentProcess();
        DuplicateHandle(
            current,
            handle(raw),
            current,
            &mut copy,
            0,
            BOOL::from(true),
            DUPLICATE_SAME_ACCESS,
        )
    }?;
    // SAFETY: `copy` was just created and is owned by nobody else.
    Ok(unsafe { OwnedHandle::from_raw_handle(copy.0) })
}

pub(crate) fn spawn(plan: &SpawnPlan<'_>) -> io::Result<NativeChild> {
    // Unset stdio slots get the null device; it is closed once the child has its copy.
    let null_device = if plan.stdio.iter().any(Option::is_none) {
        Some(OpenOptions::new().read(true).write(true).open("NUL")?)
    } else {
        None
    };
    let null_raw = null_device.as_ref().map(|f| raw_of(f.as_raw_handle()));
    let [stdin, stdout, stderr] = plan
        .stdio
        .map(|slot| slot.or(null_raw).unwrap_or(INVALID));

    let mut listed: Vec<Raw> = [stdin, stdout, stderr]
        .into_iter()
        .chain(plan.inherit.iter().copied())
        .filter(|&raw| raw != INVALID)
        .collect();
    listed.sort_unstable();
    listed.dedup();

    // The child inherits private inheritable duplicates; the caller's handles keep their flags.
    let copies = listed
        .iter()
        .map(|&raw| inheritable_copy(raw))
        .collect::<io::Result<Vec<OwnedHandle>>>()?;
    let copy_of = |raw: Raw| {
        listed
            .binary_search(&raw)
            .ok()
            .and_then(|at| copies.get(at))
            .map_or_else(|| handle(raw), |copy| HANDLE(copy.as_raw_handle()))
    };

    let handles: Vec<HANDLE> = copies.iter().map(|c| HANDLE(c.as_raw_handle())).collect();
    let mut attributes = AttributeList::with_handle_list(&handles)?;

    let mut startup = STARTUPINFOEXW::default();
    startup.StartupInfo.cb = size_of::<STARTUPINFOEXW>() as u32;
    startup.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
    startup.StartupInfo.hStdInput = copy_of(stdin);
    startup.StartupInfo.hStdOutput = copy_of(stdout);
    startup.StartupInfo.hStdError = copy_of(stderr);
    startup.lpAttributeList = attributes.as_raw();

    let application = wide_path(plan.executable);
    let mut line = command_line(plan.args);
    let environment = environment_block(plan.environment);
    let working_dir = wide_path(plan.working_dir);
    let mut info = PROCESS_INFORMATION::default();

    // SAFETY: every buffer passed here lives until the call returns.
    unsafe {
        CreateProcessW(
            PCWSTR(application.as_ptr()),
            PWSTR(line.as_mut_ptr()),
            None,
            None,
            BOOL::from(true),
            EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
            Some(environment.as_ptr() as *const c_void),
            PCWSTR(working_dir.as_ptr()),
            &startup.StartupInfo,
            &mut info,
        )
    }?;

    // SAFETY: both handles were just returned to us and are owned by nobody else.
    let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess.0) };
    drop(unsafe { OwnedHandle::from_raw_handle(info.hThread.0) });
    trace!("Spawned pid {} for '{}'", info.dwProcessId, plan.executable.display());

    Ok(NativeChild {
        process,
        pid: info.dwProcessId,
    })
}

pub(crate) fn handle_into_raw(handle: OwnedHandle) -> Raw {
    raw_of(handle.into_raw_handle())
}

pub(crate) fn socket_into_raw(socket: OwnedSocket) -> Raw {
    socket.into_raw_socket()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_of(args: &[&str]) -> String {
        let args: Vec<OsString> = args.iter().map(OsString::from).collect();
        let mut wide = command_line(&args);
        wide.pop();
        String::from_utf16(&wide).unwrap()
    }

    #[test]
    fn test_command_line_quoting() {
        assert_eq!(line_of(&["C:\\app.exe", "plain"]), "\"C:\\app.exe\" plain");
        assert_eq!(line_of(&["a", "two words"]), "\"a\" \"two words\"");
        assert_eq!(line_of(&["a", "say \"hi\""]), "\"a\" \"say \\\"hi\\\"\"");
        assert_eq!(line_of(&["a", "trailing\\ slash\\"]), "\"a\" \"trailing\\ slash\\\\\"");
        assert_eq!(line_of(&["a", ""]), "\"a\" \"\"");
    }

    #[test]
    fn test_inheritable_copy_leaves_original_flag() {
        let (_reader, writer_handle) = create_pipe().unwrap();
        let writer = raw_of(writer_handle.as_raw_handle());
        let copy = inheritable_copy(writer).unwrap();

        assert!(!is_inheritable(writer, HandleKind::File).unwrap());
        assert!(is_inheritable(raw_of(copy.as_raw_handle()), HandleKind::File).unwrap());
    }

    #[test]
    fn test_concurrent_spawns_share_stdout() {
        let (_reader, writer_handle) = create_pipe().unwrap();
        let writer = raw_of(writer_handle.as_raw_handle());
        let cmd = std::env::var_os("ComSpec")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| "C:\\Windows\\System32\\cmd.exe".into());
        let args: Vec<OsString> = ["cmd", "/C", "exit 0"].iter().map(OsString::from).collect();
        let environment: Vec<(OsString, OsString)> = std::env::vars_os().collect();
        let cwd = std::env::current_dir().unwrap();
        let plan = SpawnPlan {
            executable: &cmd,
            args: &args,
            working_dir: &cwd,
            environment: &environment,
            stdio: [None, Some(writer), Some(writer)],
            inherit: &[],
        };

        std::thread::scope(|scope| {
            let spawners: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let child = spawn(&plan).unwrap();
                        child.wait_exit().unwrap();
                        child.reap().unwrap()
                    })
                })
                .collect();
            for spawner in spawners {
                assert_eq!(spawner.join().unwrap(), 0);
            }
        });
        assert!(!is_inheritable(writer, HandleKind::File).unwrap());
    }

    #[test]
    fn test_environment_block_layout() {
        let block = environment_block(&[(OsString::from("A"), OsString::from("1"))]);
        assert_eq!(String::from_utf16(&block).unwrap(), "A=1\0\0");
        assert_eq!(environment_block(&[]), vec![0, 0]);
    }
}
