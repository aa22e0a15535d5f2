// src/system/descriptor.rs

//! Pipes, socket pairs and adoption of std I/O objects as [`ResourceHandle`]s.
//!
//! Everything created here starts out non-inheritable. Children only ever see a
//! descriptor when it is passed to the process controller explicitly.

use crate::system::handle::ResourceHandle;
use crate::system::sys::{self, HandleKind};
use std::io;

/// The two ends of a unidirectional pipe.
#[derive(Debug)]
pub struct Pipe {
    pub reader: ResourceHandle,
    pub writer: ResourceHandle,
}

/// Two connected, bidirectional stream sockets.
#[derive(Debug)]
pub struct DescriptorPair {
    pub first: ResourceHandle,
    pub second: ResourceHandle,
}

/// Creates an anonymous pipe. Bytes written to `writer` come out of `reader` in order.
pub fn create_pipe() -> io::Result<Pipe> {
    let (reader, writer) = sys::create_pipe()?;
    Ok(Pipe {
        reader: reader.into_resource_handle(),
        writer: writer.into_resource_handle(),
    })
}

/// Creates a connected socket pair: a Unix-domain pair on POSIX, a loopback TCP pair on Windows.
pub fn create_socket_pair() -> io::Result<DescriptorPair> {
    let (first, second) = sys::create_socket_pair()?;
    Ok(DescriptorPair {
        first: socket_handle(first),
        second: socket_handle(second),
    })
}

#[cfg(unix)]
fn socket_handle(fd: std::os::fd::OwnedFd) -> ResourceHandle {
    ResourceHandle::from_raw(sys::into_raw(fd), HandleKind::Socket)
}

#[cfg(windows)]
fn socket_handle(socket: std::os::windows::io::OwnedSocket) -> ResourceHandle {
    ResourceHandle::from_raw(sys::socket_into_raw(socket), HandleKind::Socket)
}

/// Adopts a std I/O object. The resulting handle owns (and eventually closes) the descriptor.
pub trait IntoResourceHandle {
    fn into_resource_handle(self) -> ResourceHandle;
}

/// Adopts a std I/O object, e.g. a `File` or `ChildStdout`, as a [`ResourceHandle`].
pub fn into_resource_handle<T: IntoResourceHandle>(stream: T) -> ResourceHandle {
    stream.into_resource_handle()
}

#[cfg(unix)]
mod adopt {
    use super::*;
    use std::os::fd::OwnedFd;

    macro_rules! impl_into_resource_handle {
        ($kind:expr => $($ty:ty),+ $(,)?) => {
            $(
                impl IntoResourceHandle for $ty {
                    fn into_resource_handle(self) -> ResourceHandle {
                        ResourceHandle::from_raw(sys::into_raw(OwnedFd::from(self)), $kind)
                    }
                }
            )+
        };
    }

    impl_into_resource_handle!(HandleKind::File =>
        OwnedFd,
        std::fs::File,
        std::io::PipeReader,
        std::io::PipeWriter,
        std::process::ChildStdin,
        std::process::ChildStdout,
        std::process::ChildStderr,
    );
    impl_into_resource_handle!(HandleKind::Socket =>
        std::net::TcpStream,
        std::net::TcpListener,
        std::net::UdpSocket,
        std::os::unix::net::UnixStream,
        std::os::unix::net::UnixListener,
        std::os::unix::net::UnixDatagram,
    );
}

#[cfg(windows)]
mod adopt {
    use super::*;
    use std::os::windows::io::{OwnedHandle, OwnedSocket};

    macro_rules! impl_into_resource_handle {
        (handle => $($ty:ty),+ $(,)?) => {
            $(
                impl IntoResourceHandle for $ty {
                    fn into_resource_handle(self) -> ResourceHandle {
                        ResourceHandle::from_raw(sys::handle_into_raw(OwnedHandle::from(self)), HandleKind::File)
                    }
                }
            )+
        };
        (socket => $($ty:ty),+ $(,)?) => {
            $(
                impl IntoResourceHandle for $ty {
                    fn into_resource_handle(self) -> ResourceHandle {
                        ResourceHandle::from_raw(sys::socket_into_raw(OwnedSocket::from(self)), HandleKind::Socket)
                    }
                }
            )+
        };
    }

    impl_into_resource_handle!(handle =>
        OwnedHandle,
        std::fs::File,
        std::io::PipeReader,
        std::io::PipeWriter,
        std::process::ChildStdin,
        std::process::ChildStdout,
        std::process::ChildStderr,
    );
    impl_into_resource_handle!(socket =>
        OwnedSocket,
        std::net::TcpStream,
        std::net::TcpListener,
        std::net::UdpSocket,
    );
}
