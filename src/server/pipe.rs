//! Local pipe transports.
//!
//! The server is written against two narrow traits: a listener that is
//! polled for new clients and a stream that is polled for bytes. On Windows
//! the transport is a multi-instance named pipe in message mode; elsewhere a
//! Unix domain socket provides the same local, bidirectional channel (and
//! carries the integration tests).

use super::PipeServerConfig;
use std::io;

/// Outcome of one non-blocking read attempt.
pub enum PollRead {
    Data(usize),
    WouldBlock,
    Disconnected,
}

pub trait PipeStream: Send {
    /// Read whatever is available right now into `buf`, without blocking.
    fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<PollRead>;

    /// Write the whole buffer, bounded by the configured write timeout.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

pub trait PipeListener: Send {
    /// Accept one pending client if there is one. `Ok(None)` means "no
    /// client right now"; the caller decides how long to sleep between
    /// polls. Implementations are allowed to block while a client is mid
    /// connect, but must return after [`wake`] is called on their endpoint.
    fn poll_accept(&mut self) -> io::Result<Option<Box<dyn PipeStream>>>;
}

/// Well-known endpoint name clients connect to by default.
pub fn default_pipe_name() -> String {
    #[cfg(windows)]
    {
        r"\\.\pipe\vibedbg_debug".to_string()
    }
    #[cfg(not(windows))]
    {
        std::env::temp_dir()
            .join("vibedbg_debug.sock")
            .to_string_lossy()
            .into_owned()
    }
}

/// Bind the platform listener for `config`.
pub fn bind(config: &PipeServerConfig) -> io::Result<Box<dyn PipeListener>> {
    #[cfg(windows)]
    {
        Ok(Box::new(windows_pipe::NamedPipeListener::new(config)))
    }
    #[cfg(not(windows))]
    {
        Ok(Box::new(unix_socket::UnixSocketListener::bind(config)?))
    }
}

/// Unblock a listener stuck waiting for a client on `pipe_name`. Used by
/// server shutdown; a no-op where accepts never block.
pub fn wake(pipe_name: &str) {
    #[cfg(windows)]
    windows_pipe::wake(pipe_name);
    #[cfg(not(windows))]
    let _ = pipe_name;
}

#[cfg(not(windows))]
mod unix_socket {
    use super::{PipeListener, PipeStream, PollRead};
    use crate::server::PipeServerConfig;
    use std::io::{self, Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    pub struct UnixSocketListener {
        listener: UnixListener,
        path: PathBuf,
        write_timeout: Duration,
    }

    impl UnixSocketListener {
        pub fn bind(config: &PipeServerConfig) -> io::Result<Self> {
            let path = PathBuf::from(&config.pipe_name);
            if path.exists() {
                // Stale endpoint from a previous run.
                let _ = std::fs::remove_file(&path);
            }
            let listener = UnixListener::bind(&path)?;
            listener.set_nonblocking(true)?;
            Ok(UnixSocketListener {
                listener,
                path,
                write_timeout: config.write_timeout,
            })
        }
    }

    impl PipeListener for UnixSocketListener {
        fn poll_accept(&mut self) -> io::Result<Option<Box<dyn PipeStream>>> {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(true)?;
                    Ok(Some(Box::new(UnixSocketStream {
                        stream,
                        write_timeout: self.write_timeout,
                    })))
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e),
            }
        }
    }

    impl Drop for UnixSocketListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    struct UnixSocketStream {
        stream: UnixStream,
        write_timeout: Duration,
    }

    fn is_disconnect(kind: io::ErrorKind) -> bool {
        matches!(
            kind,
            io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
        )
    }

    impl PipeStream for UnixSocketStream {
        fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<PollRead> {
            match self.stream.read(buf) {
                Ok(0) => Ok(PollRead::Disconnected),
                Ok(n) => Ok(PollRead::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(PollRead::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(PollRead::WouldBlock),
                Err(e) if is_disconnect(e.kind()) => Ok(PollRead::Disconnected),
                Err(e) => Err(e),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let deadline = Instant::now() + self.write_timeout;
            let mut written = 0;
            while written < data.len() {
                match self.stream.write(&data[written..]) {
                    Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                    Ok(n) => written += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        if Instant::now() >= deadline {
                            return Err(io::ErrorKind::TimedOut.into());
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.stream.flush()
        }
    }
}

#[cfg(windows)]
mod windows_pipe {
    use super::{PipeListener, PipeStream, PollRead};
    use crate::handle::OwnedHandle;
    use crate::server::PipeServerConfig;
    use std::io;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{
        ERROR_BROKEN_PIPE, ERROR_NO_DATA, ERROR_PIPE_CONNECTED, ERROR_PIPE_NOT_CONNECTED,
        GENERIC_READ, GENERIC_WRITE, HANDLE,
    };
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FlushFileBuffers, ReadFile, WriteFile, FILE_FLAGS_AND_ATTRIBUTES,
        FILE_SHARE_NONE, OPEN_EXISTING,
    };
    use windows::Win32::System::Pipes::{
        ConnectNamedPipe, DisconnectNamedPipe, PeekNamedPipe, CreateNamedPipeW,
        PIPE_ACCESS_DUPLEX, PIPE_READMODE_MESSAGE, PIPE_TYPE_MESSAGE, PIPE_WAIT,
    };

    fn wide(name: &str) -> Vec<u16> {
        name.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn raw(handle: &OwnedHandle) -> HANDLE {
        HANDLE(handle.get() as *mut core::ffi::c_void)
    }

    fn is_disconnect(error: &windows::core::Error) -> bool {
        error.code() == ERROR_BROKEN_PIPE.to_hresult()
            || error.code() == ERROR_PIPE_NOT_CONNECTED.to_hresult()
            || error.code() == ERROR_NO_DATA.to_hresult()
    }

    /// Creates one pipe instance per accept, in the multi-instance model:
    /// a new instance goes up before the previous client is done.
    pub struct NamedPipeListener {
        name: Vec<u16>,
        max_instances: u32,
        buffer_size: u32,
        default_timeout_ms: u32,
    }

    impl NamedPipeListener {
        pub fn new(config: &PipeServerConfig) -> Self {
            NamedPipeListener {
                name: wide(&config.pipe_name),
                max_instances: config.max_instances,
                buffer_size: config.buffer_size as u32,
                default_timeout_ms: config.read_timeout.as_millis() as u32,
            }
        }
    }

    impl PipeListener for NamedPipeListener {
        fn poll_accept(&mut self) -> io::Result<Option<Box<dyn PipeStream>>> {
            let handle = unsafe {
                CreateNamedPipeW(
                    PCWSTR(self.name.as_ptr()),
                    PIPE_ACCESS_DUPLEX,
                    PIPE_TYPE_MESSAGE | PIPE_READMODE_MESSAGE | PIPE_WAIT,
                    self.max_instances,
                    self.buffer_size,
                    self.buffer_size,
                    self.default_timeout_ms,
                    None,
                )
            };
            let instance = unsafe { OwnedHandle::adopt(handle.0 as isize) };
            if !instance.is_valid() {
                return Err(io::Error::last_os_error());
            }

            match unsafe { ConnectNamedPipe(raw(&instance), None) } {
                Ok(()) => {}
                Err(e) if e.code() == ERROR_PIPE_CONNECTED.to_hresult() => {}
                Err(e) => return Err(io::Error::from_raw_os_error(e.code().0)),
            }

            Ok(Some(Box::new(NamedPipeStream { handle: instance })))
        }
    }

    /// Briefly connect as a client so a blocked `ConnectNamedPipe` returns.
    pub fn wake(pipe_name: &str) {
        let name = wide(pipe_name);
        let _ = unsafe {
            CreateFileW(
                PCWSTR(name.as_ptr()),
                (GENERIC_READ | GENERIC_WRITE).0,
                FILE_SHARE_NONE,
                None,
                OPEN_EXISTING,
                FILE_FLAGS_AND_ATTRIBUTES(0),
                None,
            )
        }
        .map(|handle| unsafe { OwnedHandle::adopt(handle.0 as isize) });
    }

    struct NamedPipeStream {
        handle: OwnedHandle,
    }

    impl PipeStream for NamedPipeStream {
        fn poll_read(&mut self, buf: &mut [u8]) -> io::Result<PollRead> {
            let mut available = 0u32;
            if let Err(e) =
                unsafe { PeekNamedPipe(raw(&self.handle), None, 0, None, Some(&mut available), None) }
            {
                return if is_disconnect(&e) {
                    Ok(PollRead::Disconnected)
                } else {
                    Err(io::Error::from_raw_os_error(e.code().0))
                };
            }
            if available == 0 {
                return Ok(PollRead::WouldBlock);
            }

            let take = (available as usize).min(buf.len());
            let mut read = 0u32;
            match unsafe { ReadFile(raw(&self.handle), Some(&mut buf[..take]), Some(&mut read), None) }
            {
                Ok(()) if read > 0 => Ok(PollRead::Data(read as usize)),
                Ok(()) => Ok(PollRead::Disconnected),
                Err(e) if is_disconnect(&e) => Ok(PollRead::Disconnected),
                Err(e) => Err(io::Error::from_raw_os_error(e.code().0)),
            }
        }

        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut written = 0u32;
            match unsafe { WriteFile(raw(&self.handle), Some(data), Some(&mut written), None) } {
                Ok(()) if written as usize == data.len() => Ok(()),
                Ok(()) => Err(io::ErrorKind::WriteZero.into()),
                Err(e) if is_disconnect(&e) => Err(io::ErrorKind::BrokenPipe.into()),
                Err(e) => Err(io::Error::from_raw_os_error(e.code().0)),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            unsafe { FlushFileBuffers(raw(&self.handle)) }
                .map_err(|e| io::Error::from_raw_os_error(e.code().0))
        }
    }

    impl Drop for NamedPipeStream {
        fn drop(&mut self) {
            let _ = unsafe { DisconnectNamedPipe(raw(&self.handle)) };
        }
    }
}
