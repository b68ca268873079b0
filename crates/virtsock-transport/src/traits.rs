use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::addr::SockAddr;
use crate::error::Result;

/// Byte-stream capability every backend provides.
///
/// All methods take `&self`: one thread may block in [`RawStream::read`]
/// while another writes or closes. None of the backends offer a half-close
/// the peer can observe, which is what `virtsock-shutdown` layers on top.
pub trait RawStream: Send + Sync {
    /// Read into `buf`, returning `Ok(0)` at end of stream.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`, returning how many bytes the transport accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Shut down both directions. Blocked readers and writers return
    /// promptly; the descriptor itself is released on drop.
    fn close(&self) -> io::Result<()>;

    fn local_addr(&self) -> Result<SockAddr>;

    fn peer_addr(&self) -> Result<SockAddr>;

    /// Set the read timeout. Backends without deadline support accept and
    /// ignore the value.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Set the write timeout. Backends without deadline support accept and
    /// ignore the value.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()>;
}

/// Produces connected streams for one socket family.
pub trait Transport: fmt::Display + Send + Sync {
    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;

    /// Connect to the configured address.
    fn dial(&self) -> Result<VirtStream>;

    /// Bind and listen on the configured address.
    fn listen(&self) -> Result<Box<dyn Listener>>;
}

/// A bound listener handing out accepted streams.
pub trait Listener: Send + Sync {
    /// Accept an incoming connection (blocking).
    fn accept(&self) -> Result<VirtStream>;

    /// Wait up to `timeout` for a pending connection and accept it.
    /// Returns `Ok(None)` when nothing arrived, including when the wait
    /// was interrupted by a signal.
    fn accept_timeout(&self, timeout: Duration) -> Result<Option<VirtStream>>;

    fn local_addr(&self) -> Result<SockAddr>;
}

/// A connected hypervisor (or local) socket.
///
/// This is the stream type every [`Transport`] returns.
pub struct VirtStream {
    inner: VirtStreamInner,
}

enum VirtStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(target_os = "linux")]
    Vsock(crate::vsock::VsockStream),
    #[cfg(windows)]
    Hvsock(crate::hvsock_windows::HvsockStream),
}

impl VirtStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: VirtStreamInner::Unix(stream),
        }
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn from_vsock(stream: crate::vsock::VsockStream) -> Self {
        Self {
            inner: VirtStreamInner::Vsock(stream),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_hvsock(stream: crate::hvsock_windows::HvsockStream) -> Self {
        Self {
            inner: VirtStreamInner::Hvsock(stream),
        }
    }

    fn as_raw(&self) -> &dyn RawStream {
        match &self.inner {
            #[cfg(unix)]
            VirtStreamInner::Unix(stream) => stream,
            #[cfg(target_os = "linux")]
            VirtStreamInner::Vsock(stream) => stream,
            #[cfg(windows)]
            VirtStreamInner::Hvsock(stream) => stream,
        }
    }

    /// Socket family of the wrapped stream.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            VirtStreamInner::Unix(_) => "unix",
            #[cfg(target_os = "linux")]
            VirtStreamInner::Vsock(_) => "vsock",
            #[cfg(windows)]
            VirtStreamInner::Hvsock(_) => "hvsock",
        }
    }
}

impl RawStream for VirtStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.as_raw().read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.as_raw().write(buf)
    }

    fn close(&self) -> io::Result<()> {
        self.as_raw().close()
    }

    fn local_addr(&self) -> Result<SockAddr> {
        self.as_raw().local_addr()
    }

    fn peer_addr(&self) -> Result<SockAddr> {
        self.as_raw().peer_addr()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.as_raw().set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.as_raw().set_write_timeout(timeout)
    }
}

impl Read for VirtStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        RawStream::read(&*self, buf)
    }
}

impl Write for VirtStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RawStream::write(&*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for VirtStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtStream")
            .field("type", &self.kind())
            .finish()
    }
}

#[cfg(unix)]
impl RawStream for std::os::unix::net::UnixStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream: &std::os::unix::net::UnixStream = self;
        Read::read(&mut stream, buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream: &std::os::unix::net::UnixStream = self;
        Write::write(&mut stream, buf)
    }

    fn close(&self) -> io::Result<()> {
        match self.shutdown(std::net::Shutdown::Both) {
            // macOS reports ENOTCONN once the peer is gone; the socket is shut either way.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn local_addr(&self) -> Result<SockAddr> {
        let addr = std::os::unix::net::UnixStream::local_addr(self)?;
        Ok(SockAddr::Unix(addr.as_pathname().map(|p| p.to_path_buf())))
    }

    fn peer_addr(&self) -> Result<SockAddr> {
        let addr = std::os::unix::net::UnixStream::peer_addr(self)?;
        Ok(SockAddr::Unix(addr.as_pathname().map(|p| p.to_path_buf())))
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout).map_err(Into::into)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout).map_err(Into::into)
    }
}
