//! virtio socket (`AF_VSOCK`) backend.
//!
//! Linux only. Every raw syscall and `sockaddr_vm` conversion lives in this
//! module; the rest of the crate only sees [`VsockStream`] through
//! [`RawStream`](crate::traits::RawStream).

use std::fmt;

use crate::addr::{VsockAddr, VMADDR_CID_ANY, VMADDR_CID_HOST};
use crate::error::Result;
#[cfg(not(target_os = "linux"))]
use crate::error::TransportError;
use crate::traits::{Listener, Transport, VirtStream};

/// [`Transport`] over virtio sockets.
///
/// Without an explicit CID, dialing targets the host and listening binds
/// the wildcard CID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VsockTransport {
    cid: Option<u32>,
    port: u32,
}

impl VsockTransport {
    pub const fn new(cid: Option<u32>, port: u32) -> Self {
        Self { cid, port }
    }

    pub fn dial_addr(&self) -> VsockAddr {
        VsockAddr::new(self.cid.unwrap_or(VMADDR_CID_HOST), self.port)
    }

    pub fn listen_addr(&self) -> VsockAddr {
        VsockAddr::new(self.cid.unwrap_or(VMADDR_CID_ANY), self.port)
    }
}

impl Transport for VsockTransport {
    fn name(&self) -> &'static str {
        "vsock"
    }

    #[cfg(target_os = "linux")]
    fn dial(&self) -> Result<VirtStream> {
        Ok(VirtStream::from_vsock(sys::VsockStream::connect(
            self.dial_addr(),
        )?))
    }

    #[cfg(target_os = "linux")]
    fn listen(&self) -> Result<Box<dyn Listener>> {
        Ok(Box::new(sys::VsockListener::bind(self.listen_addr())?))
    }

    #[cfg(not(target_os = "linux"))]
    fn dial(&self) -> Result<VirtStream> {
        Err(TransportError::Unimplemented(
            "virtio sockets are only available on Linux",
        ))
    }

    #[cfg(not(target_os = "linux"))]
    fn listen(&self) -> Result<Box<dyn Listener>> {
        Err(TransportError::Unimplemented(
            "virtio sockets are only available on Linux",
        ))
    }
}

impl fmt::Display for VsockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cid {
            Some(cid) => write!(f, "vsock://{cid}:{:#x}", self.port),
            None => write!(f, "vsock://:{:#x}", self.port),
        }
    }
}

#[cfg(target_os = "linux")]
pub use sys::{VsockListener, VsockStream};

#[cfg(target_os = "linux")]
mod sys {
    use std::io;
    use std::mem::size_of;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::time::Duration;

    use tracing::{debug, info};

    use crate::addr::{SockAddr, VsockAddr};
    use crate::error::{Result, TransportError};
    use crate::traits::{Listener, RawStream, VirtStream};

    const LISTEN_BACKLOG: libc::c_int = 128;

    type SockNameFn =
        unsafe extern "C" fn(libc::c_int, *mut libc::sockaddr, *mut libc::socklen_t) -> libc::c_int;

    fn cvt(rc: libc::c_int) -> io::Result<libc::c_int> {
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc)
        }
    }

    fn new_socket() -> io::Result<OwnedFd> {
        // SAFETY: plain socket(2) call; the result is checked before use.
        let fd = cvt(unsafe {
            libc::socket(libc::AF_VSOCK, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0)
        })?;
        // SAFETY: `fd` was just returned by socket(2) and is owned by nobody else.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    fn to_raw(addr: VsockAddr) -> libc::sockaddr_vm {
        // SAFETY: sockaddr_vm is plain old data and all-zero is a valid value.
        let mut raw: libc::sockaddr_vm = unsafe { std::mem::zeroed() };
        raw.svm_family = libc::AF_VSOCK as libc::sa_family_t;
        raw.svm_cid = addr.cid;
        raw.svm_port = addr.port;
        raw
    }

    fn sock_name(fd: &OwnedFd, query: SockNameFn) -> io::Result<VsockAddr> {
        // SAFETY: see `to_raw`.
        let mut raw: libc::sockaddr_vm = unsafe { std::mem::zeroed() };
        let mut len = size_of::<libc::sockaddr_vm>() as libc::socklen_t;
        // SAFETY: `raw` and `len` are valid writable pointers sized for sockaddr_vm.
        cvt(unsafe {
            query(
                fd.as_raw_fd(),
                std::ptr::from_mut(&mut raw).cast::<libc::sockaddr>(),
                &mut len,
            )
        })?;
        Ok(VsockAddr::new(raw.svm_cid, raw.svm_port))
    }

    pub(super) fn timeval(timeout: Option<Duration>) -> io::Result<libc::timeval> {
        let Some(timeout) = timeout else {
            return Ok(libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            });
        };
        if timeout.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot set a zero duration timeout",
            ));
        }
        let mut tv = libc::timeval {
            tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        // Sub-microsecond timeouts would otherwise read as "no timeout".
        if tv.tv_sec == 0 && tv.tv_usec == 0 {
            tv.tv_usec = 1;
        }
        Ok(tv)
    }

    fn set_timeout(fd: &OwnedFd, option: libc::c_int, timeout: Option<Duration>) -> Result<()> {
        let tv = timeval(timeout)?;
        // SAFETY: `tv` is a valid timeval and the length matches its size.
        cvt(unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                option,
                std::ptr::from_ref(&tv).cast::<libc::c_void>(),
                size_of::<libc::timeval>() as libc::socklen_t,
            )
        })?;
        Ok(())
    }

    /// A connected virtio socket.
    #[derive(Debug)]
    pub struct VsockStream {
        fd: OwnedFd,
    }

    impl VsockStream {
        /// Connect to `addr`. A failing connect(2) is always reported.
        pub fn connect(addr: VsockAddr) -> Result<Self> {
            let connect_err = |source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            };
            let fd = new_socket().map_err(connect_err)?;
            let raw = to_raw(addr);
            // SAFETY: `raw` is a fully initialised sockaddr_vm and the length matches.
            cvt(unsafe {
                libc::connect(
                    fd.as_raw_fd(),
                    std::ptr::from_ref(&raw).cast::<libc::sockaddr>(),
                    size_of::<libc::sockaddr_vm>() as libc::socklen_t,
                )
            })
            .map_err(connect_err)?;
            debug!(%addr, "connected to vsock");
            Ok(Self { fd })
        }
    }

    impl RawStream for VsockStream {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        }

        fn write(&self, buf: &[u8]) -> io::Result<usize> {
            // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
            let n = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    buf.as_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(n as usize)
        }

        fn close(&self) -> io::Result<()> {
            // SAFETY: shutdown(2) on a descriptor we own.
            match cvt(unsafe { libc::shutdown(self.fd.as_raw_fd(), libc::SHUT_RDWR) }) {
                Ok(_) => Ok(()),
                Err(err) if err.raw_os_error() == Some(libc::ENOTCONN) => Ok(()),
                Err(err) => Err(err),
            }
        }

        fn local_addr(&self) -> Result<SockAddr> {
            Ok(SockAddr::Vsock(sock_name(&self.fd, libc::getsockname)?))
        }

        fn peer_addr(&self) -> Result<SockAddr> {
            Ok(SockAddr::Vsock(sock_name(&self.fd, libc::getpeername)?))
        }

        fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
            set_timeout(&self.fd, libc::SO_RCVTIMEO, timeout)
        }

        fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
            set_timeout(&self.fd, libc::SO_SNDTIMEO, timeout)
        }
    }

    /// A bound, listening virtio socket.
    #[derive(Debug)]
    pub struct VsockListener {
        fd: OwnedFd,
        addr: VsockAddr,
    }

    impl VsockListener {
        /// Bind and listen on `addr`. A failing bind(2) is always reported.
        pub fn bind(addr: VsockAddr) -> Result<Self> {
            let bind_err = |source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            };
            let fd = new_socket().map_err(bind_err)?;
            let raw = to_raw(addr);
            // SAFETY: `raw` is a fully initialised sockaddr_vm and the length matches.
            cvt(unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    std::ptr::from_ref(&raw).cast::<libc::sockaddr>(),
                    size_of::<libc::sockaddr_vm>() as libc::socklen_t,
                )
            })
            .map_err(bind_err)?;
            // SAFETY: listen(2) on a bound descriptor we own.
            cvt(unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) }).map_err(bind_err)?;

            let addr = sock_name(&fd, libc::getsockname).unwrap_or(addr);
            info!(%addr, "listening on vsock");
            Ok(Self { fd, addr })
        }

        pub fn accept(&self) -> Result<VsockStream> {
            // SAFETY: accept4(2) with null address pointers is allowed.
            let fd = cvt(unsafe {
                libc::accept4(
                    self.fd.as_raw_fd(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_CLOEXEC,
                )
            })
            .map_err(TransportError::Accept)?;
            // SAFETY: `fd` was just returned by accept4(2) and is owned by nobody else.
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            debug!(addr = %self.addr, "accepted vsock connection");
            Ok(VsockStream { fd })
        }

        /// Accept a connection if one shows up within `timeout`.
        pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<VsockStream>> {
            if !crate::unix::wait_readable(self.fd.as_raw_fd(), timeout)
                .map_err(TransportError::Accept)?
            {
                return Ok(None);
            }
            self.accept().map(Some)
        }
    }

    impl Listener for VsockListener {
        fn accept(&self) -> Result<VirtStream> {
            Ok(VirtStream::from_vsock(VsockListener::accept(self)?))
        }

        fn accept_timeout(&self, timeout: Duration) -> Result<Option<VirtStream>> {
            Ok(VsockListener::accept_timeout(self, timeout)?.map(VirtStream::from_vsock))
        }

        fn local_addr(&self) -> Result<SockAddr> {
            Ok(SockAddr::Vsock(self.addr))
        }
    }
}
