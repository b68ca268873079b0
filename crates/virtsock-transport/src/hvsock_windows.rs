//! Raw Winsock `AF_HYPERV` sockets.
//!
//! The only place that builds `SOCKADDR_HV` and calls Winsock directly.

use std::io;
use std::mem::size_of;
use std::sync::Once;
use std::time::Duration;

use tracing::{debug, info};
use windows_sys::Win32::Networking::WinSock::{
    accept, bind, closesocket, connect, getsockname, listen, recv, send, shutdown, socket,
    WSAGetLastError, WSAPoll, WSAStartup, INVALID_SOCKET, POLLRDNORM, SD_BOTH, SOCKADDR, SOCKET,
    SOCKET_ERROR, SOCK_STREAM, WSADATA, WSAPOLLFD,
};

use crate::addr::{Guid, HvsockAddr, SockAddr};
use crate::error::{Result, TransportError};
use crate::traits::{Listener, RawStream, VirtStream};

const AF_HYPERV: u16 = 34;
const HV_PROTOCOL_RAW: i32 = 1;
const LISTEN_BACKLOG: i32 = 128;
const WSAENOTCONN: i32 = 10057;

/// `SOCKADDR_HV` from `hvsocket.h`.
#[repr(C)]
#[derive(Clone, Copy)]
struct SockaddrHv {
    family: u16,
    reserved: u16,
    vm_id: Guid,
    service_id: Guid,
}

impl SockaddrHv {
    fn new(addr: HvsockAddr) -> Self {
        Self {
            family: AF_HYPERV,
            reserved: 0,
            vm_id: addr.vm_id,
            service_id: addr.service_id,
        }
    }

    fn empty() -> Self {
        Self::new(HvsockAddr::new(Guid::ZERO, Guid::ZERO))
    }

    fn addr(&self) -> HvsockAddr {
        HvsockAddr::new(self.vm_id, self.service_id)
    }
}

fn last_error() -> io::Error {
    // SAFETY: reads thread-local Winsock error state.
    io::Error::from_raw_os_error(unsafe { WSAGetLastError() })
}

fn startup() -> io::Result<()> {
    static INIT: Once = Once::new();
    let mut rc = 0;
    INIT.call_once(|| {
        // SAFETY: WSADATA is plain old data; WSAStartup fills it in.
        let mut data: WSADATA = unsafe { std::mem::zeroed() };
        // SAFETY: `data` is a valid writable WSADATA.
        rc = unsafe { WSAStartup(0x0202, &mut data) };
    });
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Owned Winsock handle, closed on drop.
struct OwnedSocket(SOCKET);

impl OwnedSocket {
    fn new() -> io::Result<Self> {
        startup()?;
        // SAFETY: plain socket() call; the result is checked before use.
        let raw = unsafe { socket(i32::from(AF_HYPERV), SOCK_STREAM, HV_PROTOCOL_RAW) };
        if raw == INVALID_SOCKET {
            return Err(last_error());
        }
        Ok(Self(raw))
    }

    fn local(&self) -> io::Result<HvsockAddr> {
        let mut raw = SockaddrHv::empty();
        let mut len = size_of::<SockaddrHv>() as i32;
        // SAFETY: `raw` and `len` are valid writable pointers sized for SOCKADDR_HV.
        let rc = unsafe {
            getsockname(
                self.0,
                std::ptr::from_mut(&mut raw).cast::<SOCKADDR>(),
                &mut len,
            )
        };
        if rc == SOCKET_ERROR {
            return Err(last_error());
        }
        Ok(raw.addr())
    }
}

impl Drop for OwnedSocket {
    fn drop(&mut self) {
        // SAFETY: the handle is owned and closed exactly once.
        unsafe { closesocket(self.0) };
    }
}

/// A connected Hyper-V socket.
///
/// Deadlines are not supported: the timeout setters accept any value and
/// have no effect.
pub struct HvsockStream {
    socket: OwnedSocket,
    remote: HvsockAddr,
}

impl HvsockStream {
    /// Connect to `addr`. A failing connect() is always reported.
    pub fn connect(addr: HvsockAddr) -> Result<Self> {
        let connect_err = |source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        };
        let socket = OwnedSocket::new().map_err(connect_err)?;
        let raw = SockaddrHv::new(addr);
        // SAFETY: `raw` is a fully initialised SOCKADDR_HV and the length matches.
        let rc = unsafe {
            connect(
                socket.0,
                std::ptr::from_ref(&raw).cast::<SOCKADDR>(),
                size_of::<SockaddrHv>() as i32,
            )
        };
        if rc == SOCKET_ERROR {
            return Err(connect_err(last_error()));
        }
        debug!(%addr, "connected to hvsock");
        Ok(Self {
            socket,
            remote: addr,
        })
    }
}

impl RawStream for HvsockStream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(i32::MAX as usize) as i32;
        // SAFETY: `buf` is valid for writes of `len` bytes.
        let n = unsafe { recv(self.socket.0, buf.as_mut_ptr(), len, 0) };
        if n == SOCKET_ERROR {
            return Err(last_error());
        }
        Ok(n as usize)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len().min(i32::MAX as usize) as i32;
        // SAFETY: `buf` is valid for reads of `len` bytes.
        let n = unsafe { send(self.socket.0, buf.as_ptr(), len, 0) };
        if n == SOCKET_ERROR {
            return Err(last_error());
        }
        Ok(n as usize)
    }

    fn close(&self) -> io::Result<()> {
        // SAFETY: shutdown() on a handle we own.
        if unsafe { shutdown(self.socket.0, SD_BOTH) } == SOCKET_ERROR {
            let err = last_error();
            if err.raw_os_error() != Some(WSAENOTCONN) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn local_addr(&self) -> Result<SockAddr> {
        Ok(SockAddr::Hvsock(self.socket.local()?))
    }

    fn peer_addr(&self) -> Result<SockAddr> {
        Ok(SockAddr::Hvsock(self.remote))
    }

    fn set_read_timeout(&self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn set_write_timeout(&self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

/// A bound, listening Hyper-V socket.
pub struct HvsockListener {
    socket: OwnedSocket,
    addr: HvsockAddr,
}

impl HvsockListener {
    /// Bind and listen on `addr`. A failing bind() is always reported.
    pub fn bind(addr: HvsockAddr) -> Result<Self> {
        let bind_err = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let socket = OwnedSocket::new().map_err(bind_err)?;
        let raw = SockaddrHv::new(addr);
        // SAFETY: `raw` is a fully initialised SOCKADDR_HV and the length matches.
        let rc = unsafe {
            bind(
                socket.0,
                std::ptr::from_ref(&raw).cast::<SOCKADDR>(),
                size_of::<SockaddrHv>() as i32,
            )
        };
        if rc == SOCKET_ERROR {
            return Err(bind_err(last_error()));
        }
        // SAFETY: listen() on a bound handle we own.
        if unsafe { listen(socket.0, LISTEN_BACKLOG) } == SOCKET_ERROR {
            return Err(bind_err(last_error()));
        }
        info!(%addr, "listening on hvsock");
        Ok(Self { socket, addr })
    }

    pub fn accept(&self) -> Result<HvsockStream> {
        let mut remote = SockaddrHv::empty();
        let mut len = size_of::<SockaddrHv>() as i32;
        // SAFETY: `remote` and `len` are valid writable pointers sized for SOCKADDR_HV.
        let raw = unsafe {
            accept(
                self.socket.0,
                std::ptr::from_mut(&mut remote).cast::<SOCKADDR>(),
                &mut len,
            )
        };
        if raw == INVALID_SOCKET {
            return Err(TransportError::Accept(last_error()));
        }
        debug!(addr = %self.addr, "accepted hvsock connection");
        Ok(HvsockStream {
            socket: OwnedSocket(raw),
            remote: remote.addr(),
        })
    }

    /// Accept a connection if one shows up within `timeout`.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<HvsockStream>> {
        let mut pollfd = WSAPOLLFD {
            fd: self.socket.0,
            events: POLLRDNORM,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        // SAFETY: `pollfd` is a valid, writable array of exactly one entry.
        let rc = unsafe { WSAPoll(&mut pollfd, 1, millis) };
        if rc == SOCKET_ERROR {
            return Err(TransportError::Accept(last_error()));
        }
        if rc == 0 {
            return Ok(None);
        }
        self.accept().map(Some)
    }
}

impl Listener for HvsockListener {
    fn accept(&self) -> Result<VirtStream> {
        Ok(VirtStream::from_hvsock(HvsockListener::accept(self)?))
    }

    fn accept_timeout(&self, timeout: Duration) -> Result<Option<VirtStream>> {
        Ok(HvsockListener::accept_timeout(self, timeout)?.map(VirtStream::from_hvsock))
    }

    fn local_addr(&self) -> Result<SockAddr> {
        Ok(SockAddr::Hvsock(self.addr))
    }
}
