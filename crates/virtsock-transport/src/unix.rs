use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::addr::SockAddr;
use crate::error::{Result, TransportError};
use crate::traits::{Listener, Transport, VirtStream};

/// Unix domain socket listener.
///
/// The local stand-in for hypervisor sockets: same byte-stream shape, no
/// half-close visible through the emulator, runs on any developer box.
/// The socket file is removed again when the listener is dropped, unless
/// something else has replaced it in the meantime.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    /// `(dev, ino)` of the socket file this listener created.
    identity: (u64, u64),
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS and the BSDs.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on `path`, replacing a stale socket file if present.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on `path` with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source: io::Error| TransportError::Bind {
            addr: path.display().to_string(),
            source,
        };

        remove_stale_socket(&path).map_err(bind_err)?;
        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            identity: (metadata.dev(), metadata.ino()),
            path,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<VirtStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted unix connection");
        Ok(VirtStream::from_unix(stream))
    }

    /// Accept a connection if one shows up within `timeout`.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<VirtStream>> {
        if !wait_readable(self.listener.as_raw_fd(), timeout).map_err(TransportError::Accept)? {
            return Ok(None);
        }
        self.accept().map(Some)
    }

    /// Connect to a listening Unix domain socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<VirtStream> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            addr: path.display().to_string(),
            source,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(VirtStream::from_unix(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Remove a leftover socket file at `path`. Anything that is not a socket
/// is left alone and reported as `AlreadyExists`.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "existing path is not a unix socket",
        ));
    }
    debug!(?path, "removing stale socket");
    std::fs::remove_file(path)
}

/// Block until `fd` is readable or `timeout` elapses. A listening socket
/// is readable once a connection is queued. `EINTR` counts as a timeout.
pub(crate) fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: `pollfd` is a valid, writable array of exactly one entry.
    let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}

impl Listener for UnixDomainSocket {
    fn accept(&self) -> Result<VirtStream> {
        UnixDomainSocket::accept(self)
    }

    fn accept_timeout(&self, timeout: Duration) -> Result<Option<VirtStream>> {
        UnixDomainSocket::accept_timeout(self, timeout)
    }

    fn local_addr(&self) -> Result<SockAddr> {
        Ok(SockAddr::Unix(Some(self.path.clone())))
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if metadata.file_type().is_socket() && (metadata.dev(), metadata.ino()) == self.identity {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
        }
    }
}

/// [`Transport`] over a filesystem-path Unix domain socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixTransport {
    path: PathBuf,
}

impl UnixTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for UnixTransport {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn dial(&self) -> Result<VirtStream> {
        UnixDomainSocket::connect(&self.path)
    }

    fn listen(&self) -> Result<Box<dyn Listener>> {
        Ok(Box::new(UnixDomainSocket::bind(&self.path)?))
    }
}

impl fmt::Display for UnixTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unix://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;
    use crate::traits::RawStream;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("virtsock-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bind_accept_connect_and_cleanup() {
        let dir = scratch_dir("unix-bind");
        let sock_path = dir.join("test.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let path_clone = sock_path.clone();
        let handle = std::thread::spawn(move || {
            let mut client = UnixDomainSocket::connect(&path_clone).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        handle.join().unwrap();

        drop(listener);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn transport_dials_and_listens() {
        let dir = scratch_dir("unix-transport");
        let transport = UnixTransport::new(dir.join("t.sock"));
        assert_eq!(transport.name(), "unix");
        assert!(transport.to_string().starts_with("unix://"));

        let listener = transport.listen().unwrap();
        assert_eq!(
            listener.local_addr().unwrap(),
            SockAddr::Unix(Some(dir.join("t.sock")))
        );

        let dialer = {
            let transport = transport.clone();
            std::thread::spawn(move || transport.dial().unwrap())
        };
        let server = listener.accept().unwrap();
        let client = dialer.join().unwrap();

        RawStream::write(&client, b"xy").unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(RawStream::read(&server, &mut buf).unwrap(), 2);
        assert_eq!(&buf, b"xy");
        assert_eq!(
            client.peer_addr().unwrap(),
            SockAddr::Unix(Some(dir.join("t.sock")))
        );

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn accept_timeout_returns_none_when_idle() {
        let dir = scratch_dir("unix-idle");
        let transport = UnixTransport::new(dir.join("idle.sock"));
        let listener = transport.listen().unwrap();

        let start = std::time::Instant::now();
        assert!(listener
            .accept_timeout(Duration::from_millis(50))
            .unwrap()
            .is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));

        let client = transport.dial().unwrap();
        let server = listener
            .accept_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("queued connection should be accepted");
        RawStream::write(&client, b"z").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(RawStream::read(&server, &mut buf).unwrap(), 1);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_failure_is_reported() {
        let dir = scratch_dir("unix-noconnect");
        let err = UnixDomainSocket::connect(dir.join("missing.sock")).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long_is_rejected() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn default_permissions_are_owner_only() {
        let dir = scratch_dir("unix-perms");
        let sock_path = dir.join("perm.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bind_refuses_to_replace_regular_file() {
        let dir = scratch_dir("unix-regular-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(sock_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn drop_leaves_replaced_path_alone() {
        let dir = scratch_dir("unix-drop-race");
        let sock_path = dir.join("drop.sock");

        let listener = UnixDomainSocket::bind(&sock_path).unwrap();
        std::fs::remove_file(&sock_path).unwrap();
        std::fs::write(&sock_path, b"replacement-file").unwrap();

        drop(listener);
        assert!(
            sock_path.exists(),
            "drop must not remove path if inode identity changed"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
