use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace, warn};
use virtsock_transport::{RawStream, SockAddr};

use crate::error::{Result, ShutdownError};
use crate::message::{
    decode_header, encode_header, Message, HEADER_SIZE, MAX_MSG_SIZE, MAX_PAYLOAD_LIMIT,
};

/// Tunables for a [`Conn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnConfig {
    /// Largest payload per outgoing data frame. Clamped to
    /// `1..=MAX_PAYLOAD_LIMIT`.
    pub max_payload_size: usize,
    /// Emit a `debug` event per frame sent or received.
    pub trace_frames: bool,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_MSG_SIZE,
            trace_frames: false,
        }
    }
}

/// A stream connection with half-close emulation.
///
/// Wraps a [`RawStream`] and frames every write so the peer can tell data
/// apart from `CloseRead`, `CloseWrite` and `Close` notifications. Both
/// ends must speak this framing.
///
/// All operations take `&self`. Concurrent writers are serialized per
/// frame; concurrent readers are serialized per call.
pub struct Conn<S> {
    inner: S,
    config: ConnConfig,
    write_lock: Mutex<()>,
    /// Payload bytes still owed by the data frame being consumed.
    bytes_to_read: Mutex<usize>,
    read_closed: AtomicBool,
    write_closed: AtomicBool,
    closing: AtomicBool,
    released: AtomicBool,
}

/// Wrap an already connected stream with the default configuration.
pub fn open<S: RawStream>(stream: S) -> Conn<S> {
    Conn::new(stream)
}

impl<S: RawStream> Conn<S> {
    pub fn new(inner: S) -> Self {
        Self::with_config(inner, ConnConfig::default())
    }

    pub fn with_config(inner: S, mut config: ConnConfig) -> Self {
        config.max_payload_size = config.max_payload_size.clamp(1, MAX_PAYLOAD_LIMIT);
        Self {
            inner,
            config,
            write_lock: Mutex::new(()),
            bytes_to_read: Mutex::new(0),
            read_closed: AtomicBool::new(false),
            write_closed: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            released: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> ConnConfig {
        self.config
    }

    /// Borrow the wrapped transport.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn is_read_closed(&self) -> bool {
        self.read_closed.load(Ordering::SeqCst)
    }

    pub fn is_write_closed(&self) -> bool {
        self.write_closed.load(Ordering::SeqCst)
    }

    /// Send all of `buf` as one or more data frames.
    ///
    /// Each chunk of at most `max_payload_size` bytes goes out as a header
    /// followed by its payload while the write lock is held, so frames from
    /// concurrent writers never interleave. An empty `buf` sends nothing.
    ///
    /// A transport failure marks the write side closed. When the write side
    /// closes between chunks (locally or via the peer's `CloseRead`), the
    /// call stops at a frame boundary with [`ShutdownError::WriteClosed`].
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.is_write_closed() {
            return Err(ShutdownError::WriteClosed);
        }

        for chunk in buf.chunks(self.config.max_payload_size) {
            let _guard = self.lock_writer();
            if self.is_write_closed() {
                return Err(ShutdownError::WriteClosed);
            }
            if let Err(err) = self.send_data(chunk) {
                self.write_closed.store(true, Ordering::SeqCst);
                debug!(error = %err, "data frame send failed; write side closed");
                return Err(err);
            }
        }
        Ok(buf.len())
    }

    /// Read payload bytes, consuming control frames along the way.
    ///
    /// Returns `Ok(0)` at end of stream: after the peer's `CloseWrite`, after
    /// its `Close`, once the transport ends, or after a local close. Reading
    /// into an empty buffer returns `Ok(0)` without touching the stream.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.is_read_closed() {
            return Ok(0);
        }

        let mut remaining = self.lock_reader();
        if self.is_read_closed() {
            return Ok(0);
        }

        if *remaining == 0 {
            match self.next_data_frame()? {
                Some(len) => *remaining = len,
                None => return Ok(0),
            }
        }

        let want = buf.len().min(*remaining);
        match retry_interrupted(|| self.inner.read(&mut buf[..want])) {
            Ok(0) => {
                self.read_closed.store(true, Ordering::SeqCst);
                if self.released.load(Ordering::SeqCst) {
                    return Ok(0);
                }
                Err(ShutdownError::TruncatedPayload {
                    missing: *remaining,
                })
            }
            Ok(n) => {
                *remaining -= n;
                Ok(n)
            }
            Err(err) if is_timeout(&err) => Err(err.into()),
            Err(err) => {
                self.read_closed.store(true, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    /// Tell the peer we stop reading; its later writes fail.
    ///
    /// Errors with [`ShutdownError::ReadClosed`] if the read side is already
    /// closed. The local state only changes once the notification is sent.
    pub fn close_read(&self) -> Result<()> {
        if self.is_read_closed() {
            return Err(ShutdownError::ReadClosed);
        }

        let _guard = self.lock_writer();
        if !self.is_write_closed() {
            self.send_control(Message::ShutdownRead)?;
        } else {
            // Nothing may go on the wire once the write side is closed.
            debug!("write side closed; skipping shutdown-read frame");
        }
        self.read_closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Tell the peer we stop writing; its reads reach end of stream once the
    /// data already sent is consumed.
    ///
    /// Errors with [`ShutdownError::WriteClosed`] if the write side is
    /// already closed.
    pub fn close_write(&self) -> Result<()> {
        if self.is_write_closed() {
            return Err(ShutdownError::WriteClosed);
        }

        let _guard = self.lock_writer();
        if self.is_write_closed() {
            return Err(ShutdownError::WriteClosed);
        }
        self.send_control(Message::ShutdownWrite)?;
        self.write_closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Close both directions and release the transport.
    ///
    /// Sends a `Close` frame, then waits for a single read on the transport
    /// (the peer closing its side, or a deadline) so that frames already in
    /// flight are not discarded. A failed send is not an error: the peer is
    /// probably gone and the transport is released directly.
    ///
    /// Calling `close` again is a no-op.
    pub fn close(&self) -> Result<()> {
        self.read_closed.store(true, Ordering::SeqCst);
        self.write_closed.store(true, Ordering::SeqCst);

        if self.closing.swap(true, Ordering::SeqCst) || self.released.load(Ordering::SeqCst) {
            return Ok(());
        }

        let sent = {
            let _guard = self.lock_writer();
            self.send_control(Message::Close)
        };
        if let Err(err) = sent {
            debug!(error = %err, "close frame not delivered; releasing transport");
            return self.release();
        }

        let mut reply = [0u8; HEADER_SIZE];
        let _ = retry_interrupted(|| self.inner.read(&mut reply));
        self.release()
    }

    pub fn local_addr(&self) -> Result<SockAddr> {
        Ok(self.inner.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SockAddr> {
        Ok(self.inner.peer_addr()?)
    }

    /// Set both read and write timeouts.
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.inner.set_read_timeout(timeout)?)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.inner.set_write_timeout(timeout)?)
    }

    /// Consume headers until a non-empty data frame arrives, returning its
    /// length, or `None` once the read side reaches end of stream.
    fn next_data_frame(&self) -> Result<Option<usize>> {
        loop {
            let Some(msg) = self.read_header()? else {
                self.read_closed.store(true, Ordering::SeqCst);
                return Ok(None);
            };
            if self.config.trace_frames {
                debug!(frame = %msg, "received frame");
            }

            match msg {
                Message::ShutdownWrite => {
                    debug!("peer shut down its write side");
                    self.read_closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
                Message::ShutdownRead => {
                    debug!("peer shut down its read side");
                    self.write_closed.store(true, Ordering::SeqCst);
                }
                Message::Close => {
                    debug!("peer closed the connection");
                    self.write_closed.store(true, Ordering::SeqCst);
                    if let Err(err) = self.release() {
                        warn!(error = %err, "failed to release transport after peer close");
                    }
                }
                Message::Data(0) => warn!("skipping zero-length data frame"),
                Message::Data(len) => return Ok(Some(len as usize)),
            }
        }
    }

    /// Fill a whole header. `Ok(None)` means the stream ended cleanly on a
    /// frame boundary.
    fn read_header(&self) -> Result<Option<Message>> {
        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match self.inner.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    self.read_closed.store(true, Ordering::SeqCst);
                    return Err(ShutdownError::FrameSizeMismatch {
                        expected: HEADER_SIZE,
                        actual: filled,
                    });
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if filled == 0 && is_timeout(&err) => return Err(err.into()),
                Err(err) => {
                    self.read_closed.store(true, Ordering::SeqCst);
                    return Err(err.into());
                }
            }
        }
        Ok(Some(decode_header(&mut &header[..])))
    }

    /// Emit one data frame. Caller holds the write lock.
    fn send_data(&self, payload: &[u8]) -> Result<()> {
        // Chunks never exceed MAX_PAYLOAD_LIMIT, which fits in a u32.
        let msg = Message::Data(payload.len() as u32);
        self.send_frame_bytes(&header_bytes(msg))?;
        self.send_frame_bytes(payload)?;
        if self.config.trace_frames {
            debug!(frame = %msg, "sent frame");
        }
        Ok(())
    }

    /// Emit one control frame. Caller holds the write lock.
    fn send_control(&self, message: Message) -> Result<()> {
        self.send_frame_bytes(&header_bytes(message))
            .map_err(|err| ShutdownError::ControlSend {
                message,
                source: err.into(),
            })?;
        if self.config.trace_frames {
            debug!(frame = %message, "sent frame");
        }
        Ok(())
    }

    /// One transport write that must take every byte.
    fn send_frame_bytes(&self, bytes: &[u8]) -> Result<()> {
        let written = retry_interrupted(|| self.inner.write(bytes))?;
        if written != bytes.len() {
            return Err(ShutdownError::ShortWrite {
                expected: bytes.len(),
                written,
            });
        }
        trace!(bytes = written, "transport write");
        Ok(())
    }

    /// Shut the transport down, at most once.
    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.close()?;
        Ok(())
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_reader(&self) -> MutexGuard<'_, usize> {
        self.bytes_to_read
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> std::fmt::Debug for Conn<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("config", &self.config)
            .field("read_closed", &self.read_closed.load(Ordering::Relaxed))
            .field("write_closed", &self.write_closed.load(Ordering::Relaxed))
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S: RawStream> io::Read for Conn<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Conn::read(self, buf).map_err(Into::into)
    }
}

impl<S: RawStream> io::Read for &Conn<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Conn::read(self, buf).map_err(Into::into)
    }
}

impl<S: RawStream> io::Write for Conn<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Conn::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: RawStream> io::Write for &Conn<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Conn::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Streams whose read and write halves can be shut down independently.
///
/// Implemented by [`Conn`] and by Unix stream sockets, which have a native
/// half-close, so callers can treat both the same way.
pub trait HalfClose {
    fn close_read(&self) -> io::Result<()>;

    fn close_write(&self) -> io::Result<()>;
}

impl<S: RawStream> HalfClose for Conn<S> {
    fn close_read(&self) -> io::Result<()> {
        Conn::close_read(self).map_err(Into::into)
    }

    fn close_write(&self) -> io::Result<()> {
        Conn::close_write(self).map_err(Into::into)
    }
}

#[cfg(unix)]
impl HalfClose for std::os::unix::net::UnixStream {
    fn close_read(&self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Read)
    }

    fn close_write(&self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Write)
    }
}

fn header_bytes(msg: Message) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    encode_header(msg, &mut &mut header[..]);
    header
}

fn retry_interrupted<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Deadline expiry leaves the stream usable: nothing was consumed.
fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read as _};

    use virtsock_transport::Result as TransportResult;

    use super::*;
    use crate::message::{CLOSE, SHUTDOWN_READ, SHUTDOWN_WRITE};

    /// Scripted transport: reads come from `input`, writes land in `output`.
    #[derive(Default)]
    struct MockStream {
        input: Mutex<Cursor<Vec<u8>>>,
        output: Mutex<Vec<u8>>,
        closed: AtomicBool,
        fail_writes: bool,
        write_limit: Option<usize>,
        interrupt_next_write: AtomicBool,
    }

    impl MockStream {
        fn with_input(input: Vec<u8>) -> Self {
            Self {
                input: Mutex::new(Cursor::new(input)),
                ..Self::default()
            }
        }

        fn written(&self) -> Vec<u8> {
            self.output.lock().unwrap().clone()
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl RawStream for MockStream {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            if self.is_closed() {
                return Ok(0);
            }
            self.input.lock().unwrap().read(buf)
        }

        fn write(&self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::from(ErrorKind::BrokenPipe));
            }
            if self.interrupt_next_write.swap(false, Ordering::SeqCst) {
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            let n = self.write_limit.map_or(buf.len(), |limit| buf.len().min(limit));
            self.output.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn close(&self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn local_addr(&self) -> TransportResult<SockAddr> {
            Ok(SockAddr::Unix(None))
        }

        fn peer_addr(&self) -> TransportResult<SockAddr> {
            Ok(SockAddr::Unix(None))
        }

        fn set_read_timeout(&self, _timeout: Option<Duration>) -> TransportResult<()> {
            Ok(())
        }

        fn set_write_timeout(&self, _timeout: Option<Duration>) -> TransportResult<()> {
            Ok(())
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn write_chunks_into_max_size_frames() {
        let conn = Conn::new(MockStream::default());
        let payload: Vec<u8> = (0..4097u32).map(|i| (i % 251) as u8).collect();

        assert_eq!(conn.write(&payload).unwrap(), 4097);

        let wire = conn.get_ref().written();
        assert_eq!(wire.len(), 4 + 4096 + 4 + 1);
        assert_eq!(&wire[..4], &[0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&wire[4..4100], &payload[..4096]);
        assert_eq!(&wire[4100..4104], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(wire[4104], payload[4096]);
    }

    #[test]
    fn empty_write_sends_nothing() {
        let conn = Conn::new(MockStream::default());
        assert_eq!(conn.write(&[]).unwrap(), 0);
        assert!(conn.get_ref().written().is_empty());
    }

    #[test]
    fn configured_payload_size_is_clamped() {
        let conn = Conn::with_config(
            MockStream::default(),
            ConnConfig {
                max_payload_size: 0,
                trace_frames: true,
            },
        );
        assert_eq!(conn.config().max_payload_size, 1);

        conn.write(b"ab").unwrap();
        assert_eq!(conn.get_ref().written(), [frame(b"a"), frame(b"b")].concat());
    }

    #[test]
    fn close_write_sends_tag_and_blocks_later_writes() {
        let conn = Conn::new(MockStream::default());
        conn.write(b"hi").unwrap();
        conn.close_write().unwrap();

        assert!(matches!(conn.write(b"more"), Err(ShutdownError::WriteClosed)));
        assert!(matches!(conn.close_write(), Err(ShutdownError::WriteClosed)));

        let mut expected = frame(b"hi");
        expected.extend_from_slice(&SHUTDOWN_WRITE.to_le_bytes());
        assert_eq!(conn.get_ref().written(), expected);
    }

    #[test]
    fn open_uses_default_config() {
        let conn = open(MockStream::with_input(frame(b"hi")));
        assert_eq!(conn.config().max_payload_size, MAX_MSG_SIZE);
        assert!(!conn.is_read_closed() && !conn.is_write_closed());

        let mut buf = [0u8; 4];
        assert_eq!(conn.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"hi");
    }

    #[test]
    fn close_read_twice_errors() {
        let conn = Conn::new(MockStream::default());
        conn.close_read().unwrap();
        assert!(conn.is_read_closed());
        assert!(matches!(conn.close_read(), Err(ShutdownError::ReadClosed)));
        assert_eq!(conn.get_ref().written(), SHUTDOWN_READ.to_le_bytes());

        let mut buf = [0u8; 8];
        assert_eq!(conn.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn close_read_after_close_write_sends_no_frame() {
        let conn = Conn::new(MockStream::default());
        conn.close_write().unwrap();
        conn.close_read().unwrap();
        assert_eq!(conn.get_ref().written(), SHUTDOWN_WRITE.to_le_bytes());
    }

    #[test]
    fn read_demultiplexes_control_frames() {
        let mut input = frame(b"abc");
        input.extend_from_slice(&SHUTDOWN_READ.to_le_bytes());
        input.extend_from_slice(&0u32.to_le_bytes());
        input.extend_from_slice(&frame(b"de"));
        input.extend_from_slice(&SHUTDOWN_WRITE.to_le_bytes());
        let conn = Conn::new(MockStream::with_input(input));

        let mut small = [0u8; 2];
        assert_eq!(conn.read(&mut small).unwrap(), 2);
        assert_eq!(&small, b"ab");

        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'c');

        assert_eq!(conn.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"de");
        assert!(conn.is_write_closed());
        assert!(!conn.is_read_closed());

        assert_eq!(conn.read(&mut buf).unwrap(), 0);
        assert!(conn.is_read_closed());
        assert_eq!(conn.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn peer_close_releases_transport() {
        let mut input = frame(b"bye");
        input.extend_from_slice(&CLOSE.to_le_bytes());
        input.extend_from_slice(&frame(b"unreachable"));
        let conn = Conn::new(MockStream::with_input(input));

        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf).unwrap(), 3);
        assert_eq!(conn.read(&mut buf).unwrap(), 0);
        assert!(conn.get_ref().is_closed());
        assert!(conn.is_write_closed());
        assert!(conn.is_read_closed());

        // Already released: no close frame is attempted.
        conn.close().unwrap();
        assert!(conn.get_ref().written().is_empty());
    }

    #[test]
    fn empty_buffer_read_leaves_state_alone() {
        let conn = Conn::new(MockStream::with_input(frame(b"x")));
        assert_eq!(conn.read(&mut []).unwrap(), 0);
        assert!(!conn.is_read_closed());

        let mut buf = [0u8; 1];
        assert_eq!(conn.read(&mut buf).unwrap(), 1);
    }

    #[test]
    fn truncated_header_is_a_size_mismatch() {
        let conn = Conn::new(MockStream::with_input(vec![0x05, 0x00]));
        let mut buf = [0u8; 8];
        assert!(matches!(
            conn.read(&mut buf),
            Err(ShutdownError::FrameSizeMismatch {
                expected: 4,
                actual: 2
            })
        ));
        assert!(conn.is_read_closed());
    }

    #[test]
    fn truncated_payload_is_reported() {
        let mut input = 10u32.to_le_bytes().to_vec();
        input.extend_from_slice(b"abc");
        let conn = Conn::new(MockStream::with_input(input));

        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf).unwrap(), 3);
        assert!(matches!(
            conn.read(&mut buf),
            Err(ShutdownError::TruncatedPayload { missing: 7 })
        ));
        assert!(conn.is_read_closed());
    }

    #[test]
    fn eof_on_frame_boundary_is_clean() {
        let conn = Conn::new(MockStream::with_input(frame(b"done")));
        let mut out = Vec::new();
        (&conn).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"done");
        assert!(conn.is_read_closed());
    }

    #[test]
    fn close_sends_close_and_releases() {
        let conn = Conn::new(MockStream::default());
        conn.close().unwrap();
        assert_eq!(conn.get_ref().written(), CLOSE.to_le_bytes());
        assert!(conn.get_ref().is_closed());
        assert!(conn.is_read_closed() && conn.is_write_closed());

        conn.close().unwrap();
        assert_eq!(conn.get_ref().written(), CLOSE.to_le_bytes());
        assert!(matches!(conn.write(b"x"), Err(ShutdownError::WriteClosed)));
    }

    #[test]
    fn close_swallows_send_failure() {
        let conn = Conn::new(MockStream {
            fail_writes: true,
            ..MockStream::default()
        });
        conn.close().unwrap();
        assert!(conn.get_ref().is_closed());
    }

    #[test]
    fn control_send_failure_keeps_state() {
        let conn = Conn::new(MockStream {
            fail_writes: true,
            ..MockStream::default()
        });
        assert!(matches!(
            conn.close_write(),
            Err(ShutdownError::ControlSend {
                message: Message::ShutdownWrite,
                ..
            })
        ));
        assert!(!conn.is_write_closed());
        assert!(matches!(
            conn.close_read(),
            Err(ShutdownError::ControlSend { .. })
        ));
        assert!(!conn.is_read_closed());
    }

    #[test]
    fn short_write_closes_write_side() {
        let conn = Conn::new(MockStream {
            write_limit: Some(2),
            ..MockStream::default()
        });
        assert!(matches!(
            conn.write(b"payload"),
            Err(ShutdownError::ShortWrite {
                expected: 4,
                written: 2
            })
        ));
        assert!(conn.is_write_closed());
    }

    #[test]
    fn interrupted_writes_are_retried() {
        let conn = Conn::new(MockStream::default());
        conn.get_ref()
            .interrupt_next_write
            .store(true, Ordering::SeqCst);
        conn.write(b"ok").unwrap();
        assert_eq!(conn.get_ref().written(), frame(b"ok"));
    }

    #[test]
    fn io_write_impl_reports_closed_side() {
        use std::io::Write as _;

        let mut conn = Conn::new(MockStream::default());
        conn.write_all(b"abc").unwrap();
        conn.flush().unwrap();
        HalfClose::close_write(&conn).unwrap();
        let err = io::Write::write(&mut conn, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[cfg(unix)]
    #[test]
    fn unix_stream_half_close_matches_conn_contract() {
        use std::os::unix::net::UnixStream;

        let (a, b) = UnixStream::pair().unwrap();
        HalfClose::close_write(&a).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }
}
