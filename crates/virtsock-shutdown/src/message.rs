use std::fmt;

use bytes::{Buf, BufMut};

/// Every frame starts with a 4-byte little-endian header.
pub const HEADER_SIZE: usize = 4;

/// Largest payload a single data frame carries when sending.
///
/// Larger frames fail on some Windows builds, so writes are chunked to this.
pub const MAX_MSG_SIZE: usize = 4 * 1024;

/// Header announcing that the sender stopped reading (`CloseRead`).
pub const SHUTDOWN_READ: u32 = 0xdead_beef;

/// Header announcing that the sender stopped writing (`CloseWrite`).
pub const SHUTDOWN_WRITE: u32 = 0xbeef_dead;

/// Header announcing a full close (`Close`).
pub const CLOSE: u32 = 0xdead_dead;

/// Largest payload length that can never be mistaken for a control header.
pub const MAX_PAYLOAD_LIMIT: usize = SHUTDOWN_WRITE as usize - 1;

/// A decoded frame header.
///
/// ```text
/// ┌────────────────────┬──────────────────────────────┐
/// │ Header (4B LE)     │ Payload                      │
/// │ length or control  │ (length bytes, data only)    │
/// └────────────────────┴──────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    ShutdownRead,
    ShutdownWrite,
    Close,
    /// A data frame carrying this many payload bytes.
    Data(u32),
}

impl Message {
    /// Classify a raw header. Anything that is not a control tag is a
    /// payload length, including lengths above [`MAX_MSG_SIZE`].
    pub fn from_header(header: u32) -> Self {
        match header {
            SHUTDOWN_READ => Message::ShutdownRead,
            SHUTDOWN_WRITE => Message::ShutdownWrite,
            CLOSE => Message::Close,
            len => Message::Data(len),
        }
    }

    pub fn header(self) -> u32 {
        match self {
            Message::ShutdownRead => SHUTDOWN_READ,
            Message::ShutdownWrite => SHUTDOWN_WRITE,
            Message::Close => CLOSE,
            Message::Data(len) => len,
        }
    }

    pub fn is_control(self) -> bool {
        !matches!(self, Message::Data(_))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::ShutdownRead => f.write_str("shutdown-read"),
            Message::ShutdownWrite => f.write_str("shutdown-write"),
            Message::Close => f.write_str("close"),
            Message::Data(len) => write!(f, "data({len})"),
        }
    }
}

/// Append the 4-byte header for `msg` to `dst`.
pub fn encode_header(msg: Message, dst: &mut impl BufMut) {
    dst.put_u32_le(msg.header());
}

/// Decode a header from the first four bytes of `src`.
///
/// Panics if `src` holds fewer than [`HEADER_SIZE`] bytes; callers read a
/// full header before decoding.
pub fn decode_header(src: &mut impl Buf) -> Message {
    Message::from_header(src.get_u32_le())
}
