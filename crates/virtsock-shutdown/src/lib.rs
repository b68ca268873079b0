//! Half-close emulation for hypervisor sockets.
//!
//! Hyper-V and virtio sockets cannot signal "I'm done writing" to the peer
//! without tearing down the whole connection. [`Conn`] restores that by
//! framing the byte stream:
//! - data goes out as a 4-byte little-endian length followed by the payload,
//!   at most [`MAX_MSG_SIZE`] bytes per frame
//! - `CloseRead`, `CloseWrite` and `Close` travel as reserved header values
//!
//! Both peers must use [`Conn`].

pub mod conn;
pub mod error;
pub mod message;

pub use conn::{open, Conn, ConnConfig, HalfClose};
pub use error::{Result, ShutdownError};
pub use message::{
    decode_header, encode_header, Message, CLOSE, HEADER_SIZE, MAX_MSG_SIZE, MAX_PAYLOAD_LIMIT,
    SHUTDOWN_READ, SHUTDOWN_WRITE,
};
