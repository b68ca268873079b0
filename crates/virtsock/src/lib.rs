//! Half-close emulation for Hyper-V and virtio sockets.
//!
//! Hypervisor sockets cannot shut down one direction of a connection in a
//! way the peer observes. virtsock wraps them in a small framing protocol
//! that carries `CloseRead`, `CloseWrite` and `Close` alongside the data.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket backends (vsock, Hyper-V, Unix) and endpoint parsing
//! - [`shutdown`]: the half-close connection wrapper and its wire format
//!
//! ```no_run
//! use std::io::Read;
//!
//! use virtsock::transport::Endpoint;
//! use virtsock::Conn;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint: Endpoint = "vsock://2:1024".parse()?;
//! let conn = Conn::new(endpoint.as_transport().dial()?);
//! conn.write(b"request")?;
//! conn.close_write()?;
//!
//! let mut reply = Vec::new();
//! (&conn).read_to_end(&mut reply)?;
//! conn.close()?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use virtsock_transport::*;
}

/// Re-export half-close types.
pub mod shutdown {
    pub use virtsock_shutdown::*;
}

pub use virtsock_shutdown::{open, Conn, ConnConfig, HalfClose, ShutdownError};
