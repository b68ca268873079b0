//! Hypervisor socket transports.
//!
//! Provides a unified byte-stream interface over:
//! - virtio sockets (`AF_VSOCK`, Linux)
//! - Hyper-V sockets (`AF_HYPERV` on Windows, mapped onto vsock on Linux)
//! - Unix domain sockets, as a local stand-in
//!
//! None of these give the peer a reliable half-close signal. This crate only
//! moves bytes; `virtsock-shutdown` builds the half-close protocol on top of
//! the [`RawStream`] capability defined here.

pub mod addr;
pub mod endpoint;
pub mod error;
pub mod hvsock;
pub mod traits;
pub mod vsock;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
mod hvsock_windows;

pub use addr::{Guid, HvsockAddr, SockAddr, VsockAddr};
pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
pub use hvsock::HvsockTransport;
pub use traits::{Listener, RawStream, Transport, VirtStream};
pub use vsock::VsockTransport;

#[cfg(unix)]
pub use unix::{UnixDomainSocket, UnixTransport};
