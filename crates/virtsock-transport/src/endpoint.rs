//! `<scheme>://<address>` endpoint strings.
//!
//! ```text
//! vsock[://[cid][:port]]          virtio sockets (Linux)
//! hvsock[://[vmid][:service]]     Hyper-V sockets; service is a GUID or a vsock port
//! unix://<path>                   Unix domain socket
//! ```
//!
//! A bare scheme selects that transport with default addressing.

use std::fmt;
use std::str::FromStr;

use crate::addr::{parse_u32, Guid, HvsockAddr, DEFAULT_PORT};
use crate::error::{Result, TransportError};
use crate::hvsock::HvsockTransport;
use crate::traits::Transport;
#[cfg(unix)]
use crate::unix::UnixTransport;
use crate::vsock::VsockTransport;

/// A parsed endpoint, one variant per backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Vsock(VsockTransport),
    Hvsock(HvsockTransport),
    #[cfg(unix)]
    Unix(UnixTransport),
}

impl Endpoint {
    /// Borrow the endpoint as its transport.
    pub fn as_transport(&self) -> &dyn Transport {
        match self {
            Endpoint::Vsock(t) => t,
            Endpoint::Hvsock(t) => t,
            #[cfg(unix)]
            Endpoint::Unix(t) => t,
        }
    }

    /// Turn the endpoint into an owned transport.
    pub fn into_transport(self) -> Box<dyn Transport> {
        match self {
            Endpoint::Vsock(t) => Box::new(t),
            Endpoint::Hvsock(t) => Box::new(t),
            #[cfg(unix)]
            Endpoint::Unix(t) => Box::new(t),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, rest) = s.split_once("://").unwrap_or((s, ""));
        match scheme.to_ascii_lowercase().as_str() {
            "vsock" => parse_vsock(rest.trim_end_matches('/')).map(Endpoint::Vsock),
            "hvsock" => parse_hvsock(rest.trim_end_matches('/')).map(Endpoint::Hvsock),
            "unix" if rest.is_empty() => Err(TransportError::InvalidAddress(
                "unix endpoints need a socket path".to_string(),
            )),
            #[cfg(unix)]
            "unix" => Ok(Endpoint::Unix(UnixTransport::new(rest))),
            #[cfg(not(unix))]
            "unix" => Err(TransportError::Unimplemented(
                "unix domain sockets are not supported on this platform",
            )),
            other => Err(TransportError::InvalidAddress(format!(
                "unknown address scheme: {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_transport(), f)
    }
}

fn parse_vsock(host: &str) -> Result<VsockTransport> {
    let (cid, port) = host.split_once(':').unwrap_or((host, ""));
    let cid = if cid.is_empty() {
        None
    } else {
        Some(parse_u32(cid)?)
    };
    let port = if port.is_empty() {
        DEFAULT_PORT
    } else {
        parse_u32(port)?
    };
    Ok(VsockTransport::new(cid, port))
}

fn parse_hvsock(host: &str) -> Result<HvsockTransport> {
    let (vm_id, service) = host.split_once(':').unwrap_or((host, ""));
    let vm_id = if vm_id.is_empty() {
        None
    } else {
        Some(vm_id.parse::<Guid>()?)
    };
    let service_id = if service.is_empty() {
        HvsockAddr::service_for_port(DEFAULT_PORT)
    } else if service.contains('-') {
        service.parse::<Guid>()?
    } else {
        HvsockAddr::service_for_port(parse_u32(service)?)
    };
    Ok(HvsockTransport::new(vm_id, service_id))
}
