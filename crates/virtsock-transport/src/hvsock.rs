//! Hyper-V socket backend.
//!
//! On Windows this talks `AF_HYPERV` directly (see `hvsock_windows`). Linux
//! guests reach Hyper-V sockets through the vsock interface: the parent
//! partition is the host CID and the service GUID carries the port.

use std::fmt;

use crate::addr::{Guid, HvsockAddr};
use crate::error::{Result, TransportError};
use crate::traits::{Listener, Transport, VirtStream};

/// [`Transport`] over Hyper-V sockets.
///
/// Without an explicit VM ID, dialing targets the parent partition and
/// listening accepts from any partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HvsockTransport {
    vm_id: Option<Guid>,
    service_id: Guid,
}

impl HvsockTransport {
    pub const fn new(vm_id: Option<Guid>, service_id: Guid) -> Self {
        Self { vm_id, service_id }
    }

    pub fn dial_addr(&self) -> HvsockAddr {
        HvsockAddr::new(self.vm_id.unwrap_or(Guid::PARENT), self.service_id)
    }

    pub fn listen_addr(&self) -> HvsockAddr {
        HvsockAddr::new(self.vm_id.unwrap_or(Guid::ZERO), self.service_id)
    }
}

impl Transport for HvsockTransport {
    fn name(&self) -> &'static str {
        "hvsock"
    }

    fn dial(&self) -> Result<VirtStream> {
        platform::dial(self.dial_addr())
    }

    fn listen(&self) -> Result<Box<dyn Listener>> {
        platform::listen(self.listen_addr())
    }
}

impl fmt::Display for HvsockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vm_id {
            Some(vm_id) => write!(f, "hvsock://{vm_id}:{}", self.service_id),
            None => write!(f, "hvsock://:{}", self.service_id),
        }
    }
}

/// Translate a Hyper-V address into the vsock address a Linux guest uses.
///
/// Only the parent partition (or the wildcard, when listening) is reachable,
/// and the service GUID must follow the vsock port template.
pub fn to_vsock(addr: HvsockAddr) -> Result<crate::addr::VsockAddr> {
    use crate::addr::{VsockAddr, VMADDR_CID_ANY, VMADDR_CID_HOST};

    let port = addr.vsock_port().ok_or_else(|| {
        TransportError::InvalidAddress(format!(
            "service id {} does not map onto a vsock port",
            addr.service_id
        ))
    })?;
    let cid = if addr.vm_id == Guid::PARENT {
        VMADDR_CID_HOST
    } else if addr.vm_id.is_zero() {
        VMADDR_CID_ANY
    } else {
        return Err(TransportError::Unimplemented(
            "only the parent partition is reachable over Hyper-V sockets from Linux",
        ));
    };
    Ok(VsockAddr::new(cid, port))
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;
    use crate::vsock::{VsockListener, VsockStream};

    pub(super) fn dial(addr: HvsockAddr) -> Result<VirtStream> {
        Ok(VirtStream::from_vsock(VsockStream::connect(to_vsock(addr)?)?))
    }

    pub(super) fn listen(addr: HvsockAddr) -> Result<Box<dyn Listener>> {
        Ok(Box::new(VsockListener::bind(to_vsock(addr)?)?))
    }
}

#[cfg(windows)]
mod platform {
    use super::*;
    use crate::hvsock_windows::{HvsockListener, HvsockStream};

    pub(super) fn dial(addr: HvsockAddr) -> Result<VirtStream> {
        Ok(VirtStream::from_hvsock(HvsockStream::connect(addr)?))
    }

    pub(super) fn listen(addr: HvsockAddr) -> Result<Box<dyn Listener>> {
        Ok(Box::new(HvsockListener::bind(addr)?))
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod platform {
    use super::*;

    pub(super) fn dial(_addr: HvsockAddr) -> Result<VirtStream> {
        Err(TransportError::Unimplemented(
            "Hyper-V sockets are only available on Windows and Linux",
        ))
    }

    pub(super) fn listen(_addr: HvsockAddr) -> Result<Box<dyn Listener>> {
        Err(TransportError::Unimplemented(
            "Hyper-V sockets are only available on Windows and Linux",
        ))
    }
}
