//! Socket addresses for every supported family.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// Wildcard context ID: listen on any CID.
pub const VMADDR_CID_ANY: u32 = 0xFFFF_FFFF;

/// Context ID of the hypervisor host.
pub const VMADDR_CID_HOST: u32 = 2;

/// Port used when an endpoint does not name one.
pub const DEFAULT_PORT: u32 = 0x5653;

/// A virtio socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VsockAddr {
    pub cid: u32,
    pub port: u32,
}

impl VsockAddr {
    pub const fn new(cid: u32, port: u32) -> Self {
        Self { cid, port }
    }
}

impl fmt::Display for VsockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cid == VMADDR_CID_ANY {
            write!(f, "any:{:#x}", self.port)
        } else {
            write!(f, "{}:{:#x}", self.cid, self.port)
        }
    }
}

/// A 128-bit GUID, laid out like the Windows `GUID` structure.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    /// Wildcard VM ID (`HV_GUID_ZERO`).
    pub const ZERO: Guid = Guid::from_fields(0, 0, 0, [0; 8]);

    /// The parent partition, i.e. the host as seen from a guest (`HV_GUID_PARENT`).
    pub const PARENT: Guid = Guid::from_fields(
        0xa42e_7cda,
        0xd03f,
        0x480c,
        [0x9c, 0xc2, 0xa4, 0xde, 0x20, 0xab, 0xb8, 0x78],
    );

    pub const fn from_fields(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl FromStr for Guid {
    type Err = TransportError;

    /// Parses the canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form,
    /// optionally wrapped in braces.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .unwrap_or(trimmed);

        let malformed = || TransportError::InvalidAddress(format!("malformed GUID: {s}"));

        let parts: Vec<&str> = inner.split('-').collect();
        let lengths = [8usize, 4, 4, 4, 12];
        if parts.len() != lengths.len()
            || parts
                .iter()
                .zip(lengths)
                .any(|(part, len)| part.len() != len || !part.bytes().all(|b| b.is_ascii_hexdigit()))
        {
            return Err(malformed());
        }

        let data1 = u32::from_str_radix(parts[0], 16).map_err(|_| malformed())?;
        let data2 = u16::from_str_radix(parts[1], 16).map_err(|_| malformed())?;
        let data3 = u16::from_str_radix(parts[2], 16).map_err(|_| malformed())?;
        let tail = format!("{}{}", parts[3], parts[4]);
        let data4 = u64::from_str_radix(&tail, 16)
            .map_err(|_| malformed())?
            .to_be_bytes();

        Ok(Self::from_fields(data1, data2, data3, data4))
    }
}

/// Trailing fields of the service GUID template that maps Hyper-V services
/// onto vsock ports: `<port>-facb-11e6-bd58-64006a7986d3`.
const SERVICE_TEMPLATE: Guid = Guid::from_fields(
    0,
    0xfacb,
    0x11e6,
    [0xbd, 0x58, 0x64, 0x00, 0x6a, 0x79, 0x86, 0xd3],
);

/// A Hyper-V socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HvsockAddr {
    pub vm_id: Guid,
    pub service_id: Guid,
}

impl HvsockAddr {
    pub const fn new(vm_id: Guid, service_id: Guid) -> Self {
        Self { vm_id, service_id }
    }

    /// The service GUID that corresponds to a vsock port.
    pub const fn service_for_port(port: u32) -> Guid {
        Guid::from_fields(
            port,
            SERVICE_TEMPLATE.data2,
            SERVICE_TEMPLATE.data3,
            SERVICE_TEMPLATE.data4,
        )
    }

    /// The vsock port encoded in the service GUID, if it follows the template.
    pub fn vsock_port(&self) -> Option<u32> {
        let svc = &self.service_id;
        (svc.data2 == SERVICE_TEMPLATE.data2
            && svc.data3 == SERVICE_TEMPLATE.data3
            && svc.data4 == SERVICE_TEMPLATE.data4)
            .then_some(svc.data1)
    }
}

impl fmt::Display for HvsockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.vm_id, self.service_id)
    }
}

/// Local or remote address of a connected stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockAddr {
    /// Unix domain socket; unnamed sockets carry no path.
    Unix(Option<PathBuf>),
    Vsock(VsockAddr),
    Hvsock(HvsockAddr),
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SockAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            SockAddr::Unix(None) => f.write_str("unix:(unnamed)"),
            SockAddr::Vsock(addr) => write!(f, "vsock:{addr}"),
            SockAddr::Hvsock(addr) => write!(f, "hvsock:{addr}"),
        }
    }
}

/// Parse a port or CID written in decimal or `0x`-prefixed hex.
pub(crate) fn parse_u32(input: &str) -> Result<u32> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| TransportError::InvalidAddress(format!("invalid number: {input:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_roundtrips_through_display() {
        let text = "a42e7cda-d03f-480c-9cc2-a4de20abb878";
        let guid: Guid = text.parse().unwrap();
        assert_eq!(guid, Guid::PARENT);
        assert_eq!(guid.to_string(), text);
    }

    #[test]
    fn guid_accepts_braces_and_uppercase() {
        let guid: Guid = "{A42E7CDA-D03F-480C-9CC2-A4DE20ABB878}".parse().unwrap();
        assert_eq!(guid, Guid::PARENT);
    }

    #[test]
    fn guid_rejects_malformed_input() {
        for bad in [
            "",
            "a42e7cda-d03f-480c-9cc2",
            "a42e7cda-d03f-480c-9cc2-a4de20abb87",
            "g42e7cda-d03f-480c-9cc2-a4de20abb878",
            "a42e7cdad03f480c9cc2a4de20abb878",
            "+2345678-d03f-480c-9cc2-a4de20abb878",
            "a42e7cda-+03f-480c-9cc2-a4de20abb878",
            "a42e7cda-d03f-480c-+cc2-a4de20abb878",
        ] {
            assert!(
                matches!(bad.parse::<Guid>(), Err(TransportError::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn service_guid_maps_to_port() {
        let svc = HvsockAddr::service_for_port(0x5653);
        assert_eq!(svc.to_string(), "00005653-facb-11e6-bd58-64006a7986d3");

        let addr = HvsockAddr::new(Guid::PARENT, svc);
        assert_eq!(addr.vsock_port(), Some(0x5653));

        let foreign = HvsockAddr::new(Guid::PARENT, Guid::PARENT);
        assert_eq!(foreign.vsock_port(), None);
    }

    #[test]
    fn parse_u32_decimal_and_hex() {
        assert_eq!(parse_u32("1024").unwrap(), 1024);
        assert_eq!(parse_u32("0x5653").unwrap(), 0x5653);
        assert!(parse_u32("port").is_err());
    }

    #[test]
    fn sock_addr_display() {
        assert_eq!(
            SockAddr::Vsock(VsockAddr::new(3, 0x400)).to_string(),
            "vsock:3:0x400"
        );
        assert_eq!(
            SockAddr::Vsock(VsockAddr::new(VMADDR_CID_ANY, 1)).to_string(),
            "vsock:any:0x1"
        );
        assert_eq!(SockAddr::Unix(None).to_string(), "unix:(unnamed)");
    }
}
