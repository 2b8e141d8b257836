use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use nix::sys::socket::{AddressFamily, InetAddr, SockAddr};

use crate::error::{ProbeError, Result};

/// A bare IPv4 or IPv6 address, without a port.
///
/// The "no address" state is `Option<NetworkAddress>::None`; a value of this
/// type always carries a payload matching its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkAddress {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl NetworkAddress {
    /// Decodes the family tag of a socket address once, keeping only the IP
    /// payload. Anything other than IPv4 or IPv6 is rejected.
    pub fn from_sock_addr(raw: &SockAddr) -> Result<Self> {
        match raw {
            SockAddr::Inet(inet) => Ok(Self::from(inet.to_std().ip())),
            other => Err(ProbeError::UnsupportedFamily(other.family())),
        }
    }

    pub fn family(&self) -> AddressFamily {
        match self {
            NetworkAddress::V4(_) => AddressFamily::Inet,
            NetworkAddress::V6(_) => AddressFamily::Inet6,
        }
    }

    pub fn octets(&self) -> &[u8] {
        match self {
            NetworkAddress::V4(bytes) => bytes,
            NetworkAddress::V6(bytes) => bytes,
        }
    }

    pub fn ip(&self) -> IpAddr {
        match *self {
            NetworkAddress::V4(bytes) => IpAddr::V4(Ipv4Addr::from(bytes)),
            NetworkAddress::V6(bytes) => IpAddr::V6(Ipv6Addr::from(bytes)),
        }
    }

    /// The any-address of the same family, used as the local bind address.
    pub fn wildcard(&self) -> Self {
        match self {
            NetworkAddress::V4(_) => NetworkAddress::V4([0; 4]),
            NetworkAddress::V6(_) => NetworkAddress::V6([0; 16]),
        }
    }

    pub fn to_sock_addr(&self, port: u16) -> SockAddr {
        SockAddr::new_inet(InetAddr::from_std(&SocketAddr::new(self.ip(), port)))
    }
}

impl From<IpAddr> for NetworkAddress {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl From<Ipv4Addr> for NetworkAddress {
    fn from(ip: Ipv4Addr) -> Self {
        NetworkAddress::V4(ip.octets())
    }
}

impl From<Ipv6Addr> for NetworkAddress {
    fn from(ip: Ipv6Addr) -> Self {
        NetworkAddress::V6(ip.octets())
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ip().fmt(f)
    }
}
