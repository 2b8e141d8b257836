use std::io;
use std::net::ToSocketAddrs;

use nix::sys::socket::{InetAddr, SockAddr};

use crate::address::NetworkAddress;
use crate::error::{ProbeError, Result};

/// Looks `host` up with the system resolver and returns the first address
/// that converts cleanly.
pub fn resolve(host: &str) -> Result<NetworkAddress> {
    let resolve_err = |source| ProbeError::Resolve {
        host: host.to_owned(),
        source,
    };
    let candidates = (host, 0).to_socket_addrs().map_err(resolve_err)?;
    candidates
        .filter_map(|addr| {
            NetworkAddress::from_sock_addr(&SockAddr::new_inet(InetAddr::from_std(&addr))).ok()
        })
        .next()
        .ok_or_else(|| {
            resolve_err(io::Error::new(
                io::ErrorKind::NotFound,
                "no IPv4 or IPv6 address",
            ))
        })
}
