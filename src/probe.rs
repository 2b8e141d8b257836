use std::fmt;
use std::net::SocketAddr;

use nix::sys::socket::{InetAddr, SockAddr};
use stun::message::Message;
use tracing::{debug, warn};

use crate::address::NetworkAddress;
use crate::cancel::CancelToken;
use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::message::{self, MappedSource};
use crate::socket::ProbeSocket;

/// Externally visible address of the local socket, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub external_address: NetworkAddress,
    pub external_port: u16,
    pub source: MappedSource,
}

impl ProbeResult {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.external_address.ip(), self.external_port)
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

/// Where a probe currently is; failures are reported with the state they
/// happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Idle,
    Sending,
    AwaitingResponse,
    Validating,
    ExtractingAddress,
}

/// Runs single Binding Request/Response exchanges against STUN servers.
///
/// Holds only configuration, so one engine can be shared by many threads;
/// every probe opens and closes its own socket.
#[derive(Debug, Clone, Default)]
pub struct StunProbe {
    config: ProbeConfig,
}

impl StunProbe {
    pub fn new(config: ProbeConfig) -> Self {
        StunProbe { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn probe(&self, server: &NetworkAddress, port: u16) -> Result<ProbeResult> {
        self.run(server, port, None)
    }

    /// Like [`probe`](Self::probe), but gives up as soon as `cancel` fires.
    pub fn probe_with_cancel(
        &self,
        server: &NetworkAddress,
        port: u16,
        cancel: &CancelToken,
    ) -> Result<ProbeResult> {
        self.run(server, port, Some(cancel))
    }

    fn run(
        &self,
        server: &NetworkAddress,
        port: u16,
        cancel: Option<&CancelToken>,
    ) -> Result<ProbeResult> {
        let mut state = ProbeState::Idle;
        self.exchange(server, port, cancel, &mut state)
            .map_err(|err| {
                warn!(%server, port, ?state, "STUN binding test failed: {}", err);
                err
            })
    }

    fn exchange(
        &self,
        server: &NetworkAddress,
        port: u16,
        cancel: Option<&CancelToken>,
        state: &mut ProbeState,
    ) -> Result<ProbeResult> {
        let request = message::binding_request()?;
        if self.config.debug {
            debug!(%server, port, "testing STUN server: message is of {} bytes", request.raw.len());
        }

        *state = ProbeState::Sending;
        let sock = ProbeSocket::open(server.family())?;
        sock.bind(&server.wildcard().to_sock_addr(self.config.local_port))?;
        let sent = sock.send_to(&request.raw, &server.to_sock_addr(port))?;
        if self.config.debug {
            let local = sock.local_addr().map(|addr| addr.to_string()).unwrap_or_default();
            debug!(%local, "sent {} bytes, waiting for reply", sent);
        }

        *state = ProbeState::AwaitingResponse;
        sock.wait_readable(self.config.timeout, cancel)?;
        let mut buf = vec![0u8; self.config.max_datagram + 1];
        let (len, from) = sock.recv(&mut buf)?;
        drop(sock);
        if self.config.debug {
            let from = from.map(|addr| addr.to_string()).unwrap_or_default();
            debug!(%from, "got {} bytes", len);
        }

        *state = ProbeState::Validating;
        let response = message::validate_response(&buf[..len], &request, self.config.max_datagram)?;
        message::check_binding_response(&response)?;

        *state = ProbeState::ExtractingAddress;
        let (mapped, source) = self.mapped_address(&response)?;
        let external_address =
            NetworkAddress::from_sock_addr(&SockAddr::new_inet(InetAddr::from_std(&mapped)))?;
        Ok(ProbeResult {
            external_address,
            external_port: mapped.port(),
            source,
        })
    }

    /// XOR-MAPPED-ADDRESS wins; MAPPED-ADDRESS is only consulted when the
    /// former is missing or unreadable.
    fn mapped_address(&self, response: &Message) -> Result<(SocketAddr, MappedSource)> {
        let xor = message::xor_mapped_address(response);
        if self.config.debug {
            debug!("XOR-MAPPED-ADDRESS: {:?}", xor);
        }
        if let Ok(addr) = xor {
            return Ok((addr, MappedSource::XorMapped));
        }

        let mapped = message::legacy_mapped_address(response);
        if self.config.debug {
            debug!("MAPPED-ADDRESS: {:?}", mapped);
        }
        match mapped {
            Ok(addr) => Ok((addr, MappedSource::Mapped)),
            Err(_) => Err(ProbeError::NoMappedAddress),
        }
    }
}

/// One probe with default settings, binding `local_port` (0 for ephemeral).
pub fn probe(server: &NetworkAddress, port: u16, local_port: u16) -> Result<ProbeResult> {
    StunProbe::new(ProbeConfig::default().with_local_port(local_port)).probe(server, port)
}
