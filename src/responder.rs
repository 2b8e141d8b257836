//! Minimal Binding responder, enough to stand in for a STUN server on
//! loopback.

use std::net::SocketAddr;

use nix::sys::socket::SockAddr;
use stun::addr::MappedAddress;
use stun::error_code::{ErrorCode, ErrorCodeAttribute};
use stun::fingerprint::FINGERPRINT;
use stun::message::*;
use stun::xoraddr::*;

/// What to answer a Binding Request with.
#[derive(Debug, Clone)]
pub enum Reply {
    Success {
        xor_mapped: Option<SocketAddr>,
        mapped: Option<SocketAddr>,
        fingerprint: bool,
    },
    Error {
        code: u16,
        reason: String,
    },
}

impl Reply {
    pub fn xor_mapped(addr: SocketAddr) -> Self {
        Reply::Success {
            xor_mapped: Some(addr),
            mapped: None,
            fingerprint: false,
        }
    }

    pub fn mapped(addr: SocketAddr) -> Self {
        Reply::Success {
            xor_mapped: None,
            mapped: Some(addr),
            fingerprint: false,
        }
    }
}

/// Answers `buf` if it is a Binding Request, echoing its transaction id.
pub fn process_stun_request(buf: &[u8], reply: &Reply) -> Option<Message> {
    let mut req = Message::new();
    req.raw = buf.to_vec();
    if req.decode().is_err() || req.typ != BINDING_REQUEST {
        return None;
    }

    let mut msg = Message::new();
    match reply {
        Reply::Success {
            xor_mapped,
            mapped,
            fingerprint,
        } => {
            msg.build(&[Box::new(req.transaction_id), Box::new(BINDING_SUCCESS)])
                .ok()?;
            if let Some(addr) = xor_mapped {
                let xoraddr = XorMappedAddress {
                    ip: addr.ip(),
                    port: addr.port(),
                };
                xoraddr.add_to(&mut msg).ok()?;
            }
            if let Some(addr) = mapped {
                let mapped = MappedAddress {
                    ip: addr.ip(),
                    port: addr.port(),
                };
                mapped.add_to(&mut msg).ok()?;
            }
            if *fingerprint {
                FINGERPRINT.add_to(&mut msg).ok()?;
            }
        }
        Reply::Error { code, reason } => {
            msg.build(&[Box::new(req.transaction_id), Box::new(BINDING_ERROR)])
                .ok()?;
            let attr = ErrorCodeAttribute {
                code: ErrorCode(*code),
                reason: reason.as_bytes().to_vec(),
            };
            attr.add_to(&mut msg).ok()?;
        }
    }
    Some(msg)
}

/// Answers with the sender's own address, the way a public STUN server does.
pub fn reflect(src_addr: &SockAddr, buf: &[u8]) -> Option<Message> {
    match src_addr {
        SockAddr::Inet(inet) => process_stun_request(buf, &Reply::xor_mapped(inet.to_std())),
        _ => None,
    }
}
