//! Binding Request construction and response validation.
//!
//! Encoding and attribute decoding are delegated to the `stun` crate; this
//! module adds the checks a client needs before trusting a response: exact
//! length, header bits, transaction matching and the optional FINGERPRINT.

use std::net::SocketAddr;

use stun::addr::MappedAddress;
use stun::agent::TransactionId;
use stun::attributes::{
    ATTR_FINGERPRINT, ATTR_MAPPED_ADDRESS, ATTR_MESSAGE_INTEGRITY, ATTR_XORMAPPED_ADDRESS,
};
use stun::error_code::{ErrorCode, ErrorCodeAttribute};
use stun::fingerprint::FINGERPRINT;
use stun::message::{
    is_message, Getter, Message, BINDING_REQUEST, CLASS_SUCCESS_RESPONSE, METHOD_BINDING,
};
use stun::xoraddr::XorMappedAddress;

use crate::error::{ProbeError, Result};

pub const HEADER_SIZE: usize = 20;

/// HMAC-SHA1 output carried by MESSAGE-INTEGRITY.
const MESSAGE_INTEGRITY_SIZE: usize = 20;

const FAMILY_IPV4: u16 = 0x01;
const FAMILY_IPV6: u16 = 0x02;

/// Comprehension-required attribute types (below 0x8000) a response may
/// carry without being rejected.
const KNOWN_REQUIRED_ATTRIBUTES: &[u16] = &[
    0x0001, // MAPPED-ADDRESS
    0x0002, // RESPONSE-ADDRESS
    0x0003, // CHANGE-REQUEST
    0x0004, // SOURCE-ADDRESS
    0x0005, // CHANGED-ADDRESS
    0x0006, // USERNAME
    0x0007, // PASSWORD
    0x0008, // MESSAGE-INTEGRITY
    0x0009, // ERROR-CODE
    0x000a, // UNKNOWN-ATTRIBUTES
    0x000b, // REFLECTED-FROM
    0x000c, // CHANNEL-NUMBER
    0x000d, // LIFETIME
    0x0010, // BANDWIDTH
    0x0012, // XOR-PEER-ADDRESS
    0x0013, // DATA
    0x0014, // REALM
    0x0015, // NONCE
    0x0016, // XOR-RELAYED-ADDRESS
    0x0017, // REQUESTED-ADDRESS-FAMILY
    0x0018, // EVEN-PORT
    0x0019, // REQUESTED-TRANSPORT
    0x001a, // DONT-FRAGMENT
    0x001c, // MESSAGE-INTEGRITY-SHA256
    0x001d, // PASSWORD-ALGORITHM
    0x001e, // USERHASH
    0x0020, // XOR-MAPPED-ADDRESS
    0x0022, // RESERVATION-TOKEN
    0x0024, // PRIORITY
    0x0025, // USE-CANDIDATE
    0x0026, // PADDING
    0x0027, // RESPONSE-PORT
    0x002a, // CONNECTION-ID
];

/// Which response attribute supplied the mapped address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedSource {
    XorMapped,
    Mapped,
}

/// Builds an attribute-less Binding Request with a fresh random transaction id.
pub fn binding_request() -> Result<Message> {
    let mut msg = Message::new();
    msg.build(&[Box::new(TransactionId::new()), Box::new(BINDING_REQUEST)])
        .map_err(ProbeError::Request)?;
    Ok(msg)
}

/// Parses `raw` as the answer to `request`.
///
/// Only the message form and the transaction are checked here; class and
/// method are left to [`check_binding_response`].
pub fn validate_response(raw: &[u8], request: &Message, max_datagram: usize) -> Result<Message> {
    if raw.len() > max_datagram {
        return Err(malformed(format!(
            "datagram of {} bytes exceeds the {max_datagram} byte limit",
            raw.len()
        )));
    }
    if !is_message(raw) {
        return Err(malformed("not a STUN message"));
    }
    if raw[0] & 0xc0 != 0 {
        return Err(malformed("leading type bits are not zero"));
    }
    let declared = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    if declared % 4 != 0 {
        return Err(malformed(format!("length {declared} is not 4-byte aligned")));
    }
    if HEADER_SIZE + declared != raw.len() {
        return Err(malformed(format!(
            "header announces {declared} attribute bytes, datagram carries {}",
            raw.len() - HEADER_SIZE
        )));
    }

    let mut msg = Message::new();
    msg.raw = raw.to_vec();
    msg.decode().map_err(|err| malformed(err.to_string()))?;

    if let Some(unknown) = msg
        .attributes
        .0
        .iter()
        .map(|attr| attr.typ.0)
        .find(|typ| *typ < 0x8000 && !KNOWN_REQUIRED_ATTRIBUTES.contains(typ))
    {
        return Err(malformed(format!(
            "unknown comprehension-required attribute 0x{unknown:04x}"
        )));
    }
    if msg.get(ATTR_FINGERPRINT).is_ok() {
        FINGERPRINT
            .check(&msg)
            .map_err(|err| malformed(format!("FINGERPRINT: {err}")))?;
    }
    if let Ok(integrity) = msg.get(ATTR_MESSAGE_INTEGRITY) {
        if integrity.len() != MESSAGE_INTEGRITY_SIZE {
            return Err(malformed(format!(
                "MESSAGE-INTEGRITY of {} bytes",
                integrity.len()
            )));
        }
    }

    if msg.transaction_id != request.transaction_id {
        return Err(ProbeError::TransactionMismatch);
    }
    Ok(msg)
}

/// Accepts only a Binding success response.
pub fn check_binding_response(msg: &Message) -> Result<()> {
    if msg.typ.class == CLASS_SUCCESS_RESPONSE && msg.typ.method == METHOD_BINDING {
        return Ok(());
    }
    Err(ProbeError::UnexpectedResponse {
        class: msg.typ.class.to_string(),
        method: msg.typ.method.to_string(),
        error_code: error_code(msg),
    })
}

/// ERROR-CODE of an error response, as "code reason".
pub fn error_code(msg: &Message) -> Option<String> {
    let mut attr = ErrorCodeAttribute {
        code: ErrorCode(0),
        reason: Vec::new(),
    };
    attr.get_from(msg).ok()?;
    let reason = String::from_utf8_lossy(&attr.reason);
    Some(format!("{} {}", attr.code.0, reason).trim_end().to_owned())
}

/// XOR-MAPPED-ADDRESS, decoded against the cookie and transaction id.
pub fn xor_mapped_address(msg: &Message) -> std::result::Result<SocketAddr, stun::Error> {
    check_address_value(&msg.get(ATTR_XORMAPPED_ADDRESS)?)?;
    let mut attr = XorMappedAddress::default();
    attr.get_from(msg)?;
    Ok(SocketAddr::new(attr.ip, attr.port))
}

/// Legacy MAPPED-ADDRESS, carried in the clear.
pub fn legacy_mapped_address(msg: &Message) -> std::result::Result<SocketAddr, stun::Error> {
    check_address_value(&msg.get(ATTR_MAPPED_ADDRESS)?)?;
    let mut attr = MappedAddress::default();
    attr.get_from(msg)?;
    Ok(SocketAddr::new(attr.ip, attr.port))
}

/// An address attribute is exactly 8 bytes for IPv4 and 20 for IPv6; the
/// `stun` decoders accept shorter values and zero-fill them.
fn check_address_value(value: &[u8]) -> std::result::Result<(), stun::Error> {
    if value.len() < 4 {
        return Err(stun::Error::Other(format!(
            "address attribute of {} bytes",
            value.len()
        )));
    }
    let expected = match u16::from_be_bytes([value[0], value[1]]) {
        FAMILY_IPV4 => 8,
        FAMILY_IPV6 => 20,
        family => {
            return Err(stun::Error::Other(format!(
                "address family 0x{family:02x}"
            )))
        }
    };
    if value.len() != expected {
        return Err(stun::Error::Other(format!(
            "address attribute of {} bytes, family needs {expected}",
            value.len()
        )));
    }
    Ok(())
}

fn malformed(reason: impl Into<String>) -> ProbeError {
    ProbeError::MalformedResponse(reason.into())
}
