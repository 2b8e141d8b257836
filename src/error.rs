use std::io;
use std::time::Duration;

use nix::sys::socket::AddressFamily;
use thiserror::Error;

/// Every way a probe can end without a mapped address.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unsupported address family {0:?}")]
    UnsupportedFamily(AddressFamily),

    #[error("{op} failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("probe cancelled")]
    Cancelled,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("response transaction id does not match the request")]
    TransactionMismatch,

    #[error("unexpected response {class}/{method}{}", .error_code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
    UnexpectedResponse {
        class: String,
        method: String,
        error_code: Option<String>,
    },

    #[error("no XOR-MAPPED-ADDRESS or MAPPED-ADDRESS in response")]
    NoMappedAddress,

    #[error("could not build binding request: {0}")]
    Request(#[source] stun::Error),

    #[error("could not resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
}

impl ProbeError {
    pub(crate) fn transport(op: &'static str, errno: nix::errno::Errno) -> Self {
        ProbeError::Transport {
            op,
            source: io::Error::from_raw_os_error(errno as i32),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
