//! STUN Binding checks: find out which address and port a STUN server sees
//! for a local UDP socket.
//!
//! ```no_run
//! use stuncheck::{resolve, StunProbe, ProbeConfig};
//!
//! let server = resolve("stun.example.net")?;
//! let result = StunProbe::new(ProbeConfig::default()).probe(&server, 3478)?;
//! println!("external {}", result);
//! # Ok::<(), stuncheck::ProbeError>(())
//! ```

pub mod address;
pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod probe;
pub mod resolve;
pub mod responder;
mod socket;

pub use address::NetworkAddress;
pub use cancel::CancelToken;
pub use config::ProbeConfig;
pub use error::ProbeError;
pub use message::MappedSource;
pub use probe::{probe, ProbeResult, ProbeState, StunProbe};
pub use resolve::resolve;
