#![allow(dead_code)]

use std::net::{SocketAddr, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use stuncheck::responder::{process_stun_request, Reply};
use stuncheck::{NetworkAddress, ProbeConfig, StunProbe};

/// A one-shot STUN server on loopback: answers the first datagram it gets
/// with whatever `respond` returns.
pub struct FakeServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub fn spawn<F>(bind: &str, respond: F) -> FakeServer
    where
        F: FnOnce(&[u8], SocketAddr) -> Option<Vec<u8>> + Send + 'static,
    {
        let sock = UdpSocket::bind(bind).unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let addr = sock.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 1500];
            if let Ok((len, peer)) = sock.recv_from(&mut buf) {
                if let Some(reply) = respond(&buf[..len], peer) {
                    let _ = sock.send_to(&reply, peer);
                }
            }
        });
        FakeServer { addr, handle }
    }

    pub fn replying(reply: Reply) -> FakeServer {
        FakeServer::spawn("127.0.0.1:0", move |req, _| {
            process_stun_request(req, &reply).map(|msg| msg.raw)
        })
    }

    pub fn network_address(&self) -> NetworkAddress {
        NetworkAddress::from(self.addr.ip())
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn join(self) {
        self.handle.join().unwrap();
    }
}

pub fn engine(timeout: Duration) -> StunProbe {
    StunProbe::new(ProbeConfig::default().with_timeout(timeout).with_debug(true))
}
