mod common;

use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::socket::{InetAddr, SockAddr};
use stun::attributes::ATTR_XORMAPPED_ADDRESS;
use stun::message::Message;

use common::{engine, FakeServer};
use stuncheck::responder::{process_stun_request, reflect, Reply};
use stuncheck::{CancelToken, MappedSource, NetworkAddress, ProbeConfig, ProbeError, StunProbe};

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

#[test]
fn xor_mapped_address_is_returned() {
    let server = FakeServer::replying(Reply::xor_mapped(addr("1.2.3.4:56789")));
    let result = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap();
    server.join();

    assert_eq!(result.external_address, NetworkAddress::V4([1, 2, 3, 4]));
    assert_eq!(result.external_port, 56789);
    assert_eq!(result.source, MappedSource::XorMapped);
}

#[test]
fn falls_back_to_mapped_address() {
    let server = FakeServer::replying(Reply::mapped(addr("1.2.3.4:56789")));
    let result = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap();
    server.join();

    assert_eq!(result.socket_addr(), addr("1.2.3.4:56789"));
    assert_eq!(result.source, MappedSource::Mapped);
}

#[test]
fn truncated_xor_mapped_address_falls_back_to_mapped() {
    let server = FakeServer::spawn("127.0.0.1:0", |req, _| {
        let mut msg = process_stun_request(req, &Reply::mapped(addr("1.2.3.4:56789")))?;
        // IPv6 family with only an IPv4-sized payload
        msg.add(ATTR_XORMAPPED_ADDRESS, &[0, 2, 0xdd, 0xa7, 1, 2, 3, 4]);
        Some(msg.raw)
    });
    let result = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap();
    server.join();

    assert_eq!(result.socket_addr(), addr("1.2.3.4:56789"));
    assert_eq!(result.source, MappedSource::Mapped);
}

#[test]
fn xor_mapped_address_takes_precedence() {
    let server = FakeServer::replying(Reply::Success {
        xor_mapped: Some(addr("1.2.3.4:56789")),
        mapped: Some(addr("5.6.7.8:1234")),
        fingerprint: false,
    });
    let result = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap();
    server.join();

    assert_eq!(result.socket_addr(), addr("1.2.3.4:56789"));
    assert_eq!(result.source, MappedSource::XorMapped);
}

#[test]
fn fingerprinted_response_is_accepted() {
    let server = FakeServer::replying(Reply::Success {
        xor_mapped: Some(addr("198.51.100.20:40001")),
        mapped: None,
        fingerprint: true,
    });
    let result = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap();
    server.join();

    assert_eq!(result.to_string(), "198.51.100.20:40001");
}

#[test]
fn response_without_mapped_address_fails() {
    let server = FakeServer::replying(Reply::Success {
        xor_mapped: None,
        mapped: None,
        fingerprint: false,
    });
    let err = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap_err();
    server.join();

    assert!(matches!(err, ProbeError::NoMappedAddress), "{err:?}");
}

#[test]
fn silent_server_times_out() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server = silent.local_addr().unwrap();

    let started = Instant::now();
    let err = engine(Duration::from_millis(200))
        .probe(&NetworkAddress::from(server.ip()), server.port())
        .unwrap_err();

    assert!(matches!(err, ProbeError::Timeout(_)), "{err:?}");
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[test]
fn random_bytes_are_malformed() {
    let server = FakeServer::spawn("127.0.0.1:0", |_, _| {
        Some((0..64u8).map(|i| i.wrapping_mul(37) ^ 0x5a).collect())
    });
    let err = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap_err();
    server.join();

    assert!(matches!(err, ProbeError::MalformedResponse(_)), "{err:?}");
}

#[test]
fn oversized_datagram_is_rejected() {
    let server = FakeServer::spawn("127.0.0.1:0", |req, _| {
        let reply = Reply::xor_mapped(addr("1.2.3.4:56789"));
        let mut raw = process_stun_request(req, &reply)?.raw;
        raw.resize(1600, 0);
        Some(raw)
    });
    let err = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap_err();
    server.join();

    assert!(matches!(err, ProbeError::MalformedResponse(_)), "{err:?}");
}

#[test]
fn error_response_is_unexpected() {
    let server = FakeServer::replying(Reply::Error {
        code: 400,
        reason: "Bad Request".into(),
    });
    let err = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap_err();
    server.join();

    match err {
        ProbeError::UnexpectedResponse { error_code, .. } => {
            assert_eq!(error_code.as_deref(), Some("400 Bad Request"));
        }
        other => panic!("expected UnexpectedResponse, got {other:?}"),
    }
}

#[test]
fn foreign_transaction_is_rejected() {
    let server = FakeServer::spawn("127.0.0.1:0", |req, _| {
        let mut forged = req.to_vec();
        forged[19] ^= 0xff;
        let reply = Reply::xor_mapped(addr("1.2.3.4:56789"));
        process_stun_request(&forged, &reply).map(|msg: Message| msg.raw)
    });
    let err = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap_err();
    server.join();

    assert!(matches!(err, ProbeError::TransactionMismatch), "{err:?}");
}

#[test]
fn cancel_interrupts_the_wait() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server = silent.local_addr().unwrap();
    let token = CancelToken::new().unwrap();

    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            token.cancel();
        })
    };

    let started = Instant::now();
    let err = engine(Duration::from_secs(10))
        .probe_with_cancel(&NetworkAddress::from(server.ip()), server.port(), &token)
        .unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, ProbeError::Cancelled), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn unbounded_timeout_still_honours_cancel() {
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server = silent.local_addr().unwrap();
    let token = CancelToken::new().unwrap();
    token.cancel();

    let err = engine(Duration::MAX)
        .probe_with_cancel(&NetworkAddress::from(server.ip()), server.port(), &token)
        .unwrap_err();

    assert!(matches!(err, ProbeError::Cancelled), "{err:?}");
}

#[test]
fn local_port_is_used_for_the_request() {
    let local_port = {
        let probe_port = UdpSocket::bind("0.0.0.0:0").unwrap();
        probe_port.local_addr().unwrap().port()
    };
    let server = FakeServer::spawn("127.0.0.1:0", |req, peer| {
        reflect(&SockAddr::new_inet(InetAddr::from_std(&peer)), req).map(|msg| msg.raw)
    });
    let probe = StunProbe::new(
        ProbeConfig::default()
            .with_local_port(local_port)
            .with_timeout(Duration::from_secs(2)),
    );
    let result = probe.probe(&server.network_address(), server.port()).unwrap();
    server.join();

    assert_eq!(result.external_address, NetworkAddress::V4([127, 0, 0, 1]));
    assert_eq!(result.external_port, local_port);
}

#[test]
fn busy_local_port_is_a_transport_error() {
    let blocker = UdpSocket::bind("0.0.0.0:0").unwrap();
    let busy = blocker.local_addr().unwrap().port();
    let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
    let server = silent.local_addr().unwrap();

    let probe = StunProbe::new(ProbeConfig::default().with_local_port(busy));
    match probe.probe(&NetworkAddress::from(server.ip()), server.port()) {
        Err(ProbeError::Transport { op, .. }) => assert_eq!(op, "bind"),
        other => panic!("expected bind failure, got {other:?}"),
    }
}

#[test]
fn ipv6_server_gets_ipv6_socket() {
    if UdpSocket::bind("[::1]:0").is_err() {
        return;
    }
    let server = FakeServer::spawn("[::1]:0", |req, peer| {
        reflect(&SockAddr::new_inet(InetAddr::from_std(&peer)), req).map(|msg| msg.raw)
    });
    let result = engine(Duration::from_secs(2))
        .probe(&server.network_address(), server.port())
        .unwrap();
    server.join();

    assert_eq!(result.external_address.to_string(), "::1");
    assert_ne!(result.external_port, 0);
}

#[test]
fn concurrent_probes_are_independent() {
    let servers: Vec<_> = (1..=4u8)
        .map(|n| {
            let mapped = SocketAddr::from(([10, 0, 0, n], 1000 + n as u16));
            FakeServer::replying(Reply::xor_mapped(mapped))
        })
        .collect();
    let probe = engine(Duration::from_secs(2));

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = servers
            .iter()
            .map(|server| {
                let probe = &probe;
                scope.spawn(move || {
                    probe
                        .probe(&server.network_address(), server.port())
                        .map_err(|err| err.to_string())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
    });
    for server in servers {
        server.join();
    }

    for (n, result) in (1..=4u8).zip(results) {
        assert_eq!(result.external_address, NetworkAddress::V4([10, 0, 0, n]));
        assert_eq!(result.external_port, 1000 + n as u16);
    }
}
