//! Tests for `ServerSocket`.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, sleep};
use std::time::{Duration, Instant};

use anvil::error::{Domain, ErrorOrExt};
use anvil::net::{IpSocketAddress, ServerSocket};

use crate::util::{any_local_address, expect_prompt, socket_addr, TIMEOUT};

#[test]
fn listen_resolves_port() {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    let address = server.local_address();
    assert_eq!(address.address(), "127.0.0.1");
    assert_ne!(address.port(), 0);
    assert!(server.socket().is_nonblocking().unwrap());
}

#[test]
fn listen_address_in_use() {
    // Doesn't set `SO_REUSEPORT`, so we can't bind to the same port.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let address = IpSocketAddress::from_ipv4_address("127.0.0.1", port);
    let err = ServerSocket::listen(&address).release_error();
    assert_eq!(err.domain(), Domain::Network);
    assert_eq!(err.os_code(), Some(libc::EADDRINUSE));
    assert!(err.message().starts_with("bind() failed with EADDRINUSE("), "{}", err);
}

#[test]
fn listen_invalid_address() {
    let address = IpSocketAddress::from_ipv4_address("256.0.0.1", 0);
    assert!(ServerSocket::listen(&address).is_error());
    let address = IpSocketAddress::from_ipv6_address("::1", 0);
    assert!(ServerSocket::listen(&address).is_error());
}

#[test]
fn accept_timeout() {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    let start = Instant::now();
    let err = server.accept(Duration::from_millis(100)).release_error();
    let elapsed = start.elapsed();
    assert!(err.is_timeout(), "{}", err);
    assert_eq!(err.domain(), Domain::Network);
    assert!(elapsed >= Duration::from_millis(90), "{:?}", elapsed);
    assert!(elapsed < TIMEOUT, "{:?}", elapsed);
}

#[test]
fn accept() {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    let stream = TcpStream::connect(socket_addr(server.local_address())).unwrap();

    let socket = server.accept(TIMEOUT).unwrap();
    assert!(socket.socket().is_nonblocking().unwrap());
    assert_eq!(
        socket_addr(socket.remote_address()),
        stream.local_addr().unwrap()
    );
    assert_eq!(
        socket_addr(socket.local_address()),
        stream.peer_addr().unwrap()
    );
}

#[test]
fn accept_multiple() {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    let streams: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(socket_addr(server.local_address())).unwrap())
        .collect();

    let mut ports: Vec<u16> = (0..3)
        .map(|_| server.accept(TIMEOUT).unwrap().remote_address().port())
        .collect();
    let mut expected: Vec<u16> = streams
        .iter()
        .map(|stream| stream.local_addr().unwrap().port())
        .collect();
    ports.sort_unstable();
    expected.sort_unstable();
    assert_eq!(ports, expected);
}

#[test]
fn close_interrupts_accept() {
    let server = Arc::new(ServerSocket::listen(&any_local_address()).unwrap());
    let s = server.clone();
    let handle = thread::spawn(move || expect_prompt(|| s.accept(Duration::from_secs(30))));

    // Give the thread some time to start accepting.
    sleep(Duration::from_millis(50));
    server.close().unwrap();
    assert!(server.socket().is_closed());

    let err = handle.join().unwrap().release_error();
    assert!(!err.is_timeout(), "{}", err);
    assert_eq!(err.domain(), Domain::Network);
}

#[test]
fn accept_after_close() {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    server.close().unwrap();
    let err = server.accept(TIMEOUT).release_error();
    assert_eq!(err.os_code(), Some(libc::EBADF));
    // Closing again is fine.
    server.close().unwrap();
}
