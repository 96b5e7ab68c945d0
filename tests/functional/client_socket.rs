//! Tests for `ClientSocket`.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use anvil::error::{Domain, ErrorOrExt};
use anvil::net::{ClientSocket, IpSocketAddress, Recv, ServerSocket};

use crate::util::{any_local_address, socket_addr, unused_port, TIMEOUT};

const DATA: &[u8] = b"Hello world";

/// Returns an accepted `ClientSocket` and the peer's stream.
fn accepted() -> (ClientSocket, TcpStream) {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    let stream = TcpStream::connect(socket_addr(server.local_address())).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    let socket = server.accept(TIMEOUT).unwrap();
    (socket, stream)
}

#[test]
fn connect() {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    let client = ClientSocket::connect(server.local_address(), TIMEOUT).unwrap();
    let accepted = server.accept(TIMEOUT).unwrap();

    assert!(client.socket().is_nonblocking().unwrap());
    assert_eq!(client.remote_address(), server.local_address());
    assert_eq!(client.local_address(), accepted.remote_address());
    assert_eq!(client.remote_address(), accepted.local_address());
}

#[test]
fn connect_refused() {
    let address = IpSocketAddress::from_ipv4_address("127.0.0.1", unused_port());
    let err = ClientSocket::connect(&address, TIMEOUT).release_error();
    assert_eq!(err.domain(), Domain::Network);
    assert!(!err.is_timeout());
    assert_eq!(err.os_code(), Some(libc::ECONNREFUSED));
    assert!(
        err.message().starts_with("connect() failed with ECONNREFUSED("),
        "{}",
        err
    );
}

#[test]
fn read_timeout() {
    let (socket, _stream) = accepted();
    let start = Instant::now();
    let recv = socket.read(&mut [0; 16], Duration::from_millis(100)).unwrap();
    let elapsed = start.elapsed();
    assert_eq!(recv, Recv::Timeout);
    assert_eq!(recv.len(), 0);
    assert!(!recv.is_closed());
    assert!(elapsed >= Duration::from_millis(90), "{:?}", elapsed);
    assert!(elapsed < TIMEOUT, "{:?}", elapsed);
}

#[test]
fn read_until_closed() {
    let (socket, mut stream) = accepted();
    stream.write_all(DATA).unwrap();
    drop(stream);

    let mut buf = [0; 64];
    let recv = socket.read(&mut buf, TIMEOUT).unwrap();
    assert_eq!(recv, Recv::Data(DATA.len()));
    assert_eq!(&buf[..recv.len()], DATA);

    // End of stream is different from timing out.
    let recv = socket.read(&mut buf, TIMEOUT).unwrap();
    assert_eq!(recv, Recv::Closed);
    assert!(recv.is_closed());
    assert!(recv.is_empty());
}

#[test]
fn write() {
    let (socket, mut stream) = accepted();
    let n = socket.write(DATA, TIMEOUT).unwrap();
    assert_eq!(n, DATA.len());

    let mut buf = [0; 64];
    stream.read_exact(&mut buf[..n]).unwrap();
    assert_eq!(&buf[..n], DATA);
}

#[test]
fn write_all_large() {
    let (socket, mut stream) = accepted();
    let data: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = data.clone();

    let reader = thread::spawn(move || {
        let mut received = Vec::with_capacity(expected.len());
        stream.read_to_end(&mut received).unwrap();
        assert_eq!(received.len(), expected.len());
        assert!(received == expected);
    });

    socket.write_all(&data, Duration::from_secs(30)).unwrap();
    socket.close().unwrap();
    reader.join().unwrap();
}

#[test]
fn write_all_timeout() {
    let (socket, _stream) = accepted();
    // Peer never reads, eventually filling up all buffers.
    let data = vec![0; 64 * 1024 * 1024];
    let err = socket
        .write_all(&data, Duration::from_millis(200))
        .release_error();
    assert!(err.is_timeout(), "{}", err);
    assert_eq!(err.message(), "send() timeout");
}

#[test]
fn shutdown_write() {
    let (socket, mut stream) = accepted();
    socket.shutdown_write().unwrap();

    let mut buf = [0; 16];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);

    // Can still read.
    stream.write_all(DATA).unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    let recv = socket.read(&mut buf, TIMEOUT).unwrap();
    assert_eq!(&buf[..recv.len()], DATA);
}

#[test]
fn use_after_close() {
    let (socket, mut stream) = accepted();
    socket.close().unwrap();

    let err = socket.read(&mut [0; 16], TIMEOUT).release_error();
    assert_eq!(err.os_code(), Some(libc::EBADF));
    let err = socket.write(DATA, TIMEOUT).release_error();
    assert_eq!(err.os_code(), Some(libc::EBADF));

    let mut buf = [0; 16];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn write_after_peer_closed() {
    let (socket, stream) = accepted();
    drop(stream);

    // Shouldn't raise `SIGPIPE`, but fail with an error eventually.
    let start = Instant::now();
    loop {
        match socket.write(DATA, TIMEOUT) {
            Ok(_) => assert!(start.elapsed() < TIMEOUT, "write never failed"),
            Err(err) => {
                assert_eq!(err.domain(), Domain::Network);
                assert!(err.message().starts_with("send() failed with"), "{}", err);
                break;
            }
        }
        thread::sleep(Duration::from_millis(5));
    }
}
