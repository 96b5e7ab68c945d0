//! Tests for `Socket`.

use std::sync::Arc;
use std::thread::{self, sleep};
use std::time::Duration;

use anvil::error::{Domain, ErrorOrExt};
use anvil::net::{Readiness, ServerSocket, Socket};

use crate::util::{any_local_address, expect_prompt};

#[test]
fn close_wakes_up_poll() {
    let server = Arc::new(ServerSocket::listen(&any_local_address()).unwrap());
    let s = server.clone();
    let handle = thread::spawn(move || {
        expect_prompt(|| s.socket().poll(Readiness::READABLE, Duration::from_secs(30)))
    });

    // Give the thread some time to start polling.
    sleep(Duration::from_millis(50));
    server.close().unwrap();

    let result = handle.join().unwrap();
    // Either woken with the hang up event, or the socket was already closed.
    match result {
        Ok(events) => assert!(events.is_hup() || events.is_error(), "{:?}", events),
        Err(err) => {
            assert!(!err.is_timeout());
            assert_eq!(err.os_code(), Some(libc::EBADF));
        }
    }
}

#[test]
fn closed_socket_is_never_reused() {
    let socket = Socket::create().unwrap();
    socket.close().unwrap();

    // Likely to get the same file descriptor number.
    let other = Socket::create().unwrap();
    assert!(other.fd() >= 0);

    let err = socket.set_nonblocking(true).release_error();
    assert_eq!(err.domain(), Domain::Network);
    assert_eq!(err.os_code(), Some(libc::EBADF));
    // The other socket isn't touched.
    assert!(!other.is_nonblocking().unwrap());
}

#[test]
fn poll_listening_socket_times_out() {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    let socket = server.socket();
    assert!(!socket
        .can_read_without_blocking(Duration::from_millis(10))
        .unwrap());
    let err = socket
        .poll(Readiness::READABLE, Duration::from_millis(10))
        .release_error();
    assert!(err.is_timeout());
    assert_eq!(err.message(), "poll() timeout");
}
