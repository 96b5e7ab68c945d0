//! Tests for `Acceptor`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anvil::acceptor::Options;
use anvil::error::{Domain, ErrorOrExt};
use anvil::handler::{Echo, Handler};
use anvil::net::{ClientSocket, IpSocketAddress};
use anvil::{Acceptor, ErrorOr, State};

use crate::util::{any_local_address, expect_prompt, socket_addr, unused_port, wait_until, TIMEOUT};

fn options() -> Options {
    Options::default()
        .with_address(any_local_address())
        .with_read_timeout(Duration::from_millis(50))
        .with_sweep_interval(Duration::from_millis(50))
}

fn connect(acceptor: &Acceptor) -> TcpStream {
    let stream = TcpStream::connect(socket_addr(acceptor.local_address())).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    stream
}

#[test]
fn create_and_shutdown() {
    let acceptor = Acceptor::create(0, "127.0.0.1").unwrap();
    assert!(acceptor.is_running());
    assert_eq!(acceptor.state(), State::Running);
    assert_eq!(acceptor.local_address().address(), "127.0.0.1");
    assert_ne!(acceptor.local_address().port(), 0);
    assert_eq!(acceptor.worker_count(), 0);

    // Accept timeout is 1 second, closing the socket should interrupt it.
    expect_prompt(|| acceptor.shutdown());
    assert!(!acceptor.is_running());
    assert_eq!(acceptor.state(), State::Stopped);

    // Calling it again does nothing.
    acceptor.shutdown();
    assert_eq!(acceptor.state(), State::Stopped);
}

#[test]
fn create_address_in_use() {
    let first = Acceptor::create(0, "127.0.0.1").unwrap();
    let port = first.local_address().port();
    // Both sockets use `SO_REUSEPORT`, so this is allowed.
    let second = Acceptor::create(port, "127.0.0.1").unwrap();
    assert_eq!(second.local_address().port(), port);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let err = Acceptor::create(port, "127.0.0.1").release_error();
    assert_eq!(err.domain(), Domain::Network);
    assert_eq!(err.os_code(), Some(libc::EADDRINUSE));
}

#[test]
fn create_invalid_address() {
    let err = Acceptor::create(0, "not an address").release_error();
    assert_eq!(err.domain(), Domain::Network);
}

#[test]
fn echo() {
    let acceptor = Acceptor::start(options(), Echo::new(TIMEOUT)).unwrap();

    let mut streams: Vec<TcpStream> = (0..3).map(|_| connect(&acceptor)).collect();
    for (i, stream) in streams.iter_mut().enumerate() {
        let msg = format!("Hello {}", i);
        stream.write_all(msg.as_bytes()).unwrap();
        let mut buf = vec![0; msg.len()];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, msg.as_bytes());
    }
    wait_until("workers added", || acceptor.worker_count() == 3);
}

#[test]
fn new_handler_per_connection() {
    let created = Arc::new(AtomicUsize::new(0));
    let c = created.clone();
    let new_handler = move |address: &IpSocketAddress| {
        assert_eq!(address.address(), "127.0.0.1");
        let _ = c.fetch_add(1, Ordering::SeqCst);
        Echo::default()
    };
    let acceptor = Acceptor::start(options(), new_handler).unwrap();

    let _streams: Vec<TcpStream> = (0..4).map(|_| connect(&acceptor)).collect();
    wait_until("handlers created", || created.load(Ordering::SeqCst) == 4);
}

#[test]
fn finished_connections_are_cleaned_up() {
    let acceptor = Acceptor::start(options(), Echo::default()).unwrap();
    let streams: Vec<TcpStream> = (0..5).map(|_| connect(&acceptor)).collect();
    wait_until("connections accepted", || acceptor.worker_count() == 5);

    drop(streams);
    wait_until("workers cleaned up", || acceptor.worker_count() == 0);
    assert!(acceptor.is_running());
}

#[test]
fn shutdown_stops_workers() {
    // Long timeouts, shutting down must interrupt them.
    let options = options()
        .with_accept_timeout(Duration::from_secs(30))
        .with_read_timeout(Duration::from_secs(30))
        .with_sweep_interval(Duration::from_secs(30));
    let acceptor = Acceptor::start(options, Echo::default()).unwrap();
    let mut streams: Vec<TcpStream> = (0..3).map(|_| connect(&acceptor)).collect();
    wait_until("connections accepted", || acceptor.worker_count() == 3);

    expect_prompt(|| acceptor.shutdown());
    assert_eq!(acceptor.worker_count(), 0);
    assert_eq!(acceptor.state(), State::Stopped);

    // All connections are closed.
    for stream in &mut streams {
        let mut buf = [0; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}

#[test]
fn concurrent_shutdown() {
    let acceptor = Arc::new(Acceptor::start(options(), Echo::default()).unwrap());
    let _stream = connect(&acceptor);
    wait_until("connection accepted", || acceptor.worker_count() == 1);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let acceptor = acceptor.clone();
            thread::spawn(move || {
                acceptor.shutdown();
                // Every caller waits for the shutdown to complete.
                assert_eq!(acceptor.state(), State::Stopped);
                assert_eq!(acceptor.worker_count(), 0);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(acceptor.state(), State::Stopped);
    assert!(!acceptor.is_running());
    assert_eq!(acceptor.worker_count(), 0);
}

#[test]
fn concurrent_shutdown_waits_for_slow_workers() {
    struct SlowClose(Arc<AtomicUsize>);

    impl Handler for SlowClose {
        fn on_data(&mut self, _: &ClientSocket, _: &[u8]) -> ErrorOr<()> {
            Ok(())
        }

        fn on_close(&mut self) {
            thread::sleep(Duration::from_millis(500));
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let closed = Arc::new(AtomicUsize::new(0));
    let c = closed.clone();
    let new_handler = move |_: &IpSocketAddress| SlowClose(c.clone());
    let acceptor = Arc::new(Acceptor::start(options(), new_handler).unwrap());
    let _stream = connect(&acceptor);
    wait_until("connection accepted", || acceptor.worker_count() == 1);

    let first = {
        let acceptor = acceptor.clone();
        thread::spawn(move || acceptor.shutdown())
    };
    wait_until("shutdown started", || acceptor.state() != State::Running);
    // The first caller is still joining the worker.
    acceptor.shutdown();
    assert_eq!(acceptor.state(), State::Stopped);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    first.join().unwrap();
}

#[test]
fn drop_shuts_down() {
    let acceptor = Acceptor::start(options(), Echo::default()).unwrap();
    let mut stream = connect(&acceptor);
    wait_until("connection accepted", || acceptor.worker_count() == 1);

    expect_prompt(|| drop(acceptor));
    let mut buf = [0; 8];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn nothing_listening_after_shutdown() {
    let options = options().with_address(IpSocketAddress::from_ipv4_address(
        "127.0.0.1",
        unused_port(),
    ));
    let acceptor = Acceptor::start(options, Echo::default()).unwrap();
    let address = socket_addr(acceptor.local_address());
    acceptor.shutdown();

    assert!(TcpStream::connect(address).is_err());
}
