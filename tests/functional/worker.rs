//! Tests for `ConnectionWorker`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anvil::handler::{Echo, Handler};
use anvil::net::{ClientSocket, Recv, ServerSocket};
use anvil::worker::WorkerOptions;
use anvil::{ConnectionWorker, ErrorOr, State};

use crate::util::{any_local_address, expect_prompt, wait_until, TIMEOUT};

/// Returns a pair of connected sockets: (client, accepted).
fn connected() -> (ClientSocket, ClientSocket) {
    let server = ServerSocket::listen(&any_local_address()).unwrap();
    let client = ClientSocket::connect(server.local_address(), TIMEOUT).unwrap();
    let accepted = server.accept(TIMEOUT).unwrap();
    (client, accepted)
}

#[test]
fn echo_with_client_socket() {
    let (client, accepted) = connected();
    let options = WorkerOptions::default().with_read_timeout(Duration::from_millis(20));
    let worker = ConnectionWorker::start(1, accepted, Echo::new(TIMEOUT), options).unwrap();
    assert!(worker.is_running());

    client.write_all(b"Hello", TIMEOUT).unwrap();
    let mut buf = [0; 16];
    let mut received = Vec::new();
    while received.len() < 5 {
        match client.read(&mut buf, TIMEOUT).unwrap() {
            Recv::Data(n) => received.extend_from_slice(&buf[..n]),
            recv => panic!("unexpected read result: {:?}", recv),
        }
    }
    assert_eq!(received, b"Hello");

    // Closing our side ends the worker's loop.
    client.shutdown_write().unwrap();
    wait_until("worker stopped", || !worker.is_running());
    assert_eq!(client.read(&mut buf, TIMEOUT).unwrap(), Recv::Closed);
}

#[test]
fn concurrent_shutdown() {
    struct Count(Arc<AtomicUsize>);

    impl Handler for Count {
        fn on_data(&mut self, _: &ClientSocket, data: &[u8]) -> ErrorOr<()> {
            let _ = self.0.fetch_add(data.len(), Ordering::SeqCst);
            Ok(())
        }

        fn on_close(&mut self) {
            let _ = self.0.fetch_add(1000, Ordering::SeqCst);
        }
    }

    let (client, accepted) = connected();
    let count = Arc::new(AtomicUsize::new(0));
    let options = WorkerOptions::default().with_read_timeout(Duration::from_secs(30));
    let worker = Arc::new(
        ConnectionWorker::start(2, accepted, Count(count.clone()), options).unwrap(),
    );

    client.write_all(b"abc", TIMEOUT).unwrap();
    wait_until("bytes handled", || count.load(Ordering::SeqCst) == 3);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let worker = worker.clone();
            std::thread::spawn(move || {
                expect_prompt(|| worker.shutdown());
                assert_eq!(worker.state(), State::Stopped);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(worker.state(), State::Stopped);
    assert!(!worker.is_running());
    // `on_close` is called exactly once.
    assert_eq!(count.load(Ordering::SeqCst), 1003);
}

#[test]
fn shutdown_waits_for_running_shutdown() {
    struct SlowClose(Arc<AtomicUsize>);

    impl Handler for SlowClose {
        fn on_data(&mut self, _: &ClientSocket, _: &[u8]) -> ErrorOr<()> {
            Ok(())
        }

        fn on_close(&mut self) {
            std::thread::sleep(Duration::from_millis(500));
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (_client, accepted) = connected();
    let closed = Arc::new(AtomicUsize::new(0));
    let options = WorkerOptions::default().with_read_timeout(Duration::from_millis(20));
    let worker = Arc::new(
        ConnectionWorker::start(3, accepted, SlowClose(closed.clone()), options).unwrap(),
    );

    let first = {
        let worker = worker.clone();
        std::thread::spawn(move || worker.shutdown())
    };
    wait_until("shutdown started", || worker.state() != State::Running);
    // The first caller is still joining the thread blocked in `on_close`.
    worker.shutdown();
    assert_eq!(worker.state(), State::Stopped);
    assert!(!worker.is_running());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    first.join().unwrap();
}
