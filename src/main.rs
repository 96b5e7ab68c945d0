use std::env;
use std::process::exit;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use anvil::acceptor::{Acceptor, Options};
use anvil::handler::Discard;
use anvil::log::{self, error, info};
use anvil::net::IpSocketAddress;
use anvil::signal::{Signal, SignalListener};
use anvil::{ErrorOrExt, Fault};

fn main() {
    // By default only informational or more severe messages are logged, set
    // `LOG_LEVEL` to change this, e.g. `LOG_LEVEL=trace`.
    log::init();

    if let Err(fault) = run() {
        error!("{:?} fault: {}", fault.domain(), fault);
        exit(1);
    }
}

fn run() -> Result<(), Fault> {
    // NOTE: must be created before any other thread is started.
    let signals = SignalListener::new(&Signal::ALL).or_raise()?;

    let mut options = Options::default();
    if let Some(address) = env::args().nth(1) {
        let address: IpSocketAddress = address.parse().or_raise()?;
        options = options.with_address(address);
    }

    let acceptor = Arc::new(Acceptor::start(options, Discard).or_raise()?);
    let signal_acceptor = acceptor.clone();
    let _signals = signals
        .spawn(move |signal| {
            info!("shutting down: signal={:#}", signal);
            signal_acceptor.shutdown();
        })
        .or_raise()?;

    while acceptor.is_running() {
        sleep(Duration::from_secs(1));
    }
    acceptor.shutdown();
    info!("stopped");
    Ok(())
}
