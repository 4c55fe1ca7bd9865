use multistream_latency::driver::DriverState;
use multistream_latency::meter::{CancelToken, ProbeObserver, ProbeOutcome, StreamMode, WaitError};
use multistream_latency::stream::StreamRange;
use multistream_latency::transport::{
    Direction, MemoryTransport, MultiStreamTransport, TcpTransport, Transport,
};
use multistream_latency::{
    transport_factory, BenchError, BenchSettings, BenchmarkDriver, Histogram, Result,
    TransportFactory,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn settings(stream_mode: StreamMode) -> BenchSettings {
    BenchSettings {
        bucket_bounds: Histogram::linear_bounds(50_000, 256, true),
        stream_mode,
        bind_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        probe_timeout: Some(Duration::from_secs(5)),
    }
}

fn multi(reassemble: bool) -> StreamMode {
    StreamMode::Multi {
        range: StreamRange::new(7, 0, 9).unwrap(),
        reassemble,
    }
}

/// Both factories hand out clones of one in-memory transport so they share an address space
fn memory(transport: MemoryTransport) -> (TransportFactory, TransportFactory) {
    let server = transport.clone();
    (
        transport_factory(move || Ok(Arc::new(server.clone()) as Arc<dyn Transport>)),
        transport_factory(move || Ok(Arc::new(transport.clone()) as Arc<dyn Transport>)),
    )
}

fn same<T: Transport + 'static>(build: fn() -> T) -> (TransportFactory, TransportFactory) {
    (
        transport_factory(move || Ok(Arc::new(build()) as Arc<dyn Transport>)),
        transport_factory(move || Ok(Arc::new(build()) as Arc<dyn Transport>)),
    )
}

#[derive(Default)]
struct Counting {
    round_trips: usize,
    finished: bool,
}

impl ProbeObserver for Counting {
    fn on_round_trip(&mut self, completed: usize, _server_ns: u64, _client_ns: u64) {
        self.round_trips = completed;
    }

    fn on_finish(&mut self, _completed: usize) {
        self.finished = true;
    }
}

#[test]
fn test_memory_run_records_both_meters() -> Result<()> {
    let (server, client) = memory(MemoryTransport::new());
    let mut driver = BenchmarkDriver::new(settings(multi(false)), server, client)?;

    let mut observer = Counting::default();
    let report = driver.run_observed(5, &mut observer)?;

    assert!(report.outcome.is_complete());
    assert_eq!(report.requested, 5);
    assert_eq!(report.completed, 5);
    assert_eq!(report.histogram.count(), 10);
    assert_eq!(report.histogram.snapshot().total(), 10);
    assert_eq!(report.client.probes_sent, 6);
    assert_eq!(report.server.probes_received, 6);
    assert_eq!(report.server.probes_sent, 6);
    assert!(report.client_failure.is_none() && report.server_failure.is_none());
    assert_eq!(observer.round_trips, 5);
    assert!(observer.finished);
    assert_eq!(driver.state(), DriverState::TornDown);
    assert_eq!(driver.open_channels(), 0);
    Ok(())
}

#[test]
fn test_tcp_run_over_loopback() -> Result<()> {
    let (server, client) = same(TcpTransport::new);
    let mut driver = BenchmarkDriver::new(settings(StreamMode::Single), server, client)?;

    let report = driver.run(20)?;

    assert!(report.outcome.is_complete());
    assert_eq!(report.completed, 20);
    assert_eq!(report.histogram.count(), 40);
    Ok(())
}

#[test]
fn test_multistream_run_over_loopback() -> Result<()> {
    let (server, client) = same(MultiStreamTransport::new);
    let mut driver = BenchmarkDriver::new(settings(multi(false)), server, client)?;

    let addr = driver.setup()?;
    assert_ne!(addr.port(), 0);
    let report = driver.execute(25)?;
    driver.tear_down();

    assert!(report.outcome.is_complete());
    assert_eq!(report.histogram.count(), 50);
    assert_eq!(driver.open_channels(), 0);
    Ok(())
}

#[test]
fn test_fragmented_probes_reassembled() -> Result<()> {
    let build = || MultiStreamTransport::new().with_fragment_size(3);
    let (server, client) = same(build);
    let mut driver = BenchmarkDriver::new(settings(multi(true)), server, client)?;

    let report = driver.run(10)?;

    assert!(report.outcome.is_complete());
    assert_eq!(report.histogram.count(), 20);
    Ok(())
}

#[test]
fn test_fragments_without_reassembly_abort_run() -> Result<()> {
    let transport = MemoryTransport::new().with_fragment_size(3);
    let (server, client) = memory(transport);
    let mut driver = BenchmarkDriver::new(settings(multi(false)), server, client)?;

    let report = driver.run(5)?;

    assert!(report.is_partial());
    assert_eq!(report.completed, 0);
    assert_eq!(report.histogram.count(), 0);
    let failure = report.server_failure.expect("server should record the violation");
    assert!(failure.contains("FragmentReassembler"), "{}", failure);
    assert_eq!(driver.open_channels(), 0);
    Ok(())
}

#[test]
fn test_cancelled_third_probe_returns_partial_histogram() -> Result<()> {
    let cancel: Arc<OnceLock<CancelToken>> = Arc::new(OnceLock::new());
    let sent = Arc::new(AtomicUsize::new(0));

    let transport = {
        let cancel = Arc::clone(&cancel);
        let sent = Arc::clone(&sent);
        MemoryTransport::new().with_loss(move |direction, _msg| {
            if direction != Direction::ClientToServer {
                return false;
            }
            if sent.fetch_add(1, Ordering::SeqCst) + 1 != 3 {
                return false;
            }
            // the third probe never arrives and its wait is cancelled
            if let Some(token) = cancel.get() {
                token.cancel();
            }
            true
        })
    };
    let (server, client) = memory(transport);
    let mut driver = BenchmarkDriver::new(settings(multi(false)), server, client)?;
    let _ = cancel.set(driver.cancel_handle());

    driver.setup()?;
    let report = driver.execute(5)?;

    assert!(matches!(
        report.outcome,
        ProbeOutcome::Interrupted(WaitError::Cancelled)
    ));
    assert_eq!(report.completed, 2);
    let observations = report.histogram.count();
    assert!((4..10).contains(&observations), "{} observations", observations);

    driver.tear_down();
    assert_eq!(driver.state(), DriverState::TornDown);
    assert_eq!(driver.open_channels(), 0);
    assert_eq!(report.histogram.count(), observations);
    Ok(())
}

#[test]
fn test_lost_probe_times_out() -> Result<()> {
    let transport = MemoryTransport::new()
        .with_loss(|direction, _msg| direction == Direction::ServerToClient);
    let (server, client) = memory(transport);
    let mut config = settings(multi(false));
    config.probe_timeout = Some(Duration::from_millis(50));
    let mut driver = BenchmarkDriver::new(config, server, client)?;

    let report = driver.run(3)?;

    assert!(matches!(
        report.outcome,
        ProbeOutcome::Interrupted(WaitError::TimedOut(_))
    ));
    assert_eq!(report.completed, 0);
    // the server still saw the first probe
    assert_eq!(report.histogram.count(), 1);
    Ok(())
}

#[test]
fn test_connect_failure_aborts_setup() -> Result<()> {
    // separate in-memory address spaces: the client can never reach the server
    let server = transport_factory(|| Ok(Arc::new(MemoryTransport::new()) as Arc<dyn Transport>));
    let client = transport_factory(|| Ok(Arc::new(MemoryTransport::new()) as Arc<dyn Transport>));
    let mut driver = BenchmarkDriver::new(settings(multi(false)), server, client)?;

    let err = driver.run(5).unwrap_err();

    assert!(matches!(err, BenchError::Connection { op: "connect to", .. }));
    assert_eq!(driver.state(), DriverState::TornDown);
    assert_eq!(driver.histogram().count(), 0);
    Ok(())
}

#[test]
fn test_transport_factory_failure_aborts_setup() -> Result<()> {
    let server = transport_factory(|| Err(BenchError::Config("no transport".into())));
    let (_, client) = memory(MemoryTransport::new());
    let mut driver = BenchmarkDriver::new(settings(StreamMode::Single), server, client)?;

    assert!(matches!(driver.setup(), Err(BenchError::Config(_))));
    assert_eq!(driver.state(), DriverState::Init);
    Ok(())
}

#[test]
fn test_tear_down_is_idempotent() -> Result<()> {
    let (server, client) = same(TcpTransport::new);
    let mut driver = BenchmarkDriver::new(settings(StreamMode::Single), server, client)?;

    driver.setup()?;
    assert_eq!(driver.open_channels(), 2);

    driver.tear_down();
    driver.tear_down();
    assert_eq!(driver.open_channels(), 0);
    assert_eq!(driver.histogram().count(), 0);
    assert!(driver.execute(1).is_err());
    Ok(())
}

#[test]
fn test_drop_tears_down_running_driver() -> Result<()> {
    let (server, client) = same(MultiStreamTransport::new);
    let mut driver = BenchmarkDriver::new(settings(multi(true)), server, client)?;
    driver.setup()?;
    driver.execute(3)?;
    drop(driver);
    Ok(())
}
