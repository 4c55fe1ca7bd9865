//! Benchmark orchestration: bind, connect, probe, tear down

use crate::clock::{Clock, MonotonicClock};
use crate::constants::ACTIVATION_TIMEOUT_MS;
use crate::error::{BenchError, Result};
use crate::histogram::Histogram;
use crate::meter::{
    CancelToken, LatencyClientMeter, LatencyServerMeter, MeterContext, MeterStats, NullObserver,
    Pipeline, ProbeObserver, ProbeOutcome, StreamMode,
};
use crate::transport::{Endpoint, Transport};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything a run needs besides its transports
#[derive(Debug, Clone)]
pub struct BenchSettings {
    pub bucket_bounds: Vec<u64>,
    pub stream_mode: StreamMode,
    pub bind_addr: SocketAddr,
    /// Upper bound on each correlated wait; `None` waits until cancelled
    pub probe_timeout: Option<Duration>,
}

/// Builds one side's transport at setup time
pub type TransportFactory = Box<dyn Fn() -> Result<Arc<dyn Transport>> + Send + Sync>;

pub fn transport_factory<F>(build: F) -> TransportFactory
where
    F: Fn() -> Result<Arc<dyn Transport>> + Send + Sync + 'static,
{
    Box::new(build)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    Bound,
    Running,
    TornDown,
}

impl DriverState {
    fn as_str(&self) -> &'static str {
        match self {
            DriverState::Init => "init",
            DriverState::Bound => "bound",
            DriverState::Running => "running",
            DriverState::TornDown => "torn down",
        }
    }
}

/// Result of one `execute`
#[derive(Debug)]
pub struct RunReport {
    pub histogram: Arc<Histogram>,
    pub requested: usize,
    pub completed: usize,
    pub outcome: ProbeOutcome,
    pub elapsed: Duration,
    pub client: MeterStats,
    pub server: MeterStats,
    pub client_failure: Option<String>,
    pub server_failure: Option<String>,
}

impl RunReport {
    pub fn is_partial(&self) -> bool {
        !self.outcome.is_complete()
    }
}

struct Wiring {
    client: Arc<LatencyClientMeter>,
    server: Arc<LatencyServerMeter>,
    client_endpoint: Box<dyn Endpoint>,
    server_endpoint: Box<dyn Endpoint>,
}

/// Owns one benchmark run: its histogram, meters, endpoints and cancellation.
///
/// Teardown runs on every exit path; dropping the driver tears it down too.
pub struct BenchmarkDriver {
    settings: BenchSettings,
    server_factory: TransportFactory,
    client_factory: TransportFactory,
    state: DriverState,
    histogram: Arc<Histogram>,
    cancel: CancelToken,
    open_channels: Arc<AtomicUsize>,
    wiring: Option<Wiring>,
}

impl BenchmarkDriver {
    pub fn new(
        settings: BenchSettings,
        server_factory: TransportFactory,
        client_factory: TransportFactory,
    ) -> Result<Self> {
        let histogram = Arc::new(Histogram::new(settings.bucket_bounds.clone())?);
        Ok(Self {
            settings,
            server_factory,
            client_factory,
            state: DriverState::Init,
            histogram,
            cancel: CancelToken::new(),
            open_channels: Arc::new(AtomicUsize::new(0)),
            wiring: None,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn histogram(&self) -> &Arc<Histogram> {
        &self.histogram
    }

    /// Token that aborts the probe loop when cancelled from another thread
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Associations still bound to a meter
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::Acquire)
    }

    fn expect_state(&self, expected: DriverState) -> Result<()> {
        if self.state != expected {
            return Err(BenchError::InvalidState {
                expected: expected.as_str(),
                found: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// Bind the server meter, connect the client meter to it and wait until
    /// both ends are active. Returns the server's bound address.
    pub fn setup(&mut self) -> Result<SocketAddr> {
        self.expect_state(DriverState::Init)?;

        let server_transport = (self.server_factory)()?;
        let client_transport = (self.client_factory)()?;
        let mode = self.settings.stream_mode;
        if mode.is_multi() {
            for transport in [&server_transport, &client_transport] {
                if !transport.supports_streams() {
                    return Err(BenchError::Config(format!(
                        "transport '{}' cannot carry stream addressing",
                        transport.name()
                    )));
                }
            }
        }

        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let ctx = MeterContext {
            histogram: Arc::clone(&self.histogram),
            clock,
            cancel: self.cancel.clone(),
            open_channels: Arc::clone(&self.open_channels),
        };
        let server = Arc::new(LatencyServerMeter::new(ctx.clone()));
        let client = Arc::new(LatencyClientMeter::new(ctx));

        let mut server_endpoint = server_transport.bind(
            self.settings.bind_addr,
            Arc::new(Pipeline::new(Arc::clone(&server), mode)),
        )?;
        let addr = server_endpoint.local_addr();
        debug!(transport = server_transport.name(), address = %addr, "Server bound");

        let mut client_endpoint = match client_transport
            .connect(addr, Arc::new(Pipeline::new(Arc::clone(&client), mode)))
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(error = %e, "Connect failed, closing server");
                server.close();
                server_endpoint.close();
                return Err(e);
            }
        };

        let activation = Duration::from_millis(ACTIVATION_TIMEOUT_MS);
        if !client.await_active(activation) || !server.await_active(activation) {
            error!(address = %addr, "Association never became active");
            self.cancel.cancel();
            client.close();
            server.close();
            client_endpoint.close();
            server_endpoint.close();
            return Err(BenchError::connection(
                "activate association with",
                addr,
                io::Error::new(io::ErrorKind::TimedOut, "no channel-active event"),
            ));
        }

        self.wiring = Some(Wiring {
            client,
            server,
            client_endpoint,
            server_endpoint,
        });
        self.state = DriverState::Bound;
        info!(
            transport = client_transport.name(),
            address = %addr,
            multi_stream = mode.is_multi(),
            "Benchmark set up"
        );
        Ok(addr)
    }

    pub fn execute(&mut self, count: usize) -> Result<RunReport> {
        self.execute_observed(count, &mut NullObserver)
    }

    /// Run `count` probes; a cancelled or timed out wait yields a partial report
    pub fn execute_observed(
        &mut self,
        count: usize,
        observer: &mut dyn ProbeObserver,
    ) -> Result<RunReport> {
        self.expect_state(DriverState::Bound)?;
        self.state = DriverState::Running;
        let wiring = self.wiring.as_ref().ok_or(BenchError::InvalidState {
            expected: "wired meters",
            found: "none",
        })?;

        let started = Instant::now();
        let probes = wiring.client.run_probes(
            &wiring.server,
            count,
            self.settings.probe_timeout,
            observer,
        )?;
        let elapsed = started.elapsed();

        let report = RunReport {
            histogram: Arc::clone(&self.histogram),
            requested: count,
            completed: probes.completed,
            outcome: probes.outcome,
            elapsed,
            client: wiring.client.stats(),
            server: wiring.server.stats(),
            client_failure: wiring.client.failure().map(ToString::to_string),
            server_failure: wiring.server.failure().map(ToString::to_string),
        };
        if report.is_partial() {
            warn!(
                requested = count,
                completed = report.completed,
                "Run ended early"
            );
        }
        info!(
            completed = report.completed,
            observations = self.histogram.count(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Benchmark executed"
        );
        Ok(report)
    }

    /// Release meters, endpoints and their workers; safe to call any number of times
    pub fn tear_down(&mut self) {
        if self.state == DriverState::TornDown {
            return;
        }
        // unblock any worker parked on a rendezvous before joining it
        self.cancel.cancel();

        if let Some(mut wiring) = self.wiring.take() {
            wiring.client.close();
            wiring.server.close();
            wiring.client_endpoint.close();
            wiring.server_endpoint.close();
        }
        self.state = DriverState::TornDown;
        info!("Benchmark torn down");
    }

    /// Setup, execute and tear down, tearing down whatever happened
    pub fn run(&mut self, count: usize) -> Result<RunReport> {
        self.run_observed(count, &mut NullObserver)
    }

    pub fn run_observed(
        &mut self,
        count: usize,
        observer: &mut dyn ProbeObserver,
    ) -> Result<RunReport> {
        let result = self
            .setup()
            .and_then(|_| self.execute_observed(count, observer));
        self.tear_down();
        result
    }
}

impl Drop for BenchmarkDriver {
    fn drop(&mut self) {
        self.tear_down();
    }
}
