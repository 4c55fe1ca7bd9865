use crate::error::{BenchError, Result};
use crate::meter::{
    LatencyServerMeter, MeterContext, MeterCore, MeterState, MeterStats, Observation, Outbound,
    ProbeHandler, WaitError,
};
use crate::protocol::Probe;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callbacks from the probe loop, for progress display
pub trait ProbeObserver {
    fn on_round_trip(&mut self, completed: usize, server_ns: u64, client_ns: u64);

    fn on_finish(&mut self, _completed: usize) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProbeObserver for NullObserver {
    fn on_round_trip(&mut self, _completed: usize, _server_ns: u64, _client_ns: u64) {}
}

/// How the probe loop ended
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Every probe and the terminal exchange completed
    Completed,
    /// A correlated wait was cancelled or timed out; results are partial
    Interrupted(WaitError),
    /// The transport refused a probe; results are partial
    SendFailed(BenchError),
}

impl ProbeOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, ProbeOutcome::Completed)
    }
}

#[derive(Debug)]
pub struct ProbeReport {
    /// Round trips whose server and client observations were both collected
    pub completed: usize,
    pub outcome: ProbeOutcome,
}

/// Probing side of the harness, bound to the client end of the association
pub struct LatencyClientMeter {
    core: MeterCore,
}

impl LatencyClientMeter {
    pub fn new(ctx: MeterContext) -> Self {
        Self {
            core: MeterCore::new("client", ctx),
        }
    }

    pub fn state(&self) -> MeterState {
        self.core.state()
    }

    pub fn stats(&self) -> MeterStats {
        self.core.counters().snapshot()
    }

    pub fn failure(&self) -> Option<&BenchError> {
        self.core.failure()
    }

    pub fn await_active(&self, timeout: Duration) -> bool {
        self.core.await_active(timeout)
    }

    pub fn close(&self) {
        self.core.close();
    }

    /// Send `count` probes one at a time, waiting for the server's and then the
    /// client's observation of each before sending the next, then run the
    /// terminal exchange.
    ///
    /// An interrupted wait or a refused send ends the loop early with whatever
    /// was collected; only a meter that never became active is an error.
    pub fn run_probes(
        &self,
        server: &LatencyServerMeter,
        count: usize,
        timeout: Option<Duration>,
        observer: &mut dyn ProbeObserver,
    ) -> Result<ProbeReport> {
        let outbound = self.core.outbound()?;
        info!(count, "Starting probe loop");

        let mut completed = 0;
        for _ in 0..count {
            if let Err(e) = self.send(&outbound, Probe::timestamp(self.core.now())) {
                return Ok(Self::send_failed(completed, e));
            }

            let server_ns = match Self::latency(server.core(), timeout)? {
                Ok(ns) => ns,
                Err(e) => return Ok(Self::interrupted(completed, e)),
            };
            let client_ns = match Self::latency(&self.core, timeout)? {
                Ok(ns) => ns,
                Err(e) => return Ok(Self::interrupted(completed, e)),
            };

            completed += 1;
            debug!(completed, server_ns, client_ns, "Round trip complete");
            observer.on_round_trip(completed, server_ns, client_ns);
        }

        if !self.core.transition(MeterState::Active, MeterState::Draining) {
            // the association went away after the last round trip
            debug!(state = %self.core.state(), "Skipping terminal exchange");
            return Ok(Self::interrupted(completed, WaitError::Disconnected));
        }
        if let Err(e) = self.send(&outbound, Probe::LastPing) {
            return Ok(Self::send_failed(completed, e));
        }
        for core in [server.core(), &self.core] {
            if let Err(e) = Self::finished(core, timeout) {
                return Ok(Self::interrupted(completed, e));
            }
        }

        observer.on_finish(completed);
        info!(completed, "Probe loop finished");
        Ok(ProbeReport {
            completed,
            outcome: ProbeOutcome::Completed,
        })
    }

    fn send(&self, outbound: &Outbound, probe: Probe) -> Result<()> {
        outbound.write(probe)?;
        self.core.counters().increment_sent();
        Ok(())
    }

    /// Outer error: the peer broke the exchange order. Inner error: the wait gave up.
    fn latency(
        core: &MeterCore,
        timeout: Option<Duration>,
    ) -> Result<std::result::Result<u64, WaitError>> {
        match core.next_observation(timeout) {
            Ok(Observation::Latency(ns)) => Ok(Ok(ns)),
            Ok(Observation::Finished) => Err(BenchError::InvalidState {
                expected: "latency observation",
                found: "finished",
            }),
            Err(e) => Ok(Err(e)),
        }
    }

    fn finished(core: &MeterCore, timeout: Option<Duration>) -> std::result::Result<(), WaitError> {
        loop {
            match core.next_observation(timeout)? {
                Observation::Finished => return Ok(()),
                Observation::Latency(ns) => debug!(ns, "Late observation while draining"),
            }
        }
    }

    fn interrupted(completed: usize, error: WaitError) -> ProbeReport {
        warn!(completed, error = %error, "Latency test aborted, returning partial results");
        ProbeReport {
            completed,
            outcome: ProbeOutcome::Interrupted(error),
        }
    }

    fn send_failed(completed: usize, error: BenchError) -> ProbeReport {
        warn!(completed, error = %error, "Probe send failed, returning partial results");
        ProbeReport {
            completed,
            outcome: ProbeOutcome::SendFailed(error),
        }
    }
}

impl ProbeHandler for LatencyClientMeter {
    fn channel_active(&self, outbound: Outbound) {
        self.core.activate(outbound);
    }

    fn probe_received(&self, probe: Probe) {
        let state = self.core.state();
        match (state, probe) {
            (MeterState::Active, Probe::Timestamp(sent_at)) => {
                self.core.counters().increment_received();
                let latency = self.core.now().saturating_sub(sent_at);
                self.core.histogram().add_observation(latency);
                self.core.publish(Observation::Latency(latency));
            }
            (MeterState::Draining, Probe::LastPing) => {
                self.core.counters().increment_received();
                debug!("Terminal probe echoed back");
                self.core.publish(Observation::Finished);
            }
            (state, probe) => {
                debug!(state = %state, ?probe, "Client meter ignoring probe");
            }
        }
    }

    fn exception_caught(&self, error: BenchError) {
        self.core.fail(error);
    }

    fn channel_inactive(&self) {
        self.core.channel_inactive();
    }
}
