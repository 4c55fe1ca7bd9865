use crate::error::BenchError;
use crate::meter::{MeterContext, MeterCore, MeterState, MeterStats, Observation, Outbound, ProbeHandler};
use crate::protocol::Probe;
use std::time::Duration;
use tracing::{debug, info};

/// Echo side of the harness.
///
/// Each timestamp received is timed against the shared clock, recorded and
/// echoed with a fresh timestamp; the terminal probe is echoed once and then
/// the meter goes quiet.
pub struct LatencyServerMeter {
    core: MeterCore,
}

impl LatencyServerMeter {
    pub fn new(ctx: MeterContext) -> Self {
        Self {
            core: MeterCore::new("server", ctx),
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

    pub(crate) fn core(&self) -> &MeterCore {
        &self.core
    }

    fn echo(&self, outbound: &Outbound, probe: Probe) {
        match outbound.write(probe) {
            Ok(()) => self.core.counters().increment_sent(),
            Err(e) => self.core.fail(e),
        }
    }
}

impl ProbeHandler for LatencyServerMeter {
    fn channel_active(&self, outbound: Outbound) {
        self.core.activate(outbound);
    }

    fn probe_received(&self, probe: Probe) {
        if self.core.state() != MeterState::Active {
            debug!(state = %self.core.state(), "Server meter not accepting probes");
            return;
        }
        self.core.counters().increment_received();

        let outbound = match self.core.outbound() {
            Ok(outbound) => outbound,
            Err(e) => return self.core.fail(e),
        };

        match probe {
            Probe::Timestamp(sent_at) => {
                let latency = self.core.now().saturating_sub(sent_at);
                self.core.histogram().add_observation(latency);
                if !self.core.publish(Observation::Latency(latency)) {
                    return;
                }
                self.echo(&outbound, Probe::timestamp(self.core.now()));
            }
            Probe::LastPing => {
                info!("Terminal probe received, draining");
                self.echo(&outbound, Probe::LastPing);
                if self.core.transition(MeterState::Active, MeterState::Draining) {
                    self.core.publish(Observation::Finished);
                } else {
                    debug!(state = %self.core.state(), "Meter left active state while draining");
                }
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
