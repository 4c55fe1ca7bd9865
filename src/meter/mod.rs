//! Client and server latency meters and the plumbing they share
//!
//! A meter sits at one end of an association behind a [`Pipeline`]. Both
//! record round trips into the run's shared histogram as probes arrive and
//! hand the same observation to the probe loop through a [`Rendezvous`], so
//! only one probe is ever in flight.

pub mod client;
pub mod counters;
pub mod pipeline;
pub mod rendezvous;
pub mod server;

pub use client::{LatencyClientMeter, NullObserver, ProbeObserver, ProbeOutcome, ProbeReport};
pub use counters::{MeterCounters, MeterStats};
pub use pipeline::{Outbound, Pipeline, ProbeHandler, StreamMode};
pub use rendezvous::{CancelToken, Rendezvous, WaitError};
pub use server::LatencyServerMeter;

use crate::clock::Clock;
use crate::error::{BenchError, Result};
use crate::histogram::Histogram;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a meter hands to the probe loop for each delivered probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Latency(u64),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MeterState {
    Disconnected = 0,
    Active = 1,
    Draining = 2,
    Closed = 3,
}

impl MeterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => MeterState::Disconnected,
            1 => MeterState::Active,
            2 => MeterState::Draining,
            _ => MeterState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MeterState::Disconnected => "disconnected",
            MeterState::Active => "active",
            MeterState::Draining => "draining",
            MeterState::Closed => "closed",
        }
    }
}

impl fmt::Display for MeterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-wide resources a meter is built from
#[derive(Clone)]
pub struct MeterContext {
    pub histogram: Arc<Histogram>,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancelToken,
    /// Associations currently bound to a meter, across both roles
    pub open_channels: Arc<AtomicUsize>,
}

/// State and plumbing common to both meter roles
pub(crate) struct MeterCore {
    role: &'static str,
    state: AtomicU8,
    outbound: Mutex<Option<Outbound>>,
    failure: OnceLock<BenchError>,
    counters: MeterCounters,
    observations: Rendezvous<Observation>,
    activated_tx: Sender<()>,
    activated_rx: Receiver<()>,
    ctx: MeterContext,
}

impl MeterCore {
    pub(crate) fn new(role: &'static str, ctx: MeterContext) -> Self {
        let (activated_tx, activated_rx) = channel::bounded(1);
        Self {
            role,
            state: AtomicU8::new(MeterState::Disconnected as u8),
            outbound: Mutex::new(None),
            failure: OnceLock::new(),
            counters: MeterCounters::new(),
            observations: Rendezvous::new(),
            activated_tx,
            activated_rx,
            ctx,
        }
    }

    pub(crate) fn state(&self) -> MeterState {
        MeterState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; false if the meter was somewhere else
    pub(crate) fn transition(&self, from: MeterState, to: MeterState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn activate(&self, outbound: Outbound) {
        // state, outbound and the shared count change together under this lock
        let mut slot = self.outbound.lock();
        if !self.transition(MeterState::Disconnected, MeterState::Active) {
            drop(slot);
            warn!(
                role = self.role,
                state = %self.state(),
                "Meter already bound, refusing extra association"
            );
            outbound.close();
            return;
        }
        *slot = Some(outbound);
        self.ctx.open_channels.fetch_add(1, Ordering::AcqRel);
        drop(slot);

        let _ = self.activated_tx.try_send(());
        info!(role = self.role, "Meter active");
    }

    pub(crate) fn await_active(&self, timeout: Duration) -> bool {
        self.state() != MeterState::Disconnected || self.activated_rx.recv_timeout(timeout).is_ok()
    }

    pub(crate) fn outbound(&self) -> Result<Outbound> {
        self.outbound
            .lock()
            .clone()
            .ok_or_else(|| BenchError::InvalidState {
                expected: "active",
                found: self.state().as_str(),
            })
    }

    pub(crate) fn histogram(&self) -> &Histogram {
        &self.ctx.histogram
    }

    pub(crate) fn now(&self) -> u64 {
        self.ctx.clock.now_nanos()
    }

    pub(crate) fn counters(&self) -> &MeterCounters {
        &self.counters
    }

    /// Block the delivering worker until the probe loop takes `observation`
    pub(crate) fn publish(&self, observation: Observation) -> bool {
        match self.observations.put(observation, &self.ctx.cancel) {
            Ok(()) => true,
            Err(e) => {
                debug!(role = self.role, error = %e, "Observation not delivered");
                false
            }
        }
    }

    pub(crate) fn next_observation(
        &self,
        timeout: Option<Duration>,
    ) -> std::result::Result<Observation, WaitError> {
        self.observations.take(&self.ctx.cancel, timeout)
    }

    /// Keep the first failure only, then close this end and wake the probe loop
    pub(crate) fn fail(&self, error: BenchError) {
        self.counters.increment_error();
        let message = error.to_string();
        match self.failure.set(error) {
            Ok(()) => {
                warn!(role = self.role, error = %message, "Meter failed, closing association");
                self.ctx.cancel.cancel();
                self.close();
            }
            Err(_) => debug!(role = self.role, error = %message, "Ignoring subsequent failure"),
        }
    }

    pub(crate) fn failure(&self) -> Option<&BenchError> {
        self.failure.get()
    }

    pub(crate) fn channel_inactive(&self) {
        if self.state() != MeterState::Closed {
            debug!(role = self.role, "Association went inactive");
            self.ctx.cancel.cancel();
        }
        self.close();
    }

    /// Idempotent: only the first call releases the channel and the shared count
    pub(crate) fn close(&self) {
        let outbound = {
            let mut slot = self.outbound.lock();
            let previous =
                MeterState::from_u8(self.state.swap(MeterState::Closed as u8, Ordering::AcqRel));
            if previous == MeterState::Closed {
                return;
            }
            if previous != MeterState::Disconnected {
                self.ctx.open_channels.fetch_sub(1, Ordering::AcqRel);
            }
            debug!(role = self.role, previous = %previous, "Meter closed");
            slot.take()
        };
        if let Some(outbound) = outbound {
            outbound.close();
        }
    }
}
