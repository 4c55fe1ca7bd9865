//! Zero-capacity handoff between a transport worker and the probe loop

use crossbeam::channel::{self, select, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why a blocking handoff gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("wait cancelled")]
    Cancelled,

    #[error("no observation within {0:?}")]
    TimedOut(Duration),

    #[error("rendezvous disconnected")]
    Disconnected,
}

struct CancelInner {
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

/// Run-wide cancellation signal.
///
/// Cancelling drops the only sender, which disconnects the signal receiver and
/// so wakes every `select!` waiting on it at once. Cancellation is permanent.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.trigger.lock().is_none()
    }

    /// Receiver that becomes ready (disconnected) once the token is cancelled
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Single-slot synchronous handoff: `put` blocks until a `take` accepts the value
pub struct Rendezvous<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self { tx, rx }
    }

    pub fn put(&self, value: T, cancel: &CancelToken) -> Result<(), WaitError> {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        select! {
            send(self.tx, value) -> sent => sent.map_err(|_| WaitError::Disconnected),
            recv(cancel.signal()) -> _ => Err(WaitError::Cancelled),
        }
    }

    /// Wait for the next value; `None` waits until a value or cancellation arrives
    pub fn take(&self, cancel: &CancelToken, timeout: Option<Duration>) -> Result<T, WaitError> {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        match timeout {
            Some(timeout) => select! {
                recv(self.rx) -> value => value.map_err(|_| WaitError::Disconnected),
                recv(cancel.signal()) -> _ => Err(WaitError::Cancelled),
                default(timeout) => Err(WaitError::TimedOut(timeout)),
            },
            None => select! {
                recv(self.rx) -> value => value.map_err(|_| WaitError::Disconnected),
                recv(cancel.signal()) -> _ => Err(WaitError::Cancelled),
            },
        }
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}
