use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Held for the duration of one cycle; releases the flag on drop, including
/// when the cycle future is cancelled mid-step.
pub struct InflightGuard {
    flag: Arc<AtomicBool>,
}

impl InflightGuard {
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Requests an immediate tick from outside the loop.
#[derive(Clone)]
pub struct CycleTrigger {
    tx: mpsc::Sender<()>,
    inflight: Arc<AtomicBool>,
}

impl CycleTrigger {
    pub(crate) fn new(tx: mpsc::Sender<()>, inflight: Arc<AtomicBool>) -> Self {
        Self { tx, inflight }
    }

    /// `false` when the request was coalesced into a running or already-queued cycle.
    pub fn request(&self) -> bool {
        if self.inflight.load(Ordering::Acquire) {
            return false;
        }
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Closed(())) => false,
        }
    }

    pub fn is_cycle_running(&self) -> bool {
        self.inflight.load(Ordering::Acquire)
    }
}
