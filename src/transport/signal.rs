//! Work signals raised by the driver and timer context.
//!
//! Two level-triggered flags, one per direction. Raising a flag that is
//! already set does nothing; the processing loop clears it once the work
//! is drained.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Waker = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SignalState {
    rx: AtomicBool,
    tx: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

/// Snapshot of pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkEvents {
    /// Bytes are waiting in the driver.
    pub rx: bool,
    /// Frames are waiting in the transmit queue.
    pub tx: bool,
}

impl WorkEvents {
    /// Check if either direction has work.
    pub fn any(&self) -> bool {
        self.rx || self.tx
    }
}

/// Shared receive/transmit work flags.
///
/// Cheap to clone; clones observe the same flags. Safe to raise from any
/// thread, including a driver interrupt shim.
#[derive(Clone, Default)]
pub struct WorkSignals {
    inner: Arc<SignalState>,
}

impl WorkSignals {
    /// Create cleared signals.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise "bytes received".
    pub fn signal_rx(&self) {
        if !self.inner.rx.swap(true, Ordering::AcqRel) {
            self.wake();
        }
    }

    /// Raise "transmit opportunity".
    pub fn signal_tx(&self) {
        if !self.inner.tx.swap(true, Ordering::AcqRel) {
            self.wake();
        }
    }

    /// Current flags.
    pub fn pending(&self) -> WorkEvents {
        WorkEvents {
            rx: self.inner.rx.load(Ordering::Acquire),
            tx: self.inner.tx.load(Ordering::Acquire),
        }
    }

    /// Install the hook run whenever a flag goes from clear to raised.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut slot) = self.inner.waker.lock() {
            *slot = Some(Box::new(waker));
        }
    }

    /// Run the waker without touching the flags, e.g. when the driver
    /// becomes ready again while transmit work is already flagged.
    pub fn wake(&self) {
        if let Ok(slot) = self.inner.waker.lock() {
            if let Some(waker) = slot.as_ref() {
                waker();
            }
        }
    }

    pub(crate) fn clear_rx(&self) {
        self.inner.rx.store(false, Ordering::Release);
    }

    pub(crate) fn rearm_rx(&self) {
        self.inner.rx.store(true, Ordering::Release);
    }

    pub(crate) fn clear_tx(&self) {
        self.inner.tx.store(false, Ordering::Release);
    }
}

impl fmt::Debug for WorkSignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkSignals")
            .field("pending", &self.pending())
            .finish()
    }
}
