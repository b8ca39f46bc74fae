//! In-memory driver.
//!
//! A [`MemoryDriver`] either stands alone, with received frames injected by
//! hand, or is one end of a back-to-back [`pair`](MemoryDriver::pair)
//! where every transmitted frame lands in the other end's receive queue.
//! Each driver comes with a [`DriverControl`] used to steer and observe
//! it from outside the engine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::trace;

use crate::core::{Driver, DriverCapabilities, DriverError, RxFrame, TxCompletion};
use crate::transport::{FrameId, WorkSignals};

#[derive(Debug)]
struct DriverState {
    inbox: VecDeque<RxFrame>,
    sent: Vec<Bytes>,
    in_flight: Vec<FrameId>,
    ready: bool,
    defer_completion: bool,
    busy_transmits: usize,
    lost_transmits: usize,
    out_of_rx_buffers: bool,
    capabilities: DriverCapabilities,
    signals: Option<WorkSignals>,
}

impl Default for DriverState {
    fn default() -> Self {
        Self {
            inbox: VecDeque::new(),
            sent: Vec::new(),
            in_flight: Vec::new(),
            ready: true,
            defer_completion: false,
            busy_transmits: 0,
            lost_transmits: 0,
            out_of_rx_buffers: false,
            capabilities: DriverCapabilities::default(),
            signals: None,
        }
    }
}

type Shared = Arc<Mutex<DriverState>>;

fn lock(state: &Shared) -> MutexGuard<'_, DriverState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deliver(state: &Shared, frame: RxFrame) {
    let signals = {
        let mut guard = lock(state);
        guard.inbox.push_back(frame);
        guard.signals.clone()
    };
    if let Some(signals) = signals {
        signals.signal_rx();
    }
}

/// Driver backed by in-memory queues.
#[derive(Debug)]
pub struct MemoryDriver {
    local: Shared,
    peer: Option<Shared>,
}

impl MemoryDriver {
    /// Driver whose transmitted frames are only logged.
    pub fn standalone() -> (Self, DriverControl) {
        let local = Shared::default();
        let control = DriverControl {
            state: Arc::clone(&local),
        };
        (Self { local, peer: None }, control)
    }

    /// Two drivers wired back to back.
    pub fn pair() -> ((Self, DriverControl), (Self, DriverControl)) {
        let a = Shared::default();
        let b = Shared::default();
        let left = Self {
            local: Arc::clone(&a),
            peer: Some(Arc::clone(&b)),
        };
        let right = Self {
            local: Arc::clone(&b),
            peer: Some(Arc::clone(&a)),
        };
        (
            (left, DriverControl { state: a }),
            (right, DriverControl { state: b }),
        )
    }
}

impl Driver for MemoryDriver {
    fn capabilities(&self) -> DriverCapabilities {
        lock(&self.local).capabilities
    }

    fn read_data(&mut self) -> Option<RxFrame> {
        lock(&self.local).inbox.pop_front()
    }

    fn is_transmit_ready(&self) -> bool {
        lock(&self.local).ready
    }

    fn transmit_data(&mut self, frame: FrameId, bytes: Bytes) -> Result<TxCompletion, DriverError> {
        let (completion, lost) = {
            let mut state = lock(&self.local);
            if state.busy_transmits > 0 {
                state.busy_transmits -= 1;
                return Err(DriverError::Busy);
            }
            state.sent.push(bytes.clone());

            let lost = state.lost_transmits > 0;
            if lost {
                state.lost_transmits -= 1;
            }

            let completion = if state.defer_completion {
                state.in_flight.push(frame);
                TxCompletion::Deferred
            } else {
                TxCompletion::Done
            };
            (completion, lost)
        };

        trace!(len = bytes.len(), lost, "memory driver transmit");
        if let Some(peer) = self.peer.as_ref().filter(|_| !lost) {
            deliver(peer, RxFrame::new(bytes));
        }
        Ok(completion)
    }

    fn is_out_of_rx_buffers(&self) -> bool {
        lock(&self.local).out_of_rx_buffers
    }
}

/// Remote control of a [`MemoryDriver`].
#[derive(Debug, Clone)]
pub struct DriverControl {
    state: Shared,
}

impl DriverControl {
    /// Raise the engine's receive signal whenever a frame arrives.
    pub fn attach_signals(&self, signals: WorkSignals) {
        lock(&self.state).signals = Some(signals);
    }

    /// Queue raw bytes as if received from the wire.
    pub fn inject(&self, data: impl Into<Bytes>) {
        deliver(&self.state, RxFrame::new(data));
    }

    /// Queue a frame carrying a driver-side reject.
    pub fn inject_frame(&self, frame: RxFrame) {
        deliver(&self.state, frame);
    }

    /// Frames waiting to be read by the engine.
    pub fn pending_rx(&self) -> usize {
        lock(&self.state).inbox.len()
    }

    /// Drain the log of transmitted frames.
    pub fn take_sent(&self) -> Vec<Bytes> {
        std::mem::take(&mut lock(&self.state).sent)
    }

    /// Transmitted frames logged so far.
    pub fn sent_count(&self) -> usize {
        lock(&self.state).sent.len()
    }

    /// Report transmit readiness. Becoming ready wakes the engine.
    pub fn set_ready(&self, ready: bool) {
        let signals = {
            let mut state = lock(&self.state);
            state.ready = ready;
            state.signals.clone()
        };
        if let Some(signals) = signals.filter(|_| ready) {
            signals.wake();
        }
    }

    /// Report receive-buffer exhaustion.
    pub fn set_out_of_rx_buffers(&self, out: bool) {
        lock(&self.state).out_of_rx_buffers = out;
    }

    /// Claim that headers are validated before reaching the engine.
    pub fn set_preprocess_header(&self, enabled: bool) {
        lock(&self.state).capabilities.preprocess_header = enabled;
    }

    /// Keep transmitted frames until [`take_in_flight`](Self::take_in_flight).
    pub fn set_defer_completion(&self, defer: bool) {
        lock(&self.state).defer_completion = defer;
    }

    /// Drain frames whose completion was deferred.
    pub fn take_in_flight(&self) -> Vec<FrameId> {
        std::mem::take(&mut lock(&self.state).in_flight)
    }

    /// Fail the next `count` transmits with [`DriverError::Busy`].
    pub fn fail_next_transmits(&self, count: usize) {
        lock(&self.state).busy_transmits = count;
    }

    /// Accept but never deliver the next `count` transmits.
    pub fn lose_next_transmits(&self, count: usize) {
        lock(&self.state).lost_transmits = count;
    }
}
