//! Collaborator traits for copro-link.
//!
//! The engine owns protocol state only. Byte transport, time, buffer
//! accounting and the system-endpoint control plane are supplied by the
//! host through these traits.

use bytes::Bytes;

use super::error::{DriverError, PoolError};
use crate::hdlc::RejectReason;
use crate::transport::FrameId;

/// Monotonic time in timer-service ticks.
pub type Tick = u64;

/// Driver capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverCapabilities {
    /// The driver validates the start marker and header checksum itself.
    pub preprocess_header: bool,
}

/// One frame pulled from the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    /// Header plus whatever payload bytes arrived.
    pub data: Bytes,
    /// Reject the driver already decided on (e.g. no room to store it).
    pub reject: Option<RejectReason>,
}

impl RxFrame {
    /// Wrap raw bytes with no pending reject.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            reject: None,
        }
    }
}

/// How a driver took ownership of a transmitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxCompletion {
    /// The bytes were consumed synchronously; the frame is released now.
    Done,
    /// The driver keeps the frame until it reports
    /// [`Link::on_transmit_complete`](crate::Link::on_transmit_complete).
    Deferred,
}

/// Byte-level physical driver (UART/SPI class).
pub trait Driver {
    /// Capability flags, read once per decoded frame.
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities::default()
    }

    /// Pull one received frame, if any.
    fn read_data(&mut self) -> Option<RxFrame>;

    /// Check whether the driver can accept a frame now.
    fn is_transmit_ready(&self) -> bool;

    /// Hand a fully encoded frame to the driver.
    fn transmit_data(&mut self, frame: FrameId, bytes: Bytes) -> Result<TxCompletion, DriverError>;

    /// Check whether the driver is critically short of receive buffers.
    fn is_out_of_rx_buffers(&self) -> bool {
        false
    }
}

/// Which per-endpoint timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Retransmission of the oldest unacknowledged data frame.
    ReTransmit,
    /// Bounded wait for the peer to confirm a close.
    Close,
}

/// Identifies one timer owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    /// Owning endpoint.
    pub endpoint: u8,
    /// Timer purpose.
    pub kind: TimerKind,
}

impl TimerId {
    /// Retransmit timer of an endpoint.
    pub fn re_transmit(endpoint: u8) -> Self {
        Self {
            endpoint,
            kind: TimerKind::ReTransmit,
        }
    }

    /// Close timer of an endpoint.
    pub fn close(endpoint: u8) -> Self {
        Self {
            endpoint,
            kind: TimerKind::Close,
        }
    }
}

/// One-shot timer service.
///
/// Expiry is delivered back through
/// [`Link::on_timer_expired`](crate::Link::on_timer_expired).
pub trait TimerService {
    /// Current tick count.
    fn now(&self) -> Tick;

    /// Convert milliseconds into ticks.
    fn ms_to_ticks(&self, ms: u64) -> Tick {
        ms
    }

    /// Arm (or re-arm) a timer to fire `ticks` from now.
    fn restart(&mut self, timer: TimerId, ticks: Tick);

    /// Disarm a timer. Stopping an idle timer is a no-op.
    fn stop(&mut self, timer: TimerId);
}

/// Kinds of pooled resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Frame buffer (header + payload handle).
    FrameBuffer,
    /// Transmit-queue item for data and unnumbered frames.
    DataItem,
    /// Transmit-queue item for supervisory and control frames.
    SupervisoryItem,
    /// Entry of an endpoint receive queue.
    RxEntry,
}

/// Fixed-capacity resource pool.
pub trait Pool {
    /// Take one entry of `kind`.
    fn acquire(&mut self, kind: PoolKind) -> Result<(), PoolError>;

    /// Return one entry of `kind`.
    fn release(&mut self, kind: PoolKind);
}

/// System-endpoint control plane hooks.
pub trait ControlPlane {
    /// Tell the peer that a non-system endpoint is going away.
    fn notify_disconnect(&mut self, endpoint: u8) -> Result<(), DriverError>;
}
