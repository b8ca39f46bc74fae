//! Endpoint state, capability flags, callbacks and counters.

use std::collections::VecDeque;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use bytes::Bytes;

use super::handle::HandleShared;
use crate::core::constants::SYSTEM_ENDPOINT_ID;
use crate::core::{LinkError, Tick};
use crate::hdlc::{FrameKind, UnnumberedKind};
use crate::transport::{FrameId, RtoBounds, RtoEstimator};

/// Endpoint lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointState {
    /// Data transfer active.
    Open,
    /// Close requested, waiting for in-flight frames and the peer.
    Closing,
    /// Closed, storage release pending.
    Closed,
    /// Storage released.
    Freed,
    /// The peer endpoint is gone.
    ErrorDestinationUnreachable,
    /// The peer reported a security failure.
    ErrorSecurityIncident,
    /// Protocol failure (sequence mismatch or generic peer error).
    ErrorFault,
}

impl EndpointState {
    /// Check if this is one of the error states.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::ErrorDestinationUnreachable | Self::ErrorSecurityIncident | Self::ErrorFault
        )
    }
}

/// Endpoint capability flags, fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointFlags(u8);

impl EndpointFlags {
    /// Defaults: information frames only.
    pub const NONE: Self = Self(0);
    /// Accept and send unnumbered frames.
    pub const UFRAME_ENABLE: Self = Self(0x01);
    /// Refuse unnumbered information frames while keeping other sub-types.
    pub const UFRAME_INFORMATION_DISABLE: Self = Self(0x02);
    /// Refuse information frames.
    pub const IFRAME_DISABLE: Self = Self(0x04);

    /// Create flags from raw bits.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Check if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if unnumbered frames are enabled.
    pub fn uframe_enabled(self) -> bool {
        self.contains(Self::UFRAME_ENABLE)
    }

    /// Check if unnumbered information frames are accepted.
    pub fn uframe_information_enabled(self) -> bool {
        self.uframe_enabled() && !self.contains(Self::UFRAME_INFORMATION_DISABLE)
    }

    /// Check if information frames are accepted.
    pub fn iframe_enabled(self) -> bool {
        !self.contains(Self::IFRAME_DISABLE)
    }
}

impl BitOr for EndpointFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags selecting the frame a write produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteFlags(u8);

impl WriteFlags {
    /// Plain information frame.
    pub const NONE: Self = Self(0);
    /// Information frame with the poll/final bit set.
    pub const INFORMATION_POLL_FINAL: Self = Self(0x01);
    /// Unnumbered information frame.
    pub const UNNUMBERED_INFORMATION: Self = Self(0x02);
    /// Unnumbered poll/final frame.
    pub const UNNUMBERED_POLL_FINAL: Self = Self(0x04);
    /// Unnumbered acknowledge frame.
    pub const UNNUMBERED_ACKNOWLEDGE: Self = Self(0x08);
    /// Unnumbered sequence reset request.
    pub const UNNUMBERED_RESET_SEQUENCE: Self = Self(0x10);

    const UNNUMBERED_MASK: u8 = 0x1E;

    /// Create flags from raw bits.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Check if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Requested unnumbered sub-type; `Ok(None)` for an information frame.
    ///
    /// Fails when more than one frame kind is selected.
    pub fn unnumbered_kind(self) -> Result<Option<UnnumberedKind>, LinkError> {
        let unnumbered = self.0 & Self::UNNUMBERED_MASK;
        if unnumbered == 0 {
            return Ok(None);
        }
        if unnumbered.count_ones() > 1 || self.contains(Self::INFORMATION_POLL_FINAL) {
            return Err(LinkError::InvalidParameter);
        }
        Ok(Some(match unnumbered {
            0x02 => UnnumberedKind::Information,
            0x04 => UnnumberedKind::PollFinal,
            0x08 => UnnumberedKind::Acknowledge,
            _ => UnnumberedKind::ResetSequence,
        }))
    }
}

impl BitOr for WriteFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Called with the endpoint id when data is queued for reading.
pub type ReceiveCallback = Box<dyn FnMut(u8) + Send>;

/// Called when a written frame is done with: `Ok` once delivered,
/// `Err(TransmitIncomplete)` when dropped by teardown or error cleanup.
pub type WriteCompletedCallback = Box<dyn FnMut(u8, Bytes, Result<(), LinkError>) + Send>;

/// Called once when the endpoint enters an error state.
pub type ErrorCallback = Box<dyn FnMut(u8, EndpointState) + Send>;

/// Answers a poll with an optional final reply.
pub type PollFinalCallback = Box<dyn FnMut(u8, &[u8]) -> Option<Bytes> + Send>;

/// Option installed with [`Link::set_option`](crate::Link::set_option).
pub enum EndpointOption {
    /// Information data queued.
    OnIframeReceive(ReceiveCallback),
    /// Unnumbered data queued.
    OnUframeReceive(ReceiveCallback),
    /// Information write finished.
    OnIframeWriteCompleted(WriteCompletedCallback),
    /// Unnumbered write finished.
    OnUframeWriteCompleted(WriteCompletedCallback),
    /// Endpoint failed.
    OnError(ErrorCallback),
    /// Poll received, reply produced.
    OnPollFinal(PollFinalCallback),
}

impl fmt::Debug for EndpointOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OnIframeReceive(_) => "OnIframeReceive",
            Self::OnUframeReceive(_) => "OnUframeReceive",
            Self::OnIframeWriteCompleted(_) => "OnIframeWriteCompleted",
            Self::OnUframeWriteCompleted(_) => "OnUframeWriteCompleted",
            Self::OnError(_) => "OnError",
            Self::OnPollFinal(_) => "OnPollFinal",
        };
        f.write_str(name)
    }
}

/// Callback slots. Unset slots are skipped.
#[derive(Default)]
pub struct EndpointCallbacks {
    on_iframe_receive: Option<ReceiveCallback>,
    on_uframe_receive: Option<ReceiveCallback>,
    on_iframe_write_completed: Option<WriteCompletedCallback>,
    on_uframe_write_completed: Option<WriteCompletedCallback>,
    on_error: Option<ErrorCallback>,
    on_poll_final: Option<PollFinalCallback>,
}

impl EndpointCallbacks {
    /// Install one callback.
    pub fn set(&mut self, option: EndpointOption) {
        match option {
            EndpointOption::OnIframeReceive(cb) => self.on_iframe_receive = Some(cb),
            EndpointOption::OnUframeReceive(cb) => self.on_uframe_receive = Some(cb),
            EndpointOption::OnIframeWriteCompleted(cb) => self.on_iframe_write_completed = Some(cb),
            EndpointOption::OnUframeWriteCompleted(cb) => self.on_uframe_write_completed = Some(cb),
            EndpointOption::OnError(cb) => self.on_error = Some(cb),
            EndpointOption::OnPollFinal(cb) => self.on_poll_final = Some(cb),
        }
    }

    pub(crate) fn data_received(&mut self, endpoint: u8, kind: FrameKind) {
        let slot = match kind {
            FrameKind::Unnumbered => &mut self.on_uframe_receive,
            _ => &mut self.on_iframe_receive,
        };
        if let Some(cb) = slot.as_mut() {
            cb(endpoint);
        }
    }

    pub(crate) fn write_completed(
        &mut self,
        endpoint: u8,
        kind: FrameKind,
        payload: Bytes,
        status: Result<(), LinkError>,
    ) {
        let slot = match kind {
            FrameKind::Unnumbered => &mut self.on_uframe_write_completed,
            _ => &mut self.on_iframe_write_completed,
        };
        if let Some(cb) = slot.as_mut() {
            cb(endpoint, payload, status);
        }
    }

    pub(crate) fn error(&mut self, endpoint: u8, state: EndpointState) {
        if let Some(cb) = self.on_error.as_mut() {
            cb(endpoint, state);
        }
    }

    pub(crate) fn has_poll_final(&self) -> bool {
        self.on_poll_final.is_some()
    }

    pub(crate) fn poll_final(&mut self, endpoint: u8, payload: &[u8]) -> Option<Bytes> {
        self.on_poll_final.as_mut().and_then(|cb| cb(endpoint, payload))
    }
}

impl fmt::Debug for EndpointCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointCallbacks")
            .field("on_iframe_receive", &self.on_iframe_receive.is_some())
            .field("on_uframe_receive", &self.on_uframe_receive.is_some())
            .field("on_iframe_write_completed", &self.on_iframe_write_completed.is_some())
            .field("on_uframe_write_completed", &self.on_uframe_write_completed.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_poll_final", &self.on_poll_final.is_some())
            .finish()
    }
}

/// Per-endpoint frame statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndpointCounters {
    /// Information frames handed to the driver, retransmissions included.
    pub iframe_sent: u32,
    /// Information frames accepted in sequence.
    pub iframe_received: u32,
    /// Supervisory frames handed to the driver.
    pub sframe_sent: u32,
    /// Supervisory frames received.
    pub sframe_received: u32,
    /// Unnumbered frames handed to the driver.
    pub uframe_sent: u32,
    /// Unnumbered frames received.
    pub uframe_received: u32,
    /// Frames resubmitted by timeout or reject.
    pub re_transmits: u32,
    /// Reject frames sent.
    pub reject_sent: u32,
    /// Reject frames received.
    pub reject_received: u32,
    /// Duplicate information frames answered with a fresh ack.
    pub duplicates: u32,
    /// Frames dropped without response.
    pub dropped: u32,
    /// Acknowledgments outside the outstanding range.
    pub ignored_acks: u32,
}

/// One logical channel multiplexed over the link.
#[derive(Debug)]
pub struct Endpoint {
    pub(crate) id: u8,
    pub(crate) state: EndpointState,
    pub(crate) flags: EndpointFlags,
    pub(crate) seq: u8,
    pub(crate) ack: u8,
    pub(crate) configured_tx_window_size: u8,
    pub(crate) current_tx_window_space: u8,
    pub(crate) frames_count_re_transmit_queue: u8,
    pub(crate) packet_re_transmit_count: u8,
    pub(crate) rto: RtoEstimator,
    pub(crate) last_iframe_sent_timestamp: Tick,
    pub(crate) iframe_receive_queue: VecDeque<Bytes>,
    pub(crate) uframe_receive_queue: VecDeque<Bytes>,
    pub(crate) re_transmit_queue: VecDeque<FrameId>,
    pub(crate) holding_list: VecDeque<FrameId>,
    pub(crate) callbacks: EndpointCallbacks,
    pub(crate) counters: EndpointCounters,
    pub(crate) handle: Arc<HandleShared>,
}

impl Endpoint {
    /// Create an open endpoint with empty queues.
    pub(crate) fn new(
        id: u8,
        flags: EndpointFlags,
        tx_window_size: u8,
        rto: RtoBounds,
        handle: Arc<HandleShared>,
    ) -> Self {
        Self {
            id,
            state: EndpointState::Open,
            flags,
            seq: 0,
            ack: 0,
            configured_tx_window_size: tx_window_size,
            current_tx_window_space: tx_window_size,
            frames_count_re_transmit_queue: 0,
            packet_re_transmit_count: 0,
            rto: RtoEstimator::new(rto),
            last_iframe_sent_timestamp: 0,
            iframe_receive_queue: VecDeque::new(),
            uframe_receive_queue: VecDeque::new(),
            re_transmit_queue: VecDeque::new(),
            holding_list: VecDeque::new(),
            callbacks: EndpointCallbacks::default(),
            counters: EndpointCounters::default(),
            handle,
        }
    }

    /// Endpoint id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Lifecycle state.
    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// Capability flags.
    pub fn flags(&self) -> EndpointFlags {
        self.flags
    }

    /// Next sequence number to send.
    pub fn seq(&self) -> u8 {
        self.seq
    }

    /// Next sequence number expected from the peer.
    pub fn ack(&self) -> u8 {
        self.ack
    }

    /// Configured transmit window.
    pub fn configured_tx_window_size(&self) -> u8 {
        self.configured_tx_window_size
    }

    /// Remaining transmit-window credit.
    pub fn current_tx_window_space(&self) -> u8 {
        self.current_tx_window_space
    }

    /// Sent, unacknowledged data frames.
    pub fn frames_count_re_transmit_queue(&self) -> u8 {
        self.frames_count_re_transmit_queue
    }

    /// Retries since the last accepted acknowledgment.
    pub fn packet_re_transmit_count(&self) -> u8 {
        self.packet_re_transmit_count
    }

    /// Frames waiting for window credit.
    pub fn holding_len(&self) -> usize {
        self.holding_list.len()
    }

    /// RTO estimator state.
    pub fn rto(&self) -> &RtoEstimator {
        &self.rto
    }

    /// Frame statistics.
    pub fn counters(&self) -> EndpointCounters {
        self.counters
    }

    /// Check if this is the system endpoint.
    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_ENDPOINT_ID
    }

    pub(crate) fn restore_window(&mut self) {
        debug_assert!(self.current_tx_window_space < self.configured_tx_window_size);
        self.current_tx_window_space =
            (self.current_tx_window_space + 1).min(self.configured_tx_window_size);
    }

    pub(crate) fn reset_sequence(&mut self) {
        self.seq = 0;
        self.ack = 0;
    }
}
