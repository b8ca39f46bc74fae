//! Protocol constants for the copro-link wire format and endpoint layout.
//!
//! Wire values are fixed by the protocol and MUST NOT be changed. Timing
//! values are defaults; [`LinkConfig`](crate::LinkConfig) overrides them.

use std::time::Duration;

// =============================================================================
// FRAMING
// =============================================================================

/// Start-of-frame marker, first byte of every header.
pub const START_MARKER: u8 = 0x14;

/// Header size: marker + address + control + length (LE16) + checksum (LE16).
pub const HEADER_SIZE: usize = 7;

/// Header bytes covered by the header checksum.
pub const HEADER_CHECKSUM_COVERAGE: usize = 5;

/// Payload checksum size (LE16 trailer after the payload).
pub const PAYLOAD_CHECKSUM_SIZE: usize = 2;

/// Largest payload a single frame carries (length field minus trailer).
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - PAYLOAD_CHECKSUM_SIZE;

/// Size of the reason payload carried by a reject frame.
pub const REJECT_PAYLOAD_SIZE: usize = 1;

// =============================================================================
// CONTROL BYTE
// =============================================================================

/// Bit 7 clear marks an information frame.
pub const CONTROL_IFRAME_MASK: u8 = 0x80;

/// Frame type field (bits 7..6) for supervisory and unnumbered frames.
pub const CONTROL_TYPE_MASK: u8 = 0xC0;

/// Frame type value of a supervisory frame.
pub const CONTROL_TYPE_SUPERVISORY: u8 = 0x80;

/// Frame type value of an unnumbered frame.
pub const CONTROL_TYPE_UNNUMBERED: u8 = 0xC0;

/// Position of the send sequence number in an information frame.
pub const CONTROL_SEQ_SHIFT: u8 = 4;

/// Position of the poll/final bit.
pub const CONTROL_POLL_FINAL_SHIFT: u8 = 3;

/// Position of the supervisory function.
pub const CONTROL_FUNCTION_SHIFT: u8 = 4;

/// Width mask of sequence and acknowledgment sub-fields.
pub const CONTROL_SEQ_MASK: u8 = 0x07;

/// Width mask of the supervisory function.
pub const CONTROL_FUNCTION_MASK: u8 = 0x03;

/// Width mask of the unnumbered type selector.
pub const CONTROL_UNNUMBERED_MASK: u8 = 0x3F;

// =============================================================================
// ENDPOINT IDS
// =============================================================================

/// Reserved id of the system (control-plane) endpoint.
pub const SYSTEM_ENDPOINT_ID: u8 = 0;

/// First service endpoint id.
pub const SERVICE_ENDPOINT_FIRST: u8 = 1;

/// Last service endpoint id.
pub const SERVICE_ENDPOINT_LAST: u8 = 89;

/// First user endpoint id.
pub const USER_ENDPOINT_FIRST: u8 = 90;

/// Number of user endpoints.
pub const USER_ENDPOINT_COUNT: u8 = 10;

/// First dynamically assigned endpoint id.
pub const TEMPORARY_ENDPOINT_FIRST: u8 = 100;

/// Last dynamically assigned endpoint id.
pub const TEMPORARY_ENDPOINT_LAST: u8 = 254;

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// Retransmission timeout before the first RTT sample.
pub const INITIAL_RTO: Duration = Duration::from_millis(100);

/// Lower bound of the retransmission timeout.
pub const MIN_RTO: Duration = Duration::from_millis(50);

/// Upper bound of the retransmission timeout.
pub const MAX_RTO: Duration = Duration::from_millis(5000);

/// Floor applied to the RTT variation.
pub const MIN_RTT_VARIATION: Duration = Duration::from_millis(5);

/// Retransmissions of one frame before the timer gives up.
pub const MAX_RE_TRANSMIT: u8 = 5;

/// Bounded wait for the peer to confirm an endpoint close.
pub const CLOSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default number of endpoints the registry can hold at once.
pub const MAX_ENDPOINTS: usize = 32;

// =============================================================================
// POOLS
// =============================================================================

/// Default frame-buffer pool capacity.
pub const FRAME_BUFFER_POOL_SIZE: usize = 64;

/// Default data/unnumbered transmit-item pool capacity.
pub const DATA_ITEM_POOL_SIZE: usize = 48;

/// Default supervisory transmit-item pool capacity.
pub const SUPERVISORY_ITEM_POOL_SIZE: usize = 16;

/// Default receive-queue entry pool capacity.
pub const RX_ENTRY_POOL_SIZE: usize = 64;
