//! Frame encoding and decoding.
//!
//! Wire format:
//! ```text
//! +--------+---------+---------+------------+------------+-----------+------------+
//! | Marker | Address | Control | Length     | Header CS  | Payload   | Payload CS |
//! | 0x14   | 1 byte  | 1 byte  | 2 (LE16)   | 2 (LE16)   | n bytes   | 2 (LE16)   |
//! +--------+---------+---------+------------+------------+-----------+------------+
//! ```
//!
//! `Length` counts the payload plus its checksum and is zero for frames
//! without payload, in which case the trailer is absent.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::checksum;
use crate::core::constants::*;

/// Sequence number range, fixed per link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceModulus {
    /// Sequence numbers 0..=3.
    #[default]
    Four,
    /// Sequence numbers 0..=7.
    Eight,
}

impl SequenceModulus {
    /// Number of distinct sequence numbers.
    pub fn value(self) -> u8 {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Sequence number following `seq`.
    pub fn next(self, seq: u8) -> u8 {
        (seq + 1) % self.value()
    }

    /// Forward distance from `from` to `to`.
    pub fn distance(self, from: u8, to: u8) -> u8 {
        (to + self.value() - from) % self.value()
    }

    /// Largest usable transmit window.
    pub fn max_window(self) -> u8 {
        self.value() - 1
    }

    /// Check that a decoded sub-field fits this range.
    pub fn contains(self, seq: u8) -> bool {
        seq < self.value()
    }
}

/// Frame type, the top-level classification of a control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Numbered data frame.
    Information,
    /// Acknowledgment or reject.
    Supervisory,
    /// Unnumbered control or best-effort data.
    Unnumbered,
}

/// Supervisory frame function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SupervisoryFunction {
    /// Acknowledge up to `ack`.
    Ack = 0,
    /// Reject, with a reason byte as payload.
    Reject = 1,
}

impl SupervisoryFunction {
    /// Parse from the 2-bit function field.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Ack),
            1 => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Unnumbered frame sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnnumberedKind {
    /// Best-effort data.
    Information = 0x00,
    /// Poll or final, answered by the endpoint's poll handler.
    PollFinal = 0x04,
    /// Acknowledges a control request such as a sequence reset.
    Acknowledge = 0x0E,
    /// Reset `seq` and `ack` to zero.
    ResetSequence = 0x31,
}

impl UnnumberedKind {
    /// Parse from the 6-bit type selector.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x00 => Some(Self::Information),
            0x04 => Some(Self::PollFinal),
            0x0E => Some(Self::Acknowledge),
            0x31 => Some(Self::ResetSequence),
            _ => None,
        }
    }
}

/// Reason carried in a reject frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    /// Payload checksum did not match.
    ChecksumMismatch = 1,
    /// Frame arrived out of sequence.
    SequenceMismatch = 2,
    /// Receiver had no room for the payload.
    OutOfMemory = 3,
    /// Security failure on the receiving side.
    SecurityIssue = 4,
    /// No open endpoint at that address.
    UnreachableEndpoint = 5,
    /// Any other failure.
    Error = 6,
}

impl RejectReason {
    /// Parse a reason byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::ChecksumMismatch),
            2 => Some(Self::SequenceMismatch),
            3 => Some(Self::OutOfMemory),
            4 => Some(Self::SecurityIssue),
            5 => Some(Self::UnreachableEndpoint),
            6 => Some(Self::Error),
            _ => None,
        }
    }

    /// Parse the payload of a reject frame.
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() != REJECT_PAYLOAD_SIZE {
            return Err(FrameError::RejectPayloadLength(payload.len()));
        }
        Self::from_byte(payload[0]).ok_or(FrameError::UnknownRejectReason(payload[0]))
    }

    /// Byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Decoded control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Information frame.
    Information {
        /// Send sequence number.
        seq: u8,
        /// Next sequence number expected from the peer.
        ack: u8,
        /// Poll/final bit.
        poll_final: bool,
    },
    /// Supervisory frame.
    Supervisory {
        /// Function selector.
        function: SupervisoryFunction,
        /// Next sequence number expected from the peer.
        ack: u8,
    },
    /// Unnumbered frame.
    Unnumbered {
        /// Sub-type.
        kind: UnnumberedKind,
    },
}

impl Control {
    /// Information frame control.
    pub fn information(seq: u8, ack: u8, poll_final: bool) -> Self {
        Self::Information {
            seq,
            ack,
            poll_final,
        }
    }

    /// Acknowledgment control.
    pub fn ack(ack: u8) -> Self {
        Self::Supervisory {
            function: SupervisoryFunction::Ack,
            ack,
        }
    }

    /// Reject control.
    pub fn reject(ack: u8) -> Self {
        Self::Supervisory {
            function: SupervisoryFunction::Reject,
            ack,
        }
    }

    /// Unnumbered control.
    pub fn unnumbered(kind: UnnumberedKind) -> Self {
        Self::Unnumbered { kind }
    }

    /// Frame type.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Information { .. } => FrameKind::Information,
            Self::Supervisory { .. } => FrameKind::Supervisory,
            Self::Unnumbered { .. } => FrameKind::Unnumbered,
        }
    }

    /// Piggy-backed acknowledgment, for frame types that carry one.
    pub fn ack_number(&self) -> Option<u8> {
        match *self {
            Self::Information { ack, .. } | Self::Supervisory { ack, .. } => Some(ack),
            Self::Unnumbered { .. } => None,
        }
    }

    /// Check that `seq` and `ack` fit the link's sequence range.
    ///
    /// The fields are three bits wide, so a peer on a modulus-4 link can
    /// still send 4..=7.
    pub fn check_range(&self, modulus: SequenceModulus) -> Result<(), FrameError> {
        let seq = match *self {
            Self::Information { seq, .. } => Some(seq),
            _ => None,
        };
        match seq.into_iter().chain(self.ack_number()).find(|n| !modulus.contains(*n)) {
            Some(out_of_range) => Err(FrameError::SequenceOutOfRange(out_of_range)),
            None => Ok(()),
        }
    }

    /// Replace the acknowledgment number, if the frame type carries one.
    pub fn with_ack(self, new_ack: u8) -> Self {
        match self {
            Self::Information {
                seq, poll_final, ..
            } => Self::Information {
                seq,
                ack: new_ack,
                poll_final,
            },
            Self::Supervisory { function, .. } => Self::Supervisory {
                function,
                ack: new_ack,
            },
            unnumbered => unnumbered,
        }
    }

    /// Encode to the wire byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Information {
                seq,
                ack,
                poll_final,
            } => {
                ((seq & CONTROL_SEQ_MASK) << CONTROL_SEQ_SHIFT)
                    | ((poll_final as u8) << CONTROL_POLL_FINAL_SHIFT)
                    | (ack & CONTROL_SEQ_MASK)
            }
            Self::Supervisory { function, ack } => {
                CONTROL_TYPE_SUPERVISORY
                    | ((function as u8 & CONTROL_FUNCTION_MASK) << CONTROL_FUNCTION_SHIFT)
                    | (ack & CONTROL_SEQ_MASK)
            }
            Self::Unnumbered { kind } => CONTROL_TYPE_UNNUMBERED | (kind as u8),
        }
    }

    /// Decode a wire byte.
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        if byte & CONTROL_IFRAME_MASK == 0 {
            return Ok(Self::Information {
                seq: (byte >> CONTROL_SEQ_SHIFT) & CONTROL_SEQ_MASK,
                ack: byte & CONTROL_SEQ_MASK,
                poll_final: (byte >> CONTROL_POLL_FINAL_SHIFT) & 1 == 1,
            });
        }

        if byte & CONTROL_TYPE_MASK == CONTROL_TYPE_SUPERVISORY {
            let bits = (byte >> CONTROL_FUNCTION_SHIFT) & CONTROL_FUNCTION_MASK;
            let function = SupervisoryFunction::from_bits(bits)
                .ok_or(FrameError::UnknownSupervisoryFunction(bits))?;
            return Ok(Self::Supervisory {
                function,
                ack: byte & CONTROL_SEQ_MASK,
            });
        }

        let bits = byte & CONTROL_UNNUMBERED_MASK;
        let kind = UnnumberedKind::from_bits(bits).ok_or(FrameError::UnknownUnnumberedType(bits))?;
        Ok(Self::Unnumbered { kind })
    }
}

/// Frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Endpoint id.
    pub address: u8,
    /// Control byte.
    pub control: Control,
    /// Payload length plus trailer, zero without payload.
    pub length: u16,
}

impl Header {
    /// Header for a frame carrying `payload_len` bytes.
    pub fn new(address: u8, control: Control, payload_len: usize) -> Result<Self, FrameError> {
        let length = if payload_len == 0 {
            0
        } else if payload_len > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge(payload_len));
        } else {
            (payload_len + PAYLOAD_CHECKSUM_SIZE) as u16
        };

        Ok(Self {
            address,
            control,
            length,
        })
    }

    /// Serialize, including the header checksum.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = START_MARKER;
        buf[1] = self.address;
        buf[2] = self.control.to_byte();
        buf[3..5].copy_from_slice(&self.length.to_le_bytes());
        let hcs = checksum::checksum(&buf[..HEADER_CHECKSUM_COVERAGE]);
        buf[5..7].copy_from_slice(&hcs.to_le_bytes());
        buf
    }

    /// Parse a header.
    ///
    /// With `validate` false the marker and checksum are trusted, as when
    /// the driver pre-validates headers.
    pub fn from_bytes(bytes: &[u8], validate: bool) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        if validate {
            if bytes[0] != START_MARKER {
                return Err(FrameError::InvalidStartMarker(bytes[0]));
            }
            let hcs = u16::from_le_bytes([bytes[5], bytes[6]]);
            if !checksum::verify(&bytes[..HEADER_CHECKSUM_COVERAGE], hcs) {
                return Err(FrameError::HeaderChecksumMismatch);
            }
        }

        Ok(Self {
            address: bytes[1],
            control: Control::from_byte(bytes[2])?,
            length: u16::from_le_bytes([bytes[3], bytes[4]]),
        })
    }
}

/// Encode a complete frame: header, payload and payload checksum.
pub fn encode_frame(header: &Header, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + header.length as usize);
    buf.put_slice(&header.to_bytes());
    if !payload.is_empty() {
        buf.put_slice(payload);
        buf.put_u16_le(checksum::checksum(payload));
    }
    buf.freeze()
}

/// A frame as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Parsed header, `length` clamped to the bytes actually received.
    pub header: Header,
    /// Payload without trailer.
    pub payload: Bytes,
    /// Received payload checksum, if the frame carries a payload.
    pub payload_checksum: Option<u16>,
}

impl DecodedFrame {
    /// Check the payload checksum. Frames without payload always pass.
    pub fn verify_payload(&self) -> Result<(), FrameError> {
        match self.payload_checksum {
            Some(fcs) if !checksum::verify(&self.payload, fcs) => {
                Err(FrameError::PayloadChecksumMismatch)
            }
            _ => Ok(()),
        }
    }
}

/// Decode a received frame.
pub fn decode_frame(data: &Bytes, validate_header: bool) -> Result<DecodedFrame, FrameError> {
    let mut header = Header::from_bytes(data, validate_header)?;

    let available = data.len() - HEADER_SIZE;
    let length = (header.length as usize).min(available);
    header.length = length as u16;

    if length == 0 {
        return Ok(DecodedFrame {
            header,
            payload: Bytes::new(),
            payload_checksum: None,
        });
    }

    if length <= PAYLOAD_CHECKSUM_SIZE {
        return Err(FrameError::TooShort {
            expected: HEADER_SIZE + PAYLOAD_CHECKSUM_SIZE + 1,
            actual: HEADER_SIZE + length,
        });
    }

    let payload_end = HEADER_SIZE + length - PAYLOAD_CHECKSUM_SIZE;
    let fcs = u16::from_le_bytes([data[payload_end], data[payload_end + 1]]);

    Ok(DecodedFrame {
        header,
        payload: data.slice(HEADER_SIZE..payload_end),
        payload_checksum: Some(fcs),
    })
}

/// Errors that can occur during frame parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is too short.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// First byte is not the start marker.
    #[error("invalid start marker: 0x{0:02x}")]
    InvalidStartMarker(u8),

    /// Header checksum mismatch.
    #[error("header checksum mismatch")]
    HeaderChecksumMismatch,

    /// Payload checksum mismatch.
    #[error("payload checksum mismatch")]
    PayloadChecksumMismatch,

    /// Supervisory function outside the known set.
    #[error("unknown supervisory function: {0}")]
    UnknownSupervisoryFunction(u8),

    /// Unnumbered type outside the known set.
    #[error("unknown unnumbered type: 0x{0:02x}")]
    UnknownUnnumberedType(u8),

    /// Reject reason outside the known set.
    #[error("unknown reject reason: 0x{0:02x}")]
    UnknownRejectReason(u8),

    /// Reject payload is not exactly one reason byte.
    #[error("reject payload of {0} bytes")]
    RejectPayloadLength(usize),

    /// Sequence or acknowledgment number beyond the link's modulus.
    #[error("sequence number {0} out of range")]
    SequenceOutOfRange(u8),

    /// Payload does not fit the length field.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

impl FrameError {
    /// Check if the header failed validation, as opposed to a well-formed
    /// header describing a frame this link cannot use.
    pub fn is_header_error(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidStartMarker(_) | FrameError::HeaderChecksumMismatch
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_information_layout() {
        let control = Control::information(1, 2, false);
        assert_eq!(control.to_byte(), 0x12);

        let control = Control::information(7, 5, true);
        assert_eq!(control.to_byte(), 0x7D);
        assert_eq!(Control::from_byte(0x7D).unwrap(), control);
    }

    #[test]
    fn test_control_supervisory_layout() {
        assert_eq!(Control::ack(3).to_byte(), 0x83);
        assert_eq!(Control::reject(1).to_byte(), 0x91);
        assert_eq!(Control::from_byte(0x91).unwrap(), Control::reject(1));

        assert_eq!(
            Control::from_byte(0xA0),
            Err(FrameError::UnknownSupervisoryFunction(2))
        );
    }

    #[test]
    fn test_control_unnumbered_layout() {
        for kind in [
            UnnumberedKind::Information,
            UnnumberedKind::PollFinal,
            UnnumberedKind::Acknowledge,
            UnnumberedKind::ResetSequence,
        ] {
            let byte = Control::unnumbered(kind).to_byte();
            assert_eq!(byte & CONTROL_TYPE_MASK, CONTROL_TYPE_UNNUMBERED);
            assert_eq!(Control::from_byte(byte).unwrap().kind(), FrameKind::Unnumbered);
        }

        assert_eq!(
            Control::from_byte(0xC1),
            Err(FrameError::UnknownUnnumberedType(0x01))
        );
    }

    #[test]
    fn test_control_with_ack() {
        let control = Control::information(2, 0, true).with_ack(3);
        assert_eq!(control, Control::information(2, 3, true));
        assert_eq!(control.ack_number(), Some(3));

        let control = Control::unnumbered(UnnumberedKind::Information).with_ack(3);
        assert_eq!(control.ack_number(), None);
    }

    #[test]
    fn test_header_wire_bytes() {
        let header = Header::new(5, Control::information(1, 2, false), 2).unwrap();
        let bytes = header.to_bytes();

        assert_eq!(hex::encode(&bytes[..5]), "1405120400");
        let hcs = checksum::checksum(&bytes[..5]);
        assert_eq!(&bytes[5..], &hcs.to_le_bytes());
    }

    #[test]
    fn test_header_without_payload_has_zero_length() {
        let header = Header::new(0, Control::ack(1), 0).unwrap();
        assert_eq!(header.length, 0);
    }

    #[test]
    fn test_encode_decode_frame() {
        let header = Header::new(9, Control::information(3, 1, false), 3).unwrap();
        let frame = encode_frame(&header, b"abc");
        assert_eq!(frame.len(), HEADER_SIZE + 3 + PAYLOAD_CHECKSUM_SIZE);

        let decoded = decode_frame(&frame, true).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(&decoded.payload[..], b"abc");
        assert!(decoded.verify_payload().is_ok());
    }

    #[test]
    fn test_decode_rejects_bad_marker() {
        let header = Header::new(1, Control::ack(0), 0).unwrap();
        let mut bytes = header.to_bytes().to_vec();
        bytes[0] = 0x7E;

        let data = Bytes::from(bytes);
        assert_eq!(
            decode_frame(&data, true),
            Err(FrameError::InvalidStartMarker(0x7E))
        );
        // A pre-validating driver already checked it
        assert!(decode_frame(&data, false).is_ok());
    }

    #[test]
    fn test_decode_rejects_bad_header_checksum() {
        let header = Header::new(1, Control::ack(0), 0).unwrap();
        let mut bytes = header.to_bytes().to_vec();
        bytes[6] ^= 0xFF;

        assert_eq!(
            decode_frame(&Bytes::from(bytes), true),
            Err(FrameError::HeaderChecksumMismatch)
        );
    }

    #[test]
    fn test_decode_clamps_length() {
        let header = Header::new(4, Control::information(0, 0, false), 8).unwrap();
        let frame = encode_frame(&header, b"12345678");
        let truncated = frame.slice(..HEADER_SIZE + 5);

        let decoded = decode_frame(&truncated, true).unwrap();
        assert_eq!(decoded.header.length, 5);
        assert_eq!(&decoded.payload[..], b"123");
        assert_eq!(
            decoded.verify_payload(),
            Err(FrameError::PayloadChecksumMismatch)
        );
    }

    #[test]
    fn test_decode_too_short() {
        let data = Bytes::from_static(&[START_MARKER, 0, 0]);
        assert!(matches!(
            decode_frame(&data, true),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_payload_too_large() {
        assert_eq!(
            Header::new(1, Control::ack(0), MAX_PAYLOAD_SIZE + 1),
            Err(FrameError::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1))
        );
    }

    #[test]
    fn test_sequence_modulus() {
        let m = SequenceModulus::Four;
        assert_eq!(m.next(3), 0);
        assert_eq!(m.distance(3, 1), 2);
        assert_eq!(m.max_window(), 3);
        assert!(!m.contains(4));

        let m = SequenceModulus::Eight;
        assert_eq!(m.next(7), 0);
        assert_eq!(m.distance(6, 1), 3);
        assert!(m.contains(7));
    }

    #[test]
    fn test_reject_reason_roundtrip() {
        for byte in 1..=6 {
            let reason = RejectReason::from_byte(byte).unwrap();
            assert_eq!(reason.as_byte(), byte);
        }
        assert_eq!(RejectReason::from_byte(0), None);
        assert_eq!(RejectReason::from_byte(7), None);
    }

    #[test]
    fn test_reject_payload_parse() {
        assert_eq!(
            RejectReason::from_payload(&[3]),
            Ok(RejectReason::OutOfMemory)
        );
        assert_eq!(
            RejectReason::from_payload(&[0x42]),
            Err(FrameError::UnknownRejectReason(0x42))
        );
        assert_eq!(
            RejectReason::from_payload(&[]),
            Err(FrameError::RejectPayloadLength(0))
        );
        assert_eq!(
            RejectReason::from_payload(&[1, 1]),
            Err(FrameError::RejectPayloadLength(2))
        );
    }

    #[test]
    fn test_control_range_check() {
        let four = SequenceModulus::Four;
        assert_eq!(Control::information(3, 2, false).check_range(four), Ok(()));
        assert_eq!(
            Control::information(5, 0, false).check_range(four),
            Err(FrameError::SequenceOutOfRange(5))
        );
        assert_eq!(
            Control::ack(6).check_range(four),
            Err(FrameError::SequenceOutOfRange(6))
        );
        assert_eq!(Control::ack(6).check_range(SequenceModulus::Eight), Ok(()));
        assert_eq!(
            Control::unnumbered(UnnumberedKind::Information).check_range(four),
            Ok(())
        );
    }

    #[test]
    fn test_header_error_classification() {
        assert!(FrameError::HeaderChecksumMismatch.is_header_error());
        assert!(FrameError::InvalidStartMarker(0).is_header_error());
        assert!(!FrameError::SequenceOutOfRange(4).is_header_error());
        assert!(!FrameError::PayloadChecksumMismatch.is_header_error());
    }
}
