//! Reception: decode one frame and dispatch it by type.

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::Link;
use crate::config::PollFinalPolicy;
use crate::core::{Driver, Pool, PoolKind, TimerService};
use crate::endpoint::{Endpoint, EndpointState, WriteFlags};
use crate::hdlc::{
    Control, DecodedFrame, FrameKind, RejectReason, SupervisoryFunction, UnnumberedKind,
    decode_frame,
};
use crate::transport::FrameBuffer;

impl<D: Driver, T: TimerService, P: Pool> Link<D, T, P> {
    /// Pull one frame from the driver and handle it.
    ///
    /// Returns `false` once the driver has nothing left.
    pub(super) fn decode_packet(&mut self) -> bool {
        let Some(rx) = self.driver.read_data() else {
            return false;
        };
        self.counters.frames_received += 1;

        let validate = !self.driver.capabilities().preprocess_header;
        let frame = match decode_frame(&rx.data, validate) {
            Ok(frame) => frame,
            Err(err) => {
                if err.is_header_error() {
                    self.counters.invalid_header_checksum += 1;
                } else {
                    self.counters.malformed += 1;
                }
                debug!(%err, "dropping undecodable frame");
                return true;
            }
        };

        let id = frame.header.address;
        let control = frame.header.control;
        let kind = control.kind();
        trace!(endpoint = id, ?control, len = frame.payload.len(), "frame received");

        if let Err(err) = control.check_range(self.config.modulus) {
            self.counters.malformed += 1;
            debug!(endpoint = id, ?control, %err, "dropping frame");
            return true;
        }

        let Some(endpoint) = self.registry.find(id) else {
            self.counters.unknown_endpoint += 1;
            debug!(endpoint = id, ?kind, "frame for unknown endpoint");
            if kind != FrameKind::Supervisory {
                self.transmit_reject(id, 0, RejectReason::UnreachableEndpoint);
            }
            return true;
        };
        let endpoint_ack = endpoint.ack;

        if let Some(reason) = rx.reject {
            self.transmit_reject(id, endpoint_ack, reason);
            return true;
        }

        if let Some(ack) = control.ack_number() {
            self.receive_ack(id, ack);
        }

        match control {
            Control::Information { .. } if frame.payload.is_empty() => {}
            Control::Information { .. } if self.driver.is_out_of_rx_buffers() => {
                debug!(endpoint = id, "out of receive buffers");
                self.transmit_reject(id, endpoint_ack, RejectReason::OutOfMemory);
            }
            Control::Information {
                seq, poll_final, ..
            } => self.receive_iframe(id, frame, seq, poll_final),
            Control::Supervisory { function, .. } => self.receive_sframe(id, frame, function),
            Control::Unnumbered { kind } => self.receive_uframe(id, frame, kind),
        }
        true
    }

    fn routes_poll_final(&self, endpoint: &Endpoint) -> bool {
        let allowed = match self.config.poll_final_policy {
            PollFinalPolicy::SystemEndpointOnly => endpoint.is_system(),
            PollFinalPolicy::AnyEndpoint => true,
        };
        allowed && endpoint.callbacks.has_poll_final()
    }

    fn receive_iframe(&mut self, id: u8, frame: DecodedFrame, seq: u8, poll_final: bool) {
        let modulus = self.config.modulus;
        let Some(endpoint) = self.registry.find(id) else {
            return;
        };
        match endpoint.state {
            EndpointState::Open => {}
            EndpointState::Closing | EndpointState::Closed => {
                let ack = endpoint.ack;
                self.transmit_reject(id, ack, RejectReason::UnreachableEndpoint);
                return;
            }
            state => {
                debug!(endpoint = id, ?state, "dropping data on failed endpoint");
                self.count_drop(id);
                return;
            }
        }

        if let Err(err) = frame.verify_payload() {
            debug!(endpoint = id, seq, %err, "dropping data frame");
            self.counters.invalid_payload_checksum += 1;
            self.count_drop(id);
            return;
        }

        let ack = endpoint.ack;
        if !endpoint.flags.iframe_enabled() {
            self.transmit_reject(id, ack, RejectReason::Error);
            return;
        }

        if seq != ack {
            if modulus.next(seq) == ack {
                trace!(endpoint = id, seq, "duplicate data frame, re-acknowledging");
                if let Some(endpoint) = self.registry.find_mut(id) {
                    endpoint.counters.duplicates += 1;
                }
                self.transmit_ack(id);
            } else {
                debug!(endpoint = id, seq, expected = ack, "out of sequence");
                self.transmit_reject(id, ack, RejectReason::SequenceMismatch);
            }
            return;
        }

        let to_poll_handler = poll_final && self.routes_poll_final(endpoint);
        if !to_poll_handler && self.pool.acquire(PoolKind::RxEntry).is_err() {
            debug!(endpoint = id, seq, "no receive entry left");
            self.transmit_reject(id, ack, RejectReason::OutOfMemory);
            return;
        }

        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        let reply = if to_poll_handler {
            endpoint.callbacks.poll_final(id, &frame.payload)
        } else {
            endpoint.iframe_receive_queue.push_back(frame.payload);
            endpoint.callbacks.data_received(id, FrameKind::Information);
            None
        };
        endpoint.counters.iframe_received += 1;
        endpoint.ack = modulus.next(endpoint.ack);
        self.transmit_ack(id);

        if let Some(reply) = reply {
            if let Err(err) = self.write_frame(id, reply, WriteFlags::INFORMATION_POLL_FINAL) {
                debug!(endpoint = id, %err, "final reply not sent");
            }
        }
    }

    fn receive_sframe(&mut self, id: u8, frame: DecodedFrame, function: SupervisoryFunction) {
        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        endpoint.counters.sframe_received += 1;
        if function == SupervisoryFunction::Ack {
            return;
        }
        endpoint.counters.reject_received += 1;

        if let Err(err) = frame.verify_payload() {
            debug!(endpoint = id, %err, "dropping reject");
            self.counters.invalid_payload_checksum += 1;
            self.count_drop(id);
            return;
        }
        let reason = match RejectReason::from_payload(&frame.payload) {
            Ok(reason) => reason,
            Err(err) => {
                debug!(endpoint = id, %err, "dropping reject");
                self.count_drop(id);
                return;
            }
        };
        debug!(endpoint = id, ?reason, "reject received");

        match reason {
            RejectReason::ChecksumMismatch => {
                if let Err(err) = self.re_transmit_frame(id) {
                    debug!(endpoint = id, %err, "reject not acted on");
                }
            }
            RejectReason::OutOfMemory => {}
            RejectReason::SequenceMismatch | RejectReason::Error => {
                self.set_endpoint_in_error(id, EndpointState::ErrorFault)
            }
            RejectReason::SecurityIssue => {
                self.set_endpoint_in_error(id, EndpointState::ErrorSecurityIncident)
            }
            RejectReason::UnreachableEndpoint => {
                self.set_endpoint_in_error(id, EndpointState::ErrorDestinationUnreachable)
            }
        }
    }

    fn receive_uframe(&mut self, id: u8, frame: DecodedFrame, kind: UnnumberedKind) {
        if let Err(err) = frame.verify_payload() {
            debug!(endpoint = id, %err, "dropping unnumbered frame");
            self.counters.invalid_payload_checksum += 1;
            self.count_drop(id);
            return;
        }
        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        endpoint.counters.uframe_received += 1;
        if endpoint.state != EndpointState::Open {
            debug!(endpoint = id, ?kind, state = ?endpoint.state, "unnumbered frame on inactive endpoint");
            endpoint.counters.dropped += 1;
            return;
        }
        if !endpoint.flags.uframe_enabled() {
            debug!(endpoint = id, ?kind, "unnumbered frames disabled");
            endpoint.counters.dropped += 1;
            return;
        }

        match kind {
            UnnumberedKind::Information => {
                if !endpoint.flags.uframe_information_enabled() || frame.payload.is_empty() {
                    endpoint.counters.dropped += 1;
                    return;
                }
                if self.pool.acquire(PoolKind::RxEntry).is_err() {
                    debug!(endpoint = id, "no receive entry left for unnumbered data");
                    endpoint.counters.dropped += 1;
                    return;
                }
                endpoint.uframe_receive_queue.push_back(frame.payload);
                endpoint.callbacks.data_received(id, FrameKind::Unnumbered);
            }
            UnnumberedKind::PollFinal => {
                let Some(reply) = endpoint.callbacks.poll_final(id, &frame.payload) else {
                    return;
                };
                if let Err(err) =
                    self.write_frame(id, reply.clone(), WriteFlags::UNNUMBERED_POLL_FINAL)
                {
                    debug!(endpoint = id, %err, "final reply not sent");
                    if let Some(endpoint) = self.registry.find_mut(id) {
                        endpoint.callbacks.write_completed(
                            id,
                            FrameKind::Unnumbered,
                            reply,
                            Err(err),
                        );
                    }
                }
            }
            UnnumberedKind::ResetSequence => {
                if !endpoint.is_system() {
                    debug!(endpoint = id, "sequence reset refused");
                    endpoint.counters.dropped += 1;
                    return;
                }
                endpoint.reset_sequence();
                debug!(endpoint = id, "sequence reset");
                self.push_control_frame(
                    id,
                    Control::unnumbered(UnnumberedKind::Acknowledge),
                    Bytes::new(),
                );
            }
            UnnumberedKind::Acknowledge => {}
        }
    }

    fn count_drop(&mut self, id: u8) {
        if let Some(endpoint) = self.registry.find_mut(id) {
            endpoint.counters.dropped += 1;
        }
    }

    /// Queue an acknowledgment carrying the endpoint's current `ack`.
    pub(super) fn transmit_ack(&mut self, id: u8) {
        let Some(ack) = self.registry.find(id).map(|endpoint| endpoint.ack) else {
            return;
        };
        self.push_control_frame(id, Control::ack(ack), Bytes::new());
    }

    /// Queue a reject with its one-byte reason.
    pub(super) fn transmit_reject(&mut self, id: u8, ack: u8, reason: RejectReason) {
        if let Some(endpoint) = self.registry.find_mut(id) {
            endpoint.counters.reject_sent += 1;
        }
        self.push_control_frame(
            id,
            Control::reject(ack),
            Bytes::copy_from_slice(&[reason.as_byte()]),
        );
    }

    /// Queue a frame that consumes no window credit.
    ///
    /// Pool exhaustion only drops the frame; the peer's retry recovers.
    fn push_control_frame(&mut self, id: u8, control: Control, payload: Bytes) {
        if self.pool.acquire(PoolKind::FrameBuffer).is_err() {
            warn!(endpoint = id, ?control, "no frame buffer for control frame");
            return;
        }
        if self.pool.acquire(PoolKind::SupervisoryItem).is_err() {
            self.pool.release(PoolKind::FrameBuffer);
            warn!(endpoint = id, ?control, "no supervisory item for control frame");
            return;
        }
        let frame = self
            .frames
            .insert(FrameBuffer::supervisory(id, control, payload));
        self.transmit_queue.push_back(frame);
        self.signals.signal_tx();
    }
}
