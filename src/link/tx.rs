//! Transmission scheduling: writes, window credit and the transmit drain.

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::{Link, free_frame};
use crate::core::constants::MAX_PAYLOAD_SIZE;
use crate::core::{
    Driver, DriverError, LinkError, LinkResult, Pool, PoolKind, TimerId, TimerService,
    TxCompletion,
};
use crate::endpoint::{EndpointHandle, EndpointState, WriteFlags};
use crate::hdlc::{Control, FrameKind, Header, UnnumberedKind, encode_frame};
use crate::transport::{FrameBuffer, FrameId};

impl<D: Driver, T: TimerService, P: Pool> Link<D, T, P> {
    /// Queue `data` for transmission on an endpoint.
    ///
    /// `flags` selects the frame: a numbered information frame by default,
    /// or one unnumbered sub-type. Completion is reported through the
    /// endpoint's write-completed callback.
    pub fn write(
        &mut self,
        handle: &EndpointHandle,
        data: impl Into<Bytes>,
        flags: WriteFlags,
    ) -> LinkResult<()> {
        let _guard = handle.enter()?;
        self.endpoint_of(handle)?;
        self.write_frame(handle.id(), data.into(), flags)
    }

    /// Validate, stamp and queue one frame on behalf of endpoint `id`.
    pub(super) fn write_frame(&mut self, id: u8, data: Bytes, flags: WriteFlags) -> LinkResult<()> {
        let unnumbered = flags.unnumbered_kind()?;
        let modulus = self.config.modulus;

        let endpoint = self.registry.find(id).ok_or(LinkError::Ownership)?;
        if endpoint.state != EndpointState::Open {
            return Err(LinkError::InvalidState);
        }
        match unnumbered {
            Some(_) if !endpoint.flags.uframe_enabled() => return Err(LinkError::InvalidParameter),
            None if !endpoint.flags.iframe_enabled() => return Err(LinkError::InvalidParameter),
            _ => {}
        }
        let needs_payload = matches!(
            unnumbered,
            None | Some(UnnumberedKind::Information) | Some(UnnumberedKind::PollFinal)
        );
        if (needs_payload && data.is_empty()) || data.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::InvalidParameter);
        }

        self.pool.acquire(PoolKind::FrameBuffer)?;
        if let Err(err) = self.pool.acquire(PoolKind::DataItem) {
            self.pool.release(PoolKind::FrameBuffer);
            return Err(err.into());
        }

        let endpoint = self.registry.find_mut(id).ok_or(LinkError::Ownership)?;
        let control = match unnumbered {
            Some(kind) => Control::unnumbered(kind),
            None => {
                let seq = endpoint.seq;
                endpoint.seq = modulus.next(seq);
                Control::information(
                    seq,
                    endpoint.ack,
                    flags.contains(WriteFlags::INFORMATION_POLL_FINAL),
                )
            }
        };
        trace!(endpoint = id, ?control, len = data.len(), "write");

        let mut frame = FrameBuffer::data(id, control, data);
        frame.order = self.write_order;
        self.write_order += 1;
        let frame = self.frames.insert(frame);
        self.queue_for_transmission(id, frame);
        Ok(())
    }

    /// Charge window credit and queue, or park the frame on the holding list.
    ///
    /// A frame only skips the holding list when it is empty, so frames
    /// leave an endpoint in write order.
    pub(super) fn queue_for_transmission(&mut self, id: u8, frame: FrameId) {
        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        if endpoint.current_tx_window_space > 0 && endpoint.holding_list.is_empty() {
            endpoint.current_tx_window_space -= 1;
            self.transmit_queue.push_back(frame);
        } else {
            trace!(endpoint = id, "window exhausted, holding frame");
            endpoint.holding_list.push_back(frame);
        }
        self.signals.signal_tx();
    }

    /// Promote held frames while window credit remains.
    ///
    /// An information frame at the head stays held while earlier data
    /// frames await acknowledgment.
    pub(super) fn drain_holding_list(&mut self, id: u8) {
        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        let mut promoted = false;
        while endpoint.current_tx_window_space > 0 {
            let Some(&head) = endpoint.holding_list.front() else {
                break;
            };
            let is_information = self
                .frames
                .get(head)
                .is_some_and(|frame| frame.kind() == FrameKind::Information);
            if is_information && !endpoint.re_transmit_queue.is_empty() {
                break;
            }
            endpoint.holding_list.pop_front();
            endpoint.current_tx_window_space -= 1;
            self.transmit_queue.push_back(head);
            promoted = true;
        }
        if promoted {
            self.signals.signal_tx();
        }
    }

    /// Hand the head of the transmit queue to the driver.
    ///
    /// Returns `Empty` when nothing is queued and `Busy` when the driver
    /// refused the frame, which then stays at the head.
    pub(super) fn process_tx_queue(&mut self) -> LinkResult<()> {
        let frame_id = self.transmit_queue.pop_front().ok_or(LinkError::Empty)?;
        let Some(frame) = self.frames.get_mut(frame_id) else {
            debug!(?frame_id, "queued frame already released");
            return Ok(());
        };

        let owner = frame.endpoint.and_then(|id| self.registry.find(id));
        if let Some(endpoint) = owner {
            frame.control = frame.control.with_ack(endpoint.ack);
        }
        let address = frame.endpoint.unwrap_or_default();
        let rebuilt = match frame.header {
            Some(header) if header.control == frame.control => Ok(header),
            _ => Header::new(address, frame.control, frame.payload.len()),
        };
        let header = match rebuilt {
            Ok(header) => header,
            Err(err) => {
                warn!(endpoint = address, %err, "dropping unencodable frame");
                free_frame(&mut self.frames, &mut self.pool, frame_id);
                return Ok(());
            }
        };
        frame.header = Some(header);
        let bytes = encode_frame(&header, &frame.payload);

        let completion = match self.driver.transmit_data(frame_id, bytes) {
            Ok(completion) => completion,
            Err(err) => {
                if err == DriverError::Failed {
                    warn!(endpoint = address, "driver failed transmit, requeueing");
                }
                self.counters.driver_busy += 1;
                self.transmit_queue.push_front(frame_id);
                return Err(LinkError::Busy);
            }
        };
        self.counters.frames_sent += 1;
        frame.driver_ref = true;
        frame.pending_resend = false;

        let kind = frame.kind();
        let first_send = frame.re_transmit_count == 0;
        let endpoint_id = frame.endpoint;
        trace!(endpoint = address, ?kind, control = ?frame.control, "frame transmitted");

        if let Some(id) = endpoint_id {
            self.on_frame_sent(id, frame_id, kind, first_send);
        }
        if completion == TxCompletion::Done {
            self.on_transmit_complete(frame_id, Ok(()));
        }
        Ok(())
    }

    fn on_frame_sent(&mut self, id: u8, frame_id: FrameId, kind: FrameKind, first_send: bool) {
        let now = self.timers.now();
        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        match kind {
            FrameKind::Information => {
                endpoint.counters.iframe_sent += 1;
                let frames = &mut self.frames;
                let Some(frame) = frames.get_mut(frame_id) else {
                    return;
                };
                // A resent frame never left the retransmit queue
                if !frame.queued_for_ack {
                    frame.queued_for_ack = true;
                    let order = frame.order;
                    let position = endpoint
                        .re_transmit_queue
                        .iter()
                        .position(|queued| {
                            frames.get(*queued).is_some_and(|other| other.order > order)
                        })
                        .unwrap_or(endpoint.re_transmit_queue.len());
                    endpoint.re_transmit_queue.insert(position, frame_id);
                    endpoint.frames_count_re_transmit_queue += 1;
                }

                if first_send {
                    endpoint.last_iframe_sent_timestamp = now;
                }
                self.timers
                    .restart(TimerId::re_transmit(id), endpoint.rto.timeout());
            }
            FrameKind::Supervisory => endpoint.counters.sframe_sent += 1,
            FrameKind::Unnumbered => endpoint.counters.uframe_sent += 1,
        }
    }

    /// Release the driver's reference on a transmitted frame.
    ///
    /// Drivers that return [`TxCompletion::Deferred`] call this once the
    /// bytes are on the wire. Unnumbered data frames give back their window
    /// credit here; numbered frames stay queued until acknowledged.
    pub fn on_transmit_complete(&mut self, frame_id: FrameId, status: Result<(), DriverError>) {
        let Some(frame) = self.frames.get_mut(frame_id) else {
            debug!(?frame_id, "completion for released frame");
            return;
        };
        frame.driver_ref = false;
        if frame.is_referenced() || self.transmit_queue.contains(&frame_id) {
            return;
        }

        let Some(frame) = free_frame(&mut self.frames, &mut self.pool, frame_id) else {
            return;
        };
        self.signals.signal_tx();

        let Some(id) = frame.endpoint else {
            return;
        };
        if frame.kind() != FrameKind::Unnumbered || !frame.is_window_charged() {
            return;
        }
        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        endpoint.restore_window();
        let status = status.map_err(|_| LinkError::TransmitIncomplete);
        endpoint
            .callbacks
            .write_completed(id, FrameKind::Unnumbered, frame.payload, status);
        self.drain_holding_list(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointFlags;
    use crate::link::testing::*;

    #[test]
    fn test_four_writes_fill_window_fifth_is_held() {
        let (mut link, _ctl) = link();
        let handle = link.open_service_endpoint(5, EndpointFlags::NONE, 4).unwrap();

        for _ in 0..4 {
            link.write(&handle, vec![0xAB; 10], WriteFlags::NONE).unwrap();
        }
        assert_eq!(link.transmit_queue_len(), 4);
        let ep = link.endpoint(5).unwrap();
        assert_eq!(ep.current_tx_window_space(), 0);
        assert_eq!(ep.seq(), 4);

        link.write(&handle, vec![0xCD; 10], WriteFlags::NONE).unwrap();
        assert_eq!(link.transmit_queue_len(), 4);
        assert_eq!(link.endpoint(5).unwrap().holding_len(), 1);
    }

    #[test]
    fn test_queued_frames_carry_sequence_numbers() {
        let (mut link, ctl) = link();
        let handle = link.open_service_endpoint(5, EndpointFlags::NONE, 4).unwrap();
        for _ in 0..4 {
            link.write(&handle, vec![0u8; 10], WriteFlags::NONE).unwrap();
        }
        link.process();

        let seqs: Vec<u8> = ctl
            .take_sent()
            .iter()
            .map(|bytes| match decode(bytes).header.control {
                Control::Information { seq, .. } => seq,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(link.endpoint(5).unwrap().frames_count_re_transmit_queue(), 4);
    }

    #[test]
    fn test_write_validates_flags_and_state() {
        let (mut link, _ctl) = link();
        let plain = link.open_service_endpoint(1, EndpointFlags::NONE, 1).unwrap();
        let no_iframes = link
            .open_service_endpoint(2, EndpointFlags::UFRAME_ENABLE | EndpointFlags::IFRAME_DISABLE, 1)
            .unwrap();

        assert_eq!(
            link.write(&plain, "x", WriteFlags::UNNUMBERED_INFORMATION),
            Err(LinkError::InvalidParameter)
        );
        assert_eq!(
            link.write(&no_iframes, "x", WriteFlags::NONE),
            Err(LinkError::InvalidParameter)
        );
        assert!(link.write(&no_iframes, "x", WriteFlags::UNNUMBERED_INFORMATION).is_ok());
        assert_eq!(
            link.write(&plain, Bytes::new(), WriteFlags::NONE),
            Err(LinkError::InvalidParameter)
        );
    }

    #[test]
    fn test_write_propagates_pool_exhaustion() {
        let (mut link, _ctl) = link_with_pool(crate::config::PoolConfig {
            data_items: 1,
            ..Default::default()
        });
        let handle = link.open_service_endpoint(1, EndpointFlags::NONE, 3).unwrap();

        link.write(&handle, "a", WriteFlags::NONE).unwrap();
        assert_eq!(link.write(&handle, "b", WriteFlags::NONE), Err(LinkError::Busy));
        assert_eq!(link.pool().in_use(PoolKind::FrameBuffer), 1);
        assert_eq!(link.endpoint(1).unwrap().seq(), 1);
    }

    #[test]
    fn test_driver_busy_keeps_frame_at_head() {
        let (mut link, ctl) = link();
        let handle = link.open_service_endpoint(1, EndpointFlags::NONE, 2).unwrap();
        link.write(&handle, "a", WriteFlags::NONE).unwrap();
        ctl.fail_next_transmits(1);

        assert_eq!(link.process_tx_queue(), Err(LinkError::Busy));
        assert_eq!(link.transmit_queue_len(), 1);
        assert_eq!(link.link_counters().driver_busy, 1);

        assert!(link.process_tx_queue().is_ok());
        assert_eq!(link.transmit_queue_len(), 0);
        assert_eq!(ctl.sent_count(), 1);
    }

    #[test]
    fn test_ack_field_refreshed_at_transmit() {
        let (mut link, ctl) = link();
        let handle = link.open_service_endpoint(1, EndpointFlags::NONE, 2).unwrap();
        link.write(&handle, "a", WriteFlags::NONE).unwrap();

        // Peer data arrives after the write was queued
        ctl.inject(iframe(1, 0, 0, b"in"));
        link.signals().signal_rx();
        link.process();

        let sent = ctl.take_sent();
        let data = sent
            .iter()
            .map(|bytes| decode(bytes).header.control)
            .find(|control| control.kind() == FrameKind::Information)
            .unwrap();
        assert_eq!(data.ack_number(), Some(1));
    }

    #[test]
    fn test_uframe_completion_restores_window() {
        let (mut link, ctl) = link();
        let handle = link.open_service_endpoint(1, EndpointFlags::UFRAME_ENABLE, 1).unwrap();
        let done = completions(&mut link, 1, FrameKind::Unnumbered);
        ctl.set_defer_completion(true);

        link.write(&handle, "u1", WriteFlags::UNNUMBERED_INFORMATION).unwrap();
        link.write(&handle, "u2", WriteFlags::UNNUMBERED_INFORMATION).unwrap();
        link.process();
        assert_eq!(link.endpoint(1).unwrap().holding_len(), 1);
        assert_eq!(link.endpoint(1).unwrap().current_tx_window_space(), 0);

        for frame in ctl.take_in_flight() {
            link.on_transmit_complete(frame, Ok(()));
        }
        assert_eq!(done.lock().unwrap().len(), 1);
        assert_eq!(link.endpoint(1).unwrap().holding_len(), 0);
        assert_eq!(link.transmit_queue_len(), 1);
    }

    #[test]
    fn test_held_iframe_waits_for_outstanding_acks() {
        let (mut link, _ctl) = link();
        let handle = link.open_service_endpoint(1, EndpointFlags::NONE, 2).unwrap();
        for payload in ["a", "b", "c"] {
            link.write(&handle, payload, WriteFlags::NONE).unwrap();
        }
        link.process();
        assert_eq!(link.endpoint(1).unwrap().holding_len(), 1);

        // Acknowledge seq 0 only: credit returns but seq 1 is still unacked
        link.receive_ack(1, 1);
        let ep = link.endpoint(1).unwrap();
        assert_eq!(ep.current_tx_window_space(), 1);
        assert_eq!(ep.holding_len(), 1);

        link.receive_ack(1, 2);
        assert_eq!(link.endpoint(1).unwrap().holding_len(), 0);
        assert_eq!(link.transmit_queue_len(), 1);
    }

    #[test]
    fn test_write_after_hold_preserves_order() {
        let (mut link, ctl) = link();
        let handle = link.open_service_endpoint(1, EndpointFlags::NONE, 1).unwrap();
        for payload in ["a", "b"] {
            link.write(&handle, payload, WriteFlags::NONE).unwrap();
        }
        link.process();
        ctl.take_sent();

        link.receive_ack(1, 1);
        link.write(&handle, "c", WriteFlags::NONE).unwrap();
        assert_eq!(link.endpoint(1).unwrap().holding_len(), 1);

        link.process();
        let sent = ctl.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(&decode(&sent[0]).payload[..], b"b");
    }
}
