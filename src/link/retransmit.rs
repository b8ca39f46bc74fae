//! Acknowledgment processing and retransmission.

use tracing::{debug, trace, warn};

use super::{Link, free_frame};
use crate::core::{Driver, LinkError, LinkResult, Pool, TimerId, TimerService};
use crate::hdlc::{Control, FrameKind};
use crate::transport::FrameBuffer;

fn sequence_of(frame: &FrameBuffer) -> Option<u8> {
    match frame.control {
        Control::Information { seq, .. } => Some(seq),
        _ => None,
    }
}

impl<D: Driver, T: TimerService, P: Pool> Link<D, T, P> {
    /// Apply an acknowledgment number received from the peer.
    ///
    /// Valid acks lie in `[oldest + 1, oldest + outstanding]` modulo the
    /// sequence range. Anything else is ignored without touching state.
    /// Returns whether frames were released.
    pub(super) fn receive_ack(&mut self, id: u8, ack: u8) -> bool {
        let modulus = self.config.modulus;
        let now = self.timers.now();
        let Some(endpoint) = self.registry.find_mut(id) else {
            return false;
        };
        let Some(oldest_seq) = endpoint
            .re_transmit_queue
            .front()
            .and_then(|oldest| self.frames.get(*oldest))
            .and_then(sequence_of)
        else {
            return false;
        };

        let acked = modulus.distance(oldest_seq, ack);
        if acked == 0 {
            trace!(endpoint = id, ack, "ack without progress");
            return false;
        }
        if acked > endpoint.frames_count_re_transmit_queue {
            endpoint.counters.ignored_acks += 1;
            debug!(
                endpoint = id,
                ack,
                oldest = oldest_seq,
                outstanding = endpoint.frames_count_re_transmit_queue,
                "ignoring ack outside the outstanding range"
            );
            return false;
        }

        // Karn: no sample when any acknowledged frame was resent
        let fresh = endpoint
            .re_transmit_queue
            .iter()
            .take(acked as usize)
            .filter_map(|frame| self.frames.get(*frame))
            .all(|frame| frame.re_transmit_count == 0);
        if fresh {
            let round_trip_time = now.saturating_sub(endpoint.last_iframe_sent_timestamp);
            endpoint.rto.update(round_trip_time);
        }
        endpoint.packet_re_transmit_count = 0;
        self.timers.stop(TimerId::re_transmit(id));

        let mut completed = Vec::with_capacity(acked as usize);
        for _ in 0..acked {
            let Some(frame_id) = endpoint.re_transmit_queue.pop_front() else {
                break;
            };
            endpoint.frames_count_re_transmit_queue -= 1;
            endpoint.restore_window();

            let Some(frame) = self.frames.get_mut(frame_id) else {
                continue;
            };
            frame.queued_for_ack = false;
            if frame.pending_resend {
                // Acknowledged before the resend went out
                frame.pending_resend = false;
                self.transmit_queue.retain(|queued| *queued != frame_id);
            }
            if frame.driver_ref {
                // Released by the driver completion
                completed.push(frame.payload.clone());
            } else if let Some(frame) = free_frame(&mut self.frames, &mut self.pool, frame_id) {
                completed.push(frame.payload);
            }
        }
        trace!(
            endpoint = id,
            ack,
            released = completed.len(),
            rto = endpoint.rto.timeout(),
            "ack accepted"
        );

        if !endpoint.re_transmit_queue.is_empty() {
            self.timers
                .restart(TimerId::re_transmit(id), endpoint.rto.timeout());
        }
        for payload in completed {
            endpoint
                .callbacks
                .write_completed(id, FrameKind::Information, payload, Ok(()));
        }

        self.drain_holding_list(id);
        true
    }

    /// Resubmit the oldest unacknowledged frame ahead of new traffic.
    ///
    /// The frame stays in the retransmit queue, so it keeps its window
    /// credit and still counts toward the acknowledgment range. Frames
    /// already waiting for a resend are skipped. Returns `NotAvailable`
    /// when nothing is left to resubmit and `Busy` while the driver still
    /// holds the frame.
    pub(super) fn re_transmit_frame(&mut self, id: u8) -> LinkResult<()> {
        let endpoint = self.registry.find_mut(id).ok_or(LinkError::NotAvailable)?;
        let frames = &self.frames;
        let frame_id = endpoint
            .re_transmit_queue
            .iter()
            .copied()
            .find(|queued| frames.get(*queued).is_some_and(|frame| !frame.pending_resend))
            .ok_or(LinkError::NotAvailable)?;
        let frame = self.frames.get_mut(frame_id).ok_or(LinkError::NotAvailable)?;
        if frame.driver_ref {
            return Err(LinkError::Busy);
        }

        endpoint.packet_re_transmit_count += 1;
        endpoint.counters.re_transmits += 1;

        frame.pending_resend = true;
        frame.header = None;
        frame.re_transmit_count = frame.re_transmit_count.saturating_add(1);
        let order = frame.order;
        debug!(
            endpoint = id,
            seq = ?sequence_of(frame),
            retry = endpoint.packet_re_transmit_count,
            "re-transmitting frame"
        );

        // Older resubmissions of this endpoint stay ahead
        let position = self
            .transmit_queue
            .iter()
            .take_while(|queued| {
                self.frames.get(**queued).is_some_and(|other| {
                    other.belongs_to(id) && other.pending_resend && other.order < order
                })
            })
            .count();
        self.transmit_queue.insert(position, frame_id);
        self.signals.signal_tx();
        Ok(())
    }

    /// Retransmit timer expiry.
    pub(super) fn re_transmit_timeout(&mut self, id: u8) {
        let max_re_transmit = self.config.max_re_transmit;
        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        if endpoint.packet_re_transmit_count >= max_re_transmit {
            warn!(
                endpoint = id,
                retries = endpoint.packet_re_transmit_count,
                "retry limit reached, giving up on retransmission"
            );
            self.timers.stop(TimerId::re_transmit(id));
            return;
        }
        let Some(oldest) = endpoint.re_transmit_queue.front() else {
            return;
        };
        if self
            .frames
            .get(*oldest)
            .is_some_and(|frame| frame.driver_ref || frame.pending_resend)
        {
            trace!(endpoint = id, "oldest frame not sent yet, re-arming");
            self.timers
                .restart(TimerId::re_transmit(id), endpoint.rto.timeout());
            return;
        }

        endpoint.rto.backoff();
        if let Err(err) = self.re_transmit_frame(id) {
            debug!(endpoint = id, %err, "nothing to re-transmit");
        }
    }
}
