//! Endpoint teardown: close, error states and deferred free.
//!
//! A closed endpoint stays registered until every frame it charged to the
//! transmit window is accounted for. Frames the driver still holds are
//! detached instead, so a late completion can never reach the endpoint.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::{Link, free_frame};
use crate::core::{
    CloseError, Driver, LinkError, LinkResult, Pool, PoolKind, TimerId, TimerService,
};
use crate::endpoint::{EndpointHandle, EndpointState};
use crate::hdlc::FrameKind;
use crate::transport::FrameId;

impl<D: Driver, T: TimerService, P: Pool> Link<D, T, P> {
    /// Close an endpoint.
    ///
    /// Refused with `Busy` while another call holds a reference on the
    /// handle; the handle is returned inside the error for a retry. A
    /// non-system endpoint announces the close to the peer and waits in
    /// `Closing` until the peer confirms through
    /// [`remote_disconnected`](Self::remote_disconnected) or the close
    /// timeout elapses.
    ///
    /// # Panics
    ///
    /// Panics if the endpoint behind a live handle is already closing.
    pub fn close(&mut self, handle: EndpointHandle) -> Result<(), CloseError> {
        match self.close_endpoint(&handle) {
            Ok(()) => {
                handle.release();
                Ok(())
            }
            Err(error) => Err(CloseError { error, handle }),
        }
    }

    fn close_endpoint(&mut self, handle: &EndpointHandle) -> LinkResult<()> {
        if handle.is_released() {
            return Err(LinkError::Ownership);
        }
        if handle.ref_count() > 1 {
            return Err(LinkError::Busy);
        }
        let id = handle.id();
        let endpoint = self.endpoint_of(handle)?;
        let state = endpoint.state;
        assert!(
            !matches!(
                state,
                EndpointState::Closing | EndpointState::Closed | EndpointState::Freed
            ),
            "endpoint {id} closed twice"
        );
        let is_system = endpoint.is_system();

        if !is_system {
            if let Some(control) = self.control.as_mut() {
                if let Err(err) = control.notify_disconnect(id) {
                    warn!(endpoint = id, %err, "could not announce close");
                    return Err(LinkError::Busy);
                }
            }
        }

        let endpoint = self.endpoint_of_mut(handle)?;
        let dropped = endpoint.iframe_receive_queue.len() + endpoint.uframe_receive_queue.len();
        endpoint.iframe_receive_queue.clear();
        endpoint.uframe_receive_queue.clear();
        for _ in 0..dropped {
            self.pool.release(PoolKind::RxEntry);
        }

        if state.is_error() {
            self.clean_tx_queues(id);
        }

        let Some(endpoint) = self.registry.find_mut(id) else {
            return Ok(());
        };
        if is_system {
            endpoint.state = EndpointState::Closed;
            self.closed_endpoints.push_back(id);
        } else {
            endpoint.state = EndpointState::Closing;
            let ticks = self
                .timers
                .ms_to_ticks(self.config.close_timeout.as_millis() as u64);
            self.timers.restart(TimerId::close(id), ticks);
        }
        debug!(endpoint = id, ?state, dropped, "endpoint closing");
        Ok(())
    }

    /// The peer confirmed or initiated the disconnect of endpoint `id`.
    ///
    /// Completes a pending close, or fails an open endpoint as
    /// unreachable.
    pub fn remote_disconnected(&mut self, id: u8) {
        let Some(endpoint) = self.registry.find(id) else {
            debug!(endpoint = id, "disconnect for unknown endpoint");
            return;
        };
        match endpoint.state {
            EndpointState::Closing => {
                self.timers.stop(TimerId::close(id));
                self.clean_tx_queues(id);
                self.mark_closed(id);
            }
            EndpointState::Open => {
                self.set_endpoint_in_error(id, EndpointState::ErrorDestinationUnreachable)
            }
            state => debug!(endpoint = id, ?state, "disconnect ignored"),
        }
    }

    /// Move an open endpoint into an error state and abandon its traffic.
    ///
    /// The error callback fires once per endpoint.
    pub(super) fn set_endpoint_in_error(&mut self, id: u8, new_state: EndpointState) {
        debug_assert!(new_state.is_error());
        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        match endpoint.state {
            EndpointState::Closing => {
                warn!(endpoint = id, ?new_state, "error while closing");
                self.clean_tx_queues(id);
            }
            EndpointState::Open => {
                endpoint.state = new_state;
                warn!(endpoint = id, state = ?new_state, "endpoint failed");
                self.clean_tx_queues(id);
                if let Some(endpoint) = self.registry.find_mut(id) {
                    endpoint.callbacks.error(id, new_state);
                }
            }
            state => trace!(endpoint = id, ?state, ?new_state, "already failed or closed"),
        }
    }

    pub(super) fn endpoint_close_timeout(&mut self, id: u8) {
        let Some(endpoint) = self.registry.find(id) else {
            return;
        };
        if endpoint.state != EndpointState::Closing {
            return;
        }
        warn!(endpoint = id, "peer did not confirm close, forcing teardown");
        self.clean_tx_queues(id);
        self.mark_closed(id);
    }

    fn mark_closed(&mut self, id: u8) {
        if let Some(endpoint) = self.registry.find_mut(id) {
            endpoint.state = EndpointState::Closed;
            self.closed_endpoints.push_back(id);
        }
    }

    /// Drop every queued frame of an endpoint and give back its window.
    ///
    /// Application frames that never completed are reported with
    /// [`LinkError::TransmitIncomplete`].
    pub(super) fn clean_tx_queues(&mut self, id: u8) {
        let mut incomplete: Vec<(FrameKind, Bytes)> = Vec::new();

        let frames = &self.frames;
        let (owned, kept): (VecDeque<FrameId>, VecDeque<FrameId>) = self
            .transmit_queue
            .drain(..)
            .partition(|frame_id| frames.get(*frame_id).is_some_and(|f| f.belongs_to(id)));
        self.transmit_queue = kept;
        for frame_id in owned {
            if let Some(frame) = free_frame(&mut self.frames, &mut self.pool, frame_id) {
                if frame.is_window_charged() {
                    incomplete.push((frame.kind(), frame.payload));
                }
            }
        }

        let Some(endpoint) = self.registry.find_mut(id) else {
            return;
        };
        let queued: Vec<FrameId> = endpoint
            .re_transmit_queue
            .drain(..)
            .chain(endpoint.holding_list.drain(..))
            .collect();
        endpoint.current_tx_window_space = endpoint.configured_tx_window_size;
        endpoint.frames_count_re_transmit_queue = 0;
        endpoint.packet_re_transmit_count = 0;
        self.timers.stop(TimerId::re_transmit(id));

        for frame_id in queued {
            let Some(frame) = self.frames.get_mut(frame_id) else {
                continue;
            };
            frame.queued_for_ack = false;
            if frame.driver_ref {
                frame.endpoint = None;
                incomplete.push((frame.kind(), frame.payload.clone()));
            } else if let Some(frame) = free_frame(&mut self.frames, &mut self.pool, frame_id) {
                incomplete.push((frame.kind(), frame.payload));
            }
        }

        // In-flight frames outside any queue
        for (_, frame) in self.frames.iter_mut() {
            if !frame.belongs_to(id) || !frame.driver_ref {
                continue;
            }
            frame.endpoint = None;
            if frame.is_window_charged() {
                incomplete.push((frame.kind(), frame.payload.clone()));
            }
        }

        if incomplete.is_empty() {
            return;
        }
        debug!(endpoint = id, frames = incomplete.len(), "abandoned queued frames");
        if let Some(endpoint) = self.registry.find_mut(id) {
            for (kind, payload) in incomplete {
                endpoint.callbacks.write_completed(
                    id,
                    kind,
                    payload,
                    Err(LinkError::TransmitIncomplete),
                );
            }
        }
    }

    /// Free a closed endpoint once its window is whole again.
    ///
    /// Returns `false` while outstanding frames still hold credit.
    fn free_closed_endpoint_if_empty(&mut self, id: u8) -> bool {
        let Some(endpoint) = self.registry.find(id) else {
            return true;
        };
        debug_assert_eq!(endpoint.state, EndpointState::Closed);
        if endpoint.current_tx_window_space != endpoint.configured_tx_window_size {
            trace!(
                endpoint = id,
                space = endpoint.current_tx_window_space,
                "free deferred, frames outstanding"
            );
            return false;
        }

        // Control frames still queued for this id
        self.clean_tx_queues(id);
        self.timers.stop(TimerId::re_transmit(id));
        self.timers.stop(TimerId::close(id));
        if let Some(mut endpoint) = self.registry.remove(id) {
            endpoint.state = EndpointState::Freed;
            let leftover = endpoint.iframe_receive_queue.len() + endpoint.uframe_receive_queue.len();
            for _ in 0..leftover {
                self.pool.release(PoolKind::RxEntry);
            }
        }
        debug!(endpoint = id, "endpoint freed");
        true
    }

    /// Retry the free of every closed endpoint once.
    pub(super) fn process_close(&mut self) {
        for _ in 0..self.closed_endpoints.len() {
            let Some(id) = self.closed_endpoints.pop_front() else {
                break;
            };
            if !self.free_closed_endpoint_if_empty(id) {
                self.closed_endpoints.push_back(id);
            }
        }
    }
}
