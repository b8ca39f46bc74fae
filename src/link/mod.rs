//! The protocol engine.
//!
//! [`Link`] owns every endpoint, the global transmit queue, the frame arena
//! and the deferred-close list. It performs no I/O of its own: the host
//! raises [`WorkSignals`] from driver and timer context and then calls
//! [`Link::process`], which runs receive decoding and transmit draining
//! until both signals are quiet.
//!
//! - **Scheduling**: `tx` (write, window accounting, transmit drain)
//! - **Reliability**: `retransmit` (acks, RTO, resubmission)
//! - **Dispatch**: `rx` (decode and per-type handling)
//! - **Teardown**: `close` (close, error states, deferred free)

mod close;
mod retransmit;
mod rx;
mod tx;

#[cfg(test)]
mod testing;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::config::LinkConfig;
use crate::core::constants::{
    SERVICE_ENDPOINT_FIRST, SERVICE_ENDPOINT_LAST, SYSTEM_ENDPOINT_ID, TEMPORARY_ENDPOINT_FIRST,
    TEMPORARY_ENDPOINT_LAST, USER_ENDPOINT_COUNT, USER_ENDPOINT_FIRST,
};
use crate::core::{
    ControlPlane, Driver, LinkError, LinkResult, Pool, PoolKind, TimerId, TimerKind, TimerService,
};
use crate::endpoint::{
    Endpoint, EndpointCounters, EndpointFlags, EndpointHandle, EndpointOption, EndpointRegistry,
    EndpointState,
};
use crate::hdlc::FrameKind;
use crate::pool::FixedPool;
use crate::timer::DeadlineTimers;
use crate::transport::{FrameBuffer, FrameId, FrameStore, RtoBounds, WorkSignals};

/// Link-wide statistics for frames that never reached an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkCounters {
    /// Frames pulled from the driver.
    pub frames_received: u32,
    /// Frames handed to the driver.
    pub frames_sent: u32,
    /// Bad start marker or header checksum.
    pub invalid_header_checksum: u32,
    /// Bad payload checksum.
    pub invalid_payload_checksum: u32,
    /// Truncated frames or unknown control bytes.
    pub malformed: u32,
    /// Frames addressed to an endpoint that is not open.
    pub unknown_endpoint: u32,
    /// Transmits refused by the driver.
    pub driver_busy: u32,
}

/// Multiplexed link-layer engine.
pub struct Link<D: Driver, T: TimerService = DeadlineTimers, P: Pool = FixedPool> {
    config: LinkConfig,
    rto_bounds: RtoBounds,
    driver: D,
    timers: T,
    pool: P,
    registry: EndpointRegistry,
    frames: FrameStore,
    transmit_queue: VecDeque<FrameId>,
    closed_endpoints: VecDeque<u8>,
    signals: WorkSignals,
    control: Option<Box<dyn ControlPlane + Send>>,
    counters: LinkCounters,
    write_order: u64,
}

impl<D: Driver> Link<D> {
    /// Create an engine with the monotonic timer service and default pools.
    pub fn new(driver: D, config: LinkConfig) -> LinkResult<Self> {
        Self::with_parts(driver, DeadlineTimers::new(), FixedPool::default(), config)
    }
}

impl<D: Driver, T: TimerService, P: Pool> Link<D, T, P> {
    /// Create an engine from explicit collaborators.
    pub fn with_parts(driver: D, timers: T, pool: P, config: LinkConfig) -> LinkResult<Self> {
        config.validate()?;
        let rto_bounds = config.rto_bounds(&timers);
        Ok(Self {
            registry: EndpointRegistry::new(config.max_endpoints),
            config,
            rto_bounds,
            driver,
            timers,
            pool,
            frames: FrameStore::new(),
            transmit_queue: VecDeque::new(),
            closed_endpoints: VecDeque::new(),
            signals: WorkSignals::new(),
            control: None,
            counters: LinkCounters::default(),
            write_order: 0,
        })
    }

    /// Install the system-endpoint control plane used to announce closes.
    pub fn set_control_plane(&mut self, control: impl ControlPlane + Send + 'static) {
        self.control = Some(Box::new(control));
    }

    // =========================================================================
    // OPEN
    // =========================================================================

    /// Open the system endpoint (id 0).
    pub fn open_system_endpoint(
        &mut self,
        flags: EndpointFlags,
        tx_window_size: u8,
    ) -> LinkResult<EndpointHandle> {
        self.open_endpoint(SYSTEM_ENDPOINT_ID, flags, tx_window_size)
    }

    /// Open a service endpoint.
    pub fn open_service_endpoint(
        &mut self,
        id: u8,
        flags: EndpointFlags,
        tx_window_size: u8,
    ) -> LinkResult<EndpointHandle> {
        if !(SERVICE_ENDPOINT_FIRST..=SERVICE_ENDPOINT_LAST).contains(&id) {
            return Err(LinkError::InvalidParameter);
        }
        self.open_endpoint(id, flags, tx_window_size)
    }

    /// Open the user endpoint at `index` in the user range.
    pub fn open_user_endpoint(
        &mut self,
        index: u8,
        flags: EndpointFlags,
        tx_window_size: u8,
    ) -> LinkResult<EndpointHandle> {
        if index >= USER_ENDPOINT_COUNT {
            return Err(LinkError::InvalidParameter);
        }
        self.open_endpoint(USER_ENDPOINT_FIRST + index, flags, tx_window_size)
    }

    /// Open an endpoint on the lowest free temporary id.
    pub fn open_temporary_endpoint(
        &mut self,
        flags: EndpointFlags,
        tx_window_size: u8,
    ) -> LinkResult<EndpointHandle> {
        let id = self
            .registry
            .first_free_in(TEMPORARY_ENDPOINT_FIRST..=TEMPORARY_ENDPOINT_LAST)
            .ok_or(LinkError::NoMoreResource)?;
        self.open_endpoint(id, flags, tx_window_size)
    }

    fn open_endpoint(
        &mut self,
        id: u8,
        flags: EndpointFlags,
        tx_window_size: u8,
    ) -> LinkResult<EndpointHandle> {
        if tx_window_size == 0 || tx_window_size > self.config.modulus.max_window() {
            return Err(LinkError::InvalidParameter);
        }
        if let Some(existing) = self.registry.find(id) {
            return Err(match existing.state {
                EndpointState::Open => LinkError::AlreadyExists,
                _ => LinkError::Busy,
            });
        }

        let handle = EndpointHandle::new(id);
        let endpoint = Endpoint::new(
            id,
            flags,
            tx_window_size,
            self.rto_bounds,
            Arc::clone(handle.shared()),
        );
        self.registry.insert(endpoint)?;
        debug!(endpoint = id, window = tx_window_size, "endpoint opened");
        Ok(handle)
    }

    // =========================================================================
    // ENDPOINT API
    // =========================================================================

    /// Install a callback on an endpoint.
    pub fn set_option(&mut self, handle: &EndpointHandle, option: EndpointOption) -> LinkResult<()> {
        let _guard = handle.enter()?;
        self.endpoint_of_mut(handle)?.callbacks.set(option);
        Ok(())
    }

    /// Pop one received information payload.
    pub fn read(&mut self, handle: &EndpointHandle) -> LinkResult<Bytes> {
        self.read_queue(handle, FrameKind::Information)
    }

    /// Pop one received unnumbered payload.
    pub fn read_unnumbered(&mut self, handle: &EndpointHandle) -> LinkResult<Bytes> {
        self.read_queue(handle, FrameKind::Unnumbered)
    }

    fn read_queue(&mut self, handle: &EndpointHandle, kind: FrameKind) -> LinkResult<Bytes> {
        let _guard = handle.enter()?;
        let endpoint = self.endpoint_of_mut(handle)?;
        if endpoint.state != EndpointState::Open {
            return Err(LinkError::InvalidState);
        }
        let queue = match kind {
            FrameKind::Unnumbered => &mut endpoint.uframe_receive_queue,
            _ => &mut endpoint.iframe_receive_queue,
        };
        let payload = queue.pop_front().ok_or(LinkError::Empty)?;
        self.pool.release(PoolKind::RxEntry);
        Ok(payload)
    }

    /// Lifecycle state of the endpoint behind `handle`.
    pub fn state(&self, handle: &EndpointHandle) -> LinkResult<EndpointState> {
        let _guard = handle.enter()?;
        Ok(self.endpoint_of(handle)?.state)
    }

    /// Frame statistics of the endpoint behind `handle`.
    pub fn counters(&self, handle: &EndpointHandle) -> LinkResult<EndpointCounters> {
        let _guard = handle.enter()?;
        Ok(self.endpoint_of(handle)?.counters)
    }

    fn endpoint_of(&self, handle: &EndpointHandle) -> LinkResult<&Endpoint> {
        self.registry
            .find(handle.id())
            .filter(|ep| handle.refers_to(&ep.handle))
            .ok_or(LinkError::Ownership)
    }

    fn endpoint_of_mut(&mut self, handle: &EndpointHandle) -> LinkResult<&mut Endpoint> {
        self.registry
            .find_mut(handle.id())
            .filter(|ep| handle.refers_to(&ep.handle))
            .ok_or(LinkError::Ownership)
    }

    // =========================================================================
    // PROCESSING LOOP
    // =========================================================================

    /// Shared work flags; raise them from driver and timer context.
    pub fn signals(&self) -> WorkSignals {
        self.signals.clone()
    }

    /// Run receive and transmit work until both signals are quiet, then
    /// release endpoints whose teardown has completed.
    pub fn process(&mut self) {
        loop {
            let pending = self.signals.pending();
            let tx_ready = pending.tx && self.driver.is_transmit_ready();
            if !pending.rx && !tx_ready {
                break;
            }

            if pending.rx {
                self.signals.clear_rx();
                if self.decode_packet() {
                    self.signals.rearm_rx();
                }
            }

            if tx_ready {
                if self.transmit_queue.is_empty() {
                    self.signals.clear_tx();
                } else if self.process_tx_queue().is_err() {
                    break;
                }
            }
        }
        self.process_close();
    }

    /// Dispatch an expired timer.
    pub fn on_timer_expired(&mut self, timer: TimerId) {
        match timer.kind {
            TimerKind::ReTransmit => self.re_transmit_timeout(timer.endpoint),
            TimerKind::Close => self.endpoint_close_timeout(timer.endpoint),
        }
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// Engine configuration.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Endpoint by id.
    pub fn endpoint(&self, id: u8) -> Option<&Endpoint> {
        self.registry.find(id)
    }

    /// Registered endpoint ids in ascending order.
    pub fn endpoint_ids(&self) -> Vec<u8> {
        self.registry.ids()
    }

    /// Link-wide statistics.
    pub fn link_counters(&self) -> LinkCounters {
        self.counters
    }

    /// Frames waiting in the global transmit queue.
    pub fn transmit_queue_len(&self) -> usize {
        self.transmit_queue.len()
    }

    /// Frames alive in the arena, queued or held by the driver.
    pub fn frames_in_use(&self) -> usize {
        self.frames.len()
    }

    /// Endpoints whose free is still pending.
    pub fn closed_pending(&self) -> usize {
        self.closed_endpoints.len()
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The driver, mutably.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// The timer service.
    pub fn timers(&self) -> &T {
        &self.timers
    }

    /// The timer service, mutably.
    pub fn timers_mut(&mut self) -> &mut T {
        &mut self.timers
    }

    /// The pool.
    pub fn pool(&self) -> &P {
        &self.pool
    }
}

impl<D: Driver, P: Pool> Link<D, DeadlineTimers, P> {
    /// Fire every due timer. Returns how many fired.
    pub fn poll_timers(&mut self) -> usize {
        let expired = self.timers.take_expired();
        for timer in &expired {
            self.on_timer_expired(*timer);
        }
        expired.len()
    }

    /// Time until the next timer is due.
    pub fn next_timer_in(&self) -> Option<Duration> {
        self.timers.time_until_next()
    }
}

impl<D: Driver, T: TimerService, P: Pool> std::fmt::Debug for Link<D, T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("endpoints", &self.registry.ids())
            .field("transmit_queue", &self.transmit_queue.len())
            .field("frames", &self.frames.len())
            .field("closed_pending", &self.closed_endpoints.len())
            .field("signals", &self.signals)
            .finish()
    }
}

/// Remove a frame from the arena and return its pool entries.
fn free_frame<P: Pool>(frames: &mut FrameStore, pool: &mut P, id: FrameId) -> Option<FrameBuffer> {
    let frame = frames.remove(id)?;
    pool.release(PoolKind::FrameBuffer);
    pool.release(frame.item);
    Some(frame)
}
