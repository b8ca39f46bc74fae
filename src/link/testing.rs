//! Shared fixtures for the engine's unit tests.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::Link;
use crate::config::{LinkConfig, PoolConfig};
use crate::core::LinkError;
use crate::driver::{DriverControl, MemoryDriver};
use crate::endpoint::EndpointOption;
use crate::hdlc::{
    Control, DecodedFrame, FrameKind, Header, RejectReason, SequenceModulus, UnnumberedKind,
    decode_frame, encode_frame,
};
use crate::pool::FixedPool;
use crate::timer::DeadlineTimers;

pub(super) type TestLink = Link<MemoryDriver, DeadlineTimers, FixedPool>;

pub(super) type Completions = Arc<Mutex<Vec<(Bytes, Result<(), LinkError>)>>>;

/// Modulo-8 link on a manual clock.
pub(super) fn link() -> (TestLink, DriverControl) {
    link_with(LinkConfig::new().with_modulus(SequenceModulus::Eight), PoolConfig::default())
}

pub(super) fn link_with_pool(pool: PoolConfig) -> (TestLink, DriverControl) {
    link_with(LinkConfig::new().with_modulus(SequenceModulus::Eight), pool)
}

pub(super) fn link_with(config: LinkConfig, pool: PoolConfig) -> (TestLink, DriverControl) {
    let (driver, control) = MemoryDriver::standalone();
    let link = Link::with_parts(driver, DeadlineTimers::manual(), FixedPool::new(pool), config)
        .unwrap();
    (link, control)
}

/// Record write completions of one frame kind.
pub(super) fn completions(link: &mut TestLink, id: u8, kind: FrameKind) -> Completions {
    let done = Completions::default();
    let log = Arc::clone(&done);
    let callback = Box::new(move |_: u8, payload: Bytes, status: Result<(), LinkError>| {
        log.lock().unwrap().push((payload, status));
    });
    let option = match kind {
        FrameKind::Unnumbered => EndpointOption::OnUframeWriteCompleted(callback),
        _ => EndpointOption::OnIframeWriteCompleted(callback),
    };
    link.registry.find_mut(id).unwrap().callbacks.set(option);
    done
}

fn frame(address: u8, control: Control, payload: &[u8]) -> Bytes {
    let header = Header::new(address, control, payload.len()).unwrap();
    encode_frame(&header, payload)
}

pub(super) fn iframe(address: u8, seq: u8, ack: u8, payload: &[u8]) -> Bytes {
    frame(address, Control::information(seq, ack, false), payload)
}

pub(super) fn poll_iframe(address: u8, seq: u8, ack: u8, payload: &[u8]) -> Bytes {
    frame(address, Control::information(seq, ack, true), payload)
}

pub(super) fn ack_frame(address: u8, ack: u8) -> Bytes {
    frame(address, Control::ack(ack), &[])
}

pub(super) fn reject_frame(address: u8, ack: u8, reason: RejectReason) -> Bytes {
    frame(address, Control::reject(ack), &[reason.as_byte()])
}

pub(super) fn uframe(address: u8, kind: UnnumberedKind, payload: &[u8]) -> Bytes {
    frame(address, Control::unnumbered(kind), payload)
}

pub(super) fn decode(bytes: &Bytes) -> DecodedFrame {
    decode_frame(bytes, true).unwrap()
}

/// Feed raw frames and run the processing loop.
pub(super) fn receive(link: &mut TestLink, ctl: &DriverControl, frames: &[Bytes]) {
    for bytes in frames {
        ctl.inject(bytes.clone());
    }
    link.signals().signal_rx();
    link.process();
}

/// Reject reason carried by a sent frame, if it is a reject.
pub(super) fn reject_reason(bytes: &Bytes) -> Option<RejectReason> {
    let decoded = decode(bytes);
    match decoded.header.control {
        Control::Supervisory {
            function: crate::hdlc::SupervisoryFunction::Reject,
            ..
        } => decoded.payload.first().and_then(|b| RejectReason::from_byte(*b)),
        _ => None,
    }
}
