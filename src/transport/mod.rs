//! Transport plumbing shared by the engine.
//!
//! - **Frame buffers**: [`FrameStore`] arena addressed by [`FrameId`]
//! - **RTO estimation**: [`RtoEstimator`] (RFC 6298, Karn sampling)
//! - **Work signals**: [`WorkSignals`] raised by driver and timer context

mod buffer;
mod signal;
mod timing;

pub use buffer::*;
pub use signal::{WorkEvents, WorkSignals};
pub use timing::{RtoBounds, RtoEstimator};
