//! # copro-link
//!
//! Reliable, multiplexed link layer between a host and a co-processor
//! over a single byte-oriented link (UART, SPI).
//!
//! Up to 255 logical endpoints share one physical channel. Each endpoint
//! runs its own sliding-window ARQ with HDLC-style framing:
//!
//! - **Framing**: 7-byte header with CRC-16, payload with CRC-16 trailer
//! - **Reliability**: sequence numbers, piggybacked acks, rejects, adaptive
//!   retransmission timeout (RFC 6298 with Karn's rule)
//! - **Multiplexing**: per-endpoint windows over one global transmit queue
//! - **Best effort**: unnumbered frames for datagram-style traffic
//!
//! The engine is sans-IO. A [`Driver`](core::Driver) moves bytes, a
//! [`TimerService`](core::TimerService) arms one-shot timers and a
//! [`Pool`](core::Pool) bounds memory. The host raises
//! [`WorkSignals`](transport::WorkSignals) and calls [`Link::process`].
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio service task and thread-safe [`SharedLink`]
//!
//! ## Modules
//!
//! - [`core`](crate::core): constants, error types and collaborator traits
//! - [`hdlc`]: frame codec
//! - [`endpoint`]: endpoint state, flags, handles and registry
//! - [`transport`]: frame arena, RTO estimator, work signals
//! - [`link`]: the protocol engine
//! - [`pool`], [`timer`], [`driver`]: in-crate collaborators
//! - [`runtime`]: tokio host (requires `runtime` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use copro_link::prelude::*;
//!
//! let ((host_driver, host_ctl), (device_driver, device_ctl)) = MemoryDriver::pair();
//! let config = LinkConfig::new().with_modulus(SequenceModulus::Eight);
//! let mut host = Link::new(host_driver, config.clone())?;
//! let mut device = Link::new(device_driver, config)?;
//! host_ctl.attach_signals(host.signals());
//! device_ctl.attach_signals(device.signals());
//!
//! let tx = host.open_service_endpoint(1, EndpointFlags::NONE, 1)?;
//! let rx = device.open_service_endpoint(1, EndpointFlags::NONE, 1)?;
//!
//! host.write(&tx, "hello", WriteFlags::NONE)?;
//! host.process(); // frame out
//! device.process(); // frame in, ack out
//! host.process(); // ack in, frame released
//!
//! assert_eq!(&device.read(&rx)?[..], b"hello");
//! assert_eq!(host.frames_in_use(), 0);
//! # Ok::<(), copro_link::LinkError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

pub mod config;
pub mod driver;
pub mod endpoint;
pub mod hdlc;
pub mod link;
pub mod pool;
pub mod timer;
pub mod transport;

// Tokio host (feature-gated)
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub mod runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::config::{LinkConfig, PollFinalPolicy, PoolConfig};
    pub use crate::driver::{DriverControl, MemoryDriver};
    pub use crate::endpoint::{
        EndpointCounters, EndpointFlags, EndpointHandle, EndpointOption, EndpointState, WriteFlags,
    };
    pub use crate::hdlc::{FrameKind, RejectReason, SequenceModulus, UnnumberedKind};
    pub use crate::link::{Link, LinkCounters};
    pub use crate::pool::FixedPool;
    pub use crate::timer::DeadlineTimers;
    pub use crate::transport::{FrameId, WorkSignals};

    #[cfg(feature = "runtime")]
    pub use crate::runtime::{LinkService, SharedLink};
}

// Re-export commonly used items at crate root
pub use crate::config::{LinkConfig, PollFinalPolicy, PoolConfig};
pub use crate::core::{CloseError, LinkError, LinkResult};
pub use crate::link::{Link, LinkCounters};

#[cfg(feature = "runtime")]
pub use crate::runtime::{LinkService, SharedLink};
