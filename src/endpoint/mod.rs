//! Endpoints: the unit of multiplexing.
//!
//! - **State**: [`Endpoint`] with its lifecycle [`EndpointState`]
//! - **Handles**: [`EndpointHandle`] with per-call reference counting
//! - **Registry**: [`EndpointRegistry`], sorted by id

#[allow(clippy::module_inception)]
mod endpoint;
mod handle;
mod registry;

pub use endpoint::*;
pub(crate) use handle::HandleShared;
pub use handle::{EndpointHandle, HandleGuard};
pub use registry::EndpointRegistry;
