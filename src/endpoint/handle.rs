//! Application handles to endpoints.
//!
//! Every API entry takes a reference on the handle for its duration. A
//! close is refused while any other reference is held, so an endpoint is
//! never torn down under a call that is still using it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::core::LinkError;

/// State shared between a handle, its clones and the endpoint.
#[derive(Debug)]
pub(crate) struct HandleShared {
    refs: AtomicU32,
    released: AtomicBool,
}

impl Default for HandleShared {
    fn default() -> Self {
        Self {
            refs: AtomicU32::new(1),
            released: AtomicBool::new(false),
        }
    }
}

/// Opaque handle returned by the open calls.
///
/// Clones refer to the same endpoint instance. Once the endpoint is closed
/// every clone reports [`LinkError::Ownership`].
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    id: u8,
    shared: Arc<HandleShared>,
}

impl EndpointHandle {
    pub(crate) fn new(id: u8) -> Self {
        Self {
            id,
            shared: Arc::new(HandleShared::default()),
        }
    }

    /// Endpoint id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Outstanding references: one for the handle plus one per active entry.
    pub fn ref_count(&self) -> u32 {
        self.shared.refs.load(Ordering::Acquire)
    }

    /// Check if the endpoint behind this handle was closed.
    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Take a reference for the duration of an API call.
    pub fn enter(&self) -> Result<HandleGuard, LinkError> {
        if self.is_released() {
            return Err(LinkError::Ownership);
        }
        self.shared.refs.fetch_add(1, Ordering::AcqRel);
        Ok(HandleGuard {
            shared: Arc::clone(&self.shared),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<HandleShared> {
        &self.shared
    }

    pub(crate) fn release(&self) {
        self.shared.released.store(true, Ordering::Release);
    }

    pub(crate) fn refers_to(&self, shared: &Arc<HandleShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }
}

/// Reference held for one API call, dropped on exit.
#[derive(Debug)]
pub struct HandleGuard {
    shared: Arc<HandleShared>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.shared.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_starts_with_one_reference() {
        let handle = EndpointHandle::new(7);
        assert_eq!(handle.id(), 7);
        assert_eq!(handle.ref_count(), 1);
        assert!(!handle.is_released());
    }

    #[test]
    fn test_enter_and_exit() {
        let handle = EndpointHandle::new(7);
        {
            let _outer = handle.enter().unwrap();
            let _inner = handle.enter().unwrap();
            assert_eq!(handle.ref_count(), 3);
        }
        assert_eq!(handle.ref_count(), 1);
    }

    #[test]
    fn test_clones_share_references() {
        let handle = EndpointHandle::new(7);
        let clone = handle.clone();
        let _guard = clone.enter().unwrap();
        assert_eq!(handle.ref_count(), 2);
        assert!(handle.refers_to(clone.shared()));
    }

    #[test]
    fn test_released_handle_is_stale() {
        let handle = EndpointHandle::new(7);
        let clone = handle.clone();
        handle.release();
        assert_eq!(clone.enter().unwrap_err(), LinkError::Ownership);
    }
}
