//! Registry of live endpoints, kept sorted by id.

use std::ops::RangeInclusive;

use super::endpoint::{Endpoint, EndpointState};
use crate::core::LinkError;

/// Live endpoints, at most `capacity` at once.
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
    capacity: usize,
}

impl EndpointRegistry {
    /// Create an empty registry.
    pub fn new(capacity: usize) -> Self {
        Self {
            endpoints: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Find an endpoint by id.
    ///
    /// # Panics
    ///
    /// Panics if a freed endpoint is still registered.
    pub fn find(&self, id: u8) -> Option<&Endpoint> {
        let ep = self.endpoints.iter().find(|ep| ep.id == id)?;
        assert!(
            ep.state != EndpointState::Freed,
            "freed endpoint {id} still registered"
        );
        Some(ep)
    }

    /// Find an endpoint by id, mutably.
    ///
    /// # Panics
    ///
    /// Panics if a freed endpoint is still registered.
    pub fn find_mut(&mut self, id: u8) -> Option<&mut Endpoint> {
        let ep = self.endpoints.iter_mut().find(|ep| ep.id == id)?;
        assert!(
            ep.state != EndpointState::Freed,
            "freed endpoint {id} still registered"
        );
        Some(ep)
    }

    /// Check if an endpoint with this id is registered.
    pub fn contains(&self, id: u8) -> bool {
        self.find(id).is_some()
    }

    /// Insert a new endpoint, keeping ids sorted.
    pub fn insert(&mut self, endpoint: Endpoint) -> Result<(), LinkError> {
        if self.is_full() {
            return Err(LinkError::NoMoreResource);
        }
        match self.endpoints.binary_search_by_key(&endpoint.id, |ep| ep.id) {
            Ok(_) => Err(LinkError::AlreadyExists),
            Err(pos) => {
                self.endpoints.insert(pos, endpoint);
                Ok(())
            }
        }
    }

    /// Remove an endpoint.
    pub fn remove(&mut self, id: u8) -> Option<Endpoint> {
        let pos = self.endpoints.iter().position(|ep| ep.id == id)?;
        Some(self.endpoints.remove(pos))
    }

    /// Lowest id in `range` not in use.
    pub fn first_free_in(&self, range: RangeInclusive<u8>) -> Option<u8> {
        range.into_iter().find(|id| !self.contains(*id))
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<u8> {
        self.endpoints.iter().map(|ep| ep.id).collect()
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Check if no endpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Check if the endpoint pool is exhausted.
    pub fn is_full(&self) -> bool {
        self.endpoints.len() >= self.capacity
    }
}
