//! Fixed-capacity accounting pool.
//!
//! Buffers themselves live in the engine's arena. This pool only bounds how
//! many of each kind may be live at once, the way a static allocator would
//! on the target.

use std::collections::HashMap;

use crate::config::PoolConfig;
use crate::core::{Pool, PoolError, PoolKind};

#[derive(Debug, Clone, Copy, Default)]
struct Usage {
    capacity: usize,
    in_use: usize,
}

/// Pool with a fixed capacity per kind.
#[derive(Debug, Clone)]
pub struct FixedPool {
    usage: HashMap<PoolKind, Usage>,
}

impl FixedPool {
    /// Create a pool with the given capacities.
    pub fn new(config: PoolConfig) -> Self {
        let usage = [
            (PoolKind::FrameBuffer, config.frame_buffers),
            (PoolKind::DataItem, config.data_items),
            (PoolKind::SupervisoryItem, config.supervisory_items),
            (PoolKind::RxEntry, config.rx_entries),
        ]
        .into_iter()
        .map(|(kind, capacity)| (kind, Usage { capacity, in_use: 0 }))
        .collect();
        Self { usage }
    }

    /// Entries of `kind` currently taken.
    pub fn in_use(&self, kind: PoolKind) -> usize {
        self.usage.get(&kind).map_or(0, |u| u.in_use)
    }

    /// Entries of `kind` still available.
    pub fn available(&self, kind: PoolKind) -> usize {
        self.usage
            .get(&kind)
            .map_or(0, |u| u.capacity.saturating_sub(u.in_use))
    }
}

impl Default for FixedPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Pool for FixedPool {
    fn acquire(&mut self, kind: PoolKind) -> Result<(), PoolError> {
        let usage = self.usage.entry(kind).or_default();
        if usage.in_use >= usage.capacity {
            return Err(PoolError::Exhausted);
        }
        usage.in_use += 1;
        Ok(())
    }

    fn release(&mut self, kind: PoolKind) {
        if let Some(usage) = self.usage.get_mut(&kind) {
            debug_assert!(usage.in_use > 0, "{kind:?} released more than acquired");
            usage.in_use = usage.in_use.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let mut pool = FixedPool::new(PoolConfig {
            supervisory_items: 2,
            ..PoolConfig::default()
        });

        assert!(pool.acquire(PoolKind::SupervisoryItem).is_ok());
        assert!(pool.acquire(PoolKind::SupervisoryItem).is_ok());
        assert_eq!(
            pool.acquire(PoolKind::SupervisoryItem),
            Err(PoolError::Exhausted)
        );
        assert_eq!(pool.in_use(PoolKind::SupervisoryItem), 2);

        pool.release(PoolKind::SupervisoryItem);
        assert_eq!(pool.available(PoolKind::SupervisoryItem), 1);
        assert!(pool.acquire(PoolKind::SupervisoryItem).is_ok());
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut pool = FixedPool::new(PoolConfig {
            data_items: 0,
            ..PoolConfig::default()
        });

        assert!(pool.acquire(PoolKind::DataItem).is_err());
        assert!(pool.acquire(PoolKind::FrameBuffer).is_ok());
        assert_eq!(pool.in_use(PoolKind::DataItem), 0);
    }
}
