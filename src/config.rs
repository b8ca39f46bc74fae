//! Link configuration.

use std::time::Duration;

use crate::core::constants;
use crate::core::{LinkError, TimerService};
use crate::hdlc::SequenceModulus;
use crate::transport::RtoBounds;

/// Which endpoints may answer polls through their poll/final handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollFinalPolicy {
    /// Only the system endpoint.
    #[default]
    SystemEndpointOnly,
    /// Any endpoint with a handler installed.
    AnyEndpoint,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Sequence number range.
    pub modulus: SequenceModulus,
    /// Retransmission timeout before the first RTT sample.
    pub initial_rto: Duration,
    /// Lower clamp of the retransmission timeout.
    pub min_rto: Duration,
    /// Upper clamp of the retransmission timeout.
    pub max_rto: Duration,
    /// Floor of the RTT variation.
    pub min_rtt_variation: Duration,
    /// Retries of one frame before the retransmit timer gives up.
    pub max_re_transmit: u8,
    /// Bounded wait for the peer to confirm a close.
    pub close_timeout: Duration,
    /// Endpoints that may be open at once.
    pub max_endpoints: usize,
    /// Poll/final routing.
    pub poll_final_policy: PollFinalPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            modulus: SequenceModulus::default(),
            initial_rto: constants::INITIAL_RTO,
            min_rto: constants::MIN_RTO,
            max_rto: constants::MAX_RTO,
            min_rtt_variation: constants::MIN_RTT_VARIATION,
            max_re_transmit: constants::MAX_RE_TRANSMIT,
            close_timeout: constants::CLOSE_TIMEOUT,
            max_endpoints: constants::MAX_ENDPOINTS,
            poll_final_policy: PollFinalPolicy::default(),
        }
    }
}

impl LinkConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sequence number range.
    pub fn with_modulus(mut self, modulus: SequenceModulus) -> Self {
        self.modulus = modulus;
        self
    }

    /// Set the RTO seed and bounds.
    pub fn with_rto(mut self, initial: Duration, min: Duration, max: Duration) -> Self {
        self.initial_rto = initial;
        self.min_rto = min;
        self.max_rto = max;
        self
    }

    /// Set the RTT variation floor.
    pub fn with_min_rtt_variation(mut self, variation: Duration) -> Self {
        self.min_rtt_variation = variation;
        self
    }

    /// Set the retry ceiling.
    pub fn with_max_re_transmit(mut self, retries: u8) -> Self {
        self.max_re_transmit = retries;
        self
    }

    /// Set the close-acknowledgment wait.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the endpoint pool capacity.
    pub fn with_max_endpoints(mut self, count: usize) -> Self {
        self.max_endpoints = count;
        self
    }

    /// Set the poll/final routing.
    pub fn with_poll_final_policy(mut self, policy: PollFinalPolicy) -> Self {
        self.poll_final_policy = policy;
        self
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.min_rto > self.max_rto || self.max_endpoints == 0 {
            return Err(LinkError::InvalidParameter);
        }
        Ok(())
    }

    /// RTO bounds in the ticks of `timers`.
    pub(crate) fn rto_bounds(&self, timers: &impl TimerService) -> RtoBounds {
        let ticks = |d: Duration| timers.ms_to_ticks(d.as_millis() as u64);
        RtoBounds {
            initial: ticks(self.initial_rto),
            min: ticks(self.min_rto),
            max: ticks(self.max_rto),
            min_variation: ticks(self.min_rtt_variation),
        }
    }
}

/// Capacities of the fixed pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Frame buffers.
    pub frame_buffers: usize,
    /// Transmit items for data and unnumbered frames.
    pub data_items: usize,
    /// Transmit items for supervisory and control frames.
    pub supervisory_items: usize,
    /// Receive-queue entries across all endpoints.
    pub rx_entries: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            frame_buffers: constants::FRAME_BUFFER_POOL_SIZE,
            data_items: constants::DATA_ITEM_POOL_SIZE,
            supervisory_items: constants::SUPERVISORY_ITEM_POOL_SIZE,
            rx_entries: constants::RX_ENTRY_POOL_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.modulus, SequenceModulus::Four);
        assert_eq!(config.max_re_transmit, 5);
        assert_eq!(config.poll_final_policy, PollFinalPolicy::SystemEndpointOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = LinkConfig::new()
            .with_modulus(SequenceModulus::Eight)
            .with_rto(
                Duration::from_millis(200),
                Duration::from_millis(10),
                Duration::from_millis(900),
            )
            .with_max_endpoints(4)
            .with_poll_final_policy(PollFinalPolicy::AnyEndpoint);

        assert_eq!(config.modulus, SequenceModulus::Eight);
        assert_eq!(config.max_rto, Duration::from_millis(900));
        assert_eq!(config.max_endpoints, 4);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = LinkConfig::new().with_rto(
            Duration::from_millis(100),
            Duration::from_millis(500),
            Duration::from_millis(200),
        );
        assert_eq!(config.validate(), Err(LinkError::InvalidParameter));
    }
}
