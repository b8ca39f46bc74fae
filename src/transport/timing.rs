//! Retransmission timeout estimation.
//!
//! RFC 6298 smoothing in integer ticks. Samples must come from frames that
//! were never retransmitted (Karn's algorithm); the caller enforces that.

use crate::core::Tick;

/// Bounds and seed value of the estimator, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtoBounds {
    /// Timeout before the first sample.
    pub initial: Tick,
    /// Lower clamp of the timeout.
    pub min: Tick,
    /// Upper clamp of the timeout.
    pub max: Tick,
    /// Floor of the RTT variation.
    pub min_variation: Tick,
}

/// Per-endpoint RTO estimator.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    smoothed_rtt: Tick,
    rtt_variation: Tick,
    re_transmit_timeout: Tick,
    initialized: bool,
    bounds: RtoBounds,
}

impl RtoEstimator {
    /// Create an estimator seeded with `bounds.initial`.
    pub fn new(bounds: RtoBounds) -> Self {
        Self {
            smoothed_rtt: 0,
            rtt_variation: 0,
            re_transmit_timeout: bounds.initial.clamp(bounds.min, bounds.max),
            initialized: false,
            bounds,
        }
    }

    /// Update with one round-trip sample.
    ///
    /// - First sample: SRTT = R, RTTVAR = R / 2
    /// - Subsequent: RTTVAR = 3/4 RTTVAR + 1/4 |SRTT - R|, SRTT = 7/8 SRTT + 1/8 R
    /// - RTO = SRTT + 4 RTTVAR, clamped to the bounds
    pub fn update(&mut self, round_trip_time: Tick) {
        if !self.initialized {
            self.smoothed_rtt = round_trip_time;
            self.rtt_variation = round_trip_time / 2;
            self.initialized = true;
        } else {
            let delta = self.smoothed_rtt.abs_diff(round_trip_time);
            self.rtt_variation = (self.rtt_variation.saturating_mul(3) + delta) / 4;
            self.smoothed_rtt = (self.smoothed_rtt.saturating_mul(7) + round_trip_time) / 8;
        }

        self.rtt_variation = self.rtt_variation.max(self.bounds.min_variation);

        let rto = self
            .smoothed_rtt
            .saturating_add(self.rtt_variation.saturating_mul(4));
        self.re_transmit_timeout = rto.clamp(self.bounds.min, self.bounds.max);
    }

    /// Double the timeout after an expiry, capped at the upper bound.
    pub fn backoff(&mut self) -> Tick {
        self.re_transmit_timeout = self
            .re_transmit_timeout
            .saturating_mul(2)
            .min(self.bounds.max);
        self.re_transmit_timeout
    }

    /// Current timeout.
    pub fn timeout(&self) -> Tick {
        self.re_transmit_timeout
    }

    /// Smoothed round-trip time.
    pub fn smoothed_rtt(&self) -> Tick {
        self.smoothed_rtt
    }

    /// Round-trip time variation.
    pub fn rtt_variation(&self) -> Tick {
        self.rtt_variation
    }

    /// Check if at least one sample was taken.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> RtoBounds {
        RtoBounds {
            initial: 100,
            min: 50,
            max: 5000,
            min_variation: 5,
        }
    }

    #[test]
    fn test_rto_estimator_initial() {
        let estimator = RtoEstimator::new(bounds());
        assert!(!estimator.is_initialized());
        assert_eq!(estimator.timeout(), 100);
    }

    #[test]
    fn test_rto_estimator_first_sample() {
        let mut estimator = RtoEstimator::new(bounds());
        estimator.update(40);

        assert!(estimator.is_initialized());
        assert_eq!(estimator.smoothed_rtt(), 40);
        assert_eq!(estimator.rtt_variation(), 20);
        assert_eq!(estimator.timeout(), 40 + 4 * 20);
    }

    #[test]
    fn test_rto_estimator_second_sample() {
        let mut estimator = RtoEstimator::new(bounds());
        estimator.update(40);
        estimator.update(80);

        // delta = 40, var = (3*20 + 40)/4 = 25, srtt = (7*40 + 80)/8 = 45
        assert_eq!(estimator.rtt_variation(), 25);
        assert_eq!(estimator.smoothed_rtt(), 45);
        assert_eq!(estimator.timeout(), 145);
    }

    #[test]
    fn test_rto_estimator_variation_floor() {
        let mut estimator = RtoEstimator::new(bounds());
        for _ in 0..50 {
            estimator.update(200);
        }

        assert_eq!(estimator.rtt_variation(), 5);
        assert_eq!(estimator.timeout(), 200 + 20);
    }

    #[test]
    fn test_rto_estimator_min_rto() {
        let mut estimator = RtoEstimator::new(bounds());
        estimator.update(1);

        assert_eq!(estimator.timeout(), 50);
    }

    #[test]
    fn test_rto_estimator_backoff() {
        let mut estimator = RtoEstimator::new(bounds());
        estimator.update(100);

        let rto1 = estimator.timeout();
        let rto2 = estimator.backoff();
        assert_eq!(rto2, rto1 * 2);
    }

    #[test]
    fn test_rto_estimator_max_rto() {
        let mut estimator = RtoEstimator::new(bounds());
        estimator.update(100);

        for _ in 0..20 {
            estimator.backoff();
        }
        assert_eq!(estimator.timeout(), 5000);

        estimator.update(100_000);
        assert_eq!(estimator.timeout(), 5000);
    }

    #[test]
    fn test_rto_stays_within_bounds() {
        let mut estimator = RtoEstimator::new(bounds());
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;

        for _ in 0..1000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let sample = (state >> 33) % 20_000;
            estimator.update(sample);

            let rto = estimator.timeout();
            assert!((50..=5000).contains(&rto), "rto {rto} out of bounds");
        }
    }
}
