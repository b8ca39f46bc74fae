//! Deadline-based timer service.
//!
//! Ticks are milliseconds. Expired timers are collected by the host with
//! [`DeadlineTimers::take_expired`] and fed back to the engine, which
//! [`Link::poll_timers`](crate::Link::poll_timers) does in one call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::{Tick, TimerId, TimerService};

#[derive(Debug, Clone, Copy)]
enum Clock {
    /// Driven only by `advance`.
    Manual,
    /// Wall-clock milliseconds since creation.
    Monotonic(Instant),
}

/// One-shot timers keyed by [`TimerId`].
#[derive(Debug, Clone)]
pub struct DeadlineTimers {
    clock: Clock,
    offset: Tick,
    deadlines: HashMap<TimerId, Tick>,
}

impl DeadlineTimers {
    /// Timers on the monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::Monotonic(Instant::now()))
    }

    /// Timers on a clock that only moves through [`advance`](Self::advance).
    pub fn manual() -> Self {
        Self::with_clock(Clock::Manual)
    }

    fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            offset: 0,
            deadlines: HashMap::new(),
        }
    }

    /// Move the clock forward.
    pub fn advance(&mut self, ticks: Tick) {
        self.offset = self.offset.saturating_add(ticks);
    }

    /// Check if a timer is armed.
    pub fn is_armed(&self, timer: TimerId) -> bool {
        self.deadlines.contains_key(&timer)
    }

    /// Deadline of an armed timer.
    pub fn deadline(&self, timer: TimerId) -> Option<Tick> {
        self.deadlines.get(&timer).copied()
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Tick> {
        self.deadlines.values().min().copied()
    }

    /// Time left until the earliest deadline, zero if already due.
    pub fn time_until_next(&self) -> Option<Duration> {
        let now = self.now();
        self.next_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now)))
    }

    /// Disarm and return every due timer, earliest first.
    pub fn take_expired(&mut self) -> Vec<TimerId> {
        let now = self.now();
        let mut due: Vec<(Tick, TimerId)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(timer, deadline)| (*deadline, *timer))
            .collect();
        due.sort_by_key(|(deadline, timer)| (*deadline, timer.endpoint));

        for (_, timer) in &due {
            self.deadlines.remove(timer);
        }
        due.into_iter().map(|(_, timer)| timer).collect()
    }
}

impl Default for DeadlineTimers {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for DeadlineTimers {
    fn now(&self) -> Tick {
        let base = match self.clock {
            Clock::Manual => 0,
            Clock::Monotonic(start) => start.elapsed().as_millis() as Tick,
        };
        base.saturating_add(self.offset)
    }

    fn restart(&mut self, timer: TimerId, ticks: Tick) {
        let deadline = self.now().saturating_add(ticks);
        self.deadlines.insert(timer, deadline);
    }

    fn stop(&mut self, timer: TimerId) {
        self.deadlines.remove(&timer);
    }
}
