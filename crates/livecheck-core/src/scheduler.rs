//! Timer abstraction driving the verification loop.
//!
//! The verifier never sleeps or spawns. It asks a [`Scheduler`] to start or
//! cancel repeating timers, and the host delivers each expiry back through
//! [`Verifier::on_timer`](crate::verifier::Verifier::on_timer). Every timer
//! carries a fresh generation so fires that were already in flight when the
//! timer was cancelled can be recognised and dropped.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Detection loop tick.
    Sampling,
    /// One-second countdown decrement.
    Countdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Host-side timer service.
pub trait Scheduler {
    /// Fire `id` every `period` until cancelled.
    fn start(&mut self, id: TimerId, period: Duration);
    /// Stop `id`. Cancelling an unknown or already cancelled timer is a no-op.
    fn cancel(&mut self, id: TimerId);
}

/// Scheduler that only records which timers are active.
///
/// Used by tests and the offline replay, which fire timers themselves.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    active: HashMap<TimerId, Duration>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active timer of the given kind, if any.
    pub fn active(&self, kind: TimerKind) -> Option<TimerId> {
        self.active.keys().find(|id| id.kind == kind).copied()
    }

    pub fn period(&self, id: TimerId) -> Option<Duration> {
        self.active.get(&id).copied()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl Scheduler for ManualScheduler {
    fn start(&mut self, id: TimerId, period: Duration) {
        self.active.insert(id, period);
    }

    fn cancel(&mut self, id: TimerId) {
        self.active.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_scheduler_tracks_timers() {
        let mut s = ManualScheduler::new();
        let sampling = TimerId { kind: TimerKind::Sampling, generation: 1 };
        let countdown = TimerId { kind: TimerKind::Countdown, generation: 2 };

        s.start(sampling, Duration::from_millis(100));
        s.start(countdown, Duration::from_secs(1));
        assert_eq!(s.active_count(), 2);
        assert_eq!(s.active(TimerKind::Countdown), Some(countdown));
        assert_eq!(s.period(sampling), Some(Duration::from_millis(100)));

        s.cancel(countdown);
        s.cancel(countdown);
        assert_eq!(s.active(TimerKind::Countdown), None);
        assert_eq!(s.active_count(), 1);
    }
}
