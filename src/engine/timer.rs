use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TimerError {
    #[error("timer already started")]
    AlreadyStarted,
    #[error("timer duration must be positive")]
    ZeroDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerTick {
    /// Not started, stopped, or already expired.
    Idle,
    Running { remaining_seconds: u64 },
    /// Returned by exactly one tick: the first one that observes the deadline.
    Expired,
}

/// Countdown anchored on an absolute deadline.
///
/// Remaining time is always recomputed from `deadline - now`, so ticks that the host
/// delays or drops (a throttled background tab, a stalled scheduler) only show up as a
/// larger step on the next tick instead of accumulated drift.
#[derive(Debug, Default)]
pub(crate) struct CountdownTimer {
    deadline_ms: Option<i64>,
    duration_seconds: u64,
    last_remaining: u64,
    expired: bool,
    stopped: bool,
}

impl CountdownTimer {
    pub(crate) fn start(&mut self, now_ms: i64, duration_seconds: u64) -> Result<i64, TimerError> {
        if self.deadline_ms.is_some() {
            return Err(TimerError::AlreadyStarted);
        }
        if duration_seconds == 0 {
            return Err(TimerError::ZeroDuration);
        }

        let deadline = now_ms.saturating_add((duration_seconds as i64).saturating_mul(1000));
        self.deadline_ms = Some(deadline);
        self.duration_seconds = duration_seconds;
        self.last_remaining = duration_seconds;
        Ok(deadline)
    }

    /// Whole seconds left, rounded up. Never increases, even if the clock steps back.
    pub(crate) fn remaining(&self, now_ms: i64) -> u64 {
        let Some(deadline) = self.deadline_ms else {
            return 0;
        };
        if self.expired {
            return 0;
        }

        let left_ms = deadline.saturating_sub(now_ms).max(0) as u64;
        left_ms.div_ceil(1000).min(self.last_remaining)
    }

    pub(crate) fn tick(&mut self, now_ms: i64) -> TimerTick {
        if self.deadline_ms.is_none() || self.stopped || self.expired {
            return TimerTick::Idle;
        }

        let remaining = self.remaining(now_ms);
        self.last_remaining = remaining;
        if remaining == 0 {
            self.expired = true;
            return TimerTick::Expired;
        }

        TimerTick::Running { remaining_seconds: remaining }
    }

    /// Stops the countdown for good; a stopped timer never expires.
    pub(crate) fn stop(&mut self) {
        self.stopped = true;
    }

    pub(crate) fn deadline_ms(&self) -> Option<i64> {
        self.deadline_ms
    }

    #[cfg(test)]
    pub(crate) fn duration_seconds(&self) -> u64 {
        self.duration_seconds
    }

    #[cfg(test)]
    pub(crate) fn is_expired(&self) -> bool {
        self.expired
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.deadline_ms.is_some() && !self.stopped && !self.expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_second_timer_fires_exactly_once() {
        let mut timer = CountdownTimer::default();
        timer.start(0, 1).unwrap();

        let mut expirations = 0;
        for now in [250, 500, 999, 1000, 1001, 2000, 5000] {
            if timer.tick(now) == TimerTick::Expired {
                expirations += 1;
            }
        }

        assert_eq!(expirations, 1);
        assert!(timer.is_expired());
        assert_eq!(timer.remaining(5000), 0);
    }

    #[test]
    fn advancing_exactly_one_second_expires() {
        let mut timer = CountdownTimer::default();
        timer.start(10_000, 1).unwrap();
        assert_eq!(timer.tick(10_000), TimerTick::Running { remaining_seconds: 1 });
        assert_eq!(timer.tick(11_000), TimerTick::Expired);
        assert_eq!(timer.tick(11_000), TimerTick::Idle);
    }

    #[test]
    fn missed_ticks_are_reflected_from_deadline() {
        let mut timer = CountdownTimer::default();
        timer.start(0, 60).unwrap();
        assert_eq!(timer.tick(1_000), TimerTick::Running { remaining_seconds: 59 });

        // Host suspended us for 40 seconds; no catch-up ticks are replayed.
        assert_eq!(timer.tick(41_000), TimerTick::Running { remaining_seconds: 19 });
        assert_eq!(timer.tick(61_500), TimerTick::Expired);
    }

    #[test]
    fn remaining_never_increases_when_clock_steps_back() {
        let mut timer = CountdownTimer::default();
        timer.start(0, 30).unwrap();
        assert_eq!(timer.tick(20_000), TimerTick::Running { remaining_seconds: 10 });
        assert_eq!(timer.tick(5_000), TimerTick::Running { remaining_seconds: 10 });
        assert_eq!(timer.remaining(1_000), 10);
    }

    #[test]
    fn remaining_rounds_partial_seconds_up() {
        let mut timer = CountdownTimer::default();
        timer.start(0, 5).unwrap();
        assert_eq!(timer.remaining(4_001), 1);
        assert_eq!(timer.remaining(3_999), 2);
    }

    #[test]
    fn stopped_timer_never_expires() {
        let mut timer = CountdownTimer::default();
        timer.start(0, 1).unwrap();
        timer.stop();
        assert_eq!(timer.tick(10_000), TimerTick::Idle);
        assert!(!timer.is_expired());
        assert!(!timer.is_running());
    }

    #[test]
    fn start_rejects_restart_and_zero_duration() {
        let mut timer = CountdownTimer::default();
        assert_eq!(timer.start(0, 0), Err(TimerError::ZeroDuration));
        assert_eq!(timer.start(0, 10), Ok(10_000));
        assert_eq!(timer.start(5, 10), Err(TimerError::AlreadyStarted));
        assert_eq!(timer.deadline_ms(), Some(10_000));
        assert_eq!(timer.duration_seconds(), 10);
    }

    #[test]
    fn unstarted_timer_is_idle() {
        let mut timer = CountdownTimer::default();
        assert_eq!(timer.tick(0), TimerTick::Idle);
        assert_eq!(timer.remaining(0), 0);
    }
}
