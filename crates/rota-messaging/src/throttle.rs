use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Why a refresh was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSkip {
    /// The previous refresh started less than the minimum interval ago.
    Throttled,
    /// Another refresh is still running.
    InFlight,
}

/// Minimum-interval and single-flight guard for feed refreshes.
#[derive(Debug)]
pub struct RefreshThrottle {
    min_interval: Duration,
    state: Mutex<ThrottleState>,
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_started: Option<Instant>,
    in_flight: bool,
}

/// Held while a refresh runs; releases the in-flight flag on drop.
#[derive(Debug)]
pub struct RefreshPermit<'a> {
    throttle: &'a RefreshThrottle,
}

impl Drop for RefreshPermit<'_> {
    fn drop(&mut self) {
        self.throttle.lock_state().in_flight = false;
    }
}

impl RefreshThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Starts a refresh if allowed. `force` skips the interval check only.
    pub fn try_begin(&self, force: bool) -> Result<RefreshPermit<'_>, RefreshSkip> {
        let mut state = self.lock_state();
        if state.in_flight {
            return Err(RefreshSkip::InFlight);
        }
        let now = Instant::now();
        if !force {
            if let Some(last) = state.last_started {
                if now.duration_since(last) < self.min_interval {
                    return Err(RefreshSkip::Throttled);
                }
            }
        }
        state.in_flight = true;
        state.last_started = Some(now);
        Ok(RefreshPermit { throttle: self })
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock_state().in_flight
    }

    fn lock_state(&self) -> MutexGuard<'_, ThrottleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
