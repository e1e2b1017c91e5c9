//! Log Rate Limiting
//!
//! Per-frame failure classes (dropped submissions, clamped sub-batches,
//! non-ready assets) would otherwise spam one line per frame. The frame
//! loop's contract is one status line per failure class per second;
//! [`RateLimiter`] enforces that window.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

/// Throttles an action (typically a `log::warn!`) to once per key per
/// window. Suppressed occurrences are counted and reported with the next
/// emitted line.
pub struct RateLimiter {
    window: Duration,
    classes: FxHashMap<&'static str, ClassState>,
}

struct ClassState {
    last_emit: Instant,
    suppressed: u64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            classes: FxHashMap::default(),
        }
    }

    /// One-second window, matching the frame-loop logging contract.
    #[must_use]
    pub fn per_second() -> Self {
        Self::new(Duration::from_secs(1))
    }

    /// Returns `Some(suppressed_count)` if the caller should emit now,
    /// `None` if the occurrence was swallowed by the window.
    pub fn check(&mut self, class: &'static str) -> Option<u64> {
        self.check_at(class, Instant::now())
    }

    /// Testable inner form taking an explicit timestamp.
    pub fn check_at(&mut self, class: &'static str, now: Instant) -> Option<u64> {
        match self.classes.get_mut(class) {
            None => {
                self.classes.insert(
                    class,
                    ClassState {
                        last_emit: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
            Some(state) => {
                if now.duration_since(state.last_emit) >= self.window {
                    let suppressed = state.suppressed;
                    state.last_emit = now;
                    state.suppressed = 0;
                    Some(suppressed)
                } else {
                    state.suppressed += 1;
                    None
                }
            }
        }
    }
}

/// Emits a rate-limited warning, appending the suppressed count when > 0.
#[macro_export]
macro_rules! warn_throttled {
    ($limiter:expr, $class:expr, $($arg:tt)*) => {
        if let Some(suppressed) = $limiter.check($class) {
            if suppressed > 0 {
                log::warn!("{} (+{suppressed} suppressed)", format_args!($($arg)*));
            } else {
                log::warn!($($arg)*);
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_emits() {
        let mut rl = RateLimiter::per_second();
        assert_eq!(rl.check("drop"), Some(0));
    }

    #[test]
    fn window_suppresses_and_counts() {
        let mut rl = RateLimiter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert_eq!(rl.check_at("drop", t0), Some(0));
        assert_eq!(rl.check_at("drop", t0 + Duration::from_millis(10)), None);
        assert_eq!(rl.check_at("drop", t0 + Duration::from_millis(20)), None);
        // Next window reports the two suppressed occurrences.
        assert_eq!(rl.check_at("drop", t0 + Duration::from_millis(1500)), Some(2));
    }

    #[test]
    fn classes_are_independent() {
        let mut rl = RateLimiter::per_second();
        let t0 = Instant::now();
        assert_eq!(rl.check_at("a", t0), Some(0));
        assert_eq!(rl.check_at("b", t0), Some(0));
        assert_eq!(rl.check_at("a", t0), None);
    }
}
