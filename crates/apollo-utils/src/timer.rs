//! Elapsed-time measurement.

use std::time::{Duration, Instant};

/// Measures how long a poll round (or any other span) took.
///
/// ```
/// use apollo_utils::Timer;
/// use std::time::Duration;
///
/// let timer = Timer::start();
/// assert!(timer.elapsed() < Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Starts a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the instant the timer started.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.start
    }

    /// Returns the elapsed time since the timer was started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_millis(&self) -> u128 {
        self.elapsed().as_millis()
    }

    /// Returns the instant `timeout` after the start.
    #[must_use]
    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.start + timeout
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_elapsed() {
        let timer = Timer::start();
        std::thread::sleep(Duration::from_millis(1));
        assert!(timer.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn test_deadline() {
        let timer = Timer::start();
        assert_eq!(
            timer.deadline(Duration::from_secs(2)),
            timer.started_at() + Duration::from_secs(2)
        );
    }
}
