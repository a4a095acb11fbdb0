//! Retry delays for the persistent channel.
//!
//! A fresh [`RetryBackoff`] is built for every invocation, so a long failure
//! streak in one call never lengthens the first retry of the next.

use std::time::Duration;

/// Doubling retry delay bounded by a floor and a ceiling.
///
/// The first delay is the floor; each later one doubles until it reaches
/// the ceiling and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    max: Duration,
    current: Duration,
}

impl RetryBackoff {
    /// A floor above the ceiling is lowered to the ceiling.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            max,
            current: min.min(max),
        }
    }

    /// Returns the delay to wait now and advances to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }
}
