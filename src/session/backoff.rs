//! Fixed-interval reconnect delay.
//!
//! Grounded in the teacher's `BackoffDelayer`, which wraps the [`backoff`]
//! crate's [`ExponentialBackoff`] behind a custom [`Sleeper`][1]. This
//! rendition configures that same mechanism with `multiplier = 1.0` and
//! `randomization_factor = 0.0`, turning it into a fixed-interval delay —
//! satisfying the "linear, not exponential" reconnect requirement without
//! abandoning the teacher's retry plumbing.
//!
//! [1]: backoff::future::Sleeper

use std::time::Duration;

use backoff::ExponentialBackoff;

/// Produces the fixed interval waited between reconnect attempts.
#[derive(Clone, Debug)]
pub struct ReconnectDelay(ExponentialBackoff);

impl ReconnectDelay {
    /// Creates a new fixed-interval delay of exactly `interval`.
    #[must_use]
    pub fn fixed(interval: Duration) -> Self {
        let mut backoff = ExponentialBackoff {
            current_interval: interval,
            initial_interval: interval,
            multiplier: 1.0,
            randomization_factor: 0.0,
            max_interval: interval,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        backoff.reset();
        Self(backoff)
    }

    /// Returns the next delay to wait before another reconnect attempt.
    ///
    /// With a fixed interval this always returns the same [`Duration`]; the
    /// underlying [`ExponentialBackoff`] is still stepped so a future
    /// switch to a non-fixed policy only requires changing [`Self::fixed`].
    pub fn next_delay(&mut self) -> Duration {
        use backoff::backoff::Backoff;
        self.0.next_backoff().unwrap_or(self.0.initial_interval)
    }

    /// Resets the delay back to its initial interval.
    pub fn reset(&mut self) {
        use backoff::backoff::Backoff;
        self.0.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_fixed_across_calls() {
        let mut delay = ReconnectDelay::fixed(Duration::from_millis(250));
        let first = delay.next_delay();
        let second = delay.next_delay();
        assert_eq!(first, Duration::from_millis(250));
        assert_eq!(second, Duration::from_millis(250));
    }
}
