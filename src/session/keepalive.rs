//! Keepalive (heartbeat) discipline for an open [`Session`].
//!
//! Grounded in the teacher's `Heartbeat`: an idle watchdog that fires a
//! ping after a period of silence and declares the connection dead if no
//! reply follows within a second window. This rendition folds the
//! ping/pong round trip into the `SessionKeepalive`/`SessionKeepaliveReply`
//! pair the [`Session`] already speaks, rather than a protocol-level
//! ping/pong frame, and counts consecutive failures instead of a single
//! idle timeout.
//!
//! [`Session`]: super::Session

use std::time::Duration;

/// Tracks time-since-last-activity and consecutive keepalive failures for
/// one open session.
#[derive(Debug)]
pub struct KeepaliveState {
    interval: Duration,
    max_failures: u32,
    outstanding_failures: u32,
}

impl KeepaliveState {
    /// Creates a fresh [`KeepaliveState`] for the given interval/threshold.
    #[must_use]
    pub fn new(interval: Duration, max_failures: u32) -> Self {
        Self {
            interval,
            max_failures,
            outstanding_failures: 0,
        }
    }

    /// Interval of silence after which a keepalive should be sent.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records that a keepalive was sent without (yet) receiving a reply.
    ///
    /// Returns `true` if the failure threshold has now been reached and the
    /// session should be considered dead.
    pub fn record_sent(&mut self) -> bool {
        self.outstanding_failures += 1;
        self.outstanding_failures >= self.max_failures
    }

    /// Records that a matching [`SessionKeepaliveReply`] (or any other
    /// evidence of liveness) was observed, resetting the failure counter.
    ///
    /// [`SessionKeepaliveReply`]: crate::codec::ServerMsg::SessionKeepaliveReply
    pub fn record_reply(&mut self) {
        self.outstanding_failures = 0;
    }

    /// Number of consecutive unanswered keepalives so far.
    #[must_use]
    pub fn outstanding_failures(&self) -> u32 {
        self.outstanding_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_max_failures() {
        let mut ka = KeepaliveState::new(Duration::from_millis(100), 2);
        assert!(!ka.record_sent());
        assert!(ka.record_sent());
    }

    #[test]
    fn reply_resets_counter() {
        let mut ka = KeepaliveState::new(Duration::from_millis(100), 2);
        assert!(!ka.record_sent());
        ka.record_reply();
        assert_eq!(ka.outstanding_failures(), 0);
        assert!(!ka.record_sent());
    }
}
