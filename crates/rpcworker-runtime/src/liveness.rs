//! Heartbeat/disown bookkeeping.
//!
//! Two timers cooperate:
//! - the heartbeat timer fires every `heartbeat_interval`, sends a HEARTBEAT
//!   and (re)arms the disown deadline;
//! - the disown deadline fires `disown_timeout` after arming unless a HEARTBEAT
//!   from the control plane disarmed it first.
//!
//! Worst-case detection of a dead peer is `heartbeat_interval + disown_timeout`.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::StartupError;

/// Timer settings for the liveness protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Period of outbound heartbeats. Default: 5s.
    pub heartbeat_interval: Duration,
    /// How long to wait for the peer after a heartbeat. Default: 2s.
    pub disown_timeout: Duration,
}

impl LivenessConfig {
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.heartbeat_interval.is_zero() {
            return Err(StartupError::ZeroInterval("heartbeat interval"));
        }
        if self.disown_timeout.is_zero() {
            return Err(StartupError::ZeroInterval("disown timeout"));
        }
        Ok(())
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            disown_timeout: Duration::from_secs(2),
        }
    }
}

/// The single disown deadline. At most one is pending at a time.
#[derive(Debug, Clone)]
pub struct Liveness {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Liveness {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Arm, replacing any pending deadline.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    /// Cancel the pending deadline, if any. Returns whether one was pending.
    pub fn disarm(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// True when a deadline is armed and `now` has reached it.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let config = LivenessConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.disown_timeout, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_intervals_rejected() {
        let config = LivenessConfig {
            disown_timeout: Duration::ZERO,
            ..LivenessConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StartupError::ZeroInterval("disown timeout"))
        ));
    }

    #[test]
    fn arm_expire_and_disarm() {
        let start = Instant::now();
        let mut liveness = Liveness::new(Duration::from_secs(2));
        assert!(!liveness.is_armed());
        assert!(!liveness.is_expired(start + Duration::from_secs(60)));

        liveness.arm(start);
        assert_eq!(liveness.deadline(), Some(start + Duration::from_secs(2)));
        assert!(!liveness.is_expired(start + Duration::from_secs(1)));
        assert!(liveness.is_expired(start + Duration::from_secs(2)));

        assert!(liveness.disarm());
        assert!(!liveness.disarm());
        assert!(!liveness.is_expired(start + Duration::from_secs(5)));
    }

    #[test]
    fn rearm_replaces_pending_deadline() {
        let start = Instant::now();
        let mut liveness = Liveness::new(Duration::from_secs(2));
        liveness.arm(start);
        liveness.arm(start + Duration::from_secs(5));
        assert_eq!(liveness.deadline(), Some(start + Duration::from_secs(7)));
        assert!(!liveness.is_expired(start + Duration::from_secs(3)));
    }
}
