//! # Heartbeat Monitor
//!
//! Pure bookkeeping for application-level liveness; the connection task owns
//! the timers and asks this type what to do when they fire.
//!
//! A ping is only sent when the server has been silent for at least half the
//! heartbeat interval, so a busy connection never carries heartbeat traffic.
//! Each unanswered ping counts as a missed pong; reaching the configured limit
//! declares the connection dead. While the client is hidden the pong timeout
//! doubles.

use std::time::{Duration, Instant};

/// Outcome of a missed pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Still tolerable; carries the consecutive miss count.
    Degraded(u32),
    /// Close the socket and reconnect.
    Dead,
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    pong_timeout: Duration,
    max_missed: u32,
    last_activity: Instant,
    ping_outstanding: Option<Instant>,
    missed: u32,
    hidden: bool,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, pong_timeout: Duration, max_missed: u32, now: Instant) -> Self {
        Self {
            interval,
            pong_timeout,
            max_missed: max_missed.max(1),
            last_activity: now,
            ping_outstanding: None,
            missed: 0,
            hidden: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Any inbound frame counts as activity.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// True when the server has been idle for at least half the interval and
    /// no ping is already waiting for its pong.
    pub fn should_ping(&self, now: Instant) -> bool {
        self.ping_outstanding.is_none()
            && now.saturating_duration_since(self.last_activity) >= self.interval / 2
    }

    pub fn ping_sent(&mut self, now: Instant) {
        self.ping_outstanding = Some(now);
    }

    pub fn pong_received(&mut self, now: Instant) {
        self.ping_outstanding = None;
        self.missed = 0;
        self.last_activity = now;
    }

    /// Effective pong timeout, doubled while hidden.
    pub fn pong_timeout(&self) -> Duration {
        if self.hidden {
            self.pong_timeout * 2
        } else {
            self.pong_timeout
        }
    }

    /// When the outstanding ping expires, if there is one.
    pub fn pong_deadline(&self) -> Option<Instant> {
        self.ping_outstanding.map(|sent| sent + self.pong_timeout())
    }

    /// Records a pong that never came.
    pub fn pong_missed(&mut self) -> HeartbeatVerdict {
        self.ping_outstanding = None;
        self.missed += 1;
        if self.missed >= self.max_missed {
            HeartbeatVerdict::Dead
        } else {
            HeartbeatVerdict::Degraded(self.missed)
        }
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Back in the foreground: forget the idle period, keep the counters.
    pub fn resync(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Fresh state for a new socket.
    pub fn reset(&mut self, now: Instant) {
        self.last_activity = now;
        self.ping_outstanding = None;
        self.missed = 0;
    }
}
