//! Monotonic deadlines for the handshake and for outstanding requests.
//!
//! Nothing in this module reads a clock.  Callers pass `now` in, which keeps
//! the state machines deterministic and lets tests advance time by hand.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// How long the host waits for a `HELLO` reply per attempt.
pub const HOST_HELLO_TIMEOUT: Duration = Duration::from_millis(800);

/// Total `HELLO` transmissions before the host falls back to legacy.
pub const HOST_HELLO_ATTEMPTS: u8 = 2;

/// How long the device waits for `HELLO` after the first received byte.
pub const DEVICE_HELLO_TIMEOUT: Duration = Duration::from_millis(1200);

/// How long the host waits for the reply to a tracked request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long a timed-out command stays quarantined if no late reply shows up.
pub const STALE_QUIET_PERIOD: Duration = Duration::from_millis(1500);

/// A point in time after which something is considered overdue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from `now`.
    pub fn after(now: Instant, timeout: Duration) -> Self {
        Self { at: now + timeout }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    /// `true` once `now` has reached the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.at
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self, now: Instant) -> Duration {
        self.at.saturating_duration_since(now)
    }
}

/// Host-side protocol timing, in milliseconds so it reads naturally in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
    #[serde(default = "default_hello_attempts")]
    pub hello_attempts: u8,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_stale_quiet_ms")]
    pub stale_quiet_ms: u64,
}

fn default_hello_timeout_ms() -> u64 {
    HOST_HELLO_TIMEOUT.as_millis() as u64
}

fn default_hello_attempts() -> u8 {
    HOST_HELLO_ATTEMPTS
}

fn default_request_timeout_ms() -> u64 {
    REQUEST_TIMEOUT.as_millis() as u64
}

fn default_stale_quiet_ms() -> u64 {
    STALE_QUIET_PERIOD.as_millis() as u64
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            hello_timeout_ms: default_hello_timeout_ms(),
            hello_attempts: default_hello_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            stale_quiet_ms: default_stale_quiet_ms(),
        }
    }
}

impl TimerConfig {
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    /// Attempts are clamped to at least one.
    pub fn hello_attempts(&self) -> u8 {
        self.hello_attempts.max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stale_quiet(&self) -> Duration {
        Duration::from_millis(self.stale_quiet_ms)
    }
}
