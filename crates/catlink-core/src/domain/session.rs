//! Per-link session state.
//!
//! Every link owns exactly one [`SessionState`]; there is no global session.
//! Only the negotiators in [`crate::domain::negotiation`] move it, and once it
//! reaches `Negotiated`, `Legacy` or `Failed` it never changes again.

use std::fmt;
use std::time::{Duration, Instant};

use crate::protocol::capabilities::CapabilitySet;
use crate::protocol::messages::ProtocolVersion;

/// Why a link ended up speaking the legacy vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyReason {
    /// The peer answered `HELLO` with a different major version.
    VersionMismatch {
        local: ProtocolVersion,
        peer: ProtocolVersion,
    },
    /// No `HELLO` arrived before the deadline ran out.
    HelloTimeout,
    /// Older firmware answered `HELLO` with a bare `CAP <hex>`.
    LegacyFirmware { caps: CapabilitySet },
    /// The host spoke a bare legacy command before any `HELLO`.
    LegacyHost,
}

impl fmt::Display for LegacyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyReason::VersionMismatch { local, peer } => {
                write!(f, "protocol major mismatch (local {}, peer {})", local, peer)
            }
            LegacyReason::HelloTimeout => f.write_str("no HELLO before timeout"),
            LegacyReason::LegacyFirmware { caps } => {
                write!(f, "legacy firmware (CAP {})", caps)
            }
            LegacyReason::LegacyHost => f.write_str("legacy host command before HELLO"),
        }
    }
}

/// Negotiation state of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Init,
    AwaitingHello,
    Negotiated {
        version: ProtocolVersion,
        peer_caps: CapabilitySet,
    },
    Legacy(LegacyReason),
    Failed,
}

impl SessionState {
    /// `true` for `Negotiated`, `Legacy` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Negotiated { .. } | SessionState::Legacy(_) | SessionState::Failed
        )
    }

    pub fn is_negotiated(&self) -> bool {
        matches!(self, SessionState::Negotiated { .. })
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, SessionState::Legacy(_))
    }

    /// Capabilities the peer advertised, if negotiation succeeded.
    pub fn peer_caps(&self) -> Option<CapabilitySet> {
        match self {
            SessionState::Negotiated { peer_caps, .. } => Some(*peer_caps),
            _ => None,
        }
    }

    /// Short name for log output.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::AwaitingHello => "awaiting_hello",
            SessionState::Negotiated { .. } => "negotiated",
            SessionState::Legacy(_) => "legacy",
            SessionState::Failed => "failed",
        }
    }
}

/// The single in-flight request on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Command word the reply must name (`SET`, `TRIGGER`, `GET`, ...).
    pub command: String,
    pub issued_at: Instant,
}

impl PendingRequest {
    pub fn new(command: impl Into<String>, issued_at: Instant) -> Self {
        Self {
            command: command.into(),
            issued_at,
        }
    }

    /// `true` once `timeout` has passed since the request was issued.
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.issued_at) >= timeout
    }

    /// `true` if `command` names this request (ASCII case-insensitive).
    pub fn matches(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }
}
