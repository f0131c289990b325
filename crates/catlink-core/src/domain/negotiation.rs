//! Version and capability handshake.
//!
//! Two sans-IO state machines, one per side of the link:
//!
//! - [`HostNegotiator`] sends `HELLO`, waits [`HOST_HELLO_TIMEOUT`] per
//!   attempt, retries once, then falls back to legacy.
//! - [`DeviceNegotiator`] arms its deadline on the first received byte and
//!   answers `HELLO` with its identity.
//!
//! # How the machines are driven (for beginners)
//!
//! Neither type owns a socket or a clock.  The owner feeds in what happened
//! (a reply arrived, bytes arrived, the transport died) together with the
//! current [`Instant`], and calls `poll` periodically so deadlines can fire.
//! The machine answers with what should be sent next.  This keeps every
//! transition reproducible in a unit test.
//!
//! [`HOST_HELLO_TIMEOUT`]: crate::domain::timers::HOST_HELLO_TIMEOUT

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::session::{LegacyReason, SessionState};
use crate::domain::timers::{Deadline, TimerConfig};
use crate::protocol::capabilities::CapabilitySet;
use crate::protocol::messages::{DeviceReply, HostCommand, ProtocolVersion, PROTOCOL_VERSION};

/// Result of a finished handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationOutcome {
    Negotiated {
        version: ProtocolVersion,
        peer_caps: CapabilitySet,
    },
    Legacy(LegacyReason),
    Failed,
}

impl NegotiationOutcome {
    /// `None` while the handshake is still running.
    pub fn from_state(state: SessionState) -> Option<Self> {
        match state {
            SessionState::Negotiated { version, peer_caps } => {
                Some(NegotiationOutcome::Negotiated { version, peer_caps })
            }
            SessionState::Legacy(reason) => Some(NegotiationOutcome::Legacy(reason)),
            SessionState::Failed => Some(NegotiationOutcome::Failed),
            SessionState::Init | SessionState::AwaitingHello => None,
        }
    }
}

/// Misuse of a negotiator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("negotiation already started (state: {0})")]
    AlreadyStarted(&'static str),
}

// ── Host side ─────────────────────────────────────────────────────────────────

/// What the host should do after [`HostNegotiator::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostAction {
    /// Nothing to do yet.
    Wait,
    /// (Re)send this `HELLO`.
    Send(HostCommand),
    /// The handshake just finished.
    Finished(NegotiationOutcome),
}

/// Identity the device announced in its `HELLO` reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerInfo {
    pub name: String,
    pub firmware: String,
}

/// Host half of the handshake.
#[derive(Debug)]
pub struct HostNegotiator {
    state: SessionState,
    app_name: String,
    req_caps: CapabilitySet,
    timeout: Duration,
    max_attempts: u8,
    attempts: u8,
    deadline: Option<Deadline>,
    peer: Option<PeerInfo>,
}

impl HostNegotiator {
    pub fn new(app_name: impl Into<String>, req_caps: CapabilitySet, timers: &TimerConfig) -> Self {
        Self {
            state: SessionState::Init,
            app_name: app_name.into(),
            req_caps,
            timeout: timers.hello_timeout(),
            max_attempts: timers.hello_attempts(),
            attempts: 0,
            deadline: None,
            peer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Terminal outcome, once reached.
    pub fn outcome(&self) -> Option<NegotiationOutcome> {
        NegotiationOutcome::from_state(self.state)
    }

    /// Name and firmware from the device's `HELLO`, if one was received.
    pub fn peer(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    /// Number of `HELLO`s sent so far.
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Link opened: enter `AwaitingHello` and return the first `HELLO`.
    pub fn start(&mut self, now: Instant) -> Result<HostCommand, NegotiationError> {
        if self.state != SessionState::Init {
            return Err(NegotiationError::AlreadyStarted(self.state.name()));
        }
        self.state = SessionState::AwaitingHello;
        debug!("negotiation started");
        Ok(self.next_hello(now))
    }

    /// Offers a device line to the handshake.
    ///
    /// Returns the outcome if this reply finished negotiation.  Anything that
    /// is not a `HELLO` or a bare `CAP` is ignored, as is every reply once
    /// the state is terminal.
    pub fn on_reply(&mut self, reply: &DeviceReply) -> Option<NegotiationOutcome> {
        if self.state != SessionState::AwaitingHello {
            return None;
        }
        let next = match reply {
            DeviceReply::Hello {
                version,
                caps,
                name,
                firmware,
            } => {
                self.peer = Some(PeerInfo {
                    name: name.clone(),
                    firmware: firmware.clone(),
                });
                if PROTOCOL_VERSION.is_compatible(*version) {
                    info!(
                        "negotiated protocol {} with {:?} (fw {}, caps {})",
                        version, name, firmware, caps
                    );
                    SessionState::Negotiated {
                        version: *version,
                        peer_caps: *caps,
                    }
                } else {
                    SessionState::Legacy(LegacyReason::VersionMismatch {
                        local: PROTOCOL_VERSION,
                        peer: *version,
                    })
                }
            }
            DeviceReply::Cap { caps } => {
                SessionState::Legacy(LegacyReason::LegacyFirmware { caps: *caps })
            }
            other => {
                debug!("ignoring {:?} while awaiting HELLO", other);
                return None;
            }
        };
        self.finish(next)
    }

    /// Checks the deadline.  Call on every tick.
    pub fn poll(&mut self, now: Instant) -> HostAction {
        let expired = self.state == SessionState::AwaitingHello
            && self.deadline.is_some_and(|d| d.is_expired(now));
        if !expired {
            return HostAction::Wait;
        }
        if self.attempts < self.max_attempts {
            debug!("HELLO attempt {} timed out, retrying", self.attempts);
            return HostAction::Send(self.next_hello(now));
        }
        match self.finish(SessionState::Legacy(LegacyReason::HelloTimeout)) {
            Some(outcome) => HostAction::Finished(outcome),
            None => HostAction::Wait,
        }
    }

    /// The transport went away.  An unfinished handshake becomes `Failed`.
    pub fn on_transport_lost(&mut self) -> Option<NegotiationOutcome> {
        if self.state.is_terminal() {
            return None;
        }
        self.finish(SessionState::Failed)
    }

    fn next_hello(&mut self, now: Instant) -> HostCommand {
        self.attempts += 1;
        self.deadline = Some(Deadline::after(now, self.timeout));
        HostCommand::Hello {
            version: PROTOCOL_VERSION,
            req_caps: self.req_caps,
            name: self.app_name.clone(),
        }
    }

    fn finish(&mut self, next: SessionState) -> Option<NegotiationOutcome> {
        if let SessionState::Legacy(reason) = next {
            warn!("falling back to legacy protocol: {}", reason);
        }
        self.state = next;
        self.deadline = None;
        self.outcome()
    }
}

// ── Device side ───────────────────────────────────────────────────────────────

/// What the device announces about itself in `HELLO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub version: ProtocolVersion,
    pub caps: CapabilitySet,
    pub name: String,
    pub firmware: String,
}

impl DeviceIdentity {
    /// The `HELLO` reply carrying this identity.
    pub fn hello_reply(&self) -> DeviceReply {
        DeviceReply::Hello {
            version: self.version,
            caps: self.caps,
            name: self.name.clone(),
            firmware: self.firmware.clone(),
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        use crate::protocol::messages::{DEFAULT_DEVICE_NAME, DEFAULT_FIRMWARE};
        Self {
            version: PROTOCOL_VERSION,
            caps: CapabilitySet::REFERENCE_DEVICE,
            name: DEFAULT_DEVICE_NAME.to_string(),
            firmware: DEFAULT_FIRMWARE.to_string(),
        }
    }
}

/// Device half of the handshake.
#[derive(Debug)]
pub struct DeviceNegotiator {
    state: SessionState,
    identity: DeviceIdentity,
    timeout: Duration,
    deadline: Option<Deadline>,
}

impl DeviceNegotiator {
    pub fn new(identity: DeviceIdentity, hello_timeout: Duration) -> Self {
        Self {
            state: SessionState::Init,
            identity,
            timeout: hello_timeout,
            deadline: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn outcome(&self) -> Option<NegotiationOutcome> {
        NegotiationOutcome::from_state(self.state)
    }

    /// Bytes arrived.  The first call arms the `HELLO` deadline.
    pub fn on_activity(&mut self, now: Instant) {
        if self.state == SessionState::Init {
            self.state = SessionState::AwaitingHello;
            self.deadline = Some(Deadline::after(now, self.timeout));
            debug!("first byte received, awaiting HELLO");
        }
    }

    /// Handles a host `HELLO`.
    ///
    /// Returns the reply to send, or `None` when the link has already fallen
    /// back to legacy and `HELLO` is no longer part of the vocabulary.  A
    /// repeated `HELLO` on a negotiated link is answered again without
    /// changing state.
    pub fn on_hello(&mut self, peer: ProtocolVersion, now: Instant) -> Option<DeviceReply> {
        self.on_activity(now);
        match self.state {
            SessionState::AwaitingHello => {
                let next = if self.identity.version.is_compatible(peer) {
                    info!("host HELLO {}, negotiated", peer);
                    SessionState::Negotiated {
                        version: self.identity.version,
                        peer_caps: self.identity.caps,
                    }
                } else {
                    SessionState::Legacy(LegacyReason::VersionMismatch {
                        local: self.identity.version,
                        peer,
                    })
                };
                self.finish(next);
                Some(self.identity.hello_reply())
            }
            SessionState::Negotiated { .. } => Some(self.identity.hello_reply()),
            _ => None,
        }
    }

    /// A bare legacy command arrived before any `HELLO`.
    pub fn on_legacy_command(&mut self, now: Instant) -> Option<NegotiationOutcome> {
        self.on_activity(now);
        if self.state != SessionState::AwaitingHello {
            return None;
        }
        self.finish(SessionState::Legacy(LegacyReason::LegacyHost))
    }

    /// Checks the deadline.  Call on every pass.
    pub fn poll(&mut self, now: Instant) -> Option<NegotiationOutcome> {
        let expired = self.state == SessionState::AwaitingHello
            && self.deadline.is_some_and(|d| d.is_expired(now));
        if !expired {
            return None;
        }
        self.finish(SessionState::Legacy(LegacyReason::HelloTimeout))
    }

    fn finish(&mut self, next: SessionState) -> Option<NegotiationOutcome> {
        if let SessionState::Legacy(reason) = next {
            warn!("device falling back to legacy protocol: {}", reason);
        }
        self.state = next;
        self.deadline = None;
        self.outcome()
    }
}
