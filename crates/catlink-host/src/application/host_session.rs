//! HostSession: the host's protocol state for one link, with no I/O.
//!
//! The link task feeds it decoded device lines and clock ticks and gets back
//! [`HostEvent`]s to act on.  Keeping the logic here means every timing rule
//! can be tested with plain `Instant` arithmetic.
//!
//! # Request tracking (for beginners)
//!
//! The device answers one request at a time, so the host keeps at most one
//! [`PendingRequest`] per link.  `PING` is stateless and tracked separately.
//!
//! ```text
//! begin(SET) ──► pending = SET ──► ACK CMD=SET ──► Response
//!                     │
//!                request timeout
//!                     ▼
//!              quarantined(SET) ──► late ACK CMD=SET ──► discarded
//!                     │
//!                quiet period
//!                     ▼
//!                  released
//! ```
//!
//! While `SET` is quarantined a new `SET` is refused, so a late `ACK` can
//! never be mistaken for the answer to a newer request.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use catlink_core::protocol::messages::{ButtonState, DeviceReply, HostCommand, Mode};
use catlink_core::{
    CapabilitySet, HostAction, HostNegotiator, NegotiationError, NegotiationOutcome, PeerInfo,
    PendingRequest, SessionState, TimerConfig,
};
use thiserror::Error;
use tracing::{debug, warn};

/// A request the caller may not issue in the link's current state.
///
/// Nothing is written to the link when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("a {0} request is already in flight")]
    RequestPending(String),

    #[error("{command} needs a negotiated link (state: {state})")]
    NotNegotiated {
        command: &'static str,
        state: &'static str,
    },

    #[error("device does not advertise capability {0}")]
    CapabilityMissing(CapabilitySet),

    #[error("{0} is not available in legacy mode")]
    LegacyRefused(&'static str),

    #[error("legacy {0} is not used on a negotiated link")]
    LegacyOnly(&'static str),

    #[error("{0} timed out recently and is held until its late reply or the quiet period")]
    Quarantined(String),

    #[error("DATA needs at least one temperature")]
    EmptyTemps,

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

/// Something the link task must act on.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Write this command (a `HELLO` retry).
    Transmit(HostCommand),
    /// The handshake finished.
    Negotiation(NegotiationOutcome),
    /// The reply to the pending request.
    Response { command: String, reply: DeviceReply },
    /// The pending request got no reply in time.
    TimedOut { command: String },
    Pong { ts: u64, rtt: Duration },
    PingTimedOut { ts: u64 },
    /// Unsolicited `EVENT BTN=`.
    Buttons(ButtonState),
}

#[derive(Debug)]
struct Quarantined {
    command: String,
    since: Instant,
}

#[derive(Debug)]
struct PendingPing {
    ts: u64,
    sent_at: Instant,
}

/// Host protocol state for a single link.
#[derive(Debug)]
pub struct HostSession {
    negotiator: HostNegotiator,
    timers: TimerConfig,
    pending: Option<PendingRequest>,
    quarantined: VecDeque<Quarantined>,
    pings: VecDeque<PendingPing>,
}

impl HostSession {
    pub fn new(app_name: impl Into<String>, req_caps: CapabilitySet, timers: TimerConfig) -> Self {
        Self {
            negotiator: HostNegotiator::new(app_name, req_caps, &timers),
            timers,
            pending: None,
            quarantined: VecDeque::new(),
            pings: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.negotiator.state()
    }

    pub fn peer(&self) -> Option<&PeerInfo> {
        self.negotiator.peer()
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    /// Link opened: returns the first `HELLO` to write.
    pub fn start(&mut self, now: Instant) -> Result<HostCommand, HostError> {
        Ok(self.negotiator.start(now)?)
    }

    /// `SET MODE=` on a negotiated link, bare `MODE` in legacy mode.
    pub fn mode_command(&self, mode: Mode) -> HostCommand {
        if self.state().is_legacy() {
            HostCommand::LegacyMode {
                mode: mode.as_str().to_string(),
            }
        } else {
            HostCommand::SetMode { mode }
        }
    }

    /// `TRIGGER NAME=` on a negotiated link, bare `TRIGGER` in legacy mode.
    pub fn trigger_command(&self, id: &str) -> HostCommand {
        if self.state().is_legacy() {
            HostCommand::LegacyTrigger { id: id.to_string() }
        } else {
            HostCommand::Trigger {
                name: id.to_string(),
            }
        }
    }

    /// Validates `cmd` against the caller contract and records it as
    /// outstanding.  On `Ok` the caller must write it to the link.
    ///
    /// # Errors
    ///
    /// A [`HostError`] describing why the command may not be sent now.
    pub fn begin(&mut self, cmd: &HostCommand, now: Instant) -> Result<(), HostError> {
        self.release_quarantine(now);
        self.check(cmd)?;
        match cmd {
            HostCommand::Ping { ts } => self.pings.push_back(PendingPing {
                ts: ts.unwrap_or(0),
                sent_at: now,
            }),
            other => self.pending = Some(PendingRequest::new(other.wire_name(), now)),
        }
        Ok(())
    }

    /// Offers a decoded device line to the session.
    pub fn on_reply(&mut self, reply: DeviceReply, now: Instant) -> Vec<HostEvent> {
        let mut events = Vec::new();
        if self.state() == SessionState::AwaitingHello {
            if let Some(outcome) = self.negotiator.on_reply(&reply) {
                events.push(HostEvent::Negotiation(outcome));
                return events;
            }
        }

        match reply {
            DeviceReply::Event { buttons } => events.push(HostEvent::Buttons(buttons)),
            DeviceReply::Pong { ts } => match self.pings.iter().position(|p| p.ts == ts) {
                Some(i) => {
                    if let Some(ping) = self.pings.remove(i) {
                        events.push(HostEvent::Pong {
                            ts,
                            rtt: now.saturating_duration_since(ping.sent_at),
                        });
                    }
                }
                None => debug!("discarding unmatched PONG TS={ts}"),
            },
            reply => events.extend(self.settle(reply)),
        }
        events
    }

    /// Drives the handshake deadline, request timeouts and the quarantine.
    /// Call on every tick.
    pub fn poll(&mut self, now: Instant) -> Vec<HostEvent> {
        let mut events = Vec::new();
        match self.negotiator.poll(now) {
            HostAction::Wait => {}
            HostAction::Send(cmd) => events.push(HostEvent::Transmit(cmd)),
            HostAction::Finished(outcome) => events.push(HostEvent::Negotiation(outcome)),
        }

        let timeout = self.timers.request_timeout();
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.is_timed_out(now, timeout))
        {
            if let Some(expired) = self.pending.take() {
                warn!("{} got no reply within {:?}", expired.command, timeout);
                self.quarantined.push_back(Quarantined {
                    command: expired.command.clone(),
                    since: now,
                });
                events.push(HostEvent::TimedOut {
                    command: expired.command,
                });
            }
        }

        while self
            .pings
            .front()
            .is_some_and(|p| now.saturating_duration_since(p.sent_at) >= timeout)
        {
            if let Some(ping) = self.pings.pop_front() {
                events.push(HostEvent::PingTimedOut { ts: ping.ts });
            }
        }

        self.release_quarantine(now);
        events
    }

    /// The transport closed.  Outstanding requests are forgotten.
    pub fn on_transport_lost(&mut self) -> Vec<HostEvent> {
        self.pending = None;
        self.pings.clear();
        self.quarantined.clear();
        self.negotiator
            .on_transport_lost()
            .map(HostEvent::Negotiation)
            .into_iter()
            .collect()
    }

    fn check(&self, cmd: &HostCommand) -> Result<(), HostError> {
        let name = cmd.wire_name();
        let state = self.state();
        match cmd {
            HostCommand::Ping { .. } => return Ok(()),
            HostCommand::LegacyMode { .. } | HostCommand::LegacyTrigger { .. } => match state {
                SessionState::Legacy(_) => {}
                SessionState::Negotiated { .. } => return Err(HostError::LegacyOnly(name)),
                other => {
                    return Err(HostError::NotNegotiated {
                        command: name,
                        state: other.name(),
                    })
                }
            },
            _ => match state {
                SessionState::Negotiated { peer_caps, .. } => {
                    if let HostCommand::Data { temps } = cmd {
                        if !peer_caps.contains(CapabilitySet::TEMP_OVERLAY) {
                            return Err(HostError::CapabilityMissing(CapabilitySet::TEMP_OVERLAY));
                        }
                        if temps.is_empty() {
                            return Err(HostError::EmptyTemps);
                        }
                    }
                }
                SessionState::Legacy(_) => return Err(HostError::LegacyRefused(name)),
                other => {
                    return Err(HostError::NotNegotiated {
                        command: name,
                        state: other.name(),
                    })
                }
            },
        }

        if let Some(pending) = &self.pending {
            return Err(HostError::RequestPending(pending.command.clone()));
        }
        if self
            .quarantined
            .iter()
            .any(|q| q.command.eq_ignore_ascii_case(name))
        {
            return Err(HostError::Quarantined(name.to_string()));
        }
        Ok(())
    }

    /// Pairs a reply with the pending request or a quarantined one.
    ///
    /// Untagged replies (`OK`, `ERR ...`, `NACK CMD=?`) answer the oldest
    /// line the device has not answered yet, which is a quarantined one
    /// whenever any exist.
    fn settle(&mut self, reply: DeviceReply) -> Option<HostEvent> {
        let tag = reply_command(&reply).map(str::to_string);
        let stale = match &tag {
            Some(cmd) => self
                .quarantined
                .iter()
                .position(|q| q.command.eq_ignore_ascii_case(cmd)),
            None if self.quarantined.is_empty() => None,
            None => Some(0),
        };
        let answers_pending = self.pending.as_ref().is_some_and(|p| match &tag {
            Some(cmd) => p.matches(cmd),
            None => stale.is_none(),
        });

        if answers_pending {
            let pending = self.pending.take()?;
            return Some(HostEvent::Response {
                command: pending.command,
                reply,
            });
        }
        if let Some(i) = stale {
            if let Some(late) = self.quarantined.remove(i) {
                debug!("discarding late reply to {}: {:?}", late.command, reply);
            }
            return None;
        }
        warn!("unsolicited reply {:?}", reply);
        None
    }

    fn release_quarantine(&mut self, now: Instant) {
        let quiet = self.timers.stale_quiet();
        self.quarantined.retain(|q| {
            let held = now.saturating_duration_since(q.since) < quiet;
            if !held {
                debug!("{} released after quiet period", q.command);
            }
            held
        });
    }
}

/// Command word a reply names, if it names one.
fn reply_command(reply: &DeviceReply) -> Option<&str> {
    match reply {
        DeviceReply::Ack { command } | DeviceReply::Nack { command, .. } if command != "?" => {
            Some(command.as_str())
        }
        DeviceReply::Cap { .. } => Some("GET"),
        DeviceReply::Hello { .. } => Some("HELLO"),
        _ => None,
    }
}
