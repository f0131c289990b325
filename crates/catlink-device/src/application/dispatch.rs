//! CommandDispatcher: maps an inbound host command to exactly one reply.
//!
//! The dispatcher sits behind the negotiator.  It never touches the session
//! state itself; it is told the current [`SessionState`] and picks the reply
//! vocabulary accordingly (structured `ACK`/`NACK` once negotiated, bare
//! `OK`/`ERR` in legacy).  Rendering is delegated to a [`DisplayBackend`].

use std::sync::Arc;

use catlink_core::protocol::capabilities::CapabilitySet;
use catlink_core::protocol::messages::{
    DeviceReply, ErrorCode, HostCommand, MessageError, Mode, Temps,
};
use catlink_core::SessionState;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure reported by the rendering collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The display cannot take the request right now.
    #[error("display busy")]
    Busy,
    /// The trigger id is not one the display knows.
    #[error("unknown trigger {0:?}")]
    UnknownTrigger(String),
    /// Anything else that went wrong while rendering.
    #[error("display fault: {0}")]
    Fault(String),
}

/// Rendering side of the device.
///
/// Implementations must not block; a request that cannot be completed right
/// away is reported as [`BackendError::Busy`].
#[cfg_attr(test, mockall::automock)]
pub trait DisplayBackend: Send + Sync {
    /// Switches the display mode.
    fn set_mode(&self, mode: Mode) -> Result<(), BackendError>;

    /// Plays the animation registered under `id`.
    fn play_trigger(&self, id: &str) -> Result<(), BackendError>;

    /// Updates the temperature overlay.
    fn show_temps(&self, temps: &Temps) -> Result<(), BackendError>;
}

/// Routes typed commands to the backend and builds the reply.
pub struct CommandDispatcher {
    backend: Arc<dyn DisplayBackend>,
}

impl CommandDispatcher {
    pub fn new(backend: Arc<dyn DisplayBackend>) -> Self {
        Self { backend }
    }

    /// Handles one decoded line.
    ///
    /// `command` is the wire command word and `parsed` the result of lifting
    /// the line into a [`HostCommand`].  `HELLO` is answered by the
    /// negotiator and never reaches this method, so here it is unknown.
    pub fn dispatch(
        &self,
        command: &str,
        parsed: &Result<HostCommand, MessageError>,
        state: SessionState,
    ) -> Option<DeviceReply> {
        // PING is stateless and answered in every state.
        if let Ok(HostCommand::Ping { ts }) = parsed {
            return Some(DeviceReply::Pong {
                ts: ts.unwrap_or(0),
            });
        }

        match state {
            SessionState::Negotiated { peer_caps, .. } => {
                Some(self.dispatch_negotiated(command, parsed, peer_caps))
            }
            SessionState::Legacy(_) => Some(self.dispatch_legacy(parsed)),
            SessionState::Init | SessionState::AwaitingHello | SessionState::Failed => {
                debug!("{:?} not accepted in state {}", command, state.name());
                Some(unknown())
            }
        }
    }

    /// Reply to a line that overflowed the framer.
    pub fn oversized(&self, state: SessionState) -> DeviceReply {
        if state.is_legacy() {
            DeviceReply::LegacyErr {
                text: "line too long".to_string(),
            }
        } else {
            DeviceReply::Error {
                code: ErrorCode::BadArgs,
                message: "line too long".to_string(),
            }
        }
    }

    fn dispatch_negotiated(
        &self,
        command: &str,
        parsed: &Result<HostCommand, MessageError>,
        caps: CapabilitySet,
    ) -> DeviceReply {
        let cmd = match parsed {
            Ok(cmd) => cmd,
            Err(MessageError::UnknownCommand(_)) => return unknown(),
            Err(e) => {
                debug!("rejecting {:?}: {}", command, e);
                return DeviceReply::nack(command.to_ascii_uppercase(), e.code(), e.short_message());
            }
        };

        let result = match cmd {
            HostCommand::GetCap => return DeviceReply::Cap { caps },
            HostCommand::SetMode { mode } => self.backend.set_mode(*mode),
            HostCommand::Trigger { name } => self.backend.play_trigger(name),
            HostCommand::Data { temps } => {
                if !caps.contains(CapabilitySet::TEMP_OVERLAY) {
                    return DeviceReply::nack("DATA", ErrorCode::ModeUnsupported, "capability");
                }
                self.backend.show_temps(temps)
            }
            // HELLO is the negotiator's; bare legacy forms are not part of
            // the negotiated vocabulary.
            HostCommand::Hello { .. }
            | HostCommand::Ping { .. }
            | HostCommand::LegacyMode { .. }
            | HostCommand::LegacyTrigger { .. } => return unknown(),
        };

        let name = cmd.wire_name();
        match result {
            Ok(()) => DeviceReply::Ack {
                command: name.to_string(),
            },
            Err(BackendError::UnknownTrigger(_)) => {
                DeviceReply::nack(name, ErrorCode::TriggerUnknown, "id")
            }
            Err(BackendError::Busy) => DeviceReply::nack(name, ErrorCode::Busy, "busy"),
            Err(BackendError::Fault(e)) => {
                warn!("{} failed: {}", name, e);
                DeviceReply::nack(name, ErrorCode::Internal, "internal")
            }
        }
    }

    fn dispatch_legacy(&self, parsed: &Result<HostCommand, MessageError>) -> DeviceReply {
        let result = match parsed {
            Ok(HostCommand::LegacyMode { mode }) => match mode.parse::<Mode>() {
                Ok(mode) => self.backend.set_mode(mode),
                Err(_) => return legacy_err("unknown mode"),
            },
            Ok(HostCommand::LegacyTrigger { id }) => self.backend.play_trigger(id),
            Err(MessageError::MissingField {
                command: "MODE", ..
            }) => return legacy_err("missing mode"),
            Err(MessageError::MissingField {
                command: "TRIGGER",
                ..
            }) => return legacy_err("missing id"),
            _ => return unknown(),
        };

        match result {
            Ok(()) => DeviceReply::LegacyOk,
            Err(BackendError::UnknownTrigger(_)) => legacy_err("unknown trigger"),
            Err(BackendError::Busy) => legacy_err("busy"),
            Err(BackendError::Fault(e)) => {
                warn!("legacy command failed: {}", e);
                legacy_err("internal")
            }
        }
    }
}

fn unknown() -> DeviceReply {
    DeviceReply::nack("?", ErrorCode::UnknownCmd, "unknown")
}

fn legacy_err(text: &str) -> DeviceReply {
    DeviceReply::LegacyErr {
        text: text.to_string(),
    }
}
