//! Typed catlink protocol messages.
//!
//! The codec works on an untyped [`Message`]; this module lifts it into the
//! two directional vocabularies:
//!
//! - [`HostCommand`] – everything the host sends to the display device.
//! - [`DeviceReply`] – everything the device sends back (solicited or not).
//!
//! Conversion is validated: a line that names a known command but carries
//! missing or malformed arguments yields a [`MessageError`] whose
//! [`MessageError::code`] is the [`ErrorCode`] the device answers with.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::capabilities::CapabilitySet;
use crate::protocol::codec::{self, JsonPayload, Message};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion { major: 2, minor: 0 };

/// Device name advertised by the reference firmware.
pub const DEFAULT_DEVICE_NAME: &str = "esp32";

/// Firmware identifier advertised by the reference firmware.
pub const DEFAULT_FIRMWARE: &str = "2025.09.26";

/// Application name the host announces by default.
pub const DEFAULT_APP_NAME: &str = "bongo_cat_app";

// ── Version ───────────────────────────────────────────────────────────────────

/// `major.minor` protocol version.  Peers are compatible iff majors match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Returns `true` when both sides can speak the structured protocol.
    pub const fn is_compatible(self, other: ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Error returned when a `V=` value is not `<u8>.<u8>`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid protocol version: {0:?}")]
pub struct ParseVersionError(pub String);

impl FromStr for ProtocolVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let (major, minor) = s.split_once('.').ok_or_else(err)?;
        Ok(Self {
            major: major.parse().map_err(|_| err())?,
            minor: minor.parse().map_err(|_| err())?,
        })
    }
}

// ── Error codes ───────────────────────────────────────────────────────────────

/// Numeric error code carried in `NACK ... ERR=` and `ERR ERR=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    UnknownCmd = 1,
    BadArgs = 2,
    ModeUnsupported = 3,
    TriggerUnknown = 4,
    Busy = 5,
    Internal = 6,
}

impl ErrorCode {
    /// Wire value.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Symbolic name, used in log output.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::UnknownCmd => "UNKNOWN_CMD",
            ErrorCode::BadArgs => "BAD_ARGS",
            ErrorCode::ModeUnsupported => "MODE_UNSUPPORTED",
            ErrorCode::TriggerUnknown => "TRIGGER_UNKNOWN",
            ErrorCode::Busy => "BUSY",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ErrorCode::UnknownCmd),
            2 => Ok(ErrorCode::BadArgs),
            3 => Ok(ErrorCode::ModeUnsupported),
            4 => Ok(ErrorCode::TriggerUnknown),
            5 => Ok(ErrorCode::Busy),
            6 => Ok(ErrorCode::Internal),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

// ── Payload types ─────────────────────────────────────────────────────────────

/// Display mode selectable with `SET MODE=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Normal,
    Messenger,
    Tutor,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Messenger => "messenger",
            Mode::Tutor => "tutor",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Mode::Normal),
            "messenger" => Ok(Mode::Messenger),
            "tutor" => Ok(Mode::Tutor),
            _ => Err(MessageError::UnsupportedMode(s.to_string())),
        }
    }
}

/// Temperature sample carried in `DATA TEMPS={...}`.  Either reading may be
/// absent, but not both.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Temps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<f64>,
}

impl Temps {
    pub fn new(cpu: Option<f64>, gpu: Option<f64>) -> Self {
        Self { cpu, gpu }
    }

    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.gpu.is_none()
    }
}

/// Button levels carried in `EVENT BTN={"a":0|1,"b":0|1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ButtonState {
    pub a: u8,
    pub b: u8,
}

impl ButtonState {
    pub fn new(a: bool, b: bool) -> Self {
        Self {
            a: u8::from(a),
            b: u8::from(b),
        }
    }

    pub fn a_pressed(&self) -> bool {
        self.a != 0
    }

    pub fn b_pressed(&self) -> bool {
        self.b != 0
    }
}

// ── Conversion errors ─────────────────────────────────────────────────────────

/// Why a [`Message`] could not be lifted into a typed command or reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("{command}: missing {field}")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },

    #[error("{command}: bad {field} value {value:?}")]
    BadField {
        command: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("unsupported mode {0:?}")]
    UnsupportedMode(String),
}

impl MessageError {
    /// Error code a device reports for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            MessageError::UnknownCommand(_) => ErrorCode::UnknownCmd,
            MessageError::MissingField { .. } | MessageError::BadField { .. } => {
                ErrorCode::BadArgs
            }
            MessageError::UnsupportedMode(_) => ErrorCode::ModeUnsupported,
        }
    }

    /// Short human-readable text for the `MSG=` field.
    pub fn short_message(&self) -> String {
        match self {
            MessageError::UnknownCommand(_) => "unknown".to_string(),
            MessageError::MissingField { field, .. } => format!("missing {}", field),
            MessageError::BadField { field, .. } => format!("bad {}", field),
            MessageError::UnsupportedMode(_) => "mode".to_string(),
        }
    }
}

fn required<'a>(
    msg: &'a Message,
    command: &'static str,
    field: &'static str,
) -> Result<&'a str, MessageError> {
    msg.field(field)
        .filter(|v| !v.is_empty())
        .ok_or(MessageError::MissingField { command, field })
}

fn parsed<T: FromStr>(
    value: &str,
    command: &'static str,
    field: &'static str,
) -> Result<T, MessageError> {
    value.parse().map_err(|_| MessageError::BadField {
        command,
        field,
        value: value.to_string(),
    })
}

fn json_field<T: serde::de::DeserializeOwned>(
    msg: &Message,
    command: &'static str,
    field: &'static str,
) -> Result<T, MessageError> {
    match msg.json_for(field) {
        Some(json) => json.deserialize().map_err(|_| MessageError::BadField {
            command,
            field,
            value: json.raw.clone(),
        }),
        // A non-JSON value under the same key was kept as a plain field.
        None => match msg.field(field) {
            Some(value) => Err(MessageError::BadField {
                command,
                field,
                value: value.to_string(),
            }),
            None => Err(MessageError::MissingField { command, field }),
        },
    }
}

fn json_payload<T: Serialize>(key: &str, value: &T) -> Option<JsonPayload> {
    match JsonPayload::from_serialize(Some(key), value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::error!("failed to serialize {} payload: {}", key, e);
            None
        }
    }
}

// ── Host → device ─────────────────────────────────────────────────────────────

/// Commands sent from the host to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    /// `HELLO V=<maj.min> REQCAP=<hex> NAME="<app>"`
    Hello {
        version: ProtocolVersion,
        req_caps: CapabilitySet,
        name: String,
    },
    /// `PING TS=<unix>`; an absent or unparseable timestamp echoes as 0.
    Ping { ts: Option<u64> },
    /// `GET CAP`
    GetCap,
    /// `SET MODE=<name>`
    SetMode { mode: Mode },
    /// `TRIGGER NAME=<id>`
    Trigger { name: String },
    /// `DATA TEMPS={...}`
    Data { temps: Temps },
    /// Legacy `MODE <name>`.  The name is not validated here; the device
    /// answers `ERR` for names it does not know.
    LegacyMode { mode: String },
    /// Legacy `TRIGGER <id>`
    LegacyTrigger { id: String },
}

impl HostCommand {
    /// Command word used in `ACK CMD=` / `NACK CMD=`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            HostCommand::Hello { .. } => "HELLO",
            HostCommand::Ping { .. } => "PING",
            HostCommand::GetCap => "GET",
            HostCommand::SetMode { .. } => "SET",
            HostCommand::Trigger { .. } | HostCommand::LegacyTrigger { .. } => "TRIGGER",
            HostCommand::Data { .. } => "DATA",
            HostCommand::LegacyMode { .. } => "MODE",
        }
    }

    /// `true` for the bare commands understood by pre-negotiation firmware.
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            HostCommand::LegacyMode { .. } | HostCommand::LegacyTrigger { .. }
        )
    }

    /// Builds the wire message.
    pub fn to_message(&self) -> Message {
        match self {
            HostCommand::Hello {
                version,
                req_caps,
                name,
            } => Message::new("HELLO")
                .with_field("V", version.to_string())
                .with_field("REQCAP", req_caps.to_string())
                .with_quoted("NAME", name.as_str()),
            HostCommand::Ping { ts } => {
                let msg = Message::new("PING");
                match ts {
                    Some(ts) => msg.with_field("TS", ts.to_string()),
                    None => msg,
                }
            }
            HostCommand::GetCap => Message::new("GET").with_arg("CAP"),
            HostCommand::SetMode { mode } => Message::new("SET").with_field("MODE", mode.as_str()),
            HostCommand::Trigger { name } => {
                Message::new("TRIGGER").with_field("NAME", name.as_str())
            }
            HostCommand::Data { temps } => {
                let msg = Message::new("DATA");
                match json_payload("TEMPS", temps) {
                    Some(json) => msg.with_json(json),
                    None => msg,
                }
            }
            HostCommand::LegacyMode { mode } => Message::new("MODE").with_arg(mode.as_str()),
            HostCommand::LegacyTrigger { id } => Message::new("TRIGGER").with_arg(id.as_str()),
        }
    }

    /// Lifts a decoded line into a typed command.
    ///
    /// # Errors
    ///
    /// [`MessageError::UnknownCommand`] for unrecognized command words, and
    /// a field-level error when a known command is malformed.
    pub fn from_message(msg: &Message) -> Result<Self, MessageError> {
        let command = msg.command.to_ascii_uppercase();
        match command.as_str() {
            "HELLO" => {
                let version = parsed(required(msg, "HELLO", "V")?, "HELLO", "V")?;
                let req_caps = match msg.field("REQCAP") {
                    Some(v) => parsed(v, "HELLO", "REQCAP")?,
                    None => CapabilitySet::ALL,
                };
                Ok(HostCommand::Hello {
                    version,
                    req_caps,
                    name: msg.field("NAME").unwrap_or_default().to_string(),
                })
            }
            "PING" => Ok(HostCommand::Ping {
                ts: msg.field("TS").and_then(|v| v.parse().ok()),
            }),
            "GET" => match msg.arg(0) {
                Some(what) if what.eq_ignore_ascii_case("CAP") => Ok(HostCommand::GetCap),
                _ => Err(MessageError::UnknownCommand(codec::encode(msg))),
            },
            "SET" => {
                let mode = required(msg, "SET", "MODE")?.parse()?;
                Ok(HostCommand::SetMode { mode })
            }
            "TRIGGER" => {
                if let Some(name) = msg.field("NAME") {
                    if name.is_empty() {
                        return Err(MessageError::MissingField {
                            command: "TRIGGER",
                            field: "NAME",
                        });
                    }
                    return Ok(HostCommand::Trigger {
                        name: name.to_string(),
                    });
                }
                match msg.arg(0) {
                    Some(id) => Ok(HostCommand::LegacyTrigger { id: id.to_string() }),
                    None => Err(MessageError::MissingField {
                        command: "TRIGGER",
                        field: "NAME",
                    }),
                }
            }
            "DATA" => {
                let temps: Temps = json_field(msg, "DATA", "TEMPS")?;
                if temps.is_empty() {
                    return Err(MessageError::BadField {
                        command: "DATA",
                        field: "TEMPS",
                        value: "{}".to_string(),
                    });
                }
                Ok(HostCommand::Data { temps })
            }
            "MODE" => match msg.arg(0) {
                Some(mode) => Ok(HostCommand::LegacyMode {
                    mode: mode.to_string(),
                }),
                None => Err(MessageError::MissingField {
                    command: "MODE",
                    field: "name",
                }),
            },
            _ => Err(MessageError::UnknownCommand(msg.command.clone())),
        }
    }
}

// ── Device → host ─────────────────────────────────────────────────────────────

/// Lines sent from the device to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReply {
    /// `HELLO V=<maj.min> CAP=<hex> NAME="<str>" FW=<fw>`
    Hello {
        version: ProtocolVersion,
        caps: CapabilitySet,
        name: String,
        firmware: String,
    },
    /// `ACK CMD=<name>`
    Ack { command: String },
    /// `NACK CMD=<name> ERR=<code> MSG="<human>"`
    Nack {
        command: String,
        code: ErrorCode,
        message: String,
    },
    /// `CAP <hex>`
    Cap { caps: CapabilitySet },
    /// `PONG TS=<n>`
    Pong { ts: u64 },
    /// `ERR ERR=<code> MSG="<human>"`, a line-level error not tied to a command.
    Error { code: ErrorCode, message: String },
    /// `EVENT BTN={"a":0|1,"b":0|1}`
    Event { buttons: ButtonState },
    /// Legacy `OK`
    LegacyOk,
    /// Legacy `ERR <free text>`
    LegacyErr { text: String },
}

impl DeviceReply {
    /// Shorthand for a [`DeviceReply::Nack`].
    pub fn nack(command: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        DeviceReply::Nack {
            command: command.into(),
            code,
            message: message.into(),
        }
    }

    /// Builds the wire message.
    pub fn to_message(&self) -> Message {
        match self {
            DeviceReply::Hello {
                version,
                caps,
                name,
                firmware,
            } => Message::new("HELLO")
                .with_field("V", version.to_string())
                .with_field("CAP", caps.to_string())
                .with_quoted("NAME", name.as_str())
                .with_field("FW", firmware.as_str()),
            DeviceReply::Ack { command } => Message::new("ACK").with_field("CMD", command.as_str()),
            DeviceReply::Nack {
                command,
                code,
                message,
            } => Message::new("NACK")
                .with_field("CMD", command.as_str())
                .with_field("ERR", code.code().to_string())
                .with_quoted("MSG", message.as_str()),
            DeviceReply::Cap { caps } => Message::new("CAP").with_arg(caps.to_string()),
            DeviceReply::Pong { ts } => Message::new("PONG").with_field("TS", ts.to_string()),
            DeviceReply::Error { code, message } => Message::new("ERR")
                .with_field("ERR", code.code().to_string())
                .with_quoted("MSG", message.as_str()),
            DeviceReply::Event { buttons } => {
                let msg = Message::new("EVENT");
                match json_payload("BTN", buttons) {
                    Some(json) => msg.with_json(json),
                    None => msg,
                }
            }
            DeviceReply::LegacyOk => Message::new("OK"),
            DeviceReply::LegacyErr { text } => text
                .split_whitespace()
                .fold(Message::new("ERR"), |msg, word| msg.with_arg(word)),
        }
    }

    /// Lifts a decoded line into a typed reply.
    pub fn from_message(msg: &Message) -> Result<Self, MessageError> {
        let command = msg.command.to_ascii_uppercase();
        match command.as_str() {
            "HELLO" => Ok(DeviceReply::Hello {
                version: parsed(required(msg, "HELLO", "V")?, "HELLO", "V")?,
                caps: parsed(required(msg, "HELLO", "CAP")?, "HELLO", "CAP")?,
                name: msg.field("NAME").unwrap_or_default().to_string(),
                firmware: msg.field("FW").unwrap_or_default().to_string(),
            }),
            "ACK" => Ok(DeviceReply::Ack {
                command: required(msg, "ACK", "CMD")?.to_string(),
            }),
            "NACK" => Ok(DeviceReply::Nack {
                command: required(msg, "NACK", "CMD")?.to_string(),
                code: error_code(msg, "NACK")?,
                message: msg.field("MSG").unwrap_or_default().to_string(),
            }),
            "CAP" => {
                let value = msg.arg(0).ok_or(MessageError::MissingField {
                    command: "CAP",
                    field: "mask",
                })?;
                Ok(DeviceReply::Cap {
                    caps: parsed(value, "CAP", "mask")?,
                })
            }
            "PONG" => Ok(DeviceReply::Pong {
                ts: match msg.field("TS") {
                    Some(v) => parsed(v, "PONG", "TS")?,
                    None => 0,
                },
            }),
            "ERR" if msg.field("ERR").is_some() => Ok(DeviceReply::Error {
                code: error_code(msg, "ERR")?,
                message: msg.field("MSG").unwrap_or_default().to_string(),
            }),
            "ERR" => {
                // Free text is taken as received; a message built in code
                // has no tail, so fall back to its encoded form.
                let text = if msg.tail.is_empty() {
                    let line = codec::encode(msg);
                    line.get(msg.command.len()..)
                        .unwrap_or_default()
                        .trim_start()
                        .to_string()
                } else {
                    msg.tail.clone()
                };
                Ok(DeviceReply::LegacyErr { text })
            }
            "EVENT" => Ok(DeviceReply::Event {
                buttons: json_field(msg, "EVENT", "BTN")?,
            }),
            "OK" => Ok(DeviceReply::LegacyOk),
            _ => Err(MessageError::UnknownCommand(msg.command.clone())),
        }
    }
}

fn error_code(msg: &Message, command: &'static str) -> Result<ErrorCode, MessageError> {
    let raw = required(msg, command, "ERR")?;
    raw.parse::<u8>()
        .ok()
        .and_then(|n| ErrorCode::try_from(n).ok())
        .ok_or_else(|| MessageError::BadField {
            command,
            field: "ERR",
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{decode, encode};

    fn host(line: &str) -> Result<HostCommand, MessageError> {
        HostCommand::from_message(&decode(line))
    }

    fn device(line: &str) -> Result<DeviceReply, MessageError> {
        DeviceReply::from_message(&decode(line))
    }

    // ── ProtocolVersion ──────────────────────────────────────────────────────

    #[test]
    fn test_version_display_and_parse() {
        assert_eq!(PROTOCOL_VERSION.to_string(), "2.0");
        assert_eq!("2.7".parse(), Ok(ProtocolVersion::new(2, 7)));
        assert!("2".parse::<ProtocolVersion>().is_err());
        assert!("two.0".parse::<ProtocolVersion>().is_err());
        assert!("300.0".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_version_compatibility_ignores_minor() {
        assert!(PROTOCOL_VERSION.is_compatible(ProtocolVersion::new(2, 9)));
        assert!(!PROTOCOL_VERSION.is_compatible(ProtocolVersion::new(1, 0)));
        assert!(!PROTOCOL_VERSION.is_compatible(ProtocolVersion::new(3, 0)));
    }

    // ── ErrorCode ────────────────────────────────────────────────────────────

    #[test]
    fn test_error_code_try_from_valid_and_invalid() {
        assert_eq!(ErrorCode::try_from(3), Ok(ErrorCode::ModeUnsupported));
        assert_eq!(ErrorCode::try_from(6), Ok(ErrorCode::Internal));
        assert!(ErrorCode::try_from(0).is_err());
        assert!(ErrorCode::try_from(7).is_err());
    }

    #[test]
    fn test_message_error_codes() {
        assert_eq!(host("FOO").unwrap_err().code(), ErrorCode::UnknownCmd);
        assert_eq!(host("SET").unwrap_err().code(), ErrorCode::BadArgs);
        assert_eq!(host("SET MODE=bogus").unwrap_err().code(), ErrorCode::ModeUnsupported);
    }

    // ── HostCommand ──────────────────────────────────────────────────────────

    #[test]
    fn test_host_hello_round_trip() {
        // Arrange
        let cmd = HostCommand::Hello {
            version: PROTOCOL_VERSION,
            req_caps: CapabilitySet::ALL,
            name: DEFAULT_APP_NAME.to_string(),
        };

        // Act
        let line = encode(&cmd.to_message());

        // Assert
        assert_eq!(line, r#"HELLO V=2.0 REQCAP=0xFFFFFFFF NAME="bongo_cat_app""#);
        assert_eq!(host(&line), Ok(cmd));
    }

    #[test]
    fn test_host_hello_with_bad_version_is_bad_field() {
        assert!(matches!(
            host("HELLO V=abc"),
            Err(MessageError::BadField { field: "V", .. })
        ));
    }

    #[test]
    fn test_ping_timestamp_variants() {
        assert_eq!(host("PING TS=42"), Ok(HostCommand::Ping { ts: Some(42) }));
        assert_eq!(host("PING"), Ok(HostCommand::Ping { ts: None }));
        assert_eq!(host("PING TS=soon"), Ok(HostCommand::Ping { ts: None }));
    }

    #[test]
    fn test_get_requires_cap_argument() {
        assert_eq!(host("GET CAP"), Ok(HostCommand::GetCap));
        assert_eq!(host("get cap"), Ok(HostCommand::GetCap));
        assert!(matches!(host("GET TIME"), Err(MessageError::UnknownCommand(_))));
    }

    #[test]
    fn test_set_mode_variants() {
        assert_eq!(
            host("SET MODE=tutor"),
            Ok(HostCommand::SetMode { mode: Mode::Tutor })
        );
        assert_eq!(
            host("SET MODE=bogus"),
            Err(MessageError::UnsupportedMode("bogus".to_string()))
        );
        assert!(matches!(host("SET MODE="), Err(MessageError::MissingField { .. })));
    }

    #[test]
    fn test_trigger_structured_and_legacy_forms() {
        assert_eq!(
            host("TRIGGER NAME=meme_surprise"),
            Ok(HostCommand::Trigger {
                name: "meme_surprise".to_string()
            })
        );
        assert_eq!(
            host("TRIGGER lol"),
            Ok(HostCommand::LegacyTrigger {
                id: "lol".to_string()
            })
        );
        assert!(matches!(
            host("TRIGGER"),
            Err(MessageError::MissingField { field: "NAME", .. })
        ));
    }

    #[test]
    fn test_data_temps_parse_and_encode() {
        // Act
        let cmd = host(r#"DATA TEMPS={"cpu":1.0,"gpu":2.0}"#).unwrap();

        // Assert
        assert_eq!(
            cmd,
            HostCommand::Data {
                temps: Temps::new(Some(1.0), Some(2.0))
            }
        );
        assert_eq!(encode(&cmd.to_message()), r#"DATA TEMPS={"cpu":1.0,"gpu":2.0}"#);
    }

    #[test]
    fn test_data_partial_temps_omit_missing_reading() {
        let cmd = HostCommand::Data {
            temps: Temps::new(Some(40.5), None),
        };
        assert_eq!(encode(&cmd.to_message()), r#"DATA TEMPS={"cpu":40.5}"#);
    }

    #[test]
    fn test_data_malformed_or_missing_json_is_bad_args() {
        let malformed = host(r#"DATA TEMPS={"cpu":"#).unwrap_err();
        let missing = host("DATA").unwrap_err();
        let wrong_type = host(r#"DATA TEMPS={"cpu":"hot"}"#).unwrap_err();
        let empty = host("DATA TEMPS={}").unwrap_err();

        for err in [malformed, missing, wrong_type, empty] {
            assert_eq!(err.code(), ErrorCode::BadArgs, "{err}");
        }
    }

    #[test]
    fn test_legacy_mode_keeps_unvalidated_name() {
        assert_eq!(
            host("MODE party"),
            Ok(HostCommand::LegacyMode {
                mode: "party".to_string()
            })
        );
        assert!(host("MODE").is_err());
    }

    // ── DeviceReply ──────────────────────────────────────────────────────────

    #[test]
    fn test_device_hello_parse() {
        let reply = device(r#"HELLO V=2.0 CAP=0x00000037 NAME="esp32" FW=2025.09.26"#).unwrap();
        assert_eq!(
            reply,
            DeviceReply::Hello {
                version: PROTOCOL_VERSION,
                caps: CapabilitySet::REFERENCE_DEVICE,
                name: DEFAULT_DEVICE_NAME.to_string(),
                firmware: DEFAULT_FIRMWARE.to_string(),
            }
        );
    }

    #[test]
    fn test_device_hello_without_cap_is_rejected() {
        assert!(matches!(
            device("HELLO V=2.0"),
            Err(MessageError::MissingField { field: "CAP", .. })
        ));
    }

    #[test]
    fn test_nack_round_trip() {
        let reply = DeviceReply::nack("SET", ErrorCode::ModeUnsupported, "mode");
        let line = encode(&reply.to_message());
        assert_eq!(line, r#"NACK CMD=SET ERR=3 MSG="mode""#);
        assert_eq!(device(&line), Ok(reply));
    }

    #[test]
    fn test_nack_with_unknown_code_is_rejected() {
        assert!(matches!(
            device("NACK CMD=SET ERR=99"),
            Err(MessageError::BadField { field: "ERR", .. })
        ));
    }

    #[test]
    fn test_err_structured_vs_legacy() {
        assert_eq!(
            device(r#"ERR ERR=2 MSG="line too long""#),
            Ok(DeviceReply::Error {
                code: ErrorCode::BadArgs,
                message: "line too long".to_string()
            })
        );
        assert_eq!(
            device("ERR unknown trigger"),
            Ok(DeviceReply::LegacyErr {
                text: "unknown trigger".to_string()
            })
        );
    }

    #[test]
    fn test_legacy_err_keeps_firmware_text_as_written() {
        assert_eq!(
            device("ERR mode=x  unsupported"),
            Ok(DeviceReply::LegacyErr {
                text: "mode=x  unsupported".to_string()
            })
        );
    }

    #[test]
    fn test_legacy_err_encodes_free_text() {
        let reply = DeviceReply::LegacyErr {
            text: "unknown trigger".to_string(),
        };
        assert_eq!(encode(&reply.to_message()), "ERR unknown trigger");
    }

    #[test]
    fn test_cap_and_pong_parse() {
        assert_eq!(
            device("CAP 0x00000037"),
            Ok(DeviceReply::Cap {
                caps: CapabilitySet(0x37)
            })
        );
        assert_eq!(device("PONG TS=42"), Ok(DeviceReply::Pong { ts: 42 }));
        assert!(device("CAP").is_err());
    }

    #[test]
    fn test_event_buttons_round_trip() {
        // Arrange
        let reply = DeviceReply::Event {
            buttons: ButtonState::new(false, true),
        };

        // Act
        let line = encode(&reply.to_message());

        // Assert
        assert_eq!(line, r#"EVENT BTN={"a":0,"b":1}"#);
        let parsed = device(&line).unwrap();
        match parsed {
            DeviceReply::Event { buttons } => {
                assert!(!buttons.a_pressed());
                assert!(buttons.b_pressed());
            }
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn test_ok_is_legacy_ok() {
        assert_eq!(device("OK"), Ok(DeviceReply::LegacyOk));
        assert_eq!(encode(&DeviceReply::LegacyOk.to_message()), "OK");
    }

    #[test]
    fn test_unknown_device_line() {
        assert!(matches!(device("WAT 1"), Err(MessageError::UnknownCommand(_))));
    }
}
