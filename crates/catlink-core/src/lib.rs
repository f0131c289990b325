//! # catlink-core
//!
//! Line protocol engine shared by the catlink host application and the
//! display device firmware simulator.
//!
//! This crate has no dependency on sockets, serial ports or an async runtime.
//! It turns bytes into typed messages and back, and tracks per-link session
//! state through plain state machines that are handed the current time.
//!
//! # Architecture overview (for beginners)
//!
//! A host application talks to a small display peripheral over a serial
//! link.  Every message is one line of text such as `SET MODE=tutor`.
//! Before using optional features the two sides shake hands with `HELLO`,
//! agreeing on a protocol version and learning which features (capability
//! bits) the device supports.  Old firmware that never learned `HELLO`
//! still works through a reduced "legacy" vocabulary.
//!
//! - **`protocol`** – Bytes to lines ([`LineFramer`]), lines to
//!   [`Message`]s ([`decode`] / [`encode`]), and messages to the typed
//!   [`HostCommand`] / [`DeviceReply`] enums.
//!
//! - **`domain`** – The handshake ([`HostNegotiator`], [`DeviceNegotiator`]),
//!   the per-link [`SessionState`], and deadline bookkeeping.

pub mod domain;
pub mod protocol;

pub use domain::negotiation::{
    DeviceIdentity, DeviceNegotiator, HostAction, HostNegotiator, NegotiationError,
    NegotiationOutcome, PeerInfo,
};
pub use domain::session::{LegacyReason, PendingRequest, SessionState};
pub use domain::timers::{Deadline, TimerConfig};
pub use protocol::capabilities::CapabilitySet;
pub use protocol::codec::{decode, encode, encode_line, CodecError, Message};
pub use protocol::framer::{Line, LineFramer, OverflowPolicy, MAX_LINE_LEN};
pub use protocol::messages::{
    ButtonState, DeviceReply, ErrorCode, HostCommand, MessageError, Mode, ProtocolVersion, Temps,
    PROTOCOL_VERSION,
};
