//! Wire protocol: line framing, the text codec, capabilities and the typed
//! message vocabulary.

pub mod capabilities;
pub mod codec;
pub mod framer;
pub mod messages;

pub use capabilities::{CapabilitySet, ParseCapabilityError};
pub use codec::{decode, encode, encode_line, CodecError, Field, FieldValue, JsonPayload, Message};
pub use framer::{Line, LineFramer, OverflowPolicy, MAX_LINE_LEN};
pub use messages::*;
