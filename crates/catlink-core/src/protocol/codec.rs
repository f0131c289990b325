//! Text codec for catlink protocol lines.
//!
//! Wire shape:
//! ```text
//! COMMAND [ARG ...] [KEY=VALUE ...] [JSON]
//! ```
//! `VALUE` is either bare (runs to the next space) or double-quoted (spaces
//! allowed).  A token or value starting with `{` opens the JSON payload,
//! which always runs to the end of the line.
//!
//! Decoding is total: any line produces a [`Message`].  Content that does not
//! fit the grammar is preserved verbatim (as a bare field value or a
//! positional argument) so the receiver can answer `BAD_ARGS` instead of the
//! codec failing.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::framer::MAX_LINE_LEN;

/// Errors that can occur while encoding a [`Message`] for the wire.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The encoded line would not fit in a single frame.
    #[error("encoded line is {len} bytes, limit is {max}")]
    LineTooLong { len: usize, max: usize },

    /// The command name is empty or contains whitespace.
    #[error("invalid command name: {0:?}")]
    InvalidCommand(String),

    /// Some token contains a line terminator.
    #[error("embedded line terminator in {0}")]
    EmbeddedTerminator(&'static str),

    /// A bare token that would decode as something else (it contains a
    /// space, an `=`, or starts with `{` or `"`).
    #[error("token {0:?} cannot be sent unquoted")]
    InvalidToken(String),
}

/// A field value as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Unquoted scalar (`CMD=SET`, `CAP=0x00000037`).
    Bare(String),
    /// Double-quoted string (`NAME="esp32"`).
    Quoted(String),
}

impl FieldValue {
    /// The value text without quotes.
    pub fn as_str(&self) -> &str {
        match self {
            FieldValue::Bare(s) | FieldValue::Quoted(s) => s,
        }
    }
}

/// One `KEY=VALUE` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: String,
    pub value: FieldValue,
}

/// Trailing JSON payload, kept as raw text plus its parsed form.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPayload {
    /// Key the payload was attached to (`TEMPS` in `DATA TEMPS={...}`), if any.
    pub key: Option<String>,
    /// Exact wire text, used for byte-identical re-encoding.
    pub raw: String,
    /// Parsed value.
    pub value: Value,
}

impl JsonPayload {
    /// Builds a payload by serializing `value` compactly.
    pub fn from_serialize<T: serde::Serialize>(
        key: Option<&str>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        let raw = serde_json::to_string(&value)?;
        Ok(Self {
            key: key.map(str::to_string),
            raw,
            value,
        })
    }

    /// Deserializes the payload into a typed structure.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }
}

/// A decoded protocol line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    /// Command word, stored verbatim.
    pub command: String,
    /// Bare positional tokens (`CAP` in `GET CAP`, `normal` in `MODE normal`).
    pub args: Vec<String>,
    /// `KEY=VALUE` pairs in wire order; a repeated key overwrites in place.
    pub fields: Vec<Field>,
    /// Optional trailing JSON payload.
    pub json: Option<JsonPayload>,
    /// Everything after the command word exactly as received.  Empty for
    /// messages built in code; [`encode`] ignores it.
    pub tail: String,
}

impl Message {
    /// Creates a message with only a command word.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Appends a positional argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets a bare `KEY=VALUE` field.
    pub fn with_field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_field(key, FieldValue::Bare(value.into()));
        self
    }

    /// Sets a quoted `KEY="VALUE"` field.
    pub fn with_quoted(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_field(key, FieldValue::Quoted(value.into()));
        self
    }

    /// Attaches the trailing JSON payload.
    pub fn with_json(mut self, payload: JsonPayload) -> Self {
        self.json = Some(payload);
        self
    }

    /// Inserts or overwrites a field; an existing key keeps its position.
    pub fn set_field(&mut self, key: &str, value: FieldValue) {
        match self
            .fields
            .iter_mut()
            .find(|f| f.key.eq_ignore_ascii_case(key))
        {
            Some(existing) => existing.value = value,
            None => self.fields.push(Field {
                key: key.to_string(),
                value,
            }),
        }
    }

    /// Case-insensitive command comparison.
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }

    /// Looks up a field value by case-insensitive key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key.eq_ignore_ascii_case(key))
            .map(|f| f.value.as_str())
    }

    /// Returns the positional argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Returns the JSON payload if it was attached to `key`.
    pub fn json_for(&self, key: &str) -> Option<&JsonPayload> {
        self.json
            .as_ref()
            .filter(|j| j.key.as_deref().is_some_and(|k| k.eq_ignore_ascii_case(key)))
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one framed line into a [`Message`].  Never fails.
///
/// # Examples
///
/// ```rust
/// use catlink_core::protocol::codec::decode;
///
/// let msg = decode(r#"HELLO V=2.0 CAP=0x00000037 NAME="esp32" FW=2025.09.26"#);
/// assert!(msg.is("HELLO"));
/// assert_eq!(msg.field("cap"), Some("0x00000037"));
/// assert_eq!(msg.field("NAME"), Some("esp32"));
/// ```
pub fn decode(line: &str) -> Message {
    let line = line.trim();
    let (command, rest) = match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx..].trim_start()),
        None => (line, ""),
    };

    let mut msg = Message::new(command);
    msg.tail = rest.to_string();
    let mut rest = rest;

    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }

        if rest.starts_with('{') {
            attach_json(&mut msg, None, rest);
            break;
        }

        let token_end = rest.find(' ').unwrap_or(rest.len());
        let eq = rest[..token_end].find('=').filter(|&i| i > 0);
        let Some(eq) = eq else {
            msg.args.push(rest[..token_end].to_string());
            rest = &rest[token_end..];
            continue;
        };

        let key = &rest[..eq];
        let after = &rest[eq + 1..];

        if after.starts_with('{') {
            attach_json(&mut msg, Some(key), after);
            break;
        }

        if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(close) => {
                    msg.set_field(key, FieldValue::Quoted(quoted[..close].to_string()));
                    rest = &quoted[close + 1..];
                }
                None => {
                    // Unterminated quote: keep the remainder verbatim.
                    msg.set_field(key, FieldValue::Bare(after.to_string()));
                    break;
                }
            }
            continue;
        }

        let value_end = after.find(' ').unwrap_or(after.len());
        msg.set_field(key, FieldValue::Bare(after[..value_end].to_string()));
        rest = &after[value_end..];
    }

    msg
}

/// Encodes a [`Message`] as line text (no terminator).
///
/// For any line produced by [`decode`] from well-formed input this is the
/// exact inverse.  Double quotes inside a quoted value are not representable
/// and are replaced with single quotes.
pub fn encode(msg: &Message) -> String {
    let mut out = String::with_capacity(64);
    out.push_str(&msg.command);
    for arg in &msg.args {
        out.push(' ');
        out.push_str(arg);
    }
    for field in &msg.fields {
        out.push(' ');
        out.push_str(&field.key);
        out.push('=');
        match &field.value {
            FieldValue::Bare(v) => out.push_str(v),
            FieldValue::Quoted(v) => {
                out.push('"');
                out.push_str(&v.replace('"', "'"));
                out.push('"');
            }
        }
    }
    if let Some(json) = &msg.json {
        out.push(' ');
        if let Some(key) = &json.key {
            out.push_str(key);
            out.push('=');
        }
        out.push_str(&json.raw);
    }
    out
}

/// Encodes a [`Message`] into wire bytes including the `\n` terminator.
///
/// # Errors
///
/// Returns [`CodecError`] if the command is not a single word, a token
/// contains a line terminator, a bare token would not decode back to
/// itself, or the line exceeds [`MAX_LINE_LEN`].
pub fn encode_line(msg: &Message) -> Result<Vec<u8>, CodecError> {
    if msg.command.is_empty() || msg.command.contains(char::is_whitespace) {
        return Err(CodecError::InvalidCommand(msg.command.clone()));
    }
    let text = encode(msg);
    if text.contains(|c| c == '\n' || c == '\r') {
        return Err(CodecError::EmbeddedTerminator("message body"));
    }
    check_tokens(msg)?;
    if text.len() > MAX_LINE_LEN {
        return Err(CodecError::LineTooLong {
            len: text.len(),
            max: MAX_LINE_LEN,
        });
    }
    let mut bytes = text.into_bytes();
    bytes.push(b'\n');
    Ok(bytes)
}

fn check_tokens(msg: &Message) -> Result<(), CodecError> {
    for arg in &msg.args {
        let becomes_field = arg.find('=').is_some_and(|i| i > 0);
        if arg.is_empty() || arg.contains(char::is_whitespace) || becomes_field || arg.starts_with('{')
        {
            return Err(CodecError::InvalidToken(arg.clone()));
        }
    }
    for field in &msg.fields {
        let key = &field.key;
        if key.is_empty()
            || key.contains(|c: char| c.is_whitespace() || c == '=')
            || key.starts_with('{')
        {
            return Err(CodecError::InvalidToken(key.clone()));
        }
        if let FieldValue::Bare(value) = &field.value {
            if value.contains(char::is_whitespace) || value.starts_with(['"', '{']) {
                return Err(CodecError::InvalidToken(format!("{key}={value}")));
            }
        }
    }
    Ok(())
}

fn attach_json(msg: &mut Message, key: Option<&str>, raw: &str) {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => {
            msg.json = Some(JsonPayload {
                key: key.map(str::to_string),
                raw: raw.to_string(),
                value,
            });
        }
        // Not valid JSON: keep it verbatim so the receiver can reject it.
        Err(_) => match key {
            Some(key) => msg.set_field(key, FieldValue::Bare(raw.to_string())),
            None => msg.args.push(raw.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(line: &str) -> String {
        encode(&decode(line))
    }

    // ── decode ───────────────────────────────────────────────────────────────

    #[test]
    fn test_decode_hello_reply_fields() {
        // Arrange
        let line = r#"HELLO V=2.0 CAP=0x00000037 NAME="esp32" FW=2025.09.26"#;

        // Act
        let msg = decode(line);

        // Assert
        assert_eq!(msg.command, "HELLO");
        assert_eq!(msg.field("V"), Some("2.0"));
        assert_eq!(msg.field("CAP"), Some("0x00000037"));
        assert_eq!(msg.field("NAME"), Some("esp32"));
        assert_eq!(msg.field("FW"), Some("2025.09.26"));
        assert!(msg.json.is_none());
    }

    #[test]
    fn test_decode_positional_argument() {
        let msg = decode("CAP 0x00000037");
        assert!(msg.is("cap"));
        assert_eq!(msg.arg(0), Some("0x00000037"));
        assert!(msg.fields.is_empty());
    }

    #[test]
    fn test_decode_quoted_value_with_spaces() {
        let msg = decode(r#"NACK CMD=SET ERR=3 MSG="mode not supported""#);
        assert_eq!(msg.field("MSG"), Some("mode not supported"));
        assert_eq!(msg.field("ERR"), Some("3"));
    }

    #[test]
    fn test_decode_keyed_json_payload() {
        // Act
        let msg = decode(r#"DATA TEMPS={"cpu":42.5,"gpu":55.0}"#);

        // Assert
        let json = msg.json_for("TEMPS").expect("json payload");
        assert_eq!(json.value, json!({"cpu": 42.5, "gpu": 55.0}));
        assert!(msg.field("TEMPS").is_none(), "JSON must not be duplicated as a field");
    }

    #[test]
    fn test_decode_json_with_spaces_runs_to_end_of_line() {
        let msg = decode(r#"EVENT BTN={"a": 1, "b": 0}"#);
        let json = msg.json_for("BTN").expect("json payload");
        assert_eq!(json.value, json!({"a": 1, "b": 0}));
        assert_eq!(json.raw, r#"{"a": 1, "b": 0}"#);
    }

    #[test]
    fn test_decode_keyless_json_payload() {
        let msg = decode(r#"EVENT {"a":0}"#);
        let json = msg.json.expect("json");
        assert_eq!(json.key, None);
        assert_eq!(json.value, json!({"a": 0}));
    }

    #[test]
    fn test_decode_malformed_json_is_preserved_as_field() {
        let msg = decode(r#"DATA TEMPS={"cpu":"#);
        assert!(msg.json.is_none());
        assert_eq!(msg.field("TEMPS"), Some(r#"{"cpu":"#));
    }

    #[test]
    fn test_decode_unterminated_quote_is_kept_verbatim() {
        let msg = decode(r#"HELLO V=2.0 NAME="bongo cat"#);
        assert_eq!(msg.field("V"), Some("2.0"));
        assert_eq!(msg.field("NAME"), Some(r#""bongo cat"#));
    }

    #[test]
    fn test_decode_duplicate_key_last_wins_in_first_position() {
        let msg = decode("SET MODE=normal X=1 MODE=tutor");
        assert_eq!(msg.field("MODE"), Some("tutor"));
        assert_eq!(msg.fields[0].key, "MODE");
        assert_eq!(msg.fields.len(), 2);
    }

    #[test]
    fn test_decode_field_lookup_is_case_insensitive() {
        let msg = decode("ping ts=7");
        assert!(msg.is("PING"));
        assert_eq!(msg.field("TS"), Some("7"));
    }

    #[test]
    fn test_decode_collapses_repeated_spaces() {
        let msg = decode("ACK    CMD=SET");
        assert_eq!(msg.field("CMD"), Some("SET"));
    }

    #[test]
    fn test_decode_empty_line_yields_empty_command() {
        let msg = decode("   ");
        assert!(msg.command.is_empty());
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_decode_token_with_leading_equals_is_an_argument() {
        let msg = decode("ERR =oops");
        assert_eq!(msg.arg(0), Some("=oops"));
    }

    // ── encode ───────────────────────────────────────────────────────────────

    #[test]
    fn test_round_trip_documented_lines() {
        let lines = [
            r#"HELLO V=2.0 REQCAP=0xFFFFFFFF NAME="bongo_cat_app""#,
            r#"HELLO V=2.0 CAP=0x00000037 NAME="esp32" FW=2025.09.26"#,
            "PING TS=1700000000",
            "PONG TS=42",
            "GET CAP",
            "CAP 0x00000037",
            "SET MODE=tutor",
            "TRIGGER NAME=meme_surprise",
            r#"DATA TEMPS={"cpu":1.0,"gpu":2.0}"#,
            "ACK CMD=DATA",
            r#"NACK CMD=? ERR=1 MSG="unknown""#,
            r#"ERR ERR=2 MSG="line too long""#,
            r#"EVENT BTN={"a":0,"b":1}"#,
            "MODE normal",
            "TRIGGER lol",
            "OK",
            "ERR unknown trigger",
        ];
        for line in lines {
            assert_eq!(round_trip(line), line, "round trip failed for {line:?}");
        }
    }

    #[test]
    fn test_encode_builder_output() {
        // Arrange
        let msg = Message::new("NACK")
            .with_field("CMD", "TRIGGER")
            .with_field("ERR", "4")
            .with_quoted("MSG", "id");

        // Act / Assert
        assert_eq!(encode(&msg), r#"NACK CMD=TRIGGER ERR=4 MSG="id""#);
    }

    #[test]
    fn test_encode_replaces_embedded_double_quotes() {
        let msg = Message::new("HELLO").with_quoted("NAME", r#"a "b""#);
        assert_eq!(encode(&msg), r#"HELLO NAME="a 'b'""#);
    }

    #[test]
    fn test_encode_line_appends_newline() {
        let bytes = encode_line(&Message::new("OK")).unwrap();
        assert_eq!(bytes, b"OK\n");
    }

    #[test]
    fn test_encode_line_rejects_overlong_line() {
        let msg = Message::new("TRIGGER").with_field("NAME", "x".repeat(MAX_LINE_LEN));
        assert!(matches!(
            encode_line(&msg),
            Err(CodecError::LineTooLong { max: MAX_LINE_LEN, .. })
        ));
    }

    #[test]
    fn test_encode_line_rejects_embedded_newline() {
        let msg = Message::new("ERR").with_arg("a\nb");
        assert_eq!(
            encode_line(&msg),
            Err(CodecError::EmbeddedTerminator("message body"))
        );
    }

    #[test]
    fn test_encode_line_rejects_tokens_that_decode_differently() {
        // Arrange
        let cases = [
            Message::new("TRIGGER").with_field("NAME", "foo bar"),
            Message::new("TRIGGER").with_arg("a=b"),
            Message::new("MODE").with_arg("two words"),
            Message::new("SET").with_field("MODE", "{x}"),
            Message::new("SET").with_field("MODE", "\"tutor"),
            Message::new("ERR").with_arg(""),
        ];

        // Act / Assert
        for msg in cases {
            assert!(
                matches!(encode_line(&msg), Err(CodecError::InvalidToken(_))),
                "{msg:?} should be refused"
            );
        }
    }

    #[test]
    fn test_encode_line_accepts_quoted_spaces_and_leading_equals_arg() {
        let msg = Message::new("HELLO").with_quoted("NAME", "bongo cat");
        assert_eq!(encode_line(&msg).unwrap(), b"HELLO NAME=\"bongo cat\"\n");
        assert!(encode_line(&Message::new("ERR").with_arg("=oops")).is_ok());
    }

    #[test]
    fn test_decode_keeps_tail_verbatim() {
        let msg = decode("ERR  mode=x   unsupported");
        assert_eq!(msg.tail, "mode=x   unsupported");
        assert_eq!(msg.field("mode"), Some("x"));
    }

    #[test]
    fn test_encode_line_rejects_empty_command() {
        assert!(matches!(
            encode_line(&Message::default()),
            Err(CodecError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_json_payload_from_serialize_is_compact() {
        let payload = JsonPayload::from_serialize(Some("BTN"), &json!({"a": 1})).unwrap();
        assert_eq!(payload.raw, r#"{"a":1}"#);
        let msg = Message::new("EVENT").with_json(payload);
        assert_eq!(encode(&msg), r#"EVENT BTN={"a":1}"#);
    }
}
