//! Line framing for the serial byte stream.
//!
//! The link carries newline-terminated UTF-8 text.  A [`LineFramer`] sits
//! between the raw transport and the codec: it is fed whatever bytes happen
//! to be available and hands back zero or more complete [`Line`]s.
//!
//! # Memory bound
//!
//! The accumulation buffer never holds more than [`MAX_LINE_LEN`] bytes.
//! What happens when a line runs past that bound is chosen by
//! [`OverflowPolicy`]:
//!
//! - [`OverflowPolicy::Flag`] keeps the first [`MAX_LINE_LEN`] bytes, drops
//!   the rest up to the terminator, and delivers the line with
//!   [`Line::oversized`] set so the receiver can answer `BAD_ARGS`.
//! - [`OverflowPolicy::EvictOldest`] mirrors older firmware: the oldest bytes
//!   are evicted so the buffer holds the most recent [`MAX_LINE_LEN`] bytes,
//!   and the (silently truncated) line is delivered as if it were whole.

use serde::{Deserialize, Serialize};

/// Maximum number of bytes in a single protocol line (terminator excluded).
pub const MAX_LINE_LEN: usize = 240;

/// Behaviour when a line exceeds [`MAX_LINE_LEN`] before its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the head of the line and mark it oversized.
    #[default]
    Flag,
    /// Keep the tail of the line (sliding window), no marker.
    EvictOldest,
}

/// One framed line, with `\r` stripped and the `\n` terminator removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line text; invalid UTF-8 sequences are replaced with U+FFFD.
    pub text: String,
    /// `true` when the line overflowed [`MAX_LINE_LEN`] under
    /// [`OverflowPolicy::Flag`].
    pub oversized: bool,
}

impl Line {
    /// Creates a regular (not oversized) line.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            oversized: false,
        }
    }
}

/// Splits a byte stream into [`Line`]s.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    policy: OverflowPolicy,
    overflowed: bool,
}

impl LineFramer {
    /// Creates a framer using [`OverflowPolicy::Flag`].
    pub fn new() -> Self {
        Self::with_policy(OverflowPolicy::Flag)
    }

    /// Creates a framer with an explicit overflow policy.
    pub fn with_policy(policy: OverflowPolicy) -> Self {
        Self {
            buf: Vec::with_capacity(MAX_LINE_LEN),
            policy,
            overflowed: false,
        }
    }

    /// Returns the configured overflow policy.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Feeds raw bytes and returns every line they complete.
    ///
    /// Never blocks and never fails; bytes after the last terminator stay
    /// buffered for the next call.  Empty lines are skipped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();
        for &byte in bytes {
            match byte {
                b'\r' => {}
                b'\n' => {
                    if let Some(line) = self.take_line() {
                        lines.push(line);
                    }
                }
                _ => self.push_byte(byte),
            }
        }
        lines
    }

    /// Number of bytes currently buffered (always `<= MAX_LINE_LEN`).
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Drops any partial line, e.g. when the link closes.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }

    fn push_byte(&mut self, byte: u8) {
        if self.buf.len() < MAX_LINE_LEN {
            self.buf.push(byte);
            return;
        }
        match self.policy {
            OverflowPolicy::Flag => self.overflowed = true,
            OverflowPolicy::EvictOldest => {
                self.buf.remove(0);
                self.buf.push(byte);
            }
        }
    }

    fn take_line(&mut self) -> Option<Line> {
        let oversized = std::mem::take(&mut self.overflowed);
        if self.buf.is_empty() && !oversized {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(Line { text, oversized })
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_single_complete_line() {
        // Arrange
        let mut framer = LineFramer::new();

        // Act
        let lines = framer.feed(b"PING TS=42\n");

        // Assert
        assert_eq!(lines, vec![Line::new("PING TS=42")]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn test_feed_strips_carriage_return() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"GET CAP\r\n");
        assert_eq!(lines[0].text, "GET CAP");
    }

    #[test]
    fn test_partial_line_is_buffered_across_calls() {
        // Arrange
        let mut framer = LineFramer::new();

        // Act
        let first = framer.feed(b"SET MO");
        let second = framer.feed(b"DE=tutor\nPI");

        // Assert
        assert!(first.is_empty(), "no terminator yet");
        assert_eq!(second, vec![Line::new("SET MODE=tutor")]);
        assert_eq!(framer.pending_len(), 2, "\"PI\" stays buffered");
    }

    #[test]
    fn test_multiple_lines_in_one_feed() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"OK\nERR id\nPONG TS=0\n");
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, ["OK", "ERR id", "PONG TS=0"]);
    }

    #[test]
    fn test_empty_lines_are_skipped() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"\n\r\n\nOK\n");
        assert_eq!(lines, vec![Line::new("OK")]);
    }

    #[test]
    fn test_unterminated_stream_never_exceeds_bound() {
        // Arrange
        let mut framer = LineFramer::new();
        let junk = vec![b'x'; MAX_LINE_LEN * 10];

        // Act
        let lines = framer.feed(&junk);

        // Assert
        assert!(lines.is_empty());
        assert_eq!(framer.pending_len(), MAX_LINE_LEN);
    }

    #[test]
    fn test_flag_policy_marks_oversized_line_and_keeps_head() {
        // Arrange
        let mut framer = LineFramer::with_policy(OverflowPolicy::Flag);
        let mut input = b"TRIGGER NAME=".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN));
        input.push(b'\n');

        // Act
        let lines = framer.feed(&input);

        // Assert
        assert_eq!(lines.len(), 1);
        assert!(lines[0].oversized);
        assert_eq!(lines[0].text.len(), MAX_LINE_LEN);
        assert!(lines[0].text.starts_with("TRIGGER NAME="));
    }

    #[test]
    fn test_flag_policy_recovers_after_oversized_line() {
        let mut framer = LineFramer::new();
        let mut input = vec![b'z'; MAX_LINE_LEN + 5];
        input.extend_from_slice(b"\nPING\n");

        let lines = framer.feed(&input);

        assert_eq!(lines.len(), 2);
        assert!(lines[0].oversized);
        assert_eq!(lines[1], Line::new("PING"));
    }

    #[test]
    fn test_evict_oldest_policy_keeps_tail() {
        // Arrange
        let mut framer = LineFramer::with_policy(OverflowPolicy::EvictOldest);
        let mut input = vec![b'x'; 10];
        input.extend(std::iter::repeat(b'y').take(MAX_LINE_LEN));
        input.push(b'\n');

        // Act
        let lines = framer.feed(&input);

        // Assert – the leading x's were evicted, no oversized marker
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].oversized);
        assert_eq!(lines[0].text, "y".repeat(MAX_LINE_LEN));
    }

    #[test]
    fn test_line_of_exactly_max_len_is_not_oversized() {
        let mut framer = LineFramer::new();
        let mut input = vec![b'a'; MAX_LINE_LEN];
        input.push(b'\n');
        let lines = framer.feed(&input);
        assert!(!lines[0].oversized);
        assert_eq!(lines[0].text.len(), MAX_LINE_LEN);
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_rejected() {
        let mut framer = LineFramer::new();
        let lines = framer.feed(b"OK\xFF\n");
        assert_eq!(lines[0].text, "OK\u{FFFD}");
    }

    #[test]
    fn test_reset_discards_partial_line() {
        let mut framer = LineFramer::new();
        framer.feed(b"HALF");
        framer.reset();
        assert_eq!(framer.pending_len(), 0);
        assert_eq!(framer.feed(b"OK\n"), vec![Line::new("OK")]);
    }

    #[test]
    fn test_overflow_policy_deserializes_from_snake_case() {
        let policy: OverflowPolicy =
            serde_json::from_str("\"evict_oldest\"").expect("deserialize");
        assert_eq!(policy, OverflowPolicy::EvictOldest);
    }
}
