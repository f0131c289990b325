//! DeviceSession: one link's framer, negotiator and dispatcher.
//!
//! The device runs a single-threaded cooperative loop.  Each iteration hands
//! [`DeviceSession::pass`] whatever bytes happened to be available (possibly
//! none) and writes out the replies it returns.  Nothing here blocks.
//!
//! Per pass:
//!
//! 1. Any received byte arms the `HELLO` deadline (first time only).
//! 2. The deadline is checked, so a `HELLO` arriving late is treated as a
//!    legacy-mode line.
//! 3. Every complete line is decoded and answered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use catlink_core::protocol::codec::decode;
use catlink_core::protocol::framer::{LineFramer, OverflowPolicy};
use catlink_core::protocol::messages::{ButtonState, DeviceReply, HostCommand};
use catlink_core::{CapabilitySet, DeviceIdentity, DeviceNegotiator, SessionState};
use tracing::{debug, trace};

use crate::application::dispatch::{CommandDispatcher, DisplayBackend};

/// Per-link settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: DeviceIdentity,
    pub hello_timeout: Duration,
    pub overflow_policy: OverflowPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::default(),
            hello_timeout: catlink_core::domain::timers::DEVICE_HELLO_TIMEOUT,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Protocol state for a single host link.
pub struct DeviceSession {
    framer: LineFramer,
    negotiator: DeviceNegotiator,
    dispatcher: CommandDispatcher,
}

impl DeviceSession {
    pub fn new(config: SessionConfig, backend: Arc<dyn DisplayBackend>) -> Self {
        Self {
            framer: LineFramer::with_policy(config.overflow_policy),
            negotiator: DeviceNegotiator::new(config.identity, config.hello_timeout),
            dispatcher: CommandDispatcher::new(backend),
        }
    }

    pub fn state(&self) -> SessionState {
        self.negotiator.state()
    }

    /// Runs one cooperative pass over the bytes read since the last pass.
    pub fn pass(&mut self, bytes: &[u8], now: Instant) -> Vec<DeviceReply> {
        if !bytes.is_empty() {
            self.negotiator.on_activity(now);
        }
        self.negotiator.poll(now);

        let mut replies = Vec::new();
        for line in self.framer.feed(bytes) {
            if line.oversized {
                debug!("oversized line ({} bytes kept)", line.text.len());
                replies.push(self.dispatcher.oversized(self.state()));
                continue;
            }
            trace!("<- {}", line.text);
            if let Some(reply) = self.handle_line(&line.text, now) {
                replies.push(reply);
            }
        }
        replies
    }

    /// Checks the `HELLO` deadline without feeding bytes.
    pub fn poll(&mut self, now: Instant) {
        self.negotiator.poll(now);
    }

    /// Unsolicited button event, if the link is negotiated and the device
    /// advertises [`CapabilitySet::BUTTONS`].
    pub fn button_event(&self, buttons: ButtonState) -> Option<DeviceReply> {
        let caps = self.state().peer_caps()?;
        if !caps.contains(CapabilitySet::BUTTONS) {
            return None;
        }
        Some(DeviceReply::Event { buttons })
    }

    /// Link closed: drop any partial line.
    pub fn reset_framer(&mut self) {
        self.framer.reset();
    }

    fn handle_line(&mut self, text: &str, now: Instant) -> Option<DeviceReply> {
        let msg = decode(text);
        let parsed = HostCommand::from_message(&msg);

        match &parsed {
            Ok(HostCommand::Hello { version, .. }) => {
                if let Some(reply) = self.negotiator.on_hello(*version, now) {
                    return Some(reply);
                }
            }
            Ok(cmd) if cmd.is_legacy() => {
                self.negotiator.on_legacy_command(now);
            }
            // HELLO is the one command recognized before negotiation, so a
            // malformed one is a bad-arguments case, not an unknown command.
            Err(e) if msg.is("HELLO") && self.state() == SessionState::AwaitingHello => {
                debug!("malformed HELLO: {}", e);
                return Some(DeviceReply::nack("HELLO", e.code(), e.short_message()));
            }
            _ => {}
        }

        self.dispatcher.dispatch(&msg.command, &parsed, self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch::MockDisplayBackend;
    use catlink_core::protocol::codec::encode;
    use catlink_core::protocol::framer::MAX_LINE_LEN;
    use catlink_core::LegacyReason;

    fn permissive_backend() -> Arc<dyn DisplayBackend> {
        let mut backend = MockDisplayBackend::new();
        backend.expect_set_mode().returning(|_| Ok(()));
        backend.expect_play_trigger().returning(|id| {
            if id == "lol" {
                Ok(())
            } else {
                Err(crate::application::dispatch::BackendError::UnknownTrigger(id.to_string()))
            }
        });
        backend.expect_show_temps().returning(|_| Ok(()));
        Arc::new(backend)
    }

    fn session() -> DeviceSession {
        DeviceSession::new(SessionConfig::default(), permissive_backend())
    }

    fn lines(replies: &[DeviceReply]) -> Vec<String> {
        replies.iter().map(|r| encode(&r.to_message())).collect()
    }

    #[test]
    fn test_hello_then_commands_in_one_pass() {
        // Arrange
        let mut s = session();
        let input = b"HELLO V=2.0 REQCAP=0xFFFFFFFF NAME=\"app\"\nSET MODE=tutor\nGET CAP\n";

        // Act
        let replies = s.pass(input, Instant::now());

        // Assert
        assert_eq!(
            lines(&replies),
            [
                r#"HELLO V=2.0 CAP=0x00000037 NAME="esp32" FW=2025.09.26"#,
                "ACK CMD=SET",
                "CAP 0x00000037",
            ]
        );
        assert!(s.state().is_negotiated());
    }

    #[test]
    fn test_empty_pass_before_first_byte_does_not_arm_deadline() {
        let t0 = Instant::now();
        let mut s = session();
        s.pass(&[], t0);
        s.poll(t0 + Duration::from_secs(30));
        assert_eq!(s.state(), SessionState::Init);
    }

    #[test]
    fn test_no_hello_within_deadline_goes_legacy() {
        // Arrange
        let t0 = Instant::now();
        let mut s = session();

        // Act – a partial line counts as the first byte
        s.pass(b"MO", t0);
        s.poll(t0 + Duration::from_millis(1199));
        let before = s.state();
        s.poll(t0 + Duration::from_millis(1200));

        // Assert
        assert_eq!(before, SessionState::AwaitingHello);
        assert_eq!(s.state(), SessionState::Legacy(LegacyReason::HelloTimeout));
    }

    #[test]
    fn test_late_hello_is_unknown_after_timeout() {
        let t0 = Instant::now();
        let mut s = session();
        s.pass(b"\n", t0);

        let replies = s.pass(b"HELLO V=2.0\n", t0 + Duration::from_secs(2));

        assert_eq!(lines(&replies), [r#"NACK CMD=? ERR=1 MSG="unknown""#]);
    }

    #[test]
    fn test_malformed_hello_while_awaiting_is_bad_args() {
        // Arrange
        let mut s = session();

        // Act
        let replies = s.pass(b"HELLO V=two\n", Instant::now());

        // Assert
        assert_eq!(lines(&replies), [r#"NACK CMD=HELLO ERR=2 MSG="bad V""#]);
        assert_eq!(s.state(), SessionState::AwaitingHello);
    }

    #[test]
    fn test_legacy_host_detected_from_bare_command() {
        let mut s = session();

        let replies = s.pass(b"MODE normal\nTRIGGER lol\nTRIGGER unknown_id\n", Instant::now());

        assert_eq!(lines(&replies), ["OK", "OK", "ERR unknown trigger"]);
        assert_eq!(s.state(), SessionState::Legacy(LegacyReason::LegacyHost));
    }

    #[test]
    fn test_ping_before_hello_does_not_settle_state() {
        let mut s = session();
        let replies = s.pass(b"PING TS=7\n", Instant::now());
        assert_eq!(lines(&replies), ["PONG TS=7"]);
        assert_eq!(s.state(), SessionState::AwaitingHello);
    }

    #[test]
    fn test_oversized_line_gets_bad_args() {
        // Arrange
        let mut s = session();
        s.pass(b"HELLO V=2.0\n", Instant::now());
        let mut input = b"TRIGGER NAME=".to_vec();
        input.extend(std::iter::repeat(b'z').take(MAX_LINE_LEN));
        input.extend_from_slice(b"\nPING\n");

        // Act
        let replies = s.pass(&input, Instant::now());

        // Assert
        assert_eq!(lines(&replies), [r#"ERR ERR=2 MSG="line too long""#, "PONG TS=0"]);
    }

    #[test]
    fn test_evict_oldest_policy_processes_tail_of_long_line() {
        let config = SessionConfig {
            overflow_policy: OverflowPolicy::EvictOldest,
            ..SessionConfig::default()
        };
        let mut s = DeviceSession::new(config, permissive_backend());
        let mut input = vec![b' '; MAX_LINE_LEN];
        input.extend_from_slice(b"PING TS=9\n");

        let replies = s.pass(&input, Instant::now());

        assert_eq!(lines(&replies), ["PONG TS=9"]);
    }

    #[test]
    fn test_major_mismatch_replies_hello_then_speaks_legacy() {
        let mut s = session();

        let replies = s.pass(b"HELLO V=3.0\nMODE normal\n", Instant::now());

        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0], DeviceReply::Hello { .. }));
        assert_eq!(replies[1], DeviceReply::LegacyOk);
    }

    #[test]
    fn test_button_event_requires_negotiation_and_capability() {
        // Arrange
        let buttons = ButtonState::new(true, false);
        let mut plain = session();
        let no_buttons_config = SessionConfig {
            identity: DeviceIdentity {
                caps: CapabilitySet::TEMP_OVERLAY,
                ..DeviceIdentity::default()
            },
            ..SessionConfig::default()
        };
        let mut no_buttons = DeviceSession::new(no_buttons_config, permissive_backend());

        // Act / Assert
        assert_eq!(plain.button_event(buttons), None, "not negotiated yet");
        plain.pass(b"HELLO V=2.0\n", Instant::now());
        assert_eq!(plain.button_event(buttons), Some(DeviceReply::Event { buttons }));

        no_buttons.pass(b"HELLO V=2.0\n", Instant::now());
        assert_eq!(no_buttons.button_event(buttons), None);
    }
}
