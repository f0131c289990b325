//! Tokio tasks that run one device link.
//!
//! # Task layout (for beginners)
//!
//! ```text
//!  serial port / TCP stream
//!        │ bytes
//!        ▼
//!  read_lines task ── LineFramer ── decode ──► DeviceReply ──┐
//!                                                             ▼
//!  HostHandle ── Request (mpsc) ──────────────────────► Engine task ── writes lines
//!      ▲                                                      │
//!      └──────── oneshot reply / watch<LinkStatus> ───────────┤
//!                                                             └──► LinkEvent (mpsc)
//! ```
//!
//! The engine task is the only owner of the [`HostSession`], so no locks are
//! needed.  A periodic tick drives the handshake deadline and request
//! timeouts.  Callers hold a cloneable [`HostHandle`] and await replies.

pub mod transport;

use std::collections::VecDeque;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use catlink_core::protocol::codec::{decode, encode_line, CodecError};
use catlink_core::protocol::framer::LineFramer;
use catlink_core::protocol::messages::{
    ButtonState, DeviceReply, ErrorCode, HostCommand, Mode, Temps, DEFAULT_APP_NAME,
};
use catlink_core::{CapabilitySet, NegotiationOutcome, PeerInfo, SessionState, TimerConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::application::host_session::{HostError, HostEvent, HostSession};
use crate::application::manage_links::LinkId;

/// Bytes read from the transport per call at most.
const READ_CHUNK: usize = 256;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Refused locally; nothing was sent.
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("{command} got no reply in time")]
    Timeout { command: String },

    #[error("unexpected reply {0:?}")]
    UnexpectedReply(DeviceReply),

    #[error("link closed")]
    Closed,

    #[error("cannot encode {command}: {source}")]
    Encode {
        command: &'static str,
        #[source]
        source: CodecError,
    },

    #[error("failed to open serial port {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-link protocol settings.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Sent as `NAME=` in `HELLO`.
    pub app_name: String,
    /// Sent as `REQCAP=` in `HELLO`.
    pub req_caps: CapabilitySet,
    pub timers: TimerConfig,
    /// How often timers are checked.
    pub tick: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            req_caps: CapabilitySet::ALL,
            timers: TimerConfig::default(),
            tick: Duration::from_millis(20),
        }
    }
}

/// Unsolicited things a link reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Negotiated(NegotiationOutcome),
    Buttons(ButtonState),
    Closed,
}

/// What a link last published about its session.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub state: SessionState,
    /// Identity from the device's `HELLO`, once received.
    pub peer: Option<PeerInfo>,
}

/// Result of a `SET`, `TRIGGER` or `DATA` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// `ACK`, or `OK` in legacy mode.
    Accepted,
    /// `NACK` / `ERR`.  Legacy errors carry no code.
    Rejected {
        code: Option<ErrorCode>,
        message: String,
    },
}

impl CommandOutcome {
    /// Interprets the reply to a command request.
    ///
    /// # Errors
    ///
    /// [`LinkError::UnexpectedReply`] for replies that do not answer a command.
    pub fn from_reply(reply: DeviceReply) -> Result<Self, LinkError> {
        match reply {
            DeviceReply::Ack { .. } | DeviceReply::LegacyOk => Ok(CommandOutcome::Accepted),
            DeviceReply::Nack { code, message, .. } | DeviceReply::Error { code, message } => {
                Ok(CommandOutcome::Rejected {
                    code: Some(code),
                    message,
                })
            }
            DeviceReply::LegacyErr { text } => Ok(CommandOutcome::Rejected {
                code: None,
                message: text,
            }),
            other => Err(LinkError::UnexpectedReply(other)),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Accepted)
    }
}

#[derive(Debug)]
enum Outgoing {
    Exact(HostCommand),
    /// Resolved against the session state when it is sent.
    Mode(Mode),
    Trigger(String),
}

#[derive(Debug)]
enum Request {
    Send {
        command: Outgoing,
        reply: oneshot::Sender<Result<DeviceReply, LinkError>>,
    },
    Ping {
        reply: oneshot::Sender<Result<Duration, LinkError>>,
    },
}

/// Cloneable handle to a running link.
#[derive(Debug, Clone)]
pub struct HostHandle {
    id: LinkId,
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<LinkStatus>,
}

impl HostHandle {
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Waits for the handshake the link started on open to finish.
    pub async fn hello(&self) -> Result<NegotiationOutcome, LinkError> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| LinkError::Closed)?;
        NegotiationOutcome::from_state(settled.state).ok_or(LinkError::Closed)
    }

    /// Sends `PING TS=<unix>` and returns the round-trip time.
    pub async fn ping(&self) -> Result<Duration, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Ping { reply: tx })
            .await
            .map_err(|_| LinkError::Closed)?;
        rx.await.map_err(|_| LinkError::Closed)?
    }

    /// `GET CAP`, negotiated links only.
    pub async fn get_caps(&self) -> Result<CapabilitySet, LinkError> {
        match self.request(HostCommand::GetCap).await? {
            DeviceReply::Cap { caps } => Ok(caps),
            other => Err(LinkError::UnexpectedReply(other)),
        }
    }

    /// Switches display mode, in legacy form when the link is legacy.
    pub async fn set_mode(&self, mode: Mode) -> Result<CommandOutcome, LinkError> {
        CommandOutcome::from_reply(self.submit(Outgoing::Mode(mode)).await?)
    }

    /// Plays a trigger animation, in legacy form when the link is legacy.
    pub async fn trigger(&self, id: &str) -> Result<CommandOutcome, LinkError> {
        CommandOutcome::from_reply(self.submit(Outgoing::Trigger(id.to_string())).await?)
    }

    /// `DATA TEMPS=`; needs `TEMP_OVERLAY` on the device.
    pub async fn send_temps(&self, temps: Temps) -> Result<CommandOutcome, LinkError> {
        CommandOutcome::from_reply(self.request(HostCommand::Data { temps }).await?)
    }

    /// Sends `command` exactly as given and returns the device's reply.
    pub async fn request(&self, command: HostCommand) -> Result<DeviceReply, LinkError> {
        self.submit(Outgoing::Exact(command)).await
    }

    async fn submit(&self, command: Outgoing) -> Result<DeviceReply, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Send { command, reply: tx })
            .await
            .map_err(|_| LinkError::Closed)?;
        rx.await.map_err(|_| LinkError::Closed)?
    }
}

/// Starts link tasks over an already opened transport.
pub struct HostLink;

impl HostLink {
    /// Spawns the reader and engine tasks and starts negotiation.
    ///
    /// The link runs until the transport closes or every [`HostHandle`] is
    /// dropped.  Events are dropped if the receiver is not drained.
    pub fn spawn<T>(io: T, settings: LinkSettings) -> (HostHandle, mpsc::Receiver<LinkEvent>)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (line_tx, line_rx) = mpsc::channel(64);
        let (request_tx, request_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(64);

        let session = HostSession::new(
            settings.app_name.clone(),
            settings.req_caps,
            settings.timers.clone(),
        );
        let (status_tx, status_rx) = watch::channel(LinkStatus {
            state: session.state(),
            peer: None,
        });

        tokio::spawn(read_lines(reader, line_tx));
        let engine = Engine {
            session,
            writer,
            status: status_tx,
            events: event_tx,
            waiter: None,
            pings: VecDeque::new(),
        };
        tokio::spawn(engine.run(request_rx, line_rx, settings.tick));

        let handle = HostHandle {
            id: Uuid::new_v4(),
            requests: request_tx,
            status: status_rx,
        };
        (handle, event_rx)
    }
}

// ── Reader task ───────────────────────────────────────────────────────────────

async fn read_lines<R>(mut reader: R, lines: mpsc::Sender<DeviceReply>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("link read failed: {e}");
                break;
            }
        };
        for line in framer.feed(&buf[..n]) {
            if line.oversized {
                warn!("dropping oversized device line ({} bytes kept)", line.text.len());
                continue;
            }
            trace!("<- {}", line.text);
            match DeviceReply::from_message(&decode(&line.text)) {
                Ok(reply) => {
                    if lines.send(reply).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("ignoring device line {:?}: {e}", line.text),
            }
        }
    }
    debug!("link reader finished");
}

// ── Engine task ───────────────────────────────────────────────────────────────

struct Engine<W> {
    session: HostSession,
    writer: W,
    status: watch::Sender<LinkStatus>,
    events: mpsc::Sender<LinkEvent>,
    waiter: Option<oneshot::Sender<Result<DeviceReply, LinkError>>>,
    pings: VecDeque<(u64, oneshot::Sender<Result<Duration, LinkError>>)>,
}

impl<W> Engine<W>
where
    W: AsyncWrite + Unpin,
{
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut lines: mpsc::Receiver<DeviceReply>,
        tick: Duration,
    ) {
        if let Err(e) = self.open().await {
            warn!("could not start negotiation: {e}");
            self.shutdown().await;
            return;
        }

        let mut ticker = time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let result = tokio::select! {
                _ = ticker.tick() => {
                    let events = self.session.poll(now());
                    self.apply(events).await
                }
                line = lines.recv() => match line {
                    Some(reply) => {
                        let events = self.session.on_reply(reply, now());
                        self.apply(events).await
                    }
                    None => {
                        info!("device link closed by peer");
                        break;
                    }
                },
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => {
                        debug!("all link handles dropped");
                        break;
                    }
                },
            };
            if let Err(e) = result {
                warn!("link failed: {e}");
                break;
            }
        }
        self.shutdown().await;
    }

    async fn open(&mut self) -> Result<(), LinkError> {
        let hello = self.session.start(now())?;
        self.publish_state();
        let bytes = encode(&hello)?;
        self.write(&bytes).await
    }

    async fn handle_request(&mut self, request: Request) -> Result<(), LinkError> {
        match request {
            Request::Ping { reply } => {
                let ts = unix_time();
                let cmd = HostCommand::Ping { ts: Some(ts) };
                let bytes = match encode(&cmd) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return Ok(());
                    }
                };
                if let Err(e) = self.session.begin(&cmd, now()) {
                    let _ = reply.send(Err(e.into()));
                    return Ok(());
                }
                self.pings.push_back((ts, reply));
                self.write(&bytes).await
            }
            Request::Send { command, reply } => {
                let cmd = match command {
                    Outgoing::Exact(cmd) => cmd,
                    Outgoing::Mode(mode) => self.session.mode_command(mode),
                    Outgoing::Trigger(id) => self.session.trigger_command(&id),
                };
                let bytes = match encode(&cmd) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return Ok(());
                    }
                };
                if let Err(e) = self.session.begin(&cmd, now()) {
                    debug!("refused {}: {e}", cmd.wire_name());
                    let _ = reply.send(Err(e.into()));
                    return Ok(());
                }
                self.waiter = Some(reply);
                self.write(&bytes).await
            }
        }
    }

    async fn apply(&mut self, events: Vec<HostEvent>) -> Result<(), LinkError> {
        for event in events {
            match event {
                HostEvent::Transmit(cmd) => {
                    let bytes = encode(&cmd)?;
                    self.write(&bytes).await?;
                }
                HostEvent::Negotiation(outcome) => {
                    self.publish_state();
                    self.emit(LinkEvent::Negotiated(outcome));
                }
                HostEvent::Response { command, reply } => {
                    debug!("{command} answered: {:?}", reply);
                    if let Some(waiter) = self.waiter.take() {
                        let _ = waiter.send(Ok(reply));
                    }
                }
                HostEvent::TimedOut { command } => {
                    if let Some(waiter) = self.waiter.take() {
                        let _ = waiter.send(Err(LinkError::Timeout { command }));
                    }
                }
                HostEvent::Pong { ts, rtt } => {
                    if let Some(waiter) = self.take_ping(ts) {
                        let _ = waiter.send(Ok(rtt));
                    }
                }
                HostEvent::PingTimedOut { ts } => {
                    if let Some(waiter) = self.take_ping(ts) {
                        let _ = waiter.send(Err(LinkError::Timeout {
                            command: "PING".to_string(),
                        }));
                    }
                }
                HostEvent::Buttons(buttons) => self.emit(LinkEvent::Buttons(buttons)),
            }
        }
        Ok(())
    }

    async fn shutdown(mut self) {
        for event in self.session.on_transport_lost() {
            if let HostEvent::Negotiation(outcome) = event {
                self.emit(LinkEvent::Negotiated(outcome));
            }
        }
        self.publish_state();
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(Err(LinkError::Closed));
        }
        for (_, waiter) in self.pings.drain(..) {
            let _ = waiter.send(Err(LinkError::Closed));
        }
        self.emit(LinkEvent::Closed);
        if let Err(e) = self.writer.shutdown().await {
            debug!("closing link writer: {e}");
        }
        info!("link finished in state {}", self.session.state().name());
    }

    fn take_ping(
        &mut self,
        ts: u64,
    ) -> Option<oneshot::Sender<Result<Duration, LinkError>>> {
        let i = self.pings.iter().position(|(t, _)| *t == ts)?;
        self.pings.remove(i).map(|(_, waiter)| waiter)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        trace!("-> {}", String::from_utf8_lossy(bytes).trim_end());
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn publish_state(&self) {
        self.status.send_replace(LinkStatus {
            state: self.session.state(),
            peer: self.session.peer().cloned(),
        });
    }

    fn emit(&self, event: LinkEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("link event not delivered: {e}");
        }
    }
}

fn encode(cmd: &HostCommand) -> Result<Vec<u8>, LinkError> {
    encode_line(&cmd.to_message()).map_err(|source| LinkError::Encode {
        command: cmd.wire_name(),
        source,
    })
}

/// Link clock.  Follows tokio's clock so paused-time tests work.
fn now() -> Instant {
    time::Instant::now().into_std()
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catlink_core::LegacyReason;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};

    /// Scripted device: the test reads host lines and writes replies by hand.
    struct FakeDevice {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeDevice {
        async fn expect_line(&mut self) -> String {
            self.lines.next_line().await.unwrap().unwrap()
        }

        async fn reply(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }
    }

    fn start() -> (HostHandle, mpsc::Receiver<LinkEvent>, FakeDevice) {
        let (host_io, device_io) = duplex(1024);
        let (handle, events) = HostLink::spawn(host_io, LinkSettings::default());
        let (read, writer) = tokio::io::split(device_io);
        let device = FakeDevice {
            lines: BufReader::new(read).lines(),
            writer,
        };
        (handle, events, device)
    }

    const DEVICE_HELLO: &str = r#"HELLO V=2.0 CAP=0x00000037 NAME="esp32" FW=2025.09.26"#;

    #[tokio::test(start_paused = true)]
    async fn test_hello_is_sent_on_open_and_negotiates() {
        // Arrange
        let (handle, mut events, mut device) = start();

        // Act
        let hello = device.expect_line().await;
        device.reply(DEVICE_HELLO).await;
        let outcome = handle.hello().await.unwrap();

        // Assert
        assert_eq!(
            hello,
            r#"HELLO V=2.0 REQCAP=0xFFFFFFFF NAME="bongo_cat_app""#
        );
        assert!(matches!(outcome, NegotiationOutcome::Negotiated { .. }));
        assert_eq!(
            handle.status().peer.map(|p| p.firmware),
            Some("2025.09.26".to_string())
        );
        assert!(matches!(
            events.recv().await,
            Some(LinkEvent::Negotiated(NegotiationOutcome::Negotiated { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_gets_one_retry_then_legacy_forms() {
        // Arrange
        let (handle, _events, mut device) = start();
        let first = device.expect_line().await;
        let second = device.expect_line().await;
        let outcome = handle.hello().await.unwrap();

        // Act
        let caller = handle.clone();
        let set_mode = tokio::spawn(async move { caller.set_mode(Mode::Normal).await });
        let sent = device.expect_line().await;
        device.reply("OK").await;

        // Assert
        assert_eq!(first, second);
        assert_eq!(outcome, NegotiationOutcome::Legacy(LegacyReason::HelloTimeout));
        assert_eq!(sent, "MODE normal");
        assert_eq!(set_mode.await.unwrap().unwrap(), CommandOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_surfaces_to_caller() {
        // Arrange
        let (handle, _events, mut device) = start();
        device.expect_line().await;
        device.reply(DEVICE_HELLO).await;
        handle.hello().await.unwrap();

        // Act
        let caps = handle.get_caps().await;

        // Assert
        assert!(matches!(caps, Err(LinkError::Timeout { ref command }) if command == "GET"));
        assert_eq!(device.expect_line().await, "GET CAP");
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_id_with_space_is_refused_before_sending() {
        // Arrange
        let (handle, _events, mut device) = start();
        device.expect_line().await;
        device.reply(DEVICE_HELLO).await;
        handle.hello().await.unwrap();

        // Act
        let refused = handle.trigger("foo bar").await;
        let caller = handle.clone();
        let next = tokio::spawn(async move { caller.trigger("lol").await });
        let sent = device.expect_line().await;
        device.reply("ACK CMD=TRIGGER").await;

        // Assert
        assert!(matches!(
            refused,
            Err(LinkError::Encode {
                source: CodecError::InvalidToken(_),
                ..
            })
        ));
        assert_eq!(sent, "TRIGGER NAME=lol", "nothing was written for the refused id");
        assert_eq!(next.await.unwrap().unwrap(), CommandOutcome::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_button_events_reach_event_channel() {
        let (handle, mut events, mut device) = start();
        device.expect_line().await;
        device.reply(DEVICE_HELLO).await;
        handle.hello().await.unwrap();
        events.recv().await;

        device.reply(r#"EVENT BTN={"a":0,"b":1}"#).await;

        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Buttons(ButtonState::new(false, true)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_reply_to_hello_marks_legacy_firmware() {
        // Arrange: firmware that answers HELLO with its capability word only.
        let io = tokio_test::io::Builder::new()
            .write(b"HELLO V=2.0 REQCAP=0xFFFFFFFF NAME=\"bongo_cat_app\"\n")
            .read(b"CAP 0x00000037\n")
            .build();

        // Act
        let (handle, _events) = HostLink::spawn(io, LinkSettings::default());
        let outcome = handle.hello().await.unwrap();

        // Assert
        assert_eq!(
            outcome,
            NegotiationOutcome::Legacy(LegacyReason::LegacyFirmware {
                caps: CapabilitySet::REFERENCE_DEVICE
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_loss_during_handshake_fails() {
        let (handle, mut events, device) = start();
        drop(device);

        let outcome = handle.hello().await.unwrap();

        assert_eq!(outcome, NegotiationOutcome::Failed);
        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Negotiated(NegotiationOutcome::Failed))
        );
        assert_eq!(events.recv().await, Some(LinkEvent::Closed));
    }

    #[test]
    fn test_command_outcome_from_replies() {
        assert_eq!(
            CommandOutcome::from_reply(DeviceReply::LegacyOk).unwrap(),
            CommandOutcome::Accepted
        );
        assert_eq!(
            CommandOutcome::from_reply(DeviceReply::nack("SET", ErrorCode::ModeUnsupported, "mode"))
                .unwrap(),
            CommandOutcome::Rejected {
                code: Some(ErrorCode::ModeUnsupported),
                message: "mode".to_string()
            }
        );
        assert!(matches!(
            CommandOutcome::from_reply(DeviceReply::Pong { ts: 1 }),
            Err(LinkError::UnexpectedReply(_))
        ));
    }
}
