//! TCP stand-in for the device's serial port.
//!
//! The firmware loop reads whatever bytes the UART has buffered, runs one
//! protocol pass and goes on with its other work.  The simulator mirrors
//! that with `TcpStream::try_read`: it never awaits input, it only sleeps
//! for the poll interval when a pass found nothing to read.
//!
//! One host is served at a time, like a physical serial link.  Each accepted
//! connection gets a fresh [`DeviceSession`], so negotiation starts over.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use catlink_core::protocol::codec::encode_line;
use catlink_core::protocol::messages::{ButtonState, DeviceReply};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use crate::application::device_session::{DeviceSession, SessionConfig};
use crate::application::dispatch::DisplayBackend;

/// Bytes read per pass at most.
const READ_CHUNK: usize = 256;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serves hosts one after another until `running` is cleared.
pub struct DeviceLink {
    session: SessionConfig,
    backend: Arc<dyn DisplayBackend>,
    poll_interval: Duration,
}

impl DeviceLink {
    pub fn new(
        session: SessionConfig,
        backend: Arc<dyn DisplayBackend>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            session,
            backend,
            poll_interval,
        }
    }

    /// Binds `addr` and returns the listener, so callers can learn the port.
    pub async fn bind(addr: &str) -> Result<TcpListener, LinkError> {
        TcpListener::bind(addr).await.map_err(|source| LinkError::Bind {
            addr: addr.to_string(),
            source,
        })
    }

    /// Accept loop.  `buttons` delivers physical button changes; they are
    /// forwarded to whichever host is connected.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut buttons: mpsc::Receiver<ButtonState>,
        running: Arc<AtomicBool>,
    ) -> Result<(), LinkError> {
        while running.load(Ordering::Relaxed) {
            let accepted = time::timeout(self.poll_interval * 20, listener.accept()).await;
            let (stream, peer) = match accepted {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!("accept failed: {e}");
                    continue;
                }
                // Re-check `running` periodically.
                Err(_) => continue,
            };
            info!("host connected from {peer}");
            match self.run_connection(stream, &mut buttons, &running).await {
                Ok(()) => info!("host {peer} disconnected"),
                Err(e) => error!("link to {peer} failed: {e}"),
            }
        }
        Ok(())
    }

    /// Cooperative loop for one connection.  Returns when the peer closes
    /// the stream or `running` is cleared.
    pub async fn run_connection(
        &self,
        mut stream: TcpStream,
        buttons: &mut mpsc::Receiver<ButtonState>,
        running: &AtomicBool,
    ) -> Result<(), LinkError> {
        let mut session = DeviceSession::new(self.session.clone(), Arc::clone(&self.backend));
        let mut buf = [0u8; READ_CHUNK];

        while running.load(Ordering::Relaxed) {
            let n = match stream.try_read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
                Err(e) => return Err(e.into()),
            };

            let now = time::Instant::now().into_std();
            let mut replies = session.pass(&buf[..n], now);
            while let Ok(state) = buttons.try_recv() {
                match session.button_event(state) {
                    Some(event) => replies.push(event),
                    None => debug!("button event dropped in state {}", session.state().name()),
                }
            }

            for reply in &replies {
                write_reply(&mut stream, reply).await?;
            }

            if n == 0 {
                time::sleep(self.poll_interval).await;
            }
        }
        Ok(())
    }
}

async fn write_reply(stream: &mut TcpStream, reply: &DeviceReply) -> Result<(), LinkError> {
    match encode_line(&reply.to_message()) {
        Ok(bytes) => {
            trace!("-> {}", String::from_utf8_lossy(&bytes).trim_end());
            stream.write_all(&bytes).await?;
        }
        Err(e) => error!("dropping unencodable reply {:?}: {e}", reply),
    }
    Ok(())
}
