//! catlink display device simulator.
//!
//! Listens on TCP in place of a serial port and runs the same cooperative
//! protocol loop the firmware runs.  Point the host binary at it with
//! `catlink-host --transport tcp --address 127.0.0.1:7878`.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()             -- TOML settings, defaults if absent
//!  └─ LoggingDisplay::new()     -- render requests go to the log
//!  └─ stdin task                -- "a", "b", "ab" or "-" lines set button levels
//!  └─ DeviceLink::serve()       -- accept loop, one host at a time
//!       └─ run_connection()     -- try_read, DeviceSession::pass, write replies
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use catlink_core::ButtonState;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use catlink_device::infrastructure::{
    config::load_config, display::LoggingDisplay, link::DeviceLink,
};

#[derive(Debug, Parser)]
#[command(name = "catlink-device", about = "catlink display device simulator")]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `link.listen_address`.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.link.listen_address = listen;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let identity = config.identity();
    info!(
        "catlink device {:?} fw {} protocol {} caps {} ({})",
        identity.name,
        identity.firmware,
        identity.version,
        identity.caps,
        identity.caps.names().join("|")
    );

    let display = Arc::new(LoggingDisplay::new(
        config.device.triggers.clone(),
        config.animation(),
    ));
    let link = DeviceLink::new(config.session(), display, config.poll_interval());
    let listener = DeviceLink::bind(&config.link.listen_address).await?;
    info!("listening on {}", listener.local_addr()?);

    let running = Arc::new(AtomicBool::new(true));

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    // ── Button input from stdin ───────────────────────────────────────────────
    let (button_tx, button_rx) = mpsc::channel(128);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_buttons(&line) {
                Some(state) => {
                    if button_tx.send(state).await.is_err() {
                        break;
                    }
                }
                None => warn!("expected a, b, ab or -, got {:?}", line.trim()),
            }
        }
    });

    link.serve(listener, button_rx, running).await?;
    info!("catlink device stopped");
    Ok(())
}

/// `a` / `b` / `ab` press the named buttons, `-` releases both.
fn parse_buttons(line: &str) -> Option<ButtonState> {
    let line = line.trim().to_ascii_lowercase();
    if line == "-" {
        return Some(ButtonState::new(false, false));
    }
    if line.is_empty() || !line.chars().all(|c| c == 'a' || c == 'b') {
        return None;
    }
    Some(ButtonState::new(line.contains('a'), line.contains('b')))
}
