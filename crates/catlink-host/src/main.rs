//! catlink host command-line tool.
//!
//! Opens one link to a display (serial port, or TCP to the simulator),
//! waits for negotiation to settle and runs a single subcommand.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML settings, CLI flags override
//!  └─ open_link()            -- serial port or TCP stream
//!       └─ HostLink::spawn() -- reader task + engine task, sends HELLO
//!  └─ handle.hello()         -- Negotiated or Legacy
//!  └─ subcommand             -- ping / caps / mode / trigger / temps / monitor
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use catlink_core::protocol::messages::{Mode, Temps};
use catlink_core::{CapabilitySet, LegacyReason, NegotiationOutcome, SessionState};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use catlink_host::application::manage_links::{LinkRecord, LinkRegistry};
use catlink_host::infrastructure::link::transport::{available_ports, connect_tcp, open_serial};
use catlink_host::infrastructure::link::{CommandOutcome, HostHandle, HostLink, LinkEvent};
use catlink_host::infrastructure::storage::config::{
    load_config, save_config, HostConfig, Transport,
};

#[derive(Debug, Parser)]
#[command(name = "catlink-host", about = "Talk to a catlink display", version)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    transport: Option<Transport>,

    /// Serial port, e.g. /dev/ttyUSB0 or COM3.
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Simulator address for `--transport tcp`.
    #[arg(long)]
    address: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Measure round-trip time.
    Ping {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Show the device's capability mask.
    Caps,
    /// Switch display mode (normal, messenger, tutor).
    Mode { mode: Mode },
    /// Play a trigger animation.
    Trigger { id: String },
    /// Send CPU and/or GPU temperatures.
    Temps {
        #[arg(long)]
        cpu: Option<f64>,
        #[arg(long)]
        gpu: Option<f64>,
    },
    /// Print link events until Ctrl-C, pinging periodically.
    Monitor {
        #[arg(long, default_value_t = 5)]
        ping_secs: u64,
    },
    /// Write the effective settings to the config file.
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level)),
        )
        .init();

    if let Command::InitConfig = cli.command {
        let path = save_config(&config, cli.config.as_deref())?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let (handle, events) = open_link(&config).await?;
    let mut registry = LinkRegistry::new();
    registry.upsert(LinkRecord::opened(handle.id(), config.endpoint()));

    let outcome = handle.hello().await?;
    let status = handle.status();
    registry.set_state(handle.id(), status.state, status.peer);
    match outcome {
        NegotiationOutcome::Negotiated { version, peer_caps } => {
            let peer = registry
                .get(handle.id())
                .and_then(|link| link.peer.clone())
                .unwrap_or_default();
            println!(
                "negotiated protocol {version} with {} (fw {}, caps {peer_caps})",
                peer.name, peer.firmware
            );
        }
        NegotiationOutcome::Legacy(reason) => println!("legacy mode: {reason}"),
        NegotiationOutcome::Failed => bail!("link closed during negotiation"),
    }

    match cli.command {
        Command::Ping { count } => {
            for _ in 0..count {
                let rtt = handle.ping().await?;
                registry.update_rtt(handle.id(), rtt);
                println!("PONG in {} ms", rtt.as_millis());
            }
        }
        Command::Caps => {
            let caps = match handle.state() {
                SessionState::Legacy(LegacyReason::LegacyFirmware { caps }) => caps,
                _ => handle.get_caps().await?,
            };
            print_caps(caps);
        }
        Command::Mode { mode } => report(handle.set_mode(mode).await?)?,
        Command::Trigger { id } => report(handle.trigger(&id).await?)?,
        Command::Temps { cpu, gpu } => {
            report(handle.send_temps(Temps::new(cpu, gpu)).await?)?;
        }
        Command::Monitor { ping_secs } => {
            monitor(&handle, events, &mut registry, ping_secs).await;
        }
        Command::InitConfig => {}
    }
    Ok(())
}

fn apply_overrides(config: &mut HostConfig, cli: &Cli) {
    if let Some(transport) = cli.transport {
        config.link.transport = transport;
    }
    if let Some(port) = &cli.port {
        config.link.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.link.baud_rate = baud;
    }
    if let Some(address) = &cli.address {
        config.link.address = address.clone();
        if cli.transport.is_none() {
            config.link.transport = Transport::Tcp;
        }
    }
}

async fn open_link(
    config: &HostConfig,
) -> anyhow::Result<(HostHandle, mpsc::Receiver<LinkEvent>)> {
    let settings = config.link_settings();
    let link = match config.link.transport {
        Transport::Serial => match open_serial(&config.link.port, config.link.baud_rate) {
            Ok(stream) => HostLink::spawn(stream, settings),
            Err(e) => {
                if let Ok(ports) = available_ports() {
                    warn!("serial ports on this machine: [{}]", ports.join(", "));
                }
                return Err(e.into());
            }
        },
        Transport::Tcp => HostLink::spawn(connect_tcp(&config.link.address).await?, settings),
    };
    Ok(link)
}

fn print_caps(caps: CapabilitySet) {
    println!("CAP {caps}");
    for name in caps.names() {
        println!("  {name}");
    }
}

fn report(outcome: CommandOutcome) -> anyhow::Result<()> {
    match outcome {
        CommandOutcome::Accepted => {
            println!("OK");
            Ok(())
        }
        CommandOutcome::Rejected {
            code: Some(code),
            message,
        } => bail!("device rejected the command: {code} ({message})"),
        CommandOutcome::Rejected {
            code: None,
            message,
        } => bail!("device rejected the command: {message}"),
    }
}

async fn monitor(
    handle: &HostHandle,
    mut events: mpsc::Receiver<LinkEvent>,
    registry: &mut LinkRegistry,
    ping_secs: u64,
) {
    let mut pinger = tokio::time::interval(Duration::from_secs(ping_secs.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    info!("monitoring link; press Ctrl-C to exit");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                break;
            }
            _ = pinger.tick() => match handle.ping().await {
                Ok(rtt) => registry.update_rtt(handle.id(), rtt),
                Err(e) => warn!("ping failed: {e}"),
            },
            event = events.recv() => match event {
                Some(LinkEvent::Buttons(buttons)) => println!(
                    "buttons: a={} b={}",
                    u8::from(buttons.a_pressed()),
                    u8::from(buttons.b_pressed())
                ),
                Some(LinkEvent::Negotiated(outcome)) => println!("negotiation: {outcome:?}"),
                Some(LinkEvent::Closed) | None => {
                    registry.mark_closed(handle.id());
                    println!("link closed");
                    break;
                }
            },
        }
    }

    let links = registry.all();
    println!("{} of {} link(s) open", registry.open_count(), links.len());
    for link in links {
        let rtt = link
            .last_rtt
            .map(|d| format!("{} ms", d.as_millis()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {}  open={}  rtt={}",
            link.id,
            link.endpoint,
            link.state.name(),
            link.open,
            rtt
        );
    }
}
