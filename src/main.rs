//! tickrelay - Lockstep input-relay hub
//!
//! Relays each player's per-tick input frames to every connected peer,
//! with duplicate detection against the last accepted sequence tag.

mod config;
mod network;
mod protocol;
mod relay;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{ClientEvent, NetworkConfig as NetConfig, RelayClient, Server, ServerEvent};
use protocol::{InputFrame, PlayerId, WireFormat};

/// tickrelay - lockstep input relay
#[derive(Parser)]
#[command(name = "tickrelay")]
#[command(author = "Tickrelay Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Relay per-tick input frames between lockstep peers", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind to
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Connect to a relay and drive it with synthetic input frames
    Client {
        /// Relay address to connect to
        #[arg(short, long)]
        server: String,

        /// Relay port
        #[arg(short, long, default_value_t = protocol::DEFAULT_PORT)]
        port: u16,

        /// Player identity to send as
        #[arg(long, default_value_t = 0)]
        player: PlayerId,

        /// Number of frames to send
        #[arg(long, default_value_t = 120)]
        frames: i32,

        /// Milliseconds between frames
        #[arg(long, default_value_t = 16)]
        interval: u64,

        /// Ticks the sequence tag is held before advancing (exercises dedup)
        #[arg(long, default_value_t = 4)]
        hold: u32,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Serve { port, bind } => {
            run_serve(config, port, bind).await?;
        }
        Commands::Client {
            server,
            port,
            player,
            frames,
            interval,
            hold,
        } => {
            run_client(config, server, port, player, frames, interval, hold).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config();
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info();
        }
    }

    Ok(())
}

/// Run the relay server
async fn run_serve(
    mut config: Config,
    port: Option<u16>,
    bind: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.network.port = port;
    }
    if bind.is_some() {
        config.network.bind_address = bind;
    }

    let options = config.relay_options();
    options.codec()?;

    tracing::info!(
        "Starting relay '{}' on port {} ({:?} frames, {:?} identity, {:?} dedup)",
        config.general.name,
        config.network.port,
        options.wire_format,
        options.identity,
        options.dedup,
    );

    let net_config = NetConfig {
        port: config.network.port,
        bind_address: config.network.bind_address.clone(),
        send_queue_depth: config.network.send_queue_depth,
    };
    let mut server = Server::new(net_config, options)?;

    let mut event_rx = server.take_event_receiver().unwrap();
    server.start().await?;

    println!("\n========================================");
    println!("  Tickrelay Server Running");
    println!("========================================");
    println!("  Name: {}", config.general.name);
    println!("  Addr: {}", server.local_addr().unwrap());
    println!("  Frame: {:?} ({} bytes)", options.wire_format, options.wire_format.frame_len());
    println!("========================================");
    println!("\nWaiting for peers to connect...");
    println!("Press Ctrl+C to stop.\n");

    // Main event loop
    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::PeerConnected { addr } => {
                        println!("+ Peer connected: {}", addr);
                    }
                    ServerEvent::PeerDisconnected { addr, reason } => {
                        println!("- Peer disconnected: {} ({})", addr, reason);
                    }
                    ServerEvent::FrameRelayed { player_id, frame_number, novel, fanout, .. } => {
                        tracing::debug!(
                            "relayed player={} frame={} novel={} fanout={}",
                            player_id, frame_number, novel, fanout
                        );
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    server.stop().await?;
    tracing::info!("Relay stopped");

    Ok(())
}

/// Drive a relay with synthetic per-tick frames
#[allow(clippy::too_many_arguments)]
async fn run_client(
    config: Config,
    server: String,
    port: u16,
    player: PlayerId,
    frames: i32,
    interval: u64,
    hold: u32,
) -> anyhow::Result<()> {
    let options = config.relay_options();
    let codec = options.codec()?;

    let server_addr: SocketAddr = if server.contains(':') {
        server.parse()?
    } else {
        network::resolve_host(&server, port).await?
    };

    tracing::info!("Connecting to relay at {} as player {}", server_addr, player);

    let mut client = RelayClient::new(codec);
    let mut event_rx = client.take_event_receiver().unwrap();
    client.connect(server_addr).await?;

    let hold = hold.max(1);
    let mut ticker = tokio::time::interval(Duration::from_millis(interval.max(1)));
    let mut sent = 0i32;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ClientEvent::Connected { server_addr } => {
                        println!("Connected to {}", server_addr);
                    }
                    ClientEvent::FrameReceived { frame, .. } => {
                        println!(
                            "<- player={} frame={} seq={}",
                            frame.player_id, frame.frame_number, frame.sequence_tag
                        );
                    }
                    ClientEvent::Disconnected { reason } => {
                        println!("Disconnected: {}", reason);
                        return Ok(());
                    }
                }
            }
            _ = ticker.tick(), if sent < frames => {
                // The tag keeps the player's parity and advances every
                // `hold` ticks, so retransmissions exercise the dedup path.
                let sequence_tag = player + 2 * (sent as u32 / hold);
                client.send_frame(InputFrame {
                    player_id: player,
                    frame_number: sent,
                    sequence_tag,
                }).await?;
                sent += 1;

                if sent == frames {
                    client.disconnect().await?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                let _ = client.disconnect().await;
                return Ok(());
            }
        }
    }
}

/// Print protocol information
fn print_protocol_info() {
    println!("Tickrelay Protocol Information");
    println!("==============================\n");

    println!("Default port: {}", protocol::DEFAULT_PORT);
    println!();
    println!("Wire formats:");
    println!(
        "  tagged  - {} bytes: player_id:i32-LE, frame_number:i32-LE, sequence_tag:u32-LE",
        WireFormat::Tagged.frame_len()
    );
    println!(
        "  compact - {} bytes: frame_number:i32-LE, sequence_tag:u16-LE",
        WireFormat::Compact.frame_len()
    );
    println!();
    println!("Identity modes:");
    println!("  sequence-parity - player_id = sequence_tag & 1 (two players max)");
    println!("  frame-field     - player_id from the tagged frame field (N players)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["tickrelay", "info"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["tickrelay", "serve", "--port", "10086"]);
        assert!(cli.is_ok());
    }
}
