use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use relaycast::{ListenerConfig, Relay, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "UDP multicast to gRPC stream relay", long_about = None)]
struct Args {
    /// Multicast group to join (must be a multicast address)
    #[arg(long, default_value = ListenerConfig::DEFAULT_MULTICAST_IP)]
    multicast_ip: String,

    /// UDP port of the multicast group
    #[arg(long, default_value_t = ListenerConfig::DEFAULT_PORT)]
    multicast_port: u16,

    /// Requested SO_RCVBUF size in bytes
    #[arg(long, default_value_t = ListenerConfig::DEFAULT_SOCKET_BUFFER)]
    socket_buffer_size: usize,

    /// Listen address for the gRPC stream endpoint
    #[arg(long, default_value = ":50051")]
    grpc_addr: String,

    /// Join the multicast group on this NIC (kernel-chosen if empty)
    #[arg(long, default_value = "")]
    interface: String,

    /// Enable multicast loopback (test setups only)
    #[arg(long)]
    loopback: bool,

    /// Per-subscriber queue capacity
    #[arg(long, default_value_t = ListenerConfig::DEFAULT_CHANNEL_BUFFER)]
    channel_buffer: usize,

    /// CPU core to pin the process to
    #[arg(long)]
    core_id: Option<usize>,

    /// Debug logging
    #[arg(long)]
    verbose: bool,
}

/// Accepts both `host:port` and the bare `:port` shorthand.
fn parse_grpc_addr(raw: &str) -> Result<SocketAddr> {
    let normalized = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    normalized
        .parse()
        .with_context(|| format!("invalid gRPC listen address '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Some(core_id) = args.core_id {
        let core_ids = core_affinity::get_core_ids().context("Failed to get core IDs")?;
        if core_id < core_ids.len() {
            info!("Pinning process to core {}", core_id);
            core_affinity::set_for_current(core_ids[core_id]);
        } else {
            anyhow::bail!(
                "Core ID {} out of range ({} cores available)",
                core_id,
                core_ids.len()
            );
        }
    }

    let listener = ListenerConfig {
        multicast_ip: args.multicast_ip,
        port: args.multicast_port,
        interface: (!args.interface.is_empty()).then_some(args.interface),
        socket_buffer: args.socket_buffer_size,
        channel_buffer: args.channel_buffer,
        loopback: args.loopback,
        ..Default::default()
    };
    let config = RelayConfig {
        listener,
        grpc_addr: parse_grpc_addr(&args.grpc_addr)?,
        ..Default::default()
    };

    let relay = Relay::start(config).await.context("failed to start relay")?;
    let shutdown = relay.shutdown_token();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    let fatal = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            false
        }
        _ = sigterm.recv() => {
            info!("termination signal received, shutting down");
            false
        }
        _ = shutdown.cancelled() => true,
    };

    relay.shutdown().await.context("shutdown failed")?;

    if fatal {
        anyhow::bail!("relay terminated on a fatal error");
    }
    Ok(())
}
