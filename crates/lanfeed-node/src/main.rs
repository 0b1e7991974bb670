use anyhow::{Context, Result};
use clap::Parser;
use lanfeed_mesh::identity::LocalIdentity;
use lanfeed_mesh::transport::{DEFAULT_PORT, Transport};
use lanfeed_node::console;
use lanfeed_node::handler::{self, NodeState};
use lanfeed_proto::PeerId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How often the PROFILE keep-alive is re-broadcast.
const PRESENCE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about = "lanfeed peer daemon")]
struct Args {
    /// Your peer id, in the form name@ip. The ip must be this machine's
    /// address on the LAN — other peers send directed messages to it.
    #[arg(long)]
    id: String,

    /// Display name announced to the network.
    #[arg(long)]
    name: String,

    /// Status line announced alongside the display name.
    #[arg(long, default_value = "Exploring the LAN")]
    status: String,

    /// UDP port shared by every peer on the segment.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory where received files are written.
    #[arg(long, default_value = "downloads")]
    downloads: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lanfeed_node=info".into()),
        )
        .init();

    let args = Args::parse();

    let id = PeerId::parse(&args.id).context("--id must be of the form name@ip")?;
    id.addr()
        .context("--id host segment must be an IP address")?;

    let identity = LocalIdentity::new(id, args.name, args.status);
    let transport = Transport::bind_udp(args.port).context("failed to open the transport")?;
    let state = NodeState::new(identity, transport, args.downloads);

    tracing::info!(id = %state.identity.id, port = args.port, "peer is up");

    handler::announce_profile(&state)
        .await
        .context("failed to announce profile")?;

    tokio::spawn(handler::inbound_loop(state.clone()));
    tokio::spawn(presence_loop(state.clone()));

    tokio::select! {
        result = console::run(state.clone()) => {
            result.context("console failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
    }

    tracing::info!("lanfeed-node shut down");
    Ok(())
}

async fn presence_loop(state: Arc<NodeState>) {
    let mut interval = tokio::time::interval(PRESENCE_INTERVAL);
    // The startup announce already went out; skip the immediate first tick.
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(e) = handler::announce_profile(&state).await {
            tracing::warn!(err = %e, "keep-alive announce failed");
        }
    }
}
