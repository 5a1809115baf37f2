//! Peer process entry point (spec §6): loads configuration, wires the actor
//! graph together, restores any crash-recovery snapshot, then runs the
//! wire transport and editor WebSocket server until shut down.

mod editor_ws;
mod transport;
mod wiring;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use p2pdoc_core::{NodeConfig, PeerId};

use editor_ws::SharedEditorSink;

#[derive(Parser)]
#[command(name = "p2pdoc-node")]
#[command(about = "A peer in a collaborative text editing mesh", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file. Missing file falls back to defaults.
    #[arg(short, long, global = true, default_value = "p2pdoc.toml")]
    config: PathBuf,

    /// Override the configured peer id, e.g. `alice@10.0.0.1`.
    #[arg(long, global = true)]
    peer_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the peer with no bootstrap neighbor.
    Serve,
    /// Start the peer and immediately ask to join an existing peer's mesh.
    Connect { peer_address: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = NodeConfig::load_from_file(&cli.config).unwrap_or_else(|err| {
        tracing::warn!(error = %err, path = %cli.config.display(), "using default config");
        NodeConfig::default()
    });
    if let Some(peer_id) = cli.peer_id {
        config.peer_id = peer_id;
    }
    PeerId::parse(&config.peer_id).expect("peer_id must be a valid name@ip address");
    std::fs::create_dir_all(&config.save_dir)?;

    let editor_sink = SharedEditorSink::new();
    let (handles, tcp_runtime) = wiring::spawn_node(&config, editor_sink.clone());
    wiring::restore_from_snapshot(&config, &handles).await;
    let handles = Arc::new(handles);

    tokio::spawn(tcp_runtime.clone().listen());
    tokio::spawn(editor_ws::serve(
        config.api_port,
        handles.clone(),
        editor_sink,
    ));

    if let Commands::Connect { peer_address } = cli.command {
        match PeerId::parse(&peer_address) {
            Ok(peer) => handles.mesh.join(peer, p2pdoc_mesh::JoinMode::Ask).await,
            Err(err) => tracing::error!(%peer_address, error = %err, "invalid bootstrap peer address"),
        }
    }

    tracing::info!(peer = %config.peer_id, wire_port = config.wire_port, api_port = config.api_port, "p2pdoc-node running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    let chars = handles.doc_session.snapshot().await;
    let (t, d) = handles.causal_bus.snapshot().await;
    let content: String = chars.iter().filter_map(|c| c.value).collect();
    if let Err(err) = p2pdoc_session::persistence::write_autosave(&config.save_path(), &content) {
        tracing::warn!(error = %err, "final autosave failed");
    }
    if let Err(err) = p2pdoc_session::persistence::write_state_snapshot(
        &wiring::state_snapshot_path(&config),
        &chars,
        &t,
        &d,
    ) {
        tracing::warn!(error = %err, "final state snapshot failed");
    }
    handles.mesh.leave_all().await;

    Ok(())
}
