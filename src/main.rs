//! Binary entry point: parses CLI flags into a [`NodeConfig`], wires up the
//! metadata store, file store, and connection table, starts the acceptor,
//! and — for a peer — hands control to the console.

use anyhow::Result;
use clap::{Parser, Subcommand};
use starmesh::config::{Capacity, NodeConfig, NodeRole};
use starmesh::net::acceptor::Acceptor;
use starmesh::node::PeerCore;
use starmesh::store::MetadataStore;
use starmesh::tracker::Tracker;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "starmesh", about = "A tracker-coordinated file replication mesh")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a tracker node.
    Tracker {
        #[arg(long, env = "STARMESH_BIND", default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        #[arg(long, env = "STARMESH_PASSWORD")]
        password: String,
        #[arg(long, env = "STARMESH_STORAGE_ROOT", default_value = "./storage")]
        storage_root: PathBuf,
        #[arg(long, env = "STARMESH_LOG_LEVEL", default_value = "info")]
        log_level: String,
    },
    /// Run a peer node and connect to a tracker.
    Peer {
        #[arg(long, env = "STARMESH_BIND", default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        #[arg(long, env = "STARMESH_ADVERTISED_PORT")]
        advertised_port: Option<u16>,
        #[arg(long, env = "STARMESH_TRACKER")]
        tracker: SocketAddr,
        #[arg(long, env = "STARMESH_PASSWORD")]
        password: String,
        #[arg(long, env = "STARMESH_STORAGE_ROOT", default_value = "./storage")]
        storage_root: PathBuf,
        #[arg(long, env = "STARMESH_LOG_LEVEL", default_value = "info")]
        log_level: String,
        #[arg(long, default_value = "1073741824")]
        max_file_size: u64,
        #[arg(long, default_value = "68719476736")]
        max_file_sys_size: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Tracker {
            bind,
            password,
            storage_root,
            log_level,
        } => {
            let config = NodeConfig::builder(NodeRole::Tracker)
                .bind_addr(bind)
                .password(password)
                .storage_root(storage_root)
                .log_level(log_level)
                .build()?;
            init_tracing(&config.log_level);

            let store = MetadataStore::open(config.db_path.clone(), NodeRole::Tracker)?;
            let listener = TcpListener::bind(config.bind_addr).await.map_err(|source| {
                starmesh::error::NodeError::Io { source, path: None }
            })?;
            let peer = Arc::new(PeerCore::new(config.clone(), store));
            let tracker = Arc::new(Tracker::new(peer));
            let acceptor = Acceptor::new(
                listener,
                tracker,
                config.max_frame_len,
                config.acceptor_poll_interval,
            );
            info!(addr = %acceptor.local_addr().unwrap(), "tracker listening");

            let (_shutdown_tx, shutdown_rx) = watch::channel(false);
            acceptor.run(shutdown_rx).await;
        }
        Command::Peer {
            bind,
            advertised_port,
            tracker,
            password,
            storage_root,
            log_level,
            max_file_size,
            max_file_sys_size,
        } => {
            let mut builder = NodeConfig::builder(NodeRole::Peer)
                .bind_addr(bind)
                .tracker_addr(tracker)
                .password(password)
                .storage_root(storage_root)
                .log_level(log_level)
                .capacity(Capacity {
                    max_file_size,
                    max_file_sys_size,
                    curr_file_sys_size: 0,
                });
            if let Some(port) = advertised_port {
                builder = builder.advertised_port(port);
            }
            let config = builder.build()?;
            init_tracing(&config.log_level);

            let store = MetadataStore::open(config.db_path.clone(), NodeRole::Peer)?;
            let listener = TcpListener::bind(config.bind_addr).await.map_err(|source| {
                starmesh::error::NodeError::Io { source, path: None }
            })?;
            let peer = Arc::new(PeerCore::new(config.clone(), store));
            let acceptor = Acceptor::new(
                listener,
                peer.clone(),
                config.max_frame_len,
                config.acceptor_poll_interval,
            );
            info!(addr = %acceptor.local_addr().unwrap(), "peer listening");

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let server = tokio::spawn(acceptor.run(shutdown_rx));

            match peer.connect().await {
                Ok(true) => info!("connected to tracker"),
                Ok(false) => info!("tracker rejected connection"),
                Err(e) => info!(error = %e, "failed to reach tracker"),
            }

            starmesh::cli::run(peer).await;

            let _ = shutdown_tx.send(true);
            let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
