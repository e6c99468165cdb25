mod config;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gravitation_protocol::topology::run_topology_file;
use gravitation_protocol::{read_grav_data, write_grav_data, GravitationData, Host, HostConfig, Node};

#[derive(Parser)]
#[command(
    name = "gravitation-node",
    about = "Gravitation protocol: affinity clustering over a peer-to-peer overlay"
)]
struct Cli {
    /// Listen address for the overlay host
    #[arg(long, default_value = "127.0.0.1:0", env = "GRAV_LISTEN")]
    listen: String,

    /// Address other peers dial (defaults to the bound address)
    #[arg(long, env = "GRAV_PUBLIC_ADDR")]
    public_addr: Option<String>,

    /// Bootstrap peer address (repeatable or comma-separated)
    #[arg(long = "bootstrap", env = "GRAV_BOOTSTRAP", value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Rendezvous key to advertise and search under
    #[arg(long, default_value = "meet me here", env = "GRAV_RENDEZVOUS")]
    rendezvous: String,

    /// Initial profile tag (repeatable or comma-separated)
    #[arg(long = "tag", value_delimiter = ',')]
    profile: Vec<String>,

    /// Load persisted gravitation state from this file at startup
    #[arg(long, env = "GRAV_LOAD_FILE")]
    load_file: Option<String>,

    /// Persist gravitation state to this file on shutdown
    #[arg(long, env = "GRAV_SAVE_FILE")]
    save_file: Option<String>,

    /// Run the topology test in this fixture instead of joining the overlay
    #[arg(long = "test-file", short = 't', env = "GRAV_TEST_FILE")]
    test_file: Option<String>,

    /// Overlay announce interval in seconds
    #[arg(long, default_value = "30")]
    sync_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = config::Config {
        listen_addr: cli.listen,
        public_addr: cli.public_addr,
        bootstrap_peers: cli.bootstrap,
        rendezvous: cli.rendezvous,
        profile: cli.profile,
        load_file: cli.load_file,
        save_file: cli.save_file,
        test_file: cli.test_file,
        sync_interval_secs: cli.sync_interval,
    };

    if let Some(fixture_path) = &cfg.test_file {
        return run_test_mode(fixture_path).await;
    }
    run_live_mode(cfg).await
}

async fn run_test_mode(fixture_path: &str) -> Result<()> {
    let report = run_topology_file(fixture_path).await?;
    if report.passed {
        tracing::info!("Test successful!");
    } else {
        tracing::info!(
            expected = ?report.expected,
            actual = ?report.actual,
            "Test failed."
        );
    }
    Ok(())
}

async fn run_live_mode(cfg: config::Config) -> Result<()> {
    // Startup state: loaded from disk, or fresh with the configured (or
    // default) profile. A configured-but-unreadable file is fatal.
    let data = match &cfg.load_file {
        Some(path) => read_grav_data(path)
            .await
            .with_context(|| format!("Cannot start with unreadable state file {path}"))?,
        None => {
            let profile = if cfg.profile.is_empty() {
                vec!["test".into(), "test2".into(), "test3".into()]
            } else {
                cfg.profile.clone()
            };
            GravitationData::new(profile)
        }
    };
    tracing::info!(profile = ?data.profile, orbit = data.orbit_len(), "Gravitation state ready");

    let host_config = HostConfig {
        listen_addr: cfg.listen_addr.clone(),
        public_addr: cfg.public_addr.clone(),
        bootstrap_peers: cfg.bootstrap_peers.clone(),
        rendezvous: cfg.rendezvous.clone(),
        sync_interval_secs: cfg.sync_interval_secs,
        ..HostConfig::default()
    };
    let host = Host::bind(host_config, data.profile.clone()).await?;
    tracing::info!(peer_id = %host.id(), addr = %host.addr(), "Overlay host up");

    let node = Node::new(host, data);

    node.host().bootstrap().await?;

    let mut discovered = node.host().discover().await;
    tracing::info!(rendezvous = %cfg.rendezvous, "Announced ourselves; searching for other peers");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("==> Stopping gravitation node");
                break;
            }
            maybe = discovered.recv() => {
                match maybe {
                    Some(peer_id) => {
                        tracing::info!(peer = %peer_id, "Found peer");
                        match node.gravitation_peer_id(&peer_id).await {
                            Ok(outcome) => {
                                tracing::info!(peer = %peer_id, ?outcome, "Gravitation attempt finished");
                            }
                            Err(e) => {
                                tracing::warn!(peer = %peer_id, error = %e, "Gravitation attempt failed");
                            }
                        }
                    }
                    None => {
                        // stream closed; nothing left to do but wait for the signal
                        (&mut shutdown).await;
                        tracing::info!("==> Stopping gravitation node");
                        break;
                    }
                }
            }
        }
    }

    if let Some(path) = &cfg.save_file {
        tracing::info!(path = %path, "Saving gravitation state");
        let snapshot = node.data_snapshot().await;
        if let Err(e) = write_grav_data(path, &snapshot).await {
            tracing::warn!(error = %e, "Failed to persist gravitation state");
        }
    }

    tracing::info!("Node shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok(); };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
