use anyhow::{Context, Result};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::peer::{AddrTtl, PeerRegistry};
use crate::types::{
    OverlayMessage, OverlayResponse, PeerAnnouncement, PeerId, Profile, ProfileResponse,
};

/// Configuration for one overlay host
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address to bind (port 0 picks a free port)
    pub listen_addr: String,
    /// Address other peers dial; defaults to the bound address
    pub public_addr: Option<String>,
    /// Seed addresses used to join the overlay
    pub bootstrap_peers: Vec<String>,
    /// Rendezvous key this host advertises and searches under
    pub rendezvous: String,
    /// How often the discovery loop announces (seconds)
    pub sync_interval_secs: u64,
    /// TTL applied to addresses learned from announcements (seconds)
    pub addr_ttl_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".into(),
            public_addr: None,
            bootstrap_peers: vec![],
            rendezvous: "meet me here".into(),
            sync_interval_secs: 30,
            addr_ttl_secs: 7200,
        }
    }
}

/// State shared between the host handle and its overlay server
struct OverlayState {
    peer_id: PeerId,
    public_addr: String,
    rendezvous: String,
    profile: Profile,
    peers: PeerRegistry,
    addr_ttl_secs: u64,
    /// Sink for newly learned peer ids, installed by `discover`
    discovered: RwLock<Option<mpsc::UnboundedSender<PeerId>>>,
}

impl OverlayState {
    fn self_announcement(&self) -> PeerAnnouncement {
        PeerAnnouncement {
            peer_id: self.peer_id.clone(),
            addr: self.public_addr.clone(),
            rendezvous: self.rendezvous.clone(),
            last_seen: Utc::now(),
        }
    }

    /// Everything we can tell another peer: our live address book plus
    /// ourselves, all under our rendezvous key
    async fn announcements(&self) -> Vec<PeerAnnouncement> {
        let mut all: Vec<PeerAnnouncement> = self
            .peers
            .known_peers()
            .await
            .into_iter()
            .map(|record| PeerAnnouncement {
                peer_id: record.peer_id,
                addr: record.addr,
                rendezvous: self.rendezvous.clone(),
                last_seen: record.last_seen,
            })
            .collect();
        all.push(self.self_announcement());
        all
    }

    async fn publish_discovered(&self, ids: &[PeerId]) {
        let guard = self.discovered.read().await;
        if let Some(tx) = guard.as_ref() {
            for id in ids {
                let _ = tx.send(id.clone());
            }
        }
    }
}

/// A bound overlay host: identity, listen address, address book, and the
/// HTTP endpoints other peers talk to. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Host {
    state: Arc<OverlayState>,
    config: HostConfig,
    http: reqwest::Client,
}

impl Host {
    /// Bind the listener, spawn the overlay server and return the handle.
    /// Identity is generated here and immutable afterwards.
    pub async fn bind(config: HostConfig, profile: Profile) -> Result<Host> {
        let listener = tokio::net::TcpListener::bind(&config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
        let bound: SocketAddr = listener.local_addr()?;

        let peer_id: PeerId = uuid::Uuid::new_v4().to_string();
        let public_addr = config
            .public_addr
            .clone()
            .unwrap_or_else(|| bound.to_string());

        let state = Arc::new(OverlayState {
            peer_id: peer_id.clone(),
            public_addr,
            rendezvous: config.rendezvous.clone(),
            profile,
            peers: PeerRegistry::new(peer_id.clone()),
            addr_ttl_secs: config.addr_ttl_secs,
            discovered: RwLock::new(None),
        });

        let app = Router::new()
            .route("/profile", get(get_profile))
            .route("/overlay", post(post_overlay))
            .with_state(state.clone());

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Overlay server stopped");
            }
        });

        tracing::debug!(peer_id = %peer_id, addr = %bound, "Overlay host bound");
        Ok(Host {
            state,
            config,
            http: reqwest::Client::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.state.peer_id
    }

    /// Address other peers dial
    pub fn addr(&self) -> &str {
        &self.state.public_addr
    }

    pub fn rendezvous(&self) -> &str {
        &self.state.rendezvous
    }

    /// Profile snapshot this host serves
    pub fn profile(&self) -> &Profile {
        &self.state.profile
    }

    /// The address book
    pub fn peers(&self) -> &PeerRegistry {
        &self.state.peers
    }

    /// Fetch the profile a remote host serves at `addr`
    pub async fn fetch_profile(&self, addr: &str) -> Result<ProfileResponse> {
        let url = format!("http://{addr}/profile");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to reach peer")?;
        if !resp.status().is_success() {
            anyhow::bail!("Peer returned HTTP {}", resp.status());
        }
        resp.json().await.context("Failed to parse profile response")
    }

    /// Announce ourselves (and our address book) to `addr`, merging whatever
    /// the remote answers with. Returns how many peers were new to us.
    pub(crate) async fn announce_to(&self, addr: &str) -> Result<usize> {
        let msg = OverlayMessage::Announce {
            sender: self.state.self_announcement(),
            peers: self.state.announcements().await,
        };
        let url = format!("http://{addr}/overlay");
        let resp = self
            .http
            .post(&url)
            .json(&msg)
            .send()
            .await
            .context("Failed to reach peer")?;
        if !resp.status().is_success() {
            anyhow::bail!("Peer returned HTTP {}", resp.status());
        }
        let response: OverlayResponse = resp
            .json()
            .await
            .context("Failed to parse overlay response")?;

        let matching: Vec<PeerAnnouncement> = response
            .peers
            .into_iter()
            .filter(|ann| ann.rendezvous == self.state.rendezvous)
            .collect();
        let fresh = self
            .state
            .peers
            .merge(&matching, AddrTtl::Secs(self.state.addr_ttl_secs))
            .await;
        self.state.publish_discovered(&fresh).await;
        Ok(fresh.len())
    }

    /// Join the overlay through the configured bootstrap peers. Per-seed
    /// failures are logged and skipped.
    pub async fn bootstrap(&self) -> Result<()> {
        tracing::info!(
            peer_id = %self.state.peer_id,
            seeds = ?self.config.bootstrap_peers,
            "🌱 Bootstrapping overlay host"
        );
        for seed in &self.config.bootstrap_peers {
            match self.announce_to(seed).await {
                Ok(count) => {
                    tracing::info!(seed = %seed, new_peers = count, "Connection established with bootstrap node");
                }
                Err(e) => {
                    tracing::warn!(seed = %seed, error = %e, "Failed to reach bootstrap node");
                }
            }
        }
        let peer_count = self.state.peers.count().await;
        tracing::info!(peers = peer_count, "Bootstrap complete");
        Ok(())
    }

    /// Advertise under the rendezvous key and stream discovered peer ids.
    ///
    /// Spawns the background announce loop; every peer id newly learned —
    /// from our own announcements or from inbound ones — is pushed into the
    /// returned channel exactly once. The stream never yields our own id.
    pub async fn discover(&self) -> mpsc::UnboundedReceiver<PeerId> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.discovered.write().await = Some(tx);

        let host = self.clone();
        tokio::spawn(async move {
            host.run_announce_loop().await;
        });
        rx
    }

    /// Periodic announce/sync with sampled known peers; falls back to the
    /// bootstrap seeds while the address book is empty.
    async fn run_announce_loop(&self) {
        let interval = std::time::Duration::from_secs(self.config.sync_interval_secs);
        let mut timer = tokio::time::interval(interval);

        loop {
            timer.tick().await;

            self.state.peers.prune_expired().await;

            let targets = self.state.peers.sample(3).await;
            if targets.is_empty() {
                for seed in &self.config.bootstrap_peers {
                    if let Err(e) = self.announce_to(seed).await {
                        tracing::debug!(seed = %seed, error = %e, "Seed announce failed");
                    }
                }
                continue;
            }

            for record in targets {
                if let Err(e) = self.announce_to(&record.addr).await {
                    tracing::debug!(peer = %record.peer_id, error = %e, "Announce failed");
                } else {
                    self.state.peers.touch(&record.peer_id).await;
                }
            }

            let count = self.state.peers.count().await;
            tracing::debug!(peers = count, "Announce round complete");
        }
    }
}

async fn get_profile(State(state): State<Arc<OverlayState>>) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        peer_id: state.peer_id.clone(),
        profile: state.profile.clone(),
    })
}

async fn post_overlay(
    State(state): State<Arc<OverlayState>>,
    Json(msg): Json<OverlayMessage>,
) -> Json<OverlayResponse> {
    match msg {
        OverlayMessage::Announce { sender, peers } => {
            // Ignore announcements for other rendezvous keys entirely
            if sender.rendezvous != state.rendezvous {
                return Json(OverlayResponse {
                    peer_id: state.peer_id.clone(),
                    peers: vec![],
                });
            }

            let ttl = AddrTtl::Secs(state.addr_ttl_secs);
            let mut batch = vec![sender];
            batch.extend(peers.into_iter().filter(|ann| ann.rendezvous == state.rendezvous));
            let fresh = state.peers.merge(&batch, ttl).await;
            state.publish_discovered(&fresh).await;

            Json(OverlayResponse {
                peer_id: state.peer_id.clone(),
                peers: state.announcements().await,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_host(profile: &[&str]) -> Host {
        let config = HostConfig {
            sync_interval_secs: 3600,
            ..HostConfig::default()
        };
        Host::bind(config, profile.iter().map(|s| s.to_string()).collect())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_serves_own_profile() {
        let host = test_host(&["rust", "p2p"]).await;
        let resp = host.fetch_profile(host.addr()).await.unwrap();
        assert_eq!(resp.peer_id, host.id());
        assert_eq!(resp.profile, vec!["rust".to_string(), "p2p".to_string()]);
    }

    #[tokio::test]
    async fn test_announce_exchanges_addresses() {
        let a = test_host(&["x"]).await;
        let b = test_host(&["x"]).await;

        let fresh = b.announce_to(a.addr()).await.unwrap();
        // b learns a from the response
        assert_eq!(fresh, 1);
        assert_eq!(b.peers().lookup(a.id()).await.as_deref(), Some(a.addr()));
        // a learned b from the inbound announcement
        assert_eq!(a.peers().lookup(b.id()).await.as_deref(), Some(b.addr()));
    }

    #[tokio::test]
    async fn test_discovery_yields_peer_exactly_once() {
        let a = test_host(&["x"]).await;
        let b = test_host(&["x"]).await;

        let mut discovered = b.discover().await;
        b.announce_to(a.addr()).await.unwrap();
        b.announce_to(a.addr()).await.unwrap();

        let first = tokio::time::timeout(std::time::Duration::from_secs(2), discovered.recv())
            .await
            .expect("discovery stream should yield")
            .unwrap();
        assert_eq!(first, a.id());

        // no second yield for the same peer
        let second =
            tokio::time::timeout(std::time::Duration::from_millis(200), discovered.recv()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_foreign_rendezvous_is_ignored() {
        let a = test_host(&["x"]).await;
        let config = HostConfig {
            rendezvous: "somewhere else".into(),
            sync_interval_secs: 3600,
            ..HostConfig::default()
        };
        let b = Host::bind(config, vec!["x".into()]).await.unwrap();

        let fresh = b.announce_to(a.addr()).await.unwrap();
        assert_eq!(fresh, 0);
        assert_eq!(a.peers().count().await, 0);
        assert_eq!(b.peers().count().await, 0);
    }
}
