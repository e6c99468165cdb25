use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{PeerAnnouncement, PeerId};

/// How long an address stays valid in the registry
#[derive(Debug, Clone, Copy)]
pub enum AddrTtl {
    /// Never expires (topology wiring, bootstrap seeds)
    Permanent,
    Secs(u64),
}

impl AddrTtl {
    fn expiry_from(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            AddrTtl::Permanent => DateTime::<Utc>::MAX_UTC,
            AddrTtl::Secs(secs) => now + Duration::seconds(secs as i64),
        }
    }
}

/// One known peer address
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub addr: String,
    pub last_seen: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PeerRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The address book — thread-safe map of peer id to dialable address.
///
/// The registry never stores the owning host's own id, so the discovery
/// stream built on top of it cannot yield the host to itself.
#[derive(Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<PeerId, PeerRecord>>>,
    self_id: PeerId,
}

impl PeerRegistry {
    pub fn new(self_id: PeerId) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            self_id,
        }
    }

    /// Add or refresh an address. An existing record keeps the later of the
    /// two expiries, so a short-lived announcement cannot downgrade a
    /// permanent entry.
    pub async fn add_address(&self, peer_id: &str, addr: &str, ttl: AddrTtl) -> bool {
        if peer_id == self.self_id {
            return false;
        }
        let now = Utc::now();
        let expiry = ttl.expiry_from(now);
        let mut peers = self.peers.write().await;
        match peers.get_mut(peer_id) {
            Some(record) => {
                record.addr = addr.to_string();
                record.last_seen = now;
                record.expires_at = record.expires_at.max(expiry);
                false
            }
            None => {
                tracing::info!(peer = %peer_id, addr = %addr, "🌐 Discovered new peer");
                peers.insert(
                    peer_id.to_string(),
                    PeerRecord {
                        peer_id: peer_id.to_string(),
                        addr: addr.to_string(),
                        last_seen: now,
                        expires_at: expiry,
                    },
                );
                true
            }
        }
    }

    /// Merge a batch of announcements, returning the ids that were new to
    /// the registry.
    pub async fn merge(&self, announcements: &[PeerAnnouncement], ttl: AddrTtl) -> Vec<PeerId> {
        let mut fresh = Vec::new();
        for ann in announcements {
            if self.add_address(&ann.peer_id, &ann.addr, ttl).await {
                fresh.push(ann.peer_id.clone());
            }
        }
        fresh
    }

    /// Dialable address for a peer, if known and not expired
    pub async fn lookup(&self, peer_id: &str) -> Option<String> {
        let peers = self.peers.read().await;
        peers
            .get(peer_id)
            .filter(|r| !r.is_expired(Utc::now()))
            .map(|r| r.addr.clone())
    }

    /// Mark a peer as seen
    pub async fn touch(&self, peer_id: &str) {
        let mut peers = self.peers.write().await;
        if let Some(record) = peers.get_mut(peer_id) {
            record.last_seen = Utc::now();
        }
    }

    /// Drop expired records
    pub async fn prune_expired(&self) {
        let now = Utc::now();
        let mut peers = self.peers.write().await;
        let before = peers.len();
        peers.retain(|id, record| {
            let keep = !record.is_expired(now);
            if !keep {
                tracing::debug!(peer = %id, "Address expired, removing");
            }
            keep
        });
        let removed = before - peers.len();
        if removed > 0 {
            tracing::debug!(removed = removed, remaining = peers.len(), "Pruned expired addresses");
        }
    }

    /// All live records
    pub async fn known_peers(&self) -> Vec<PeerRecord> {
        let now = Utc::now();
        let peers = self.peers.read().await;
        peers
            .values()
            .filter(|r| !r.is_expired(now))
            .cloned()
            .collect()
    }

    /// Pick up to N random live peers for announce fan-out
    pub async fn sample(&self, n: usize) -> Vec<PeerRecord> {
        use rand::seq::SliceRandom;
        let live = self.known_peers().await;
        if live.len() <= n {
            return live;
        }
        let mut rng = rand::thread_rng();
        let mut selected = live;
        selected.shuffle(&mut rng);
        selected.truncate(n);
        selected
    }

    pub async fn count(&self) -> usize {
        self.known_peers().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann(id: &str, addr: &str) -> PeerAnnouncement {
        PeerAnnouncement {
            peer_id: id.into(),
            addr: addr.into(),
            rendezvous: "meet".into(),
            last_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let reg = PeerRegistry::new("me".into());
        assert!(reg.add_address("p1", "127.0.0.1:9000", AddrTtl::Permanent).await);
        assert_eq!(reg.lookup("p1").await.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(reg.lookup("p2").await, None);
    }

    #[tokio::test]
    async fn test_own_id_is_never_stored() {
        let reg = PeerRegistry::new("me".into());
        assert!(!reg.add_address("me", "127.0.0.1:9000", AddrTtl::Permanent).await);
        assert_eq!(reg.count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_address_is_invisible() {
        let reg = PeerRegistry::new("me".into());
        reg.add_address("p1", "127.0.0.1:9000", AddrTtl::Secs(0)).await;
        assert_eq!(reg.lookup("p1").await, None);
        reg.prune_expired().await;
        assert_eq!(reg.count().await, 0);
    }

    #[tokio::test]
    async fn test_short_ttl_cannot_downgrade_permanent() {
        let reg = PeerRegistry::new("me".into());
        reg.add_address("p1", "127.0.0.1:9000", AddrTtl::Permanent).await;
        reg.add_address("p1", "127.0.0.1:9001", AddrTtl::Secs(0)).await;
        // address updates, expiry does not shrink
        assert_eq!(reg.lookup("p1").await.as_deref(), Some("127.0.0.1:9001"));
    }

    #[tokio::test]
    async fn test_merge_reports_only_new_peers() {
        let reg = PeerRegistry::new("me".into());
        let batch = vec![ann("p1", "127.0.0.1:9000"), ann("me", "127.0.0.1:9001")];
        let fresh = reg.merge(&batch, AddrTtl::Secs(60)).await;
        assert_eq!(fresh, vec!["p1".to_string()]);
        let again = reg.merge(&batch, AddrTtl::Secs(60)).await;
        assert!(again.is_empty());
    }
}
