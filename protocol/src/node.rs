use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::gravitation::{capture, CaptureOutcome, ExactMatch, MatchPolicy};
use crate::host::Host;
use crate::types::{GravitationData, PeerId, ProfileResponse};

/// One gravitation participant: a bound overlay host plus the affinity
/// state it mutates.
///
/// All orbit mutation goes through the mutex, so concurrent captures from
/// the discovery loop serialize instead of interleaving read-modify-write.
pub struct Node {
    host: Host,
    data: Arc<Mutex<GravitationData>>,
    policy: Arc<dyn MatchPolicy>,
}

impl Node {
    /// Wrap a host and its state with the default exact-match policy
    pub fn new(host: Host, data: GravitationData) -> Self {
        Self::with_policy(host, data, Arc::new(ExactMatch))
    }

    pub fn with_policy(host: Host, data: GravitationData, policy: Arc<dyn MatchPolicy>) -> Self {
        Self {
            host,
            data: Arc::new(Mutex::new(data)),
            policy,
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn id(&self) -> &str {
        self.host.id()
    }

    /// Captured peer ids in stable order
    pub async fn orbit_ids(&self) -> Vec<PeerId> {
        self.data.lock().await.orbit_ids()
    }

    /// Clone of the current state, for persistence at shutdown
    pub async fn data_snapshot(&self) -> GravitationData {
        self.data.lock().await.clone()
    }

    /// Capture-by-handle: attempt to capture an already-known peer by
    /// fetching its profile over its dialable address.
    pub async fn gravitation(&self, remote: &Host) -> Result<CaptureOutcome> {
        let resp = self
            .host
            .fetch_profile(remote.addr())
            .await
            .with_context(|| format!("Profile of peer {} unobtainable", remote.id()))?;
        Ok(self.capture_remote(resp).await)
    }

    /// Capture-by-identifier: resolve the peer's address through the address
    /// book first, then run the same capture routine. Resolution or fetch
    /// failure leaves the orbit untouched.
    pub async fn gravitation_peer_id(&self, peer_id: &str) -> Result<CaptureOutcome> {
        let addr = self
            .host
            .peers()
            .lookup(peer_id)
            .await
            .ok_or_else(|| anyhow!("No known address for peer {peer_id}"))?;
        let resp = self
            .host
            .fetch_profile(&addr)
            .await
            .with_context(|| format!("Profile of peer {peer_id} unobtainable"))?;
        if resp.peer_id != peer_id {
            tracing::debug!(
                expected = %peer_id,
                answered = %resp.peer_id,
                "Address book entry answered with a different identity"
            );
        }
        Ok(self.capture_remote(resp).await)
    }

    async fn capture_remote(&self, resp: ProfileResponse) -> CaptureOutcome {
        let mut data = self.data.lock().await;
        let outcome = capture(
            &mut data,
            self.host.id(),
            &resp.peer_id,
            &resp.profile,
            self.policy.as_ref(),
        );
        match outcome {
            CaptureOutcome::Captured => {
                tracing::info!(
                    peer = %resp.peer_id,
                    orbit_size = data.orbit_len(),
                    "🪐 Captured peer into orbit"
                );
            }
            CaptureOutcome::AlreadyCaptured => {
                tracing::debug!(peer = %resp.peer_id, "Peer already in orbit");
            }
            CaptureOutcome::NoMatch => {
                tracing::debug!(peer = %resp.peer_id, "Profiles do not match");
            }
            CaptureOutcome::SelfCapture => {
                tracing::debug!("Skipping self-capture");
            }
        }
        outcome
    }
}
