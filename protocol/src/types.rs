use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// Unique peer identifier on the overlay
pub type PeerId = String;

/// Ordered list of affinity tags a node declares. Comparison is
/// order-sensitive; the profile is fixed for the lifetime of a run.
pub type Profile = Vec<String>;

/// One captured peer: its identifier plus the profile snapshot taken at
/// capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub peer_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

/// The per-node affinity state: the node's own profile and the orbit of
/// captured peers.
///
/// The orbit is keyed by peer id, so duplicate checks are O(1) and iteration
/// order is stable. Only the capture routine inserts entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GravitationData {
    pub profile: Profile,
    orbit: BTreeMap<PeerId, Body>,
}

impl GravitationData {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            orbit: BTreeMap::new(),
        }
    }

    /// Rebuild state from a profile and a flat list of bodies (the persisted
    /// shape). Duplicate peer ids collapse to the first occurrence.
    pub fn from_parts(profile: Profile, bodies: Vec<Body>) -> Self {
        let mut data = Self::new(profile);
        for body in bodies {
            data.insert(body);
        }
        data
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.orbit.contains_key(peer_id)
    }

    /// Insert a body unless its peer id is already present. Returns whether
    /// the orbit changed.
    pub(crate) fn insert(&mut self, body: Body) -> bool {
        match self.orbit.entry(body.peer_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(body);
                true
            }
        }
    }

    pub fn bodies(&self) -> impl Iterator<Item = &Body> {
        self.orbit.values()
    }

    /// Captured peer ids in stable (sorted) order
    pub fn orbit_ids(&self) -> Vec<PeerId> {
        self.orbit.keys().cloned().collect()
    }

    pub fn orbit_len(&self) -> usize {
        self.orbit.len()
    }

    pub fn orbit_is_empty(&self) -> bool {
        self.orbit.is_empty()
    }
}

/// Announcement of a peer's presence under a rendezvous key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAnnouncement {
    pub peer_id: PeerId,
    /// Address where this peer's overlay endpoint lives
    pub addr: String,
    pub rendezvous: String,
    pub last_seen: DateTime<Utc>,
}

/// A message exchanged between overlay hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OverlayMessage {
    /// "I am here under this rendezvous key; here is who I know"
    Announce {
        sender: PeerAnnouncement,
        peers: Vec<PeerAnnouncement>,
    },
}

/// Response to an overlay message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayResponse {
    pub peer_id: PeerId,
    pub peers: Vec<PeerAnnouncement>,
}

/// Reply to a profile fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub peer_id: PeerId,
    pub profile: Profile,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(id: &str) -> Body {
        Body {
            peer_id: id.into(),
            profile: Some(vec!["x".into()]),
        }
    }

    #[test]
    fn test_orbit_rejects_duplicates() {
        let mut data = GravitationData::new(vec!["a".into()]);
        assert!(data.insert(body("p1")));
        assert!(!data.insert(body("p1")));
        assert_eq!(data.orbit_len(), 1);
    }

    #[test]
    fn test_orbit_ids_are_sorted() {
        let mut data = GravitationData::new(vec![]);
        data.insert(body("zeta"));
        data.insert(body("alpha"));
        assert_eq!(data.orbit_ids(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_from_parts_collapses_duplicates() {
        let data = GravitationData::from_parts(
            vec!["a".into()],
            vec![body("p1"), body("p2"), body("p1")],
        );
        assert_eq!(data.orbit_len(), 2);
        assert!(data.contains("p1"));
        assert!(data.contains("p2"));
    }
}
