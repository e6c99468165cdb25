use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{Body, GravitationData, Profile};

/// On-disk shape: the profile tags plus the orbit as a flat list of bodies
#[derive(Debug, Serialize, Deserialize)]
struct StoredGravData {
    profile: Profile,
    orbit: Vec<Body>,
}

/// Serialize gravitation state to `path`. Called once on graceful shutdown;
/// the caller treats failure as log-only.
pub async fn write_grav_data(path: impl AsRef<Path>, data: &GravitationData) -> Result<()> {
    let path = path.as_ref();
    let stored = StoredGravData {
        profile: data.profile.clone(),
        orbit: data.bodies().cloned().collect(),
    };
    let json = serde_json::to_string_pretty(&stored)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write gravitation state to {}", path.display()))?;
    Ok(())
}

/// Restore gravitation state from `path`. Called once at startup; the caller
/// treats failure as fatal, since running with unknown profile/orbit state
/// is worse than not running.
pub async fn read_grav_data(path: impl AsRef<Path>) -> Result<GravitationData> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read gravitation state from {}", path.display()))?;
    let stored: StoredGravData = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed gravitation state in {}", path.display()))?;
    Ok(GravitationData::from_parts(stored.profile, stored.orbit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gravitation::{capture, ExactMatch};

    #[tokio::test]
    async fn test_round_trip_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grav.json");

        let mut data = GravitationData::new(vec!["rust".into(), "p2p".into()]);
        let profile = data.profile.clone();
        capture(&mut data, "me", "peer-1", &profile, &ExactMatch);
        capture(&mut data, "me", "peer-2", &profile, &ExactMatch);

        write_grav_data(&path, &data).await.unwrap();
        let restored = read_grav_data(&path).await.unwrap();

        assert_eq!(restored, data);
        assert_eq!(restored.orbit_ids(), data.orbit_ids());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_grav_data(dir.path().join("nope.json")).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grav.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(read_grav_data(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_bodies_collapse_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grav.json");
        let raw = serde_json::json!({
            "profile": ["a"],
            "orbit": [
                { "peer_id": "p1", "profile": ["a"] },
                { "peer_id": "p1", "profile": ["a"] }
            ]
        });
        tokio::fs::write(&path, raw.to_string()).await.unwrap();

        let restored = read_grav_data(&path).await.unwrap();
        assert_eq!(restored.orbit_len(), 1);
    }

    #[tokio::test]
    async fn test_body_without_snapshot_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grav.json");
        let raw = serde_json::json!({
            "profile": ["a"],
            "orbit": [ { "peer_id": "p1" } ]
        });
        tokio::fs::write(&path, raw.to_string()).await.unwrap();

        let restored = read_grav_data(&path).await.unwrap();
        let body = restored.bodies().next().unwrap();
        assert_eq!(body.profile, None);
    }
}
