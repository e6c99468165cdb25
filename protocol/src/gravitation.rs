use crate::types::{Body, GravitationData, Profile};

/// Comparator deciding whether a remote profile is close enough to capture.
///
/// The observable rule is exact-sequence equality, but the comparator is a
/// seam so alternative policies (set overlap, weighted similarity) can slot
/// in without touching the capture routine.
pub trait MatchPolicy: Send + Sync {
    fn matches(&self, local: &Profile, remote: &Profile) -> bool;
}

/// Element-for-element equality: same tags, same order, same length.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl MatchPolicy for ExactMatch {
    fn matches(&self, local: &Profile, remote: &Profile) -> bool {
        local == remote
    }
}

/// What one capture attempt did to the orbit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Profiles matched and the peer was appended to the orbit
    Captured,
    /// Profiles matched but the peer was already in the orbit
    AlreadyCaptured,
    /// Profiles did not match; orbit unchanged
    NoMatch,
    /// The remote id is our own id; orbit unchanged
    SelfCapture,
}

/// The shared capture routine. Both entry points (capture-by-handle and
/// capture-by-identifier) funnel here so their semantics cannot drift.
///
/// Idempotent: repeated calls with the same peer never create duplicates and
/// never remove an existing body.
pub fn capture(
    data: &mut GravitationData,
    self_id: &str,
    remote_id: &str,
    remote_profile: &Profile,
    policy: &dyn MatchPolicy,
) -> CaptureOutcome {
    if remote_id == self_id {
        return CaptureOutcome::SelfCapture;
    }
    if !policy.matches(&data.profile, remote_profile) {
        return CaptureOutcome::NoMatch;
    }
    let body = Body {
        peer_id: remote_id.to_string(),
        profile: Some(remote_profile.clone()),
    };
    if data.insert(body) {
        CaptureOutcome::Captured
    } else {
        CaptureOutcome::AlreadyCaptured
    }
}
