//! Gravitation Protocol
//!
//! Decentralized affinity clustering over a peer-to-peer overlay. Every node
//! declares a profile (an ordered list of interest tags) and, on meeting
//! another peer, decides whether to capture it into its orbit.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────┐  announce  ┌──────┐  announce  ┌──────┐
//!  │Node A│◄──────────►│Node B│◄──────────►│Node C│
//!  └──┬───┘            └──────┘            └──────┘
//!     │ profile match: B enters A's orbit
//!     ▼
//!  Orbit(A) = { B }
//! ```
//!
//! ## Gravitation
//! - Each node owns exactly one [`types::GravitationData`]
//! - On encountering a peer, the node fetches the remote profile and runs the
//!   capture routine; a profile match appends a [`types::Body`] to the orbit
//! - Capture is directional: only the caller's orbit changes
//!
//! ## Overlay
//! - Each host serves its profile over HTTP and announces itself under a
//!   rendezvous key
//! - The address book maps peer ids to dialable addresses with a TTL
//! - A discovery loop feeds newly learned peer ids into an unbounded stream
//!
//! ## Topology harness
//! - A JSON fixture describes a synthetic network; the harness spins up real
//!   localhost hosts, wires their address books, drives pairwise captures and
//!   reports a deterministic pass/fail verdict

pub mod gravitation;
pub mod host;
pub mod node;
pub mod peer;
pub mod persist;
pub mod topology;
pub mod types;

pub use gravitation::{CaptureOutcome, ExactMatch, MatchPolicy};
pub use host::{Host, HostConfig};
pub use node::Node;
pub use peer::{AddrTtl, PeerRegistry};
pub use persist::{read_grav_data, write_grav_data};
pub use topology::{run_topology_test, TopologyFixture, TopologyReport};
pub use types::{Body, GravitationData, PeerId, Profile};
