//! # Race Progress
//!
//! Race progress tracking for kart racing: where every kart is on the
//! track, how many laps it has done, its rank and its estimated finish
//! time, replicated from one authority to any number of replicas.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RACE PROGRESS                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Geometry and state hashing              │
//! │  ├── vec2.rs       - Ground-plane vectors and segments       │
//! │  ├── vec3.rs       - 3D vectors and kart transforms          │
//! │  └── hash.rs       - State hashing for sync verification     │
//! │                                                              │
//! │  track/            - Track description                       │
//! │  ├── drive_node.rs - One quad of the driveline               │
//! │  ├── drive_graph.rs- Successor graph, lap length, grid       │
//! │  ├── sector.rs     - Per-kart position on the graph          │
//! │  └── loader.rs     - JSON track files                        │
//! │                                                              │
//! │  checks/           - Check lines                             │
//! │  ├── structure.rs  - Lines, spheres and their effects        │
//! │  └── manager.rs    - Per-kart active bits, crossing tests    │
//! │                                                              │
//! │  race/             - Race state                              │
//! │  ├── kart.rs       - Kart identity and per-tick input        │
//! │  ├── progress.rs   - Laps, distance, ranks, estimates        │
//! │  ├── events.rs     - Race notifications                      │
//! │  └── session.rs    - Per-tick step, authority or replica     │
//! │                                                              │
//! │  network/          - Replication messages                    │
//! │  ├── protocol.rs   - Incremental events (binary layout)      │
//! │  └── replication.rs- Full snapshots (bincode)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Given the same track, the same karts and the same poses every tick,
//! an authority and a replica fed its messages end up with bit-identical
//! progress state, which [`RaceSession::compute_hash`] verifies.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod checks;
pub mod core;
pub mod network;
pub mod race;
pub mod track;

// Re-export commonly used types
pub use crate::core::vec3::{Transform, Vec3};
pub use checks::{CheckKind, CheckManager, CheckStructure};
pub use network::{ReplicationError, ReplicationMessage, ProgressSnapshot};
pub use race::{
    Kart, KartFrame, KartId, KartState, RaceConfig, RaceEvent, RaceEventData,
    RaceProgressTracker, RaceSession, SessionConfig, SessionRole, TickResult,
};
pub use track::{DriveGraph, Track, TrackLoadError, TrackSector};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 120;
