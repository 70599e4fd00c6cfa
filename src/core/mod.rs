//! Core primitives.
//!
//! Geometry shared by the track, check and race modules, plus state
//! hashing used to prove that replicas match the authority.

pub mod vec2;
pub mod vec3;
pub mod hash;

// Re-export core types
pub use vec2::{Vec2, Segment2};
pub use vec3::{Vec3, Transform, normalize_angle};
pub use hash::{compute_state_hash, StateHash, StateHasher};
