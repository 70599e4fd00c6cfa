//! Kart Identity and Per-Tick Input
//!
//! The race layer does not simulate karts. It receives a pose per kart per
//! tick from the physics side and derives everything else from it.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::vec3::Transform;

/// Kart identifier: index into every per-kart table of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct KartId(pub u8);

impl KartId {
    /// Table index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for KartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kart#{}", self.0)
    }
}

/// Race state of a kart. Both end states are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum KartState {
    /// Still racing
    #[default]
    Racing = 0,
    /// Crossed the line on the last lap, or the race was ended early
    Finished = 1,
    /// Knocked out
    Eliminated = 2,
}

/// A kart taking part in the race.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kart {
    /// Identifier
    pub id: KartId,
    /// Display name (fastest lap holder, logs)
    pub name: String,
    /// Position on the starting grid; breaks ranking ties
    pub grid_index: u8,
}

impl Kart {
    /// Create a kart.
    pub fn new(id: u8, name: impl Into<String>, grid_index: u8) -> Self {
        Self {
            id: KartId(id),
            name: name.into(),
            grid_index,
        }
    }
}

/// What the physics side reports for one kart for one tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KartFrame {
    /// Pose after this tick's physics step
    pub transform: Transform,
    /// Kart was knocked out this tick or earlier
    pub eliminated: bool,
}

impl KartFrame {
    /// Frame for a kart still in the race.
    pub fn racing(transform: Transform) -> Self {
        Self { transform, eliminated: false }
    }
}
