//! Progress Snapshots
//!
//! Complete race progress state, sent when a replica lost track of the
//! authority. Serialized with bincode; the version byte comes first so
//! incompatible snapshots are rejected before the rest is trusted.

use bincode::Options;
use serde::{Serialize, Deserialize};

use crate::core::vec3::Transform;
use crate::race::progress::KartProgressInfo;
use crate::track::TrackSector;
use super::protocol::ReplicationError;

/// Snapshot layout version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Fixed-width integers, and nothing may follow the snapshot.
fn snapshot_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Everything a replica needs to continue from the authority's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Layout version
    pub version: u8,
    /// Tick the snapshot was taken at
    pub tick: u32,
    /// Race fastest lap in ticks
    pub fastest_lap_ticks: u32,
    /// Race fastest lap holder
    pub fastest_lap_holder: String,
    /// Estimator distance offset
    pub distance_increase: f32,
    /// Last pose of every kart
    pub transforms: Vec<Transform>,
    /// Progress of every kart
    pub karts: Vec<KartProgressInfo>,
    /// Track sector of every kart
    pub sectors: Vec<TrackSector>,
    /// Check active bits as `[structure][kart]`
    pub check_active: Vec<Vec<bool>>,
}

impl ProgressSnapshot {
    /// Serialize with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplicationError> {
        Ok(snapshot_options().serialize(self)?)
    }

    /// Deserialize with bincode.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReplicationError> {
        if let Some(&version) = data.first() {
            if version != SNAPSHOT_VERSION {
                return Err(ReplicationError::VersionMismatch { got: version, expected: SNAPSHOT_VERSION });
            }
        }
        Ok(snapshot_options().deserialize(data)?)
    }

    /// Serialize to JSON (for debug dumps).
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Check the snapshot fits a race with `num_karts` karts and
    /// `num_structures` check structures.
    pub fn validate(&self, num_karts: usize, num_structures: usize) -> Result<(), ReplicationError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(ReplicationError::VersionMismatch { got: self.version, expected: SNAPSHOT_VERSION });
        }
        for len in [self.transforms.len(), self.karts.len(), self.sectors.len()] {
            if len != num_karts {
                return Err(ReplicationError::KartCountMismatch { got: len, expected: num_karts });
            }
        }
        if self.check_active.len() != num_structures {
            return Err(ReplicationError::CheckCountMismatch {
                got: self.check_active.len(),
                expected: num_structures,
            });
        }
        if let Some(row) = self.check_active.iter().find(|row| row.len() != num_karts) {
            return Err(ReplicationError::KartCountMismatch { got: row.len(), expected: num_karts });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(karts: usize, structures: usize) -> ProgressSnapshot {
        ProgressSnapshot {
            version: SNAPSHOT_VERSION,
            tick: 42,
            fastest_lap_ticks: u32::MAX,
            fastest_lap_holder: String::new(),
            distance_increase: 1.5,
            transforms: vec![Transform::IDENTITY; karts],
            karts: vec![KartProgressInfo::default(); karts],
            sectors: vec![TrackSector::new(); karts],
            check_active: vec![vec![true; karts]; structures],
        }
    }

    #[test]
    fn test_bincode_round_trip() {
        let s = snapshot(3, 2);
        let bytes = s.to_bytes().expect("serializes");
        assert_eq!(bytes[0], SNAPSHOT_VERSION);
        assert_eq!(ProgressSnapshot::from_bytes(&bytes).expect("deserializes"), s);
    }

    #[test]
    fn test_version_checked_first() {
        let mut bytes = snapshot(1, 1).to_bytes().expect("serializes");
        bytes[0] = SNAPSHOT_VERSION + 1;
        assert!(matches!(
            ProgressSnapshot::from_bytes(&bytes),
            Err(ReplicationError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_counts() {
        let s = snapshot(2, 3);
        assert!(s.validate(2, 3).is_ok());
        assert!(matches!(s.validate(3, 3), Err(ReplicationError::KartCountMismatch { got: 2, expected: 3 })));
        assert!(matches!(s.validate(2, 4), Err(ReplicationError::CheckCountMismatch { got: 3, expected: 4 })));

        let mut ragged = snapshot(2, 3);
        ragged.check_active[1].pop();
        assert!(matches!(ragged.validate(2, 3), Err(ReplicationError::KartCountMismatch { .. })));
    }

    #[test]
    fn test_truncated_snapshot_rejected() {
        let bytes = snapshot(2, 2).to_bytes().expect("serializes");
        assert!(matches!(
            ProgressSnapshot::from_bytes(&bytes[..bytes.len() / 2]),
            Err(ReplicationError::Snapshot(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = snapshot(2, 2).to_bytes().expect("serializes");
        bytes.push(0);
        assert!(matches!(
            ProgressSnapshot::from_bytes(&bytes),
            Err(ReplicationError::Snapshot(_))
        ));
    }
}
