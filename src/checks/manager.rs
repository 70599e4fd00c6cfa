//! Check Manager
//!
//! Owns every check structure of a track and runs the crossing tests each
//! tick. Firing a structure updates the active bits of the structures it
//! controls right away, so a structure armed earlier in the same update can
//! still fire later in it.

use tracing::warn;
#[cfg(feature = "debug-tracing")]
use tracing::debug;

use crate::core::vec3::Vec3;
use crate::track::drive_graph::{DriveGraph, TrackLoadError};
use super::structure::{CheckKind, CheckShape, CheckStructure, Crossing};

/// Extra width on each side of a generated check line.
pub const DEFAULT_CHECKLINE_MARGIN: f32 = 1.0;

/// A structure fired for a kart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckTrigger {
    /// Structure index
    pub check: usize,
    /// Kart index
    pub kart: usize,
}

/// All check structures of a track.
#[derive(Clone, Debug)]
pub struct CheckManager {
    structures: Vec<CheckStructure>,
    lap_line: Option<usize>,
    num_karts: usize,
}

impl CheckManager {
    /// Validate cross references and find the lap line.
    pub fn new(structures: Vec<CheckStructure>) -> Result<Self, TrackLoadError> {
        let count = structures.len();
        for (index, s) in structures.iter().enumerate() {
            if let Some(&bad) = s.dependents().iter().chain(s.same_group()).find(|&&i| i >= count) {
                return Err(TrackLoadError::InvalidCheck {
                    index,
                    reason: format!("refers to structure {} of {}", bad, count),
                });
            }
        }

        let lap_line = structures
            .iter()
            .position(|s| matches!(s.kind(), CheckKind::NewLap));

        Ok(Self { structures, lap_line, num_karts: 0 })
    }

    /// Lap line across the start node plus a gate halfway round that
    /// re-arms it. Used for tracks that define no check structures.
    pub fn default_for_graph(graph: &DriveGraph) -> Self {
        let start = graph.start_node();
        let mut structures = vec![CheckStructure::new(CheckKind::NewLap, edge_line(graph, start))];

        let half = graph.num_nodes() / 2;
        if half > 0 {
            let mut gate = start;
            for _ in 0..half {
                gate = graph.node(gate).successor(0).unwrap_or(gate);
            }
            if gate != start {
                structures.push(
                    CheckStructure::new(CheckKind::Activate, edge_line(graph, gate))
                        .with_dependents(vec![0]),
                );
            }
        }

        Self { structures, lap_line: Some(0), num_karts: 0 }
    }

    /// Reset every structure for `num_karts` karts.
    pub fn reset(&mut self, num_karts: usize) {
        self.num_karts = num_karts;
        for s in &mut self.structures {
            s.reset(num_karts);
        }
    }

    /// Run the crossing tests.
    ///
    /// `crossings[k]` is `None` for karts that take no part (eliminated).
    /// Karts are visited in index order and, for each kart, active
    /// structures in index order.
    pub fn update(&mut self, crossings: &[Option<Crossing>]) -> Vec<CheckTrigger> {
        let mut triggers = Vec::new();

        for (kart, crossing) in crossings.iter().enumerate() {
            let Some(crossing) = crossing else {
                continue;
            };
            for check in 0..self.structures.len() {
                let s = &self.structures[check];
                if s.is_active(kart) && s.is_triggered(crossing) {
                    self.trigger(check, kart);
                    triggers.push(CheckTrigger { check, kart });
                }
            }
        }

        triggers
    }

    /// Apply the effect of `check` firing for `kart` on the active bits.
    pub fn trigger(&mut self, check: usize, kart: usize) {
        #[cfg(feature = "debug-tracing")]
        debug!("Check {} ({:?}) fired for kart {}", check, self.structures[check].kind(), kart);

        let s = &self.structures[check];
        let kind = s.kind().clone();
        let dependents = s.dependents().to_vec();
        let same_group = s.same_group().to_vec();

        match kind {
            CheckKind::NewLap => self.structures[check].set_active(kart, false),
            CheckKind::Activate => {
                for i in dependents {
                    self.structures[i].set_active(kart, true);
                }
            }
            CheckKind::Toggle => {
                for i in dependents {
                    let active = self.structures[i].is_active(kart);
                    self.structures[i].set_active(kart, !active);
                }
            }
            CheckKind::Goal { .. } | CheckKind::Cannon { .. } | CheckKind::Trigger { .. } => {}
        }

        for i in same_group {
            self.structures[i].set_active(kart, false);
        }
    }

    /// First check line crossed by `from -> to`, heights ignored.
    pub fn get_checkline_triggering(&self, from: Vec3, to: Vec3) -> Option<usize> {
        self.structures.iter().position(|s| s.crosses_line(from, to))
    }

    /// Index of the first NEW_LAP structure.
    pub fn lap_line_index(&self) -> Option<usize> {
        self.lap_line
    }

    /// Whether the lap line is armed for `kart`. True when there is none.
    pub fn is_lap_line_active(&self, kart: usize) -> bool {
        self.lap_line.map_or(true, |i| self.structures[i].is_active(kart))
    }

    /// Number of structures.
    pub fn num_structures(&self) -> usize {
        self.structures.len()
    }

    /// Number of karts the bits were reset for.
    pub fn num_karts(&self) -> usize {
        self.num_karts
    }

    /// Structure by index.
    pub fn structure(&self, index: usize) -> &CheckStructure {
        &self.structures[index]
    }

    /// All structures.
    pub fn structures(&self) -> &[CheckStructure] {
        &self.structures
    }

    /// Active bit of every structure for one kart.
    pub fn kart_states(&self, kart: usize) -> Vec<bool> {
        self.structures.iter().map(|s| s.is_active(kart)).collect()
    }

    /// Overwrite the active bits of one kart. Extra or missing entries
    /// are ignored; callers validate the count.
    pub fn set_kart_states(&mut self, kart: usize, states: &[bool]) {
        if states.len() != self.structures.len() {
            warn!(
                "Check state count {} does not match {} structures",
                states.len(),
                self.structures.len()
            );
        }
        for (s, &active) in self.structures.iter_mut().zip(states) {
            s.set_active(kart, active);
        }
    }

    /// Active bits as `[structure][kart]`.
    pub fn active_matrix(&self) -> Vec<Vec<bool>> {
        self.structures
            .iter()
            .map(|s| (0..self.num_karts).map(|k| s.is_active(k)).collect())
            .collect()
    }

    /// Overwrite every active bit from a `[structure][kart]` matrix.
    pub fn set_active_matrix(&mut self, matrix: &[Vec<bool>]) {
        for (s, row) in self.structures.iter_mut().zip(matrix) {
            for (kart, &active) in row.iter().enumerate() {
                s.set_active(kart, active);
            }
        }
    }
}

/// Line across the lower edge of `node`, widened by the default margin.
fn edge_line(graph: &DriveGraph, node: usize) -> CheckShape {
    let node = graph.node(node);
    let half = node.right_unit_vector() * (node.width() * 0.5 + DEFAULT_CHECKLINE_MARGIN);
    let center = node.lower_center();
    CheckShape::line(center - half, center + half, false)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::drive_graph::{square_loop_specs, GraphConfig};

    fn line_at_z(z: f32) -> CheckShape {
        CheckShape::line(Vec3::new(-3.0, 0.0, z), Vec3::new(3.0, 0.0, z), false)
    }

    fn along_z(prev: f32, curr: f32) -> Option<Crossing> {
        Some(Crossing {
            prev: Vec3::new(0.0, 0.0, prev),
            curr: Vec3::new(0.0, 0.0, curr),
            prev_distance: prev,
            curr_distance: curr,
            lap_length: 100.0,
        })
    }

    #[test]
    fn test_new_lap_deactivates_itself() {
        let mut m = CheckManager::new(vec![CheckStructure::new(CheckKind::NewLap, line_at_z(0.0))])
            .expect("valid");
        m.reset(1);

        let triggers = m.update(&[along_z(-1.0, 1.0)]);
        assert_eq!(triggers, vec![CheckTrigger { check: 0, kart: 0 }]);
        assert!(!m.is_lap_line_active(0));

        // Reverse and re-cross: nothing until re-armed
        assert!(m.update(&[along_z(1.0, -1.0)]).is_empty());
        assert!(m.update(&[along_z(-1.0, 1.0)]).is_empty());
    }

    #[test]
    fn test_activate_rearms_lap_line() {
        let mut m = CheckManager::new(vec![
            CheckStructure::new(CheckKind::NewLap, line_at_z(0.0)),
            CheckStructure::new(CheckKind::Activate, line_at_z(50.0)).with_dependents(vec![0]),
        ])
        .expect("valid");
        m.reset(2);

        m.update(&[along_z(-1.0, 1.0), None]);
        assert!(!m.is_lap_line_active(0));
        assert!(m.is_lap_line_active(1));

        let triggers = m.update(&[along_z(49.0, 51.0), None]);
        assert_eq!(triggers, vec![CheckTrigger { check: 1, kart: 0 }]);
        assert!(m.is_lap_line_active(0));
    }

    #[test]
    fn test_same_group() {
        // Two lap lines in one group: crossing A disarms B
        let mut m = CheckManager::new(vec![
            CheckStructure::new(CheckKind::NewLap, line_at_z(0.0)).with_same_group(vec![1]),
            CheckStructure::new(CheckKind::NewLap, line_at_z(10.0)).with_same_group(vec![0]),
            CheckStructure::new(CheckKind::Activate, line_at_z(50.0)).with_dependents(vec![0, 1]),
        ])
        .expect("valid");
        m.reset(1);

        assert_eq!(m.update(&[along_z(-1.0, 1.0)]).len(), 1);
        assert_eq!(m.kart_states(0), vec![false, false, true]);
        assert!(m.update(&[along_z(9.0, 11.0)]).is_empty());

        m.update(&[along_z(49.0, 51.0)]);
        assert_eq!(m.kart_states(0), vec![true, true, true]);
        let triggers = m.update(&[along_z(9.0, 11.0)]);
        assert_eq!(triggers, vec![CheckTrigger { check: 1, kart: 0 }]);
        assert_eq!(m.kart_states(0), vec![false, false, true]);
    }

    #[test]
    fn test_toggle() {
        let mut m = CheckManager::new(vec![
            CheckStructure::new(CheckKind::Toggle, line_at_z(0.0)).with_dependents(vec![1]),
            CheckStructure::new(CheckKind::Goal { first_goal: false }, line_at_z(20.0))
                .with_active_at_reset(false),
        ])
        .expect("valid");
        m.reset(1);

        m.update(&[along_z(-1.0, 1.0)]);
        assert!(m.structure(1).is_active(0));
        m.update(&[along_z(1.0, -1.0)]);
        assert!(!m.structure(1).is_active(0));
    }

    #[test]
    fn test_armed_within_same_update() {
        // The gate arms a line the kart crosses in the same step
        let mut m = CheckManager::new(vec![
            CheckStructure::new(CheckKind::Activate, line_at_z(0.0)).with_dependents(vec![1]),
            CheckStructure::new(CheckKind::NewLap, line_at_z(1.0)).with_active_at_reset(false),
        ])
        .expect("valid");
        m.reset(1);

        let triggers = m.update(&[along_z(-1.0, 2.0)]);
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[1].check, 1);
    }

    #[test]
    fn test_invalid_reference() {
        let result = CheckManager::new(vec![
            CheckStructure::new(CheckKind::Activate, line_at_z(0.0)).with_dependents(vec![4]),
        ]);
        assert!(matches!(result, Err(TrackLoadError::InvalidCheck { index: 0, .. })));
    }

    #[test]
    fn test_checkline_triggering() {
        let m = CheckManager::new(vec![
            CheckStructure::new(CheckKind::Goal { first_goal: true }, CheckShape::sphere(Vec3::ZERO, 5.0)),
            CheckStructure::new(CheckKind::Activate, line_at_z(10.0)),
        ])
        .expect("valid");
        assert_eq!(m.get_checkline_triggering(Vec3::new(0.0, 30.0, 5.0), Vec3::new(0.0, 30.0, 15.0)), Some(1));
        assert_eq!(m.get_checkline_triggering(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, 2.0)), None);
        assert_eq!(m.lap_line_index(), None);
        assert!(m.is_lap_line_active(0));
    }

    #[test]
    fn test_default_checks() {
        let g = DriveGraph::load(&square_loop_specs(10.0, 4.0), None, &GraphConfig::default())
            .expect("loads");
        let mut m = CheckManager::default_for_graph(&g);
        m.reset(1);

        assert_eq!(m.num_structures(), 2);
        assert_eq!(m.lap_line_index(), Some(0));
        assert_eq!(m.structure(1).dependents(), &[0]);

        // Lap line across x = 0 on node 0, gate across x = 10 on node 2
        assert_eq!(m.get_checkline_triggering(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)), Some(0));
        assert_eq!(m.get_checkline_triggering(Vec3::new(11.0, 0.0, 10.0), Vec3::new(9.0, 0.0, 10.0)), Some(1));
    }

    #[test]
    fn test_active_matrix_roundtrip() {
        let mut m = CheckManager::new(vec![
            CheckStructure::new(CheckKind::NewLap, line_at_z(0.0)),
            CheckStructure::new(CheckKind::Activate, line_at_z(50.0)).with_dependents(vec![0]),
        ])
        .expect("valid");
        m.reset(2);
        m.update(&[None, along_z(-1.0, 1.0)]);
        let matrix = m.active_matrix();
        assert_eq!(matrix, vec![vec![true, false], vec![true, true]]);

        let mut other = m.clone();
        other.reset(2);
        other.set_active_matrix(&matrix);
        assert_eq!(other.active_matrix(), matrix);
    }
}
