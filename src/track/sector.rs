//! Track Sector
//!
//! Per-kart projection of a world position onto the drive graph: which
//! node the kart is on, how far it is from the centre line and how far
//! down the track it has come.

use serde::{Serialize, Deserialize};

use crate::core::vec3::Vec3;
use super::drive_graph::DriveGraph;

/// Successor steps within which an off-road node change is accepted.
pub const MAX_SECTOR_JUMP: usize = 2;

/// Where on the track a kart is.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSector {
    current_node: Option<usize>,
    last_valid_node: Option<usize>,
    on_road: bool,
    lateral: f32,
    distance_from_start: f32,
    previous_distance_from_start: f32,
    last_triggered_checkline: Option<usize>,
}

impl TrackSector {
    /// Sector with no node assigned yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything (race reset).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Project `xyz` onto the graph.
    ///
    /// On-road nodes are always accepted. Off the road the closest node is
    /// only accepted when it is within [`MAX_SECTOR_JUMP`] steps of the
    /// previous node or is the wraparound pair (last node and node 0);
    /// otherwise the previous node is kept, so a kart flying over the
    /// infield is not snapped to an unrelated part of the track.
    pub fn update(&mut self, graph: &DriveGraph, xyz: Vec3) {
        let prev = self.current_node;

        let node = match graph.find_road_sector(xyz, prev, false) {
            Some(node) => {
                self.on_road = true;
                node
            }
            None => {
                self.on_road = false;
                let candidate = graph.find_out_of_road_sector(xyz, false);
                match prev {
                    Some(p) if !Self::accepts_transition(graph, p, candidate) => p,
                    _ => candidate,
                }
            }
        };
        self.current_node = Some(node);

        let (lateral, distance) = graph.node(node).distances(xyz);
        self.previous_distance_from_start = if prev.is_some() {
            self.distance_from_start
        } else {
            distance
        };
        self.lateral = lateral;
        self.distance_from_start = distance;

        if self.on_road && self.is_valid_rescue_node(graph, node) {
            self.last_valid_node = Some(node);
        }
    }

    fn accepts_transition(graph: &DriveGraph, prev: usize, candidate: usize) -> bool {
        let last = graph.num_nodes() - 1;
        graph.is_nearby(prev, candidate, MAX_SECTOR_JUMP)
            || (prev == last && candidate == 0)
            || (prev == 0 && candidate == last)
    }

    /// A node can be used for rescue once the kart has crossed the check
    /// line the node depends on.
    fn is_valid_rescue_node(&self, graph: &DriveGraph, node: usize) -> bool {
        let requirements = graph.node(node).checkline_requirements();
        requirements.is_empty()
            || self
                .last_triggered_checkline
                .map_or(false, |c| requirements.contains(&c))
    }

    /// Place the kart on `node` explicitly (rescue teleport).
    pub fn rescue(&mut self, graph: &DriveGraph, node: usize) {
        let (lateral, distance) = graph.node(node).distances(graph.node(node).center());
        self.current_node = Some(node);
        self.last_valid_node = Some(node);
        self.on_road = true;
        self.lateral = lateral;
        self.distance_from_start = distance;
        self.previous_distance_from_start = distance;
    }

    /// Record the last check line this kart crossed.
    pub fn set_last_triggered_checkline(&mut self, index: Option<usize>) {
        self.last_triggered_checkline = index;
    }

    /// Last check line this kart crossed.
    pub fn last_triggered_checkline(&self) -> Option<usize> {
        self.last_triggered_checkline
    }

    /// Current node, if the kart has been projected.
    pub fn current_node(&self) -> Option<usize> {
        self.current_node
    }

    /// Last node that is a valid rescue position.
    pub fn last_valid_node(&self) -> Option<usize> {
        self.last_valid_node
    }

    /// Node to rescue the kart to.
    pub fn rescue_node(&self) -> usize {
        self.last_valid_node.or(self.current_node).unwrap_or(0)
    }

    /// Whether the kart is on a drivable quad.
    pub fn is_on_road(&self) -> bool {
        self.on_road
    }

    /// Signed distance to the centre line (right positive).
    pub fn distance_to_center(&self) -> f32 {
        self.lateral
    }

    /// Node distance from start plus the offset into the node.
    pub fn distance_from_start(&self) -> f32 {
        self.distance_from_start
    }

    /// Distance from start at the previous update.
    pub fn previous_distance_from_start(&self) -> f32 {
        self.previous_distance_from_start
    }
}

// =============================================================================
// TESTS
// =============================================================================
