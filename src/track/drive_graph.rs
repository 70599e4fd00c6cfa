//! Drive Graph
//!
//! Directed graph of track nodes. Encodes the legal driving paths
//! (including shortcuts), the distance of every node from the start line
//! and the turn structure used by steering code.
//!
//! Built once per track load, then shared read-only by every kart.

use std::collections::VecDeque;

use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::vec3::{normalize_angle, Transform, Vec3};
use super::drive_node::{
    Direction, DirectionData, DriveNode, NodeSpec,
    MAX_HEIGHT_TESTING, MIN_HEIGHT_TESTING,
};

/// Lap length used when the graph has no measurable extent.
pub const DEGENERATE_LAP_LENGTH: f32 = 10.0;

// =============================================================================
// CONFIG
// =============================================================================

/// Configuration for building the drive graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Drive the track in reverse
    pub reverse: bool,
    /// Largest bearing change (radians) still classified as straight
    pub straight_tolerance: f32,
    /// Height band below a quad that still counts as on it
    pub min_height_testing: f32,
    /// Height band above a quad that still counts as on it
    pub max_height_testing: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            reverse: false,
            straight_tolerance: 0.1,
            min_height_testing: MIN_HEIGHT_TESTING,
            max_height_testing: MAX_HEIGHT_TESTING,
        }
    }
}

/// Layout of the default starting grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartGridConfig {
    /// Karts placed side by side in one row
    pub karts_per_row: u32,
    /// Spacing along the track between consecutive karts
    pub forwards_distance: f32,
    /// Spacing across the track; negative mirrors the grid
    pub sidewards_distance: f32,
    /// Height added above the driveline
    pub upwards_distance: f32,
}

impl Default for StartGridConfig {
    fn default() -> Self {
        Self {
            karts_per_row: 2,
            forwards_distance: 1.5,
            sidewards_distance: 3.0,
            upwards_distance: 0.1,
        }
    }
}

// =============================================================================
// EDGES
// =============================================================================

/// Explicit edge entry of a track description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EdgeSpec {
    /// Single edge `from -> to`
    Edge {
        /// Source node
        from: usize,
        /// Target node
        to: usize,
    },
    /// Chain `from -> from+1 -> ... -> to`
    EdgeLine {
        /// First node
        from: usize,
        /// Last node
        to: usize,
    },
    /// Chain `from -> ... -> to -> from`
    EdgeLoop {
        /// First node
        from: usize,
        /// Last node
        to: usize,
    },
    /// Node declaration; nodes come from the quad list, so this is accepted
    /// and ignored
    NodeList {
        /// Number of quads declared
        #[serde(default)]
        count: Option<usize>,
    },
}

// =============================================================================
// ERRORS
// =============================================================================

/// Errors aborting a track load.
#[derive(Debug, thiserror::Error)]
pub enum TrackLoadError {
    /// No drivable nodes.
    #[error("No driveline found, or empty driveline")]
    NoNodes,

    /// Distances from the start line cannot be resolved.
    #[error("Drive graph contains an unresolved loop (without start node) at node {node}")]
    UnresolvedLoop {
        /// Node that kept growing
        node: usize,
    },

    /// Malformed track description.
    #[error("Invalid track description: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid check structure reference.
    #[error("Check structure {index}: {reason}")]
    InvalidCheck {
        /// Structure index
        index: usize,
        /// What is wrong
        reason: String,
    },
}

// =============================================================================
// DRIVE GRAPH
// =============================================================================

/// The drive graph of a track.
#[derive(Clone, Debug)]
pub struct DriveGraph {
    nodes: Vec<DriveNode>,
    lap_length: f32,
    reverse: bool,
    start_node: usize,
}

impl DriveGraph {
    /// Build the graph from node specs and an optional edge list.
    ///
    /// Without edges every node `i` gets `i + 1` as successor (the last node
    /// wraps to 0). Nodes left without a successor after explicit edges get
    /// the same default.
    pub fn load(
        nodes: &[NodeSpec],
        edges: Option<&[EdgeSpec]>,
        config: &GraphConfig,
    ) -> Result<Self, TrackLoadError> {
        if nodes.is_empty() {
            return Err(TrackLoadError::NoNodes);
        }

        let height_testing = (config.min_height_testing, config.max_height_testing);
        let mut graph = Self {
            nodes: nodes
                .iter()
                .enumerate()
                .map(|(i, spec)| DriveNode::new(i, spec, config.reverse, height_testing))
                .collect(),
            lap_length: DEGENERATE_LAP_LENGTH,
            reverse: config.reverse,
            start_node: 0,
        };

        match edges {
            Some(edges) => {
                for edge in edges {
                    graph.apply_edge(edge);
                }
            }
            None => {
                warn!("No graph description, using default successors");
            }
        }
        graph.set_default_successors();

        graph.start_node = if graph.reverse {
            graph.nodes[0].successor(0).unwrap_or(0)
        } else {
            0
        };

        graph.compute_distance_from_start()?;
        graph.compute_lap_length();
        graph.compute_direction_data(config.straight_tolerance);

        info!(
            "Drive graph loaded: {} nodes, lap length {:.2}, start node {}",
            graph.nodes.len(),
            graph.lap_length,
            graph.start_node
        );

        Ok(graph)
    }

    fn apply_edge(&mut self, edge: &EdgeSpec) {
        let n = self.nodes.len();
        let valid = |a: usize, b: usize| a < n && b < n;
        match *edge {
            EdgeSpec::Edge { from, to } if valid(from, to) => {
                self.add_successor(from, to);
            }
            EdgeSpec::EdgeLine { from, to } if valid(from, to) => {
                for i in from..to {
                    self.add_successor(i, i + 1);
                }
            }
            EdgeSpec::EdgeLoop { from, to } if valid(from, to) => {
                for i in from..to {
                    self.add_successor(i, i + 1);
                }
                self.add_successor(to, from);
            }
            EdgeSpec::NodeList { .. } => {
                debug!("Ignoring node-list entry");
            }
            ref other => {
                warn!("Edge {:?} references a node outside 0..{}, ignored", other, n);
            }
        }
    }

    /// Add an edge. On a reversed track the edge is flipped.
    ///
    /// Records the predecessor on the target, the distance between the
    /// lower centers and the bearing between the quad centers.
    fn add_successor(&mut self, from: usize, to: usize) {
        if self.reverse {
            self.push_edge(to, from);
        } else {
            self.push_edge(from, to);
        }
    }

    fn push_edge(&mut self, from: usize, to: usize) {
        let distance = (self.nodes[from].lower_center() - self.nodes[to].lower_center()).length();
        let angle = (self.nodes[to].center() - self.nodes[from].center()).heading();

        let node = &mut self.nodes[from];
        node.successors.push(to);
        node.distance_to_next.push(distance);
        node.angle_to_next.push(angle);
        self.nodes[to].predecessors.push(from);
    }

    /// Give every node without a successor the next node in race
    /// direction (wrapping around).
    fn set_default_successors(&mut self) {
        let n = self.nodes.len();
        for i in 0..n {
            if self.nodes[i].successors.is_empty() {
                let next = if self.reverse { (i + n - 1) % n } else { (i + 1) % n };
                self.push_edge(i, next);
            }
        }
    }

    /// Longest-path distances from the start node.
    ///
    /// FIFO worklist relaxation with a best-distance array. Edges into the
    /// start node are never relaxed. A node queued more often than there
    /// are nodes sits on a loop that does not pass the start node.
    fn compute_distance_from_start(&mut self) -> Result<(), TrackLoadError> {
        let n = self.nodes.len();
        let start = self.start_node;

        let mut best: Vec<Option<f32>> = vec![None; n];
        let mut queued = vec![false; n];
        let mut enqueue_count = vec![0usize; n];
        let mut queue = VecDeque::with_capacity(n);

        best[start] = Some(0.0);
        queue.push_back(start);
        queued[start] = true;

        while let Some(current) = queue.pop_front() {
            queued[current] = false;
            let Some(distance) = best[current] else {
                continue;
            };

            let node = &self.nodes[current];
            for (i, &succ) in node.successors.iter().enumerate() {
                if succ == start {
                    continue;
                }
                let candidate = distance + node.distance_to_next[i];
                if best[succ].map_or(true, |d| candidate > d) {
                    best[succ] = Some(candidate);
                    if !queued[succ] {
                        enqueue_count[succ] += 1;
                        if enqueue_count[succ] > n {
                            return Err(TrackLoadError::UnresolvedLoop { node: succ });
                        }
                        queued[succ] = true;
                        queue.push_back(succ);
                    }
                }
            }
        }

        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.distance_from_start = match best[i] {
                Some(d) => d,
                None => {
                    warn!("Node {} is not reachable from the start node", i);
                    0.0
                }
            };
        }

        Ok(())
    }

    fn compute_lap_length(&mut self) {
        self.lap_length = self
            .nodes
            .iter()
            .map(|n| n.distance_from_start + n.distance_to_successor(0))
            .fold(0.0f32, f32::max);

        if self.lap_length <= 0.0 {
            warn!("Drive graph has no extent, using lap length {}", DEGENERATE_LAP_LENGTH);
            self.lap_length = DEGENERATE_LAP_LENGTH;
        }
    }

    fn compute_direction_data(&mut self, tolerance: f32) {
        for i in 0..self.nodes.len() {
            let data: Vec<DirectionData> = (0..self.nodes[i].successors.len())
                .map(|succ_index| self.determine_direction(i, succ_index, tolerance))
                .collect();
            self.nodes[i].direction = data;
        }
    }

    /// Follow successor 0 from `current` via successor `succ_index` until
    /// the turn classification changes.
    fn determine_direction(&self, current: usize, succ_index: usize, tolerance: f32) -> DirectionData {
        let classify = |angle: f32| if angle.abs() < tolerance { 0.0 } else { angle };
        let main = |node: usize| self.nodes[node].successor(0).unwrap_or(node);

        let mut angle_current = self.nodes[current].angle_to_successor(succ_index);
        let mut next = self.nodes[current].successors[succ_index];
        let mut angle_next = self.nodes[next].angle_to_successor(0);
        let mut rel_angle = classify(normalize_angle(angle_next - angle_current));

        next = main(next);

        for _ in 0..self.nodes.len().saturating_sub(1) {
            angle_current = angle_next;
            angle_next = self.nodes[next].angle_to_successor(0);
            let new_rel_angle = classify(normalize_angle(angle_next - angle_current));

            if (rel_angle != 0.0 && new_rel_angle == 0.0)
                || (rel_angle == 0.0 && new_rel_angle != 0.0)
                || rel_angle * new_rel_angle < 0.0
            {
                break;
            }
            rel_angle = new_rel_angle;
            next = main(next);
        }

        let direction = if rel_angle == 0.0 {
            Direction::Straight
        } else if rel_angle > 0.0 {
            Direction::Right
        } else {
            Direction::Left
        };

        DirectionData { direction, last_index: next }
    }

    /// Record, for every node, the check line a kart must have crossed
    /// last before reaching it.
    ///
    /// Walks the graph from the start node until the walk wraps back to the
    /// start. `triggering(from, to)` returns the check line crossed between
    /// two positions, if any.
    pub fn compute_checkline_requirements<F>(&mut self, lap_line: Option<usize>, triggering: F)
    where
        F: Fn(Vec3, Vec3) -> Option<usize>,
    {
        for node in &mut self.nodes {
            node.checkline_requirements.clear();
        }
        let Some(lap_line) = lap_line else {
            return;
        };

        let start = self.start_node;
        let mut stack = vec![(start, lap_line)];

        while let Some((current, latest)) = stack.pop() {
            let from = self.nodes[current].center();
            let successors = self.nodes[current].successors.clone();
            for succ in successors {
                if succ == start {
                    continue;
                }
                let to = self.nodes[succ].center();
                let new_latest = triggering(from, to).unwrap_or(latest);

                let requirements = &mut self.nodes[succ].checkline_requirements;
                if requirements.contains(&new_latest) {
                    continue;
                }
                requirements.push(new_latest);
                stack.push((succ, new_latest));
            }
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Node by index.
    pub fn node(&self, index: usize) -> &DriveNode {
        &self.nodes[index]
    }

    /// All nodes.
    pub fn nodes(&self) -> &[DriveNode] {
        &self.nodes
    }

    /// Length of one lap.
    pub fn lap_length(&self) -> f32 {
        self.lap_length
    }

    /// Whether the track is driven in reverse.
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Node at which lap counting starts.
    pub fn start_node(&self) -> usize {
        self.start_node
    }

    /// Successors of `node`. With `for_ai`, successors flagged ai-ignore are
    /// skipped unless every successor is flagged.
    pub fn get_successors(&self, node: usize, for_ai: bool) -> Vec<usize> {
        let all = self.nodes[node].successors();
        if !for_ai {
            return all.to_vec();
        }
        let usable: Vec<usize> = all
            .iter()
            .copied()
            .filter(|&s| !self.nodes[s].is_ai_ignore())
            .collect();
        if usable.is_empty() {
            all.to_vec()
        } else {
            usable
        }
    }

    /// Whether `b` is reachable from `a`, or `a` from `b`, within `steps`
    /// edges.
    pub fn is_nearby(&self, a: usize, b: usize, steps: usize) -> bool {
        a == b || self.reachable_within(a, b, steps) || self.reachable_within(b, a, steps)
    }

    fn reachable_within(&self, from: usize, to: usize, steps: usize) -> bool {
        let mut frontier = vec![from];
        for _ in 0..steps {
            let mut next = Vec::new();
            for &node in &frontier {
                for &succ in self.nodes[node].successors() {
                    if succ == to {
                        return true;
                    }
                    next.push(succ);
                }
            }
            frontier = next;
        }
        false
    }

    /// Pose used to put a kart back on the track at `index`.
    pub fn get_rescue_transform(&self, index: usize) -> Transform {
        let node = &self.nodes[index];
        Transform {
            origin: node.center() + node.normal() * 0.5,
            heading: node.angle_to_successor(0),
            up: node.normal(),
        }
    }

    /// Starting grid behind the start node.
    ///
    /// Karts are placed along predecessor 0 only, so irregular node sizes
    /// and shortcuts do not affect the layout. Every second row is shifted
    /// sideways by half the spacing.
    pub fn set_default_start_positions(&self, count: usize, grid: &StartGridConfig) -> Vec<Transform> {
        let mut transforms = vec![Transform::IDENTITY; count];

        let mut current = self.nodes[self.start_node].predecessor(0);
        let mut distance_from_start = 0.75 + grid.forwards_distance;

        let (sidewards, multiplier) = if grid.sidewards_distance < 0.0 {
            (-grid.sidewards_distance, -1.0)
        } else {
            (grid.sidewards_distance, 1.0)
        };

        let max_x_dist = 0.5 * (grid.karts_per_row as f32 - 0.5) * sidewards;
        let mut x_pos = -max_x_dist + sidewards * 0.5;
        let mut row_number = 0u32;

        for transform in transforms.iter_mut() {
            let Some(mut node_index) = current else {
                continue;
            };

            // Bounded walk: zero-length nodes must not stall it
            let mut steps = 0;
            while distance_from_start > self.nodes[node_index].node_length() && steps < self.nodes.len() {
                distance_from_start -= self.nodes[node_index].node_length();
                match self.nodes[node_index].predecessor(0) {
                    Some(pred) => node_index = pred,
                    None => break,
                }
                steps += 1;
            }
            current = Some(node_index);

            let node = &self.nodes[node_index];
            let center_line = (node.lower_center() - node.upper_center()).normalize();
            let horizontal = (node.corner(2) - node.corner(3)).normalize();

            let start = node.upper_center()
                + center_line * distance_from_start
                + horizontal * (x_pos * multiplier);

            *transform = Transform::new(
                start + Vec3::new(0.0, grid.upwards_distance, 0.0),
                node.angle_to_successor(0),
            );

            if x_pos >= max_x_dist - sidewards * 0.5 {
                x_pos = -max_x_dist;
                row_number += 1;
                if row_number % 2 == 0 {
                    x_pos += sidewards * 0.5;
                }
            } else {
                x_pos += sidewards;
            }
            distance_from_start += grid.forwards_distance;
        }

        transforms
    }

    /// Find the node a point is on.
    ///
    /// `current` is tested first; then all nodes in index order.
    pub fn find_road_sector(&self, xyz: Vec3, current: Option<usize>, ignore_vertical: bool) -> Option<usize> {
        if let Some(c) = current {
            if c < self.nodes.len() && !self.nodes[c].is_ignored() && self.nodes[c].point_inside(xyz, ignore_vertical) {
                return Some(c);
            }
        }

        self.nodes
            .iter()
            .find(|n| Some(n.index()) != current && !n.is_ignored() && n.point_inside(xyz, ignore_vertical))
            .map(|n| n.index())
    }

    /// Node whose centre line is closest to a point that is off the road.
    ///
    /// First only nodes within the height band are considered, then all.
    pub fn find_out_of_road_sector(&self, xyz: Vec3, ignore_vertical: bool) -> usize {
        let phases: &[bool] = if ignore_vertical { &[false] } else { &[true, false] };

        for &height_check in phases {
            let closest = self
                .nodes
                .iter()
                .filter(|n| !n.is_ignored())
                .filter(|n| !height_check || n.within_height_band(xyz))
                .map(|n| (n.index(), n.distance2_from_center_line(xyz)))
                .fold(None, |best: Option<(usize, f32)>, (i, d)| match best {
                    Some((_, bd)) if bd <= d => best,
                    _ => Some((i, d)),
                });

            if let Some((index, _)) = closest {
                return index;
            }
        }

        warn!("Can not find an out-of-road sector for {}, using node 0", xyz);
        0
    }
}

// =============================================================================
// TEST TRACKS
// =============================================================================

/// Square loop: one node per side, lower edges on the corners, `p0` on
/// the outer side. Starts at the origin heading along +X.
#[cfg(test)]
pub(crate) fn square_loop_specs(side: f32, width: f32) -> Vec<NodeSpec> {
    let corners = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(side, 0.0, 0.0),
        Vec3::new(side, 0.0, side),
        Vec3::new(0.0, 0.0, side),
    ];
    (0..4)
        .map(|i| {
            let a = corners[i];
            let b = corners[(i + 1) % 4];
            let dir = (b - a).normalize();
            let outward = Vec3::new(dir.z, 0.0, -dir.x);
            let h = width * 0.5;
            NodeSpec::new([a + outward * h, a - outward * h, b - outward * h, b + outward * h])
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> DriveGraph {
        DriveGraph::load(&square_loop_specs(10.0, 4.0), None, &GraphConfig::default())
            .expect("square loop loads")
    }

    #[test]
    fn test_default_loop() {
        let g = square();
        assert_eq!(g.num_nodes(), 4);
        for i in 0..4 {
            assert_eq!(g.node(i).successors(), &[(i + 1) % 4]);
            assert_eq!(g.node((i + 1) % 4).predecessors(), &[i]);
        }
        assert_eq!(g.start_node(), 0);
    }

    #[test]
    fn test_distances_and_lap_length() {
        let g = square();
        let expected = [0.0, 10.0, 20.0, 30.0];
        for (i, e) in expected.iter().enumerate() {
            assert!((g.node(i).distance_from_start() - e).abs() < 1e-4, "node {}", i);
        }
        assert!((g.lap_length() - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_graph_rejected() {
        let result = DriveGraph::load(&[], None, &GraphConfig::default());
        assert!(matches!(result, Err(TrackLoadError::NoNodes)));
    }

    #[test]
    fn test_shortcut_merge_takes_longer_path() {
        // 0 -> 1 -> 2 -> 3 -> 0 plus shortcut 0 -> 2
        let edges = vec![
            EdgeSpec::EdgeLoop { from: 0, to: 3 },
            EdgeSpec::Edge { from: 0, to: 2 },
        ];
        let g = DriveGraph::load(&square_loop_specs(10.0, 4.0), Some(&edges), &GraphConfig::default())
            .expect("loads");

        assert_eq!(g.node(0).successors(), &[1, 2]);
        // Diagonal shortcut is ~14.1, the main path is 20
        assert!((g.node(2).distance_from_start() - 20.0).abs() < 1e-4);
        assert_eq!(g.node(2).predecessors(), &[1, 0]);
    }

    #[test]
    fn test_unresolved_loop_is_fatal() {
        // 1 <-> 2 cycle never passes the start node
        let edges = vec![
            EdgeSpec::Edge { from: 0, to: 1 },
            EdgeSpec::Edge { from: 1, to: 2 },
            EdgeSpec::Edge { from: 2, to: 1 },
            EdgeSpec::Edge { from: 3, to: 0 },
        ];
        let result = DriveGraph::load(&square_loop_specs(10.0, 4.0), Some(&edges), &GraphConfig::default());
        assert!(matches!(result, Err(TrackLoadError::UnresolvedLoop { .. })));
    }

    #[test]
    fn test_invalid_edge_ignored() {
        let edges = vec![
            EdgeSpec::EdgeLoop { from: 0, to: 3 },
            EdgeSpec::Edge { from: 1, to: 17 },
        ];
        let g = DriveGraph::load(&square_loop_specs(10.0, 4.0), Some(&edges), &GraphConfig::default())
            .expect("bad edge skipped");
        assert_eq!(g.node(1).successors(), &[2]);
    }

    #[test]
    fn test_reverse_flips_edges() {
        let config = GraphConfig { reverse: true, ..Default::default() };
        let g = DriveGraph::load(&square_loop_specs(10.0, 4.0), None, &config).expect("loads");
        for i in 0..4 {
            assert_eq!(g.node((i + 1) % 4).successors(), &[i]);
        }
        assert_eq!(g.start_node(), 3, "Reverse start is successor 0 of node 0");
        assert_eq!(g.node(3).distance_from_start(), 0.0);
        assert!((g.lap_length() - 40.0).abs() < 1e-4);
    }

    #[test]
    fn test_direction_data_on_square() {
        let g = square();
        // Every corner of a counter-clockwise square is a turn of the same sign
        let data = g.node(0).direction_data(0).expect("direction computed");
        assert_ne!(data.direction, Direction::Straight);
        for i in 1..4 {
            assert_eq!(g.node(i).direction_data(0).map(|d| d.direction), Some(data.direction));
        }
    }

    #[test]
    fn test_direction_data_straight_run() {
        // Five quads along +Z, looping back
        let specs: Vec<NodeSpec> = (0..5)
            .map(|i| {
                let z0 = i as f32 * 10.0;
                let z1 = z0 + 10.0;
                NodeSpec::new([
                    Vec3::new(-2.0, 0.0, z0),
                    Vec3::new(2.0, 0.0, z0),
                    Vec3::new(2.0, 0.0, z1),
                    Vec3::new(-2.0, 0.0, z1),
                ])
            })
            .collect();
        let g = DriveGraph::load(&specs, None, &GraphConfig::default()).expect("loads");
        let data = g.node(0).direction_data(0).expect("direction computed");
        assert_eq!(data.direction, Direction::Straight);
        // The straight run ends where the wrap back to node 0 turns around
        assert_eq!(data.last_index, 4);
    }

    #[test]
    fn test_find_road_sector() {
        let g = square();
        assert_eq!(g.find_road_sector(Vec3::new(5.0, 0.0, 0.5), None, false), Some(0));
        assert_eq!(g.find_road_sector(Vec3::new(5.0, 0.0, 10.0), Some(0), false), Some(2));
        assert_eq!(g.find_road_sector(Vec3::new(5.0, 0.0, 5.0), None, false), None, "Infield");
        assert_eq!(g.find_road_sector(Vec3::new(5.0, 20.0, 0.0), None, false), None, "Too high");
    }

    #[test]
    fn test_find_out_of_road_sector() {
        let g = square();
        assert_eq!(g.find_out_of_road_sector(Vec3::new(5.0, 0.0, 3.0), false), 0);
        assert_eq!(g.find_out_of_road_sector(Vec3::new(7.5, 0.0, 5.0), false), 1);
        // Height band fails everywhere, second phase still finds the closest
        assert_eq!(g.find_out_of_road_sector(Vec3::new(5.0, 50.0, 11.0), false), 2);
    }

    #[test]
    fn test_is_nearby() {
        let g = square();
        assert!(g.is_nearby(0, 2, 2));
        assert!(g.is_nearby(2, 0, 2));
        assert!(g.is_nearby(3, 1, 2));
        assert!(!g.is_nearby(0, 2, 1));
    }

    #[test]
    fn test_get_successors_for_ai() {
        let mut specs = square_loop_specs(10.0, 4.0);
        specs[2].ai_ignore = true;
        let edges = vec![
            EdgeSpec::EdgeLoop { from: 0, to: 3 },
            EdgeSpec::Edge { from: 1, to: 3 },
        ];
        let g = DriveGraph::load(&specs, Some(&edges), &GraphConfig::default()).expect("loads");
        assert_eq!(g.get_successors(1, false), vec![2, 3]);
        assert_eq!(g.get_successors(1, true), vec![3]);
        assert_eq!(g.get_successors(0, true), vec![1]);
    }

    #[test]
    fn test_rescue_transform() {
        let g = square();
        let t = g.get_rescue_transform(0);
        assert!((t.origin.x - 5.0).abs() < 1e-4);
        assert!((t.origin.y - 0.5).abs() < 1e-4);
        assert!(t.origin.z.abs() < 1e-4);
        assert_eq!(t.up, Vec3::UP);
        assert_eq!(t.heading, g.node(0).angle_to_successor(0));
    }

    #[test]
    fn test_default_start_positions() {
        let g = square();
        let grid = StartGridConfig::default();
        let starts = g.set_default_start_positions(4, &grid);
        assert_eq!(starts.len(), 4);

        // All karts sit on node 3 (the predecessor of the start node),
        // behind the start line, each one forwards_distance further back
        let d: Vec<f32> = starts
            .iter()
            .map(|t| g.node(3).distances(t.origin).1)
            .collect();
        assert!(d.iter().all(|&x| x < g.lap_length()));
        assert!((40.0 - d[0] - (0.75 + grid.forwards_distance)).abs() < 1e-3);
        assert!((d[0] - d[1] - grid.forwards_distance).abs() < 1e-3);
        assert!((d[0] - d[2] - grid.forwards_distance * 2.0).abs() < 1e-3);

        // Karts of a row are side by side
        let lateral0 = g.node(3).distances(starts[0].origin).0;
        let lateral1 = g.node(3).distances(starts[1].origin).0;
        assert!((lateral0 - lateral1).abs() > 2.9);
        assert!((starts[0].origin.y - grid.upwards_distance).abs() < 1e-6);
        assert_eq!(starts[0].heading, g.node(3).angle_to_successor(0));
    }

    #[test]
    fn test_start_positions_without_predecessor() {
        // Dead end: node 3 loops on itself, nothing leads back to node 0
        let specs = square_loop_specs(10.0, 4.0);
        let edges = vec![EdgeSpec::EdgeLine { from: 0, to: 3 }, EdgeSpec::Edge { from: 3, to: 3 }];
        let g = DriveGraph::load(&specs, Some(&edges), &GraphConfig::default()).expect("loads");
        assert!(g.node(0).predecessors().is_empty());
        let starts = g.set_default_start_positions(2, &StartGridConfig::default());
        assert_eq!(starts, vec![Transform::IDENTITY; 2]);
    }

    #[test]
    fn test_checkline_requirements() {
        let mut g = square();
        // Check line 1 sits between node 1 and node 2
        g.compute_checkline_requirements(Some(0), |from, to| {
            if from.x > 9.0 && to.z > 9.0 {
                Some(1)
            } else {
                None
            }
        });
        assert!(g.node(0).checkline_requirements().is_empty());
        assert_eq!(g.node(1).checkline_requirements(), &[0]);
        assert_eq!(g.node(2).checkline_requirements(), &[1]);
        assert_eq!(g.node(3).checkline_requirements(), &[1]);
    }
}
