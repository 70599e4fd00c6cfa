//! Drive Node
//!
//! One segment ("quad") of the drive graph: corner geometry, edges to
//! neighbouring nodes, and values precomputed at load time.
//!
//! Corner layout:
//!
//! ```text
//!   p3 ---------- p2      upper edge (towards successors)
//!    |            |
//!    |   centre   |
//!    |    line    |
//!   p0 ---------- p1      lower edge (towards predecessors)
//! ```
//!
//! `p0` lies on the right-hand side of the driving direction. On a reversed
//! track the lower and upper edges swap roles.

use serde::{Serialize, Deserialize};

use crate::core::vec2::{Segment2, Vec2};
use crate::core::vec3::Vec3;

/// Default height band below a quad in which a point still counts as on it.
pub const MIN_HEIGHT_TESTING: f32 = -1.0;

/// Default height band above a quad in which a point still counts as on it.
pub const MAX_HEIGHT_TESTING: f32 = 5.0;

// =============================================================================
// NODE SPEC
// =============================================================================

/// Which race direction a quad belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelDirection {
    /// Used in both directions
    #[default]
    Both,
    /// Only used when the track is driven forwards
    Forward,
    /// Only used when the track is driven in reverse
    Reverse,
}

/// Load-time description of one node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSpec {
    /// Corners p0..p3
    pub corners: [Vec3; 4],
    /// Not rendered in debug views / minimap
    pub invisible: bool,
    /// AI must not steer onto this node
    pub ai_ignore: bool,
    /// Direction restriction
    pub direction: TravelDirection,
}

impl NodeSpec {
    /// Plain two-way node.
    pub fn new(corners: [Vec3; 4]) -> Self {
        Self {
            corners,
            invisible: false,
            ai_ignore: false,
            direction: TravelDirection::Both,
        }
    }
}

// =============================================================================
// DIRECTION DATA
// =============================================================================

/// Turn classification of a stretch of track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// No significant turn
    Straight,
    /// Turning left
    Left,
    /// Turning right
    Right,
}

/// Direction of the stretch starting at a successor edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectionData {
    /// Classification of the stretch
    pub direction: Direction,
    /// Node where the stretch ends
    pub last_index: usize,
}

// =============================================================================
// DRIVE NODE
// =============================================================================

/// A single node of the drive graph.
#[derive(Clone, Debug)]
pub struct DriveNode {
    index: usize,
    corners: [Vec3; 4],
    lower_center: Vec3,
    upper_center: Vec3,
    center: Vec3,
    right_unit: Vec3,
    normal: Vec3,
    width: f32,
    min_height: f32,
    max_height: f32,
    min_height_testing: f32,
    max_height_testing: f32,
    invisible: bool,
    ai_ignore: bool,
    ignored: bool,

    pub(crate) successors: Vec<usize>,
    pub(crate) predecessors: Vec<usize>,
    pub(crate) distance_to_next: Vec<f32>,
    pub(crate) angle_to_next: Vec<f32>,
    pub(crate) distance_from_start: f32,
    pub(crate) direction: Vec<DirectionData>,
    pub(crate) checkline_requirements: Vec<usize>,
}

impl DriveNode {
    /// Build a node from its spec.
    ///
    /// `reverse` swaps the lower and upper edges. A node whose direction
    /// flag does not match the race direction is marked ignored.
    pub fn new(index: usize, spec: &NodeSpec, reverse: bool, height_testing: (f32, f32)) -> Self {
        let [p0, p1, p2, p3] = spec.corners;

        let mut right_unit = ((p0 - p1) + (p3 - p2)) * 0.5;
        right_unit.y = 0.0;
        let mut right_unit = right_unit.normalize();

        let width = ((p1 - p0).length() + (p3 - p2).length()) * 0.5;

        let (lower_center, upper_center) = if reverse {
            right_unit = -right_unit;
            ((p2 + p3) * 0.5, (p0 + p1) * 0.5)
        } else {
            ((p0 + p1) * 0.5, (p2 + p3) * 0.5)
        };

        let mut normal = (p2 - p0).cross(p3 - p1).normalize();
        if normal == Vec3::ZERO {
            normal = Vec3::UP;
        } else if normal.y < 0.0 {
            normal = -normal;
        }

        let min_height = p0.y.min(p1.y).min(p2.y).min(p3.y);
        let max_height = p0.y.max(p1.y).max(p2.y).max(p3.y);

        let ignored = match spec.direction {
            TravelDirection::Both => false,
            TravelDirection::Forward => reverse,
            TravelDirection::Reverse => !reverse,
        };

        Self {
            index,
            corners: spec.corners,
            lower_center,
            upper_center,
            center: (lower_center + upper_center) * 0.5,
            right_unit,
            normal,
            width,
            min_height,
            max_height,
            min_height_testing: height_testing.0,
            max_height_testing: height_testing.1,
            invisible: spec.invisible,
            ai_ignore: spec.ai_ignore,
            ignored,
            successors: Vec::new(),
            predecessors: Vec::new(),
            distance_to_next: Vec::new(),
            angle_to_next: Vec::new(),
            distance_from_start: 0.0,
            direction: Vec::new(),
            checkline_requirements: Vec::new(),
        }
    }

    // =========================================================================
    // GEOMETRY
    // =========================================================================

    /// Node index in the graph.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Corner `i` (0..4).
    pub fn corner(&self, i: usize) -> Vec3 {
        self.corners[i]
    }

    /// Center of the edge a kart enters through.
    pub fn lower_center(&self) -> Vec3 {
        self.lower_center
    }

    /// Center of the edge a kart leaves through.
    pub fn upper_center(&self) -> Vec3 {
        self.upper_center
    }

    /// Center of the quad.
    pub fn center(&self) -> Vec3 {
        self.center
    }

    /// Unit vector pointing to the right of the driving direction (XZ).
    pub fn right_unit_vector(&self) -> Vec3 {
        self.right_unit
    }

    /// Surface normal (always pointing up).
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    /// Average width of the quad.
    pub fn width(&self) -> f32 {
        self.width
    }

    /// Length of the centre line.
    pub fn node_length(&self) -> f32 {
        (self.lower_center - self.upper_center).length()
    }

    /// Centre line on the ground plane, from upper to lower center.
    pub fn center_line(&self) -> Segment2 {
        Segment2::new(self.upper_center.xz(), self.lower_center.xz())
    }

    /// Whether `p` lies on this quad.
    ///
    /// The XZ projection must be inside the quad and, unless
    /// `ignore_vertical`, the height must be within the testing band.
    pub fn point_inside(&self, p: Vec3, ignore_vertical: bool) -> bool {
        if !ignore_vertical && !self.within_height_band(p) {
            return false;
        }

        let p2 = p.xz();
        let mut sign = 0.0f32;
        for i in 0..4 {
            let edge = Segment2::new(self.corners[i].xz(), self.corners[(i + 1) % 4].xz());
            let side = edge.orientation(p2);
            if side == 0.0 {
                continue;
            }
            if sign == 0.0 {
                sign = side.signum();
            } else if side.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Height test against the band around the quad.
    pub fn within_height_band(&self, p: Vec3) -> bool {
        p.y - self.min_height > self.min_height_testing
            && p.y - self.max_height < self.max_height_testing
    }

    /// Distances of a point relative to this node, computed in 2D.
    ///
    /// Returns `(lateral, down_track)`: lateral is the signed distance to
    /// the centre line (right positive), down_track is
    /// `distance_from_start` plus the offset from the lower edge.
    pub fn distances(&self, p: Vec3) -> (f32, f32) {
        let p2 = p.xz();
        let closest = self.center_line().closest_point(p2);
        let to_point = p2 - closest;
        let right = Vec2::new(self.right_unit.x, self.right_unit.z);

        let lateral = if to_point.dot(right) >= 0.0 {
            to_point.length()
        } else {
            -to_point.length()
        };
        let along = (closest - self.lower_center.xz()).length();

        (lateral, self.distance_from_start + along)
    }

    /// Squared 2D distance from a point to the centre line.
    pub fn distance2_from_center_line(&self, p: Vec3) -> f32 {
        let p2 = p.xz();
        (self.center_line().closest_point(p2) - p2).length_squared()
    }

    // =========================================================================
    // GRAPH DATA
    // =========================================================================

    /// Successor indices; index 0 is the main driveline.
    pub fn successors(&self) -> &[usize] {
        &self.successors
    }

    /// Successor `i`.
    pub fn successor(&self, i: usize) -> Option<usize> {
        self.successors.get(i).copied()
    }

    /// Predecessor indices; index 0 is the main driveline.
    pub fn predecessors(&self) -> &[usize] {
        &self.predecessors
    }

    /// Predecessor `i`.
    pub fn predecessor(&self, i: usize) -> Option<usize> {
        self.predecessors.get(i).copied()
    }

    /// Distance from this node's lower center to successor `i`'s.
    pub fn distance_to_successor(&self, i: usize) -> f32 {
        self.distance_to_next.get(i).copied().unwrap_or(0.0)
    }

    /// Bearing towards successor `i`.
    pub fn angle_to_successor(&self, i: usize) -> f32 {
        self.angle_to_next.get(i).copied().unwrap_or(0.0)
    }

    /// Distance of the lower edge from the start line.
    pub fn distance_from_start(&self) -> f32 {
        self.distance_from_start
    }

    /// Turn classification along successor `i`.
    pub fn direction_data(&self, i: usize) -> Option<DirectionData> {
        self.direction.get(i).copied()
    }

    /// Check lines a kart must have crossed last to use this node as a
    /// rescue position.
    pub fn checkline_requirements(&self) -> &[usize] {
        &self.checkline_requirements
    }

    /// Hidden from debug views.
    pub fn is_invisible(&self) -> bool {
        self.invisible
    }

    /// AI must not steer onto this node.
    pub fn is_ai_ignore(&self) -> bool {
        self.ai_ignore
    }

    /// Not part of the track in the current race direction.
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }
}

// =============================================================================
// TESTS
// =============================================================================
