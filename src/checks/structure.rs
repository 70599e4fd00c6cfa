//! Check Structures
//!
//! Lines, spheres and lap counters placed on the track. Each one keeps an
//! active bit per kart and fires when an active kart crosses it.

use serde::{Serialize, Deserialize};

use crate::core::vec2::Segment2;
use crate::core::vec3::Vec3;

/// Height above a check line's lowest end point still counted as crossing.
pub const OVER_MIN_HEIGHT: f32 = 4.0;

/// Height below a check line's lowest end point still counted as crossing.
pub const UNDER_MIN_HEIGHT: f32 = 1.0;

/// Fraction of the lap at either end used by lap counters.
pub const LAP_WRAP_FRACTION: f32 = 0.1;

// =============================================================================
// KIND / SHAPE
// =============================================================================

/// What happens when the structure fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckKind {
    /// Counts a lap, then deactivates itself
    NewLap,
    /// Activates the dependent structures
    Activate,
    /// Flips the dependent structures
    Toggle,
    /// Soccer goal
    Goal {
        /// Goal of the first team
        first_goal: bool,
    },
    /// Launches the kart towards a target line
    Cannon {
        /// Left end of the target line
        target_left: Vec3,
        /// Right end of the target line
        target_right: Vec3,
        /// Flight speed
        speed: f32,
    },
    /// Scripted action
    Trigger {
        /// Action name
        action: String,
    },
}

/// How a crossing is detected.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckShape {
    /// Finite line on the ground plane
    Line {
        /// The line on the XZ plane
        segment: Segment2,
        /// Lowest of the two end points
        min_height: f32,
        /// Skip the height band test
        ignore_height: bool,
    },
    /// Sphere that fires on entry
    Sphere {
        /// Centre
        center: Vec3,
        /// Radius
        radius: f32,
    },
    /// Fires when the distance down the track wraps around
    Lap,
}

impl CheckShape {
    /// Line between two world points.
    pub fn line(left: Vec3, right: Vec3, ignore_height: bool) -> Self {
        CheckShape::Line {
            segment: Segment2::new(left.xz(), right.xz()),
            min_height: left.y.min(right.y),
            ignore_height,
        }
    }

    /// Sphere around `center`.
    pub fn sphere(center: Vec3, radius: f32) -> Self {
        CheckShape::Sphere { center, radius }
    }
}

/// Movement of one kart during one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crossing {
    /// Position at the previous tick
    pub prev: Vec3,
    /// Position now
    pub curr: Vec3,
    /// Distance down the track at the previous tick
    pub prev_distance: f32,
    /// Distance down the track now
    pub curr_distance: f32,
    /// Lap length of the track
    pub lap_length: f32,
}

// =============================================================================
// CHECK STRUCTURE
// =============================================================================

/// A check structure with its per-kart active bits.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckStructure {
    kind: CheckKind,
    shape: CheckShape,
    dependents: Vec<usize>,
    same_group: Vec<usize>,
    active_at_reset: bool,
    active: Vec<bool>,
}

impl CheckStructure {
    /// Structure active at reset, with no dependents.
    pub fn new(kind: CheckKind, shape: CheckShape) -> Self {
        Self {
            kind,
            shape,
            dependents: Vec::new(),
            same_group: Vec::new(),
            active_at_reset: true,
            active: Vec::new(),
        }
    }

    /// Structures changed by ACTIVATE / TOGGLE.
    pub fn with_dependents(mut self, dependents: Vec<usize>) -> Self {
        self.dependents = dependents;
        self
    }

    /// Structures deactivated whenever this one fires.
    pub fn with_same_group(mut self, same_group: Vec<usize>) -> Self {
        self.same_group = same_group;
        self
    }

    /// Initial active state.
    pub fn with_active_at_reset(mut self, active: bool) -> Self {
        self.active_at_reset = active;
        self
    }

    /// Reset all karts to the initial active state.
    pub fn reset(&mut self, num_karts: usize) {
        self.active = vec![self.active_at_reset; num_karts];
    }

    /// Whether the structure is armed for `kart`.
    pub fn is_active(&self, kart: usize) -> bool {
        self.active.get(kart).copied().unwrap_or(false)
    }

    /// Arm or disarm for `kart`.
    pub fn set_active(&mut self, kart: usize, active: bool) {
        if let Some(bit) = self.active.get_mut(kart) {
            *bit = active;
        }
    }

    /// Crossing test. Does not look at the active bit.
    pub fn is_triggered(&self, crossing: &Crossing) -> bool {
        match &self.shape {
            CheckShape::Line { segment, min_height, ignore_height } => {
                if !crosses_segment(segment, crossing.prev, crossing.curr) {
                    return false;
                }
                if *ignore_height {
                    return true;
                }
                let d = crossing.curr.y - min_height;
                d > -UNDER_MIN_HEIGHT && d < OVER_MIN_HEIGHT
            }
            CheckShape::Sphere { center, radius } => {
                let r2 = radius * radius;
                (crossing.curr - *center).length_squared() < r2
                    && (crossing.prev - *center).length_squared() >= r2
            }
            CheckShape::Lap => {
                crossing.prev_distance > (1.0 - LAP_WRAP_FRACTION) * crossing.lap_length
                    && crossing.curr_distance < LAP_WRAP_FRACTION * crossing.lap_length
            }
        }
    }

    /// Whether `from -> to` crosses this structure's line, height ignored.
    /// Always false for non-line shapes.
    pub fn crosses_line(&self, from: Vec3, to: Vec3) -> bool {
        match &self.shape {
            CheckShape::Line { segment, .. } => crosses_segment(segment, from, to),
            _ => false,
        }
    }

    /// Whether firing records the structure as the kart's last check line.
    pub fn is_checkline(&self) -> bool {
        matches!(self.shape, CheckShape::Line { .. } | CheckShape::Lap)
    }

    /// What the structure does.
    pub fn kind(&self) -> &CheckKind {
        &self.kind
    }

    /// How the structure detects crossings.
    pub fn shape(&self) -> &CheckShape {
        &self.shape
    }

    /// Structures changed by ACTIVATE / TOGGLE.
    pub fn dependents(&self) -> &[usize] {
        &self.dependents
    }

    /// Structures deactivated whenever this one fires.
    pub fn same_group(&self) -> &[usize] {
        &self.same_group
    }

    /// Initial active state.
    pub fn active_at_reset(&self) -> bool {
        self.active_at_reset
    }
}

/// The side of the line changed and the movement intersects the segment.
fn crosses_segment(segment: &Segment2, from: Vec3, to: Vec3) -> bool {
    let (from, to) = (from.xz(), to.xz());
    let side_before = segment.orientation(from) >= 0.0;
    let side_after = segment.orientation(to) >= 0.0;
    side_before != side_after && segment.intersects(&Segment2::new(from, to))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn crossing(prev: Vec3, curr: Vec3) -> Crossing {
        Crossing { prev, curr, prev_distance: 0.0, curr_distance: 0.0, lap_length: 40.0 }
    }

    fn gate() -> CheckStructure {
        // Line across the Z axis at z = 0, from x = -2 to x = 2
        CheckStructure::new(
            CheckKind::NewLap,
            CheckShape::line(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), false),
        )
    }

    #[test]
    fn test_line_crossing() {
        let s = gate();
        assert!(s.is_triggered(&crossing(Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 1.0))));
        // Backwards also crosses
        assert!(s.is_triggered(&crossing(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, -1.0))));
        // Same side
        assert!(!s.is_triggered(&crossing(Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, 2.0))));
        // Passes beside the finite segment
        assert!(!s.is_triggered(&crossing(Vec3::new(5.0, 0.0, -1.0), Vec3::new(5.0, 0.0, 1.0))));
    }

    #[test]
    fn test_line_height_band() {
        let s = gate();
        let at = |y: f32| crossing(Vec3::new(0.0, y, -1.0), Vec3::new(0.0, y, 1.0));
        assert!(s.is_triggered(&at(3.5)));
        assert!(s.is_triggered(&at(-0.5)));
        assert!(!s.is_triggered(&at(4.5)));
        assert!(!s.is_triggered(&at(-1.5)));

        let ignoring = CheckStructure::new(
            CheckKind::Activate,
            CheckShape::line(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), true),
        );
        assert!(ignoring.is_triggered(&at(20.0)));
        assert!(s.crosses_line(Vec3::new(0.0, 20.0, -1.0), Vec3::new(0.0, 20.0, 1.0)));
    }

    #[test]
    fn test_sphere_entry() {
        let s = CheckStructure::new(
            CheckKind::Goal { first_goal: true },
            CheckShape::sphere(Vec3::new(0.0, 0.0, 10.0), 2.0),
        );
        assert!(s.is_triggered(&crossing(Vec3::new(0.0, 0.0, 7.0), Vec3::new(0.0, 0.0, 9.0))));
        // Already inside
        assert!(!s.is_triggered(&crossing(Vec3::new(0.0, 0.0, 9.0), Vec3::new(0.0, 0.0, 10.0))));
        // Leaving
        assert!(!s.is_triggered(&crossing(Vec3::new(0.0, 0.0, 10.0), Vec3::new(0.0, 0.0, 13.0))));
        assert!(!s.crosses_line(Vec3::new(0.0, 0.0, 7.0), Vec3::new(0.0, 0.0, 9.0)));
    }

    #[test]
    fn test_lap_wraparound() {
        let s = CheckStructure::new(CheckKind::NewLap, CheckShape::Lap);
        let lap = |prev_distance: f32, curr_distance: f32| Crossing {
            prev: Vec3::ZERO,
            curr: Vec3::ZERO,
            prev_distance,
            curr_distance,
            lap_length: 40.0,
        };
        assert!(s.is_triggered(&lap(39.0, 1.0)));
        assert!(!s.is_triggered(&lap(30.0, 1.0)));
        assert!(!s.is_triggered(&lap(39.0, 5.0)));
        // Driving backwards over the start
        assert!(!s.is_triggered(&lap(1.0, 39.0)));
    }

    #[test]
    fn test_active_bits() {
        let mut s = gate().with_active_at_reset(false);
        s.reset(3);
        assert!(!s.is_active(0));
        s.set_active(1, true);
        assert!(s.is_active(1));
        assert!(!s.is_active(2));
        // Unknown karts are never active
        s.set_active(7, true);
        assert!(!s.is_active(7));

        s.reset(3);
        assert!(!s.is_active(1));
    }

    #[test]
    fn test_checkline_shapes() {
        assert!(gate().is_checkline());
        assert!(CheckStructure::new(CheckKind::NewLap, CheckShape::Lap).is_checkline());
        assert!(!CheckStructure::new(CheckKind::Activate, CheckShape::sphere(Vec3::ZERO, 1.0)).is_checkline());
    }
}
