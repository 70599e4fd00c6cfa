//! Ground-Plane 2D Geometry
//!
//! Track projection and check-line crossing work on the XZ ground plane.
//! `Vec2::x` holds world X and `Vec2::y` holds world Z.

use std::fmt;
use std::ops::{Add, Sub, Neg, Mul};
use serde::{Serialize, Deserialize};

/// 2D vector on the ground plane.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// World X
    pub x: f32,
    /// World Z
    pub y: f32,
}

impl Vec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Dot product with another vector.
    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// 2D cross product (returns scalar z-component).
    #[inline]
    pub fn cross(self, other: Self) -> f32 {
        self.x * other.y - self.y * other.x
    }

    /// Squared length.
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length (magnitude).
    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }
}

impl Add for Vec2 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Vec2 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl fmt::Debug for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vec2({:.3}, {:.3})", self.x, self.y)
    }
}

// =============================================================================
// SEGMENT
// =============================================================================

/// Finite line segment on the ground plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment2 {
    /// Start point
    pub start: Vec2,
    /// End point
    pub end: Vec2,
}

impl Segment2 {
    /// Create a segment.
    pub const fn new(start: Vec2, end: Vec2) -> Self {
        Self { start, end }
    }

    /// Signed side of `p`: positive on one side, negative on the other,
    /// zero on the infinite line.
    #[inline]
    pub fn orientation(&self, p: Vec2) -> f32 {
        (self.end - self.start).cross(p - self.start)
    }

    /// Closest point on the segment (clamped to the end points).
    pub fn closest_point(&self, p: Vec2) -> Vec2 {
        let dir = self.end - self.start;
        let len_sq = dir.length_squared();
        if len_sq <= f32::EPSILON {
            return self.start;
        }
        let t = ((p - self.start).dot(dir) / len_sq).clamp(0.0, 1.0);
        self.start + dir * t
    }

    /// Whether two finite segments intersect (touching counts).
    pub fn intersects(&self, other: &Segment2) -> bool {
        let d1 = self.orientation(other.start);
        let d2 = self.orientation(other.end);
        let d3 = other.orientation(self.start);
        let d4 = other.orientation(self.end);

        if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
            && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
        {
            return true;
        }

        // Collinear / touching cases
        (d1 == 0.0 && self.contains_collinear(other.start))
            || (d2 == 0.0 && self.contains_collinear(other.end))
            || (d3 == 0.0 && other.contains_collinear(self.start))
            || (d4 == 0.0 && other.contains_collinear(self.end))
    }

    fn contains_collinear(&self, p: Vec2) -> bool {
        p.x >= self.start.x.min(self.end.x)
            && p.x <= self.start.x.max(self.end.x)
            && p.y >= self.start.y.min(self.end.y)
            && p.y <= self.start.y.max(self.end.y)
    }
}

// =============================================================================
// TESTS
// =============================================================================
