//! # Relief
//!
//! Triangulated terrain and obstruction substrate for outdoor sound
//! propagation.
//!
//! Relief answers the geometric questions a propagation engine asks many
//! million times per study area:
//!
//! - **Elevation queries**: ground altitude under an arbitrary point
//! - **Profile extraction**: ordered terrain/building/screen crossings along
//!   an arbitrary segment, with ground-absorption coefficients attached
//! - **Line-of-sight tests**: is the straight source-receiver segment free of
//!   obstructions
//! - **Obstacle collects**: reflecting and laterally-diffracting walls near a
//!   point or along a path
//!
//! The substrate is built once from terrain triangles, building footprints,
//! free-standing screens and ground-absorption zones, then shared read-only
//! across worker threads.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relief::{Relief, Building, Bounds};
//! use glam::{DVec2, DVec3};
//!
//! let relief = Relief::builder()
//!     .building(Building::new(footprint, 10.0, None))
//!     .build()?;
//!
//! let profile = relief.cut_profile(source, receiver);
//! if profile.is_free_field() {
//!     // direct line of sight
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod geometry;
pub mod grid;
pub mod meanplane;
pub mod obstacles;
pub mod profile;
pub mod substrate;
pub mod terrain;

pub use grid::GridIndex;
pub use meanplane::{mean_plane, MeanPlane};
pub use obstacles::{Building, GroundZone, Screen, Wall, WallOrigin};
pub use profile::{CutPoint, CutPointKind, CutProfile};
pub use substrate::{Relief, ReliefBuilder, ReliefError};
pub use terrain::{TerrainMesh, Triangle};

/// Axis-aligned 2D envelope in metric scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bounds {
    /// Minimum corner
    pub min: glam::DVec2,
    /// Maximum corner
    pub max: glam::DVec2,
}

impl Bounds {
    /// Create an envelope from min/max corners.
    #[must_use]
    pub fn from_min_max(min: glam::DVec2, max: glam::DVec2) -> Self {
        Self { min, max }
    }

    /// Degenerate envelope around a single point.
    #[must_use]
    pub fn from_point(point: glam::DVec2) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Smallest envelope containing both endpoints of a segment.
    #[must_use]
    pub fn from_segment(a: glam::DVec2, b: glam::DVec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Get the center of the envelope.
    #[must_use]
    pub fn center(&self) -> glam::DVec2 {
        (self.min + self.max) * 0.5
    }

    /// Get the size of the envelope.
    #[must_use]
    pub fn size(&self) -> glam::DVec2 {
        self.max - self.min
    }

    /// Grow the envelope by `distance` on every side.
    #[must_use]
    pub fn expanded_by(&self, distance: f64) -> Self {
        let d = glam::DVec2::splat(distance);
        Self {
            min: self.min - d,
            max: self.max + d,
        }
    }

    /// Merge with another envelope.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Extend to cover a point.
    #[must_use]
    pub fn including(&self, point: glam::DVec2) -> Self {
        Self {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    /// Check if a point is inside the envelope.
    #[must_use]
    pub fn contains(&self, point: glam::DVec2) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }

    /// Check if this envelope intersects another.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: glam::DVec2::splat(-50.0),
            max: glam::DVec2::splat(50.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    #[test]
    fn test_bounds_contains() {
        let bounds = Bounds::from_min_max(DVec2::new(-5.0, -5.0), DVec2::new(5.0, 5.0));
        assert!(bounds.contains(DVec2::ZERO));
        assert!(bounds.contains(DVec2::new(4.0, 4.0)));
        assert!(!bounds.contains(DVec2::new(6.0, 0.0)));
    }

    #[test]
    fn test_bounds_expand_and_intersect() {
        let a = Bounds::from_point(DVec2::ZERO).expanded_by(10.0);
        let b = Bounds::from_point(DVec2::new(15.0, 0.0)).expanded_by(10.0);
        assert!(a.intersects(&b));
        let c = Bounds::from_point(DVec2::new(25.0, 0.0)).expanded_by(2.0);
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_bounds_from_segment_orders_corners() {
        let bounds = Bounds::from_segment(DVec2::new(10.0, -3.0), DVec2::new(-2.0, 7.0));
        assert_eq!(bounds.min, DVec2::new(-2.0, -3.0));
        assert_eq!(bounds.max, DVec2::new(10.0, 7.0));
    }
}
