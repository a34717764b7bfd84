//! Above-ground obstructions: buildings, free-standing screens, and the
//! ground-absorption zones painted onto the terrain.

use glam::{DVec2, DVec3};

use crate::geometry;
use crate::Bounds;

/// A building given by its horizontal footprint and a height above ground.
///
/// The footprint ring is taken in either winding, without a repeated closing
/// vertex. On build every footprint edge becomes a [`Wall`] whose top edge
/// sits at the roof altitude.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Building {
    /// Footprint ring, metric ground coordinates.
    pub footprint: Vec<DVec2>,
    /// Height of the roof above the local ground, in metres.
    pub height: f64,
    /// Per-band facade absorption in `[0, 1]`; empty means fully reflective.
    pub alphas: Vec<f64>,
}

impl Building {
    /// Create a building with the given footprint and height.
    #[must_use]
    pub fn new(footprint: Vec<DVec2>, height: f64, alphas: Vec<f64>) -> Self {
        Self {
            footprint,
            height,
            alphas,
        }
    }

    /// Horizontal envelope of the footprint.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        let mut bounds = Bounds::from_point(self.footprint[0]);
        for &p in &self.footprint[1..] {
            bounds = bounds.including(p);
        }
        bounds
    }

    /// Whether the point lies inside the footprint.
    #[must_use]
    pub fn contains(&self, point: DVec2) -> bool {
        geometry::point_in_ring(point, &self.footprint)
    }
}

/// A thin free-standing noise screen along a polyline.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Screen {
    /// Path of the screen on the ground.
    pub path: Vec<DVec2>,
    /// Height of the top edge above the local ground, in metres.
    pub height: f64,
    /// Per-band absorption in `[0, 1]`; empty means fully reflective.
    pub alphas: Vec<f64>,
}

impl Screen {
    /// Create a screen with the given path and height.
    #[must_use]
    pub fn new(path: Vec<DVec2>, height: f64, alphas: Vec<f64>) -> Self {
        Self {
            path,
            height,
            alphas,
        }
    }
}

/// What a wall segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WallOrigin {
    /// Side of the building with the given index.
    Building(usize),
    /// Piece of the free-standing screen with the given index.
    Screen(usize),
}

/// A single vertical wall panel, the unit the profile cutter and the
/// reflection search operate on.
///
/// `p0`/`p1` carry the *top* edge: their `z` is the absolute altitude of the
/// wall crest, `ground_z0`/`ground_z1` the terrain altitude at the base.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Wall {
    /// Top edge start.
    pub p0: DVec3,
    /// Top edge end.
    pub p1: DVec3,
    /// Ground altitude under `p0`.
    pub ground_z0: f64,
    /// Ground altitude under `p1`.
    pub ground_z1: f64,
    /// Owner of this panel.
    pub origin: WallOrigin,
    /// Per-band absorption in `[0, 1]`; empty means fully reflective.
    pub alphas: Vec<f64>,
}

impl Wall {
    /// Horizontal start of the wall.
    #[must_use]
    pub fn a(&self) -> DVec2 {
        self.p0.truncate()
    }

    /// Horizontal end of the wall.
    #[must_use]
    pub fn b(&self) -> DVec2 {
        self.p1.truncate()
    }

    /// Horizontal envelope.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds::from_segment(self.a(), self.b())
    }

    /// Altitude of the wall crest above the point `p`, interpolated along
    /// the top edge.
    #[must_use]
    pub fn top_at(&self, p: DVec2) -> f64 {
        geometry::interpolate_z(self.p0, self.p1, p)
    }

    /// Ground altitude at the base of the wall under `p`.
    #[must_use]
    pub fn ground_at(&self, p: DVec2) -> f64 {
        let t = geometry::projection_param(self.a(), self.b(), p).clamp(0.0, 1.0);
        self.ground_z0 + (self.ground_z1 - self.ground_z0) * t
    }

    /// Horizontal length of the panel.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.a().distance(self.b())
    }
}

/// A polygonal region of the ground with a uniform absorption coefficient.
///
/// `g` runs from 0.0 (hard, reflective: asphalt, water) to 1.0 (fully
/// absorbing: grassland, fresh snow).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GroundZone {
    /// Zone ring, metric ground coordinates.
    pub ring: Vec<DVec2>,
    /// Ground absorption coefficient in `[0, 1]`.
    pub g: f64,
}

impl GroundZone {
    /// Create a zone with the given ring and coefficient.
    #[must_use]
    pub fn new(ring: Vec<DVec2>, g: f64) -> Self {
        Self { ring, g }
    }

    /// Whether the point lies inside the zone.
    #[must_use]
    pub fn contains(&self, point: DVec2) -> bool {
        geometry::point_in_ring(point, &self.ring)
    }
}
