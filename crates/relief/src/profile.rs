//! Vertical cut profiles: the ordered list of everything a segment crosses.
//!
//! A cut profile is the 2.5D answer to "what stands between these two
//! points": terrain crossings, building entries and exits, screen crossings
//! and ground-absorption changes, each carried with the obstacle top
//! altitude, the ground altitude beneath it, and the ground coefficient of
//! the interval that follows. The path builder unfolds profiles into a
//! vertical plane and runs the convex-hull construction on them.

use glam::{DVec2, DVec3};

/// What a cut point marks along the profile.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CutPointKind {
    /// Start of the profile.
    Source,
    /// End of the profile.
    Receiver,
    /// Terrain triangle edge crossing.
    Topography,
    /// Crossing of a thin screen panel.
    Screen {
        /// Index of the wall panel in the substrate.
        wall: u32,
    },
    /// Entering a building footprint through the given wall panel.
    BuildingEnter {
        /// Index of the wall panel in the substrate.
        wall: u32,
        /// Index of the building.
        building: u32,
    },
    /// Leaving a building footprint through the given wall panel.
    BuildingExit {
        /// Index of the wall panel in the substrate.
        wall: u32,
        /// Index of the building.
        building: u32,
    },
    /// Ground absorption coefficient change.
    ZoneChange,
    /// Specular reflection on a wall, inserted when legs are concatenated.
    Reflection {
        /// Index of the wall panel in the substrate.
        wall: u32,
        /// Wall crest altitude at the reflection point.
        wall_top: f64,
    },
    /// Vertical-edge pivot of a laterally diffracted path.
    LateralDiffraction,
}

impl CutPointKind {
    /// Whether this point carries an obstacle top the line of sight must
    /// clear.
    #[must_use]
    pub fn is_obstacle(&self) -> bool {
        matches!(
            self,
            Self::Topography
                | Self::Screen { .. }
                | Self::BuildingEnter { .. }
                | Self::BuildingExit { .. }
        )
    }
}

/// One crossing along a cut profile.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CutPoint {
    /// Horizontal position and obstacle-top altitude of the crossing. For
    /// endpoints this is the emission/reception point itself.
    pub position: DVec3,
    /// Terrain altitude directly beneath the point.
    pub z_ground: f64,
    /// Ground absorption coefficient of the interval starting here.
    pub g: f64,
    /// Cumulative horizontal distance from the profile start.
    pub distance: f64,
    /// Crossing classification.
    pub kind: CutPointKind,
    /// Per-band wall absorption for screen/building/reflection points.
    pub alphas: Vec<f64>,
}

impl CutPoint {
    /// Horizontal position.
    #[must_use]
    pub fn xy(&self) -> DVec2 {
        self.position.truncate()
    }
}

/// An ordered cut profile from source to receiver.
///
/// Points are sorted by `distance`; the first is always the source, the last
/// the receiver. Profiles for reflected or laterally diffracted paths are
/// polylines, so `distance` is the length along the polyline, not the
/// straight-line range.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CutProfile {
    /// Ordered crossings.
    pub points: Vec<CutPoint>,
}

impl CutProfile {
    /// Profile start (emission point).
    #[must_use]
    pub fn source(&self) -> &CutPoint {
        &self.points[0]
    }

    /// Profile end (reception point).
    #[must_use]
    pub fn receiver(&self) -> &CutPoint {
        &self.points[self.points.len() - 1]
    }

    /// Unfolded length of the profile.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.receiver().distance
    }

    /// Whether the straight line from source to receiver clears every
    /// obstacle top in the unfolded frame.
    ///
    /// A crossing exactly at the line counts as clear; the diffraction
    /// evaluator handles the grazing case through the path-length difference
    /// instead.
    #[must_use]
    pub fn is_free_field(&self) -> bool {
        let s = self.source();
        let r = self.receiver();
        let total = r.distance - s.distance;
        if total <= 0.0 {
            return true;
        }
        for point in &self.points[1..self.points.len() - 1] {
            if !point.kind.is_obstacle() {
                continue;
            }
            let t = (point.distance - s.distance) / total;
            let line_z = s.position.z + (r.position.z - s.position.z) * t;
            if point.position.z > line_z + 1e-9 {
                return false;
            }
        }
        true
    }

    /// Distance-weighted mean ground coefficient over the whole profile.
    #[must_use]
    pub fn g_path(&self) -> f64 {
        self.g_path_range(self.source().distance, self.receiver().distance)
    }

    /// Distance-weighted mean ground coefficient over `[x0, x1]` of the
    /// unfolded abscissa.
    ///
    /// Each interval contributes the coefficient of the cut point that opens
    /// it. Degenerate ranges return the coefficient in force at `x0`.
    #[must_use]
    pub fn g_path_range(&self, x0: f64, x1: f64) -> f64 {
        let (x0, x1) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let width = x1 - x0;
        if width < 1e-9 {
            return self.g_at(x0);
        }
        let mut acc = 0.0;
        for (i, point) in self.points.iter().enumerate() {
            let start = point.distance.max(x0);
            let end = self
                .points
                .get(i + 1)
                .map_or(x1, |next| next.distance.min(x1));
            if end > start {
                acc += point.g * (end - start);
            }
        }
        acc / width
    }

    /// Ground coefficient in force at abscissa `x`.
    #[must_use]
    pub fn g_at(&self, x: f64) -> f64 {
        let mut g = self.source().g;
        for point in &self.points {
            if point.distance > x + 1e-9 {
                break;
            }
            g = point.g;
        }
        g
    }

    /// Indices of the interior points that carry an obstacle top.
    #[must_use]
    pub fn obstacle_indices(&self) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .skip(1)
            .take(self.points.len().saturating_sub(2))
            .filter(|(_, p)| p.kind.is_obstacle())
            .map(|(i, _)| i)
            .collect()
    }
}
