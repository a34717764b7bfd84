//! The obstruction substrate: immutable scene geometry plus its indexes.

use glam::{DVec2, DVec3};
use tracing::debug;

use crate::geometry;
use crate::grid::GridIndex;
use crate::obstacles::{Building, GroundZone, Screen, Wall, WallOrigin};
use crate::profile::{CutPoint, CutPointKind, CutProfile};
use crate::terrain::TerrainMesh;
use crate::Bounds;

/// Geometry validation failures raised at build time.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReliefError {
    /// A building footprint has fewer than three vertices.
    #[error("building {0} footprint has {1} vertices, need at least 3")]
    DegenerateFootprint(usize, usize),
    /// A screen path has fewer than two vertices.
    #[error("screen {0} path has {1} vertices, need at least 2")]
    DegenerateScreen(usize, usize),
    /// An obstacle height is negative or not finite.
    #[error("obstacle height {0} is not a finite non-negative number")]
    InvalidHeight(f64),
    /// A ground or facade coefficient falls outside `[0, 1]`.
    #[error("absorption coefficient {0} outside [0, 1]")]
    InvalidCoefficient(f64),
    /// A coordinate is NaN or infinite.
    #[error("non-finite coordinate in input geometry")]
    NonFiniteCoordinate,
}

/// Immutable obstruction substrate shared read-only across workers.
///
/// Built once per study area from terrain, buildings, screens and ground
/// zones; all queries take `&self`.
#[derive(Debug)]
pub struct Relief {
    terrain: TerrainMesh,
    buildings: Vec<Building>,
    walls: Vec<Wall>,
    zones: Vec<GroundZone>,
    default_g: f64,
    extent: Bounds,
    triangle_grid: Option<GridIndex>,
    wall_grid: Option<GridIndex>,
}

impl Relief {
    /// Start building a substrate.
    #[must_use]
    pub fn builder() -> ReliefBuilder {
        ReliefBuilder::default()
    }

    /// Horizontal extent covering all geometry.
    #[must_use]
    pub fn extent(&self) -> Bounds {
        self.extent
    }

    /// All wall panels (building sides and screen pieces).
    #[must_use]
    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    /// Wall panel by index.
    #[must_use]
    pub fn wall(&self, idx: u32) -> &Wall {
        &self.walls[idx as usize]
    }

    /// All buildings.
    #[must_use]
    pub fn buildings(&self) -> &[Building] {
        &self.buildings
    }

    /// Roof altitude of a building (absolute).
    #[must_use]
    pub fn roof_altitude(&self, building: u32) -> f64 {
        let b = &self.buildings[building as usize];
        let base = b
            .footprint
            .iter()
            .map(|&v| self.height_at(v))
            .fold(f64::NEG_INFINITY, f64::max);
        base.max(0.0) + b.height
    }

    /// Ground altitude under a point.
    #[must_use]
    pub fn height_at(&self, p: DVec2) -> f64 {
        match &self.triangle_grid {
            Some(grid) => {
                for idx in grid.query_bounds(&Bounds::from_point(p)) {
                    if let Some(z) = self.terrain.height_in_triangle(idx as usize, p) {
                        return z;
                    }
                }
                0.0
            }
            None => self.terrain.height_at(p),
        }
    }

    /// Ground absorption coefficient at a point. The last zone added wins
    /// where zones overlap; outside every zone the default applies.
    #[must_use]
    pub fn ground_g_at(&self, p: DVec2) -> f64 {
        self.zones
            .iter()
            .rev()
            .find(|zone| zone.contains(p))
            .map_or(self.default_g, |zone| zone.g)
    }

    /// Indices of wall panels whose envelope overlaps `query`.
    #[must_use]
    pub fn walls_near(&self, query: &Bounds) -> Vec<u32> {
        match &self.wall_grid {
            Some(grid) => grid.query_bounds(query),
            None => Vec::new(),
        }
    }

    /// Wall panels crossed by the horizontal segment `[a, b]`, as
    /// `(wall index, parameter along the segment, crossing point)`, sorted by
    /// parameter.
    #[must_use]
    pub fn walls_crossing(&self, a: DVec2, b: DVec2) -> Vec<(u32, f64, DVec2)> {
        let Some(grid) = &self.wall_grid else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        for idx in grid.query_segment(a, b) {
            let wall = &self.walls[idx as usize];
            if let Some((t, p)) = geometry::segment_intersection(a, b, wall.a(), wall.b()) {
                hits.push((idx, t, p));
            }
        }
        hits.sort_by(|x, y| x.1.total_cmp(&y.1));
        hits
    }

    /// Whether the straight 3D segment between two points clears all
    /// obstacles.
    #[must_use]
    pub fn is_free_field(&self, from: DVec3, to: DVec3) -> bool {
        self.cut_profile(from, to).is_free_field()
    }

    /// Extract the ordered cut profile along the segment from `from` to `to`.
    ///
    /// Endpoint altitudes are taken as given (absolute). Interior points mark
    /// terrain crossings, building entries/exits, screen crossings and
    /// ground-zone changes; each interval carries the ground coefficient
    /// sampled at its midpoint.
    #[must_use]
    pub fn cut_profile(&self, from: DVec3, to: DVec3) -> CutProfile {
        let a2 = from.truncate();
        let b2 = to.truncate();
        let len = a2.distance(b2);

        struct Event {
            t: f64,
            z_top: f64,
            kind: CutPointKind,
            alphas: Vec<f64>,
        }
        let mut events: Vec<Event> = Vec::new();
        const T_EPS: f64 = 1e-9;

        // Terrain triangle edge crossings.
        if let Some(grid) = &self.triangle_grid {
            for idx in grid.query_segment(a2, b2) {
                let corners = self.terrain.corners(idx as usize);
                for (i, j) in [(0, 1), (1, 2), (2, 0)] {
                    let (p, q) = (corners[i], corners[j]);
                    if let Some((t, hit)) =
                        geometry::segment_intersection(a2, b2, p.truncate(), q.truncate())
                    {
                        if t > T_EPS && t < 1.0 - T_EPS {
                            events.push(Event {
                                t,
                                z_top: geometry::interpolate_z(p, q, hit),
                                kind: CutPointKind::Topography,
                                alphas: Vec::new(),
                            });
                        }
                    }
                }
            }
        }

        // Wall crossings: screens cut once, building sides mark an entry or
        // an exit depending on which side of the facade the segment goes on.
        for (idx, t, hit) in self.walls_crossing(a2, b2) {
            if t <= T_EPS || t >= 1.0 - T_EPS {
                continue;
            }
            let wall = &self.walls[idx as usize];
            let kind = match wall.origin {
                WallOrigin::Screen(_) => CutPointKind::Screen { wall: idx },
                WallOrigin::Building(b) => {
                    let probe = hit + (b2 - a2).normalize() * 1e-6;
                    if self.buildings[b].contains(probe) {
                        CutPointKind::BuildingEnter {
                            wall: idx,
                            building: b as u32,
                        }
                    } else {
                        CutPointKind::BuildingExit {
                            wall: idx,
                            building: b as u32,
                        }
                    }
                }
            };
            events.push(Event {
                t,
                z_top: wall.top_at(hit),
                kind,
                alphas: wall.alphas.clone(),
            });
        }

        // Ground-zone boundary crossings subdivide the absorption intervals.
        for zone in &self.zones {
            let n = zone.ring.len();
            for i in 0..n {
                let (p, q) = (zone.ring[i], zone.ring[(i + 1) % n]);
                if let Some((t, hit)) = geometry::segment_intersection(a2, b2, p, q) {
                    if t > T_EPS && t < 1.0 - T_EPS {
                        events.push(Event {
                            t,
                            z_top: self.height_at(hit),
                            kind: CutPointKind::ZoneChange,
                            alphas: Vec::new(),
                        });
                    }
                }
            }
        }

        events.sort_by(|x, y| x.t.total_cmp(&y.t));
        // Shared triangle edges produce twin topography events.
        events.dedup_by(|a, b| {
            (a.t - b.t).abs() < 1e-9
                && a.kind == CutPointKind::Topography
                && b.kind == CutPointKind::Topography
        });

        let dir = b2 - a2;
        let mut points = Vec::with_capacity(events.len() + 2);
        points.push(CutPoint {
            position: from,
            z_ground: self.height_at(a2),
            g: 0.0,
            distance: 0.0,
            kind: CutPointKind::Source,
            alphas: Vec::new(),
        });
        for event in events {
            let xy = a2 + dir * event.t;
            points.push(CutPoint {
                position: xy.extend(event.z_top),
                z_ground: self.height_at(xy),
                g: 0.0,
                distance: event.t * len,
                kind: event.kind,
                alphas: event.alphas,
            });
        }
        points.push(CutPoint {
            position: to,
            z_ground: self.height_at(b2),
            g: 0.0,
            distance: len,
            kind: CutPointKind::Receiver,
            alphas: Vec::new(),
        });

        // Interval coefficients, sampled at interval midpoints. Intervals
        // running over a building roof count as fully reflective.
        let mut over_roof = false;
        for i in 0..points.len() {
            match points[i].kind {
                CutPointKind::BuildingEnter { .. } => over_roof = true,
                CutPointKind::BuildingExit { .. } => over_roof = false,
                _ => {}
            }
            if over_roof {
                points[i].g = 0.0;
                continue;
            }
            let mid = if i + 1 < points.len() {
                (points[i].xy() + points[i + 1].xy()) * 0.5
            } else {
                points[i].xy()
            };
            points[i].g = self.ground_g_at(mid);
        }

        CutProfile { points }
    }
}

/// Accumulates geometry and validates it into a [`Relief`].
#[derive(Debug, Default)]
pub struct ReliefBuilder {
    terrain: Option<TerrainMesh>,
    buildings: Vec<Building>,
    screens: Vec<Screen>,
    zones: Vec<GroundZone>,
    default_g: f64,
    extent: Option<Bounds>,
}

impl ReliefBuilder {
    /// Set the terrain mesh; without one the ground is flat at altitude zero.
    #[must_use]
    pub fn terrain(mut self, mesh: TerrainMesh) -> Self {
        self.terrain = Some(mesh);
        self
    }

    /// Add a building.
    #[must_use]
    pub fn building(mut self, building: Building) -> Self {
        self.buildings.push(building);
        self
    }

    /// Add a free-standing screen.
    #[must_use]
    pub fn screen(mut self, screen: Screen) -> Self {
        self.screens.push(screen);
        self
    }

    /// Add a ground-absorption zone. Later zones win on overlap.
    #[must_use]
    pub fn ground_zone(mut self, zone: GroundZone) -> Self {
        self.zones.push(zone);
        self
    }

    /// Ground coefficient outside every zone (default 0.0, hard ground).
    #[must_use]
    pub fn default_ground(mut self, g: f64) -> Self {
        self.default_g = g;
        self
    }

    /// Force the horizontal extent instead of deriving it from geometry.
    #[must_use]
    pub fn extent(mut self, extent: Bounds) -> Self {
        self.extent = Some(extent);
        self
    }

    /// Validate and freeze the substrate.
    ///
    /// # Errors
    ///
    /// Returns a [`ReliefError`] for degenerate footprints, non-finite
    /// coordinates, negative heights, or coefficients outside `[0, 1]`.
    pub fn build(self) -> Result<Relief, ReliefError> {
        self.validate()?;
        let terrain = self.terrain.unwrap_or_default();

        // Resolve extent before walls so roof altitudes can query terrain.
        let mut extent = self.extent;
        let mut include = |bounds: Bounds| {
            extent = Some(match extent {
                Some(e) => e.union(&bounds),
                None => bounds,
            });
        };
        for idx in 0..terrain.triangle_count() {
            include(terrain.triangle_bounds(idx));
        }
        for building in &self.buildings {
            include(building.bounds());
        }
        for screen in &self.screens {
            for pair in screen.path.windows(2) {
                include(Bounds::from_segment(pair[0], pair[1]));
            }
        }
        for zone in &self.zones {
            for &p in &zone.ring {
                include(Bounds::from_point(p));
            }
        }
        let extent = extent.unwrap_or_default();

        let triangle_grid = if terrain.is_empty() {
            None
        } else {
            Some(GridIndex::build(
                extent,
                (0..terrain.triangle_count())
                    .map(|idx| terrain.triangle_bounds(idx))
                    .collect::<Vec<_>>(),
            ))
        };

        let mut relief = Relief {
            terrain,
            buildings: self.buildings,
            walls: Vec::new(),
            zones: self.zones,
            default_g: self.default_g,
            extent,
            triangle_grid,
            wall_grid: None,
        };

        // Building facades: every footprint edge becomes a panel topped at
        // the roof altitude (highest ground under the footprint plus height).
        let mut walls = Vec::new();
        for (b_idx, building) in relief.buildings.iter().enumerate() {
            let base = building
                .footprint
                .iter()
                .map(|&v| relief.height_at(v))
                .fold(f64::NEG_INFINITY, f64::max)
                .max(0.0);
            let roof = base + building.height;
            let n = building.footprint.len();
            for i in 0..n {
                let (p, q) = (building.footprint[i], building.footprint[(i + 1) % n]);
                walls.push(Wall {
                    p0: p.extend(roof),
                    p1: q.extend(roof),
                    ground_z0: relief.height_at(p),
                    ground_z1: relief.height_at(q),
                    origin: WallOrigin::Building(b_idx),
                    alphas: building.alphas.clone(),
                });
            }
        }
        for (s_idx, screen) in self.screens.iter().enumerate() {
            for pair in screen.path.windows(2) {
                let (p, q) = (pair[0], pair[1]);
                let (gz0, gz1) = (relief.height_at(p), relief.height_at(q));
                walls.push(Wall {
                    p0: p.extend(gz0 + screen.height),
                    p1: q.extend(gz1 + screen.height),
                    ground_z0: gz0,
                    ground_z1: gz1,
                    origin: WallOrigin::Screen(s_idx),
                    alphas: screen.alphas.clone(),
                });
            }
        }
        if !walls.is_empty() {
            relief.wall_grid = Some(GridIndex::build(
                extent,
                walls.iter().map(Wall::bounds).collect::<Vec<_>>(),
            ));
        }
        relief.walls = walls;

        debug!(
            triangles = relief.terrain.triangle_count(),
            buildings = relief.buildings.len(),
            walls = relief.walls.len(),
            zones = relief.zones.len(),
            "relief substrate built"
        );
        Ok(relief)
    }

    fn validate(&self) -> Result<(), ReliefError> {
        let finite2 = |p: &DVec2| p.x.is_finite() && p.y.is_finite();
        for (idx, building) in self.buildings.iter().enumerate() {
            if building.footprint.len() < 3 {
                return Err(ReliefError::DegenerateFootprint(
                    idx,
                    building.footprint.len(),
                ));
            }
            if !building.footprint.iter().all(finite2) {
                return Err(ReliefError::NonFiniteCoordinate);
            }
            if !building.height.is_finite() || building.height < 0.0 {
                return Err(ReliefError::InvalidHeight(building.height));
            }
            for &alpha in &building.alphas {
                if !(0.0..=1.0).contains(&alpha) {
                    return Err(ReliefError::InvalidCoefficient(alpha));
                }
            }
        }
        for (idx, screen) in self.screens.iter().enumerate() {
            if screen.path.len() < 2 {
                return Err(ReliefError::DegenerateScreen(idx, screen.path.len()));
            }
            if !screen.path.iter().all(finite2) {
                return Err(ReliefError::NonFiniteCoordinate);
            }
            if !screen.height.is_finite() || screen.height < 0.0 {
                return Err(ReliefError::InvalidHeight(screen.height));
            }
            for &alpha in &screen.alphas {
                if !(0.0..=1.0).contains(&alpha) {
                    return Err(ReliefError::InvalidCoefficient(alpha));
                }
            }
        }
        for zone in &self.zones {
            if !(0.0..=1.0).contains(&zone.g) {
                return Err(ReliefError::InvalidCoefficient(zone.g));
            }
            if !zone.ring.iter().all(finite2) {
                return Err(ReliefError::NonFiniteCoordinate);
            }
        }
        if !(0.0..=1.0).contains(&self.default_g) {
            return Err(ReliefError::InvalidCoefficient(self.default_g));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::CutPointKind;

    fn box_building(x0: f64, x1: f64, height: f64) -> Building {
        Building::new(
            vec![
                DVec2::new(x0, -10.0),
                DVec2::new(x1, -10.0),
                DVec2::new(x1, 10.0),
                DVec2::new(x0, 10.0),
            ],
            height,
            Vec::new(),
        )
    }

    #[test]
    fn test_empty_substrate_is_free_field() {
        let relief = Relief::builder().build().unwrap();
        assert!(relief.is_free_field(
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(100.0, 0.0, 1.5)
        ));
    }

    #[test]
    fn test_building_blocks_line_of_sight() {
        let relief = Relief::builder()
            .building(box_building(40.0, 60.0, 10.0))
            .build()
            .unwrap();
        assert!(!relief.is_free_field(
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(100.0, 0.0, 1.5)
        ));
        // Flying over the roof stays clear.
        assert!(relief.is_free_field(
            DVec3::new(0.0, 0.0, 15.0),
            DVec3::new(100.0, 0.0, 15.0)
        ));
    }

    #[test]
    fn test_profile_marks_entry_and_exit() {
        let relief = Relief::builder()
            .building(box_building(40.0, 60.0, 10.0))
            .build()
            .unwrap();
        let profile = relief.cut_profile(
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(100.0, 0.0, 1.5),
        );
        let kinds: Vec<_> = profile.points.iter().map(|p| p.kind).collect();
        assert!(matches!(kinds[0], CutPointKind::Source));
        assert!(matches!(kinds[1], CutPointKind::BuildingEnter { .. }));
        assert!(matches!(kinds[2], CutPointKind::BuildingExit { .. }));
        assert!(matches!(kinds[3], CutPointKind::Receiver));
        // Both facade crossings sit at the roof altitude.
        assert!((profile.points[1].position.z - 10.0).abs() < 1e-9);
        assert!((profile.points[2].position.z - 10.0).abs() < 1e-9);
        assert!((profile.points[1].distance - 40.0).abs() < 1e-9);
        assert!((profile.points[2].distance - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_screen_profile_single_crossing() {
        let relief = Relief::builder()
            .screen(Screen::new(
                vec![DVec2::new(50.0, -20.0), DVec2::new(50.0, 20.0)],
                4.0,
                Vec::new(),
            ))
            .build()
            .unwrap();
        let profile = relief.cut_profile(
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(100.0, 0.0, 1.0),
        );
        assert_eq!(profile.points.len(), 3);
        assert!(matches!(
            profile.points[1].kind,
            CutPointKind::Screen { .. }
        ));
        assert!((profile.points[1].position.z - 4.0).abs() < 1e-9);
        assert!(!profile.is_free_field());
    }

    #[test]
    fn test_ground_zones_weight_g_path() {
        let relief = Relief::builder()
            .default_ground(0.0)
            .ground_zone(GroundZone::new(
                vec![
                    DVec2::new(30.0, -50.0),
                    DVec2::new(100.0, -50.0),
                    DVec2::new(100.0, 50.0),
                    DVec2::new(30.0, 50.0),
                ],
                1.0,
            ))
            .build()
            .unwrap();
        let profile = relief.cut_profile(
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(100.0, 0.0, 1.0),
        );
        assert!((profile.g_path() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_validation_rejects_bad_geometry() {
        let err = Relief::builder()
            .building(Building::new(vec![DVec2::ZERO, DVec2::ONE], 5.0, Vec::new()))
            .build()
            .unwrap_err();
        assert_eq!(err, ReliefError::DegenerateFootprint(0, 2));

        let err = Relief::builder()
            .building(box_building(0.0, 10.0, -2.0))
            .build()
            .unwrap_err();
        assert!(matches!(err, ReliefError::InvalidHeight(_)));

        let err = Relief::builder().default_ground(1.5).build().unwrap_err();
        assert!(matches!(err, ReliefError::InvalidCoefficient(_)));
    }

    #[test]
    fn test_terrain_profile_follows_relief() {
        // Ground rises from 0 to 2 m across the extent.
        let heights = [0.0, 1.0, 2.0, 0.0, 1.0, 2.0];
        let mesh =
            TerrainMesh::from_elevation_grid(DVec2::new(0.0, -50.0), 50.0, 3, 2, &heights)
                .unwrap();
        let relief = Relief::builder().terrain(mesh).build().unwrap();
        assert!((relief.height_at(DVec2::new(50.0, -25.0)) - 1.0).abs() < 1e-9);
        let profile = relief.cut_profile(
            DVec3::new(0.0, -25.0, 1.0),
            DVec3::new(100.0, -25.0, 3.0),
        );
        assert!(profile.points.len() > 2);
        assert!(profile
            .points
            .iter()
            .any(|p| p.kind == CutPointKind::Topography));
        assert!(profile.is_free_field());
    }

    #[test]
    fn test_walls_crossing_sorted() {
        let relief = Relief::builder()
            .building(box_building(20.0, 30.0, 5.0))
            .building(box_building(60.0, 70.0, 5.0))
            .build()
            .unwrap();
        let hits = relief.walls_crossing(DVec2::new(0.0, 0.0), DVec2::new(100.0, 0.0));
        assert_eq!(hits.len(), 4);
        for pair in hits.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }
}
