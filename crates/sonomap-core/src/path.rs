//! Propagation path construction from vertical cut profiles.
//!
//! A cut profile is unfolded into a vertical plane (abscissa = distance along
//! the polyline, ordinate = altitude). The upper convex hull of the obstacle
//! tops between source and receiver gives the diffraction points; each hull
//! edge receives a mean ground plane and the segment attributes the band
//! evaluator consumes (equivalent heights, primed distances, path-length
//! differences for homogeneous and favourable conditions).

use glam::{DVec2, DVec3};
use relief::{mean_plane, CutPointKind, CutProfile, MeanPlane};

use crate::orientation::Orientation;
use crate::spectrum::EXACT_FREQUENCIES;

/// Inverse radius factor of the favourable-condition ray curvature.
pub const ALPHA0: f64 = 2e-4;

/// Ground coefficient applied over building roofs.
pub const G_BUILDING: f64 = 0.0;

const EPSILON: f64 = 1e-7;

/// Classification of a point along a propagation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PathPointKind {
    /// Emission point.
    Source,
    /// Reception point.
    Receiver,
    /// Diffraction over a horizontal edge (roof ridge, screen crest).
    Diffraction,
    /// Frequency-dependent diffraction over uneven terrain on a direct path.
    RayleighDiffraction,
    /// Diffraction around a vertical edge.
    LateralDiffraction,
    /// Specular reflection on a wall.
    Reflection,
}

/// One point of a propagation path in the unfolded vertical plane.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PathPoint {
    /// Unfolded position: x = distance along the path polyline, y = altitude.
    pub position: DVec2,
    /// Ground altitude beneath the point.
    pub z_ground: f64,
    /// Wall crest altitude at a reflection point.
    pub obstacle_z: Option<f64>,
    /// Per-band wall absorption for reflection and diffraction points.
    pub alphas: Vec<f64>,
    /// Point classification.
    pub kind: PathPointKind,
    /// Whether a body barrier stands at this diffraction edge.
    pub body_barrier: bool,
    /// Emission direction in the source frame (source point only).
    pub orientation: Orientation,
}

impl PathPoint {
    fn new(position: DVec2, z_ground: f64, kind: PathPointKind) -> Self {
        Self {
            position,
            z_ground,
            obstacle_z: None,
            alphas: Vec::new(),
            kind,
            body_barrier: false,
            orientation: Orientation::default(),
        }
    }
}

/// Attributes of one leg of a propagation path over its mean ground plane.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PathSegment {
    /// Start point in the unfolded plane.
    pub s: DVec2,
    /// End point in the unfolded plane.
    pub r: DVec2,
    /// Foot of the start point on the mean plane.
    pub s_mean: DVec2,
    /// Foot of the end point on the mean plane.
    pub r_mean: DVec2,
    /// Image of the start point across the mean plane.
    pub s_prime: DVec2,
    /// Image of the end point across the mean plane.
    pub r_prime: DVec2,
    /// Straight distance start to end.
    pub d: f64,
    /// Distance between the mean-plane feet.
    pub dp: f64,
    /// Three-dimensional distance between the original scene points.
    pub dc: f64,
    /// Distance between the image points, set for diffracted paths.
    pub d_prime: f64,
    /// Equivalent source height, homogeneous conditions.
    pub zs_h: f64,
    /// Equivalent receiver height, homogeneous conditions.
    pub zr_h: f64,
    /// Equivalent source height, favourable conditions.
    pub zs_f: f64,
    /// Equivalent receiver height, favourable conditions.
    pub zr_f: f64,
    /// Ground-effect regime test, homogeneous conditions.
    pub test_form_h: f64,
    /// Ground-effect regime test, favourable conditions.
    pub test_form_f: f64,
    /// Mean ground coefficient along the leg.
    pub g_path: f64,
    /// Source-corrected ground coefficient (eq. 2.5.14).
    pub g_path_prime: f64,
    /// Mean plane slope.
    pub a: f64,
    /// Mean plane intercept.
    pub b: f64,
}

impl PathSegment {
    /// Replace the ground coefficient, refreshing the corrected value.
    pub fn set_g_path(&mut self, g_path: f64, g_s: f64) {
        self.g_path = g_path;
        self.g_path_prime = if self.test_form_h <= 1.0 {
            g_path * self.test_form_h + g_s * (1.0 - self.test_form_h)
        } else {
            g_path
        };
    }

    /// Equivalent source height under the given condition.
    #[must_use]
    pub fn zs(&self, favourable: bool) -> f64 {
        if favourable {
            self.zs_f
        } else {
            self.zs_h
        }
    }

    /// Equivalent receiver height under the given condition.
    #[must_use]
    pub fn zr(&self, favourable: bool) -> f64 {
        if favourable {
            self.zr_f
        } else {
            self.zr_h
        }
    }

    /// Ground-effect regime test under the given condition.
    #[must_use]
    pub fn test_form(&self, favourable: bool) -> f64 {
        if favourable {
            self.test_form_f
        } else {
            self.test_form_h
        }
    }
}

/// A complete propagation path between one source sample and one receiver.
///
/// Path-length differences are carried twice, for homogeneous (`_h`) and
/// favourable (`_f`) conditions; unset values stay at `f64::MAX` like every
/// attribute that a given path shape does not define.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PropagationPath {
    /// Path points in propagation order.
    pub points: Vec<PathPoint>,
    /// Path legs; for diffracted paths the first leg ends at the first
    /// diffraction point and the last leg starts at the last one.
    pub segments: Vec<PathSegment>,
    /// The direct source-receiver leg over the whole mean plane.
    pub sr_segment: PathSegment,
    /// Cumulative distance between first and last diffraction point.
    pub e: f64,
    /// Path-length difference, homogeneous.
    pub delta_h: f64,
    /// Path-length difference, favourable.
    pub delta_f: f64,
    /// Image-path length difference, homogeneous.
    pub delta_prime_h: f64,
    /// Image-path length difference, favourable.
    pub delta_prime_f: f64,
    /// Path-length difference seen from the source image, homogeneous.
    pub delta_s_prime_r_h: f64,
    /// Path-length difference seen from the source image, favourable.
    pub delta_s_prime_r_f: f64,
    /// Path-length difference seen from the receiver image, homogeneous.
    pub delta_s_r_prime_h: f64,
    /// Path-length difference seen from the receiver image, favourable.
    pub delta_s_r_prime_f: f64,
    /// Ground coefficient of the source area.
    pub g_s: f64,
    /// Scene position of the emission point.
    pub source_position: DVec3,
    /// Scene position of the reception point.
    pub receiver_position: DVec3,
    /// Orientation of the source frame in scene coordinates.
    pub source_orientation: Orientation,
    /// Emission direction expressed in the source frame.
    pub ray_directivity: Orientation,
    /// Index of the source in the scene.
    pub source_index: usize,
    /// Index of the receiver in the scene.
    pub receiver_index: usize,
    /// Power multiplier of the source sample (line source piece length).
    pub li: f64,
}

impl PropagationPath {
    /// Path-length difference under the given condition.
    #[must_use]
    pub fn delta(&self, favourable: bool) -> f64 {
        if favourable {
            self.delta_f
        } else {
            self.delta_h
        }
    }

    /// Image-path length difference under the given condition.
    #[must_use]
    pub fn delta_prime(&self, favourable: bool) -> f64 {
        if favourable {
            self.delta_prime_f
        } else {
            self.delta_prime_h
        }
    }

    /// Source-image path difference under the given condition.
    #[must_use]
    pub fn delta_s_prime_r(&self, favourable: bool) -> f64 {
        if favourable {
            self.delta_s_prime_r_f
        } else {
            self.delta_s_prime_r_h
        }
    }

    /// Receiver-image path difference under the given condition.
    #[must_use]
    pub fn delta_s_r_prime(&self, favourable: bool) -> f64 {
        if favourable {
            self.delta_s_r_prime_f
        } else {
            self.delta_s_r_prime_h
        }
    }

    /// Number of points of the given kind.
    #[must_use]
    pub fn count(&self, kind: PathPointKind) -> usize {
        self.points.iter().filter(|p| p.kind == kind).count()
    }

    /// Whether the path holds at least one point of the given kind.
    #[must_use]
    pub fn has(&self, kind: PathPointKind) -> bool {
        self.points.iter().any(|p| p.kind == kind)
    }

    /// Distance term of the divergence: straight distance, or the
    /// three-dimensional polyline distance when the path bends around
    /// vertical edges.
    #[must_use]
    pub fn divergence_distance(&self) -> f64 {
        if self.has(PathPointKind::LateralDiffraction) {
            self.sr_segment.dc
        } else {
            self.sr_segment.d
        }
    }
}

/// Curved-ray arc length of a chord `mn` under favourable conditions
/// (eq. 2.5.24 and 2.5.25, radius tied to the direct distance `d`).
#[must_use]
pub fn to_curve(mn: f64, d: f64) -> f64 {
    let gamma = 2.0 * 1000.0_f64.max(8.0 * d);
    gamma * (mn / gamma).asin()
}

/// Leg attributes over a mean ground plane, in the unfolded frame.
#[must_use]
pub fn compute_segment(
    src: DVec2,
    rcv: DVec2,
    plane: MeanPlane,
    g_path: f64,
    g_s: f64,
) -> PathSegment {
    let s_mean = plane.project(src);
    let r_mean = plane.project(rcv);
    let d = src.distance(rcv);
    let dp = s_mean.distance(r_mean);
    let zs_h = src.distance(s_mean);
    let zr_h = rcv.distance(r_mean);
    let test_form_h = dp / (30.0 * (zs_h + zr_h));
    let g_path_prime = if test_form_h <= 1.0 {
        g_path * test_form_h + g_s * (1.0 - test_form_h)
    } else {
        g_path
    };
    // Favourable-condition height corrections, eq. 2.5.19.
    let delta_zt = 6e-3 * dp / (zs_h + zr_h);
    let delta_zs = ALPHA0 * (zs_h / (zs_h + zr_h)).powi(2) * (dp * dp / 2.0);
    let delta_zr = ALPHA0 * (zr_h / (zs_h + zr_h)).powi(2) * (dp * dp / 2.0);
    let zs_f = zs_h + delta_zs + delta_zt;
    let zr_f = zr_h + delta_zr + delta_zt;
    PathSegment {
        s: src,
        r: rcv,
        s_mean,
        r_mean,
        s_prime: plane.image(src),
        r_prime: plane.image(rcv),
        d,
        dp,
        dc: 0.0,
        d_prime: 0.0,
        zs_h,
        zr_h,
        zs_f,
        zr_f,
        test_form_h,
        test_form_f: dp / (30.0 * (zs_f + zr_f)),
        g_path,
        g_path_prime,
        a: plane.a,
        b: plane.b,
    }
}

/// Side of point `p` relative to the directed segment `a -> b`:
/// `1` above (left), `-1` below (right), `0` on the line.
fn orientation_index(a: DVec2, b: DVec2, p: DVec2) -> f64 {
    let cross = (b - a).perp_dot(p - a);
    if cross > 0.0 {
        1.0
    } else if cross < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn point_along(a: DVec2, b: DVec2, t: f64) -> DVec2 {
    a + (b - a) * t
}

/// Closest point of segment `[a, b]` to `p`.
fn closest_on_segment(a: DVec2, b: DVec2, p: DVec2) -> DVec2 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 <= 0.0 {
        return a;
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    a + ab * t
}

fn is_wall(kind: &CutPointKind) -> bool {
    matches!(
        kind,
        CutPointKind::Screen { .. }
            | CutPointKind::BuildingEnter { .. }
            | CutPointKind::BuildingExit { .. }
    )
}

/// Ground polyline of the unfolded profile (building and wall tops included),
/// plus the ground index of every cut point.
fn ground_polyline(profile: &CutProfile) -> (Vec<DVec2>, Vec<usize>) {
    let mut ground = Vec::with_capacity(profile.points.len());
    let mut index = Vec::with_capacity(profile.points.len());
    // A profile starting inside a footprint opens over a roof.
    let mut over_area = false;
    for point in &profile.points {
        if is_wall(&point.kind) {
            if matches!(point.kind, CutPointKind::BuildingExit { .. }) {
                over_area = true;
            } else {
                break;
            }
        }
    }
    for point in &profile.points {
        let x = point.distance;
        match point.kind {
            CutPointKind::ZoneChange => {
                index.push(ground.len().saturating_sub(1));
                continue;
            }
            CutPointKind::BuildingEnter { .. } => {
                ground.push(DVec2::new(x, point.z_ground));
                ground.push(DVec2::new(x, point.position.z));
                over_area = true;
            }
            CutPointKind::Screen { .. } => {
                ground.push(DVec2::new(x, point.z_ground));
                ground.push(DVec2::new(x, point.position.z));
                ground.push(DVec2::new(x, point.z_ground));
                over_area = false;
            }
            CutPointKind::BuildingExit { .. } => {
                ground.push(DVec2::new(x, point.position.z));
                ground.push(DVec2::new(x, point.z_ground));
                over_area = false;
            }
            CutPointKind::Reflection { .. } => {
                // Duplicated so the mean-plane split at the reflection keeps
                // a point on each side.
                ground.push(DVec2::new(x, point.z_ground));
                ground.push(DVec2::new(x, point.z_ground));
                ground.push(DVec2::new(x, point.z_ground));
            }
            CutPointKind::Topography if over_area => {
                // Terrain under a roof does not shape the ground profile.
            }
            _ => {
                ground.push(DVec2::new(x, point.z_ground));
            }
        }
        index.push(ground.len() - 1);
    }
    (ground, index)
}

/// Upper convex hull of x-ordered points, carrying profile indices through.
fn upper_hull(input: &[(usize, DVec2)]) -> Vec<(usize, DVec2)> {
    if input.len() <= 2 {
        return input.to_vec();
    }
    let mut hull: Vec<(usize, DVec2)> = Vec::with_capacity(input.len());
    for &(idx, p) in input {
        while hull.len() >= 2 {
            let a = hull[hull.len() - 2].1;
            let b = hull[hull.len() - 1].1;
            // Pop anything not making a strict right turn; collinear points
            // (grazing incidence) drop off the hull.
            if (b - a).perp_dot(p - b) >= 0.0 {
                hull.pop();
            } else {
                break;
            }
        }
        hull.push((idx, p));
    }
    hull
}

fn compute_orientation(source_orientation: Orientation, src: DVec3, next: DVec3) -> Orientation {
    let outgoing = (next - src).normalize_or_zero();
    Orientation::from_vector(source_orientation.rotate(outgoing, true), 0.0)
}

/// Frequency-dependent diffraction over uneven terrain on an unobstructed
/// direct path (Rayleigh criterion). Appends the extra legs and points when
/// the criterion holds for at least one band.
#[allow(clippy::too_many_arguments)]
fn compute_rayleigh(
    path: &mut PropagationPath,
    profile: &CutProfile,
    segments: &mut Vec<PathSegment>,
    points: &mut Vec<PathPoint>,
    pts2d: &[DVec2],
    ground: &[DVec2],
    ground_index: &[usize],
) {
    let src = pts2d[0];
    let rcv = pts2d[pts2d.len() - 1];
    let sr_d = path.sr_segment.d;
    let g_source = profile.source().g;
    for i_cut in 1..profile.points.len() - 1 {
        let i_o = ground_index[i_cut];
        let o = ground[i_o];
        let d_so = src.distance(o);
        let d_or = o.distance(rcv);
        let delta_h = orientation_index(src, rcv, o) * (d_so + d_or - sr_d);
        if !EXACT_FREQUENCIES
            .iter()
            .any(|f| delta_h > -(340.0 / f) / 20.0)
        {
            continue;
        }

        let mut seg1 = compute_segment(src, o, mean_plane(&ground[..=i_o]), 0.0, 0.0);
        let mut seg2 = compute_segment(o, rcv, mean_plane(&ground[i_o..]), 0.0, 0.0);
        let src_prime = src + (seg1.s_mean - src) * 2.0;
        let rcv_prime = rcv + (seg2.r_mean - rcv) * 2.0;
        path.sr_segment.d_prime = src_prime.distance(rcv_prime);
        seg1.d_prime = src_prime.distance(o);
        seg2.d_prime = o.distance(rcv_prime);
        let delta_prime_h = orientation_index(src_prime, rcv_prime, o)
            * (seg1.d_prime + seg2.d_prime - path.sr_segment.d_prime);
        if !EXACT_FREQUENCIES
            .iter()
            .any(|f| delta_h > (340.0 / f) / 4.0 - delta_prime_h)
        {
            continue;
        }

        path.delta_h = delta_h;
        path.delta_prime_h = delta_prime_h;
        let x0 = profile.source().distance;
        let xo = profile.points[i_cut].distance;
        let x1 = profile.receiver().distance;
        seg1.set_g_path(profile.g_path_range(x0, xo), g_source);
        seg2.set_g_path(profile.g_path_range(xo, x1), g_source);

        if orientation_index(src, rcv, o) == 1.0 {
            path.delta_f = to_curve(d_so, sr_d) + to_curve(d_or, sr_d) - to_curve(sr_d, sr_d);
        } else {
            let p_a = point_along(src, rcv, (o.x - src.x) / (rcv.x - src.x));
            path.delta_f = 2.0 * to_curve(src.distance(p_a), sr_d)
                + 2.0 * to_curve(p_a.distance(rcv), sr_d)
                - to_curve(d_so, sr_d)
                - to_curve(d_or, sr_d)
                - to_curve(sr_d, sr_d);
        }

        let d_s_prime_o = seg1.s_prime.distance(o);
        let d_s_prime_r = seg1.s_prime.distance(rcv);
        path.delta_s_prime_r_h =
            orientation_index(seg1.s_prime, rcv, o) * (d_s_prime_o + d_or - d_s_prime_r);

        let d_o_r_prime = o.distance(seg2.r_prime);
        let d_s_r_prime = src.distance(seg2.r_prime);
        path.delta_s_r_prime_h =
            orientation_index(src, seg2.r_prime, o) * (d_so + d_o_r_prime - d_s_r_prime);

        let d_prime = path.sr_segment.d_prime;
        if orientation_index(src_prime, rcv_prime, o) == 1.0 {
            path.delta_prime_f = to_curve(seg1.d_prime, d_prime) + to_curve(seg2.d_prime, d_prime)
                - to_curve(d_prime, d_prime);
        } else {
            let p_a = point_along(
                src_prime,
                rcv_prime,
                (o.x - src_prime.x) / (rcv_prime.x - src_prime.x),
            );
            path.delta_prime_f = 2.0 * to_curve(src_prime.distance(p_a), d_prime)
                + 2.0 * to_curve(p_a.distance(rcv_prime), d_prime)
                - to_curve(seg1.d_prime, d_prime)
                - to_curve(seg2.d_prime, d_prime)
                - to_curve(d_prime, d_prime);
        }

        segments.push(seg1);
        segments.push(seg2);
        let mut pt = PathPoint::new(o, o.y, PathPointKind::RayleighDiffraction);
        pt.z_ground = o.y;
        points.push(pt);
    }
}

/// Build the propagation path carried by a cut profile, or `None` when the
/// profile holds no usable path (a reflection would land above its wall).
#[must_use]
pub fn build_path(
    profile: &CutProfile,
    source_orientation: Orientation,
    body_barrier: bool,
    g_s: f64,
) -> Option<PropagationPath> {
    let cut_points = &profile.points;
    if cut_points.len() < 2 {
        return None;
    }
    let mut pts2d: Vec<DVec2> = cut_points
        .iter()
        .map(|p| DVec2::new(p.distance, p.position.z))
        .collect();
    let (ground, ground_index) = ground_polyline(profile);

    let first = pts2d[0];
    let last = pts2d[pts2d.len() - 1];
    let mut sr_segment = compute_segment(
        first,
        last,
        mean_plane(&ground),
        profile.g_path(),
        profile.source().g,
    );
    sr_segment.dc = profile
        .source()
        .position
        .distance(profile.receiver().position);

    // Obstacle tops eligible as diffraction edges: terrain crossings and
    // wall points standing above their own ground.
    let mut hull_input: Vec<(usize, DVec2)> = Vec::with_capacity(cut_points.len());
    hull_input.push((0, first));
    for (idx, point) in cut_points
        .iter()
        .enumerate()
        .take(cut_points.len() - 1)
        .skip(1)
    {
        let on_top = point.position.z != point.z_ground;
        if point.kind == CutPointKind::Topography || (is_wall(&point.kind) && on_top) {
            hull_input.push((idx, pts2d[idx]));
        }
    }
    hull_input.push((cut_points.len() - 1, last));
    let hull = upper_hull(&hull_input);

    // Reflections between diffraction edges move onto the hull edge; a
    // reflection pushed above its wall crest kills the whole path.
    if hull.len() > 2 {
        for edge in hull.windows(2) {
            let (i0, p0) = edge[0];
            let (i1, p1) = edge[1];
            for point_index in i0 + 1..i1 {
                let point = &cut_points[point_index];
                if let CutPointKind::Reflection { wall_top, .. } = point.kind {
                    if point.position.z == point.z_ground {
                        continue;
                    }
                    let projected = closest_on_segment(p0, p1, pts2d[point_index]);
                    if wall_top + EPSILON >= projected.y {
                        pts2d[point_index].y = projected.y;
                    } else {
                        return None;
                    }
                }
            }
        }
    }

    let mut points: Vec<PathPoint> = Vec::new();
    let mut segments: Vec<PathSegment> = Vec::new();
    let mut src2d = first;
    let mut ray_directivity = Orientation::default();

    for i in 1..hull.len() {
        let (i0, _) = hull[i - 1];
        let (i1, _) = hull[i];
        let i0_ground = ground_index[i0];
        let mut i1_ground = ground_index[i1];
        // The ground index at a wall crossing may sit past the crest points;
        // step back to the foot of the wall for the mean-plane split.
        if i1_ground > i0_ground + 1 {
            match cut_points[i1].kind {
                CutPointKind::BuildingEnter { .. } => i1_ground -= 1,
                CutPointKind::Screen { .. } => i1_ground -= 2,
                _ => {}
            }
        }
        if points.is_empty() {
            let mut source_point =
                PathPoint::new(pts2d[i0], cut_points[i0].z_ground, PathPointKind::Source);
            // The emission direction goes to the first reflection or lateral
            // pivot when one precedes the first diffraction edge.
            let mut target = cut_points[i1].position;
            for point in &cut_points[i0 + 1..i1] {
                let off_ground = point.position.z != point.z_ground;
                match point.kind {
                    CutPointKind::Reflection { .. } if off_ground => {
                        target = point.position;
                        break;
                    }
                    CutPointKind::LateralDiffraction => {
                        target = point.position;
                        break;
                    }
                    _ => {}
                }
            }
            let emission = compute_orientation(source_orientation, cut_points[i0].position, target);
            source_point.orientation = emission;
            ray_directivity = emission;
            src2d = pts2d[i0];
            points.push(source_point);
        }
        let mut previous_pivot = i0;
        for point_index in i0 + 1..i1 {
            let point = &cut_points[point_index];
            match point.kind {
                CutPointKind::Reflection { wall_top, .. }
                    if point.position.z != point.z_ground =>
                {
                    let mut refl =
                        PathPoint::new(pts2d[point_index], point.z_ground, PathPointKind::Reflection);
                    refl.alphas = point.alphas.clone();
                    refl.obstacle_z = Some(wall_top);
                    points.push(refl);
                }
                CutPointKind::LateralDiffraction => {
                    points.push(PathPoint::new(
                        pts2d[point_index],
                        point.z_ground,
                        PathPointKind::LateralDiffraction,
                    ));
                    let slice = &ground[i0_ground..=ground_index[point_index]];
                    let seg = compute_segment(
                        pts2d[previous_pivot],
                        pts2d[point_index],
                        mean_plane(slice),
                        profile.g_path_range(cut_points[i0].distance, point.distance),
                        g_s,
                    );
                    previous_pivot = point_index;
                    segments.push(seg);
                }
                _ => {}
            }
        }
        points.push(PathPoint::new(
            pts2d[i1],
            cut_points[i1].z_ground,
            PathPointKind::Receiver,
        ));
        if previous_pivot != i0 && i == hull.len() - 1 {
            // Close the leg between the last lateral pivot and the receiver.
            let slice = &ground[i1_ground..];
            let seg = compute_segment(
                pts2d[previous_pivot],
                last,
                mean_plane(slice),
                profile.g_path_range(
                    cut_points[i1].distance,
                    cut_points[cut_points.len() - 1].distance,
                ),
                g_s,
            );
            segments.push(seg);
        }
        if hull.len() == 2 {
            break;
        }
        let slice = &ground[i0_ground..=i1_ground];
        let mut seg = compute_segment(
            pts2d[i0],
            pts2d[i1],
            mean_plane(slice),
            profile.g_path_range(cut_points[i0].distance, cut_points[i1].distance),
            cut_points[i0].g,
        );
        seg.dc = cut_points[i0].position.distance(cut_points[i1].position);
        segments.push(seg);
        if i != hull.len() - 1 {
            if let Some(pt) = points.last_mut() {
                pt.kind = PathPointKind::Diffraction;
                pt.body_barrier = body_barrier;
                if is_wall(&cut_points[i1].kind) {
                    pt.alphas = cut_points[i1].alphas.clone();
                }
            }
        }
    }

    if points.is_empty() {
        return None;
    }
    let rcv2d = points.last().map(|p| p.position)?;

    let mut path = PropagationPath {
        points,
        segments,
        sr_segment,
        e: 0.0,
        delta_h: f64::MAX,
        delta_f: f64::MAX,
        delta_prime_h: f64::MAX,
        delta_prime_f: f64::MAX,
        delta_s_prime_r_h: f64::MAX,
        delta_s_prime_r_f: f64::MAX,
        delta_s_r_prime_h: f64::MAX,
        delta_s_r_prime_f: f64::MAX,
        g_s,
        source_position: profile.source().position,
        receiver_position: profile.receiver().position,
        source_orientation,
        ray_directivity,
        source_index: 0,
        receiver_index: 0,
        li: 1.0,
    };

    let first_diffraction = path
        .points
        .iter()
        .find(|p| p.kind == PathPointKind::Diffraction)
        .map(|p| p.position);
    let Some(c0) = first_diffraction else {
        // No diffraction over obstructions. Check for terrain grazing unless
        // the path already bends around a vertical edge.
        let lateral = cut_points
            .iter()
            .any(|p| p.kind == CutPointKind::LateralDiffraction);
        let mut rayleigh_segments = Vec::new();
        let mut rayleigh_points = Vec::new();
        if !lateral {
            compute_rayleigh(
                &mut path,
                profile,
                &mut rayleigh_segments,
                &mut rayleigh_points,
                &pts2d,
                &ground,
                &ground_index,
            );
        }
        if rayleigh_segments.is_empty() {
            if path.segments.is_empty() {
                path.segments.push(path.sr_segment.clone());
            }
            path.e = cumulative_diffraction_distance(&path.points);
            let distance = path.divergence_distance();
            path.delta_h = path.segments[0].d + path.e + path.segments[path.segments.len() - 1].d
                - distance;
            path.delta_f = path.delta_h;
        } else {
            path.segments.extend(rayleigh_segments);
            let mut insert_at = 1;
            for pt in rayleigh_points {
                path.points.insert(insert_at, pt);
                insert_at += 1;
            }
        }
        return Some(path);
    };
    let cn = path
        .points
        .iter()
        .rev()
        .find(|p| p.kind == PathPointKind::Diffraction)
        .map(|p| p.position)?;

    path.e = cumulative_diffraction_distance(&path.points);
    let e = path.e;

    let seg1 = path.segments[0].clone();
    let seg_last = path.segments.len() - 1;
    let seg2 = path.segments[seg_last].clone();
    let d_so0 = seg1.d;
    let d_on_r = seg2.d;

    let d_s_prime_r = seg1.s_prime.distance(rcv2d);
    let d_s_prime_o = seg1.s_prime.distance(c0);
    path.delta_s_prime_r_h =
        orientation_index(seg1.s_prime, rcv2d, c0) * (d_s_prime_o + e + d_on_r - d_s_prime_r);
    path.delta_s_prime_r_f = to_curve(d_s_prime_o, d_s_prime_r) + to_curve(e, d_s_prime_r)
        + to_curve(d_on_r, d_s_prime_r)
        - to_curve(d_s_prime_r, d_s_prime_r);

    let d_s_r_prime = src2d.distance(seg2.r_prime);
    let d_o_r_prime = cn.distance(seg2.r_prime);
    let mirror_sign = if src2d.x > seg2.r_prime.x { -1.0 } else { 1.0 };
    path.delta_s_r_prime_h = mirror_sign
        * orientation_index(src2d, seg2.r_prime, cn)
        * (d_so0 + e + d_o_r_prime - d_s_r_prime);
    path.delta_s_r_prime_f = to_curve(d_so0, d_s_r_prime) + to_curve(e, d_s_r_prime)
        + to_curve(d_o_r_prime, d_s_r_prime)
        - to_curve(d_s_r_prime, d_s_r_prime);

    let src_prime = src2d + (seg1.s_mean - src2d) * 2.0;
    let rcv_prime = rcv2d + (seg2.r_mean - rcv2d) * 2.0;
    path.sr_segment.d_prime = src_prime.distance(rcv_prime);
    path.segments[0].d_prime = src_prime.distance(c0);
    path.segments[seg_last].d_prime = cn.distance(rcv_prime);
    let seg1_d_prime = path.segments[0].d_prime;
    let seg2_d_prime = path.segments[seg_last].d_prime;
    let sr_d = path.sr_segment.d;
    let sr_d_prime = path.sr_segment.d_prime;

    let distance = path.divergence_distance();
    path.delta_h = orientation_index(src2d, rcv2d, c0) * (d_so0 + e + d_on_r - distance);
    if orientation_index(src2d, rcv2d, c0) == 1.0 {
        path.delta_f = to_curve(seg1.d, sr_d) + to_curve(e, sr_d) + to_curve(seg2.d, sr_d)
            - to_curve(sr_d, sr_d);
    } else {
        let p_a = point_along(
            src2d,
            rcv2d,
            (c0.x - src_prime.x) / (rcv_prime.x - src_prime.x),
        );
        path.delta_f = 2.0 * to_curve(src_prime.distance(p_a), sr_d_prime)
            + 2.0 * to_curve(p_a.distance(rcv_prime), sr_d_prime)
            - to_curve(seg1_d_prime, sr_d_prime)
            - to_curve(seg2_d_prime, sr_d_prime)
            - to_curve(sr_d_prime, sr_d_prime);
    }

    path.delta_prime_h =
        orientation_index(src_prime, rcv_prime, c0) * (seg1_d_prime + seg2_d_prime - sr_d_prime);
    if orientation_index(src_prime, rcv_prime, c0) == 1.0 {
        path.delta_prime_f = to_curve(seg1_d_prime, sr_d_prime) + to_curve(seg2_d_prime, sr_d_prime)
            - to_curve(sr_d_prime, sr_d_prime);
    } else {
        let p_a = point_along(
            src_prime,
            rcv_prime,
            (c0.x - src_prime.x) / (rcv_prime.x - src_prime.x),
        );
        path.delta_prime_f = 2.0 * to_curve(src_prime.distance(p_a), sr_d_prime)
            + 2.0 * to_curve(p_a.distance(rcv_prime), sr_d_prime)
            - to_curve(seg1_d_prime, sr_d_prime)
            - to_curve(seg2_d_prime, sr_d_prime)
            - to_curve(sr_d_prime, sr_d_prime);
    }

    Some(path)
}

/// Cumulative distance between the first and last diffraction point,
/// reflections excluded.
fn cumulative_diffraction_distance(points: &[PathPoint]) -> f64 {
    let diff: Vec<DVec2> = points
        .iter()
        .filter(|p| p.kind != PathPointKind::Reflection)
        .map(|p| p.position)
        .collect();
    let mut e = 0.0;
    if diff.len() > 3 {
        for pair in diff[1..diff.len() - 1].windows(2) {
            e += pair[0].distance(pair[1]);
        }
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use relief::{CutPoint, CutPointKind};

    fn cut(
        distance: f64,
        z: f64,
        z_ground: f64,
        g: f64,
        kind: CutPointKind,
    ) -> CutPoint {
        CutPoint {
            position: DVec3::new(distance, 0.0, z),
            z_ground,
            g,
            distance,
            kind,
            alphas: Vec::new(),
        }
    }

    #[test]
    fn test_segment_over_flat_plane() {
        let plane = MeanPlane { a: 0.0, b: 0.0 };
        let seg = compute_segment(
            DVec2::new(0.0, 1.0),
            DVec2::new(200.0, 4.0),
            plane,
            0.5,
            0.2,
        );
        assert!((seg.d - (200.0_f64 * 200.0 + 9.0).sqrt()).abs() < 1e-9);
        assert!((seg.dp - 200.0).abs() < 1e-9);
        assert!((seg.zs_h - 1.0).abs() < 1e-9);
        assert!((seg.zr_h - 4.0).abs() < 1e-9);
        // dp / (30 (zs + zr)) > 1: no source-area correction.
        assert!(seg.test_form_h > 1.0);
        assert!((seg.g_path_prime - 0.5).abs() < 1e-12);
        // Favourable heights grow with the curvature corrections.
        assert!((seg.zs_f - 1.4).abs() < 1e-9);
        assert!((seg.zr_f - 6.8).abs() < 1e-9);
    }

    #[test]
    fn test_to_curve_exceeds_chord() {
        let arc = to_curve(200.0, 200.0);
        assert!(arc > 200.0);
        assert!(arc < 200.3);
        // Radius floor applies below 125 m.
        assert!((to_curve(50.0, 10.0) - 2000.0 * (50.0_f64 / 2000.0).asin()).abs() < 1e-9);
    }

    #[test]
    fn test_direct_path_two_points() {
        let profile = CutProfile {
            points: vec![
                cut(0.0, 1.0, 0.0, 0.0, CutPointKind::Source),
                cut(100.0, 1.5, 0.0, 0.0, CutPointKind::Receiver),
            ],
        };
        let path = build_path(&profile, Orientation::default(), false, 0.0).unwrap();
        assert_eq!(path.points.len(), 2);
        assert_eq!(path.points[0].kind, PathPointKind::Source);
        assert_eq!(path.points[1].kind, PathPointKind::Receiver);
        assert_eq!(path.segments.len(), 1);
        assert!((path.sr_segment.d - path.segments[0].d).abs() < 1e-12);
        assert!((path.e - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_screen_produces_diffraction_point() {
        let profile = CutProfile {
            points: vec![
                cut(0.0, 1.0, 0.0, 0.0, CutPointKind::Source),
                cut(50.0, 5.0, 0.0, 0.0, CutPointKind::Screen { wall: 0 }),
                cut(100.0, 1.5, 0.0, 0.0, CutPointKind::Receiver),
            ],
        };
        let path = build_path(&profile, Orientation::default(), false, 0.0).unwrap();
        assert_eq!(path.points.len(), 3);
        assert_eq!(path.points[1].kind, PathPointKind::Diffraction);
        assert_eq!(path.segments.len(), 2);
        let d_so = (50.0_f64 * 50.0 + 16.0).sqrt();
        let d_or = (50.0_f64 * 50.0 + 3.5 * 3.5).sqrt();
        let d = (100.0_f64 * 100.0 + 0.25).sqrt();
        assert!((path.delta_h - (d_so + d_or - d)).abs() < 1e-9);
        assert!(path.delta_h > 0.0);
        assert!(path.delta_f > 0.0);
    }

    #[test]
    fn test_grazing_crest_collapses_to_direct() {
        // Crest exactly on the source-receiver line drops off the hull.
        let profile = CutProfile {
            points: vec![
                cut(0.0, 2.0, 0.0, 0.0, CutPointKind::Source),
                cut(50.0, 2.0, 0.0, 0.0, CutPointKind::Screen { wall: 0 }),
                cut(100.0, 2.0, 0.0, 0.0, CutPointKind::Receiver),
            ],
        };
        let path = build_path(&profile, Orientation::default(), false, 0.0).unwrap();
        assert!(!path.has(PathPointKind::Diffraction));
    }

    #[test]
    fn test_reflection_above_wall_crest_rejected() {
        // A diffraction edge lifts the hull; the reflection point behind it
        // would need to sit far above its wall.
        let profile = CutProfile {
            points: vec![
                cut(0.0, 1.0, 0.0, 0.0, CutPointKind::Source),
                cut(30.0, 10.0, 0.0, 0.0, CutPointKind::Screen { wall: 0 }),
                cut(
                    60.0,
                    1.5,
                    0.0,
                    0.0,
                    CutPointKind::Reflection {
                        wall: 1,
                        wall_top: 2.0,
                    },
                ),
                cut(100.0, 1.0, 0.0, 0.0, CutPointKind::Receiver),
            ],
        };
        assert!(build_path(&profile, Orientation::default(), false, 0.0).is_none());
    }

    #[test]
    fn test_reflection_path_keeps_reflection_point() {
        let profile = CutProfile {
            points: vec![
                cut(0.0, 1.0, 0.0, 0.0, CutPointKind::Source),
                cut(
                    50.0,
                    1.25,
                    0.0,
                    0.0,
                    CutPointKind::Reflection {
                        wall: 0,
                        wall_top: 4.0,
                    },
                ),
                cut(100.0, 1.5, 0.0, 0.0, CutPointKind::Receiver),
            ],
        };
        let path = build_path(&profile, Orientation::default(), false, 0.0).unwrap();
        assert_eq!(path.count(PathPointKind::Reflection), 1);
        assert_eq!(path.points[1].obstacle_z, Some(4.0));
        // Reflections do not enter the diffraction distance.
        assert!((path.e - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_rayleigh_diffraction_on_grazing_terrain() {
        // Terrain rises to just below the line of sight; the path stays
        // direct but picks up frequency-dependent edge legs.
        let profile = CutProfile {
            points: vec![
                cut(0.0, 2.0, 0.0, 0.0, CutPointKind::Source),
                cut(50.0, 1.99, 1.99, 0.0, CutPointKind::Topography),
                cut(100.0, 2.0, 0.0, 0.0, CutPointKind::Receiver),
            ],
        };
        let path = build_path(&profile, Orientation::default(), false, 0.0).unwrap();
        assert!(path.has(PathPointKind::RayleighDiffraction));
        assert_eq!(path.segments.len(), 2);
        assert!(path.delta_h < 0.0);
        assert!(path.delta_h > -1e-3);
    }

    #[test]
    fn test_lateral_pivot_segments() {
        // Unfolded lateral path: the pivot bends the polyline, the profile
        // carries it as an interior point with its own leg.
        let mut pivot = cut(60.0, 1.2, 0.0, 0.0, CutPointKind::LateralDiffraction);
        pivot.position = DVec3::new(40.0, 30.0, 1.2);
        let mut receiver = cut(120.0, 1.5, 0.0, 0.0, CutPointKind::Receiver);
        receiver.position = DVec3::new(80.0, 0.0, 1.5);
        let profile = CutProfile {
            points: vec![cut(0.0, 1.0, 0.0, 0.0, CutPointKind::Source), pivot, receiver],
        };
        let path = build_path(&profile, Orientation::default(), false, 0.0).unwrap();
        assert_eq!(path.count(PathPointKind::LateralDiffraction), 1);
        assert_eq!(path.segments.len(), 2);
        // Divergence uses the three-dimensional source-receiver distance,
        // shorter than the unfolded polyline.
        assert!(path.divergence_distance() < path.sr_segment.d + 1e-9);
        assert!((path.divergence_distance() - path.sr_segment.dc).abs() < 1e-12);
    }

    #[test]
    fn test_source_orientation_follows_outgoing_ray() {
        let profile = CutProfile {
            points: vec![
                cut(0.0, 1.0, 0.0, 0.0, CutPointKind::Source),
                cut(50.0, 5.0, 0.0, 0.0, CutPointKind::Screen { wall: 0 }),
                cut(100.0, 1.5, 0.0, 0.0, CutPointKind::Receiver),
            ],
        };
        let path = build_path(&profile, Orientation::default(), false, 0.0).unwrap();
        // Outgoing ray goes east and slightly up from a north-facing source.
        assert!((path.ray_directivity.yaw - 90.0).abs() < 1.0);
        assert!(path.ray_directivity.pitch > 0.0);
    }
}
