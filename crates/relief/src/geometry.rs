//! Small 2D/2.5D geometric primitives shared by the substrate modules.
//!
//! Everything here works on `glam` double-precision vectors; the vertical
//! axis is carried separately as `z` where a routine needs it.

use glam::{DVec2, DVec3};

/// Tolerance used when comparing positions along a profile, in metres.
pub const EPSILON: f64 = 1e-9;

/// Signed area of the triangle `(a, b, c)` times two.
///
/// Positive when `c` is on the left of the directed line `a -> b`.
#[must_use]
pub fn cross_sign(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Intersection of segments `[a1, a2]` and `[b1, b2]`.
///
/// Returns the parameter along `[a1, a2]` and the intersection point, or
/// `None` when the segments are parallel or miss each other. Touching
/// endpoints count as intersections.
#[must_use]
pub fn segment_intersection(
    a1: DVec2,
    a2: DVec2,
    b1: DVec2,
    b2: DVec2,
) -> Option<(f64, DVec2)> {
    let r = a2 - a1;
    let s = b2 - b1;
    let denom = r.perp_dot(s);
    if denom.abs() < EPSILON {
        return None;
    }
    let qp = b1 - a1;
    let t = qp.perp_dot(s) / denom;
    let u = qp.perp_dot(r) / denom;
    if (-EPSILON..=1.0 + EPSILON).contains(&t) && (-EPSILON..=1.0 + EPSILON).contains(&u) {
        Some((t.clamp(0.0, 1.0), a1 + r * t))
    } else {
        None
    }
}

/// Ray-cast point-in-polygon test over a closed ring.
///
/// The ring may be given with or without a repeated closing vertex.
#[must_use]
pub fn point_in_ring(point: DVec2, ring: &[DVec2]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (ring[i], ring[j]);
        if ((pi.y > point.y) != (pj.y > point.y))
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Unclamped parameter of the projection of `p` onto the line through
/// `a` and `b`.
#[must_use]
pub fn projection_param(a: DVec2, b: DVec2, p: DVec2) -> f64 {
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 < EPSILON {
        return 0.0;
    }
    (p - a).dot(ab) / len2
}

/// Distance from `p` to the segment `[a, b]`.
#[must_use]
pub fn point_segment_distance(p: DVec2, a: DVec2, b: DVec2) -> f64 {
    let t = projection_param(a, b, p).clamp(0.0, 1.0);
    p.distance(a + (b - a) * t)
}

/// Linear interpolation of `z` along the 3D segment `[a, b]` at the
/// horizontal position `p`.
///
/// `p` is assumed to lie on (or near) the 2D projection of the segment.
#[must_use]
pub fn interpolate_z(a: DVec3, b: DVec3, p: DVec2) -> f64 {
    let t = projection_param(a.truncate(), b.truncate(), p).clamp(0.0, 1.0);
    a.z + (b.z - a.z) * t
}

/// Reflect `p` across the infinite line through `a` and `b`.
#[must_use]
pub fn mirror_point(p: DVec2, a: DVec2, b: DVec2) -> DVec2 {
    let t = projection_param(a, b, p);
    let foot = a + (b - a) * t;
    foot * 2.0 - p
}

/// Which side of the directed line `a -> b` the point `p` lies on.
///
/// Returns `1` for left, `-1` for right, `0` for (numerically) on the line.
#[must_use]
pub fn side_of(a: DVec2, b: DVec2, p: DVec2) -> i8 {
    let c = cross_sign(a, b, p);
    if c > EPSILON {
        1
    } else if c < -EPSILON {
        -1
    } else {
        0
    }
}
