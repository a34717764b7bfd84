//! Side convex hulls for horizontal-plane diffraction.
//!
//! When the straight profile between a source and a receiver is blocked,
//! sound can still bend around the vertical edges of the blockers. The
//! detour is found in plan view: take the corners of every obstacle the
//! straight segment crosses, grow the set until the convex hull of
//! `{source, receiver, corners}` crosses nothing new, and read the two
//! hull chains on either side of the segment as candidate polylines. A
//! chain only stands if each of its corners carries an obstacle edge tall
//! enough to reach the ray, and if the detour stays within the length
//! budget.

use glam::{DVec2, DVec3};
use relief::{geometry, Relief};

/// Detour polylines may stretch at most this factor times the straight
/// source-receiver distance before the side is abandoned.
pub const MAX_DETOUR_RATIO: f64 = 4.0;

const MAX_GROWTH_ROUNDS: usize = 64;

/// Candidate corner in plan view, carrying the crest altitude of the
/// tallest wall meeting it.
#[derive(Debug, Clone, Copy)]
struct Corner {
    xy: DVec2,
    top_z: f64,
}

/// Polylines bending around the obstruction on either side, pivots
/// included, endpoints at `source` and `receiver`.
///
/// Pivot altitudes are interpolated between the endpoint altitudes by
/// distance along the polyline. Returns at most one polyline per side;
/// an empty result means no lateral detour exists within `max_length`.
#[must_use]
pub fn side_hull_paths(
    relief: &Relief,
    source: DVec3,
    receiver: DVec3,
    max_length: f64,
) -> Vec<Vec<DVec3>> {
    let s = source.truncate();
    let r = receiver.truncate();
    let direct = s.distance(r);
    if direct < geometry::EPSILON {
        return Vec::new();
    }
    let max_length = max_length.min(MAX_DETOUR_RATIO * direct);

    let mut corners: Vec<Corner> = Vec::new();
    let mut seen_walls: Vec<u32> = Vec::new();
    if !absorb_crossings(relief, s, r, &mut corners, &mut seen_walls) {
        return Vec::new();
    }

    // Grow the corner set until the hull stops crossing new panels.
    let mut hull = Vec::new();
    for round in 0..=MAX_GROWTH_ROUNDS {
        hull = convex_hull(s, r, &corners);
        let mut grown = false;
        for edge in hull.windows(2) {
            if absorb_crossings(relief, edge[0].xy, edge[1].xy, &mut corners, &mut seen_walls) {
                grown = true;
            }
        }
        if !grown {
            break;
        }
        if round == MAX_GROWTH_ROUNDS {
            return Vec::new();
        }
    }

    let Some((left, right)) = split_chains(s, r, &hull) else {
        return Vec::new();
    };
    [left, right]
        .into_iter()
        .filter_map(|chain| lift_chain(source, receiver, &chain, max_length))
        .collect()
}

/// Add the endpoints of every wall panel crossing `[a, b]` to the corner
/// set. Returns whether anything new was added.
fn absorb_crossings(
    relief: &Relief,
    a: DVec2,
    b: DVec2,
    corners: &mut Vec<Corner>,
    seen_walls: &mut Vec<u32>,
) -> bool {
    let mut grown = false;
    for (idx, _, _) in relief.walls_crossing(a, b) {
        if seen_walls.contains(&idx) {
            continue;
        }
        seen_walls.push(idx);
        let wall = relief.wall(idx);
        for (xy, top_z) in [(wall.a(), wall.p0.z), (wall.b(), wall.p1.z)] {
            match corners
                .iter_mut()
                .find(|c| c.xy.distance(xy) < geometry::EPSILON)
            {
                Some(corner) => corner.top_z = corner.top_z.max(top_z),
                None => corners.push(Corner { xy, top_z }),
            }
        }
        grown = true;
    }
    grown
}

/// Monotone-chain convex hull of the corner set plus both endpoints,
/// counterclockwise, without the closing vertex.
fn convex_hull(s: DVec2, r: DVec2, corners: &[Corner]) -> Vec<Corner> {
    let mut points: Vec<Corner> = Vec::with_capacity(corners.len() + 2);
    points.push(Corner { xy: s, top_z: f64::MAX });
    points.push(Corner { xy: r, top_z: f64::MAX });
    points.extend_from_slice(corners);
    points.sort_by(|a, b| a.xy.x.total_cmp(&b.xy.x).then(a.xy.y.total_cmp(&b.xy.y)));
    points.dedup_by(|a, b| a.xy.distance(b.xy) < geometry::EPSILON);
    if points.len() < 3 {
        return points;
    }

    let mut lower: Vec<Corner> = Vec::new();
    for &p in &points {
        while lower.len() >= 2
            && geometry::cross_sign(lower[lower.len() - 2].xy, lower[lower.len() - 1].xy, p.xy)
                <= 0.0
        {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Corner> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2
            && geometry::cross_sign(upper[upper.len() - 2].xy, upper[upper.len() - 1].xy, p.xy)
                <= 0.0
        {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Cut the hull cycle into the two chains joining `s` to `r`.
///
/// Fails when either endpoint fell inside the hull, in which case no
/// unobstructed detour around the set exists.
fn split_chains(s: DVec2, r: DVec2, hull: &[Corner]) -> Option<(Vec<Corner>, Vec<Corner>)> {
    let si = hull
        .iter()
        .position(|c| c.xy.distance(s) < geometry::EPSILON)?;
    let ri = hull
        .iter()
        .position(|c| c.xy.distance(r) < geometry::EPSILON)?;
    let n = hull.len();
    let mut one: Vec<Corner> = Vec::new();
    let mut i = si;
    while i != ri {
        i = (i + 1) % n;
        if i != ri {
            one.push(hull[i]);
        }
    }
    let mut other: Vec<Corner> = Vec::new();
    let mut i = ri;
    while i != si {
        i = (i + 1) % n;
        if i != si {
            other.push(hull[i]);
        }
    }
    other.reverse();
    Some((one, other))
}

/// Interpolate altitudes along the chain and validate pivot heights and the
/// total detour length.
fn lift_chain(
    source: DVec3,
    receiver: DVec3,
    chain: &[Corner],
    max_length: f64,
) -> Option<Vec<DVec3>> {
    if chain.is_empty() {
        return None;
    }
    let mut cumulative = vec![0.0];
    let mut previous = source.truncate();
    let mut total = 0.0;
    for corner in chain {
        total += previous.distance(corner.xy);
        cumulative.push(total);
        previous = corner.xy;
    }
    total += previous.distance(receiver.truncate());
    if total > max_length {
        return None;
    }

    let mut polyline = Vec::with_capacity(chain.len() + 2);
    polyline.push(source);
    for (corner, travelled) in chain.iter().zip(cumulative.iter().skip(1)) {
        let z = source.z + (receiver.z - source.z) * travelled / total;
        // The diffracting edge must reach the ray at the pivot.
        if corner.top_z + geometry::EPSILON < z {
            return None;
        }
        polyline.push(corner.xy.extend(z));
    }
    polyline.push(receiver);
    Some(polyline)
}
