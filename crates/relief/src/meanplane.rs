//! Least-squares mean ground plane over an unfolded vertical profile.
//!
//! The ground under a propagation segment is replaced by the straight line
//! `z = a·x + b` that minimises the integrated squared error against the
//! piecewise-linear ground polyline (Directive 2015/996, annex eq. VI-3 and
//! VI-4). Equivalent heights and image sources are measured against this
//! plane rather than the raw terrain.

use glam::DVec2;

/// Mean ground plane `z = a·x + b` in an unfolded `(distance, altitude)`
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MeanPlane {
    /// Slope of the plane.
    pub a: f64,
    /// Altitude of the plane at `x = 0`.
    pub b: f64,
}

impl MeanPlane {
    /// Altitude of the plane at abscissa `x`.
    #[must_use]
    pub fn z_at(&self, x: f64) -> f64 {
        self.a * x + self.b
    }

    /// Orthogonal projection of a point onto the plane.
    #[must_use]
    pub fn project(&self, p: DVec2) -> DVec2 {
        let x = (p.x + self.a * p.y - self.a * self.b) / (self.a * self.a + 1.0);
        DVec2::new(x, self.a * x + self.b)
    }

    /// Mirror image of a point across the plane.
    #[must_use]
    pub fn image(&self, p: DVec2) -> DVec2 {
        self.project(p) * 2.0 - p
    }

    /// Orthogonal distance from a point to the plane.
    #[must_use]
    pub fn height_of(&self, p: DVec2) -> f64 {
        p.distance(self.project(p))
    }
}

/// Fit the mean plane to a ground polyline given as `(x, z)` points with
/// non-decreasing `x`.
///
/// Solves the continuous least-squares normal equations over the polyline;
/// zero-width pieces are skipped. A degenerate (vertical or single-point)
/// profile yields a horizontal plane through the mean altitude.
#[must_use]
pub fn mean_plane(ground: &[DVec2]) -> MeanPlane {
    if ground.len() < 2 {
        let b = ground.first().map_or(0.0, |p| p.y);
        return MeanPlane { a: 0.0, b };
    }
    let x0 = ground[0].x;
    let x1 = ground[ground.len() - 1].x;
    let width = x1 - x0;
    if width.abs() < 1e-9 {
        let b = ground.iter().map(|p| p.y).sum::<f64>() / ground.len() as f64;
        return MeanPlane { a: 0.0, b };
    }

    // Right-hand sides: integrals of x·z(x) and z(x) over the polyline.
    let mut int_xz = 0.0;
    let mut int_z = 0.0;
    for pair in ground.windows(2) {
        let (p1, p2) = (pair[0], pair[1]);
        let dx = p2.x - p1.x;
        if dx <= 0.0 {
            continue;
        }
        let ai = (p2.y - p1.y) / dx;
        let bi = p1.y - ai * p1.x;
        let d2 = p2.x * p2.x - p1.x * p1.x;
        let d3 = p2.x * p2.x * p2.x - p1.x * p1.x * p1.x;
        int_xz += ai * d3 / 3.0 + bi * d2 / 2.0;
        int_z += ai * d2 / 2.0 + bi * dx;
    }

    // Moments of the abscissa over [x0, x1].
    let m0 = width;
    let m1 = (x1 * x1 - x0 * x0) / 2.0;
    let m2 = (x1 * x1 * x1 - x0 * x0 * x0) / 3.0;

    let det = m0 * m2 - m1 * m1;
    if det.abs() < 1e-12 {
        return MeanPlane {
            a: 0.0,
            b: int_z / m0,
        };
    }
    let a = (m0 * int_xz - m1 * int_z) / det;
    let b = (int_z - a * m1) / m0;
    MeanPlane { a, b }
}
