//! Triangulated terrain elevation model.

use glam::{DVec2, DVec3};

use crate::Bounds;

/// Vertex indices of one terrain triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Triangle {
    /// First vertex.
    pub a: u32,
    /// Second vertex.
    pub b: u32,
    /// Third vertex.
    pub c: u32,
}

/// A triangulated irregular network carrying the ground altitude.
///
/// An empty mesh is a valid degenerate case: the ground is then the flat
/// plane `z = 0` everywhere, which is the usual setup for method validation
/// scenes.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TerrainMesh {
    vertices: Vec<DVec3>,
    triangles: Vec<Triangle>,
}

impl TerrainMesh {
    /// Flat fallback terrain at altitude zero.
    #[must_use]
    pub fn flat() -> Self {
        Self::default()
    }

    /// Build from an explicit vertex/triangle soup.
    ///
    /// Returns `None` when a triangle references a missing vertex.
    #[must_use]
    pub fn from_triangles(vertices: Vec<DVec3>, triangles: Vec<Triangle>) -> Option<Self> {
        let n = vertices.len() as u32;
        if triangles.iter().any(|t| t.a >= n || t.b >= n || t.c >= n) {
            return None;
        }
        Some(Self {
            vertices,
            triangles,
        })
    }

    /// Build from a regular elevation grid.
    ///
    /// `heights` holds `rows * cols` altitudes in row-major order starting at
    /// `origin`, with `cell` metres between samples. Each grid cell is split
    /// into two triangles.
    #[must_use]
    pub fn from_elevation_grid(
        origin: DVec2,
        cell: f64,
        cols: usize,
        rows: usize,
        heights: &[f64],
    ) -> Option<Self> {
        if cols < 2 || rows < 2 || heights.len() != cols * rows || cell <= 0.0 {
            return None;
        }
        let mut vertices = Vec::with_capacity(heights.len());
        for row in 0..rows {
            for col in 0..cols {
                vertices.push(DVec3::new(
                    origin.x + col as f64 * cell,
                    origin.y + row as f64 * cell,
                    heights[row * cols + col],
                ));
            }
        }
        let mut triangles = Vec::with_capacity((rows - 1) * (cols - 1) * 2);
        for row in 0..rows - 1 {
            for col in 0..cols - 1 {
                let i00 = (row * cols + col) as u32;
                let i10 = i00 + 1;
                let i01 = i00 + cols as u32;
                let i11 = i01 + 1;
                triangles.push(Triangle {
                    a: i00,
                    b: i10,
                    c: i11,
                });
                triangles.push(Triangle {
                    a: i00,
                    b: i11,
                    c: i01,
                });
            }
        }
        Some(Self {
            vertices,
            triangles,
        })
    }

    /// Whether the mesh carries any triangles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Number of triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Corner positions of triangle `idx`.
    #[must_use]
    pub fn corners(&self, idx: usize) -> [DVec3; 3] {
        let t = self.triangles[idx];
        [
            self.vertices[t.a as usize],
            self.vertices[t.b as usize],
            self.vertices[t.c as usize],
        ]
    }

    /// Horizontal envelope of triangle `idx`.
    #[must_use]
    pub fn triangle_bounds(&self, idx: usize) -> Bounds {
        let [a, b, c] = self.corners(idx);
        Bounds::from_segment(a.truncate(), b.truncate()).including(c.truncate())
    }

    /// Ground altitude interpolated within triangle `idx`, or `None` when the
    /// point falls outside it.
    #[must_use]
    pub fn height_in_triangle(&self, idx: usize, p: DVec2) -> Option<f64> {
        let [a, b, c] = self.corners(idx);
        barycentric_z(a, b, c, p)
    }

    /// Ground altitude under `p` by brute-force triangle scan.
    ///
    /// Falls back to altitude zero outside the mesh. Hot paths should go
    /// through a [`crate::GridIndex`] instead.
    #[must_use]
    pub fn height_at(&self, p: DVec2) -> f64 {
        for idx in 0..self.triangles.len() {
            if let Some(z) = self.height_in_triangle(idx, p) {
                return z;
            }
        }
        0.0
    }
}

/// Barycentric z-interpolation in the horizontal projection of a triangle.
fn barycentric_z(a: DVec3, b: DVec3, c: DVec3, p: DVec2) -> Option<f64> {
    let (a2, b2, c2) = (a.truncate(), b.truncate(), c.truncate());
    let v0 = b2 - a2;
    let v1 = c2 - a2;
    let v2 = p - a2;
    let den = v0.perp_dot(v1);
    if den.abs() < 1e-12 {
        return None;
    }
    let wb = v2.perp_dot(v1) / den;
    let wc = v0.perp_dot(v2) / den;
    let wa = 1.0 - wb - wc;
    let eps = -1e-9;
    if wa >= eps && wb >= eps && wc >= eps {
        Some(wa * a.z + wb * b.z + wc * c.z)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_mesh_returns_zero() {
        let mesh = TerrainMesh::flat();
        assert!(mesh.is_empty());
        assert!(mesh.height_at(DVec2::new(123.0, -45.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_grid_interpolation() {
        // 3x3 grid sloping up in x: z = x / 10
        let heights = [
            0.0, 1.0, 2.0, //
            0.0, 1.0, 2.0, //
            0.0, 1.0, 2.0,
        ];
        let mesh = TerrainMesh::from_elevation_grid(DVec2::ZERO, 10.0, 3, 3, &heights).unwrap();
        assert_eq!(mesh.triangle_count(), 8);
        let z = mesh.height_at(DVec2::new(5.0, 5.0));
        assert!((z - 0.5).abs() < 1e-9);
        let z = mesh.height_at(DVec2::new(15.0, 12.0));
        assert!((z - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_from_triangles_rejects_bad_index() {
        let vertices = vec![DVec3::ZERO, DVec3::new(1.0, 0.0, 0.0)];
        let triangles = vec![Triangle { a: 0, b: 1, c: 2 }];
        assert!(TerrainMesh::from_triangles(vertices, triangles).is_none());
    }

    #[test]
    fn test_grid_rejects_mismatched_heights() {
        assert!(TerrainMesh::from_elevation_grid(DVec2::ZERO, 10.0, 3, 3, &[0.0; 8]).is_none());
    }
}
