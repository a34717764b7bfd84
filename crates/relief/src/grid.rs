//! Uniform 2D bin index over obstruction geometry.
//!
//! Profile extraction stabs the scene with arbitrary segments, and the
//! reflection search collects walls inside envelopes. Both queries are
//! horizontal, so a flat grid of bins beats a hierarchical index here: cell
//! lookup is two divisions, and segment traversal visits only the bins the
//! segment actually crosses.

use glam::DVec2;

use crate::Bounds;

/// Uniform grid of item-id bins over a horizontal extent.
///
/// The grid stores opaque `u32` ids; callers keep the id-to-item mapping and
/// re-test candidates exactly, the grid only narrows the set.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GridIndex {
    bounds: Bounds,
    cell: f64,
    cols: usize,
    rows: usize,
    bins: Vec<Vec<u32>>,
}

impl GridIndex {
    /// Build an index over `extent` from per-item envelopes.
    ///
    /// The bin size is derived from the item count so that bins hold a small
    /// constant number of items on average; `None` envelopes are skipped.
    #[must_use]
    pub fn build<I>(extent: Bounds, item_bounds: I) -> Self
    where
        I: IntoIterator<Item = Bounds>,
        I::IntoIter: ExactSizeIterator,
    {
        let iter = item_bounds.into_iter();
        let cell = Self::pick_cell_size(extent, iter.len());
        Self::build_with_cell(extent, cell, iter)
    }

    /// Build with an explicit bin size in metres.
    #[must_use]
    pub fn build_with_cell<I>(extent: Bounds, cell: f64, item_bounds: I) -> Self
    where
        I: IntoIterator<Item = Bounds>,
    {
        let cell = cell.max(1.0);
        let size = extent.size();
        let cols = (size.x / cell).ceil().max(1.0) as usize;
        let rows = (size.y / cell).ceil().max(1.0) as usize;
        let mut grid = Self {
            bounds: extent,
            cell,
            cols,
            rows,
            bins: vec![Vec::new(); cols * rows],
        };
        for (id, bounds) in item_bounds.into_iter().enumerate() {
            grid.insert(id as u32, &bounds);
        }
        grid
    }

    /// Target roughly four items per bin, clamped to a sane metric range.
    fn pick_cell_size(extent: Bounds, item_count: usize) -> f64 {
        let size = extent.size();
        let area = (size.x * size.y).max(1.0);
        let per_item = area / item_count.max(1) as f64;
        (per_item * 4.0).sqrt().clamp(5.0, 500.0)
    }

    fn insert(&mut self, id: u32, bounds: &Bounds) {
        let (c0, r0) = self.bin_of(bounds.min);
        let (c1, r1) = self.bin_of(bounds.max);
        for row in r0..=r1 {
            for col in c0..=c1 {
                self.bins[row * self.cols + col].push(id);
            }
        }
    }

    fn bin_of(&self, p: DVec2) -> (usize, usize) {
        let rel = (p - self.bounds.min) / self.cell;
        let col = (rel.x.floor() as isize).clamp(0, self.cols as isize - 1) as usize;
        let row = (rel.y.floor() as isize).clamp(0, self.rows as isize - 1) as usize;
        (col, row)
    }

    /// Candidate ids whose envelope bins overlap `query`.
    ///
    /// Sorted and deduplicated.
    #[must_use]
    pub fn query_bounds(&self, query: &Bounds) -> Vec<u32> {
        if !self.bounds.intersects(query) {
            return Vec::new();
        }
        let (c0, r0) = self.bin_of(query.min);
        let (c1, r1) = self.bin_of(query.max);
        let mut out = Vec::new();
        for row in r0..=r1 {
            for col in c0..=c1 {
                out.extend_from_slice(&self.bins[row * self.cols + col]);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Candidate ids in the bins crossed by the segment `[a, b]`.
    ///
    /// Walks the grid with a parametric traversal; sorted and deduplicated.
    #[must_use]
    pub fn query_segment(&self, a: DVec2, b: DVec2) -> Vec<u32> {
        if !self.bounds.intersects(&Bounds::from_segment(a, b)) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let (mut col, mut row) = self.bin_of(a);
        let (end_col, end_row) = self.bin_of(b);
        let dir = b - a;

        let step_x: isize = if dir.x > 0.0 { 1 } else { -1 };
        let step_y: isize = if dir.y > 0.0 { 1 } else { -1 };

        // Parameter t at which the ray crosses the next vertical/horizontal
        // bin boundary, and the t advance per full bin.
        let next_boundary = |idx: usize, step: isize, min: f64| {
            let edge = if step > 0 { idx as f64 + 1.0 } else { idx as f64 };
            min + edge * self.cell
        };
        let mut t_max_x = if dir.x.abs() < 1e-12 {
            f64::INFINITY
        } else {
            (next_boundary(col, step_x, self.bounds.min.x) - a.x) / dir.x
        };
        let mut t_max_y = if dir.y.abs() < 1e-12 {
            f64::INFINITY
        } else {
            (next_boundary(row, step_y, self.bounds.min.y) - a.y) / dir.y
        };
        let t_delta_x = if dir.x.abs() < 1e-12 {
            f64::INFINITY
        } else {
            self.cell / dir.x.abs()
        };
        let t_delta_y = if dir.y.abs() < 1e-12 {
            f64::INFINITY
        } else {
            self.cell / dir.y.abs()
        };

        loop {
            out.extend_from_slice(&self.bins[row * self.cols + col]);
            if col == end_col && row == end_row {
                break;
            }
            if t_max_x < t_max_y {
                let next = col as isize + step_x;
                if next < 0 || next >= self.cols as isize {
                    break;
                }
                col = next as usize;
                t_max_x += t_delta_x;
            } else {
                let next = row as isize + step_y;
                if next < 0 || next >= self.rows as isize {
                    break;
                }
                row = next as usize;
                t_max_y += t_delta_y;
            }
            if t_max_x.min(t_max_y) > 1.0 + 1e-9 && (col != end_col || row != end_row) {
                // Past the segment end; visit the end bin and stop.
                out.extend_from_slice(&self.bins[end_row * self.cols + end_col]);
                break;
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent() -> Bounds {
        Bounds::from_min_max(DVec2::ZERO, DVec2::new(100.0, 100.0))
    }

    #[test]
    fn test_query_bounds_narrows() {
        let items = vec![
            Bounds::from_segment(DVec2::new(5.0, 5.0), DVec2::new(10.0, 10.0)),
            Bounds::from_segment(DVec2::new(80.0, 80.0), DVec2::new(90.0, 90.0)),
        ];
        let grid = GridIndex::build_with_cell(extent(), 10.0, items);
        let near_origin =
            grid.query_bounds(&Bounds::from_segment(DVec2::ZERO, DVec2::new(15.0, 15.0)));
        assert!(near_origin.contains(&0));
        assert!(!near_origin.contains(&1));
    }

    #[test]
    fn test_query_segment_hits_crossed_items() {
        let items = vec![
            Bounds::from_segment(DVec2::new(48.0, 0.0), DVec2::new(52.0, 100.0)),
            Bounds::from_segment(DVec2::new(0.0, 90.0), DVec2::new(10.0, 95.0)),
        ];
        let grid = GridIndex::build_with_cell(extent(), 10.0, items);
        let hits = grid.query_segment(DVec2::new(0.0, 50.0), DVec2::new(100.0, 50.0));
        assert!(hits.contains(&0));
        assert!(!hits.contains(&1));
    }

    #[test]
    fn test_query_segment_diagonal() {
        let items = vec![Bounds::from_point(DVec2::new(55.0, 55.0)).expanded_by(2.0)];
        let grid = GridIndex::build_with_cell(extent(), 10.0, items);
        let hits = grid.query_segment(DVec2::new(0.0, 0.0), DVec2::new(100.0, 100.0));
        assert!(hits.contains(&0));
    }

    #[test]
    fn test_query_outside_extent_is_empty() {
        let grid = GridIndex::build_with_cell(extent(), 10.0, vec![extent()]);
        let hits = grid.query_segment(DVec2::new(200.0, 200.0), DVec2::new(300.0, 300.0));
        assert!(hits.is_empty());
    }
}
