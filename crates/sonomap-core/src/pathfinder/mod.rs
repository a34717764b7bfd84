//! Multi-path search between source samples and receivers.
//!
//! For each pair the finder runs a fixed sequence: the direct vertical cut
//! (which covers over-the-top diffraction), then horizontal detours around
//! vertical edges when the direct profile is blocked, then specular
//! reflection sequences read off the mirror-receiver forest. Every path
//! that survives geometric validation is handed to a visitor, which steers
//! the search: keep going, drop the rest of this source, or drop the whole
//! receiver. The orchestrator uses that steering for its error-bound
//! pruning; a plain collector gives the all-paths behaviour.

mod lateral;
mod mirror;

pub use lateral::{side_hull_paths, MAX_DETOUR_RATIO};
pub use mirror::{MirrorForest, MirrorNode};

use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec3;
use relief::{geometry, CutPoint, CutPointKind, CutProfile};
use tracing::trace;

use crate::path::{build_path, PropagationPath};
use crate::scene::{Scene, SourceSample};

/// Offset applied at reflection and pivot junctions so the profile cutter
/// does not re-detect the panel the leg starts or ends on, in metres.
const JUNCTION_NUDGE: f64 = 1e-3;

/// Decision returned by a visitor after each delivered path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchControl {
    /// Keep searching.
    Continue,
    /// Stop searching paths from the current source, move to the next one.
    SkipSource,
    /// Stop searching paths toward the current receiver entirely.
    SkipReceiver,
}

/// Receives every validated path and steers the search.
pub trait PathVisitor {
    /// Called once per found path, in search order.
    fn on_path(&mut self, path: PropagationPath) -> SearchControl;
}

/// Visitor that keeps everything.
#[derive(Debug, Default)]
pub struct PathCollector {
    /// Paths in search order.
    pub paths: Vec<PropagationPath>,
}

impl PathVisitor for PathCollector {
    fn on_path(&mut self, path: PropagationPath) -> SearchControl {
        self.paths.push(path);
        SearchControl::Continue
    }
}

/// Junction classification for multi-leg profiles.
enum Pivot {
    Reflection {
        wall: u32,
        wall_top: f64,
        alphas: Vec<f64>,
    },
    Lateral,
}

/// Path search over one scene.
pub struct PathFinder<'a> {
    scene: &'a Scene,
}

impl<'a> PathFinder<'a> {
    /// Bind the finder to a scene.
    #[must_use]
    pub fn new(scene: &'a Scene) -> Self {
        Self { scene }
    }

    /// Search every receiver, checking `cancel` between receivers.
    pub fn find_all(&self, cancel: &AtomicBool, visitor: &mut dyn PathVisitor) {
        for receiver_index in 0..self.scene.receivers.len() {
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            self.find_receiver_paths(receiver_index, visitor);
        }
    }

    /// All paths toward one receiver, collected in search order.
    #[must_use]
    pub fn receiver_paths(&self, receiver_index: usize) -> Vec<PropagationPath> {
        let mut collector = PathCollector::default();
        self.find_receiver_paths(receiver_index, &mut collector);
        collector.paths
    }

    /// Search one receiver against every source in range.
    ///
    /// Source samples are visited nearest first, so a visitor that prunes on
    /// an accumulated bound sees the strongest candidates before deciding to
    /// skip the tail.
    pub fn find_receiver_paths(&self, receiver_index: usize, visitor: &mut dyn PathVisitor) {
        let receiver = self.scene.receivers[receiver_index].position;
        let config = &self.scene.config;
        let forest = MirrorForest::build(
            &self.scene.relief,
            receiver,
            config.reflection_order,
            config.max_reflection_distance,
        );

        let mut samples: Vec<SourceSample> = Vec::new();
        for source_idx in 0..self.scene.sources.len() {
            for sample in self.scene.expand_source(source_idx, receiver) {
                if sample.position.distance(receiver) <= config.max_source_distance {
                    samples.push(sample);
                }
            }
        }
        samples.sort_by(|a, b| {
            a.position
                .distance(receiver)
                .total_cmp(&b.position.distance(receiver))
                .then(a.source_idx.cmp(&b.source_idx))
        });
        trace!(
            receiver = receiver_index,
            samples = samples.len(),
            images = forest.nodes().len(),
            "receiver search"
        );

        let mut skipped: Vec<usize> = Vec::new();
        for sample in &samples {
            if skipped.contains(&sample.source_idx) {
                continue;
            }
            match self.pair_paths(sample, receiver_index, receiver, &forest, visitor) {
                SearchControl::Continue => {}
                SearchControl::SkipSource => skipped.push(sample.source_idx),
                SearchControl::SkipReceiver => return,
            }
        }
    }

    /// Run the search sequence for one source sample.
    fn pair_paths(
        &self,
        sample: &SourceSample,
        receiver_index: usize,
        receiver: DVec3,
        forest: &MirrorForest,
        visitor: &mut dyn PathVisitor,
    ) -> SearchControl {
        let relief = &self.scene.relief;
        let config = &self.scene.config;
        let orientation = sample.orientation.unwrap_or_default();

        // Direct cut, carrying over-the-top diffraction when blocked.
        let profile = relief.cut_profile(sample.position, receiver);
        let free_field = profile.is_free_field();
        if free_field || config.vertical_diffraction {
            if let Some(path) = self.finish(&profile, sample, receiver_index, orientation) {
                match visitor.on_path(path) {
                    SearchControl::Continue => {}
                    control => return control,
                }
            }
        }

        // Horizontal detours around vertical edges.
        if config.horizontal_diffraction && !free_field {
            let budget = config.max_source_distance;
            for polyline in side_hull_paths(relief, sample.position, receiver, budget) {
                let pivots: Vec<Pivot> = polyline[1..polyline.len() - 1]
                    .iter()
                    .map(|_| Pivot::Lateral)
                    .collect();
                let profile = self.polyline_profile(&polyline, &pivots);
                if let Some(path) = self.finish(&profile, sample, receiver_index, orientation) {
                    match visitor.on_path(path) {
                        SearchControl::Continue => {}
                        control => return control,
                    }
                }
            }
        }

        // Specular reflection sequences.
        for node_index in 0..forest.nodes().len() {
            let Some((polyline, pivots)) =
                self.reflection_polyline(sample.position, receiver, forest, node_index)
            else {
                continue;
            };
            let profile = self.polyline_profile(&polyline, &pivots);
            if let Some(path) = self.finish(&profile, sample, receiver_index, orientation) {
                match visitor.on_path(path) {
                    SearchControl::Continue => {}
                    control => return control,
                }
            }
        }
        SearchControl::Continue
    }

    /// Build and stamp a path from a finished profile.
    fn finish(
        &self,
        profile: &CutProfile,
        sample: &SourceSample,
        receiver_index: usize,
        orientation: crate::orientation::Orientation,
    ) -> Option<PropagationPath> {
        let g_s = profile.source().g;
        let mut path = build_path(profile, orientation, self.scene.config.body_barrier, g_s)?;
        path.source_index = sample.source_idx;
        path.receiver_index = receiver_index;
        path.li = sample.li;
        Some(path)
    }

    /// Walk a mirror chain into the reflection polyline, or `None` when a
    /// leg misses its wall or lands outside the panel's vertical span.
    fn reflection_polyline(
        &self,
        source: DVec3,
        receiver: DVec3,
        forest: &MirrorForest,
        node_index: usize,
    ) -> Option<(Vec<DVec3>, Vec<Pivot>)> {
        let relief = &self.scene.relief;
        let chain = forest.chain(node_index);
        // Straight range to the deepest image equals the unfolded length of
        // the whole reflected path.
        let deepest = forest.nodes()[chain[0]].position;
        if source.distance(deepest) > self.scene.config.max_source_distance {
            return None;
        }

        let mut polyline = vec![source];
        let mut pivots = Vec::new();
        let mut current = source;
        for &index in &chain {
            let node = &forest.nodes()[index];
            let wall = relief.wall(node.wall);
            let destination = node.position;
            let (t, hit) = geometry::segment_intersection(
                current.truncate(),
                destination.truncate(),
                wall.a(),
                wall.b(),
            )?;
            let z = current.z + (destination.z - current.z) * t;
            let top = wall.top_at(hit);
            if z > top + geometry::EPSILON || z < wall.ground_at(hit) - geometry::EPSILON {
                return None;
            }
            let vertex = hit.extend(z);
            polyline.push(vertex);
            pivots.push(Pivot::Reflection {
                wall: node.wall,
                wall_top: top,
                alphas: wall.alphas.clone(),
            });
            current = vertex;
        }
        polyline.push(receiver);
        Some((polyline, pivots))
    }

    /// Concatenate per-leg cut profiles along a polyline, inserting a pivot
    /// cut point at every junction. Distances become polyline distances.
    fn polyline_profile(&self, polyline: &[DVec3], pivots: &[Pivot]) -> CutProfile {
        debug_assert_eq!(polyline.len(), pivots.len() + 2);
        let relief = &self.scene.relief;
        let last_leg = polyline.len() - 2;
        let mut points: Vec<CutPoint> = Vec::new();
        let mut offset = 0.0;

        for leg in 0..=last_leg {
            let (a, b) = (polyline[leg], polyline[leg + 1]);
            let len = a.truncate().distance(b.truncate());
            if len < geometry::EPSILON {
                continue;
            }
            let direction = (b - a) / len;
            let lead = if leg == 0 {
                0.0
            } else {
                JUNCTION_NUDGE.min(len / 4.0)
            };
            let tail = if leg == last_leg {
                0.0
            } else {
                JUNCTION_NUDGE.min(len / 4.0)
            };
            let profile = relief.cut_profile(a + direction * lead, b - direction * tail);

            if leg == 0 {
                let mut start = profile.points[0].clone();
                start.distance = 0.0;
                points.push(start);
            } else {
                let (kind, alphas) = match &pivots[leg - 1] {
                    Pivot::Reflection {
                        wall,
                        wall_top,
                        alphas,
                    } => (
                        CutPointKind::Reflection {
                            wall: *wall,
                            wall_top: *wall_top,
                        },
                        alphas.clone(),
                    ),
                    Pivot::Lateral => (CutPointKind::LateralDiffraction, Vec::new()),
                };
                points.push(CutPoint {
                    position: a,
                    z_ground: relief.height_at(a.truncate()),
                    g: profile.source().g,
                    distance: offset,
                    kind,
                    alphas,
                });
            }

            for point in &profile.points[1..profile.points.len() - 1] {
                let mut shifted = point.clone();
                shifted.distance = offset + lead + point.distance;
                points.push(shifted);
            }

            if leg == last_leg {
                let mut end = profile.receiver().clone();
                end.distance = offset + len;
                points.push(end);
            }
            offset += len;
        }
        CutProfile { points }
    }
}
