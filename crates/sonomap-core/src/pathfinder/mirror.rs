//! Mirror-receiver index for the specular reflection search.
//!
//! Every candidate reflection sequence corresponds to one node of a forest:
//! the receiver mirrored across a wall panel, then that image mirrored
//! across another panel, and so on up to the configured reflection order.
//! A node's chain of ancestors names the walls a ray must bounce on, in
//! reverse order of traversal; the straight distance from the source to the
//! deepest image equals the unfolded length of the whole reflected path,
//! which makes range pruning exact.

use glam::{DVec2, DVec3};
use relief::{geometry, Bounds, Relief};

/// One receiver image in the reflection forest.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorNode {
    /// Position of the image; `z` is unchanged by mirroring across a
    /// vertical panel.
    pub position: DVec3,
    /// Wall panel that produced this image.
    pub wall: u32,
    /// Index of the parent image, `None` for first-order nodes.
    pub parent: Option<usize>,
    /// Number of reflections this node stands for.
    pub depth: u32,
}

/// All receiver images reachable within the reflection order, stored as a
/// flat arena.
#[derive(Debug, Clone, Default)]
pub struct MirrorForest {
    nodes: Vec<MirrorNode>,
}

impl MirrorForest {
    /// Mirror `receiver` across every wall panel within `max_wall_distance`,
    /// breadth first, up to `order` consecutive reflections.
    ///
    /// A child never reuses its parent's wall: two consecutive bounces on
    /// the same panel cannot happen. Images drifting farther than
    /// `max_wall_distance` from the next candidate panel are pruned, which
    /// bounds the forest even at high orders.
    #[must_use]
    pub fn build(
        relief: &Relief,
        receiver: DVec3,
        order: u32,
        max_wall_distance: f64,
    ) -> Self {
        let mut forest = Self::default();
        if order == 0 {
            return forest;
        }
        let query = Bounds::from_point(receiver.truncate()).expanded_by(max_wall_distance);
        let candidates: Vec<u32> = relief
            .walls_near(&query)
            .into_iter()
            .filter(|&idx| {
                let wall = relief.wall(idx);
                wall.length() > geometry::EPSILON
                    && geometry::point_segment_distance(
                        receiver.truncate(),
                        wall.a(),
                        wall.b(),
                    ) <= max_wall_distance
            })
            .collect();

        let mut frontier: Vec<usize> = Vec::new();
        for &idx in &candidates {
            if let Some(node) = mirror_across(relief, receiver, idx, None, 1) {
                forest.nodes.push(node);
                frontier.push(forest.nodes.len() - 1);
            }
        }
        for _ in 1..order {
            let mut next = Vec::new();
            for parent_index in frontier {
                let parent = forest.nodes[parent_index].clone();
                for &idx in &candidates {
                    if idx == parent.wall {
                        continue;
                    }
                    let wall = relief.wall(idx);
                    let reach = geometry::point_segment_distance(
                        parent.position.truncate(),
                        wall.a(),
                        wall.b(),
                    );
                    if reach > max_wall_distance * f64::from(parent.depth + 1) {
                        continue;
                    }
                    if let Some(node) = mirror_across(
                        relief,
                        parent.position,
                        idx,
                        Some(parent_index),
                        parent.depth + 1,
                    ) {
                        forest.nodes.push(node);
                        next.push(forest.nodes.len() - 1);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        forest
    }

    /// All images, in breadth-first order.
    #[must_use]
    pub fn nodes(&self) -> &[MirrorNode] {
        &self.nodes
    }

    /// Node indices from the given image up to its first-order ancestor.
    ///
    /// The ray from the source aims at the deepest image first, so this is
    /// also the order the walls are hit in.
    #[must_use]
    pub fn chain(&self, index: usize) -> Vec<usize> {
        let mut chain = vec![index];
        let mut current = index;
        while let Some(parent) = self.nodes[current].parent {
            chain.push(parent);
            current = parent;
        }
        chain
    }
}

fn mirror_across(
    relief: &Relief,
    point: DVec3,
    wall_index: u32,
    parent: Option<usize>,
    depth: u32,
) -> Option<MirrorNode> {
    let wall = relief.wall(wall_index);
    let image: DVec2 = geometry::mirror_point(point.truncate(), wall.a(), wall.b());
    // A point on the wall line mirrors onto itself and cannot reflect.
    if image.distance(point.truncate()) < geometry::EPSILON {
        return None;
    }
    Some(MirrorNode {
        position: image.extend(point.z),
        wall: wall_index,
        parent,
        depth,
    })
}
