//! Spatial index of accepted points for minimum-distance rejection.

use kiddo::{KdTree, SquaredEuclidean};

use crate::point::Position;

/// k-d tree over accepted sample positions.
pub struct SpatialIndex {
    tree: KdTree<f64, 2>,
    len: usize,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self { tree: KdTree::new(), len: 0 }
    }

    pub fn insert(&mut self, id: u64, position: Position) {
        self.tree.add(&position.as_array(), id);
        self.len += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Closest indexed point as `(id, distance)`.
    pub fn nearest(&self, position: Position) -> Option<(u64, f64)> {
        if self.is_empty() {
            return None;
        }
        let hit = self.tree.nearest_one::<SquaredEuclidean>(&position.as_array());
        Some((hit.item, hit.distance.sqrt()))
    }

    /// True when no indexed point is closer than `min_distance`.
    pub fn is_clear(&self, position: Position, min_distance: f64) -> bool {
        if min_distance <= 0.0 {
            return true;
        }
        match self.nearest(position) {
            Some((_, d)) => d >= min_distance,
            None => true,
        }
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}
