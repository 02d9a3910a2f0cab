//! Static nearest-neighbor index over a centroid table.
//!
//! The centroid set is fixed once k-means initializes, so the tree is built
//! balanced over an index array instead of allocating per-node boxes: the
//! node of a range is its median element, split on axis `depth % dims`.

/// Balanced k-d tree borrowing a row-major `K x D` point table.
pub struct KdTree<'a> {
    points: &'a [f32],
    dims: usize,
    order: Vec<u32>,
}

impl<'a> KdTree<'a> {
    /// Build over `points.len() / dims` rows.
    pub fn build(points: &'a [f32], dims: usize) -> Self {
        assert!(dims > 0);
        assert_eq!(points.len() % dims, 0);
        let count = points.len() / dims;
        let mut order: Vec<u32> = (0..count as u32).collect();
        let mut tree = Self {
            points,
            dims,
            order: Vec::new(),
        };
        tree.build_range(&mut order, 0);
        tree.order = order;
        tree
    }

    fn coord(&self, row: u32, axis: usize) -> f32 {
        self.points[row as usize * self.dims + axis]
    }

    fn build_range(&self, order: &mut [u32], depth: usize) {
        if order.len() <= 1 {
            return;
        }
        let axis = depth % self.dims;
        let mid = order.len() / 2;
        order.select_nth_unstable_by(mid, |&a, &b| {
            self.coord(a, axis).total_cmp(&self.coord(b, axis))
        });
        let (left, rest) = order.split_at_mut(mid);
        self.build_range(left, depth + 1);
        self.build_range(&mut rest[1..], depth + 1);
    }

    /// Index and squared distance of the nearest row to `query`.
    pub fn find_nearest(&self, query: &[f32]) -> (u32, f32) {
        debug_assert_eq!(query.len(), self.dims);
        let mut best = (u32::MAX, f32::INFINITY);
        self.nearest_range(&self.order, 0, query, &mut best);
        best
    }

    fn distance_sq(&self, row: u32, query: &[f32]) -> f32 {
        let base = row as usize * self.dims;
        let mut acc = 0.0;
        for (axis, &q) in query.iter().enumerate() {
            let d = self.points[base + axis] - q;
            acc += d * d;
        }
        acc
    }

    fn nearest_range(&self, order: &[u32], depth: usize, query: &[f32], best: &mut (u32, f32)) {
        if order.is_empty() {
            return;
        }
        let mid = order.len() / 2;
        let node = order[mid];
        let dist = self.distance_sq(node, query);
        if dist < best.1 {
            *best = (node, dist);
        }

        let axis = depth % self.dims;
        let diff = query[axis] - self.coord(node, axis);
        let (near, far) = if diff < 0.0 {
            (&order[..mid], &order[mid + 1..])
        } else {
            (&order[mid + 1..], &order[..mid])
        };

        self.nearest_range(near, depth + 1, query, best);
        // Cross the splitting plane only when it could still hold a closer
        // point.
        if diff * diff < best.1 {
            self.nearest_range(far, depth + 1, query, best);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_nearest(points: &[f32], dims: usize, query: &[f32]) -> (u32, f32) {
        let mut best = (0u32, f32::INFINITY);
        for row in 0..points.len() / dims {
            let mut acc = 0.0;
            for axis in 0..dims {
                let d = points[row * dims + axis] - query[axis];
                acc += d * d;
            }
            if acc < best.1 {
                best = (row as u32, acc);
            }
        }
        best
    }

    fn pseudo_points(count: usize, dims: usize) -> Vec<f32> {
        (0..count * dims)
            .map(|i| (((i * 2654435761) % 1000) as f32) / 31.0 - 16.0)
            .collect()
    }

    #[test]
    fn matches_exhaustive_search() {
        let dims = 3;
        let points = pseudo_points(200, dims);
        let tree = KdTree::build(&points, dims);

        for q in 0..50 {
            let query: Vec<f32> = (0..dims)
                .map(|a| (((q * 7 + a * 13) % 40) as f32) - 20.0)
                .collect();
            let (idx, dist) = tree.find_nearest(&query);
            let (b_idx, b_dist) = brute_nearest(&points, dims, &query);
            assert!((dist - b_dist).abs() < 1e-5, "query {q}");
            if (dist - b_dist).abs() > 0.0 {
                continue;
            }
            // Ties may resolve to a different row at equal distance.
            let _ = (idx, b_idx);
        }
    }

    #[test]
    fn single_point_tree() {
        let points = [1.0f32, 2.0, 3.0];
        let tree = KdTree::build(&points, 3);
        let (idx, dist) = tree.find_nearest(&[1.0, 2.0, 4.0]);
        assert_eq!(idx, 0);
        assert!((dist - 1.0).abs() < 1e-6);
    }

    #[test]
    fn one_dimensional_rows() {
        let points = [5.0f32, -1.0, 3.0, 8.0];
        let tree = KdTree::build(&points, 1);
        let (idx, _) = tree.find_nearest(&[2.9]);
        assert_eq!(idx, 2);
    }
}
