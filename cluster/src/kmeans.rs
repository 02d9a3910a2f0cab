//! Lloyd-style k-means quantizer.
//!
//! Runs a fixed iteration count with no convergence test. Assignment is the
//! pluggable step: the exhaustive CPU scan and the centroid k-d tree live
//! here, and a GPU backend can be supplied through [`AssignBackend`]. All
//! backends agree on labels up to distance ties.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::kdtree::KdTree;
use crate::{Error, Result};

/// Number of centroids above which assignment switches from the exhaustive
/// scan to the k-d tree.
const TREE_THRESHOLD: usize = 64;

/// The nearest-centroid assignment seam.
///
/// Implementations write the index of the nearest centroid (squared
/// Euclidean distance) for every point row into `labels`.
pub trait AssignBackend {
    fn assign(
        &mut self,
        points: &[f32],
        dims: usize,
        centroids: &[f32],
        labels: &mut [u32],
    ) -> Result<()>;
}

/// Quantize `points` (`N x dims`, row-major) into `k` clusters.
///
/// Returns the centroid table (`k x dims`) and one label per point row.
/// When fewer points than clusters exist, the points themselves are the
/// centroids and the labeling is the identity. Initialization picks `k`
/// distinct rows from a seedable generator; iteration runs exactly
/// `iterations` rounds, and clusters that lose every member keep their
/// previous centroid.
pub fn cluster(
    points: &[f32],
    dims: usize,
    k: usize,
    iterations: usize,
    seed: u64,
    mut backend: Option<&mut dyn AssignBackend>,
) -> Result<(Vec<f32>, Vec<u32>)> {
    if dims == 0 || points.len() % dims != 0 {
        return Err(Error::InvalidInput(format!(
            "point table of {} values is not divisible into {dims}-wide rows",
            points.len()
        )));
    }
    if k == 0 {
        return Err(Error::InvalidInput("cluster count must be positive".into()));
    }
    let count = points.len() / dims;

    if count < k {
        let labels = (0..count as u32).collect();
        return Ok((points.to_vec(), labels));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let picks = rand::seq::index::sample(&mut rng, count, k);
    let mut centroids = Vec::with_capacity(k * dims);
    for row in picks.iter() {
        centroids.extend_from_slice(&points[row * dims..(row + 1) * dims]);
    }

    let mut labels = vec![0u32; count];
    for round in 0..iterations {
        match backend.as_deref_mut() {
            Some(gpu) => gpu.assign(points, dims, &centroids, &mut labels)?,
            None => assign_cpu(points, dims, &centroids, &mut labels),
        }
        update_centroids(points, dims, &labels, &mut centroids, k);
        log::debug!("k-means round {}/{} complete", round + 1, iterations);
    }
    // Labels reflect the final centroid positions.
    match backend.as_deref_mut() {
        Some(gpu) => gpu.assign(points, dims, &centroids, &mut labels)?,
        None => assign_cpu(points, dims, &centroids, &mut labels),
    }

    Ok((centroids, labels))
}

/// Exhaustive or tree-accelerated CPU assignment.
pub fn assign_cpu(points: &[f32], dims: usize, centroids: &[f32], labels: &mut [u32]) {
    let k = centroids.len() / dims;
    if k >= TREE_THRESHOLD {
        let tree = KdTree::build(centroids, dims);
        labels
            .par_iter_mut()
            .zip(points.par_chunks(dims))
            .for_each(|(label, point)| {
                *label = tree.find_nearest(point).0;
            });
    } else {
        labels
            .par_iter_mut()
            .zip(points.par_chunks(dims))
            .for_each(|(label, point)| {
                *label = nearest_scan(point, centroids, dims);
            });
    }
}

fn nearest_scan(point: &[f32], centroids: &[f32], dims: usize) -> u32 {
    let mut best = 0u32;
    let mut best_dist = f32::INFINITY;
    for (row, centroid) in centroids.chunks_exact(dims).enumerate() {
        let mut acc = 0.0;
        for (a, b) in point.iter().zip(centroid) {
            let d = a - b;
            acc += d * d;
        }
        if acc < best_dist {
            best_dist = acc;
            best = row as u32;
        }
    }
    best
}

fn update_centroids(points: &[f32], dims: usize, labels: &[u32], centroids: &mut [f32], k: usize) {
    let mut sums = vec![0.0f64; k * dims];
    let mut counts = vec![0u64; k];
    for (row, point) in points.chunks_exact(dims).enumerate() {
        let label = labels[row] as usize;
        counts[label] += 1;
        for (axis, &v) in point.iter().enumerate() {
            sums[label * dims + axis] += v as f64;
        }
    }
    for label in 0..k {
        if counts[label] == 0 {
            continue;
        }
        let inv = 1.0 / counts[label] as f64;
        for axis in 0..dims {
            centroids[label * dims + axis] = (sums[label * dims + axis] * inv) as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_points() -> Vec<f32> {
        // Three separated 1-D blobs.
        let mut points = Vec::new();
        for i in 0..30 {
            points.push(0.0 + (i % 5) as f32 * 0.01);
            points.push(10.0 + (i % 7) as f32 * 0.01);
            points.push(-20.0 + (i % 3) as f32 * 0.01);
        }
        points
    }

    #[test]
    fn labels_argmin_their_centroid() {
        let points = blob_points();
        let (centroids, labels) = cluster(&points, 1, 3, 8, 42, None).unwrap();
        assert_eq!(labels.len(), points.len());
        for (row, point) in points.iter().enumerate() {
            let assigned = labels[row] as usize;
            let assigned_dist = (point - centroids[assigned]).abs();
            for &c in &centroids {
                assert!(
                    assigned_dist <= (point - c).abs() + 1e-6,
                    "row {row} labeled {assigned} but {c} is closer"
                );
            }
        }
    }

    #[test]
    fn fewer_points_than_clusters_short_circuits() {
        let points = [1.0f32, 2.0, 3.0, 4.0];
        let (centroids, labels) = cluster(&points, 2, 5, 10, 0, None).unwrap();
        assert_eq!(centroids, points.to_vec());
        assert_eq!(labels, vec![0, 1]);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let points = blob_points();
        let a = cluster(&points, 1, 4, 5, 7, None).unwrap();
        let b = cluster(&points, 1, 4, 5, 7, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tree_and_scan_assignments_agree() {
        // 100 centroids crosses the tree threshold; compare against the
        // plain scan on distances (labels may differ only on exact ties).
        let dims = 2;
        let points: Vec<f32> = (0..400)
            .map(|i| (((i * 2654435761usize) % 997) as f32) / 10.0)
            .collect();
        let centroids: Vec<f32> = (0..200)
            .map(|i| (((i * 40503usize) % 911) as f32) / 9.0)
            .collect();

        let mut tree_labels = vec![0u32; 200];
        assign_cpu(&points, dims, &centroids, &mut tree_labels);

        for (row, point) in points.chunks_exact(dims).enumerate() {
            let scan = nearest_scan(point, &centroids, dims);
            let tree = tree_labels[row];
            let dist = |label: u32| {
                let c = &centroids[label as usize * dims..(label as usize + 1) * dims];
                point
                    .iter()
                    .zip(c)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
            };
            assert!((dist(scan) - dist(tree)).abs() < 1e-6);
        }
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(cluster(&[1.0, 2.0, 3.0], 2, 1, 1, 0, None).is_err());
        assert!(cluster(&[1.0, 2.0], 1, 0, 1, 0, None).is_err());
    }

    #[test]
    fn empty_clusters_keep_previous_centroids() {
        // Both points sit at the same location; one centroid never wins a
        // member and must keep its initial position.
        let points = [0.0f32, 0.0, 0.0, 0.0];
        let (centroids, labels) = cluster(&points, 2, 2, 3, 1, None).unwrap();
        assert_eq!(centroids.len(), 4);
        assert_eq!(labels.len(), 2);
        for chunk in centroids.chunks_exact(2) {
            assert!(chunk.iter().all(|v| v.is_finite()));
        }
    }
}
