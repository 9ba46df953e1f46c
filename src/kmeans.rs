//! Seeded k-means with k-means++ initialization.
//!
//! Shared by the IVF coarse quantizer and the product quantizer codebooks.
//! Assignment always uses squared Euclidean distance; the monotone
//! transform preserves nearest-centroid ordering.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::distance::squared_euclidean;

/// Output of one k-means run.
#[derive(Debug)]
pub(crate) struct KMeansResult {
    /// Trained centroids. At most `min(k, points.len())`.
    pub centroids: Vec<Vec<f64>>,

    /// Index of the nearest centroid for each input point.
    pub assignments: Vec<usize>,

    /// Number of Lloyd iterations actually run.
    pub iterations: usize,
}

/// Runs k-means++ initialization followed by Lloyd iterations.
///
/// Stops after `max_iterations` passes, or earlier once the largest
/// centroid coordinate shift in one pass falls below
/// `convergence_threshold`. Clusters that end a pass empty are reseeded
/// to a random member point.
///
/// `k` is capped at the population size; callers that need exactly `k`
/// cells must check `centroids.len()`.
pub(crate) fn run(
    points: &[&[f64]],
    k: usize,
    max_iterations: usize,
    convergence_threshold: f64,
    rng: &mut ChaCha8Rng,
) -> KMeansResult {
    let n = points.len();
    let k = k.min(n);
    if n == 0 || k == 0 {
        return KMeansResult {
            centroids: Vec::new(),
            assignments: Vec::new(),
            iterations: 0,
        };
    }
    let dim = points[0].len();

    let mut centroids = plus_plus_init(points, k, rng);
    let mut assignments = vec![0usize; n];
    let mut iterations = 0;

    for _ in 0..max_iterations {
        iterations += 1;

        // Assignment pass
        for (i, point) in points.iter().enumerate() {
            assignments[i] = nearest_centroid(point, &centroids);
        }

        // Update pass
        let mut sums = vec![vec![0.0f64; dim]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in points.iter().zip(assignments.iter()) {
            counts[cluster] += 1;
            for (s, v) in sums[cluster].iter_mut().zip(point.iter()) {
                *s += v;
            }
        }

        let mut max_shift = 0.0f64;
        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            if counts[cluster] == 0 {
                // Empty cluster: reseed to a random member point
                let pick = rng.gen_range(0..n);
                centroid.clear();
                centroid.extend_from_slice(points[pick]);
                max_shift = f64::INFINITY;
                continue;
            }
            let inv = 1.0 / counts[cluster] as f64;
            for (c, s) in centroid.iter_mut().zip(sums[cluster].iter()) {
                let updated = s * inv;
                let shift = (updated - *c).abs();
                if shift > max_shift {
                    max_shift = shift;
                }
                *c = updated;
            }
        }

        if max_shift < convergence_threshold {
            break;
        }
    }

    // Final assignment against the converged centroids
    for (i, point) in points.iter().enumerate() {
        assignments[i] = nearest_centroid(point, &centroids);
    }

    KMeansResult {
        centroids,
        assignments,
        iterations,
    }
}

/// Returns the index of the centroid nearest to `point`.
pub(crate) fn nearest_centroid(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = squared_euclidean(point, centroid);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// k-means++ seeding: first centroid uniform, each subsequent centroid
/// drawn with probability proportional to its squared distance from the
/// nearest already-chosen centroid.
fn plus_plus_init(points: &[&[f64]], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(k);

    let first = rng.gen_range(0..n);
    centroids.push(points[first].to_vec());

    let mut nearest_sq = vec![0.0f64; n];
    for (i, point) in points.iter().enumerate() {
        nearest_sq[i] = squared_euclidean(point, &centroids[0]);
    }

    while centroids.len() < k {
        let total: f64 = nearest_sq.iter().sum();
        let pick = if total <= f64::EPSILON {
            // All remaining points coincide with chosen centroids
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, w) in nearest_sq.iter().enumerate() {
                target -= w;
                if target <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        centroids.push(points[pick].to_vec());
        let latest = centroids.last().expect("just pushed");
        for (i, point) in points.iter().enumerate() {
            let d = squared_euclidean(point, latest);
            if d < nearest_sq[i] {
                nearest_sq[i] = d;
            }
        }
    }

    centroids
}
