//! Lloyd's algorithm with optional k-means++ seeding, used as the GMM's
//! initialisation bootstrap (§4.3). Generalised from the teacher's
//! `clustering::KMeansHelper` (which wraps the external `clustering` crate
//! for gap-statistic model selection over a fixed `Analysis` feature
//! vector) into a hand-rolled routine over arbitrary-dimension `ndarray`
//! point clouds: the gap statistic's "pick k" problem does not arise here
//! (the GMM engine is always given `K` explicitly), but the exact
//! fractional re-assignment convergence test and k-means++ seeding this
//! module needs have no equivalent in the wrapped `clustering` crate.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use crate::config::KMeansConfig;

#[derive(Clone, Debug)]
pub struct KMeansResult {
    pub centroids: Array2<f64>,
    pub assignments: Vec<usize>,
}

/// Run Lloyd's algorithm over `data` (rows = points) with `k` clusters.
///
/// `rng` drives both the initial seed choice and (if enabled) k-means++
/// sampling, so results are reproducible given the same seed.
pub fn kmeans(data: &Array2<f64>, k: usize, config: &KMeansConfig, rng: &mut StdRng) -> KMeansResult {
    let n = data.nrows();
    assert!(n > 0 && k > 0 && k <= n, "kmeans requires 0 < k <= n points");

    let mut centroids = if config.use_kmeans_plus_plus {
        kmeans_plus_plus_init(data, k, rng)
    } else {
        uniform_init(data, k, rng)
    };

    let mut assignments = vec![0usize; n];
    for _ in 0..config.max_iterations {
        let mut changed = 0usize;
        for i in 0..n {
            let point = data.row(i);
            let new_assignment = nearest_centroid(&point, &centroids);
            if new_assignment != assignments[i] {
                changed += 1;
            }
            assignments[i] = new_assignment;
        }

        centroids = recompute_centroids(data, &assignments, k, &centroids);

        let fraction_reassigned = changed as f64 / n as f64;
        if fraction_reassigned < config.reassignment_threshold {
            break;
        }
    }

    KMeansResult {
        centroids,
        assignments,
    }
}

fn nearest_centroid(point: &ArrayView1<f64>, centroids: &Array2<f64>) -> usize {
    centroids
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, c)| (i, squared_distance(point, &c)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn uniform_init(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = data.nrows();
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k.min(n) {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    let rows: Vec<ArrayView1<f64>> = indices[..k].iter().map(|&i| data.row(i)).collect();
    ndarray::stack(Axis(0), &rows).expect("uniform seed selection is in-bounds")
}

fn kmeans_plus_plus_init(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = data.nrows();
    let mut chosen = vec![rng.gen_range(0..n)];

    while chosen.len() < k {
        let mut weights = vec![0.0; n];
        for i in 0..n {
            let point = data.row(i);
            let d = chosen
                .iter()
                .map(|&c| squared_distance(&point, &data.row(c)))
                .fold(f64::INFINITY, f64::min);
            weights[i] = d;
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            // all remaining points coincide with a chosen centroid
            let remaining = (0..n).find(|i| !chosen.contains(i)).unwrap_or(0);
            chosen.push(remaining);
            continue;
        }
        let target = rng.gen_range(0.0..total);
        let mut acc = 0.0;
        let mut pick = n - 1;
        for (i, &w) in weights.iter().enumerate() {
            acc += w;
            if acc >= target {
                pick = i;
                break;
            }
        }
        chosen.push(pick);
    }

    let rows: Vec<ArrayView1<f64>> = chosen.iter().map(|&i| data.row(i)).collect();
    ndarray::stack(Axis(0), &rows).expect("k-means++ seed selection is in-bounds")
}

fn recompute_centroids(
    data: &Array2<f64>,
    assignments: &[usize],
    k: usize,
    previous: &Array2<f64>,
) -> Array2<f64> {
    let dim = data.ncols();
    let mut sums = Array2::<f64>::zeros((k, dim));
    let mut counts = vec![0usize; k];
    for (i, &c) in assignments.iter().enumerate() {
        let mut row = sums.row_mut(c);
        row += &data.row(i);
        counts[c] += 1;
    }
    for c in 0..k {
        if counts[c] > 0 {
            let mut row = sums.row_mut(c);
            row /= counts[c] as f64;
        } else {
            // an emptied cluster keeps its previous centroid rather than
            // collapsing to the origin
            let mut row = sums.row_mut(c);
            row.assign(&previous.row(c));
        }
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;

    #[test]
    fn recovers_two_well_separated_clusters() {
        let mut rng = StdRng::seed_from_u64(42);
        let n_per_cluster = 200;
        let dim = 8;
        let mu1 = Array1::from_elem(dim, 0.0);
        let mut mu2 = Array1::from_elem(dim, 0.0);
        mu2[0] = 3.0;

        let mut rows = Vec::new();
        for _ in 0..n_per_cluster {
            rows.push(mu1.clone() + noise(dim, &mut rng));
        }
        for _ in 0..n_per_cluster {
            rows.push(mu2.clone() + noise(dim, &mut rng));
        }
        let views: Vec<_> = rows.iter().map(Array1::view).collect();
        let data = ndarray::stack(Axis(0), &views).unwrap();

        let config = KMeansConfig {
            max_iterations: 500,
            reassignment_threshold: 0.002,
            use_kmeans_plus_plus: true,
        };
        let result = kmeans(&data, 2, &config, &mut rng);

        let found_near = |target: &Array1<f64>| {
            result
                .centroids
                .axis_iter(Axis(0))
                .any(|c| squared_distance(&c, &target.view()).sqrt() < 0.5)
        };
        assert!(found_near(&mu1));
        assert!(found_near(&mu2));
    }

    fn noise(dim: usize, rng: &mut StdRng) -> Array1<f64> {
        Array1::from_shape_fn(dim, |_| rng.gen_range(-0.2..0.2))
    }

    #[test]
    fn converges_within_iteration_cap() {
        let mut rng = StdRng::seed_from_u64(1);
        let data = Array2::from_shape_fn((50, 3), |(i, j)| (i as f64 + j as f64) % 7.0);
        let config = KMeansConfig {
            max_iterations: 500,
            reassignment_threshold: 0.002,
            use_kmeans_plus_plus: false,
        };
        let result = kmeans(&data, 3, &config, &mut rng);
        assert_eq!(result.assignments.len(), 50);
    }
}
