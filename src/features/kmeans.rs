//! Seeded k-means clustering (k-means++ seeding + Lloyd iterations).
//!
//! Used for unsupervised labeling. All randomness comes from one `StdRng`
//! seeded with `random_state`, so identical inputs give identical labels.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansParams {
    pub n_clusters: usize,
    /// Number of independent seedings; the lowest-inertia run wins.
    pub n_init: usize,
    pub max_iter: usize,
    /// Convergence tolerance, relative to the mean per-feature variance.
    pub tol: f64,
    pub random_state: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            n_clusters: 2,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            random_state: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub centroids: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
    /// Sum of squared distances of points to their assigned centroid.
    pub inertia: f64,
    pub n_iter: usize,
}

/// Cluster `points` (rows of equal length) into `params.n_clusters` groups.
pub fn fit_kmeans(points: &[Vec<f64>], params: &KMeansParams) -> Result<KMeansFit, AppError> {
    let k = params.n_clusters;
    if k == 0 {
        return Err(AppError::config("`n_clusters` must be at least 1."));
    }
    if points.len() < k {
        return Err(AppError::data(format!(
            "Cannot form {k} clusters from {} complete rows.",
            points.len()
        )));
    }
    let dim = points[0].len();
    if dim == 0 {
        return Err(AppError::data("Clustering requires at least one numeric column."));
    }
    if points.iter().flatten().any(|v| !v.is_finite()) {
        return Err(AppError::data("Clustering input contains non-finite values."));
    }

    let tol = params.tol * mean_variance(points, dim);
    let mut rng = StdRng::seed_from_u64(params.random_state);

    let mut best: Option<KMeansFit> = None;
    for _ in 0..params.n_init.max(1) {
        let seeds = kmeans_plus_plus(points, k, &mut rng);
        let fit = lloyd(points, seeds, params.max_iter.max(1), tol);
        let better = best.as_ref().map(|b| fit.inertia < b.inertia).unwrap_or(true);
        if better {
            best = Some(fit);
        }
    }

    best.ok_or_else(|| AppError::data("k-means produced no fit."))
}

fn kmeans_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..n)].clone());

    let mut d2: Vec<f64> = points.iter().map(|p| sq_dist(p, &centroids[0])).collect();
    while centroids.len() < k {
        let total: f64 = d2.iter().sum();
        let idx = if total > 0.0 {
            let target = rng.gen_range(0.0..total);
            let mut acc = 0.0;
            d2.iter()
                .position(|&d| {
                    acc += d;
                    acc > target
                })
                .unwrap_or(n - 1)
        } else {
            // All points coincide with existing centroids.
            rng.gen_range(0..n)
        };

        let c = points[idx].clone();
        for (d, p) in d2.iter_mut().zip(points) {
            *d = d.min(sq_dist(p, &c));
        }
        centroids.push(c);
    }
    centroids
}

fn lloyd(points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, max_iter: usize, tol: f64) -> KMeansFit {
    let k = centroids.len();
    let dim = points[0].len();
    let mut labels = vec![0usize; points.len()];
    let mut n_iter = 0;

    for iter in 0..max_iter {
        n_iter = iter + 1;
        assign(points, &centroids, &mut labels);

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (p, &l) in points.iter().zip(&labels) {
            counts[l] += 1;
            for (s, v) in sums[l].iter_mut().zip(p) {
                *s += v;
            }
        }

        let mut next: Vec<Vec<f64>> = sums
            .into_iter()
            .zip(&counts)
            .map(|(s, &c)| {
                if c == 0 {
                    s
                } else {
                    s.into_iter().map(|v| v / c as f64).collect()
                }
            })
            .collect();

        // Re-seed empty clusters with the point farthest from its centroid.
        for (j, &c) in counts.iter().enumerate() {
            if c == 0 {
                if let Some(far) = farthest_point(points, &centroids, &labels) {
                    next[j] = points[far].clone();
                }
            }
        }

        let shift: f64 = centroids.iter().zip(&next).map(|(a, b)| sq_dist(a, b)).sum();
        centroids = next;
        if shift <= tol {
            break;
        }
    }

    assign(points, &centroids, &mut labels);
    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, &l)| sq_dist(p, &centroids[l]))
        .sum();

    KMeansFit {
        centroids,
        labels,
        inertia,
        n_iter,
    }
}

fn assign(points: &[Vec<f64>], centroids: &[Vec<f64>], labels: &mut [usize]) {
    for (p, label) in points.iter().zip(labels.iter_mut()) {
        *label = nearest(p, centroids);
    }
}

fn nearest(p: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (j, c) in centroids.iter().enumerate() {
        let d = sq_dist(p, c);
        if d < best_d {
            best = j;
            best_d = d;
        }
    }
    best
}

fn farthest_point(points: &[Vec<f64>], centroids: &[Vec<f64>], labels: &[usize]) -> Option<usize> {
    points
        .iter()
        .zip(labels)
        .map(|(p, &l)| sq_dist(p, &centroids[l]))
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}

fn sq_dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn mean_variance(points: &[Vec<f64>], dim: usize) -> f64 {
    let n = points.len() as f64;
    let total: f64 = (0..dim)
        .map(|j| {
            let mean = points.iter().map(|p| p[j]).sum::<f64>() / n;
            points.iter().map(|p| (p[j] - mean).powi(2)).sum::<f64>() / n
        })
        .sum();
    total / dim as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Vec<f64>> {
        let mut pts = Vec::new();
        for i in 0..10 {
            let d = i as f64 * 0.1;
            pts.push(vec![0.0 + d, 0.0 - d]);
            pts.push(vec![50.0 + d, 50.0 - d]);
        }
        pts
    }

    #[test]
    fn separates_two_blobs() {
        let pts = blobs();
        let fit = fit_kmeans(&pts, &KMeansParams::default()).unwrap();
        assert_eq!(fit.labels.len(), pts.len());
        // Points alternate blob A / blob B.
        let a = fit.labels[0];
        let b = fit.labels[1];
        assert_ne!(a, b);
        for (i, &l) in fit.labels.iter().enumerate() {
            assert_eq!(l, if i % 2 == 0 { a } else { b });
        }
    }

    #[test]
    fn same_seed_same_labels() {
        let pts = blobs();
        let params = KMeansParams {
            n_clusters: 3,
            ..KMeansParams::default()
        };
        let a = fit_kmeans(&pts, &params).unwrap();
        let b = fit_kmeans(&pts, &params).unwrap();
        assert_eq!(a.labels, b.labels);
        assert!(a.labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn too_few_rows_is_data_error() {
        let err = fit_kmeans(&[vec![1.0]], &KMeansParams::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
    }

    #[test]
    fn identical_points_do_not_panic() {
        let pts = vec![vec![1.0, 1.0]; 5];
        let fit = fit_kmeans(&pts, &KMeansParams::default()).unwrap();
        assert!(fit.inertia.abs() < 1e-12);
    }
}
