//! Per-site clustering steps: initialization, assignment, centroid update
//! and the local stopping test.

use ahash::AHashSet;
use rand::Rng;

use crate::config::OptimizationMode;
use crate::data::{distance, squared_distance, Dataset, Point};
use crate::error::{DkmError, Result};

/// Sample `k` distinct points of `data` as initial centroids.
pub fn initialize_centroids<R: Rng + ?Sized>(
    data: &Dataset,
    k: usize,
    rng: &mut R,
) -> Result<Vec<Point>> {
    if k == 0 {
        return Err(DkmError::config("k must be at least 1"));
    }

    let mut seen = AHashSet::with_capacity(data.len());
    let distinct: Vec<&Point> = data
        .points()
        .iter()
        .filter(|p| seen.insert(point_key(p)))
        .collect();

    if k > distinct.len() {
        return Err(DkmError::config(format!(
            "k = {} exceeds the {} distinct points available",
            k,
            distinct.len()
        )));
    }

    Ok(rand::seq::index::sample(rng, distinct.len(), k)
        .into_iter()
        .map(|i| distinct[i].clone())
        .collect())
}

// -0.0 and 0.0 compare equal, so fold them to one key
fn point_key(p: &Point) -> Vec<u64> {
    p.iter().map(|v| (v + 0.0).to_bits()).collect()
}

/// Label every point with its nearest centroid; ties go to the lowest index.
pub fn assign_clusters(data: &Dataset, centroids: &[Point]) -> Result<Vec<usize>> {
    check_centroid_shapes(data, centroids)?;

    Ok(data
        .points()
        .iter()
        .map(|p| {
            let mut best = 0;
            let mut best_dist = f64::INFINITY;
            for (j, c) in centroids.iter().enumerate() {
                let d = squared_distance(p, c);
                if d < best_dist {
                    best = j;
                    best_dist = d;
                }
            }
            best
        })
        .collect())
}

/// Lloyd update: each centroid becomes the mean of its assigned points.
/// A centroid with no points keeps its previous value unchanged.
pub fn lloyd_update(data: &Dataset, labels: &[usize], previous: &[Point]) -> Result<Vec<Point>> {
    check_labels(data, labels, previous.len())?;

    let shape = data.shape();
    let mut sums: Vec<Point> = vec![Point::zeros(shape); previous.len()];
    let mut counts = vec![0usize; previous.len()];
    for (p, &label) in data.points().iter().zip(labels) {
        sums[label] += p;
        counts[label] += 1;
    }

    let updated: Vec<Point> = sums
        .into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), prev)| {
            if count == 0 {
                prev.clone()
            } else {
                sum / count as f64
            }
        })
        .collect();

    ensure_finite(&updated, OptimizationMode::Lloyd)?;
    Ok(updated)
}

/// Gradient of the summed squared distance of each cluster's points with
/// respect to its centroid: Σ 2(c - x) over the points assigned to c.
pub fn compute_gradient(data: &Dataset, labels: &[usize], centroids: &[Point]) -> Result<Vec<Point>> {
    check_labels(data, labels, centroids.len())?;

    let mut gradient: Vec<Point> = vec![Point::zeros(data.shape()); centroids.len()];
    for (p, &label) in data.points().iter().zip(labels) {
        gradient[label] += &((&centroids[label] - p) * 2.0);
    }
    Ok(gradient)
}

/// Move every centroid against its gradient: `c - lr * g`.
pub fn gradient_step(gradient: &[Point], centroids: &[Point], learning_rate: f64) -> Result<Vec<Point>> {
    if gradient.len() != centroids.len() {
        return Err(DkmError::config(format!(
            "{} gradients for {} centroids",
            gradient.len(),
            centroids.len()
        )));
    }

    let updated: Vec<Point> = centroids
        .iter()
        .zip(gradient)
        .map(|(c, g)| c - &(g * learning_rate))
        .collect();

    ensure_finite(&updated, OptimizationMode::Gradient)?;
    Ok(updated)
}

/// Apply one centroid update under `mode` to the site's full assignment.
pub fn update_centroids(
    mode: OptimizationMode,
    data: &Dataset,
    labels: &[usize],
    centroids: &[Point],
    learning_rate: f64,
) -> Result<Vec<Point>> {
    match mode {
        OptimizationMode::Lloyd => lloyd_update(data, labels, centroids),
        OptimizationMode::Gradient => {
            let gradient = compute_gradient(data, labels, centroids)?;
            gradient_step(&gradient, centroids, learning_rate)
        }
    }
}

/// Largest displacement between matching centroids, and whether it is below
/// `epsilon`.
pub fn check_stopping(new: &[Point], old: &[Point], epsilon: f64) -> (bool, f64) {
    debug_assert_eq!(new.len(), old.len(), "centroid count changed");
    let delta = new
        .iter()
        .zip(old)
        .map(|(a, b)| distance(a, b))
        .fold(0.0, f64::max);
    (delta < epsilon, delta)
}

pub(crate) fn check_centroid_shapes(data: &Dataset, centroids: &[Point]) -> Result<()> {
    if centroids.is_empty() {
        return Err(DkmError::config("no centroids"));
    }
    let shape = data.shape();
    if let Some((j, c)) = centroids.iter().enumerate().find(|(_, c)| c.dim() != shape) {
        return Err(DkmError::config(format!(
            "centroid {} has shape {:?}, data has {:?}",
            j,
            c.dim(),
            shape
        )));
    }
    Ok(())
}

fn check_labels(data: &Dataset, labels: &[usize], k: usize) -> Result<()> {
    if labels.len() != data.len() {
        return Err(DkmError::config(format!(
            "{} labels for {} points",
            labels.len(),
            data.len()
        )));
    }
    if let Some(&bad) = labels.iter().find(|&&l| l >= k) {
        return Err(DkmError::config(format!("label {} out of range for k = {}", bad, k)));
    }
    Ok(())
}

fn ensure_finite(centroids: &[Point], mode: OptimizationMode) -> Result<()> {
    match centroids.iter().position(|c| c.iter().any(|v| !v.is_finite())) {
        Some(j) => Err(DkmError::Numeric(format!(
            "{} update produced a non-finite centroid {}",
            mode, j
        ))),
        None => Ok(()),
    }
}
