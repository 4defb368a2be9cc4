//! Dataset model and distance metric.
//!
//! Every data point is an m×n matrix. Vectors are represented as 1×n (or m×1)
//! matrices so the same metric, the Frobenius norm of the difference, covers
//! both cases.

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{DkmError, Result};

/// A single data point or centroid.
pub type Point = Array2<f64>;

/// Build a 1×n point from a slice.
pub fn vector(values: &[f64]) -> Point {
    Array2::from_shape_fn((1, values.len()), |(_, j)| values[j])
}

/// Squared Frobenius distance between two points of the same shape.
pub fn squared_distance(a: &Point, b: &Point) -> f64 {
    debug_assert_eq!(a.dim(), b.dim(), "point shape mismatch");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Frobenius (Euclidean for vectors) distance between two points.
pub fn distance(a: &Point, b: &Point) -> f64 {
    squared_distance(a, b).sqrt()
}

/// Ordered, non-empty sequence of equally shaped points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct Dataset {
    points: Vec<Point>,
}

impl Dataset {
    /// Create a dataset, rejecting empty or ragged input.
    pub fn new(points: Vec<Point>) -> Result<Self> {
        let first = points
            .first()
            .ok_or_else(|| DkmError::config("dataset is empty"))?;
        let shape = first.dim();
        if let Some((i, p)) = points.iter().enumerate().find(|(_, p)| p.dim() != shape) {
            return Err(DkmError::config(format!(
                "point {} has shape {:?}, expected {:?}",
                i,
                p.dim(),
                shape
            )));
        }
        Ok(Self { points })
    }

    /// Shape (m, n) shared by every point.
    pub fn shape(&self) -> (usize, usize) {
        self.points[0].dim()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }

    /// New dataset made of the points at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Result<Dataset> {
        let points = indices
            .iter()
            .map(|&i| {
                self.points.get(i).cloned().ok_or_else(|| {
                    DkmError::config(format!("index {} out of range for {} points", i, self.len()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Dataset::new(points)
    }
}

impl TryFrom<Vec<Point>> for Dataset {
    type Error = DkmError;

    fn try_from(points: Vec<Point>) -> Result<Self> {
        Dataset::new(points)
    }
}

impl From<Dataset> for Vec<Point> {
    fn from(dataset: Dataset) -> Self {
        dataset.points
    }
}

/// Parameters of one isotropic Gaussian blob: every entry of a point drawn
/// from the blob is sampled from N(mean, sigma²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    pub mean: f64,
    pub sigma: f64,
}

impl Blob {
    pub fn new(mean: f64, sigma: f64) -> Self {
        Self { mean, sigma }
    }
}

/// Generate `n_points` synthetic m×n points split evenly, in contiguous runs,
/// across `blobs`.
pub fn gaussian_blobs<R: Rng + ?Sized>(
    n_points: usize,
    blobs: &[Blob],
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> Result<Dataset> {
    if blobs.is_empty() {
        return Err(DkmError::config("at least one blob is required"));
    }
    if rows == 0 || cols == 0 {
        return Err(DkmError::config(format!(
            "point shape {}x{} has no entries",
            rows, cols
        )));
    }

    let normals = blobs
        .iter()
        .map(|b| {
            // Normal::new accepts a negative sigma and mirrors the samples
            if !(b.mean.is_finite() && b.sigma.is_finite() && b.sigma >= 0.0) {
                return Err(DkmError::config(format!("invalid blob {:?}", b)));
            }
            Normal::new(b.mean, b.sigma)
                .map_err(|e| DkmError::config(format!("invalid blob {:?}: {}", b, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    let points = (0..n_points)
        .map(|i| {
            let normal = &normals[i * normals.len() / n_points];
            Array2::from_shape_simple_fn((rows, cols), || normal.sample(rng))
        })
        .collect();

    Dataset::new(points)
}
