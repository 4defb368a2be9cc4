//! Merging per-site centroid sets into one global set.
//!
//! Greedy nearest-pair merge: every local centroid starts as its own group,
//! and the two groups whose means are closest are merged until `k` groups
//! remain. Local centroids are first put in a canonical order (by value, then
//! by site and index) so ties, float summation order and the output order do
//! not depend on how the site sets were supplied.

use std::cmp::Ordering;
use tracing::debug;

use crate::data::{squared_distance, Point};
use crate::error::{DkmError, Result};

struct Group {
    members: Vec<usize>,
    center: Point,
}

/// Merge `sets` (one centroid set per site) into exactly `k` global centroids.
///
/// Sites may report different numbers of centroids; at least `k` are needed
/// in total.
pub fn aggregate_centroids(sets: &[Vec<Point>], k: usize) -> Result<Vec<Point>> {
    if k == 0 {
        return Err(DkmError::config("k must be at least 1"));
    }
    let shape = sets
        .iter()
        .flatten()
        .next()
        .map(Point::dim)
        .ok_or_else(|| DkmError::config("no centroids to aggregate"))?;

    let mut entries: Vec<(&Point, usize, usize)> = Vec::new();
    for (site, set) in sets.iter().enumerate() {
        for (index, c) in set.iter().enumerate() {
            if c.dim() != shape {
                return Err(DkmError::config(format!(
                    "centroid {} of site {} has shape {:?}, expected {:?}",
                    index,
                    site,
                    c.dim(),
                    shape
                )));
            }
            entries.push((c, site, index));
        }
    }
    if entries.len() < k {
        return Err(DkmError::config(format!(
            "cannot merge {} local centroids into {} global centroids",
            entries.len(),
            k
        )));
    }

    entries.sort_by(|a, b| cmp_points(a.0, b.0).then((a.1, a.2).cmp(&(b.1, b.2))));
    let points: Vec<&Point> = entries.iter().map(|e| e.0).collect();

    let mut groups: Vec<Group> = points
        .iter()
        .enumerate()
        .map(|(i, &p)| Group {
            members: vec![i],
            center: p.clone(),
        })
        .collect();

    while groups.len() > k {
        let (a, b) = closest_pair(&groups);
        let absorbed = groups.remove(b);
        let target = &mut groups[a];
        target.members.extend(absorbed.members);
        target.members.sort_unstable();
        target.center = mean_of(&points, &target.members, shape);
        debug!(
            group = a,
            members = target.members.len(),
            remaining = groups.len(),
            "merged centroid groups"
        );
    }

    let mut merged: Vec<Point> = groups.into_iter().map(|g| g.center).collect();
    merged.sort_by(cmp_points);
    Ok(merged)
}

/// Closest pair (a < b); the first pair in index order wins ties.
fn closest_pair(groups: &[Group]) -> (usize, usize) {
    let mut best = (0, 1);
    let mut best_dist = f64::INFINITY;
    for a in 0..groups.len() {
        for b in (a + 1)..groups.len() {
            let d = squared_distance(&groups[a].center, &groups[b].center);
            if d < best_dist {
                best = (a, b);
                best_dist = d;
            }
        }
    }
    best
}

fn mean_of(points: &[&Point], members: &[usize], shape: (usize, usize)) -> Point {
    let mut sum = Point::zeros(shape);
    for &m in members {
        sum += points[m];
    }
    sum / members.len() as f64
}

/// Lexicographic order over entries under `f64::total_cmp`.
fn cmp_points(a: &Point, b: &Point) -> Ordering {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}
