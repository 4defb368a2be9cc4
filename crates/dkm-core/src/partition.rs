//! Splitting a dataset across sites.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::Dataset;
use crate::error::{DkmError, Result};

/// Assignment of data indices to sites, plus the permutation that produced it.
///
/// `sites[s]` lists original dataset indices owned by site `s`. Concatenating
/// all sites in order yields `permutation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitioning {
    pub permutation: Vec<usize>,
    pub sites: Vec<Vec<usize>>,
}

/// Partition `n` indices over `sites` sites.
///
/// With `shuffle` a uniform random permutation is split into contiguous
/// groups, otherwise the identity permutation is. Group sizes differ by at
/// most one, larger groups first.
pub fn partition<R: Rng + ?Sized>(
    n: usize,
    sites: usize,
    shuffle: bool,
    rng: &mut R,
) -> Result<Partitioning> {
    if sites == 0 {
        return Err(DkmError::config("site count must be at least 1"));
    }
    if sites > n {
        return Err(DkmError::config(format!(
            "site count {} exceeds dataset size {}",
            sites, n
        )));
    }

    let mut permutation: Vec<usize> = (0..n).collect();
    if shuffle {
        permutation.shuffle(rng);
    }

    let base = n / sites;
    let extra = n % sites;
    let mut groups = Vec::with_capacity(sites);
    let mut start = 0;
    for s in 0..sites {
        let len = base + usize::from(s < extra);
        groups.push(permutation[start..start + len].to_vec());
        start += len;
    }

    Ok(Partitioning {
        permutation,
        sites: groups,
    })
}

impl Partitioning {
    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    /// Smallest site size; k may not exceed it.
    pub fn min_site_len(&self) -> usize {
        self.sites.iter().map(Vec::len).min().unwrap_or(0)
    }

    /// Site owning original index `index`.
    pub fn site_of(&self, index: usize) -> Option<usize> {
        self.sites.iter().position(|group| group.contains(&index))
    }

    /// Per-site datasets and the dataset reordered to match them.
    pub fn apply(&self, dataset: &Dataset) -> Result<(Vec<Dataset>, Dataset)> {
        if dataset.len() != self.permutation.len() {
            return Err(DkmError::config(format!(
                "partition covers {} points but dataset has {}",
                self.permutation.len(),
                dataset.len()
            )));
        }
        let nodes = self
            .sites
            .iter()
            .map(|group| dataset.select(group))
            .collect::<Result<Vec<_>>>()?;
        let reordered = dataset.select(&self.permutation)?;
        Ok((nodes, reordered))
    }

    /// Map values aligned with the reordered dataset back to original order.
    pub fn restore_order<T: Clone>(&self, values: &[T]) -> Result<Vec<T>> {
        restore_by_permutation(&self.permutation, values)
    }
}

/// Invert `permutation` over `values`, where `values[i]` belongs to original
/// index `permutation[i]`.
pub(crate) fn restore_by_permutation<T: Clone>(
    permutation: &[usize],
    values: &[T],
) -> Result<Vec<T>> {
    if values.len() != permutation.len() {
        return Err(DkmError::config(format!(
            "expected {} values, got {}",
            permutation.len(),
            values.len()
        )));
    }
    let mut slots: Vec<Option<T>> = vec![None; values.len()];
    for (value, &original) in values.iter().zip(permutation) {
        let slot = slots
            .get_mut(original)
            .ok_or_else(|| DkmError::config(format!("index {} out of range", original)))?;
        *slot = Some(value.clone());
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| DkmError::config(format!("index {} not covered", i))))
        .collect()
}
