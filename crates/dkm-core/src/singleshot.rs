//! In-process single-shot decentralized k-means.
//!
//! 1. Split the dataset over the sites
//! 2. Each site samples k centroids from its own data
//! 3. Synchronized local rounds until every site has converged
//! 4. Merge the per-site centroids into k global centroids
//! 5. Label every point against the global centroids

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::aggregate_centroids;
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::coordinator::Coordinator;
use crate::data::{Dataset, Point};
use crate::error::{DkmError, Result};
use crate::local::SiteOptimizer;
use crate::partition::{partition, restore_by_permutation};

/// Result of [`run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub global_centroids: Vec<Point>,
    /// One label per point of `reordered_dataset`
    pub cluster_labels: Vec<usize>,
    /// The input dataset in site order
    pub reordered_dataset: Dataset,
    /// `delta_history[round][site]`
    pub delta_history: Vec<Vec<f64>>,
    pub round_count: usize,
    /// `singleshot_<optimization>`
    pub name: String,
    /// `reordered_dataset[i]` is input point `permutation[i]`
    pub permutation: Vec<usize>,
}

impl RunOutput {
    /// Cluster labels in the order of the original input dataset.
    ///
    /// Fails if `permutation` does not cover `cluster_labels` exactly once,
    /// which only happens for a hand-edited or truncated output.
    pub fn labels_in_input_order(&self) -> Result<Vec<usize>> {
        restore_by_permutation(&self.permutation, &self.cluster_labels)
    }
}

/// Cluster `dataset` across `config.sites` sites and merge the result.
pub fn run(dataset: &Dataset, config: &RunConfig, ctx: &RunContext<'_>) -> Result<RunOutput> {
    config.validate()?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let partitioning = partition(dataset.len(), config.sites, config.shuffle, &mut rng)?;
    if config.k > partitioning.min_site_len() {
        return Err(DkmError::config(format!(
            "k = {} exceeds the smallest site ({} points)",
            config.k,
            partitioning.min_site_len()
        )));
    }
    let (nodes, reordered_dataset) = partitioning.apply(dataset)?;

    let sites = nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| SiteOptimizer::new(i, node, config.k, &mut rng))
        .collect::<Result<Vec<_>>>()?;

    info!(
        "Single-Shot {}: {} points, {} sites, k = {}",
        config.optimization,
        dataset.len(),
        config.sites,
        config.k
    );

    let mut coordinator = Coordinator::new(sites, config)?;
    let round_count = coordinator.run(ctx)?;

    let global_centroids = aggregate_centroids(&coordinator.local_centroids(), config.k)?;
    let cluster_labels = coordinator.assign_all(&global_centroids)?;

    Ok(RunOutput {
        global_centroids,
        cluster_labels,
        reordered_dataset,
        delta_history: coordinator.into_history(),
        round_count,
        name: format!("singleshot_{}", config.optimization),
        permutation: partitioning.permutation,
    })
}
