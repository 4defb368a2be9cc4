//! A single site's optimizer with its state machine.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OptimizationMode;
use crate::data::{Dataset, Point};
use crate::error::{DkmError, Result};
use crate::local::ops::{
    assign_clusters, check_centroid_shapes, check_stopping, initialize_centroids, update_centroids,
};

/// Where a site is within its round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerState {
    /// Centroids chosen, no round run yet
    Init,
    Clustering,
    Updating,
    StoppingCheck,
    Converged,
}

/// Outcome of one site round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SiteRound {
    pub site: usize,
    pub delta: f64,
    pub converged: bool,
}

/// Owns one site's partition and centroids. Holds no cross-site state.
#[derive(Debug, Clone)]
pub struct SiteOptimizer {
    site: usize,
    data: Dataset,
    centroids: Vec<Point>,
    labels: Vec<usize>,
    state: OptimizerState,
    last_delta: Option<f64>,
}

impl SiteOptimizer {
    /// Create a site and sample its initial centroids from its own data.
    pub fn new<R: Rng + ?Sized>(site: usize, data: Dataset, k: usize, rng: &mut R) -> Result<Self> {
        let centroids =
            initialize_centroids(&data, k, rng).map_err(|e| DkmError::at_site(site, e))?;
        Self::with_centroids(site, data, centroids)
    }

    /// Create a site starting from given centroids.
    pub fn with_centroids(site: usize, data: Dataset, centroids: Vec<Point>) -> Result<Self> {
        check_centroid_shapes(&data, &centroids).map_err(|e| DkmError::at_site(site, e))?;
        if centroids.len() > data.len() {
            return Err(DkmError::at_site(
                site,
                DkmError::config(format!(
                    "k = {} exceeds the site's {} points",
                    centroids.len(),
                    data.len()
                )),
            ));
        }
        Ok(Self {
            site,
            data,
            centroids,
            labels: Vec::new(),
            state: OptimizerState::Init,
            last_delta: None,
        })
    }

    /// One CLUSTERING → UPDATING → STOPPING_CHECK pass. A converged site
    /// re-enters CLUSTERING when asked for another round.
    pub fn round(
        &mut self,
        mode: OptimizationMode,
        epsilon: f64,
        learning_rate: f64,
    ) -> Result<SiteRound> {
        self.step(mode, epsilon, learning_rate)
            .map_err(|e| DkmError::at_site(self.site, e))
    }

    fn step(&mut self, mode: OptimizationMode, epsilon: f64, learning_rate: f64) -> Result<SiteRound> {
        self.state = OptimizerState::Clustering;
        self.labels = assign_clusters(&self.data, &self.centroids)?;

        self.state = OptimizerState::Updating;
        let updated = update_centroids(mode, &self.data, &self.labels, &self.centroids, learning_rate)?;

        self.state = OptimizerState::StoppingCheck;
        let (converged, delta) = check_stopping(&updated, &self.centroids, epsilon);
        self.centroids = updated;
        self.last_delta = Some(delta);
        self.state = if converged {
            OptimizerState::Converged
        } else {
            OptimizerState::Clustering
        };

        debug!(site = self.site, delta, converged, "site round complete");
        Ok(SiteRound {
            site: self.site,
            delta,
            converged,
        })
    }

    /// Label this site's points against arbitrary (e.g. global) centroids.
    pub fn assign(&self, centroids: &[Point]) -> Result<Vec<usize>> {
        assign_clusters(&self.data, centroids).map_err(|e| DkmError::at_site(self.site, e))
    }

    pub fn site(&self) -> usize {
        self.site
    }

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn centroids(&self) -> &[Point] {
        &self.centroids
    }

    /// Labels from the most recent round; empty before the first one.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    pub fn is_converged(&self) -> bool {
        self.state == OptimizerState::Converged
    }

    pub fn last_delta(&self) -> Option<f64> {
        self.last_delta
    }
}
