//! Run and site configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DkmError, Result};

/// Centroid update rule applied at every site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    /// Replace each centroid by the mean of its assigned points
    #[default]
    Lloyd,
    /// Step each centroid against the gradient of its summed squared distance
    Gradient,
}

impl fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lloyd => write!(f, "lloyd"),
            Self::Gradient => write!(f, "gradient"),
        }
    }
}

impl FromStr for OptimizationMode {
    type Err = DkmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lloyd" => Ok(Self::Lloyd),
            "gradient" => Ok(Self::Gradient),
            other => Err(DkmError::config(format!(
                "unknown optimization '{}', expected lloyd or gradient",
                other
            ))),
        }
    }
}

/// Parameters of an in-process run over all sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Clusters per site and in the global result (default: 5)
    pub k: usize,
    pub optimization: OptimizationMode,
    /// Number of sites the dataset is split over (default: 2)
    pub sites: usize,
    /// Convergence threshold on max centroid displacement (default: 1e-5)
    pub epsilon: f64,
    /// Randomly permute the dataset before splitting it (default: true)
    pub shuffle: bool,
    /// Gradient step size, unused by Lloyd (default: 0.01)
    pub learning_rate: f64,
    /// Abort if the sites have not all converged after this many rounds (default: 1000)
    pub max_rounds: usize,
    /// Stop recomputing sites that already converged (default: false)
    pub freeze_converged: bool,
    /// Seed for partitioning and centroid initialization; entropy when unset
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            k: 5,
            optimization: OptimizationMode::Lloyd,
            sites: 2,
            epsilon: 1e-5,
            shuffle: true,
            learning_rate: 0.01,
            max_rounds: 1000,
            freeze_converged: false,
            seed: None,
        }
    }
}

impl RunConfig {
    /// Check ranges that do not depend on the data.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(DkmError::config("k must be at least 1"));
        }
        if self.sites == 0 {
            return Err(DkmError::config("site count must be at least 1"));
        }
        validate_epsilon(self.epsilon)?;
        validate_learning_rate(self.learning_rate)?;
        if self.max_rounds == 0 {
            return Err(DkmError::config("max_rounds must be at least 1"));
        }
        Ok(())
    }
}

pub(crate) fn validate_epsilon(epsilon: f64) -> Result<()> {
    if !(epsilon.is_finite() && epsilon > 0.0) {
        return Err(DkmError::config(format!(
            "epsilon must be a positive finite number, got {}",
            epsilon
        )));
    }
    Ok(())
}

pub(crate) fn validate_learning_rate(learning_rate: f64) -> Result<()> {
    if !(learning_rate.is_finite() && learning_rate >= 0.0) {
        return Err(DkmError::config(format!(
            "learning rate must be a non-negative finite number, got {}",
            learning_rate
        )));
    }
    Ok(())
}

/// Configuration persisted by a site when its environment is initialized.
/// Written once; later initializations leave it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub k: usize,
    pub optimization: OptimizationMode,
    pub shuffle: bool,
    /// Reference resolved by the site's dataset source
    pub data_ref: String,
    pub learning_rate: f64,
    /// Local stopping threshold
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_epsilon() -> f64 {
    SiteConfig::DEFAULT_EPSILON
}

/// Optional overrides carried by the environment-initialization message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteInit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl SiteConfig {
    pub const DEFAULT_K: usize = 5;
    pub const DEFAULT_LEARNING_RATE: f64 = 0.001;
    pub const DEFAULT_EPSILON: f64 = 1e-5;

    /// Site config for `data_ref`, applying `init` over the defaults.
    pub fn from_init(data_ref: impl Into<String>, init: &SiteInit) -> Result<Self> {
        let config = Self {
            k: init.k.unwrap_or(Self::DEFAULT_K),
            optimization: init.optimization.unwrap_or_default(),
            shuffle: init.shuffle.unwrap_or(true),
            data_ref: data_ref.into(),
            learning_rate: init.learning_rate.unwrap_or(Self::DEFAULT_LEARNING_RATE),
            epsilon: init.epsilon.unwrap_or(Self::DEFAULT_EPSILON),
            seed: init.seed,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(DkmError::config("k must be at least 1"));
        }
        validate_epsilon(self.epsilon)?;
        validate_learning_rate(self.learning_rate)
    }
}

impl From<&RunConfig> for SiteInit {
    fn from(run: &RunConfig) -> Self {
        Self {
            k: Some(run.k),
            optimization: Some(run.optimization),
            shuffle: Some(run.shuffle),
            learning_rate: Some(run.learning_rate),
            epsilon: Some(run.epsilon),
            seed: run.seed,
        }
    }
}
