//! Local optimization at a single site
//!
//! Each site clusters only its own partition. A round is strictly
//! sequential within the site:
//!
//! ```text
//! INIT → CLUSTERING → UPDATING → STOPPING_CHECK → CLUSTERING ...
//!                                              ↘ CONVERGED
//! ```
//!
//! Two update rules are supported:
//!
//! - **Lloyd**: centroid = mean of its assigned points; empty clusters keep
//!   their previous centroid
//! - **Gradient**: centroid ← centroid − lr · Σ 2(centroid − x)
//!
//! Both are idempotent at a fixed point, which is what makes freezing
//! converged sites safe.

mod ops;
mod site;

pub use ops::{
    assign_clusters, check_stopping, compute_gradient, gradient_step, initialize_centroids,
    lloyd_update, update_centroids,
};
pub(crate) use ops::check_centroid_shapes;
pub use site::{OptimizerState, SiteOptimizer, SiteRound};
