//! Decentralized k-means core
//!
//! Sites cluster their own share of the data independently, in synchronized
//! rounds, until every site's centroids stop moving. The per-site centroids
//! are then merged once into k global centroids ("single-shot"
//! aggregation) and every point is labeled against them.
//!
//! Two ways to run it:
//!
//! - [`singleshot::run`]: everything in process, sites as values
//! - [`phase`]: a message protocol between a remote role and local sites,
//!   with no I/O of its own
//!
//! # Features
//!
//! - `parallel` - Run site rounds on the rayon thread pool
//!
//! # Example
//!
//! ```rust
//! use dkm_core::{run, Dataset, RunConfig, RunContext};
//! use dkm_core::data::vector;
//!
//! let points = (0..20)
//!     .map(|i| vector(&[if i % 2 == 0 { -1.0 } else { 1.0 }, 0.0]))
//!     .collect();
//! let dataset = Dataset::new(points).unwrap();
//!
//! let config = RunConfig {
//!     k: 2,
//!     sites: 2,
//!     shuffle: false,
//!     seed: Some(7),
//!     ..Default::default()
//! };
//! let output = run(&dataset, &config, &RunContext::default()).unwrap();
//! assert_eq!(output.global_centroids.len(), 2);
//! assert_eq!(output.cluster_labels.len(), 20);
//! ```

pub mod aggregate;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod local;
pub mod partition;
pub mod phase;
pub mod singleshot;
pub mod store;

// Re-export main types at crate root
pub use aggregate::aggregate_centroids;
pub use config::{OptimizationMode, RunConfig, SiteConfig, SiteInit};
pub use context::{
    DiagnosticEvent, DiagnosticsSink, RecordingSink, RunContext, SiteContext, SiteState,
    TracingSink,
};
pub use coordinator::{Coordinator, RoundReport};
pub use data::{Dataset, Point};
pub use error::{DkmError, Result};
pub use local::{OptimizerState, SiteOptimizer};
pub use partition::{partition, Partitioning};
pub use phase::{handle_request, PhaseRequest, PhaseResponse, RemoteRole, RemoteStep, SiteSpec};
pub use singleshot::{run, RunOutput};
pub use store::{DatasetSource, MemoryConfigStore, MemoryDatasetSource, SiteConfigStore};
