//! Synchronized rounds across all sites.
//!
//! Every round, each site runs assignment, update and its stopping check;
//! the round ends only once all sites have finished (the barrier), and the
//! loop continues while any site is not converged. With the `parallel`
//! feature sites run on the rayon pool.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::{validate_epsilon, validate_learning_rate, OptimizationMode, RunConfig};
use crate::context::{DiagnosticEvent, RunContext};
use crate::data::Point;
use crate::error::{DkmError, Result};
use crate::local::{SiteOptimizer, SiteRound};

/// Per-site results of one synchronized round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    /// 1-based round number
    pub round: usize,
    pub deltas: Vec<f64>,
    pub converged: Vec<bool>,
}

impl RoundReport {
    pub fn all_converged(&self) -> bool {
        self.converged.iter().all(|&c| c)
    }

    pub fn max_delta(&self) -> f64 {
        self.deltas.iter().copied().fold(0.0, f64::max)
    }
}

/// Drives all sites in lockstep until every one has converged.
#[derive(Debug)]
pub struct Coordinator {
    sites: Vec<SiteOptimizer>,
    mode: OptimizationMode,
    epsilon: f64,
    learning_rate: f64,
    max_rounds: usize,
    freeze_converged: bool,
    rounds: usize,
    history: Vec<Vec<f64>>,
}

impl Coordinator {
    pub fn new(sites: Vec<SiteOptimizer>, config: &RunConfig) -> Result<Self> {
        if sites.is_empty() {
            return Err(DkmError::config("no sites to coordinate"));
        }
        validate_epsilon(config.epsilon)?;
        validate_learning_rate(config.learning_rate)?;
        if config.max_rounds == 0 {
            return Err(DkmError::config("max_rounds must be at least 1"));
        }
        Ok(Self {
            sites,
            mode: config.optimization,
            epsilon: config.epsilon,
            learning_rate: config.learning_rate,
            max_rounds: config.max_rounds,
            freeze_converged: config.freeze_converged,
            rounds: 0,
            history: Vec::new(),
        })
    }

    /// Run one round on every site, regardless of convergence flags.
    ///
    /// Converged sites are recomputed unless `freeze_converged` is set, in
    /// which case they report a delta of 0. Any site failure aborts the round
    /// and nothing is appended to the history.
    pub fn run_round(&mut self, ctx: &RunContext<'_>) -> Result<RoundReport> {
        let (mode, epsilon, lr, freeze) =
            (self.mode, self.epsilon, self.learning_rate, self.freeze_converged);
        let step = move |site: &mut SiteOptimizer| -> Result<SiteRound> {
            if freeze && site.is_converged() {
                return Ok(SiteRound {
                    site: site.site(),
                    delta: 0.0,
                    converged: true,
                });
            }
            site.round(mode, epsilon, lr)
        };

        #[cfg(feature = "parallel")]
        let results: Result<Vec<SiteRound>> = self.sites.par_iter_mut().map(step).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Result<Vec<SiteRound>> = self.sites.iter_mut().map(step).collect();
        let results = results?;

        self.rounds += 1;
        let report = RoundReport {
            round: self.rounds,
            deltas: results.iter().map(|r| r.delta).collect(),
            converged: results.iter().map(|r| r.converged).collect(),
        };
        self.history.push(report.deltas.clone());

        ctx.sink.emit(DiagnosticEvent::Round {
            mode: self.mode,
            round: report.round,
            max_delta: report.max_delta(),
            converged_sites: report.converged.iter().filter(|&&c| c).count(),
            sites: self.sites.len(),
        });
        Ok(report)
    }

    /// Run rounds until every site has converged; returns the round count.
    ///
    /// Fails with `RoundLimitExceeded` once `max_rounds` rounds have run
    /// without global convergence.
    pub fn run(&mut self, ctx: &RunContext<'_>) -> Result<usize> {
        loop {
            let report = self.run_round(ctx)?;
            if report.all_converged() {
                info!(
                    "{} sites converged after {} rounds",
                    self.sites.len(),
                    self.rounds
                );
                return Ok(self.rounds);
            }
            if self.rounds >= self.max_rounds {
                warn!(
                    "aborting: {} of {} sites still moving after {} rounds (max delta {})",
                    report.converged.iter().filter(|&&c| !c).count(),
                    self.sites.len(),
                    self.rounds,
                    report.max_delta()
                );
                return Err(DkmError::RoundLimitExceeded {
                    max_rounds: self.max_rounds,
                });
            }
        }
    }

    /// Label every site's data against `centroids`, concatenated in site order.
    pub fn assign_all(&self, centroids: &[Point]) -> Result<Vec<usize>> {
        let mut labels = Vec::new();
        for site in &self.sites {
            labels.extend(site.assign(centroids)?);
        }
        Ok(labels)
    }

    /// Current centroid set of every site.
    pub fn local_centroids(&self) -> Vec<Vec<Point>> {
        self.sites.iter().map(|s| s.centroids().to_vec()).collect()
    }

    pub fn sites(&self) -> &[SiteOptimizer] {
        &self.sites
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Per-round, per-site deltas.
    pub fn history(&self) -> &[Vec<f64>] {
        &self.history
    }

    pub fn into_history(self) -> Vec<Vec<f64>> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RecordingSink;
    use crate::data::{vector, Dataset};

    fn site(id: usize, values: &[f64], centroids: &[f64]) -> SiteOptimizer {
        let data = Dataset::new(values.iter().map(|&v| vector(&[v])).collect()).unwrap();
        let centroids = centroids.iter().map(|&c| vector(&[c])).collect();
        SiteOptimizer::with_centroids(id, data, centroids).unwrap()
    }

    fn config() -> RunConfig {
        RunConfig {
            k: 2,
            epsilon: 1e-9,
            ..Default::default()
        }
    }

    #[test]
    fn loops_until_every_site_converges() {
        let sites = vec![
            site(0, &[0.0, 1.0, 10.0, 11.0], &[0.0, 10.0]),
            site(1, &[0.0, 0.5, 10.0, 10.5], &[0.0, 0.5]),
        ];
        let sink = RecordingSink::new();
        let ctx = RunContext::new(&sink);
        let mut coordinator = Coordinator::new(sites, &config()).unwrap();
        let rounds = coordinator.run(&ctx).unwrap();

        assert_eq!(coordinator.history().len(), rounds);
        assert!(coordinator.history().iter().all(|deltas| deltas.len() == 2));
        assert_eq!(sink.rounds(), (1..=rounds).collect::<Vec<_>>());
        assert!(coordinator.sites().iter().all(SiteOptimizer::is_converged));
    }

    #[test]
    fn converged_sites_keep_recomputing_by_default() {
        let sites = vec![
            site(0, &[0.0, 2.0, 10.0], &[1.0, 10.0]),
            site(1, &[0.0, 1.0, 2.0, 30.0], &[0.0, 2.0]),
        ];
        let ctx = RunContext::default();
        let mut coordinator = Coordinator::new(sites, &config()).unwrap();
        coordinator.run(&ctx).unwrap();
        // Site 0 was already at its fixed point; every round still recorded
        // a real (zero) delta for it.
        assert!(coordinator.history().iter().all(|d| d[0] == 0.0));
    }

    #[test]
    fn frozen_sites_report_zero() {
        let sites = vec![
            site(0, &[0.0, 2.0, 10.0], &[1.0, 10.0]),
            site(1, &[0.0, 1.0, 2.0, 30.0], &[0.0, 2.0]),
        ];
        let frozen = RunConfig {
            freeze_converged: true,
            ..config()
        };
        let ctx = RunContext::default();
        let mut coordinator = Coordinator::new(sites, &frozen).unwrap();
        let rounds = coordinator.run(&ctx).unwrap();
        assert!(rounds >= 2);
        assert!(coordinator.history().iter().all(|d| d[0] == 0.0));
    }

    #[test]
    fn extra_round_after_convergence_is_stable() {
        let sites = vec![
            site(0, &[0.0, 1.0, 10.0, 11.0], &[0.0, 1.0]),
            site(1, &[5.0, 6.0, 20.0, 21.0], &[20.0, 21.0]),
        ];
        let ctx = RunContext::default();
        let mut coordinator = Coordinator::new(sites, &config()).unwrap();
        coordinator.run(&ctx).unwrap();
        let before = coordinator.local_centroids();

        let forced = coordinator.run_round(&ctx).unwrap();
        assert!(forced.all_converged());
        assert_eq!(forced.deltas, vec![0.0, 0.0]);
        assert_eq!(coordinator.local_centroids(), before);
    }

    #[test]
    fn round_limit_aborts() {
        let sites = vec![site(0, &[0.0, 1.0, 10.0, 11.0], &[0.0, 1.0])];
        let limited = RunConfig {
            max_rounds: 1,
            ..config()
        };
        let ctx = RunContext::default();
        let mut coordinator = Coordinator::new(sites, &limited).unwrap();
        assert!(matches!(
            coordinator.run(&ctx),
            Err(DkmError::RoundLimitExceeded { max_rounds: 1 })
        ));
    }

    #[test]
    fn site_failure_aborts_the_round() {
        let sites = vec![
            site(0, &[0.0, 1.0], &[0.0, 1.0]),
            site(1, &[0.0, 1.0], &[-1e300, 1e300]),
        ];
        let diverging = RunConfig {
            optimization: OptimizationMode::Gradient,
            learning_rate: f64::MAX,
            ..config()
        };
        let ctx = RunContext::default();
        let mut coordinator = Coordinator::new(sites, &diverging).unwrap();
        let err = coordinator.run_round(&ctx).unwrap_err();
        assert!(matches!(err.root(), DkmError::Numeric(_)));
        assert!(coordinator.history().is_empty());
        assert_eq!(coordinator.rounds(), 0);
    }
}
