//! Remote role: drives every site through the phase protocol.
//!
//! [`RemoteRole`] performs no I/O. It hands out requests, takes back one
//! response per site, and decides what to send next. The caller owns the
//! transport.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::aggregate_centroids;
use crate::config::{RunConfig, SiteInit};
use crate::context::{DiagnosticEvent, RunContext, SiteState};
use crate::data::Point;
use crate::error::{DkmError, Result};
use crate::phase::message::{
    InboundMessage, PhaseOutput, PhaseRequest, PhaseResponse, RemotePhase,
};

/// A site taking part in the protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteSpec {
    pub state: SiteState,
    /// Reference the site resolves to its local dataset
    pub data_ref: String,
}

impl SiteSpec {
    pub fn new(state: SiteState, data_ref: impl Into<String>) -> Self {
        Self {
            state,
            data_ref: data_ref.into(),
        }
    }
}

/// Final result of a protocol run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOutcome {
    pub global_centroids: Vec<Point>,
    /// Labels per site, in site order
    pub cluster_labels: Vec<Vec<usize>>,
    /// `delta_history[round][site]`
    pub delta_history: Vec<Vec<f64>>,
    pub round_count: usize,
}

/// What the caller should do after feeding a batch of responses.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteStep {
    /// Deliver these requests, one per site, and return the responses
    Continue(Vec<PhaseRequest>),
    Finished(RemoteOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitNoop,
    AwaitInitCentroids,
    AwaitClustering,
    AwaitOptimizer,
    AwaitFinalLabels,
    Done,
}

impl Stage {
    /// Local output expected from every site at this stage.
    fn expected(self) -> &'static str {
        match self {
            Stage::AwaitNoop => "local_noop",
            Stage::AwaitInitCentroids => "local_init_centroids",
            Stage::AwaitClustering => "local_compute_clustering",
            Stage::AwaitOptimizer => "local_compute_optimizer",
            Stage::AwaitFinalLabels | Stage::Done => "local_aggregate_output",
        }
    }
}

/// Sans-IO coordinator of the phase protocol.
#[derive(Debug)]
pub struct RemoteRole {
    config: RunConfig,
    sites: Vec<SiteSpec>,
    stage: Stage,
    config_refs: Vec<String>,
    global_centroids: Vec<Point>,
    rounds: usize,
    history: Vec<Vec<f64>>,
}

impl RemoteRole {
    pub fn new(config: RunConfig, sites: Vec<SiteSpec>) -> Result<Self> {
        config.validate()?;
        if sites.is_empty() {
            return Err(DkmError::config("no sites to coordinate"));
        }
        for (i, site) in sites.iter().enumerate() {
            if sites[..i].iter().any(|s| s.state.site_id == site.state.site_id) {
                return Err(DkmError::config(format!(
                    "duplicate site id '{}'",
                    site.state.site_id
                )));
            }
        }
        Ok(Self {
            config,
            sites,
            stage: Stage::AwaitNoop,
            config_refs: Vec::new(),
            global_centroids: Vec::new(),
            rounds: 0,
            history: Vec::new(),
        })
    }

    /// Opening requests: a phase-less message to every site.
    pub fn start(&self) -> Vec<PhaseRequest> {
        self.sites
            .iter()
            .map(|site| InboundMessage::Start.into_request(site.state.clone()))
            .collect()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn sites(&self) -> &[SiteSpec] {
        &self.sites
    }

    /// Consume one response per site and decide the next step.
    pub fn on_round(
        &mut self,
        responses: Vec<PhaseResponse>,
        ctx: &RunContext<'_>,
    ) -> Result<RemoteStep> {
        if self.stage == Stage::Done {
            return Err(finished());
        }
        let outputs = self.collate(responses)?;

        match self.stage {
            Stage::AwaitNoop => {
                for output in &outputs {
                    self.expect(matches!(output, PhaseOutput::LocalNoop), output)?;
                }
                Ok(self.advance(Stage::AwaitInitCentroids, |role, i| {
                    let mut init = SiteInit::from(&role.config);
                    init.seed = role.config.seed.map(|s| s.wrapping_add(i as u64));
                    InboundMessage::InitEnv {
                        raw_data_ref: role.sites[i].data_ref.clone(),
                        init,
                    }
                }))
            }
            Stage::AwaitInitCentroids => {
                let mut local = Vec::with_capacity(outputs.len());
                let mut refs = Vec::with_capacity(outputs.len());
                for output in outputs {
                    match output {
                        PhaseOutput::LocalInitCentroids {
                            config_ref,
                            centroids,
                        } => {
                            refs.push(config_ref);
                            local.push(centroids);
                        }
                        other => return Err(self.unexpected(&other)),
                    }
                }
                self.config_refs = refs;
                let mut local = local.into_iter();
                Ok(self.advance(Stage::AwaitClustering, |role, i| {
                    InboundMessage::InitCentroids {
                        config_ref: role.config_refs[i].clone(),
                        remote_centroids: local.next().unwrap_or_default(),
                    }
                }))
            }
            Stage::AwaitClustering => {
                let mut steps = Vec::with_capacity(outputs.len());
                for output in outputs {
                    match output {
                        PhaseOutput::LocalComputeClustering {
                            config_ref,
                            remote_centroids,
                            cluster_labels,
                        } => steps.push((config_ref, remote_centroids, cluster_labels)),
                        other => return Err(self.unexpected(&other)),
                    }
                }
                let mut steps = steps.into_iter();
                Ok(self.advance(Stage::AwaitOptimizer, |_, _| {
                    let (config_ref, remote_centroids, cluster_labels) =
                        steps.next().unwrap_or_default();
                    InboundMessage::OptimizationStep {
                        config_ref,
                        remote_centroids,
                        cluster_labels,
                    }
                }))
            }
            Stage::AwaitOptimizer => self.on_optimizer(outputs, ctx),
            Stage::AwaitFinalLabels => {
                let mut cluster_labels = Vec::with_capacity(outputs.len());
                for output in outputs {
                    match output {
                        PhaseOutput::LocalAggregateOutput { cluster_labels: l, .. } => {
                            cluster_labels.push(l)
                        }
                        other => return Err(self.unexpected(&other)),
                    }
                }
                self.stage = Stage::Done;
                info!(
                    "protocol finished: {} sites, {} rounds",
                    self.sites.len(),
                    self.rounds
                );
                Ok(RemoteStep::Finished(RemoteOutcome {
                    global_centroids: std::mem::take(&mut self.global_centroids),
                    cluster_labels,
                    delta_history: std::mem::take(&mut self.history),
                    round_count: self.rounds,
                }))
            }
            Stage::Done => Err(finished()),
        }
    }

    fn on_optimizer(
        &mut self,
        outputs: Vec<PhaseOutput>,
        ctx: &RunContext<'_>,
    ) -> Result<RemoteStep> {
        let mut local = Vec::with_capacity(outputs.len());
        let mut deltas = Vec::with_capacity(outputs.len());
        let mut converged = Vec::with_capacity(outputs.len());
        for output in outputs {
            match output {
                PhaseOutput::LocalComputeOptimizer {
                    centroids,
                    delta,
                    converged: c,
                    ..
                } => {
                    local.push(centroids);
                    deltas.push(delta);
                    converged.push(c);
                }
                other => return Err(self.unexpected(&other)),
            }
        }

        self.rounds += 1;
        let max_delta = deltas.iter().copied().fold(0.0, f64::max);
        let converged_sites = converged.iter().filter(|&&c| c).count();
        self.history.push(deltas);
        ctx.sink.emit(DiagnosticEvent::Round {
            mode: self.config.optimization,
            round: self.rounds,
            max_delta,
            converged_sites,
            sites: self.sites.len(),
        });

        if converged_sites == self.sites.len() {
            self.global_centroids = aggregate_centroids(&local, self.config.k)?;
            debug!(k = self.config.k, "aggregated global centroids");
            let global = self.global_centroids.clone();
            return Ok(self.advance(Stage::AwaitFinalLabels, |role, i| {
                InboundMessage::AggregateOutput {
                    config_ref: role.config_refs[i].clone(),
                    remote_centroids: global.clone(),
                }
            }));
        }

        if self.rounds >= self.config.max_rounds {
            warn!(
                "aborting: {} of {} sites still moving after {} rounds (max delta {})",
                self.sites.len() - converged_sites,
                self.sites.len(),
                self.rounds,
                max_delta
            );
            self.stage = Stage::Done;
            return Err(DkmError::RoundLimitExceeded {
                max_rounds: self.config.max_rounds,
            });
        }

        let mut local = local.into_iter();
        Ok(self.advance(Stage::AwaitClustering, |role, i| {
            InboundMessage::ConvergedFalse {
                config_ref: role.config_refs[i].clone(),
                remote_centroids: local.next().unwrap_or_default(),
            }
        }))
    }

    /// Move to `next` and build one request per site, in site order.
    fn advance(
        &mut self,
        next: Stage,
        mut message: impl FnMut(&Self, usize) -> InboundMessage,
    ) -> RemoteStep {
        let requests = (0..self.sites.len())
            .map(|i| message(self, i).into_request(self.sites[i].state.clone()))
            .collect();
        self.stage = next;
        RemoteStep::Continue(requests)
    }

    /// Put responses in site order; every site must answer exactly once.
    fn collate(&self, responses: Vec<PhaseResponse>) -> Result<Vec<PhaseOutput>> {
        let phase = self.stage.expected();
        let mut slots: Vec<Option<PhaseOutput>> = vec![None; self.sites.len()];
        for response in responses {
            let index = self
                .sites
                .iter()
                .position(|s| s.state.site_id == response.state.site_id)
                .ok_or_else(|| DkmError::missing(phase, "state.site_id"))?;
            if slots[index].replace(response.output).is_some() {
                return Err(DkmError::missing(phase, "state.site_id"));
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    DkmError::at_site(i, DkmError::missing(phase, "output"))
                })
            })
            .collect()
    }

    fn expect(&self, ok: bool, output: &PhaseOutput) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(self.unexpected(output))
        }
    }

    fn unexpected(&self, output: &PhaseOutput) -> DkmError {
        warn!(
            expected = self.stage.expected(),
            got = output.phase_name(),
            "unexpected local phase"
        );
        DkmError::UnknownPhase(output.phase_name().to_string())
    }
}

fn finished() -> DkmError {
    DkmError::config("protocol already finished")
}

/// Run the whole protocol, using `exchange` to deliver each batch of
/// requests and collect the matching responses.
pub fn drive<F>(role: &mut RemoteRole, ctx: &RunContext<'_>, mut exchange: F) -> Result<RemoteOutcome>
where
    F: FnMut(Vec<PhaseRequest>) -> Result<Vec<PhaseResponse>>,
{
    let mut requests = role.start();
    loop {
        let responses = exchange(requests)?;
        match role.on_round(responses, ctx)? {
            RemoteStep::Continue(next) => requests = next,
            RemoteStep::Finished(outcome) => return Ok(outcome),
        }
    }
}

impl RemoteStep {
    /// Phase carried by the pending requests, `None` when finished or starting.
    pub fn phase(&self) -> Option<RemotePhase> {
        match self {
            RemoteStep::Continue(requests) => requests
                .first()
                .and_then(|r| r.input.phase.as_deref())
                .and_then(|p| p.parse().ok()),
            RemoteStep::Finished(_) => None,
        }
    }
}
