//! Message-driven run with one tokio task per site.
//!
//! Each site task owns its file-backed store and answers phase requests
//! over a channel. The remote role waits for every site before moving on,
//! and gives up on a round that takes longer than the configured timeout.

use std::path::Path;
use std::time::Duration;

use dkm_core::phase::RemoteOutcome;
use dkm_core::{
    handle_request, partition, Dataset, DkmError, PhaseRequest, PhaseResponse, RemoteRole,
    RemoteStep, Result, RunConfig, RunContext, SiteConfigStore, SiteContext, SiteSpec, SiteState,
    TracingSink,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{self, JoinHandle};
use tracing::{debug, info};

use crate::store::{write_dataset, FileConfigStore, FileDatasetSource};

type Reply = oneshot::Sender<Result<PhaseResponse>>;

/// Sending half of a site task's inbox.
#[derive(Debug, Clone)]
pub struct SiteHandle {
    site_id: String,
    tx: mpsc::Sender<(PhaseRequest, Reply)>,
}

impl SiteHandle {
    pub fn new(site_id: impl Into<String>, tx: mpsc::Sender<(PhaseRequest, Reply)>) -> Self {
        Self {
            site_id: site_id.into(),
            tx,
        }
    }
}

/// Start a site task that serves requests until every handle is dropped.
///
/// Each request is handled on the blocking pool, so a slow site never holds
/// up the runtime that enforces the round timeout.
pub fn spawn_site(state: SiteState, data: FileDatasetSource) -> (SiteHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<(PhaseRequest, Reply)>(4);
    let handle = SiteHandle::new(state.site_id.clone(), tx);
    let task = tokio::spawn(async move {
        while let Some((request, reply)) = rx.recv().await {
            let (site, source) = (state.clone(), data.clone());
            let result = task::spawn_blocking(move || {
                let mut store = FileConfigStore;
                let sink = TracingSink;
                let mut ctx = SiteContext {
                    state: &site,
                    store: &mut store,
                    data: &source,
                    sink: &sink,
                };
                handle_request(request, &mut ctx)
            })
            .await
            .unwrap_or_else(|e| {
                Err(DkmError::Configuration(format!(
                    "site '{}' handler failed: {}",
                    state.site_id, e
                )))
            });
            if reply.send(result).is_err() {
                debug!(site = %state.site_id, "remote stopped waiting for a response");
            }
        }
    });
    (handle, task)
}

/// Deliver one request per site and wait for all of them.
///
/// Fails with `Timeout` if the slowest site has not answered within
/// `timeout`.
pub async fn exchange(
    sites: &[SiteHandle],
    requests: Vec<PhaseRequest>,
    round: usize,
    timeout: Duration,
) -> Result<Vec<PhaseResponse>> {
    let mut pending = Vec::with_capacity(requests.len());
    for request in requests {
        let site = sites
            .iter()
            .find(|s| s.site_id == request.state.site_id)
            .ok_or_else(|| {
                DkmError::Configuration(format!("no site task for '{}'", request.state.site_id))
            })?;
        let (reply, response) = oneshot::channel();
        site.tx
            .send((request, reply))
            .await
            .map_err(|_| DkmError::Configuration(format!("site '{}' has stopped", site.site_id)))?;
        pending.push(response);
    }

    let collect = async move {
        let mut responses = Vec::with_capacity(pending.len());
        for response in pending {
            let response = response
                .await
                .map_err(|_| DkmError::Configuration("site dropped its reply".into()))?;
            responses.push(response?);
        }
        Ok::<_, DkmError>(responses)
    };
    tokio::time::timeout(timeout, collect)
        .await
        .map_err(|_| DkmError::Timeout { round })?
}

/// Drive `role` to completion over the site tasks.
pub async fn run_protocol(
    role: &mut RemoteRole,
    sites: &[SiteHandle],
    ctx: &RunContext<'_>,
    timeout: Duration,
) -> Result<RemoteOutcome> {
    let mut requests = role.start();
    loop {
        let responses = exchange(sites, requests, role.rounds() + 1, timeout).await?;
        match role.on_round(responses, ctx)? {
            RemoteStep::Continue(next) => requests = next,
            RemoteStep::Finished(outcome) => return Ok(outcome),
        }
    }
}

/// Split `dataset` into per-site files under `workdir`, start one task per
/// site and run the protocol.
pub async fn simulate(
    dataset: &Dataset,
    config: RunConfig,
    workdir: &Path,
    timeout: Duration,
    ctx: &RunContext<'_>,
) -> Result<RemoteOutcome> {
    config.validate()?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let (nodes, _) = partition(dataset.len(), config.sites, config.shuffle, &mut rng)?
        .apply(dataset)?;

    // Sites keep the first config they were given, so a stale one would
    // silently override this run's settings
    let store = FileConfigStore;
    for i in 0..nodes.len() {
        let site_id = format!("site{}", i);
        let state = SiteState::new(site_id.clone(), workdir.join(&site_id));
        if let Some(existing) = store.lookup(&state)? {
            return Err(DkmError::Configuration(format!(
                "workdir already holds a site config ({}); use a fresh directory",
                existing
            )));
        }
    }

    let mut specs = Vec::with_capacity(nodes.len());
    let mut handles = Vec::with_capacity(nodes.len());
    let mut tasks = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        let site_id = format!("site{}", i);
        let data_ref = format!("{}/data.json", site_id);
        write_dataset(&workdir.join(&data_ref), node)?;

        let state = SiteState::new(site_id.clone(), workdir.join(&site_id));
        let (handle, task) = spawn_site(state.clone(), FileDatasetSource::new(workdir));
        specs.push(SiteSpec::new(state, data_ref));
        handles.push(handle);
        tasks.push(task);
    }
    info!(
        "simulating {} sites over {} points in {}",
        specs.len(),
        dataset.len(),
        workdir.display()
    );

    let mut role = RemoteRole::new(config, specs)?;
    let outcome = run_protocol(&mut role, &handles, ctx, timeout).await;

    drop(handles);
    for task in tasks {
        if let Err(e) = task.await {
            debug!("site task ended abnormally: {}", e);
        }
    }
    outcome
}
