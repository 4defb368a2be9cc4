//! Local role: one synchronous handler per inbound phase.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::config::SiteConfig;
use crate::context::{DiagnosticEvent, SiteContext};
use crate::data::{Dataset, Point};
use crate::error::{DkmError, Result};
use crate::local::{
    assign_clusters, check_centroid_shapes, check_stopping, initialize_centroids,
    update_centroids,
};
use crate::phase::message::{
    InboundMessage, PhaseOutput, PhaseRequest, PhaseResponse, RemotePhase,
};
use crate::store::init_once;

/// Validate a wire request and run the handler for its phase.
///
/// Fails with `Validation` for a missing field or a request addressed to
/// another site, and with `UnknownPhase` for an unrecognized tag. No output
/// is produced on failure.
pub fn handle_request(request: PhaseRequest, ctx: &mut SiteContext<'_>) -> Result<PhaseResponse> {
    let PhaseRequest { state, input } = request;
    let inbound = input.phase.clone().unwrap_or_else(|| "start".to_string());
    if state.site_id != ctx.state.site_id {
        return Err(DkmError::missing(inbound, "state.site_id"));
    }

    let message = InboundMessage::try_from(input)?;
    let output = dispatch(message, ctx)?;

    ctx.sink.emit(DiagnosticEvent::Phase {
        site_id: ctx.state.site_id.clone(),
        inbound,
        outbound: output.phase_name().to_string(),
    });
    Ok(PhaseResponse { output, state })
}

/// Run the local step(s) for a validated message.
pub fn dispatch(message: InboundMessage, ctx: &mut SiteContext<'_>) -> Result<PhaseOutput> {
    let phase = message.phase();
    match message {
        InboundMessage::Start => Ok(PhaseOutput::LocalNoop),
        InboundMessage::InitEnv { raw_data_ref, init } => {
            let config_ref = init_once(&mut *ctx.store, ctx.state, || {
                SiteConfig::from_init(raw_data_ref, &init)
            })?;
            init_centroids(ctx, config_ref)
        }
        InboundMessage::InitCentroids {
            config_ref,
            remote_centroids,
        }
        | InboundMessage::ConvergedFalse {
            config_ref,
            remote_centroids,
        } => compute_clustering(ctx, phase, config_ref, remote_centroids),
        InboundMessage::OptimizationStep {
            config_ref,
            remote_centroids,
            cluster_labels,
        } => compute_optimizer(ctx, config_ref, remote_centroids, cluster_labels),
        InboundMessage::AggregateOutput {
            config_ref,
            remote_centroids,
        } => aggregate_output(ctx, config_ref, remote_centroids),
    }
}

// A site only ever reads its own config; a foreign reference is unusable
fn load(
    ctx: &SiteContext<'_>,
    phase: RemotePhase,
    config_ref: &str,
) -> Result<(SiteConfig, Dataset)> {
    if config_ref != ctx.store.config_ref(ctx.state) {
        return Err(DkmError::missing(phase.as_str(), "config_ref"));
    }
    let config = ctx.store.load(config_ref)?;
    let data = ctx.data.load(&config.data_ref)?;
    Ok((config, data))
}

fn init_centroids(ctx: &SiteContext<'_>, config_ref: String) -> Result<PhaseOutput> {
    let (config, data) = load(ctx, RemotePhase::RemoteInitEnv, &config_ref)?;
    debug!(site = %ctx.state.site_id, k = config.k, "initializing centroids");
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let centroids = initialize_centroids(&data, config.k, &mut rng)?;
    Ok(PhaseOutput::LocalInitCentroids {
        config_ref,
        centroids,
    })
}

fn compute_clustering(
    ctx: &SiteContext<'_>,
    phase: Option<RemotePhase>,
    config_ref: String,
    remote_centroids: Vec<Point>,
) -> Result<PhaseOutput> {
    let phase = phase.unwrap_or(RemotePhase::RemoteInitCentroids);
    let (config, data) = load(ctx, phase, &config_ref)?;
    check_remote_centroids(phase, &config, &data, &remote_centroids)?;
    debug!(site = %ctx.state.site_id, "computing clustering");
    let cluster_labels = assign_clusters(&data, &remote_centroids)?;
    Ok(PhaseOutput::LocalComputeClustering {
        config_ref,
        remote_centroids,
        cluster_labels,
    })
}

fn compute_optimizer(
    ctx: &SiteContext<'_>,
    config_ref: String,
    remote_centroids: Vec<Point>,
    cluster_labels: Vec<usize>,
) -> Result<PhaseOutput> {
    let phase = RemotePhase::RemoteOptimizationStep;
    let (config, data) = load(ctx, phase, &config_ref)?;
    check_remote_centroids(phase, &config, &data, &remote_centroids)?;
    if cluster_labels.len() != data.len() || cluster_labels.iter().any(|&l| l >= config.k) {
        return Err(DkmError::missing(phase.as_str(), "cluster_labels"));
    }

    debug!(site = %ctx.state.site_id, mode = %config.optimization, "computing optimizer");
    let centroids = update_centroids(
        config.optimization,
        &data,
        &cluster_labels,
        &remote_centroids,
        config.learning_rate,
    )?;
    let (converged, delta) = check_stopping(&centroids, &remote_centroids, config.epsilon);
    Ok(PhaseOutput::LocalComputeOptimizer {
        config_ref,
        centroids,
        delta,
        converged,
    })
}

fn aggregate_output(
    ctx: &SiteContext<'_>,
    config_ref: String,
    remote_centroids: Vec<Point>,
) -> Result<PhaseOutput> {
    let phase = RemotePhase::RemoteAggregateOutput;
    let (_, data) = load(ctx, phase, &config_ref)?;
    check_centroid_shapes(&data, &remote_centroids)
        .map_err(|_| DkmError::missing(phase.as_str(), "remote_centroids"))?;
    let cluster_labels = assign_clusters(&data, &remote_centroids)?;
    Ok(PhaseOutput::LocalAggregateOutput {
        config_ref,
        cluster_labels,
    })
}

// Wrong count or shape counts as a missing field: the payload is unusable
fn check_remote_centroids(
    phase: RemotePhase,
    config: &SiteConfig,
    data: &Dataset,
    centroids: &[Point],
) -> Result<()> {
    if centroids.len() != config.k {
        return Err(DkmError::missing(phase.as_str(), "remote_centroids"));
    }
    check_centroid_shapes(data, centroids)
        .map_err(|_| DkmError::missing(phase.as_str(), "remote_centroids"))
}
