//! Message-driven runs: a remote role talking to local sites in memory

use dkm_core::data::{gaussian_blobs, Blob};
use dkm_core::phase::{drive, PhaseInput, PhaseOutput};
use dkm_core::{
    handle_request, partition, Dataset, DiagnosticEvent, DkmError, MemoryConfigStore,
    MemoryDatasetSource, OptimizationMode, PhaseRequest, PhaseResponse, RecordingSink, RemoteRole,
    RunConfig, RunContext, SiteContext, SiteSpec, SiteState,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

struct LocalSite {
    state: SiteState,
    store: MemoryConfigStore,
}

struct Network {
    sites: Vec<LocalSite>,
    data: MemoryDatasetSource,
    sink: RecordingSink,
}

impl Network {
    /// Split `dataset` over `count` sites, one data ref per site.
    fn new(dataset: &Dataset, count: usize, seed: u64) -> (Self, Vec<SiteSpec>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let (nodes, _) = partition(dataset.len(), count, true, &mut rng)
            .unwrap()
            .apply(dataset)
            .unwrap();

        let mut data = MemoryDatasetSource::new();
        let mut sites = Vec::new();
        let mut specs = Vec::new();
        for (i, node) in nodes.into_iter().enumerate() {
            let state = SiteState::new(format!("site{}", i), format!("/out/site{}", i));
            let data_ref = format!("site{}.json", i);
            data.insert(data_ref.clone(), node);
            specs.push(SiteSpec::new(state.clone(), data_ref));
            sites.push(LocalSite {
                state,
                store: MemoryConfigStore::new(),
            });
        }
        let network = Self {
            sites,
            data,
            sink: RecordingSink::new(),
        };
        (network, specs)
    }

    fn exchange(&mut self, requests: Vec<PhaseRequest>) -> dkm_core::Result<Vec<PhaseResponse>> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let site = self
                .sites
                .iter_mut()
                .find(|s| s.state.site_id == request.state.site_id)
                .expect("request for an unknown site");
            let mut ctx = SiteContext {
                state: &site.state,
                store: &mut site.store,
                data: &self.data,
                sink: &self.sink,
            };
            // Round-trip through JSON as a real transport would
            let wire = serde_json::to_string(&request)?;
            let response = handle_request(serde_json::from_str(&wire)?, &mut ctx)?;
            responses.push(serde_json::from_str(&serde_json::to_string(&response)?)?);
        }
        Ok(responses)
    }
}

fn blobs() -> Dataset {
    let blobs = [Blob::new(-1.0, 0.1), Blob::new(1.0, 0.1)];
    gaussian_blobs(90, &blobs, 1, 2, &mut StdRng::seed_from_u64(21)).unwrap()
}

#[test]
fn test_protocol_finds_both_blobs() {
    let dataset = blobs();
    let (mut network, specs) = Network::new(&dataset, 3, 21);
    let config = RunConfig {
        k: 2,
        sites: 3,
        seed: Some(21),
        ..Default::default()
    };
    let remote_sink = RecordingSink::new();
    let ctx = RunContext::new(&remote_sink);
    let mut role = RemoteRole::new(config, specs).unwrap();

    let outcome = drive(&mut role, &ctx, |requests| network.exchange(requests)).unwrap();

    assert_eq!(outcome.global_centroids.len(), 2);
    let low = &outcome.global_centroids[0];
    let high = &outcome.global_centroids[1];
    assert!((low[[0, 0]] + 1.0).abs() < 0.1 && (low[[0, 1]] + 1.0).abs() < 0.1);
    assert!((high[[0, 0]] - 1.0).abs() < 0.1 && (high[[0, 1]] - 1.0).abs() < 0.1);

    assert_eq!(outcome.cluster_labels.len(), 3);
    assert_eq!(
        outcome.cluster_labels.iter().map(Vec::len).sum::<usize>(),
        90
    );
    assert_eq!(remote_sink.rounds(), (1..=outcome.round_count).collect::<Vec<_>>());
    assert!(outcome.delta_history.iter().all(|d| d.len() == 3));

    // Every site wrote its config exactly once
    assert!(network.sites.iter().all(|s| s.store.len() == 1));
    let phases = network
        .sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, DiagnosticEvent::Phase { .. }))
        .count();
    // start, init env, final labels, and two messages per round, per site
    assert_eq!(phases, 3 * (3 + 2 * outcome.round_count));
}

#[test]
fn test_clustering_request_without_centroids_is_rejected() {
    let dataset = blobs();
    let (mut network, _) = Network::new(&dataset, 2, 5);
    let request: PhaseRequest = serde_json::from_value(json!({
        "state": {"site_id": "site0", "output_directory": "/out/site0"},
        "input": {"phase": "remote_init_centroids", "config_ref": "/out/site0/dkm_config.json"}
    }))
    .unwrap();

    match network.exchange(vec![request]) {
        Err(DkmError::Validation { phase, field }) => {
            assert_eq!(phase, "remote_init_centroids");
            assert_eq!(field, "remote_centroids");
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert!(network.sink.events().is_empty());
}

#[test]
fn test_gradient_with_zero_learning_rate_is_stationary() {
    let dataset = blobs();
    let (mut network, specs) = Network::new(&dataset, 1, 9);
    let state = specs[0].state.clone();

    let init = PhaseRequest {
        state: state.clone(),
        input: PhaseInput {
            phase: Some("remote_init_env".into()),
            raw_data_ref: Some(specs[0].data_ref.clone()),
            init: Some(dkm_core::SiteInit {
                k: Some(2),
                optimization: Some(OptimizationMode::Gradient),
                learning_rate: Some(0.0),
                seed: Some(9),
                ..Default::default()
            }),
            ..Default::default()
        },
    };
    let (config_ref, centroids) = match network.exchange(vec![init]).unwrap().remove(0).output {
        PhaseOutput::LocalInitCentroids {
            config_ref,
            centroids,
        } => (config_ref, centroids),
        other => panic!("unexpected {:?}", other),
    };

    let clustering = PhaseRequest {
        state: state.clone(),
        input: PhaseInput {
            phase: Some("remote_init_centroids".into()),
            config_ref: Some(config_ref.clone()),
            remote_centroids: Some(centroids.clone()),
            ..Default::default()
        },
    };
    let cluster_labels = match network.exchange(vec![clustering]).unwrap().remove(0).output {
        PhaseOutput::LocalComputeClustering { cluster_labels, .. } => cluster_labels,
        other => panic!("unexpected {:?}", other),
    };

    let step = PhaseRequest {
        state,
        input: PhaseInput {
            phase: Some("remote_optimization_step".into()),
            config_ref: Some(config_ref),
            remote_centroids: Some(centroids.clone()),
            cluster_labels: Some(cluster_labels),
            ..Default::default()
        },
    };
    match network.exchange(vec![step]).unwrap().remove(0).output {
        PhaseOutput::LocalComputeOptimizer {
            centroids: updated,
            delta,
            converged,
            ..
        } => {
            assert_eq!(updated, centroids);
            assert_eq!(delta, 0.0);
            assert!(converged);
        }
        other => panic!("unexpected {:?}", other),
    }
}
