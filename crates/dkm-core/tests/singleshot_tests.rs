//! End-to-end tests of the in-process run and the centroid merge

use dkm_core::data::{gaussian_blobs, vector, Blob};
use dkm_core::{
    aggregate_centroids, partition, run, Coordinator, Dataset, DkmError, OptimizationMode, Point,
    RecordingSink, RunConfig, RunContext, SiteOptimizer,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Two 2-D blobs centered at (-1,-1) and (1,1)
fn two_blobs(n: usize, seed: u64) -> Dataset {
    let blobs = [Blob::new(-1.0, 0.1), Blob::new(1.0, 0.1)];
    gaussian_blobs(n, &blobs, 1, 2, &mut StdRng::seed_from_u64(seed)).unwrap()
}

fn near(p: &Point, x: f64, y: f64, tol: f64) -> bool {
    (p[[0, 0]] - x).abs() < tol && (p[[0, 1]] - y).abs() < tol
}

#[test]
fn test_two_blobs_lloyd_converges() {
    let data = two_blobs(100, 11);
    let config = RunConfig {
        k: 2,
        sites: 2,
        optimization: OptimizationMode::Lloyd,
        epsilon: 1e-5,
        seed: Some(11),
        ..Default::default()
    };
    let sink = RecordingSink::new();
    let output = run(&data, &config, &RunContext::new(&sink)).unwrap();

    assert!(output.round_count < 50, "took {} rounds", output.round_count);
    assert_eq!(sink.rounds().len(), output.round_count);
    assert_eq!(output.name, "singleshot_lloyd");

    // Output is in canonical (lexicographic) order
    let centroids = &output.global_centroids;
    assert_eq!(centroids.len(), 2);
    assert!(near(&centroids[0], -1.0, -1.0, 0.1), "{:?}", centroids[0]);
    assert!(near(&centroids[1], 1.0, 1.0, 0.1), "{:?}", centroids[1]);

    // Every point lands with its own blob
    let labels = output.labels_in_input_order().unwrap();
    assert!(labels[..50].iter().all(|&l| l == 0));
    assert!(labels[50..].iter().all(|&l| l == 1));
}

#[test]
fn test_two_blobs_gradient_converges() {
    let data = two_blobs(100, 4);
    let config = RunConfig {
        k: 2,
        sites: 2,
        optimization: OptimizationMode::Gradient,
        learning_rate: 0.01,
        seed: Some(4),
        ..Default::default()
    };
    let output = run(&data, &config, &RunContext::default()).unwrap();
    assert!(near(&output.global_centroids[0], -1.0, -1.0, 0.1));
    assert!(near(&output.global_centroids[1], 1.0, 1.0, 0.1));
    assert!(output.delta_history.last().unwrap().iter().all(|&d| d < 1e-5));
}

#[test]
fn test_merge_is_independent_of_site_order() {
    let site_a = vec![vector(&[-1.02, -0.98]), vector(&[1.01, 0.99])];
    let site_b = vec![vector(&[0.97, 1.03]), vector(&[-0.99, -1.01])];
    let site_c = vec![vector(&[-1.0, -1.0]), vector(&[1.0, 1.0])];

    let forward = aggregate_centroids(&[site_a.clone(), site_b.clone(), site_c.clone()], 2).unwrap();
    let backward = aggregate_centroids(&[site_c, site_b, site_a], 2).unwrap();

    assert_eq!(forward, backward);
    assert_eq!(forward.len(), 2);
    assert!(near(&forward[0], -1.0, -1.0, 0.05));
    assert!(near(&forward[1], 1.0, 1.0, 0.05));
}

#[test]
fn test_forced_round_after_convergence_is_a_fixed_point() {
    let data = two_blobs(60, 8);
    let mut rng = StdRng::seed_from_u64(8);
    let partitioning = partition(data.len(), 3, true, &mut rng).unwrap();
    let (nodes, _) = partitioning.apply(&data).unwrap();
    let sites = nodes
        .into_iter()
        .enumerate()
        .map(|(i, node)| SiteOptimizer::new(i, node, 2, &mut rng))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    let config = RunConfig {
        k: 2,
        sites: 3,
        ..Default::default()
    };
    let ctx = RunContext::default();
    let mut coordinator = Coordinator::new(sites, &config).unwrap();
    let rounds = coordinator.run(&ctx).unwrap();
    let settled = coordinator.local_centroids();

    let forced = coordinator.run_round(&ctx).unwrap();
    assert_eq!(forced.round, rounds + 1);
    assert_eq!(forced.deltas, vec![0.0; 3]);
    assert!(forced.all_converged());
    assert_eq!(coordinator.local_centroids(), settled);
}

#[test]
fn test_invalid_run_configs() {
    let data = two_blobs(10, 1);
    let zero_k = RunConfig {
        k: 0,
        ..Default::default()
    };
    let too_many_sites = RunConfig {
        k: 1,
        sites: 11,
        ..Default::default()
    };
    let k_too_large = RunConfig {
        k: 6,
        sites: 2,
        ..Default::default()
    };
    for config in [zero_k, too_many_sites, k_too_large] {
        let err = run(&data, &config, &RunContext::default()).unwrap_err();
        assert!(matches!(err, DkmError::Configuration(_)), "{:?}", err);
    }
}
