//! End-to-end scenarios: small literal workloads through build, search,
//! gold-standard caching, and tuning.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vantage::eval::{evaluate_setting, ExperimentConfig, GoldStandardCache};
use vantage::object::DataSet;
use vantage::query::KnnQuery;
use vantage::space::{BitHammingSpace, Kernel, Space, VectorSpace};
use vantage::tune::{tune, CancelToken, TuneParams, TunedParams};
use vantage::vptree::{PolynomialPruner, PrunerParams, VpTree, VpTreeParams};

fn default_pruner() -> PolynomialPruner {
    PolynomialPruner::new(PrunerParams::default()).unwrap()
}

#[test]
fn two_point_dataset_returns_the_origin() {
    let space = VectorSpace::<f32>::new(Kernel::L2);
    let mut data = DataSet::new();
    data.push(space.create_from_vec(0, -1, &[0.0, 0.0]));
    data.push(space.create_from_vec(1, -1, &[3.0, 4.0]));

    let mut rng = StdRng::seed_from_u64(0);
    let tree = VpTree::build_all(&space, &data, &VpTreeParams::default(), &mut rng).unwrap();

    let q = space.create_from_vec(10, -1, &[0.0, 0.0]);
    let mut knn = KnnQuery::new(&q, 1);
    tree.knn_search(&default_pruner(), &mut knn);

    assert_eq!(knn.results().len(), 1);
    assert_eq!(knn.results()[0], (0.0, 0));
}

#[test]
fn unit_grid_self_queries_have_perfect_recall() {
    let space = VectorSpace::<f32>::new(Kernel::L2);
    let mut data = DataSet::new();
    let mut queries = DataSet::new();
    for x in 0..10u32 {
        for y in 0..10u32 {
            let id = x * 10 + y;
            data.push(space.create_from_vec(id, -1, &[x as f32, y as f32]));
            queries.push(space.create_from_vec(id, -1, &[x as f32, y as f32]));
        }
    }

    let cfg =
        ExperimentConfig::with_query_set(space, data, queries, Some(5), None, 0.0).unwrap();
    let mut gold = GoldStandardCache::new(1000);
    gold.ensure_computed(&cfg).unwrap();

    let mut rng = StdRng::seed_from_u64(1);
    let trees = vec![VpTree::build(
        &cfg.space,
        &cfg.data,
        cfg.splits[0].train.clone(),
        &VpTreeParams::default(),
        &mut rng,
    )
    .unwrap()];

    let eval = evaluate_setting(&cfg, &trees, &default_pruner(), &gold).unwrap();
    assert_eq!(eval.recall, 1.0);

    // Every query is a dataset point, so its first neighbor is itself
    // at distance zero.
    for q in cfg.query_data.as_ref().unwrap().iter() {
        let mut knn = KnnQuery::new(q, 5);
        trees[0].knn_search(&default_pruner(), &mut knn);
        assert_eq!(knn.results()[0].0, 0.0);
    }
}

fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.random::<f32>().max(1e-9);
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

fn normal_dataset(space: &VectorSpace<f32>, n: u32, dim: usize, seed: u64) -> DataSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = DataSet::new();
    for i in 0..n {
        let v: Vec<f32> = (0..dim).map(|_| gaussian(&mut rng)).collect();
        data.push(space.create_from_vec(i, -1, &v));
    }
    data
}

#[test]
fn tuner_meets_recall_floor_with_moderate_alphas() {
    let space = VectorSpace::<f32>::new(Kernel::L2);
    let data = normal_dataset(&space, 1000, 16, 77);

    let mut rng = StdRng::seed_from_u64(7);
    let cfg =
        ExperimentConfig::bootstrap(space, data, 1, 100, Some(10), None, 0.0, &mut rng).unwrap();

    let tp = TuneParams {
        desired_recall: 0.9,
        min_exp: 1,
        max_exp: 1,
        full_factor: 8.0,
        step_n: 2,
        max_rec_depth: 3,
        add_restart_qty: 0,
        ..Default::default()
    };
    let mut gold = GoldStandardCache::new(1000);
    let result = tune(
        &cfg,
        &tp,
        &VpTreeParams::default(),
        &mut gold,
        &mut rng,
        &CancelToken::new(),
    )
    .unwrap();

    assert!(result.recall >= 0.9, "recall {}", result.recall);
    assert!(
        result.params.alpha_left <= 4.0 && result.params.alpha_right <= 4.0,
        "alphas {} / {}",
        result.params.alpha_left,
        result.params.alpha_right
    );
    assert_eq!(result.params.exp_left, 1);
    assert_eq!(result.params.exp_right, 1);
}

#[test]
fn second_tuning_run_reuses_the_gold_standard() {
    let space = VectorSpace::<f32>::new(Kernel::L2);
    let data = normal_dataset(&space, 200, 4, 5);
    let mut rng = StdRng::seed_from_u64(5);
    let cfg =
        ExperimentConfig::bootstrap(space, data, 1, 20, Some(5), None, 0.0, &mut rng).unwrap();

    let tp = TuneParams {
        desired_recall: 0.8,
        max_iter: 1,
        max_rec_depth: 1,
        add_restart_qty: 0,
        ..Default::default()
    };
    let mut gold = GoldStandardCache::new(1000);

    tune(
        &cfg,
        &tp,
        &VpTreeParams::default(),
        &mut gold,
        &mut rng,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(gold.brute_force_passes(), 1);

    tune(
        &cfg,
        &tp,
        &VpTreeParams::default(),
        &mut gold,
        &mut rng,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(gold.brute_force_passes(), 1);
}

#[test]
fn bit_hamming_exact_search_matches_linear_scan() {
    let space = BitHammingSpace::new();
    let mut rng = StdRng::seed_from_u64(128);
    let mut data = DataSet::new();
    for i in 0..100u32 {
        let bits: Vec<u32> = (0..128).map(|_| rng.random_range(0..2u32)).collect();
        data.push(space.create_from_vec(i, -1, &BitHammingSpace::pack(&bits)));
    }

    let params = VpTreeParams {
        bucket_size: 8,
        ..Default::default()
    };
    let tree = VpTree::build_all(&space, &data, &params, &mut rng).unwrap();
    let pruner = default_pruner();

    for _ in 0..20 {
        let bits: Vec<u32> = (0..128).map(|_| rng.random_range(0..2u32)).collect();
        let q = space.create_from_vec(1000, -1, &BitHammingSpace::pack(&bits));

        let mut knn = KnnQuery::new(&q, 1);
        tree.knn_search(&pruner, &mut knn);

        let best_brute = data
            .iter()
            .map(|o| space.distance(&q, o))
            .min()
            .unwrap();
        assert_eq!(knn.results()[0].0, best_brute);
    }
}

#[test]
fn output_line_round_trips_to_the_winning_parameters() {
    let space = VectorSpace::<f32>::new(Kernel::L2);
    let data = normal_dataset(&space, 300, 8, 21);
    let mut rng = StdRng::seed_from_u64(21);
    let cfg =
        ExperimentConfig::bootstrap(space, data, 1, 30, Some(5), None, 0.0, &mut rng).unwrap();

    let tp = TuneParams {
        desired_recall: 0.85,
        max_iter: 2,
        max_rec_depth: 2,
        add_restart_qty: 1,
        ..Default::default()
    };
    let mut gold = GoldStandardCache::new(1000);
    let result = tune(
        &cfg,
        &tp,
        &VpTreeParams::default(),
        &mut gold,
        &mut rng,
        &CancelToken::new(),
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tuned.txt");
    std::fs::write(&path, format!("{}\n", result.params)).unwrap();

    let line = std::fs::read_to_string(&path).unwrap();
    let parsed = TunedParams::parse(line.trim()).unwrap();
    assert_eq!(parsed, result.params);
    // Byte-identical after whitespace normalization.
    assert_eq!(line.trim(), result.params.to_string());

    // The parsed parameters construct a working pruner.
    parsed.pruner().unwrap();
}

#[test]
fn range_workload_end_to_end() {
    let space = VectorSpace::<f32>::new(Kernel::L2);
    let mut data = DataSet::new();
    for i in 0..60u32 {
        data.push(space.create_from_vec(i, -1, &[i as f32 / 10.0, 0.0]));
    }
    let mut rng = StdRng::seed_from_u64(2);
    let cfg = ExperimentConfig::bootstrap(
        space,
        data,
        1,
        10,
        None,
        Some(0.75f32),
        0.0,
        &mut rng,
    )
    .unwrap();

    let mut gold = GoldStandardCache::new(1000);
    gold.ensure_computed(&cfg).unwrap();

    let trees = vec![VpTree::build(
        &cfg.space,
        &cfg.data,
        cfg.splits[0].train.clone(),
        &VpTreeParams {
            bucket_size: 4,
            ..Default::default()
        },
        &mut rng,
    )
    .unwrap()];

    let eval = evaluate_setting(&cfg, &trees, &default_pruner(), &gold).unwrap();
    assert_eq!(eval.recall, 1.0);
}
