//! VP-tree build/search benchmarks.
//!
//! Measures the pruning trade-off directly: distance computations and
//! latency against a brute-force scan at several alpha settings.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vantage::object::DataSet;
use vantage::query::KnnQuery;
use vantage::space::{Kernel, Space, VectorSpace};
use vantage::vptree::{PolynomialPruner, PrunerParams, VpTree, VpTreeParams};

fn random_dataset(space: &VectorSpace<f32>, n: u32, dim: usize, seed: u64) -> DataSet {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = DataSet::new();
    for i in 0..n {
        let v: Vec<f32> = (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
        data.push(space.create_from_vec(i, -1, &v));
    }
    data
}

fn bench_build(c: &mut Criterion) {
    let space = VectorSpace::<f32>::new(Kernel::L2);
    let mut group = c.benchmark_group("vptree_build");
    for &n in &[1_000u32, 10_000] {
        let data = random_dataset(&space, n, 16, 42);
        group.bench_with_input(BenchmarkId::from_parameter(n), &data, |b, data| {
            let mut rng = StdRng::seed_from_u64(7);
            b.iter(|| {
                let tree =
                    VpTree::build_all(&space, data, &VpTreeParams::default(), &mut rng).unwrap();
                black_box(tree.len())
            });
        });
    }
    group.finish();
}

fn bench_knn_search(c: &mut Criterion) {
    let space = VectorSpace::<f32>::new(Kernel::L2);
    let data = random_dataset(&space, 10_000, 16, 42);
    let mut rng = StdRng::seed_from_u64(7);
    let tree = VpTree::build_all(&space, &data, &VpTreeParams::default(), &mut rng).unwrap();

    let queries: Vec<_> = (0..64u32)
        .map(|i| {
            let v: Vec<f32> = (0..16).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect();
            space.create_from_vec(100_000 + i, -1, &v)
        })
        .collect();

    let mut group = c.benchmark_group("knn_k10");
    for &alpha in &[1.0f64, 2.0, 4.0] {
        let pruner = PolynomialPruner::new(PrunerParams::new(alpha, 1, alpha, 1)).unwrap();
        group.bench_with_input(
            BenchmarkId::new("alpha", alpha),
            &pruner,
            |b, pruner| {
                let mut qi = 0usize;
                b.iter(|| {
                    let q = &queries[qi % queries.len()];
                    qi += 1;
                    let mut knn = KnnQuery::new(q, 10);
                    tree.knn_search(pruner, &mut knn);
                    black_box(knn.dist_comps())
                });
            },
        );
    }

    // Brute-force baseline for the improvement ratio.
    group.bench_function("brute", |b| {
        let mut qi = 0usize;
        b.iter(|| {
            let q = &queries[qi % queries.len()];
            qi += 1;
            let mut knn = KnnQuery::new(q, 10);
            for obj in data.iter() {
                let d = knn.distance_to(&space, obj);
                knn.check_and_add(d, obj.id());
            }
            black_box(knn.dist_comps())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_build, bench_knn_search);
criterion_main!(benches);
