//! Experiment harness: workload construction and per-setting evaluation.
//!
//! A workload is either an explicit query file or a set of bootstrap
//! splits sampled from the data. Evaluation of one pruner setting runs
//! every query (in parallel — the dataset, index and gold standard are
//! all read-only) and aggregates recall and the two improvement
//! metrics.

pub mod gold;
pub mod meta;

pub use gold::{brute_force_query, GoldEntry, GoldStandardCache};
pub use meta::{MetaAnalysis, Summary};

use std::time::Instant;

use rand::Rng;
use rayon::prelude::*;

use crate::error::{Result, VantageError};
use crate::object::{DataSet, Object};
use crate::query::{KnnQuery, RangeQuery};
use crate::space::{DistanceValue, Space};
use crate::vptree::{PolynomialPruner, VpTree};

/// One train/query division of the dataset.
#[derive(Debug, Clone)]
pub struct TestSplit {
    /// Dataset positions to index.
    pub train: Vec<u32>,
    /// Query positions: into the query dataset when one is present,
    /// otherwise into the data (withheld from `train`).
    pub queries: Vec<u32>,
}

/// Dataset, workload and query type for one experiment.
pub struct ExperimentConfig<D: DistanceValue, S: Space<D>> {
    pub space: S,
    pub data: DataSet,
    pub query_data: Option<DataSet>,
    pub splits: Vec<TestSplit>,
    /// k for k-NN workloads; exactly one of `knn`/`range` is set.
    pub knn: Option<usize>,
    /// Radius for range workloads.
    pub range: Option<D>,
    /// eps-approximation passed through to k-NN queries.
    pub eps: f64,
}

impl<D: DistanceValue, S: Space<D>> ExperimentConfig<D, S> {
    /// Workload with an explicit query set: one split indexing all of
    /// `data`.
    pub fn with_query_set(
        space: S,
        data: DataSet,
        queries: DataSet,
        knn: Option<usize>,
        range: Option<D>,
        eps: f64,
    ) -> Result<Self> {
        validate_query_type(knn, range)?;
        let split = TestSplit {
            train: data.all_indices(),
            queries: queries.all_indices(),
        };
        Ok(Self {
            space,
            data,
            query_data: Some(queries),
            splits: vec![split],
            knn,
            range,
            eps,
        })
    }

    /// Bootstrap workload: `test_set_qty` splits, each withholding
    /// `num_query` objects (sampled without replacement) as queries.
    pub fn bootstrap<R: Rng>(
        space: S,
        data: DataSet,
        test_set_qty: usize,
        num_query: usize,
        knn: Option<usize>,
        range: Option<D>,
        eps: f64,
        rng: &mut R,
    ) -> Result<Self> {
        validate_query_type(knn, range)?;
        if test_set_qty == 0 {
            return Err(VantageError::InvalidParameter(
                "bootstrapping requires testSetQty >= 1".into(),
            ));
        }
        if num_query == 0 || num_query >= data.len() {
            return Err(VantageError::InvalidParameter(format!(
                "bootstrapping requires 0 < maxNumQuery < {} (the dataset size), got {num_query}",
                data.len()
            )));
        }

        let mut splits = Vec::with_capacity(test_set_qty);
        for _ in 0..test_set_qty {
            let picked = rand::seq::index::sample(rng, data.len(), num_query);
            let mut is_query = vec![false; data.len()];
            let mut queries: Vec<u32> = picked.iter().map(|i| i as u32).collect();
            queries.sort_unstable();
            for &q in &queries {
                is_query[q as usize] = true;
            }
            let train: Vec<u32> = (0..data.len() as u32)
                .filter(|&i| !is_query[i as usize])
                .collect();
            splits.push(TestSplit { train, queries });
        }

        Ok(Self {
            space,
            data,
            query_data: None,
            splits,
            knn,
            range,
            eps,
        })
    }

    /// Resolve a query position to its object.
    pub fn query_object(&self, q: u32) -> &Object {
        match &self.query_data {
            Some(qd) => qd.get(q),
            None => self.data.get(q),
        }
    }

    /// Total queries across all splits.
    pub fn query_count(&self) -> usize {
        self.splits.iter().map(|s| s.queries.len()).sum()
    }
}

fn validate_query_type<D: DistanceValue>(knn: Option<usize>, range: Option<D>) -> Result<()> {
    match (knn, range) {
        (Some(k), None) if k > 0 => Ok(()),
        (Some(_), None) => Err(VantageError::InvalidParameter("knn k must be >= 1".into())),
        (None, Some(_)) => Ok(()),
        _ => Err(VantageError::InvalidParameter(
            "exactly one of a k-NN or a range workload must be specified".into(),
        )),
    }
}

/// Per-query measurements for one setting.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub recall: f64,
    pub time_us: f64,
    pub dist_comps: u64,
}

/// Aggregated evaluation of one pruner setting over the workload.
#[derive(Debug, Clone)]
pub struct SettingEval {
    /// Mean recall over queries.
    pub recall: f64,
    pub avg_time_us: f64,
    pub avg_dist_comps: f64,
    /// `brute_time / index_time`.
    pub impr_efficiency: f64,
    /// `brute_dist_comps / index_dist_comps`.
    pub impr_dist_comps: f64,
    pub records: Vec<QueryRecord>,
}

/// Run every query of the workload against the per-split trees with the
/// given pruner and aggregate.
///
/// `trees[i]` must be built over `cfg.splits[i].train`; building is the
/// caller's job because pruner parameters affect only search, so one
/// build serves every setting.
pub fn evaluate_setting<D: DistanceValue, S: Space<D>>(
    cfg: &ExperimentConfig<D, S>,
    trees: &[VpTree<'_, D, S>],
    pruner: &PolynomialPruner,
    gold: &GoldStandardCache<D>,
) -> Result<SettingEval> {
    if trees.len() != cfg.splits.len() {
        return Err(VantageError::InternalInvariant(format!(
            "{} trees for {} splits",
            trees.len(),
            cfg.splits.len()
        )));
    }

    let mut records: Vec<QueryRecord> = Vec::with_capacity(cfg.query_count());
    for (split_idx, split) in cfg.splits.iter().enumerate() {
        let tree = &trees[split_idx];
        let split_records: Vec<QueryRecord> = split
            .queries
            .par_iter()
            .map(|&q| {
                let query_obj = cfg.query_object(q);
                let computed;
                let gold_entry = match gold.entry(split_idx, q) {
                    Some(e) => e,
                    None => {
                        // Overflowed the cache cap; recompute outside the
                        // per-query counters.
                        computed = brute_force_query(cfg, split, query_obj).0;
                        &computed
                    }
                };
                run_query(cfg, tree, pruner, query_obj, gold_entry)
            })
            .collect();
        records.extend(split_records);
    }

    let n = records.len().max(1) as f64;
    let recall = records.iter().map(|r| r.recall).sum::<f64>() / n;
    let avg_time_us = records.iter().map(|r| r.time_us).sum::<f64>() / n;
    let avg_dist_comps = records.iter().map(|r| r.dist_comps as f64).sum::<f64>() / n;

    let impr_efficiency = ratio(gold.brute_avg_time_us(), avg_time_us);
    let impr_dist_comps = ratio(gold.brute_avg_dist_comps(), avg_dist_comps);

    Ok(SettingEval {
        recall,
        avg_time_us,
        avg_dist_comps,
        impr_efficiency,
        impr_dist_comps,
        records,
    })
}

fn ratio(baseline: f64, measured: f64) -> f64 {
    if measured > 0.0 {
        baseline / measured
    } else {
        0.0
    }
}

fn run_query<D: DistanceValue, S: Space<D>>(
    cfg: &ExperimentConfig<D, S>,
    tree: &VpTree<'_, D, S>,
    pruner: &PolynomialPruner,
    query_obj: &Object,
    gold_entry: &[(D, u32)],
) -> QueryRecord {
    let started = Instant::now();
    if let Some(k) = cfg.knn {
        let mut q = KnnQuery::with_eps(query_obj, k, cfg.eps);
        tree.knn_search(pruner, &mut q);
        let time_us = started.elapsed().as_secs_f64() * 1e6;
        QueryRecord {
            recall: knn_recall(q.results(), gold_entry),
            time_us,
            dist_comps: q.dist_comps(),
        }
    } else {
        let r = cfg.range.expect("config validated: knn or range");
        let mut q = RangeQuery::with_eps(query_obj, r, cfg.eps);
        tree.range_search(pruner, &mut q);
        let time_us = started.elapsed().as_secs_f64() * 1e6;
        let recall = if gold_entry.is_empty() {
            1.0
        } else {
            q.results().len() as f64 / gold_entry.len() as f64
        };
        QueryRecord {
            recall,
            time_us,
            dist_comps: q.dist_comps(),
        }
    }
}

/// Tie-tolerant k-NN recall: a found neighbor counts as a hit when its
/// distance does not exceed the worst gold distance (any such neighbor
/// belongs to *some* valid exact top-k set, which matters with
/// quantized distances where the k-th place is shared).
fn knn_recall<D: DistanceValue>(found: &[(D, u32)], gold: &[(D, u32)]) -> f64 {
    if gold.is_empty() {
        return 1.0;
    }
    let threshold = gold.last().unwrap().0;
    let hits = found.iter().filter(|&&(d, _)| d <= threshold).count();
    hits.min(gold.len()) as f64 / gold.len() as f64
}
