//! Offline tuner for the VP-tree polynomial pruning oracle.
//!
//! Reads a dataset (and optionally a query file), computes the exact
//! gold standard once, runs the bracketed grid search over the pruner
//! coefficients, and writes the winning parameters as a single
//! `key=value` line:
//!
//! ```text
//! tune_vptree --spaceType l2 --distType float --dataFile data.txt \
//!     --maxNumQuery 200 --testSetQty 2 --knn 10 \
//!     --method vptree:desiredRecall=0.9 --outFile tuned.txt
//! ```
//!
//! Exit code 0 on success; any fatal condition (bad flags, unreadable
//! files, recall floor unmet) logs a diagnostic and exits non-zero.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use vantage::error::{Result, VantageError};
use vantage::eval::{evaluate_setting, ExperimentConfig, GoldStandardCache, MetaAnalysis};
use vantage::space::{parse_space_spec, BitHammingSpace, DistanceValue, Space, VectorSpace};
use vantage::tune::{tune, CancelToken, OptimMetric, TuneParams};
use vantage::vptree::{VpTree, VpTreeParams};

#[derive(Parser, Debug)]
#[command(
    name = "tune_vptree",
    about = "Tune polynomial-pruner coefficients for VP-tree search"
)]
struct Args {
    /// Space type, e.g. l2, l1, lp:p=0.5, cosine, bit_hamming.
    #[arg(long = "spaceType")]
    space_type: String,

    /// Distance value type: int, float, double.
    #[arg(long = "distType", default_value = "float")]
    dist_type: String,

    /// Input data file.
    #[arg(long = "dataFile")]
    data_file: PathBuf,

    /// Query file; when absent, queries are bootstrapped from the data.
    #[arg(long = "queryFile")]
    query_file: Option<PathBuf>,

    /// If non-zero, use only the first maxNumData objects.
    #[arg(long = "maxNumData", default_value_t = 0)]
    max_num_data: usize,

    /// If non-zero, use maxNumQuery queries (required when bootstrapping).
    #[arg(long = "maxNumQuery", default_value_t = 0)]
    max_num_query: usize,

    /// Number of bootstrap test sets; ignored when a query file is given.
    #[arg(long = "testSetQty", default_value_t = 1)]
    test_set_qty: usize,

    /// Comma-separated K values for k-NN search (exactly one value,
    /// and exactly one of --knn / --range).
    #[arg(long)]
    knn: Option<String>,

    /// Comma-separated radii for range search.
    #[arg(long)]
    range: Option<String>,

    /// eps-approximate k-NN relaxation.
    #[arg(long, default_value_t = 0.0)]
    eps: f64,

    /// Method spec: vptree:desiredRecall=0.9[,metric=dist|time][,bucketSize=N].
    #[arg(long)]
    method: String,

    /// Tuned parameters are written here as a key=value line.
    #[arg(long = "outFile")]
    out_file: Option<PathBuf>,

    /// Redirect logging from stderr to this file.
    #[arg(long = "logFile")]
    log_file: Option<PathBuf>,

    /// Minimum pruner exponent to sweep.
    #[arg(long = "minExp", default_value_t = 1)]
    min_exp: u32,

    /// Maximum pruner exponent to sweep.
    #[arg(long = "maxExp", default_value_t = 1)]
    max_exp: u32,

    /// Outer grid-descent iterations.
    #[arg(long = "maxIter", default_value_t = 10)]
    max_iter: u32,

    /// Grid refinement depth (each level shrinks the search step).
    #[arg(long = "maxRecDepth", default_value_t = 6)]
    max_rec_depth: u32,

    /// Each local grid step evaluates (2*stepN+1)^2 points.
    #[arg(long = "stepN", default_value_t = 2)]
    step_n: u32,

    /// Number of additional random restarts.
    #[arg(long = "addRestartQty", default_value_t = 4)]
    add_restart_qty: u32,

    /// Initial bracketing factor of the grid search.
    #[arg(long = "fullFactor", default_value_t = 8.0)]
    full_factor: f64,

    /// Maximum number of gold-standard entries to cache.
    #[arg(long = "maxCacheGSQty", default_value_t = 1000)]
    max_cache_gs_qty: usize,

    /// PRNG seed (pivot selection, bootstrap sampling, restart jitter).
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = init_logging(args.log_file.as_ref()) {
        eprintln!("tune_vptree: {e}");
        std::process::exit(1);
    }

    let started = Instant::now();
    if let Err(e) = dispatch(&args) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
    tracing::info!(elapsed_s = started.elapsed().as_secs_f64(), "finished");
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| VantageError::io(path.display().to_string(), e))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn dispatch(args: &Args) -> Result<()> {
    match args.dist_type.to_ascii_lowercase().as_str() {
        "float" => run(args, VectorSpace::<f32>::from_name(&args.space_type)?),
        "double" => run(args, VectorSpace::<f64>::from_name(&args.space_type)?),
        "int" => {
            let (name, _) = parse_space_spec(&args.space_type)?;
            if name == "bit_hamming" {
                run(args, BitHammingSpace::new())
            } else {
                Err(VantageError::InvalidParameter(format!(
                    "unknown integer-distance space '{name}'"
                )))
            }
        }
        other => Err(VantageError::InvalidParameter(format!(
            "unknown distance value type '{other}' (expected int, float, or double)"
        ))),
    }
}

/// Method spec: name plus `key=value` parameters.
struct MethodSpec {
    desired_recall: f64,
    metric: OptimMetric,
    bucket_size: usize,
}

impl MethodSpec {
    fn parse(spec: &str) -> Result<Self> {
        let (name, params) = parse_space_spec(spec)?;
        match name.as_str() {
            "vptree" => {}
            "proj_vptree" | "permutation_vptree" | "perm_bin_vptree" => {
                return Err(VantageError::InvalidParameter(format!(
                    "method '{name}' is not supported by this tuner; use vptree"
                )));
            }
            other => {
                return Err(VantageError::InvalidParameter(format!(
                    "unknown method '{other}'"
                )));
            }
        }

        let mut desired_recall = None;
        let mut metric = OptimMetric::default();
        let mut bucket_size = VpTreeParams::default().bucket_size;
        for (k, v) in &params {
            match k.as_str() {
                "desiredRecall" => {
                    desired_recall = Some(v.parse::<f64>().map_err(|_| {
                        VantageError::InvalidParameter(format!("bad desiredRecall '{v}'"))
                    })?);
                }
                "metric" => metric = v.parse()?,
                "bucketSize" => {
                    bucket_size = v.parse::<usize>().map_err(|_| {
                        VantageError::InvalidParameter(format!("bad bucketSize '{v}'"))
                    })?;
                }
                other => {
                    return Err(VantageError::InvalidParameter(format!(
                        "unknown method parameter '{other}'"
                    )));
                }
            }
        }
        let desired_recall = desired_recall.ok_or_else(|| {
            VantageError::InvalidParameter(
                "the method spec must set desiredRecall, e.g. vptree:desiredRecall=0.9".into(),
            )
        })?;
        Ok(Self {
            desired_recall,
            metric,
            bucket_size,
        })
    }
}

fn parse_value_list<T: FromStr>(spec: &str, what: &str) -> Result<Vec<T>> {
    spec.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|tok| {
            tok.trim()
                .parse::<T>()
                .map_err(|_| VantageError::InvalidParameter(format!("bad {what} value '{tok}'")))
        })
        .collect()
}

fn run<D: DistanceValue, S: Space<D>>(args: &Args, space: S) -> Result<()> {
    let method = MethodSpec::parse(&args.method)?;

    let knn_all: Vec<usize> = match &args.knn {
        Some(s) => parse_value_list(s, "knn")?,
        None => Vec::new(),
    };
    let range_all: Vec<D> = match &args.range {
        Some(s) => parse_value_list(s, "range")?,
        None => Vec::new(),
    };
    if knn_all.len() + range_all.len() != 1 {
        return Err(VantageError::InvalidParameter(
            "specify exactly one k-NN or one range search value".into(),
        ));
    }
    let knn = knn_all.first().copied();
    let range = range_all.first().copied();

    tracing::info!(space = %space.name(), data = %args.data_file.display(), "reading dataset");
    let data = space.read_dataset(&args.data_file, args.max_num_data)?;
    tracing::info!(objects = data.len(), "dataset loaded");

    let mut rng = StdRng::seed_from_u64(args.seed);
    let cfg = match &args.query_file {
        Some(path) => {
            let queries = space.read_dataset(path, args.max_num_query)?;
            tracing::info!(queries = queries.len(), "query set loaded");
            ExperimentConfig::with_query_set(space, data, queries, knn, range, args.eps)?
        }
        None => {
            if args.max_num_query == 0 {
                return Err(VantageError::InvalidParameter(
                    "set a positive --maxNumQuery or specify a query file".into(),
                ));
            }
            ExperimentConfig::bootstrap(
                space,
                data,
                args.test_set_qty,
                args.max_num_query,
                knn,
                range,
                args.eps,
                &mut rng,
            )?
        }
    };

    let tune_params = TuneParams {
        desired_recall: method.desired_recall,
        metric: method.metric,
        min_exp: args.min_exp,
        max_exp: args.max_exp,
        max_iter: args.max_iter,
        max_rec_depth: args.max_rec_depth,
        step_n: args.step_n,
        add_restart_qty: args.add_restart_qty,
        full_factor: args.full_factor,
    };
    let tree_params = VpTreeParams {
        bucket_size: method.bucket_size,
        ..Default::default()
    };

    let mut gold = GoldStandardCache::new(args.max_cache_gs_qty);
    let result = tune(
        &cfg,
        &tune_params,
        &tree_params,
        &mut gold,
        &mut rng,
        &CancelToken::new(),
    )?;

    tracing::info!(
        params = %result.params,
        recall = result.recall,
        improvement = result.improvement,
        "optimal parameters"
    );

    report_winner(&cfg, &tree_params, &result.params.pruner()?, &gold, &mut rng)?;

    if let Some(path) = &args.out_file {
        let line = format!("{}\n", result.params);
        std::fs::write(path, line)
            .map_err(|e| VantageError::io(path.display().to_string(), e))?;
        tracing::info!(out = %path.display(), "tuned parameters written");
    }
    Ok(())
}

/// Re-evaluate the winning setting and log the full meta-analysis.
fn report_winner<D: DistanceValue, S: Space<D>>(
    cfg: &ExperimentConfig<D, S>,
    tree_params: &VpTreeParams,
    pruner: &vantage::vptree::PolynomialPruner,
    gold: &GoldStandardCache<D>,
    rng: &mut StdRng,
) -> Result<()> {
    let build_started = Instant::now();
    let trees: Vec<VpTree<'_, D, S>> = cfg
        .splits
        .iter()
        .map(|s| VpTree::build(&cfg.space, &cfg.data, s.train.clone(), tree_params, rng))
        .collect::<Result<_>>()?;
    let build_ms = build_started.elapsed().as_secs_f64() * 1e3;

    let eval = evaluate_setting(cfg, &trees, pruner, gold)?;
    let mut meta = MetaAnalysis::new();
    for rec in &eval.records {
        meta.add_query(
            rec.recall,
            rec.recall,
            rec.time_us,
            rec.dist_comps as f64,
            gold.brute_avg_time_us(),
            gold.brute_avg_dist_comps(),
        );
    }
    let memory: usize = trees.iter().map(|t| t.size_bytes()).sum();
    meta.set_index_stats(memory as f64, build_ms);
    tracing::info!("winning setting:\n{}", meta.report());
    Ok(())
}
