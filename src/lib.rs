//! vantage: VP-tree nearest-neighbor search for generic (non-metric)
//! spaces, with a learnable pruning oracle.
//!
//! Most ANN libraries assume a metric: symmetric distances obeying the
//! triangle inequality. Real similarity measures often are not —
//! fractional Lp norms, divergences, rank correlations. This crate
//! implements the VP-tree line of work where the pruning rule itself is
//! a *parameter*:
//!
//! - [`vptree::VpTree`] — balanced binary partition by median distance
//!   to a pivot, over any [`space::Space`];
//! - [`vptree::PolynomialPruner`] — the decision rule
//!   `MaxDist < alpha * |M - d(q, pivot)|^exp`, one `(alpha, exp)` pair
//!   per side; `(1, 1)` is the classic stretched triangle inequality;
//! - [`tune`] — an offline bracketed grid search that learns the
//!   coefficients from a held-out workload, maximizing speed subject to
//!   a recall floor.
//!
//! # Which knob should I turn?
//!
//! | Goal | Knob |
//! |------|------|
//! | Exact search in a metric space | default pruner (`alpha = 1, exp = 1`) |
//! | Faster, approximate | raise `alpha` (or tune) |
//! | Meet a recall target | [`tune::tune`] with `desired_recall` |
//! | Discrete/quantized distances | nothing — median ties already visit both sides |
//!
//! # Usage
//!
//! ```
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//! use vantage::query::KnnQuery;
//! use vantage::space::{Kernel, Space, VectorSpace};
//! use vantage::vptree::{PolynomialPruner, PrunerParams, VpTree, VpTreeParams};
//!
//! # fn main() -> vantage::Result<()> {
//! let space = VectorSpace::<f32>::new(Kernel::L2);
//! let mut data = vantage::object::DataSet::new();
//! for (i, v) in [[0.0f32, 0.0], [3.0, 4.0], [1.0, 1.0]].iter().enumerate() {
//!     data.push(space.create_from_vec(i as u32, -1, v));
//! }
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let tree = VpTree::build_all(&space, &data, &VpTreeParams::default(), &mut rng)?;
//! let pruner = PolynomialPruner::new(PrunerParams::default())?;
//!
//! let query = space.create_from_vec(100, -1, &[0.1, 0.1]);
//! let mut knn = KnnQuery::new(&query, 2);
//! tree.knn_search(&pruner, &mut knn);
//! assert_eq!(knn.results()[0].1, 0);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency model
//!
//! Indices are built once and queried read-only; parallelism is across
//! queries (the tuner evaluates workloads with rayon), never inside one
//! search. Distance-computation counters live in the query objects, so
//! nothing is shared mutably.
//!
//! # References
//!
//! - Boytsov & Naidan (NIPS 2013): "Learning to prune in metric and
//!   non-metric spaces"
//! - Chavez & Navarro (2003): "Probabilistic proximity search"

pub mod error;
pub mod eval;
pub mod object;
pub mod query;
pub mod space;
pub mod tune;
pub mod vptree;

// Re-exports
pub use error::{Result, VantageError};
pub use object::{DataSet, Object};
pub use space::{DistanceValue, Space};
pub use vptree::{PolynomialPruner, PrunerParams, VisitDecision, VpTree, VpTreeParams};
