//! Vantage-point tree over an arbitrary (possibly non-metric) space.
//!
//! The tree recursively partitions objects by their distance to a
//! chosen pivot: objects at distance `<= median` go left, objects at
//! distance `>= median` go right (objects at exactly the median may end
//! up on either side, which the search oracle must — and does — handle).
//! Leaves hold flat buckets scanned linearly.
//!
//! Search does not hard-code the metric pruning rule; it delegates the
//! visit decision to a [`PolynomialPruner`], which is what makes the
//! recall/speed trade-off tunable in non-metric spaces.
//!
//! # References
//!
//! - Yianilos (1993): "Data structures and algorithms for nearest
//!   neighbor search in general metric spaces"
//! - Boytsov & Naidan (NIPS 2013): "Learning to prune in metric and
//!   non-metric spaces"

pub mod oracle;

pub use oracle::{efficient_pow, PolynomialPruner, PrunerParams, VisitDecision};

use std::cmp::Ordering;

use rand::Rng;

use crate::error::{Result, VantageError};
use crate::object::DataSet;
use crate::query::{KnnQuery, RangeQuery};
use crate::space::{DistanceValue, Space};

/// VP-tree construction parameters.
#[derive(Debug, Clone)]
pub struct VpTreeParams {
    /// Maximum number of objects in a leaf bucket.
    pub bucket_size: usize,
    /// Pick pivots uniformly at random (the tuned index does); when
    /// false the first object of each slice is the pivot, which makes
    /// builds deterministic without an RNG.
    pub select_random_pivot: bool,
}

impl Default for VpTreeParams {
    fn default() -> Self {
        Self {
            bucket_size: 50,
            select_random_pivot: true,
        }
    }
}

enum Node<D> {
    Leaf(Vec<u32>),
    Internal {
        pivot: u32,
        median: D,
        left: Box<Node<D>>,
        right: Box<Node<D>>,
    },
}

/// A built VP-tree index. Read-only after construction; shared freely
/// across query threads.
pub struct VpTree<'a, D: DistanceValue, S: Space<D>> {
    space: &'a S,
    data: &'a DataSet,
    root: Node<D>,
    indexed: usize,
    node_count: usize,
}

impl<'a, D: DistanceValue, S: Space<D>> VpTree<'a, D, S> {
    /// Build an index over the given dataset positions.
    ///
    /// Expected build cost is O(n log n) distance computations.
    pub fn build<R: Rng>(
        space: &'a S,
        data: &'a DataSet,
        mut indices: Vec<u32>,
        params: &VpTreeParams,
        rng: &mut R,
    ) -> Result<Self> {
        if params.bucket_size == 0 {
            return Err(VantageError::InvalidParameter(
                "bucketSize must be at least 1".into(),
            ));
        }
        let indexed = indices.len();
        let mut node_count = 0;
        let root = build_node(space, data, &mut indices, params, rng, &mut node_count);
        Ok(Self {
            space,
            data,
            root,
            indexed,
            node_count,
        })
    }

    /// Build over the whole dataset.
    pub fn build_all<R: Rng>(
        space: &'a S,
        data: &'a DataSet,
        params: &VpTreeParams,
        rng: &mut R,
    ) -> Result<Self> {
        Self::build(space, data, data.all_indices(), params, rng)
    }

    /// Number of objects in the index.
    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    /// Approximate index memory, for the memory metric.
    pub fn size_bytes(&self) -> usize {
        self.indexed * std::mem::size_of::<u32>()
            + self.node_count * (std::mem::size_of::<Node<D>>() + std::mem::size_of::<usize>())
    }

    /// k-NN search driven by the pruning oracle.
    ///
    /// Children are visited left-before-right when both are flagged, so
    /// traversal is deterministic for identical inputs.
    pub fn knn_search(&self, pruner: &PolynomialPruner, query: &mut KnnQuery<'_, D>) {
        self.knn_visit(&self.root, pruner, query);
    }

    fn knn_visit(&self, node: &Node<D>, pruner: &PolynomialPruner, query: &mut KnnQuery<'_, D>) {
        if query.expired() {
            return;
        }
        match node {
            Node::Leaf(bucket) => {
                for &idx in bucket {
                    let obj = self.data.get(idx);
                    let d = query.distance_to(self.space, obj);
                    query.check_and_add(d, obj.id());
                }
            }
            Node::Internal {
                pivot,
                median,
                left,
                right,
            } => {
                let pivot_obj = self.data.get(*pivot);
                let d = query.distance_to(self.space, pivot_obj);
                query.check_and_add(d, pivot_obj.id());

                let decision = pruner.classify(d, query.pruning_radius(), *median);
                if decision.visits_left() {
                    self.knn_visit(left, pruner, query);
                }
                if decision.visits_right() {
                    self.knn_visit(right, pruner, query);
                }
            }
        }
    }

    /// Range search: identical traversal with the fixed radius playing
    /// the role of the query radius.
    pub fn range_search(&self, pruner: &PolynomialPruner, query: &mut RangeQuery<'_, D>) {
        self.range_visit(&self.root, pruner, query);
    }

    fn range_visit(&self, node: &Node<D>, pruner: &PolynomialPruner, query: &mut RangeQuery<'_, D>) {
        if query.expired() {
            return;
        }
        match node {
            Node::Leaf(bucket) => {
                for &idx in bucket {
                    let obj = self.data.get(idx);
                    let d = query.distance_to(self.space, obj);
                    query.check_and_add(d, obj.id());
                }
            }
            Node::Internal {
                pivot,
                median,
                left,
                right,
            } => {
                let pivot_obj = self.data.get(*pivot);
                let d = query.distance_to(self.space, pivot_obj);
                query.check_and_add(d, pivot_obj.id());

                let decision = pruner.classify(d, query.pruning_radius(), *median);
                if decision.visits_left() {
                    self.range_visit(left, pruner, query);
                }
                if decision.visits_right() {
                    self.range_visit(right, pruner, query);
                }
            }
        }
    }

    /// Verify the partition invariant on every internal node: left
    /// descendants at distance `<= median` from the pivot, right
    /// descendants at `>= median`.
    pub fn check_invariants(&self) -> Result<()> {
        self.check_node(&self.root).map(|_| ())
    }

    fn check_node(&self, node: &Node<D>) -> Result<Vec<u32>> {
        match node {
            Node::Leaf(bucket) => Ok(bucket.clone()),
            Node::Internal {
                pivot,
                median,
                left,
                right,
            } => {
                let pivot_obj = self.data.get(*pivot);
                let left_desc = self.check_node(left)?;
                let right_desc = self.check_node(right)?;
                for &idx in &left_desc {
                    let d = self.space.distance(self.data.get(idx), pivot_obj);
                    if d > *median {
                        return Err(VantageError::InternalInvariant(format!(
                            "left descendant {idx} at distance {d} > median {median}"
                        )));
                    }
                }
                for &idx in &right_desc {
                    let d = self.space.distance(self.data.get(idx), pivot_obj);
                    if d < *median {
                        return Err(VantageError::InternalInvariant(format!(
                            "right descendant {idx} at distance {d} < median {median}"
                        )));
                    }
                }
                let mut all = left_desc;
                all.extend(right_desc);
                all.push(*pivot);
                Ok(all)
            }
        }
    }
}

fn build_node<D: DistanceValue, S: Space<D>, R: Rng>(
    space: &S,
    data: &DataSet,
    slice: &mut [u32],
    params: &VpTreeParams,
    rng: &mut R,
    node_count: &mut usize,
) -> Node<D> {
    *node_count += 1;
    if slice.len() <= params.bucket_size {
        return Node::Leaf(slice.to_vec());
    }

    // One step of a Fisher-Yates shuffle: the pivot is the (possibly
    // randomized) first element.
    if params.select_random_pivot {
        let j = rng.random_range(0..slice.len());
        slice.swap(0, j);
    }
    let pivot = slice[0];
    let pivot_obj = data.get(pivot);

    let mut pairs: Vec<(D, u32)> = slice[1..]
        .iter()
        .map(|&idx| (space.distance(data.get(idx), pivot_obj), idx))
        .collect();

    // Quickselect partitions in place: everything before the median
    // position compares <=, everything after compares >=.
    let mid = pairs.len() / 2;
    pairs.select_nth_unstable_by(mid, |a, b| {
        a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal)
    });
    let median = pairs[mid].0;

    let mut left: Vec<u32> = pairs[..mid].iter().map(|&(_, idx)| idx).collect();
    let mut right: Vec<u32> = pairs[mid..].iter().map(|&(_, idx)| idx).collect();

    Node::Internal {
        pivot,
        median,
        left: Box::new(build_node(space, data, &mut left, params, rng, node_count)),
        right: Box::new(build_node(space, data, &mut right, params, rng, node_count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{Kernel, VectorSpace};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn grid_dataset(space: &VectorSpace<f32>, side: u32) -> DataSet {
        let mut data = DataSet::new();
        for x in 0..side {
            for y in 0..side {
                let id = x * side + y;
                data.push(space.create_from_vec(id, -1, &[x as f32, y as f32]));
            }
        }
        data
    }

    #[test]
    fn empty_dataset_builds_and_searches() {
        let space = VectorSpace::<f32>::new(Kernel::L2);
        let data = DataSet::new();
        let mut rng = StdRng::seed_from_u64(0);
        let tree = VpTree::build_all(&space, &data, &VpTreeParams::default(), &mut rng).unwrap();
        assert!(tree.is_empty());

        let q = space.create_from_vec(0, -1, &[0.0, 0.0]);
        let pruner = PolynomialPruner::new(PrunerParams::default()).unwrap();
        let mut knn = KnnQuery::new(&q, 3);
        tree.knn_search(&pruner, &mut knn);
        assert!(knn.results().is_empty());
        assert_eq!(knn.dist_comps(), 0);
    }

    #[test]
    fn k_at_least_n_returns_everything() {
        let space = VectorSpace::<f32>::new(Kernel::L2);
        let data = grid_dataset(&space, 3);
        let mut rng = StdRng::seed_from_u64(1);
        let params = VpTreeParams {
            bucket_size: 2,
            ..Default::default()
        };
        let tree = VpTree::build_all(&space, &data, &params, &mut rng).unwrap();

        let q = space.create_from_vec(100, -1, &[1.0, 1.0]);
        let pruner = PolynomialPruner::new(PrunerParams::default()).unwrap();
        let mut knn = KnnQuery::new(&q, 20);
        tree.knn_search(&pruner, &mut knn);
        assert_eq!(knn.results().len(), 9);
    }

    #[test]
    fn partition_invariant_holds() {
        let space = VectorSpace::<f32>::new(Kernel::L2);
        let data = grid_dataset(&space, 8);
        let mut rng = StdRng::seed_from_u64(7);
        let params = VpTreeParams {
            bucket_size: 4,
            ..Default::default()
        };
        let tree = VpTree::build_all(&space, &data, &params, &mut rng).unwrap();
        tree.check_invariants().unwrap();
    }

    #[test]
    fn default_pruner_is_exact_on_l2() {
        let space = VectorSpace::<f32>::new(Kernel::L2);
        let data = grid_dataset(&space, 6);
        let mut rng = StdRng::seed_from_u64(3);
        let params = VpTreeParams {
            bucket_size: 3,
            ..Default::default()
        };
        let tree = VpTree::build_all(&space, &data, &params, &mut rng).unwrap();
        let pruner = PolynomialPruner::new(PrunerParams::default()).unwrap();

        let q = space.create_from_vec(200, -1, &[2.2, 3.9]);
        let mut knn = KnnQuery::new(&q, 4);
        tree.knn_search(&pruner, &mut knn);

        // Brute force for comparison.
        let mut brute: Vec<(f32, u32)> = data
            .iter()
            .map(|o| (space.distance(&q, o), o.id()))
            .collect();
        brute.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let expected: Vec<f32> = brute.iter().take(4).map(|&(d, _)| d).collect();
        let got: Vec<f32> = knn.results().iter().map(|&(d, _)| d).collect();
        assert_eq!(got, expected);
        // Fewer distance computations than brute force on this layout.
        assert!(knn.dist_comps() <= data.len() as u64);
    }

    #[test]
    fn range_search_matches_linear_scan() {
        let space = VectorSpace::<f32>::new(Kernel::L2);
        let data = grid_dataset(&space, 6);
        let mut rng = StdRng::seed_from_u64(3);
        let params = VpTreeParams {
            bucket_size: 3,
            ..Default::default()
        };
        let tree = VpTree::build_all(&space, &data, &params, &mut rng).unwrap();
        let pruner = PolynomialPruner::new(PrunerParams::default()).unwrap();

        let q = space.create_from_vec(200, -1, &[2.5, 2.5]);
        let mut range = RangeQuery::new(&q, 1.5);
        tree.range_search(&pruner, &mut range);

        let mut got = range.result_ids();
        got.sort_unstable();
        let mut expected: Vec<u32> = data
            .iter()
            .filter(|o| space.distance(&q, o) <= 1.5)
            .map(|o| o.id())
            .collect();
        expected.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn expired_deadline_truncates_the_search() {
        let space = VectorSpace::<f32>::new(Kernel::L2);
        let data = grid_dataset(&space, 8);
        let mut rng = StdRng::seed_from_u64(4);
        let params = VpTreeParams {
            bucket_size: 2,
            ..Default::default()
        };
        let tree = VpTree::build_all(&space, &data, &params, &mut rng).unwrap();
        let pruner = PolynomialPruner::new(PrunerParams::default()).unwrap();

        let q = space.create_from_vec(300, -1, &[4.0, 4.0]);
        let mut knn = KnnQuery::new(&q, 3);
        knn.set_deadline(std::time::Instant::now());
        tree.knn_search(&pruner, &mut knn);
        assert_eq!(knn.dist_comps(), 0);
        assert!(knn.results().is_empty());
    }

    #[test]
    fn first_pivot_build_is_deterministic() {
        let space = VectorSpace::<f32>::new(Kernel::L2);
        let data = grid_dataset(&space, 5);
        let params = VpTreeParams {
            bucket_size: 2,
            select_random_pivot: false,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let t1 = VpTree::build_all(&space, &data, &params, &mut rng).unwrap();
        let t2 = VpTree::build_all(&space, &data, &params, &mut rng).unwrap();

        let q = space.create_from_vec(99, -1, &[0.3, 4.1]);
        let pruner = PolynomialPruner::new(PrunerParams::new(3.0, 1, 3.0, 1)).unwrap();
        let mut k1 = KnnQuery::new(&q, 3);
        let mut k2 = KnnQuery::new(&q, 3);
        t1.knn_search(&pruner, &mut k1);
        t2.knn_search(&pruner, &mut k2);
        assert_eq!(k1.results(), k2.results());
        assert_eq!(k1.dist_comps(), k2.dist_comps());
    }
}
